//! Typed error taxonomy for the ordering/reconciliation core.
//!
//! Allocator/planner failures (`InvalidMove`) are resolved locally and never
//! reach the store. Store failures propagate to the caller as typed values;
//! nothing in this taxonomy is fatal to the running process.

use crate::store::Section;

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// The task id does not exist. Non-retryable; maps to HTTP 404.
    #[error("task {0} not found")]
    NotFound(i64),

    /// Malformed or nonsensical reorder target. Local-only; the caller must
    /// leave state untouched and no network round trip occurs.
    #[error("invalid move: {0}")]
    InvalidMove(String),

    /// A request field that cannot be interpreted (e.g. an unparseable
    /// revisit date). Maps to HTTP 400.
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Transient storage error. Retryable; triggers client rollback.
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Two tasks in one section share an order key. Defensive only; the
    /// correct response is a forced renormalization, never a crash.
    #[error("duplicate order key {key} in section {section}")]
    OrderCorruption { section: Section, key: f64 },
}

impl BoardError {
    /// True for failures worth retrying (the store may succeed next time).
    pub fn is_retryable(&self) -> bool {
        matches!(self, BoardError::Persistence(_))
    }
}
