//! Fractional order keys.
//!
//! Tasks within a section are ordered by an f64 key. Inserting between two
//! neighbors takes their midpoint, so a single move touches a single row.
//! When bisection runs out of distinguishable midpoints the whole section is
//! renormalized back to even `GAP` spacing, the fallback that keeps repeated
//! inserts between the same neighbors live forever.

pub mod planner;

pub use planner::{plan_reorder, DropTarget, MoveRequest};

use crate::store::Section;
use serde::{Deserialize, Serialize};

/// Spacing between consecutive keys after renormalization and on append.
/// Large enough that thousands of midpoint bisections stay representable.
pub const GAP: f64 = 10_000.0;

/// Key assigned to the first task of an empty section.
pub const BASE: f64 = 10_000.0;

/// One computed placement: task `task_id` moves to `section` with key `order`.
/// Transient: produced by the planner, applied as an individual PATCH.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderAssignment {
    pub task_id: i64,
    pub section: Section,
    pub order: f64,
}

/// Result of a single-slot allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    /// A usable key, strictly ordered against its neighbors.
    Key(f64),
    /// Precision exhausted; the caller must renormalize the section.
    Renormalize,
}

/// Key for appending after `keys` (ascending). Never fails: an empty
/// sequence gets `BASE`, otherwise `last + GAP`.
pub fn allocate_end(keys: &[f64]) -> f64 {
    match keys.last() {
        Some(last) => last + GAP,
        None => BASE,
    }
}

/// Key for inserting before the first of `keys` (ascending).
pub fn allocate_start(keys: &[f64]) -> Slot {
    let Some(&first) = keys.first() else {
        return Slot::Key(BASE);
    };
    let candidate = first / 2.0;
    if candidate > 0.0 && candidate < first {
        Slot::Key(candidate)
    } else {
        Slot::Renormalize
    }
}

/// Midpoint between two adjacent keys, or `Renormalize` when the midpoint is
/// no longer strictly between them.
pub fn allocate_between(prev: f64, next: f64) -> Slot {
    let candidate = (prev + next) / 2.0;
    if candidate > prev && candidate < next {
        Slot::Key(candidate)
    } else {
        Slot::Renormalize
    }
}

/// Evenly-spaced keys for a section of `len` tasks: `(index + 1) * GAP`.
pub fn renormalized_keys(len: usize) -> Vec<f64> {
    (0..len).map(|i| (i as f64 + 1.0) * GAP).collect()
}
