//! Reorder planning.
//!
//! Translates a single drag operation against a board snapshot into the
//! minimal set of `OrderAssignment`s: one for the moved task, or one per
//! task in the destination section when renormalization is forced. Pure and
//! synchronous; gesture capture and network I/O live elsewhere.

use std::cmp::Ordering;

use super::{
    allocate_between, allocate_end, allocate_start, renormalized_keys, OrderAssignment, Slot,
};
use crate::error::BoardError;
use crate::store::{Section, Task};

/// Where the dragged task was dropped within the destination section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    /// Dropped onto an existing task: insert immediately before it.
    OnTask(i64),
    /// Dropped at a logical index (clamped to the section length).
    AtIndex(usize),
    /// Dropped into empty space at the end of the section.
    End,
}

/// One user drag operation.
#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub task_id: i64,
    /// Destination section name; rejected as `InvalidMove` when it is not a
    /// member of the fixed section set.
    pub section: String,
    pub target: DropTarget,
}

/// Compute the assignments for `request` against the board snapshot `tasks`.
///
/// Returns exactly one assignment for the moved task, or, when bisection is
/// exhausted or an exact key tie is detected, a full renormalization of the
/// destination section with the moved task at its resolved position. On
/// `InvalidMove` no assignments are produced and the caller must leave its
/// state untouched.
pub fn plan_reorder(
    tasks: &[Task],
    request: &MoveRequest,
) -> Result<Vec<OrderAssignment>, BoardError> {
    let moved = tasks
        .iter()
        .find(|t| t.id == request.task_id)
        .ok_or_else(|| {
            BoardError::InvalidMove(format!("task {} is not on the board", request.task_id))
        })?;
    let section: Section = request.section.parse()?;

    // Destination snapshot, ascending by key, moved task excluded.
    let mut dest: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.section() == section && t.id != moved.id)
        .collect();
    dest.sort_by(|a, b| a.order.partial_cmp(&b.order).unwrap_or(Ordering::Equal));

    let index = match request.target {
        DropTarget::OnTask(target_id) => dest
            .iter()
            .position(|t| t.id == target_id)
            .ok_or_else(|| {
                BoardError::InvalidMove(format!(
                    "drop target {target_id} is not in section {section}"
                ))
            })?,
        DropTarget::AtIndex(i) => i.min(dest.len()),
        DropTarget::End => dest.len(),
    };

    // An already-corrupt destination (duplicate keys) gets repaired by the
    // same renormalization path instead of planning against garbage.
    if let Some(key) = duplicate_key(&dest) {
        tracing::warn!(%section, key, "duplicate order keys detected, forcing renormalization");
        return Ok(renormalize(&dest, moved, section, index));
    }

    let keys: Vec<f64> = dest.iter().map(|t| t.order).collect();
    let slot = if dest.is_empty() {
        Slot::Key(allocate_end(&keys))
    } else if index == 0 {
        allocate_start(&keys)
    } else if index == dest.len() {
        Slot::Key(allocate_end(&keys))
    } else {
        allocate_between(keys[index - 1], keys[index])
    };

    match slot {
        // An exact tie with an existing key must never be observably created;
        // it is treated the same as exhausted precision.
        Slot::Key(key) if keys.contains(&key) => {
            Ok(renormalize(&dest, moved, section, index))
        }
        Slot::Key(key) => Ok(vec![OrderAssignment {
            task_id: moved.id,
            section,
            order: key,
        }]),
        Slot::Renormalize => Ok(renormalize(&dest, moved, section, index)),
    }
}

/// First order key that appears more than once in a sorted section snapshot.
pub fn duplicate_key(sorted: &[&Task]) -> Option<f64> {
    sorted
        .windows(2)
        .find(|w| w[0].order == w[1].order)
        .map(|w| w[0].order)
}

/// Re-space the whole destination section to `(index + 1) * GAP`, with the
/// moved task spliced in at `index`.
fn renormalize(
    dest: &[&Task],
    moved: &Task,
    section: Section,
    index: usize,
) -> Vec<OrderAssignment> {
    let mut ids: Vec<i64> = dest.iter().map(|t| t.id).collect();
    ids.insert(index, moved.id);
    let keys = renormalized_keys(ids.len());
    ids.into_iter()
        .zip(keys)
        .map(|(task_id, order)| OrderAssignment {
            task_id,
            section,
            order,
        })
        .collect()
}
