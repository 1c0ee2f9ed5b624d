//! Client-side task mirror.
//!
//! `ClientCache` gives the UI instant feedback: every local mutation is
//! applied optimistically against a snapshot, then reconciled with the
//! server's authoritative record (response or broadcast) or rolled back.
//! Pure in-memory state; all I/O lives in `remote`.

pub mod remote;

use std::collections::{HashMap, HashSet};

use crate::error::BoardError;
use crate::order::OrderAssignment;
use crate::store::{Section, Task};
use crate::ws::event::{ChangeKind, TaskEvent};

pub type MutationId = u64;

/// Lifecycle of one pending local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// Created but nothing staged yet (transient).
    Idle,
    /// Applied locally, awaiting authoritative confirmation.
    OptimisticallyApplied,
    /// Every touched record was confirmed by the server.
    Confirmed,
    /// The pre-mutation snapshot was restored after a failure.
    RolledBack,
}

#[derive(Debug)]
struct PendingMutation {
    state: MutationState,
    /// Full pre-mutation cache image; dropped once settled.
    snapshot: Option<HashMap<i64, Task>>,
    /// Task ids still awaiting an authoritative record.
    awaiting: HashSet<i64>,
}

/// Per-client in-memory mirror of the task collection.
#[derive(Debug, Default)]
pub struct ClientCache {
    tasks: HashMap<i64, Task>,
    pending: HashMap<MutationId, PendingMutation>,
    next_id: MutationId,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole mirror with an authoritative list (initial load and
    /// post-failure resync). Pending mutations are discarded; the server
    /// list supersedes every local guess.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks.into_iter().map(|t| (t.id, t)).collect();
        self.pending.clear();
    }

    pub fn get(&self, id: i64) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// All tasks ascending by order key.
    pub fn tasks(&self) -> Vec<Task> {
        let mut all: Vec<Task> = self.tasks.values().cloned().collect();
        all.sort_by(|a, b| a.order.partial_cmp(&b.order).unwrap_or(std::cmp::Ordering::Equal));
        all
    }

    /// Tasks of one section, ascending by order key, the user-visible
    /// sequence.
    pub fn section_tasks(&self, section: Section) -> Vec<Task> {
        let mut rows: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| t.section() == section)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.order.partial_cmp(&b.order).unwrap_or(std::cmp::Ordering::Equal));
        rows
    }

    /// True when no mutation is awaiting confirmation.
    pub fn is_idle(&self) -> bool {
        !self
            .pending
            .values()
            .any(|p| p.state == MutationState::OptimisticallyApplied)
    }

    pub fn mutation_state(&self, id: MutationId) -> Option<MutationState> {
        self.pending.get(&id).map(|p| p.state)
    }

    /// Apply a planned reorder optimistically: snapshot, move the touched
    /// tasks to their new section/key, and await confirmation for each.
    pub fn optimistic_reorder(&mut self, assignments: &[OrderAssignment]) -> MutationId {
        let snapshot = self.tasks.clone();
        let mut awaiting = HashSet::new();
        for a in assignments {
            if let Some(task) = self.tasks.get_mut(&a.task_id) {
                task.section = a.section.as_str().to_string();
                task.order = a.order;
                awaiting.insert(a.task_id);
            }
        }
        self.register(snapshot, awaiting)
    }

    /// Apply an arbitrary local edit (completion toggle, title/detail edit)
    /// optimistically to a single task.
    pub fn optimistic_edit(
        &mut self,
        id: i64,
        edit: impl FnOnce(&mut Task),
    ) -> Result<MutationId, BoardError> {
        if !self.tasks.contains_key(&id) {
            return Err(BoardError::NotFound(id));
        }
        let snapshot = self.tasks.clone();
        if let Some(task) = self.tasks.get_mut(&id) {
            edit(task);
        }
        Ok(self.register(snapshot, HashSet::from([id])))
    }

    fn register(&mut self, snapshot: HashMap<i64, Task>, awaiting: HashSet<i64>) -> MutationId {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingMutation {
                state: MutationState::OptimisticallyApplied,
                snapshot: Some(snapshot),
                awaiting,
            },
        );
        id
    }

    /// Merge authoritative records from a success response into the cache,
    /// overwriting any optimistic guess for those ids.
    pub fn confirm(&mut self, id: MutationId, authoritative: &[Task]) {
        for task in authoritative {
            self.tasks.insert(task.id, task.clone());
            if let Some(p) = self.pending.get_mut(&id) {
                p.awaiting.remove(&task.id);
            }
        }
        self.settle_if_complete(id);
    }

    /// Restore the pre-mutation snapshot. The caller decides whether a
    /// resync fetch is also needed (it is whenever sibling writes of the
    /// same batch may already have committed server-side).
    pub fn roll_back(&mut self, id: MutationId) {
        if let Some(p) = self.pending.get_mut(&id) {
            if p.state == MutationState::OptimisticallyApplied {
                if let Some(snapshot) = p.snapshot.take() {
                    self.tasks = snapshot;
                }
                p.state = MutationState::RolledBack;
                p.awaiting.clear();
            }
        }
    }

    /// Merge one broadcast event. Records not involved in any pending
    /// mutation merge unconditionally; this is how a second client's
    /// changes propagate. For ids a pending mutation is awaiting, the
    /// broadcast doubles as authoritative confirmation.
    pub fn apply_event(&mut self, event: &TaskEvent) {
        match event.kind {
            ChangeKind::Create | ChangeKind::Update => {
                self.tasks.insert(event.task.id, event.task.clone());
            }
            ChangeKind::Delete => {
                self.tasks.remove(&event.task.id);
            }
        }

        let ids: Vec<MutationId> = self
            .pending
            .iter()
            .filter(|(_, p)| {
                p.state == MutationState::OptimisticallyApplied
                    && p.awaiting.contains(&event.task.id)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(p) = self.pending.get_mut(&id) {
                p.awaiting.remove(&event.task.id);
            }
            self.settle_if_complete(id);
        }
    }

    fn settle_if_complete(&mut self, id: MutationId) {
        if let Some(p) = self.pending.get_mut(&id) {
            if p.state == MutationState::OptimisticallyApplied && p.awaiting.is_empty() {
                p.state = MutationState::Confirmed;
                p.snapshot = None;
            }
        }
    }
}
