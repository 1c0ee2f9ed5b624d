use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::store::Task;

/// Mutation kind carried by every change message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// One committed mutation, fanned out to every connected client with the
/// full resulting record. The originator receives its own broadcast and
/// treats it as authoritative confirmation, not as a foreign event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub task: Task,
}

/// Broadcasts serialized `TaskEvent` JSON to all connected WebSocket clients.
#[derive(Clone)]
pub struct ChangeBroadcaster {
    tx: broadcast::Sender<String>,
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Send a committed mutation to all connected clients.
    pub fn broadcast(&self, kind: ChangeKind, task: &Task) {
        let event = TaskEvent {
            kind,
            task: task.clone(),
        };
        // Ignore errors; no subscribers is fine
        let _ = self
            .tx
            .send(serde_json::to_string(&event).unwrap_or_default());
    }

    /// Subscribe to all change events. Each live connection holds one
    /// receiver; dropping it is the deregistration.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Number of currently registered connections.
    pub fn connections(&self) -> usize {
        self.tx.receiver_count()
    }
}
