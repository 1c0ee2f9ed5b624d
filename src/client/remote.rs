//! HTTP/WebSocket client for a running boardd daemon.
//!
//! CLI subcommands (`boardd list`, `boardd move`, …) use this to talk to the
//! REST API and the change feed. `move_task` implements the full optimistic
//! protocol: plan locally, apply to the cache, fire every assignment PATCH
//! concurrently, and on any failure roll back and resync from the server.

use anyhow::{bail, Context as _, Result};
use futures_util::{future, StreamExt};
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::ClientCache;
use crate::order::{allocate_end, plan_reorder, MoveRequest, OrderAssignment};
use crate::store::{Section, Task};
use crate::ws::event::TaskEvent;

/// Outcome of a reorder batch.
#[derive(Debug)]
pub enum MoveOutcome {
    /// Every assignment committed; the cache holds the authoritative records.
    Committed(Vec<Task>),
    /// At least one assignment failed. The cache was rolled back and then
    /// replaced with the server's authoritative list (sibling writes of the
    /// batch may already have committed server-side).
    Resynced { failed: usize },
}

pub struct BoardClient {
    base_url: String,
    http: reqwest::Client,
}

impl BoardClient {
    /// Client targeting the daemon's REST port on localhost.
    pub fn new(rest_port: u16) -> Self {
        Self::from_url(format!("http://127.0.0.1:{rest_port}"))
    }

    pub fn from_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Fetch the authoritative task list, ascending by order key.
    pub async fn fetch_tasks(&self) -> Result<Vec<Task>> {
        let resp = self
            .http
            .get(format!("{}/api/tasks", self.base_url))
            .send()
            .await
            .context("could not reach the daemon (is it running?)")?;
        Ok(resp.error_for_status()?.json().await?)
    }

    /// Create a task appended at the end of `section` (order key computed
    /// client-side from the current list, as the store never allocates).
    pub async fn add_task(&self, title: &str, section: Section) -> Result<Task> {
        let tasks = self.fetch_tasks().await?;
        let keys: Vec<f64> = tasks
            .iter()
            .filter(|t| t.section() == section)
            .map(|t| t.order)
            .collect();
        let body = json!({
            "title": title,
            "section": section,
            "order": allocate_end(&keys),
        });
        let resp = self
            .http
            .post(format!("{}/api/tasks", self.base_url))
            .json(&body)
            .send()
            .await?;
        Ok(resp.error_for_status()?.json().await?)
    }

    pub async fn patch_task(&self, id: i64, body: serde_json::Value) -> Result<Task> {
        let resp = self
            .http
            .patch(format!("{}/api/tasks/{id}", self.base_url))
            .json(&body)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            bail!("task {id} not found");
        }
        Ok(resp.error_for_status()?.json().await?)
    }

    pub async fn delete_task(&self, id: i64) -> Result<Task> {
        let resp = self
            .http
            .delete(format!("{}/api/tasks/{id}", self.base_url))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            bail!("task {id} not found");
        }
        Ok(resp.error_for_status()?.json().await?)
    }

    /// Execute one drag operation end to end against `cache`.
    ///
    /// All assignment PATCHes are fired concurrently and the batch commits
    /// only once every one resolves. On partial failure the cache cannot
    /// trust its own rolled-back guess, since other assignments were already
    /// committed server-side, so it re-fetches the full authoritative list.
    pub async fn move_task(
        &self,
        cache: &mut ClientCache,
        request: &MoveRequest,
    ) -> Result<MoveOutcome> {
        // InvalidMove resolves locally: no assignments, no network.
        let plan = plan_reorder(&cache.tasks(), request)?;
        let mutation = cache.optimistic_reorder(&plan);

        let results = future::join_all(plan.iter().map(|a| self.apply_assignment(a))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();

        if failed == 0 {
            let committed: Vec<Task> = results.into_iter().filter_map(Result::ok).collect();
            cache.confirm(mutation, &committed);
            return Ok(MoveOutcome::Committed(committed));
        }

        cache.roll_back(mutation);
        // Best-effort resync; when even the fetch fails the rolled-back
        // snapshot is the most consistent state we can offer.
        let authoritative = self
            .fetch_tasks()
            .await
            .context("reorder failed and resync fetch also failed")?;
        cache.replace_all(authoritative);
        Ok(MoveOutcome::Resynced { failed })
    }

    async fn apply_assignment(&self, a: &OrderAssignment) -> Result<Task> {
        self.patch_task(
            a.task_id,
            json!({ "section": a.section, "order": a.order }),
        )
        .await
    }
}

/// A live subscription to the daemon's change feed.
pub struct EventFeed {
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

impl EventFeed {
    /// Connect to the change feed WebSocket.
    pub async fn connect(ws_port: u16) -> Result<Self> {
        let url = format!("ws://127.0.0.1:{ws_port}");
        let (ws, _) = connect_async(&url)
            .await
            .context("failed to connect to the change feed")?;
        Ok(Self { ws })
    }

    /// Next change event, skipping non-text frames. `None` when the server
    /// closes the connection; the caller owns reconnection and must re-fetch
    /// the full list afterwards (missed events are not replayed).
    pub async fn next_event(&mut self) -> Result<Option<TaskEvent>> {
        while let Some(msg) = self.ws.next().await {
            match msg? {
                Message::Text(text) => {
                    let event: TaskEvent =
                        serde_json::from_str(&text).context("malformed change event")?;
                    return Ok(Some(event));
                }
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }
}
