//! Authoritative task persistence.
//!
//! SQLite behind an sqlx pool is the single source of truth for order keys.
//! Every operation here is a single-record atomic write; a multi-task
//! renormalization is applied as independent updates by the client (see
//! `client::remote` for the batch discipline).

use anyhow::{Context as _, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{fmt, path::Path, str::FromStr};

use crate::error::BoardError;

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
async fn with_timeout<T>(
    fut: impl std::future::Future<Output = Result<T, BoardError>>,
) -> Result<T, BoardError> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        // A hung query is indistinguishable from a starved pool to callers.
        Err(_) => Err(BoardError::Persistence(sqlx::Error::PoolTimedOut)),
    }
}

// ─── Sections ────────────────────────────────────────────────────────────────

/// The fixed set of board sections. Order keys are only comparable within
/// one section; cross-section comparison is meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    Triage,
    A,
    B,
    C,
}

impl Section {
    pub const ALL: [Section; 4] = [Section::Triage, Section::A, Section::B, Section::C];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Triage => "Triage",
            Section::A => "A",
            Section::B => "B",
            Section::C => "C",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Triage" => Ok(Section::Triage),
            "A" => Ok(Section::A),
            "B" => Ok(Section::B),
            "C" => Ok(Section::C),
            other => Err(BoardError::InvalidMove(format!(
                "unknown section '{other}'"
            ))),
        }
    }
}

// ─── Task record ─────────────────────────────────────────────────────────────

/// Full task record as persisted and as sent on the wire (camelCase JSON).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub title: String,
    /// Stored as text; always one of `Section::ALL`.
    pub section: String,
    pub completed: bool,
    pub order: f64,
    pub created_at: String,
    pub updated_at: String,
    pub overview: Option<String>,
    pub details: Option<String>,
    /// Calendar date anchored to 12:00:00 UTC (see `normalize_revisit_date`).
    pub revisit_date: Option<String>,
}

impl Task {
    pub fn section(&self) -> Section {
        // Rows only ever hold validated section names.
        self.section.parse().unwrap_or(Section::Triage)
    }
}

/// Creation payload. `order` must be supplied by the caller (computed by the
/// planner); the store enforces its presence but never allocates it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    pub section: Option<String>,
    pub order: f64,
    #[serde(default)]
    pub completed: bool,
}

/// Partial update. Absent fields are preserved verbatim; `revisit_date`
/// distinguishes absent (keep) from explicit null (clear).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub section: Option<String>,
    pub completed: Option<bool>,
    pub order: Option<f64>,
    pub overview: Option<String>,
    pub details: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub revisit_date: Option<Option<String>>,
}

fn double_option<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}

/// Normalize a revisit date to the storage form `YYYY-MM-DDT12:00:00Z`.
///
/// Accepts a bare calendar date or any RFC 3339 timestamp (date part taken).
/// Anchoring to UTC noon keeps the calendar date stable across timezone
/// conversions on either side of the wire.
pub fn normalize_revisit_date(raw: &str) -> Result<String, BoardError> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| {
            chrono::DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive())
        })
        .map_err(|e| BoardError::InvalidField {
            field: "revisitDate",
            reason: format!("'{raw}': {e}"),
        })?;
    Ok(format!("{}T12:00:00Z", date.format("%Y-%m-%d")))
}

// ─── TaskStore ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("boardd.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::migrate!("src/store/migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap, Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    /// Insert a new task. The section defaults to `Triage`; `completed`
    /// defaults to false; the order key comes from the caller.
    pub async fn create(&self, new: NewTask) -> Result<Task, BoardError> {
        if !new.order.is_finite() {
            return Err(BoardError::InvalidField {
                field: "order",
                reason: "must be a finite number".to_string(),
            });
        }
        let section_name = new.section.as_deref().unwrap_or("Triage");
        let section: Section =
            section_name.parse().map_err(|_| BoardError::InvalidField {
                field: "section",
                reason: format!("unknown section '{section_name}'"),
            })?;

        with_timeout(async {
            let now = Utc::now().to_rfc3339();
            let result = sqlx::query(
                "INSERT INTO tasks (title, section, completed, \"order\", created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&new.title)
            .bind(section.as_str())
            .bind(new.completed)
            .bind(new.order)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await?;

            let id = result.last_insert_rowid();
            self.get(id).await?.ok_or(BoardError::NotFound(id))
        })
        .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<Task>, BoardError> {
        Ok(sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Merge only the supplied fields into the record, preserving everything
    /// else verbatim, and refresh `updated_at`.
    pub async fn update(&self, id: i64, patch: TaskPatch) -> Result<Task, BoardError> {
        let existing = self.get(id).await?.ok_or(BoardError::NotFound(id))?;

        if let Some(order) = patch.order {
            if !order.is_finite() {
                return Err(BoardError::InvalidField {
                    field: "order",
                    reason: "must be a finite number".to_string(),
                });
            }
        }
        let section = match patch.section {
            Some(s) => {
                let parsed: Section = s.parse().map_err(|_| BoardError::InvalidField {
                    field: "section",
                    reason: format!("unknown section '{s}'"),
                })?;
                parsed.as_str().to_string()
            }
            None => existing.section.clone(),
        };
        let revisit_date = match patch.revisit_date {
            Some(Some(raw)) => Some(normalize_revisit_date(&raw)?),
            Some(None) => None,
            None => existing.revisit_date.clone(),
        };

        with_timeout(async {
            let now = Utc::now().to_rfc3339();
            sqlx::query(
                "UPDATE tasks
                 SET title = ?, section = ?, completed = ?, \"order\" = ?,
                     overview = ?, details = ?, revisit_date = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(patch.title.as_ref().unwrap_or(&existing.title))
            .bind(&section)
            .bind(patch.completed.unwrap_or(existing.completed))
            .bind(patch.order.unwrap_or(existing.order))
            .bind(patch.overview.as_ref().or(existing.overview.as_ref()))
            .bind(patch.details.as_ref().or(existing.details.as_ref()))
            .bind(&revisit_date)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;

            self.get(id).await?.ok_or(BoardError::NotFound(id))
        })
        .await
    }

    /// Remove the record and return it for broadcast purposes. Surviving
    /// tasks keep their order keys; deletion has no re-spacing obligation.
    pub async fn delete(&self, id: i64) -> Result<Task, BoardError> {
        let existing = self.get(id).await?.ok_or(BoardError::NotFound(id))?;
        with_timeout(async {
            sqlx::query("DELETE FROM tasks WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(existing)
        })
        .await
    }

    /// All tasks, ascending by order key. A global sort on a section-scoped
    /// key is a harmless superset ordering; consumers re-filter per section.
    pub async fn list(&self) -> Result<Vec<Task>, BoardError> {
        with_timeout(async {
            Ok(
                sqlx::query_as("SELECT * FROM tasks ORDER BY \"order\" ASC")
                    .fetch_all(&self.pool)
                    .await?,
            )
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_round_trips_through_str() {
        for s in Section::ALL {
            assert_eq!(s.as_str().parse::<Section>().unwrap(), s);
        }
        assert!("D".parse::<Section>().is_err());
    }

    #[test]
    fn revisit_date_normalizes_to_utc_noon() {
        assert_eq!(
            normalize_revisit_date("2026-03-14").unwrap(),
            "2026-03-14T12:00:00Z"
        );
        // Timestamp input: the calendar date is kept, time discarded.
        assert_eq!(
            normalize_revisit_date("2026-03-14T23:59:00+00:00").unwrap(),
            "2026-03-14T12:00:00Z"
        );
        assert!(normalize_revisit_date("not-a-date").is_err());
    }

    #[test]
    fn patch_distinguishes_absent_from_null_revisit_date() {
        let absent: TaskPatch = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert_eq!(absent.revisit_date, None);

        let cleared: TaskPatch = serde_json::from_str(r#"{"revisitDate":null}"#).unwrap();
        assert_eq!(cleared.revisit_date, Some(None));

        let set: TaskPatch =
            serde_json::from_str(r#"{"revisitDate":"2026-01-02"}"#).unwrap();
        assert_eq!(set.revisit_date, Some(Some("2026-01-02".to_string())));
    }
}
