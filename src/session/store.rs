//! SQLite-backed session directory and event log
//!
//! Reads the `sessions` and writes the `events` tables shared with the
//! REST application. Only the columns the live path needs are touched.

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    EventLog, SessionDescriptor, SessionDirectory, SessionStatus, SourceKind, TelemetryRecord,
};
use crate::config::DatabaseConfig;
use crate::error::Result;

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

type SessionRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
);

impl SqliteStore {
    /// Open the database and make sure the tables exist
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = sqlite_file_path(&config.url).and_then(|p| p.parent().map(Path::to_path_buf)) {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(&parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(&config.url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        info!("Session database ready at {}", config.url);
        Ok(store)
    }

    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create the subset of the schema this service depends on
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                profile_id TEXT,
                name TEXT,
                status TEXT DEFAULT 'pending',
                source_type TEXT,
                source_path TEXT,
                video_resolution TEXT,
                video_framerate INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                event_data TEXT,
                processed INTEGER DEFAULT 0,
                received_at TEXT DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert or replace a session row (seeding and tests)
    pub async fn insert_session(&self, descriptor: &SessionDescriptor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO sessions
                (id, profile_id, status, source_type, source_path, video_resolution, video_framerate)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&descriptor.id)
        .bind(&descriptor.owner)
        .bind(descriptor.status.as_str())
        .bind(descriptor.source_kind.as_str())
        .bind(&descriptor.source_locator)
        .bind(&descriptor.resolution)
        .bind(descriptor.framerate.map(i64::from))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of stored events for a session
    pub async fn event_count(&self, session_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events WHERE session_id = ?1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Filesystem path of a `sqlite://` URL, `None` for in-memory databases
fn sqlite_file_path(url: &str) -> Option<&Path> {
    let rest = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next()?;
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(Path::new(path))
}

#[async_trait]
impl SessionDirectory for SqliteStore {
    async fn lookup(&self, session_id: &str, principal: &str) -> Result<Option<SessionDescriptor>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, profile_id, status, source_type, source_path, video_resolution, video_framerate
            FROM sessions WHERE id = ?1 AND profile_id = ?2
            "#,
        )
        .bind(session_id)
        .bind(principal)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(id, owner, status, source_type, source_path, resolution, framerate)| {
                SessionDescriptor {
                    id,
                    owner,
                    source_kind: SourceKind::from_source_type(source_type.as_deref().unwrap_or("")),
                    source_locator: source_path.unwrap_or_default(),
                    resolution,
                    framerate: framerate.and_then(|f| u32::try_from(f).ok()),
                    status: SessionStatus::parse(status.as_deref().unwrap_or("pending")),
                }
            },
        ))
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        debug!(
            "Session {} status -> {} ({} rows)",
            session_id,
            status,
            result.rows_affected()
        );
        Ok(())
    }
}

#[async_trait]
impl EventLog for SqliteStore {
    async fn append(&self, record: TelemetryRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO events (session_id, timestamp_ms, event_type, event_data) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&record.session_id)
        .bind(record.timestamp_ms)
        .bind(&record.event_type)
        .bind(record.event_data.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
