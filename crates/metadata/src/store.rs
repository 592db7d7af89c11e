//! Request cache trait and its SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{CachedRequest, HostRow, RequestDetailRow};
use crate::repos::RequestRepo;
use async_trait::async_trait;
use hitspool_core::{HostPhase, Request, RequestStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Combined request cache trait.
#[async_trait]
pub trait StateStore: RequestRepo + Send + Sync {
    /// Create the tables if they are missing.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-backed request cache.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) the cache at `path`.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // The monitor is the only user. An idle connection is dropped so the
        // file is not held open between bursts of activity.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .idle_timeout(Duration::from_secs(60))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "request cache opened");
        Ok(store)
    }

    /// In-memory cache for tests.
    pub async fn in_memory() -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn detail_exists(&self, id: &str) -> MetadataResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM request_details WHERE id = ?)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RequestRepo for SqliteStore {
    async fn insert_request(
        &self,
        request: &Request,
        phase: RequestStatus,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        if self.detail_exists(&request.id).await? {
            return Err(MetadataError::AlreadyExists(format!(
                "request {} already exists",
                request.id
            )));
        }

        let row = RequestDetailRow::new(request, phase, now);
        sqlx::query(
            r#"
            INSERT INTO request_details (
                id, username, prefix, start_tick, stop_tick, destination,
                hubs, extract, phase, update_time
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.username)
        .bind(&row.prefix)
        .bind(row.start_tick)
        .bind(row.stop_tick)
        .bind(&row.destination)
        .bind(&row.hubs)
        .bind(row.extract)
        .bind(&row.phase)
        .bind(row.update_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_request(&self, id: &str) -> MetadataResult<Option<CachedRequest>> {
        let Some(detail) =
            sqlx::query_as::<_, RequestDetailRow>("SELECT * FROM request_details WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let hosts = sqlx::query_as::<_, HostRow>("SELECT * FROM requests WHERE id = ? ORDER BY host")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok(Some(CachedRequest::from_rows(&detail, &hosts)?))
    }

    async fn list_requests(&self) -> MetadataResult<Vec<CachedRequest>> {
        let details = sqlx::query_as::<_, RequestDetailRow>(
            "SELECT * FROM request_details ORDER BY start_tick, id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hosts: HashMap<String, Vec<HostRow>> = HashMap::new();
        for row in sqlx::query_as::<_, HostRow>("SELECT * FROM requests ORDER BY id, host")
            .fetch_all(&self.pool)
            .await?
        {
            hosts.entry(row.id.clone()).or_default().push(row);
        }

        let mut requests = Vec::with_capacity(details.len());
        for detail in &details {
            let rows = hosts.remove(&detail.id).unwrap_or_default();
            requests.push(CachedRequest::from_rows(detail, &rows)?);
        }

        for (id, rows) in hosts {
            tracing::warn!(
                request_id = %id,
                hosts = rows.len(),
                "host rows without request details, ignoring"
            );
        }
        Ok(requests)
    }

    async fn set_request_phase(
        &self,
        id: &str,
        phase: RequestStatus,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        let result =
            sqlx::query("UPDATE request_details SET phase = ?, update_time = ? WHERE id = ?")
                .bind(phase.as_str())
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("request {id}")));
        }
        Ok(())
    }

    async fn upsert_host(
        &self,
        id: &str,
        host: &str,
        phase: HostPhase,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        if !self.detail_exists(id).await? {
            return Err(MetadataError::NotFound(format!("request {id}")));
        }

        sqlx::query(
            r#"
            INSERT INTO requests (id, host, phase, update_time) VALUES (?, ?, ?, ?)
            ON CONFLICT(id, host) DO UPDATE SET phase = excluded.phase, update_time = excluded.update_time
            "#,
        )
        .bind(id)
        .bind(host)
        .bind(phase.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_request(&self, id: &str) -> MetadataResult<bool> {
        let mut tx = self.pool.begin().await?;
        let hosts = sqlx::query("DELETE FROM requests WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let details = sqlx::query("DELETE FROM request_details WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(hosts.rows_affected() + details.rows_affected() > 0)
    }
}

const SCHEMA_SQL: &str = r#"
-- Per-host progress
CREATE TABLE IF NOT EXISTS requests (
    id TEXT NOT NULL,
    host TEXT NOT NULL,
    phase TEXT NOT NULL,
    update_time TEXT NOT NULL,
    PRIMARY KEY (id, host)
);

-- Request descriptions
CREATE TABLE IF NOT EXISTS request_details (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    prefix TEXT NOT NULL,
    start_tick INTEGER NOT NULL,
    stop_tick INTEGER NOT NULL,
    destination TEXT NOT NULL,
    hubs TEXT NOT NULL DEFAULT '',
    extract INTEGER NOT NULL DEFAULT 0,
    phase TEXT NOT NULL,
    update_time TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_request_details_start ON request_details(start_tick);
"#;
