//! Read-only access to a hub's hitspool catalogue.
//!
//! The acquisition process owns `hitspool.db` and rewrites it as the ring
//! turns over. Every query opens its own read-only connection and closes it
//! afterwards so no connection outlives a writer's transaction.

use crate::error::{MetadataError, MetadataResult};
use crate::models::HitspoolFileRow;
use crate::repos::CatalogueRepo;
use async_trait::async_trait;
use hitspool_core::Tick;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// The `hitspool` table as the acquisition process creates it.
pub const CATALOGUE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS hitspool (
    filename TEXT NOT NULL,
    start_tick INTEGER NOT NULL,
    stop_tick INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_hitspool_start ON hitspool(start_tick);
"#;

/// One hub's catalogue, addressed by path.
#[derive(Debug, Clone)]
pub struct HitspoolCatalogue {
    path: PathBuf,
}

impl HitspoolCatalogue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> MetadataResult<SqliteConnection> {
        if !self.path.exists() {
            return Err(MetadataError::NotFound(format!(
                "hitspool catalogue {}",
                self.path.display()
            )));
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=ro", self.path.display()))?
            .read_only(true)
            .busy_timeout(Duration::from_secs(5));
        Ok(opts.connect().await?)
    }

    /// Write a catalogue describing `files`, replacing any previous rows.
    ///
    /// Used by replay tooling and tests; live hubs get theirs from the
    /// acquisition process.
    pub async fn create(path: impl AsRef<Path>, files: &[HitspoolFileRow]) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true);
        let mut conn = opts.connect().await?;

        sqlx::raw_sql(CATALOGUE_SCHEMA_SQL).execute(&mut conn).await?;
        let mut tx = conn.begin().await?;
        sqlx::query("DELETE FROM hitspool").execute(&mut *tx).await?;
        for file in files {
            sqlx::query("INSERT INTO hitspool (filename, start_tick, stop_tick) VALUES (?, ?, ?)")
                .bind(&file.filename)
                .bind(file.start_tick)
                .bind(file.stop_tick)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        conn.close().await?;

        Ok(Self::new(path))
    }
}

#[async_trait]
impl CatalogueRepo for HitspoolCatalogue {
    async fn files_in_range(&self, start: Tick, stop: Tick) -> MetadataResult<Vec<HitspoolFileRow>> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query_as::<_, HitspoolFileRow>(
            "SELECT filename, start_tick, stop_tick FROM hitspool \
             WHERE stop_tick >= ? AND start_tick <= ? ORDER BY start_tick",
        )
        .bind(start)
        .bind(stop)
        .fetch_all(&mut conn)
        .await?;
        conn.close().await?;
        Ok(rows)
    }

    async fn span(&self) -> MetadataResult<Option<(Tick, Tick)>> {
        let mut conn = self.connect().await?;
        let (min, max): (Option<Tick>, Option<Tick>) =
            sqlx::query_as("SELECT MIN(start_tick), MAX(stop_tick) FROM hitspool")
                .fetch_one(&mut conn)
                .await?;
        conn.close().await?;
        Ok(min.zip(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Tick = 157890067960246236;
    const IVAL: Tick = 150_000_000_000;

    fn ring(count: i64) -> Vec<HitspoolFileRow> {
        (0..count)
            .map(|i| HitspoolFileRow {
                filename: format!("HitSpool-{}.dat", i + 1),
                start_tick: T0 + i * IVAL,
                stop_tick: T0 + (i + 1) * IVAL - 1,
            })
            .collect()
    }

    #[tokio::test]
    async fn range_query_uses_overlap_and_orders_by_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = ring(5);
        files.reverse();
        let catalogue = HitspoolCatalogue::create(dir.path().join("hitspool.db"), &files)
            .await
            .unwrap();

        let hits = catalogue
            .files_in_range(T0 + IVAL, T0 + 2 * IVAL + 10)
            .await
            .unwrap();
        let names: Vec<&str> = hits.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, ["HitSpool-2.dat", "HitSpool-3.dat"]);

        let all = catalogue.files_in_range(T0 - 1, T0 + 100 * IVAL).await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].start_tick <= w[1].start_tick));
    }

    #[tokio::test]
    async fn window_before_the_ring_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalogue = HitspoolCatalogue::create(dir.path().join("hitspool.db"), &ring(5))
            .await
            .unwrap();

        let hits = catalogue
            .files_in_range(T0 - 60_000_000_000, T0 - 100_000_000)
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(catalogue.span().await.unwrap(), Some((T0, T0 + 5 * IVAL - 1)));
    }

    #[tokio::test]
    async fn empty_catalogue_has_no_span() {
        let dir = tempfile::tempdir().unwrap();
        let catalogue = HitspoolCatalogue::create(dir.path().join("hitspool.db"), &[])
            .await
            .unwrap();
        assert_eq!(catalogue.span().await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_catalogue_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let catalogue = HitspoolCatalogue::new(dir.path().join("absent.db"));
        assert!(matches!(
            catalogue.files_in_range(0, 1).await,
            Err(MetadataError::NotFound(_))
        ));
    }
}
