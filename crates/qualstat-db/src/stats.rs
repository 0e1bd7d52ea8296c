use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use qualstat_core::{DatabaseDescriptor, StatsPayload, StatsProvider};
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Computes quality statistics straight from a per-database SQLite file.
///
/// Each call opens the file read-only through a single-connection pool that
/// is closed again before returning, so no file handle outlives the call.
#[derive(Debug, Clone)]
pub struct SqliteStatsProvider {
    acquire_timeout: Duration,
}

impl Default for SqliteStatsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteStatsProvider {
    pub fn new() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    async fn open(&self, file_path: &str) -> Result<Pool<Sqlite>> {
        let options = SqliteConnectOptions::new()
            .filename(file_path)
            .read_only(true);

        SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| Error::Connection(format!("{}: {}", file_path, e)))
    }

    /// Totals and the per-level breakdown of `normalized_items`, as a JSON
    /// document with float-typed numbers.
    pub async fn read_document(&self, file_path: &str) -> Result<Value> {
        let pool = self.open(file_path).await?;
        let document = Self::query_document(&pool).await;
        pool.close().await;
        document
    }

    async fn query_document(pool: &Pool<Sqlite>) -> Result<Value> {
        let totals = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_items,
                COALESCE(AVG(quality_score), 0.0) AS average_quality,
                COALESCE(SUM(CASE WHEN is_benchmark THEN 1 ELSE 0 END), 0) AS benchmark_count
            FROM normalized_items
            "#,
        )
        .fetch_one(pool)
        .await?;

        let levels = sqlx::query(
            r#"
            SELECT
                COALESCE(quality_level, 'unknown') AS level,
                COUNT(*) AS count,
                COALESCE(AVG(quality_score), 0.0) AS avg_quality
            FROM normalized_items
            GROUP BY COALESCE(quality_level, 'unknown')
            "#,
        )
        .fetch_all(pool)
        .await?;

        let mut by_level = Map::new();
        for row in levels {
            let level: String = row.try_get("level")?;
            let count: i64 = row.try_get("count")?;
            let avg_quality: f64 = row.try_get("avg_quality")?;
            by_level.insert(
                level,
                json!({"count": count as f64, "avg_quality": avg_quality}),
            );
        }

        let total_items: i64 = totals.try_get("total_items")?;
        let average_quality: f64 = totals.try_get("average_quality")?;
        let benchmark_count: i64 = totals.try_get("benchmark_count")?;

        Ok(json!({
            "total_items": total_items as f64,
            "average_quality": average_quality,
            "benchmark_count": benchmark_count as f64,
            "by_level": by_level,
        }))
    }

    async fn query_last_upload(pool: &Pool<Sqlite>) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<String> =
            sqlx::query_scalar("SELECT MAX(COALESCE(completed_at, started_at)) FROM uploads")
                .fetch_one(pool)
                .await?;

        Ok(latest.as_deref().and_then(parse_timestamp))
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[async_trait]
impl StatsProvider for SqliteStatsProvider {
    async fn get_stats(
        &self,
        database: &DatabaseDescriptor,
        cancel: &CancellationToken,
    ) -> qualstat_core::Result<StatsPayload> {
        tokio::select! {
            _ = cancel.cancelled() => Err(qualstat_core::Error::Cancelled),
            document = self.read_document(&database.file_path) => {
                Ok(StatsPayload::Document(document?))
            }
        }
    }

    async fn last_upload_at(&self, database: &DatabaseDescriptor) -> Option<DateTime<Utc>> {
        let pool = match self.open(&database.file_path).await {
            Ok(pool) => pool,
            Err(e) => {
                tracing::debug!("Cannot read uploads of {}: {}", database.file_path, e);
                return None;
            }
        };
        let latest = Self::query_last_upload(&pool).await;
        pool.close().await;

        match latest {
            Ok(latest) => latest,
            Err(e) => {
                // Older files have no uploads table.
                tracing::debug!("No upload history in {}: {}", database.file_path, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let rfc = parse_timestamp("2024-03-01T10:00:00Z").unwrap();
        let sqlite = parse_timestamp("2024-03-01 10:00:00").unwrap();
        let fractional = parse_timestamp("2024-03-01 10:00:00.250").unwrap();

        assert_eq!(rfc, sqlite);
        assert_eq!(fractional.timestamp_millis() - rfc.timestamp_millis(), 250);
        assert!(parse_timestamp("yesterday").is_none());
    }
}
