use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{DatabaseDescriptor, Result, StatsPayload};

/// Computes quality statistics for a single database.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    async fn get_stats(
        &self,
        database: &DatabaseDescriptor,
        cancel: &CancellationToken,
    ) -> Result<StatsPayload>;

    /// Completion time of the most recent upload into this database, if known.
    async fn last_upload_at(&self, _database: &DatabaseDescriptor) -> Option<DateTime<Utc>> {
        None
    }
}

/// Lists the per-database stores registered for a project.
#[async_trait]
pub trait DatabaseDirectory: Send + Sync {
    async fn list_databases(
        &self,
        project_id: i64,
        active_only: bool,
    ) -> Result<Vec<DatabaseDescriptor>>;

    async fn set_active(
        &self,
        project_id: i64,
        database_id: i64,
        active: bool,
    ) -> Result<DatabaseDescriptor>;
}

/// Filter and pagination parameters of one export request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportQuery {
    pub project_id: Option<i64>,
    pub offset: usize,
    pub limit: usize,
    pub search: Option<String>,
    pub source: Option<String>,
    pub min_quality: Option<f64>,
    pub max_quality: Option<f64>,
}

pub type ExportRecord = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// The requested number of records has been delivered.
    #[error("export limit reached")]
    LimitReached,

    #[error("{0}")]
    Failed(String),
}

/// A data source read in bounded batches.
#[async_trait]
pub trait PagedSource: Send {
    fn columns(&self) -> Vec<String>;

    /// Returns the next batch; an empty batch means the source is exhausted.
    async fn next_batch(
        &mut self,
        batch_size: usize,
    ) -> std::result::Result<Vec<ExportRecord>, SourceError>;
}

#[async_trait]
pub trait ExportStore: Send + Sync {
    async fn open(&self, query: &ExportQuery) -> Result<Box<dyn PagedSource>>;
}
