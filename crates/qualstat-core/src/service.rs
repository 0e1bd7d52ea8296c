use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::{project_key, ProjectStatsCache};
use crate::{AggregateResult, Aggregator, DatabaseDirectory, Result};

#[derive(Debug, Clone)]
pub struct ProjectStats {
    pub result: AggregateResult,
    pub cached: bool,
}

/// Read-through access to project-wide quality statistics.
#[derive(Clone)]
pub struct QualityStatsService {
    directory: Arc<dyn DatabaseDirectory>,
    aggregator: Aggregator,
    cache: Arc<ProjectStatsCache>,
}

impl QualityStatsService {
    pub fn new(
        directory: Arc<dyn DatabaseDirectory>,
        aggregator: Aggregator,
        cache: Arc<ProjectStatsCache>,
    ) -> Self {
        Self {
            directory,
            aggregator,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<ProjectStatsCache> {
        &self.cache
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn directory(&self) -> &Arc<dyn DatabaseDirectory> {
        &self.directory
    }

    /// Serve from cache when fresh, otherwise aggregate over the project's
    /// active databases and cache the result.
    ///
    /// A project without active databases yields a zero result that is not
    /// cached, so a database registered later shows up immediately.
    pub async fn project_stats(
        &self,
        project_id: i64,
        cancel: &CancellationToken,
    ) -> Result<ProjectStats> {
        let key = project_key(project_id);
        if let Some(result) = self.cache.get(&key).await {
            tracing::info!("Returning cached stats for project {}", project_id);
            return Ok(ProjectStats {
                result,
                cached: true,
            });
        }

        let databases = self.directory.list_databases(project_id, true).await?;
        if databases.is_empty() {
            tracing::info!("No active databases found for project {}", project_id);
            return Ok(ProjectStats {
                result: AggregateResult::empty(),
                cached: false,
            });
        }

        let started = Instant::now();
        let result = self.aggregator.aggregate(&databases, cancel).await;

        if cancel.is_cancelled() {
            // Partial results of an abandoned request must not poison the cache.
            return Ok(ProjectStats {
                result,
                cached: false,
            });
        }

        self.cache.set(key, result.clone()).await;
        tracing::info!(
            "Aggregated stats for project {} ({} databases) in {:?}",
            project_id,
            databases.len(),
            started.elapsed()
        );

        Ok(ProjectStats {
            result,
            cached: false,
        })
    }

    /// Flip a database's active flag and drop the project's cached aggregate.
    pub async fn set_database_active(
        &self,
        project_id: i64,
        database_id: i64,
        active: bool,
    ) -> Result<crate::DatabaseDescriptor> {
        let descriptor = self
            .directory
            .set_active(project_id, database_id, active)
            .await?;
        self.cache.invalidate_project(project_id).await;
        tracing::info!(
            "Database {} of project {} set active={}, cache invalidated",
            database_id,
            project_id,
            active
        );
        Ok(descriptor)
    }
}
