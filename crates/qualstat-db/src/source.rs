use async_trait::async_trait;
use qualstat_core::{ExportQuery, ExportRecord, PagedSource, SourceError};
use sqlx::{Pool, QueryBuilder, Sqlite};

use crate::models::RecordRow;

/// Reads the `records` table page by page for an export.
///
/// Pages are fetched with LIMIT/OFFSET relative to the query's own offset,
/// and the source stops with [`SourceError::LimitReached`] once `limit` rows
/// have been handed out.
pub struct RecordSource {
    pool: Pool<Sqlite>,
    query: ExportQuery,
    fetched: usize,
}

impl RecordSource {
    pub fn new(pool: Pool<Sqlite>, query: ExportQuery) -> Self {
        Self {
            pool,
            query,
            fetched: 0,
        }
    }

    fn build(&self, take: usize) -> QueryBuilder<'static, Sqlite> {
        let mut builder = QueryBuilder::new(
            "SELECT id, project_id, name, code, source, quality_score, quality_level, is_benchmark \
             FROM records WHERE 1 = 1",
        );

        if let Some(project_id) = self.query.project_id {
            builder.push(" AND project_id = ").push_bind(project_id);
        }
        if let Some(search) = self.query.search.as_deref().filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search);
            builder
                .push(" AND (name LIKE ")
                .push_bind(pattern.clone())
                .push(" OR code LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(source) = self.query.source.as_deref().filter(|s| !s.is_empty()) {
            builder.push(" AND source = ").push_bind(source.to_string());
        }
        if let Some(min) = self.query.min_quality {
            builder.push(" AND quality_score >= ").push_bind(min);
        }
        if let Some(max) = self.query.max_quality {
            builder.push(" AND quality_score <= ").push_bind(max);
        }

        builder
            .push(" ORDER BY id LIMIT ")
            .push_bind(take as i64)
            .push(" OFFSET ")
            .push_bind((self.query.offset + self.fetched) as i64);
        builder
    }
}

#[async_trait]
impl PagedSource for RecordSource {
    fn columns(&self) -> Vec<String> {
        RecordRow::COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    async fn next_batch(&mut self, batch_size: usize) -> Result<Vec<ExportRecord>, SourceError> {
        if self.fetched >= self.query.limit {
            return Err(SourceError::LimitReached);
        }
        let take = batch_size.min(self.query.limit - self.fetched);

        let rows = self
            .build(take)
            .build_query_as::<RecordRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SourceError::Failed(e.to_string()))?;

        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::to_value(&row) {
                Ok(serde_json::Value::Object(map)) => batch.push(map),
                Ok(_) => return Err(SourceError::Failed("record is not an object".to_string())),
                Err(e) => return Err(SourceError::Failed(e.to_string())),
            }
        }

        self.fetched += batch.len();
        tracing::trace!("Export source fetched {} rows ({} total)", batch.len(), self.fetched);
        Ok(batch)
    }
}
