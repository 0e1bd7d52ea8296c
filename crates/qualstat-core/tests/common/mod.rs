#![allow(dead_code)]

use async_trait::async_trait;
use qualstat_core::{
    DatabaseDescriptor, DatabaseDirectory, Error, ExportRecord, PagedSource, Result,
    SourceError, StatsPayload, StatsProvider, StatsRecord,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub enum Reply {
    Record(StatsRecord),
    Document(serde_json::Value),
    Fail(String),
}

#[derive(Clone)]
pub struct Scripted {
    pub delay: Duration,
    pub reply: Reply,
}

/// Stats provider answering from a script keyed by database id.
#[derive(Default)]
pub struct ScriptedProvider {
    script: HashMap<i64, Scripted>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, id: i64, delay: Duration, reply: Reply) -> Self {
        self.script.insert(id, Scripted { delay, reply });
        self
    }
}

#[async_trait]
impl StatsProvider for ScriptedProvider {
    async fn get_stats(
        &self,
        database: &DatabaseDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<StatsPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let scripted = self.script.get(&database.id).cloned().unwrap_or(Scripted {
            delay: Duration::ZERO,
            reply: Reply::Fail("no script".to_string()),
        });
        tokio::time::sleep(scripted.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match scripted.reply {
            Reply::Record(record) => Ok(StatsPayload::Typed(record)),
            Reply::Document(doc) => Ok(StatsPayload::Document(doc)),
            Reply::Fail(msg) => Err(Error::StoreUnavailable(msg)),
        }
    }
}

pub fn database(id: i64) -> DatabaseDescriptor {
    DatabaseDescriptor::new(id, format!("db{}", id), format!("/data/db{}.db", id)).with_project(1)
}

/// In-memory directory used by service tests.
#[derive(Default)]
pub struct MemoryDirectory {
    pub databases: Mutex<Vec<DatabaseDescriptor>>,
    pub lookups: AtomicUsize,
}

impl MemoryDirectory {
    pub fn with(databases: Vec<DatabaseDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            databases: Mutex::new(databases),
            lookups: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DatabaseDirectory for MemoryDirectory {
    async fn list_databases(
        &self,
        project_id: i64,
        active_only: bool,
    ) -> Result<Vec<DatabaseDescriptor>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let databases = self.databases.lock().unwrap();
        Ok(databases
            .iter()
            .filter(|db| db.project_id == project_id && (!active_only || db.is_active))
            .cloned()
            .collect())
    }

    async fn set_active(
        &self,
        project_id: i64,
        database_id: i64,
        active: bool,
    ) -> Result<DatabaseDescriptor> {
        let mut databases = self.databases.lock().unwrap();
        let db = databases
            .iter_mut()
            .find(|db| db.project_id == project_id && db.id == database_id)
            .ok_or_else(|| Error::NotFound(format!("database {}", database_id)))?;
        db.is_active = active;
        Ok(db.clone())
    }
}

/// Paged source over generated records with optional scripted failure.
pub struct VecSource {
    records: Vec<ExportRecord>,
    position: usize,
    limit: usize,
    fail_after_batches: Option<usize>,
    batches_served: usize,
}

impl VecSource {
    pub fn generated(count: usize) -> Self {
        let records = (0..count)
            .map(|i| {
                json!({"id": i, "name": format!("record {}", i), "quality_score": 0.5})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect();
        Self {
            records,
            position: 0,
            limit: usize::MAX,
            fail_after_batches: None,
            batches_served: 0,
        }
    }

    pub fn limited(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn failing_after(mut self, batches: usize) -> Self {
        self.fail_after_batches = Some(batches);
        self
    }
}

#[async_trait]
impl PagedSource for VecSource {
    fn columns(&self) -> Vec<String> {
        vec!["id".to_string(), "name".to_string(), "quality_score".to_string()]
    }

    async fn next_batch(
        &mut self,
        batch_size: usize,
    ) -> std::result::Result<Vec<ExportRecord>, SourceError> {
        if Some(self.batches_served) == self.fail_after_batches {
            return Err(SourceError::Failed("connection reset".to_string()));
        }
        if self.position >= self.limit {
            return Err(SourceError::LimitReached);
        }
        let end = (self.position + batch_size)
            .min(self.records.len())
            .min(self.limit);
        let batch = self.records[self.position..end].to_vec();
        self.position = end;
        self.batches_served += 1;
        Ok(batch)
    }
}
