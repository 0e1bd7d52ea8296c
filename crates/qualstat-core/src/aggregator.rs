use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    AggregateResult, DatabaseBreakdown, DatabaseDescriptor, LevelSummary, Result, StatsPayload,
    StatsProvider, StatsRecord,
};

/// Limits applied to one fan-out over a project's databases.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorSettings {
    /// Maximum number of databases queried at the same time.
    pub pool_size: usize,
    pub base_deadline: Duration,
    /// Extra budget granted per active database.
    pub per_database: Duration,
    pub max_deadline: Duration,
    /// Only this many per-database failures are logged individually.
    pub verbose_error_limit: usize,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            pool_size: 5,
            base_deadline: Duration::from_secs(30),
            per_database: Duration::from_secs(5),
            max_deadline: Duration::from_secs(120),
            verbose_error_limit: 3,
        }
    }
}

impl AggregatorSettings {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    /// Overall deadline for `active` databases: base + per-database budget, capped.
    pub fn deadline_for(&self, active: usize) -> Duration {
        let per_database = self
            .per_database
            .saturating_mul(u32::try_from(active).unwrap_or(u32::MAX));
        self.base_deadline
            .saturating_add(per_database)
            .min(self.max_deadline)
    }
}

struct DatabaseOutcome {
    database: DatabaseDescriptor,
    stats: Result<StatsRecord>,
    last_upload_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct LevelAccumulator {
    count: i64,
    quality_sum: f64,
    quality_weight: i64,
}

/// Running sums for the weighted merge. Every field is an order-independent
/// sum or maximum, so arrival order never changes the result.
#[derive(Default)]
struct Accumulator {
    total_items: i64,
    quality_sum: f64,
    quality_weight: i64,
    benchmark_count: i64,
    levels: BTreeMap<String, LevelAccumulator>,
    databases: Vec<DatabaseBreakdown>,
    last_activity: Option<DateTime<Utc>>,
}

impl Accumulator {
    fn add(
        &mut self,
        database: DatabaseDescriptor,
        stats: StatsRecord,
        last_upload_at: Option<DateTime<Utc>>,
    ) {
        self.total_items += stats.total_items;
        if stats.total_items > 0 {
            self.quality_sum += stats.average_quality * stats.total_items as f64;
            self.quality_weight += stats.total_items;
        }
        self.benchmark_count += stats.benchmark_count;

        for (level, level_stats) in &stats.by_level {
            let acc = self.levels.entry(level.clone()).or_default();
            acc.count += level_stats.count;
            if level_stats.count > 0 {
                acc.quality_sum += level_stats.avg_quality * level_stats.count as f64;
                acc.quality_weight += level_stats.count;
            }
        }

        let last_used_at = database.last_used_at;
        let last_activity = latest(last_upload_at, last_used_at);
        self.last_activity = latest(self.last_activity, last_activity);

        self.databases.push(DatabaseBreakdown {
            database_id: database.id,
            database_name: database.name,
            database_path: database.file_path,
            stats,
            last_used_at,
            last_upload_at,
            last_activity,
        });
    }

    fn finish(mut self) -> AggregateResult {
        let total_items = self.total_items;
        let percentage_of = |count: i64| {
            if total_items > 0 {
                count as f64 / total_items as f64 * 100.0
            } else {
                0.0
            }
        };

        let by_level = self
            .levels
            .into_iter()
            .map(|(level, acc)| {
                let summary = LevelSummary {
                    count: acc.count,
                    avg_quality: weighted_mean(acc.quality_sum, acc.quality_weight),
                    percentage: percentage_of(acc.count),
                };
                (level, summary)
            })
            .collect();

        self.databases.sort_by_key(|db| db.database_id);
        let processed = self.databases.len();

        AggregateResult {
            total_items,
            by_level,
            average_quality: weighted_mean(self.quality_sum, self.quality_weight),
            benchmark_count: self.benchmark_count,
            benchmark_percentage: percentage_of(self.benchmark_count),
            databases: self.databases,
            databases_count: processed,
            databases_processed: processed,
            last_activity: self.last_activity,
        }
    }
}

fn weighted_mean(sum: f64, weight: i64) -> f64 {
    if weight > 0 {
        sum / weight as f64
    } else {
        0.0
    }
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Fans statistics collection out over a project's databases and merges the
/// answers with item-count weighting.
#[derive(Clone)]
pub struct Aggregator {
    provider: Arc<dyn StatsProvider>,
    settings: AggregatorSettings,
}

impl Aggregator {
    pub fn new(provider: Arc<dyn StatsProvider>) -> Self {
        Self::with_settings(provider, AggregatorSettings::default())
    }

    pub fn with_settings(provider: Arc<dyn StatsProvider>, settings: AggregatorSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    pub fn provider(&self) -> &Arc<dyn StatsProvider> {
        &self.provider
    }

    /// Aggregate statistics over the active databases.
    ///
    /// Best effort within the deadline: failing databases are skipped, and on
    /// deadline or cancellation whatever already arrived is merged and returned.
    pub async fn aggregate(
        &self,
        databases: &[DatabaseDescriptor],
        cancel: &CancellationToken,
    ) -> AggregateResult {
        let active: Vec<DatabaseDescriptor> =
            databases.iter().filter(|db| db.is_active).cloned().collect();

        if active.is_empty() {
            return AggregateResult::empty();
        }

        let expected = active.len();
        let deadline = self.settings.deadline_for(expected);
        let scope = cancel.child_token();
        let slots = Arc::new(Semaphore::new(self.settings.pool_size.max(1)));
        let (tx, mut rx) = mpsc::channel::<DatabaseOutcome>(expected);
        let mut workers = JoinSet::new();

        for database in active {
            let provider = self.provider.clone();
            let slots = slots.clone();
            let scope = scope.clone();
            let tx = tx.clone();

            workers.spawn(async move {
                let _slot = tokio::select! {
                    slot = slots.acquire_owned() => match slot {
                        Ok(slot) => slot,
                        Err(_) => return,
                    },
                    _ = scope.cancelled() => return,
                };

                let stats = tokio::select! {
                    res = provider.get_stats(&database, &scope) => {
                        res.and_then(StatsPayload::into_record)
                    }
                    _ = scope.cancelled() => return,
                };

                let last_upload_at = match stats {
                    Ok(_) => provider.last_upload_at(&database).await,
                    Err(_) => None,
                };

                let _ = tx
                    .send(DatabaseOutcome {
                        database,
                        stats,
                        last_upload_at,
                    })
                    .await;
            });
        }
        drop(tx);

        let started = Instant::now();
        let timer = tokio::time::sleep(deadline);
        tokio::pin!(timer);

        let mut collector = Collector::new(self.settings.verbose_error_limit);

        loop {
            tokio::select! {
                outcome = rx.recv() => match outcome {
                    Some(outcome) => collector.absorb(outcome),
                    None => break,
                },
                _ = &mut timer => {
                    tracing::warn!(
                        "Deadline of {:?} exceeded while aggregating stats, {} of {} databases still outstanding",
                        deadline,
                        expected - collector.received,
                        expected
                    );
                    break;
                }
                _ = cancel.cancelled() => {
                    tracing::warn!(
                        "Aggregation cancelled by caller, {} of {} databases still outstanding",
                        expected - collector.received,
                        expected
                    );
                    break;
                }
            }
        }

        scope.cancel();
        // Outcomes already queued before we stopped waiting are kept.
        while let Ok(outcome) = rx.try_recv() {
            collector.absorb(outcome);
        }
        workers.abort_all();

        if collector.failures > collector.verbose_limit {
            tracing::warn!(
                "{} databases failed during aggregation ({} logged individually)",
                collector.failures,
                collector.verbose_limit
            );
        }

        tracing::debug!(
            "Aggregated {} of {} databases in {:?}",
            collector.received - collector.failures,
            expected,
            started.elapsed()
        );

        collector.acc.finish()
    }
}

struct Collector {
    acc: Accumulator,
    received: usize,
    failures: usize,
    verbose_limit: usize,
}

impl Collector {
    fn new(verbose_limit: usize) -> Self {
        Self {
            acc: Accumulator::default(),
            received: 0,
            failures: 0,
            verbose_limit,
        }
    }

    fn absorb(&mut self, outcome: DatabaseOutcome) {
        self.received += 1;
        match outcome.stats {
            Ok(stats) => self
                .acc
                .add(outcome.database, stats, outcome.last_upload_at),
            Err(e) => {
                self.failures += 1;
                if self.failures <= self.verbose_limit {
                    tracing::warn!(
                        "Failed to get stats for database {} (ID: {}): {}",
                        outcome.database.file_path,
                        outcome.database.id,
                        e
                    );
                }
            }
        }
    }
}
