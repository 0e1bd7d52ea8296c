mod common;

use common::{database, MemoryDirectory, Reply, ScriptedProvider};
use qualstat_core::{
    project_key, Aggregator, Error, ProjectStatsCache, QualityStatsService, StatsRecord,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn service(
    directory: Arc<MemoryDirectory>,
    provider: Arc<ScriptedProvider>,
) -> QualityStatsService {
    QualityStatsService::new(
        directory,
        Aggregator::new(provider),
        Arc::new(ProjectStatsCache::new(Duration::from_secs(300))),
    )
}

fn provider() -> Arc<ScriptedProvider> {
    Arc::new(
        ScriptedProvider::new()
            .answer(1, Duration::ZERO, Reply::Record(StatsRecord::new(10, 0.5)))
            .answer(2, Duration::ZERO, Reply::Record(StatsRecord::new(30, 0.9))),
    )
}

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let directory = MemoryDirectory::with(vec![database(1), database(2)]);
    let provider = provider();
    let service = service(directory.clone(), provider.clone());
    let cancel = CancellationToken::new();

    let first = service.project_stats(1, &cancel).await.unwrap();
    let second = service.project_stats(1, &cancel).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.result.total_items, 40);
    assert_eq!(directory.lookups.load(Ordering::SeqCst), 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_project_without_databases_is_not_cached() {
    let directory = MemoryDirectory::with(vec![]);
    let service = service(directory.clone(), provider());
    let cancel = CancellationToken::new();

    let stats = service.project_stats(9, &cancel).await.unwrap();
    assert_eq!(stats.result.total_items, 0);
    assert!(service.cache().get(&project_key(9)).await.is_none());

    service.project_stats(9, &cancel).await.unwrap();
    assert_eq!(directory.lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_request_does_not_populate_cache() {
    let directory = MemoryDirectory::with(vec![database(1)]);
    let service = service(directory, provider());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let stats = service.project_stats(1, &cancel).await.unwrap();
    assert!(!stats.cached);
    assert!(service.cache().is_empty().await);
}

#[tokio::test]
async fn test_toggling_a_database_invalidates_project_cache() {
    let directory = MemoryDirectory::with(vec![database(1), database(2)]);
    let service = service(directory, provider());
    let cancel = CancellationToken::new();

    let before = service.project_stats(1, &cancel).await.unwrap();
    assert_eq!(before.result.total_items, 40);

    let updated = service.set_database_active(1, 2, false).await.unwrap();
    assert!(!updated.is_active);

    let after = service.project_stats(1, &cancel).await.unwrap();
    assert!(!after.cached);
    assert_eq!(after.result.total_items, 10);
}

#[tokio::test]
async fn test_toggling_unknown_database_keeps_cache() {
    let directory = MemoryDirectory::with(vec![database(1)]);
    let service = service(directory, provider());
    let cancel = CancellationToken::new();
    service.project_stats(1, &cancel).await.unwrap();

    let err = service.set_database_active(1, 99, false).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(service.cache().len().await, 1);
}
