pub mod types;
pub mod provider;
pub mod aggregator;
pub mod cache;
pub mod gate;
pub mod export;
pub mod service;
pub mod error;

// Re-exports
pub use types::{
    AggregateResult, DatabaseBreakdown, DatabaseDescriptor, LevelStats, LevelSummary,
    StatsPayload, StatsRecord,
};
pub use provider::{
    DatabaseDirectory, ExportQuery, ExportRecord, ExportStore, PagedSource, SourceError,
    StatsProvider,
};
pub use aggregator::{Aggregator, AggregatorSettings};
pub use cache::{project_key, CacheStats, ProjectStatsCache, TtlCache};
pub use gate::{AdmissionGate, ExportPermit};
pub use export::{
    ChannelSink, ExportEnvelope, ExportFormat, ExportOutcome, ExportSink, ExportSummary,
    StreamingExporter, EXPORT_BATCH_SIZE,
};
pub use service::{ProjectStats, QualityStatsService};
pub use error::{Error, Result};

pub use tokio_util::sync::CancellationToken;
