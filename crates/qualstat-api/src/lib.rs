pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::{ApiError, ErrorResponse};
pub use routes::create_router;
pub use state::ApiState;

use qualstat_core::{
    AdmissionGate, Aggregator, AggregatorSettings, ProjectStatsCache, QualityStatsService,
};
use qualstat_db::{ServiceDatabase, SqliteStatsProvider};
use std::sync::Arc;

/// Wire the SQLite collaborators into the application state.
pub fn build_state(database: ServiceDatabase, config: ServiceConfig) -> ApiState {
    let database = Arc::new(database);
    let cache = Arc::new(ProjectStatsCache::new(config.cache_ttl()));

    let aggregator = Aggregator::with_settings(
        Arc::new(SqliteStatsProvider::new()),
        AggregatorSettings::default().with_pool_size(config.aggregation_pool_size),
    );

    ApiState {
        stats: QualityStatsService::new(database.clone(), aggregator, cache),
        export_store: database,
        export_gate: AdmissionGate::new(config.export_slots),
        config: Arc::new(config),
    }
}

/// Serve the API until the process is stopped.
pub async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    let database = ServiceDatabase::new(&config.service_database_url).await?;
    database.init_schema().await?;

    let port = config.port;
    let sweep_period = config.cache_sweep_period();
    let state = build_state(database, config);
    let _sweeper = state.stats.cache().spawn_sweeper(sweep_period);

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Qualstat API server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
