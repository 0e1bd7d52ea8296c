use serde::Deserialize;
use std::time::Duration;

/// Runtime settings of the API server.
///
/// Every key can be overridden from the environment with the `QUALSTAT_`
/// prefix, e.g. `QUALSTAT_PORT=8080` or `QUALSTAT_EXPORT_SLOTS=4`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub port: u16,
    pub service_database_url: String,
    pub cache_ttl_secs: u64,
    pub cache_sweep_secs: u64,
    pub export_slots: usize,
    pub heavy_export_threshold: usize,
    pub max_export_limit: usize,
    pub default_export_limit: usize,
    pub aggregation_pool_size: usize,
    #[serde(default)]
    pub default_database: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            service_database_url: "sqlite://qualstat.db".to_string(),
            cache_ttl_secs: 300,
            cache_sweep_secs: 60,
            export_slots: 2,
            heavy_export_threshold: 5000,
            max_export_limit: 100_000,
            default_export_limit: 100,
            aggregation_pool_size: 5,
            default_database: None,
        }
    }
}

impl ServiceConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::from_source(config::Environment::with_prefix("QUALSTAT").try_parsing(true))
    }

    fn from_source<S>(source: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let defaults = Self::default();
        config::Config::builder()
            .set_default("port", defaults.port as i64)?
            .set_default("service_database_url", defaults.service_database_url)?
            .set_default("cache_ttl_secs", defaults.cache_ttl_secs as i64)?
            .set_default("cache_sweep_secs", defaults.cache_sweep_secs as i64)?
            .set_default("export_slots", defaults.export_slots as i64)?
            .set_default("heavy_export_threshold", defaults.heavy_export_threshold as i64)?
            .set_default("max_export_limit", defaults.max_export_limit as i64)?
            .set_default("default_export_limit", defaults.default_export_limit as i64)?
            .set_default("aggregation_pool_size", defaults.aggregation_pool_size as i64)?
            .add_source(source)
            .build()?
            .try_deserialize()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_sweep_period(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_secs.max(1))
    }
}
