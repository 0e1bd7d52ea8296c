use qualstat_core::{AdmissionGate, ExportStore, QualityStatsService};
use std::sync::Arc;

use crate::config::ServiceConfig;

#[derive(Clone)]
pub struct ApiState {
    pub stats: QualityStatsService,
    pub export_store: Arc<dyn ExportStore>,
    pub export_gate: AdmissionGate,
    pub config: Arc<ServiceConfig>,
}
