use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct PingResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub store_available: bool,
    pub shutting_down: bool,
    pub audits: AuditSettingsInfo,
    pub version: String,
}

#[derive(Serialize)]
pub struct AuditSettingsInfo {
    pub lighthouse_bin: String,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub schedule_interval_secs: Option<u64>,
}

/// Overall status string from store reachability and shutdown state.
pub fn determine_overall_status(store_available: bool, shutting_down: bool) -> &'static str {
    if shutting_down {
        "stopping"
    } else if store_available {
        "healthy"
    } else {
        "degraded"
    }
}

pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        message: "pong".to_string(),
    })
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let store_available = state.store.ping().is_ok();
    let shutting_down = *state.shutdown_tx.borrow();

    Json(HealthResponse {
        status: determine_overall_status(store_available, shutting_down).to_string(),
        store_available,
        shutting_down,
        audits: AuditSettingsInfo {
            lighthouse_bin: state.config.lighthouse_bin.clone(),
            timeout_secs: state.config.audit_timeout.as_secs(),
            max_concurrent: state.orchestrator.max_concurrent(),
            schedule_interval_secs: state.config.schedule_interval.map(|d| d.as_secs()),
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
