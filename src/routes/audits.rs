use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::audit::{AuditScore, DeviceType, PageFilter, RunResult};
use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct RunQuery {
    pub url: Option<String>,
    pub device: Option<DeviceType>,
    pub env: Option<String>,
}

impl From<RunQuery> for PageFilter {
    fn from(query: RunQuery) -> Self {
        PageFilter {
            enabled_only: true,
            url: query.url.filter(|u| !u.is_empty()),
            device: query.device,
            env: query.env.filter(|e| !e.is_empty()),
        }
    }
}

/// Audit every enabled page matching the query. Stops early on shutdown.
pub async fn run_batch(
    State(state): State<SharedState>,
    Query(query): Query<RunQuery>,
) -> Result<Json<RunResult>, ApiError> {
    if let Some(device) = query.device.as_ref().filter(|d| !d.is_supported()) {
        return Err(ApiError::BadRequest(format!(
            "unsupported device '{}', expected 'mobile' or 'desktop'",
            device
        )));
    }
    let filter = PageFilter::from(query);
    info!("Batch audit requested: {:?}", filter);
    let result = state
        .orchestrator
        .run_batch_until(filter, state.shutdown_rx())
        .await?;
    Ok(Json(result))
}

/// Audit one page. Cancelled when shutdown starts.
pub async fn run_one(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<AuditScore>, ApiError> {
    let score = state
        .orchestrator
        .run_one_until(&id, state.shutdown_rx())
        .await?;
    Ok(Json(score))
}

pub async fn page_history(
    State(state): State<SharedState>,
    Path(page_id): Path<String>,
) -> Result<Json<Vec<AuditScore>>, ApiError> {
    let scores = state.orchestrator.history(&page_id)?;
    if scores.is_empty() {
        return Err(ApiError::NotFound(format!("no audits for page {}", page_id)));
    }
    Ok(Json(scores))
}
