use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::audit::{NewPage, PageConfig, PageUpdate};
use crate::error::ApiError;
use crate::state::SharedState;
use crate::store::Store;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub ok: bool,
    pub message: String,
}

pub async fn create_page(
    State(state): State<SharedState>,
    Json(body): Json<NewPage>,
) -> Result<(StatusCode, Json<PageConfig>), ApiError> {
    let page = body.into_page();
    page.validate()?;
    state.store.insert_page(&page)?;
    info!("Created page {} ({} / {})", page.id, page.url, page.device);
    Ok((StatusCode::CREATED, Json(page)))
}

pub async fn list_pages(State(state): State<SharedState>) -> Result<Json<Vec<PageConfig>>, ApiError> {
    Ok(Json(state.store.list_pages()?))
}

pub async fn get_page(
    State(state): State<SharedState>,
    Path(page_id): Path<String>,
) -> Result<Json<PageConfig>, ApiError> {
    state
        .store
        .find_page_by_id(&page_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("page {} not found", page_id)))
}

pub async fn update_page(
    State(state): State<SharedState>,
    Path(page_id): Path<String>,
    Json(update): Json<PageUpdate>,
) -> Result<Json<PageConfig>, ApiError> {
    if update.is_empty() {
        return Err(ApiError::BadRequest(
            "no fields provided for update".to_string(),
        ));
    }
    let mut page = state
        .store
        .find_page_by_id(&page_id)?
        .ok_or_else(|| ApiError::NotFound(format!("page {} not found", page_id)))?;

    update.apply_to(&mut page);
    page.validate()?;
    if !state.store.update_page(&page)? {
        return Err(ApiError::NotFound(format!("page {} not found", page_id)));
    }
    info!("Updated page {}", page.id);
    Ok(Json(page))
}

pub async fn delete_page(
    State(state): State<SharedState>,
    Path(page_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.store.delete_page(&page_id)? {
        return Err(ApiError::NotFound(format!("page {} not found", page_id)));
    }
    info!("Deleted page {}", page_id);
    Ok(Json(MessageResponse {
        ok: true,
        message: format!("page {} deleted", page_id),
    }))
}
