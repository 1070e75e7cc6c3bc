use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::DASHBOARD_ORIGINS;
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let origins: Vec<HeaderValue> = DASHBOARD_ORIGINS
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/", get(crate::routes::health::ping))
        .route("/health", get(crate::routes::health::health))
        // Audits
        .route("/run", post(crate::routes::audits::run_batch))
        .route("/run/{id}", post(crate::routes::audits::run_one))
        .route("/audits/{page_id}", get(crate::routes::audits::page_history))
        // Page management
        // Dashboard clients call the collection with a trailing slash.
        .route(
            "/pages",
            get(crate::routes::pages::list_pages).post(crate::routes::pages::create_page),
        )
        .route(
            "/pages/",
            get(crate::routes::pages::list_pages).post(crate::routes::pages::create_page),
        )
        .route(
            "/pages/{page_id}",
            get(crate::routes::pages::get_page)
                .put(crate::routes::pages::update_page)
                .delete(crate::routes::pages::delete_page),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
