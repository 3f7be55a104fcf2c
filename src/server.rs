//! Reference data store: router and shared state.

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::auth;
use crate::config::Config;
use crate::db::Repository;
use crate::search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub config: Arc<Config>,
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        .route(
            "/collections/{collection}",
            get(api::select_rows)
                .post(api::insert_row)
                .put(api::upsert_row)
                .patch(api::update_rows)
                .delete(api::delete_rows),
        )
        .route("/datastore/revision", get(api::get_revision))
        .route("/search", get(api::search_demands))
        .layer(middleware::from_fn(move |req, next| {
            auth::require_api_key(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
