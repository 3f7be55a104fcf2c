//! Collection API endpoints.
//!
//! `GET` selects with `select`, `order`, `limit` and equality filters from the
//! query string. `PATCH` and `DELETE` take exactly one `field=value` match.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{Collection, Demand, MatchKey, RemoteQuery};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DeleteSummary {
    pub deleted: usize,
}

fn parse_collection(name: &str) -> Result<Collection, AppError> {
    Collection::parse(name).ok_or_else(|| AppError::NotFound(format!("Unknown collection {}", name)))
}

/// Keep the search index in step with demand writes.
async fn reindex(state: &AppState, collection: Collection, documents: &[Value]) {
    if collection != Collection::Demands {
        return;
    }
    for document in documents {
        match serde_json::from_value::<Demand>(document.clone()) {
            Ok(demand) => {
                if let Err(e) = state.search.index_demand(&demand).await {
                    tracing::warn!("Failed to index demand {}: {}", demand.id, e);
                }
            }
            Err(e) => tracing::warn!("Stored demand is not indexable: {}", e),
        }
    }
}

/// GET /api/collections/{collection}
pub async fn select_rows(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Vec<Value>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let collection = match parse_collection(&name) {
        Ok(collection) => collection,
        Err(e) => return error(e, revision_id),
    };
    let query = match RemoteQuery::from_params(&params) {
        Ok(query) => query,
        Err(message) => return error(AppError::BadRequest(message), revision_id),
    };

    match state.repo.select(collection, &query).await {
        Ok(rows) => success(rows, revision_id),
        Err(e) => error(e, revision_id),
    }
}

/// POST /api/collections/{collection} - Insert one document; duplicate ids are a 409.
pub async fn insert_row(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(document): Json<Value>,
) -> ApiResult<Value> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let collection = match parse_collection(&name) {
        Ok(collection) => collection,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.insert(collection, document).await {
        Ok(stored) => {
            reindex(&state, collection, std::slice::from_ref(&stored)).await;
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(stored, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/collections/{collection} - Insert or replace by id.
pub async fn upsert_row(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(document): Json<Value>,
) -> ApiResult<Value> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let collection = match parse_collection(&name) {
        Ok(collection) => collection,
        Err(e) => return error(e, revision_id),
    };

    match state.repo.upsert(collection, document).await {
        Ok(stored) => {
            reindex(&state, collection, std::slice::from_ref(&stored)).await;
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(stored, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// PATCH /api/collections/{collection}?field=value - Merge a patch into matches.
pub async fn update_rows(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(patch): Json<Value>,
) -> ApiResult<Vec<Value>> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let collection = match parse_collection(&name) {
        Ok(collection) => collection,
        Err(e) => return error(e, revision_id),
    };
    let key = match MatchKey::from_params(&params) {
        Ok(key) => key,
        Err(message) => return error(AppError::BadRequest(message), revision_id),
    };

    match state.repo.update(collection, patch, &key).await {
        Ok(updated) => {
            reindex(&state, collection, &updated).await;
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(updated, new_revision)
        }
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/collections/{collection}?field=value
pub async fn delete_rows(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<DeleteSummary> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);

    let collection = match parse_collection(&name) {
        Ok(collection) => collection,
        Err(e) => return error(e, revision_id),
    };
    let key = match MatchKey::from_params(&params) {
        Ok(key) => key,
        Err(message) => return error(AppError::BadRequest(message), revision_id),
    };

    match state.repo.delete(collection, &key).await {
        Ok(removed) => {
            if collection == Collection::Demands {
                for id in &removed {
                    if let Err(e) = state.search.remove_demand(id).await {
                        tracing::warn!("Failed to remove demand {} from index: {}", id, e);
                    }
                }
            }
            let new_revision = state.repo.get_revision_id().await.unwrap_or(revision_id);
            success(
                DeleteSummary {
                    deleted: removed.len(),
                },
                new_revision,
            )
        }
        Err(e) => error(e, revision_id),
    }
}
