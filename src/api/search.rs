//! Search API endpoints.

use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::{error, success, ApiResult};
use crate::models::{Collection, Demand};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    /// Maximum number of results (default: 20).
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub demand: Demand,
    pub score: f32,
}

const MAX_SEARCH_LIMIT: usize = 100;

/// GET /api/search?q= - Full-text search over demands.
pub async fn search_demands(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<SearchResponse> {
    let revision_id = state.repo.get_revision_id().await.unwrap_or(0);
    let limit = params.limit.min(MAX_SEARCH_LIMIT);

    let hits = match state.search.search(&params.q, limit, params.offset) {
        Ok(hits) => hits,
        Err(e) => return error(e, revision_id),
    };

    // Hits whose document was deleted or no longer decodes are dropped.
    let mut results = Vec::new();
    for hit in hits {
        if let Ok(Some(document)) = state
            .repo
            .get_document(Collection::Demands, &hit.demand_id)
            .await
        {
            if let Ok(demand) = serde_json::from_value(document) {
                results.push(SearchResultItem {
                    demand,
                    score: hit.score,
                });
            }
        }
    }

    let total = results.len();
    success(
        SearchResponse {
            results,
            total,
            limit,
            offset: params.offset,
        },
        revision_id,
    )
}
