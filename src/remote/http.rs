//! HTTP implementation of the remote data client.
//!
//! Talks to the collection REST API served by `gabinete-server`:
//! `GET|POST|PUT|PATCH|DELETE /api/collections/{collection}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{RemoteDataClient, RemoteError};
use crate::auth::API_KEY_HEADER;
use crate::errors::ErrorDetails;
use crate::models::{Collection, MatchKey, RemoteQuery};

const MAX_LOG_BODY_CHARS: usize = 512;

/// Success or error envelope returned by the store.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<ErrorDetails>,
}

#[derive(Debug, Deserialize)]
struct DeleteSummary {
    deleted: usize,
}

/// Remote data client over the store's REST API.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpRemoteClient {
    /// Every request is bounded by `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/api/collections/{}", self.base_url, collection)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else {
            RemoteError::Http(err)
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if status.is_success() {
            debug!("Remote response status: {}", status);
            let envelope: Envelope<T> = serde_json::from_str(&body)?;
            if !envelope.success {
                return Err(error_from_envelope(status, envelope.error, &body));
            }
            return envelope.data.ok_or_else(|| {
                RemoteError::api(status.as_u16(), "EMPTY_RESPONSE", "Response carried no data")
            });
        }

        let details = serde_json::from_str::<Envelope<Value>>(&body)
            .ok()
            .and_then(|e| e.error);
        Err(error_from_envelope(status, details, &body))
    }
}

fn error_from_envelope(status: StatusCode, details: Option<ErrorDetails>, body: &str) -> RemoteError {
    let (code, message) = match details {
        Some(details) => (details.code, details.message),
        None => {
            let preview: String = body.chars().take(MAX_LOG_BODY_CHARS).collect();
            ("HTTP_ERROR".to_string(), preview)
        }
    };
    debug!("Remote error {} {}: {}", status, code, message);

    if status == StatusCode::CONFLICT {
        RemoteError::Conflict(message)
    } else {
        RemoteError::api(status.as_u16(), code, message)
    }
}

#[async_trait]
impl RemoteDataClient for HttpRemoteClient {
    async fn select(
        &self,
        collection: Collection,
        query: &RemoteQuery,
    ) -> Result<Vec<Value>, RemoteError> {
        debug!("select {} {:?}", collection, query);
        let request = self
            .client
            .get(self.collection_url(collection))
            .query(&query.to_params());
        self.execute(request).await
    }

    async fn insert(&self, collection: Collection, row: Value) -> Result<Value, RemoteError> {
        debug!("insert into {}", collection);
        let request = self.client.post(self.collection_url(collection)).json(&row);
        self.execute(request).await
    }

    async fn update(
        &self,
        collection: Collection,
        patch: Value,
        key: &MatchKey,
    ) -> Result<Vec<Value>, RemoteError> {
        debug!("update {} where {}={}", collection, key.field, key.value);
        let request = self
            .client
            .patch(self.collection_url(collection))
            .query(&key.to_params())
            .json(&patch);
        self.execute(request).await
    }

    async fn upsert(&self, collection: Collection, row: Value) -> Result<Value, RemoteError> {
        debug!("upsert into {}", collection);
        let request = self.client.put(self.collection_url(collection)).json(&row);
        self.execute(request).await
    }

    async fn delete(&self, collection: Collection, key: &MatchKey) -> Result<usize, RemoteError> {
        debug!("delete from {} where {}={}", collection, key.field, key.value);
        let request = self
            .client
            .delete(self.collection_url(collection))
            .query(&key.to_params());
        let summary: DeleteSummary = self.execute(request).await?;
        Ok(summary.deleted)
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RemoteError::api(status.as_u16(), "UNHEALTHY", "Health check failed"))
        }
    }
}
