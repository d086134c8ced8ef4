//! REST client for the hosted document store.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{RemoteDocument, RemoteError, RemoteResult, RemoteStore, RemoteWrite, MAX_BATCH_WRITES};
use crate::config::RemoteConfig;
use crate::models::OwnerId;
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> RemoteResult<Self> {
        Ok(Self {
            base_url: normalize_endpoint(base_url.into())?,
            auth_token: normalize_text_option(auth_token),
            client: reqwest::Client::builder().build()?,
        })
    }

    pub fn from_config(config: &RemoteConfig) -> RemoteResult<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            RemoteError::InvalidConfiguration("remote base URL is not set".to_string())
        })?;
        Self::new(base_url, config.auth_token.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/v1/collections/{}/documents/{}",
            self.base_url,
            urlencoding::encode(collection),
            urlencoding::encode(id)
        )
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/v1/collections/{}/documents",
            self.base_url,
            urlencoding::encode(collection)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self.authorize(request).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Api {
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        })
    }
}

#[derive(Debug, Deserialize)]
struct DocumentListResponse {
    documents: Vec<RemoteDocument>,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    writes: &'a [RemoteWrite],
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get_document(&self, collection: &str, id: &str) -> RemoteResult<Option<Value>> {
        let request = self.client.get(self.document_url(collection, id));
        match self.send(request).await {
            Ok(response) => Ok(Some(response.json::<Value>().await?)),
            Err(RemoteError::Api { status: 404, .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn set_document(&self, collection: &str, id: &str, data: &Value) -> RemoteResult<()> {
        let request = self.client.put(self.document_url(collection, id)).json(data);
        self.send(request).await?;
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> RemoteResult<()> {
        let request = self.client.delete(self.document_url(collection, id));
        match self.send(request).await {
            Ok(_) | Err(RemoteError::Api { status: 404, .. }) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn query_by_owner(
        &self,
        collection: &str,
        owner: &OwnerId,
    ) -> RemoteResult<Vec<RemoteDocument>> {
        let request = self
            .client
            .get(self.collection_url(collection))
            .query(&[("ownerId", owner.as_str())]);
        let payload = self.send(request).await?.json::<DocumentListResponse>().await?;
        Ok(payload.documents)
    }

    async fn commit_batch(&self, writes: &[RemoteWrite]) -> RemoteResult<()> {
        if writes.len() > MAX_BATCH_WRITES {
            return Err(RemoteError::BatchTooLarge {
                size: writes.len(),
                limit: MAX_BATCH_WRITES,
            });
        }
        if writes.is_empty() {
            return Ok(());
        }

        let request = self
            .client
            .post(format!("{}/v1/batch", self.base_url))
            .json(&BatchRequest { writes });
        self.send(request).await?;
        Ok(())
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message);
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed
    }
}

fn normalize_endpoint(raw: String) -> RemoteResult<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}
