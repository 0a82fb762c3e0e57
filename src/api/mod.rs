//! HTTP plumbing for the JGPT backend
//!
//! Two chat endpoints share one event protocol: `/chat` runs the simple
//! retrieval pipeline, `/reason/chat` the tool-augmented reasoning loop.
//! The session layer consumes both through [`ChatBackend`], which keeps the
//! controller free of any real network dependency in tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::conversation::{ConversationRecord, ConversationSummary};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session expired: the backend rejected the bearer token")]
    Unauthorized,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response ({status}): {body}")]
    Http { status: StatusCode, body: String },
}

/// Department filter on a chat request: a single department or a set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Department {
    One(String),
    Many(Vec<String>),
}

impl Default for Department {
    fn default() -> Self {
        Department::One("all".into())
    }
}

/// Model generation options forwarded verbatim to the backend.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationOptions {
    // f64 so the wire value is exactly what the host set; serde_json
    // widens f32 and 0.7 would serialize as 0.699999988079071.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

/// Body of a chat POST. The backend creates a new conversation when
/// `conversation_id` is absent and reports the assigned id in the first
/// `metadata` event.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub persona: String,
    pub model: String,
    pub options: GenerationOptions,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
    pub grade: bool,
    pub project_context: String,
    pub department: Department,
}

/// Raw bytes of the chat response body, delivered chunk by chunk.
pub type EventByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

/// Transport seam between the session controller and the backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open a streaming chat turn. `reasoning` selects `/reason/chat`
    /// over `/chat`; the event protocol is identical either way.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        reasoning: bool,
    ) -> Result<EventByteStream, ApiError>;

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError>;

    async fn get_conversation(&self, id: i64) -> Result<ConversationRecord, ApiError>;

    async fn delete_conversation(&self, id: i64) -> Result<(), ApiError>;
}

/// Bearer-authenticated reqwest implementation of [`ChatBackend`].
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// The client carries a connect timeout only. Streaming turns have no
    /// overall deadline; idle detection is the backend's concern.
    pub fn new(config: &Config, token: impl Into<String>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn chat_stream(
        &self,
        request: &ChatRequest,
        reasoning: bool,
    ) -> Result<EventByteStream, ApiError> {
        let path = if reasoning { "/reason/chat" } else { "/chat" };

        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        let response = Self::check(response).await?;

        Ok(Box::pin(response.bytes_stream().map_err(ApiError::from)))
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        let response = self
            .http
            .get(self.url("/conversations"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = Self::check(response).await?;

        Ok(response.json().await?)
    }

    async fn get_conversation(&self, id: i64) -> Result<ConversationRecord, ApiError> {
        let response = self
            .http
            .get(self.url(&format!("/conversations/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = Self::check(response).await?;

        Ok(response.json().await?)
    }

    async fn delete_conversation(&self, id: i64) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.url(&format!("/conversations/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(response).await?;

        Ok(())
    }
}
