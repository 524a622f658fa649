use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_traits::{MessageRole, StoredMessage, UserType};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::BackendError;

/// Raw backend body, already in the client wire format.
pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const FALLBACK_TITLE: &str = "New conversation";

// Keep error bodies short in logs.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_secret: String,
    /// Bound on connect + response headers. The body is not bounded.
    pub timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_secret: api_secret.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Message as the backend expects it: role plus flattened text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendMessage {
    pub role: MessageRole,
    pub content: String,
}

impl From<&StoredMessage> for BackendMessage {
    fn from(message: &StoredMessage) -> Self {
        Self {
            role: message.role,
            content: message.text(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub chat_id: Uuid,
    pub messages: Vec<BackendMessage>,
    pub user_id: String,
    pub user_type: UserType,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationBody<'a> {
    messages: &'a [BackendMessage],
    user_id: &'a str,
    user_type: UserType,
}

#[derive(Serialize)]
struct TitleBody<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct TitleResponse {
    text: String,
}

/// The inference side of the gateway.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Start a generation. Resolves once response headers arrive.
    async fn invoke(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, BackendError>;

    /// Short title for a new chat. Never fails.
    async fn generate_title(&self, text: &str) -> String;
}

#[derive(Clone)]
pub struct BackendClient {
    http_client: reqwest::Client,
    base_url: String,
    api_secret: String,
    timeout: Duration,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_secret: config.api_secret,
            timeout: config.timeout,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.http_client
            .request(method, url)
            .bearer_auth(&self.api_secret)
    }

    /// Send with the header timeout applied, mapping non-2xx to an error.
    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Err(_) => return Err(BackendError::Timeout),
            Ok(Err(err)) if err.is_timeout() => return Err(BackendError::Timeout),
            Ok(result) => result?,
        };

        if !response.status().is_success() {
            return Err(response_to_error(response).await);
        }
        Ok(response)
    }

    /// GET a JSON document; `Ok(None)` on 404.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, BackendError> {
        self.fetch_optional(self.request(Method::GET, path)).await
    }

    /// GET a path built from `segments`, each percent-encoded; 404 is `None`.
    pub async fn get_json_at<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Option<T>, BackendError> {
        let url = self.segment_url(segments)?;
        let request = self
            .http_client
            .get(url)
            .query(query)
            .bearer_auth(&self.api_secret);
        self.fetch_optional(request).await
    }

    fn segment_url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let invalid = || BackendError::InvalidUrl(self.base_url.clone());
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, BackendError> {
        match self.send(request).await {
            Ok(response) => Ok(Some(decode_json(response).await?)),
            Err(BackendError::Status { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// POST a JSON body and ignore the response content.
    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), BackendError> {
        self.send(self.request(Method::POST, path).json(body)).await?;
        Ok(())
    }

    /// POST a JSON body and decode the JSON reply.
    pub async fn post_for_json<B, T>(&self, path: &str, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(self.request(Method::POST, path).json(body)).await?;
        decode_json(response).await
    }
}

#[async_trait]
impl GenerationBackend for BackendClient {
    async fn invoke(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, BackendError> {
        let path = format!("/api/chats/{}/responses", request.chat_id);
        let body = GenerationBody {
            messages: &request.messages,
            user_id: &request.user_id,
            user_type: request.user_type,
        };
        debug!(chat_id = %request.chat_id, messages = request.messages.len(), "Invoking backend");

        let builder = self.request(Method::POST, &path).json(&body);
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            result = self.send(builder) => result?,
        };

        Ok(response.bytes_stream().map_err(BackendError::from).boxed())
    }

    async fn generate_title(&self, text: &str) -> String {
        let result: Result<TitleResponse, _> = self
            .post_for_json("/api/titles/generate", &TitleBody { text })
            .await;
        match result {
            Ok(title) if !title.text.trim().is_empty() => title.text,
            Ok(_) => FALLBACK_TITLE.to_string(),
            Err(err) => {
                warn!(error = %err, "Title generation failed, using fallback");
                FALLBACK_TITLE.to_string()
            }
        }
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| BackendError::Decode(err.to_string()))
}

async fn response_to_error(response: Response) -> BackendError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body = truncate_body(body);

    if status == StatusCode::NOT_FOUND {
        debug!(status = status.as_u16(), "Backend resource not found");
    } else {
        warn!(status = status.as_u16(), body = %body, "Backend request failed");
    }

    BackendError::Status {
        status: status.as_u16(),
        body,
    }
}

fn truncate_body(body: String) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut cut = MAX_ERROR_BODY;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... [truncated]", &body[..cut])
}
