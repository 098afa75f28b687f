//! HTTP client for the chat endpoints, and the room join flow.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::models::{
    CheckRoomResponse, ErrorBody, Message, Room, RoomCodeRequest, SendMessageRequest,
    SendMessageResponse,
};

/// Errors that can occur while talking to the chat server.
///
/// Each variant carries enough context to diagnose the failure without
/// needing to inspect the originating error directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The server replied with a non-2xx status. `message` is the server's
    /// `{"error": ...}` text when it sent one.
    Http { status: u16, message: String },
    /// Response body could not be parsed as the expected JSON structure.
    Json { url: String, detail: String },
    /// The request never produced a response.
    Connect { url: String, detail: String },
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Http { status, message } => write!(f, "HTTP {status}: {message}"),
            ApiError::Json { url, detail } => write!(f, "unexpected response from {url}: {detail}"),
            ApiError::Connect { url, detail } => write!(f, "connection failed to {url}: {detail}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// The four server operations the client depends on.
pub trait ChatApi: Send + Sync {
    fn fetch_messages(
        &self,
        room_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    fn send_message(
        &self,
        req: &SendMessageRequest,
    ) -> impl Future<Output = Result<SendMessageResponse, ApiError>> + Send;

    fn check_room(&self, code: &str) -> impl Future<Output = Result<CheckRoomResponse, ApiError>> + Send;

    fn create_room(&self, code: &str) -> impl Future<Output = Result<Room, ApiError>> + Send;
}

/// [`ChatApi`] over HTTP with `reqwest`.
pub struct HttpChatApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpChatApi {
    /// Client with a 3 s connect timeout and the given per-request timeout.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        // Builder failure only happens in broken TLS environments; fall back
        // to the default client rather than refusing to start.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(url: String, resp: reqwest::Response) -> Result<T, ApiError> {
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| ApiError::Connect {
            url: url.clone(),
            detail: e.to_string(),
        })?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|b| b.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| ApiError::Json {
            url,
            detail: e.to_string(),
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let url = self.url(path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;
        Self::decode(url, resp).await
    }
}

impl ChatApi for HttpChatApi {
    async fn fetch_messages(&self, room_id: &str) -> Result<Vec<Message>, ApiError> {
        let url = self.url("/api/messages/get");
        let resp = self
            .client
            .get(&url)
            .query(&[("roomId", room_id)])
            .send()
            .await
            .map_err(|e| ApiError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;
        Self::decode(url, resp).await
    }

    async fn send_message(&self, req: &SendMessageRequest) -> Result<SendMessageResponse, ApiError> {
        self.post("/api/messages/send", req).await
    }

    async fn check_room(&self, code: &str) -> Result<CheckRoomResponse, ApiError> {
        self.post("/api/room/check", &RoomCodeRequest { code: code.to_string() })
            .await
    }

    async fn create_room(&self, code: &str) -> Result<Room, ApiError> {
        self.post("/api/room/create", &RoomCodeRequest { code: code.to_string() })
            .await
    }
}

/// Resolve `code` to a room id, creating the room when it does not exist.
///
/// If creation loses a race against another client creating the same code,
/// the room is looked up again and joined.
pub async fn join_room<A: ChatApi>(api: &A, code: &str) -> Result<String, ApiError> {
    let check = api.check_room(code).await?;
    if let (true, Some(id)) = (check.exists, check.room_id) {
        debug!(code = %code, room_id = %id, "joining existing room");
        return Ok(id);
    }

    match api.create_room(code).await {
        Ok(room) => {
            info!(code = %code, room_id = %room.id, "created room");
            Ok(room.id)
        }
        Err(create_err @ ApiError::Http { status: 400, .. }) => {
            let retry = api.check_room(code).await?;
            retry.room_id.filter(|_| retry.exists).ok_or(create_err)
        }
        Err(e) => Err(e),
    }
}
