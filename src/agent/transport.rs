use crate::handlers::board_save::CONNECTION_ID_HEADER;
use crate::models::{BoardResponse, ConflictResponse, SaveElementsRequest, SaveElementsResponse};
use async_trait::async_trait;
use reqwest::StatusCode;
use uuid::Uuid;

#[derive(Debug)]
pub enum TransportError {
    /// The board is gone; stop writing and prompt a reload.
    NotFound,
    /// Retryable: the request never took effect on the server.
    Transient(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NotFound => write!(f, "Board not found"),
            TransportError::Transient(e) => write!(f, "Transient transport failure: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

/// Server answer to a version-gated write.
#[derive(Debug)]
pub enum ApplyResult {
    Accepted(SaveElementsResponse),
    Conflict(ConflictResponse),
}

/// The sync agent's view of the server. Narrow so tests can drive the agent
/// against an in-process engine instead of a live HTTP server.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn try_apply(
        &self,
        board_id: Uuid,
        request: &SaveElementsRequest,
        connection_id: Option<Uuid>,
    ) -> Result<ApplyResult, TransportError>;

    async fn fetch_latest(&self, board_id: Uuid) -> Result<BoardResponse, TransportError>;
}

/// HTTP implementation over the server's REST surface.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn board_url(&self, board_id: Uuid) -> String {
        format!("{}/api/v1/boards/{}", self.base_url, board_id)
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn try_apply(
        &self,
        board_id: Uuid,
        request: &SaveElementsRequest,
        connection_id: Option<Uuid>,
    ) -> Result<ApplyResult, TransportError> {
        let mut builder = self
            .client
            .put(format!("{}/elements", self.board_url(board_id)))
            .json(request);
        builder = self.with_auth(builder);
        if let Some(connection_id) = connection_id {
            builder = builder.header(CONNECTION_ID_HEADER, connection_id.to_string());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body: SaveElementsResponse = response
                    .json()
                    .await
                    .map_err(|e| TransportError::Transient(e.to_string()))?;
                Ok(ApplyResult::Accepted(body))
            }
            StatusCode::CONFLICT => {
                let body: ConflictResponse = response
                    .json()
                    .await
                    .map_err(|e| TransportError::Transient(e.to_string()))?;
                Ok(ApplyResult::Conflict(body))
            }
            StatusCode::NOT_FOUND => Err(TransportError::NotFound),
            status => Err(TransportError::Transient(format!(
                "Unexpected status {}",
                status
            ))),
        }
    }

    async fn fetch_latest(&self, board_id: Uuid) -> Result<BoardResponse, TransportError> {
        let response = self
            .with_auth(self.client.get(self.board_url(board_id)))
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map_err(|e| TransportError::Transient(e.to_string())),
            StatusCode::NOT_FOUND => Err(TransportError::NotFound),
            status => Err(TransportError::Transient(format!(
                "Unexpected status {}",
                status
            ))),
        }
    }
}
