//! Canvas API Client
//!
//! `CanvasApi` is the participant's view of the server. `HttpCanvasClient`
//! speaks the JSON protocol over HTTP; `CanvasStore` implements the same
//! trait for in-process use (demo, tests, embedded single-host setups).

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::canvas::state::CanvasSnapshot;
use crate::canvas::store::{CanvasStore, StoreError};
use crate::canvas::tile::CanvasId;
use crate::network::protocol::{
    ErrorBody, ErrorCode, FillTileRequest, FillTileResponse, FinalizeRequest, FinalizeResponse,
};

/// Default timeout for canvas HTTP requests.
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Request never got a definitive answer.
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with an error status.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Error code, when the body carried one.
        code: Option<ErrorCode>,
        /// Server message.
        message: String,
    },

    /// Response body did not parse.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Server error code, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ApiError::Status { code, .. } => *code,
            _ => None,
        }
    }

    /// Safe to resend the same request.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Status { status, .. } => *status >= 500,
            ApiError::Decode(_) => false,
        }
    }

    /// The server may have acted on the request before the failure.
    pub fn outcome_unknown(&self) -> bool {
        self.is_transient() || matches!(self, ApiError::Decode(_))
    }
}

impl From<ErrorBody> for ApiError {
    fn from(body: ErrorBody) -> Self {
        ApiError::Status {
            status: body.code.http_status(),
            code: Some(body.code),
            message: body.error,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ErrorBody::from(&err).into()
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Canvas operations available to a participant.
#[async_trait]
pub trait CanvasApi: Send + Sync {
    /// Fetch the open canvas.
    async fn current_canvas(&self) -> Result<CanvasSnapshot, ApiError>;

    /// Submit a tile.
    async fn fill_tile(
        &self,
        canvas_id: CanvasId,
        request: &FillTileRequest,
    ) -> Result<FillTileResponse, ApiError>;

    /// Ask for the canvas to be minted.
    async fn finalize(
        &self,
        canvas_id: CanvasId,
        request: &FinalizeRequest,
    ) -> Result<FinalizeResponse, ApiError>;
}

// =============================================================================
// HTTP
// =============================================================================

/// HTTP client for a canvas server.
pub struct HttpCanvasClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCanvasClient {
    /// Create a client for `base_url` (e.g. "http://localhost:8080").
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Server base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn error_from(resp: reqwest::Response) -> ApiError {
        let status = resp.status().as_u16();
        match resp.json::<ErrorBody>().await {
            Ok(body) => ApiError::Status {
                status,
                code: Some(body.code),
                message: body.error,
            },
            Err(_) => ApiError::Status {
                status,
                code: None,
                message: "unexpected response".into(),
            },
        }
    }
}

#[async_trait]
impl CanvasApi for HttpCanvasClient {
    async fn current_canvas(&self) -> Result<CanvasSnapshot, ApiError> {
        let url = format!("{}/canvas/current", self.base_url);
        let resp = self.client.get(&url).send().await?;

        if resp.status().is_success() {
            Ok(resp.json().await?)
        } else {
            Err(Self::error_from(resp).await)
        }
    }

    async fn fill_tile(
        &self,
        canvas_id: CanvasId,
        request: &FillTileRequest,
    ) -> Result<FillTileResponse, ApiError> {
        let url = format!("{}/canvas/{}/tile", self.base_url, canvas_id);
        debug!(canvas = %canvas_id, tile = request.tile_index, "Submitting tile");

        let resp = self.client.post(&url).json(request).send().await?;
        match resp.status().as_u16() {
            201 | 203 => Ok(resp.json().await?),
            status => {
                warn!(canvas = %canvas_id, status, "Tile submission refused");
                Err(Self::error_from(resp).await)
            }
        }
    }

    async fn finalize(
        &self,
        canvas_id: CanvasId,
        request: &FinalizeRequest,
    ) -> Result<FinalizeResponse, ApiError> {
        let url = format!("{}/canvas/{}/finalize", self.base_url, canvas_id);

        let resp = self.client.post(&url).json(request).send().await?;
        match resp.status().as_u16() {
            200 | 201 => Ok(resp.json().await?),
            status => {
                warn!(canvas = %canvas_id, status, "Finalize refused");
                Err(Self::error_from(resp).await)
            }
        }
    }
}

// =============================================================================
// In-process
// =============================================================================

#[async_trait]
impl CanvasApi for CanvasStore {
    async fn current_canvas(&self) -> Result<CanvasSnapshot, ApiError> {
        Ok(self.current().await?)
    }

    async fn fill_tile(
        &self,
        canvas_id: CanvasId,
        request: &FillTileRequest,
    ) -> Result<FillTileResponse, ApiError> {
        let outcome = self
            .reserve_and_fill(
                canvas_id,
                request.tile_index,
                request.image_ref.clone(),
                &request.proof_bundle,
            )
            .await?;
        Ok(outcome.into())
    }

    async fn finalize(
        &self,
        canvas_id: CanvasId,
        request: &FinalizeRequest,
    ) -> Result<FinalizeResponse, ApiError> {
        let outcome = CanvasStore::finalize(
            self,
            canvas_id,
            request.flattened_image.clone(),
            &request.proof_bundle,
        )
        .await?;
        Ok(outcome.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::canvas::mint::LedgerMinter;
    use crate::canvas::store::StoreConfig;
    use crate::canvas::tile::ImageRef;
    use crate::proof::bundle::GroupId;
    use crate::proof::provider::{Identity, LocalProofProvider, ProofProvider};
    use crate::proof::verify::GroupRegistry;

    #[tokio::test]
    async fn test_in_process_errors_carry_codes() {
        let registry = Arc::new(GroupRegistry::new());
        registry.create_group(GroupId(1)).await;
        let alice = Identity::from_secret_str("alice");
        registry.add_member(GroupId(1), alice.commitment()).await.unwrap();

        let store = CanvasStore::new(
            StoreConfig { tile_count: 2, ..Default::default() },
            registry.clone(),
            Arc::new(LedgerMinter::new("ipfs://t")),
        );
        let provider = LocalProofProvider::new(registry, GroupId(1));
        let api: &dyn CanvasApi = &store;

        let snapshot = api.current_canvas().await.unwrap();
        let proof = provider
            .generate(&alice, &snapshot.canvas_id.proof_signal())
            .await
            .unwrap();

        let request = FillTileRequest {
            tile_index: 7,
            image_ref: ImageRef::new("a").unwrap(),
            proof_bundle: proof,
        };
        let err = api.fill_tile(snapshot.canvas_id, &request).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::BadRequest));
        assert!(!err.is_transient());

        let err = api.fill_tile(CanvasId::new_random(), &request).await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 404, .. }));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ApiError::Network("reset".into()).is_transient());
        assert!(ApiError::Status { status: 503, code: None, message: String::new() }.is_transient());
        assert!(!ApiError::Decode("bad".into()).is_transient());
        assert!(ApiError::Decode("bad".into()).outcome_unknown());

        let unknown = ApiError::Status { status: 404, code: Some(ErrorCode::UnknownCanvas), message: String::new() };
        assert!(!unknown.is_transient());
        assert!(!unknown.outcome_unknown());
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = HttpCanvasClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
