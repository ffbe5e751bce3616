//! HTTP transport for the sync endpoints.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tasksync_core::protocol::ErrorBody;
use tasksync_core::{
    FullState, FullStateResponse, SyncReply, SyncRequest, SyncResponse, SyncTransport,
    TransportError,
};

/// Header carrying the caller's principal id.
pub const PRINCIPAL_HEADER: &str = "x-principal-id";

/// [`SyncTransport`] over the JSON/Base64 HTTP boundary.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    principal: String,
}

impl HttpTransport {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: impl Into<String>, principal: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self::with_client(client, base_url, principal))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        principal: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            principal: principal.into(),
        }
    }

    fn url(&self, document_id: &str, endpoint: &str) -> String {
        format!("{}/lists/{}/collaborative/{}", self.base_url, document_id, endpoint)
    }

    async fn read<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, TransportError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| TransportError::Server(format!("invalid response body: {}", e)));
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| status.to_string());
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::AccessDenied,
            StatusCode::NOT_FOUND => TransportError::NotFound,
            s if s.is_client_error() => TransportError::Rejected(message),
            _ => TransportError::Server(message),
        })
    }
}

fn network(e: reqwest::Error) -> TransportError {
    TransportError::Network(e.to_string())
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn fetch_full_state(&self, document_id: &str) -> Result<FullState, TransportError> {
        let response = self
            .client
            .get(self.url(document_id, "full-state"))
            .header(PRINCIPAL_HEADER, &self.principal)
            .send()
            .await
            .map_err(network)?;
        let body: FullStateResponse = Self::read(response).await?;
        FullState::try_from(body).map_err(|e| TransportError::Server(e.to_string()))
    }

    async fn sync(
        &self,
        document_id: &str,
        state_vector: Vec<u8>,
        update: Option<Vec<u8>>,
    ) -> Result<SyncReply, TransportError> {
        let request = SyncRequest::new(&state_vector, update.as_deref());
        let response = self
            .client
            .post(self.url(document_id, "sync"))
            .header(PRINCIPAL_HEADER, &self.principal)
            .json(&request)
            .send()
            .await
            .map_err(network)?;
        let body: SyncResponse = Self::read(response).await?;
        SyncReply::try_from(body).map_err(|e| TransportError::Server(e.to_string()))
    }
}
