//! HTTP client for the proof service.

use async_trait::async_trait;
use tracing::{debug, trace};
use url::Url;

use crate::error::ServiceError;
use crate::services::{ProofRequest, ProofResponse, ProofService};

/// Proof service reached over HTTP at `{base}/prove`.
///
/// Callers bound the request with their own timeout.
#[derive(Debug, Clone)]
pub struct HttpProver {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpProver {
    pub fn new(base_url: &str) -> Result<Self, ServiceError> {
        let base = Url::parse(base_url).map_err(|e| ServiceError::Unreachable(e.to_string()))?;
        let endpoint = prove_endpoint(&base)?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn prove_endpoint(base: &Url) -> Result<Url, ServiceError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("prove")
        .map_err(|e| ServiceError::Unreachable(e.to_string()))
}

#[async_trait]
impl ProofService for HttpProver {
    async fn prove(&self, request: &ProofRequest) -> Result<ProofResponse, ServiceError> {
        trace!(fen = %request.fen, mv = %request.mv, "requesting proof");
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| ServiceError::Unreachable(e.to_string()))?;

        let status = response.status();
        let body: ProofResponse = match response.json().await {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(ServiceError::Rejected(e.to_string())),
            Err(_) => return Err(ServiceError::Unreachable(format!("status {status}"))),
        };
        debug!(status = status.as_u16(), success = body.success, "proof response");
        Ok(body)
    }
}
