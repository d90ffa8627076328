//! HTTP client for the remote analysis service

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::types::{
    CommitReceipt, CommitRequest, CommitResponse, EstimateRequest, EstimateResponse,
    ExtractedData, MatchOutcome, MatchRequest, MatchResponse, RefineRequest, RefineResponse,
    RefinementData, SemanticProfile, SemanticResponse,
};

const USER_AGENT: &str = concat!("embody-scan/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Analysis service client errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Network communication error
    #[error("Network error: {0}")]
    Network(String),

    /// Analysis service returned a non-success status
    #[error("Analysis API error {0}: {1}")]
    Api(u16, String),

    /// 2xx response missing the stage's required sub-field
    #[error("Analysis response missing required field: {0}")]
    MissingField(&'static str),

    /// Failed to decode the response body
    #[error("Parse error: {0}")]
    Parse(String),
}

/// The five analysis stages the pipeline calls, in call order.
///
/// `HttpAnalysisClient` talks to the real service; tests implement this with
/// scripted outcomes.
#[async_trait]
pub trait AnalysisStages: Send + Sync {
    /// Measurement estimation from the uploaded photos
    async fn estimate(&self, request: &EstimateRequest) -> Result<ExtractedData, AnalysisError>;

    /// Semantic body characterization from the measurements
    async fn semantic(&self, extracted: &ExtractedData) -> Result<SemanticProfile, AnalysisError>;

    /// Archetype matching against the semantic profile
    async fn match_archetypes(&self, request: &MatchRequest) -> Result<MatchOutcome, AnalysisError>;

    /// AI refinement of the matched parameters
    async fn refine(&self, request: &RefineRequest) -> Result<RefinementData, AnalysisError>;

    /// Commit the final parameter set, yielding the server scan id
    async fn commit(&self, request: &CommitRequest) -> Result<CommitReceipt, AnalysisError>;
}

/// Analysis service client
pub struct HttpAnalysisClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisClient {
    /// Create a new client against `base_url` (no trailing slash)
    pub fn new(base_url: impl Into<String>) -> Result<Self, AnalysisError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// POST JSON to `path`, decode the JSON response.
    ///
    /// Non-2xx statuses become `AnalysisError::Api` with the body text; the
    /// pipeline decides what a failed stage means, no retries here.
    async fn post<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, AnalysisError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "calling analysis service");

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Api(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| AnalysisError::Parse(e.to_string()))
    }
}

#[async_trait]
impl AnalysisStages for HttpAnalysisClient {
    async fn estimate(&self, request: &EstimateRequest) -> Result<ExtractedData, AnalysisError> {
        let response: EstimateResponse = self.post("/v1/scan/estimate", request).await?;
        response.into_extracted()
    }

    async fn semantic(&self, extracted: &ExtractedData) -> Result<SemanticProfile, AnalysisError> {
        let response: SemanticResponse = self.post("/v1/scan/semantic", extracted).await?;
        response.into_profile()
    }

    async fn match_archetypes(
        &self,
        request: &MatchRequest,
    ) -> Result<MatchOutcome, AnalysisError> {
        let response: MatchResponse = self.post("/v1/scan/match", request).await?;
        response.into_outcome()
    }

    async fn refine(&self, request: &RefineRequest) -> Result<RefinementData, AnalysisError> {
        let response: RefineResponse = self.post("/v1/scan/refine", request).await?;
        response.into_refinement()
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CommitReceipt, AnalysisError> {
        let response: CommitResponse = self.post("/v1/scan/commit", request).await?;
        response.into_receipt()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = HttpAnalysisClient::new("http://127.0.0.1:5811");
        assert!(client.is_ok());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpAnalysisClient::new("http://analysis.test/").unwrap();
        assert_eq!(client.base_url, "http://analysis.test");
    }

    #[test]
    fn test_error_display() {
        let err = AnalysisError::Api(502, "bad gateway".to_string());
        assert_eq!(err.to_string(), "Analysis API error 502: bad gateway");

        let err = AnalysisError::MissingField("extracted_data");
        assert!(err.to_string().contains("extracted_data"));
    }
}
