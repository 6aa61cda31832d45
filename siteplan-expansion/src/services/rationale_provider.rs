//! AI rationale provider
//!
//! Request (scored inputs) → response (text, tokens, cost). Prompt wording
//! belongs to the remote service; this side only ships the candidate's
//! location and score components.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::EnhancementConfig;
use crate::models::{ComponentScore, GeoPoint, ScoredCandidate};

const USER_AGENT: &str = concat!("siteplan-expansion/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum RationaleError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RationaleRequest {
    pub model_id: String,
    pub candidate_id: String,
    pub region_key: String,
    pub location: GeoPoint,
    pub total_score: f64,
    pub completeness_score: f64,
    pub components: Vec<ComponentScore>,
}

impl RationaleRequest {
    pub fn from_scored(model_id: &str, scored: &ScoredCandidate) -> Self {
        Self {
            model_id: model_id.to_string(),
            candidate_id: scored.id().to_string(),
            region_key: scored.region_key.clone(),
            location: scored.location(),
            total_score: scored.total_score,
            completeness_score: scored.completeness_score,
            components: scored.breakdown.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RationaleResponse {
    pub text: String,
    #[serde(default)]
    pub tokens_used: u32,
    /// Price of this call in the budget currency
    #[serde(default)]
    pub cost: f64,
}

#[async_trait]
pub trait RationaleProvider: Send + Sync {
    /// Model identifier (part of every cache key)
    fn model_id(&self) -> &str;

    async fn generate(&self, request: &RationaleRequest) -> Result<RationaleResponse, RationaleError>;
}

/// JSON-over-HTTP provider
pub struct HttpRationaleProvider {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model_id: String,
}

impl HttpRationaleProvider {
    pub fn new(config: &EnhancementConfig) -> Result<Self, RationaleError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.call_timeout())
            .build()
            .map_err(|e| RationaleError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model_id: config.model_id.clone(),
        })
    }
}

#[async_trait]
impl RationaleProvider for HttpRationaleProvider {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, request: &RationaleRequest) -> Result<RationaleResponse, RationaleError> {
        tracing::debug!(candidate_id = %request.candidate_id, endpoint = %self.endpoint, "Requesting rationale");

        let mut builder = self.http_client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RationaleError::Network(format!("request timed out: {}", e))
            } else {
                RationaleError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RationaleError::Api(status.as_u16(), body));
        }

        let parsed: RationaleResponse = response
            .json()
            .await
            .map_err(|e| RationaleError::Parse(e.to_string()))?;

        if parsed.text.trim().is_empty() {
            return Err(RationaleError::Parse("empty rationale text".to_string()));
        }
        if !parsed.cost.is_finite() || parsed.cost < 0.0 {
            return Err(RationaleError::Parse(format!("invalid cost {}", parsed.cost)));
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_defaults() {
        let parsed: RationaleResponse = serde_json::from_str(r#"{"text":"Good site"}"#).unwrap();
        assert_eq!(parsed.tokens_used, 0);
        assert_eq!(parsed.cost, 0.0);
    }

    #[test]
    fn test_http_provider_reports_model() {
        let config = EnhancementConfig::default();
        let provider = HttpRationaleProvider::new(&config).unwrap();
        assert_eq!(provider.model_id(), "rationale-v1");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let config = EnhancementConfig {
            endpoint: "http://127.0.0.1:9/unreachable".to_string(),
            call_timeout_secs: 2,
            ..Default::default()
        };
        let provider = HttpRationaleProvider::new(&config).unwrap();
        let request = RationaleRequest {
            model_id: "m".to_string(),
            candidate_id: "c".to_string(),
            region_key: "r".to_string(),
            location: GeoPoint::new(0.0, 0.0),
            total_score: 0.5,
            completeness_score: 1.0,
            components: vec![],
        };
        assert!(matches!(
            provider.generate(&request).await,
            Err(RationaleError::Network(_))
        ));
    }
}
