//! Render service collaborator
//!
//! The server-rendered engine sends each URL to a remote service and gets a
//! finished document back.

use async_trait::async_trait;
use reqwest::redirect::Policy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Connection refused, timed out or otherwise never answered
    #[error("Render service unreachable: {0}")]
    Unreachable(String),

    #[error("Render service returned HTTP {0}")]
    Status(u16),

    #[error("Malformed render response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderResponse {
    pub success: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub title: String,
    /// Final URL after redirects
    pub url: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait RenderService: Send + Sync {
    async fn health(&self) -> Result<(), RenderError>;

    async fn render(&self, request: RenderRequest) -> Result<RenderResponse, RenderError>;
}

/// Render service reached over HTTP: `GET {endpoint}/health`, `POST {endpoint}/render`.
pub struct HttpRenderService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRenderService {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::limited(3))
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (AXIOM)")
            .build()
            .map_err(|e| RenderError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn send_error(e: reqwest::Error) -> RenderError {
    if let Some(status) = e.status() {
        RenderError::Status(status.as_u16())
    } else {
        RenderError::Unreachable(e.to_string())
    }
}

#[async_trait]
impl RenderService for HttpRenderService {
    async fn health(&self) -> Result<(), RenderError> {
        let resp = self
            .client
            .get(format!("{}/health", self.endpoint))
            .send()
            .await
            .map_err(send_error)?;

        if !resp.status().is_success() {
            return Err(RenderError::Status(resp.status().as_u16()));
        }
        Ok(())
    }

    async fn render(&self, request: RenderRequest) -> Result<RenderResponse, RenderError> {
        let resp = self
            .client
            .post(format!("{}/render", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(send_error)?;

        if !resp.status().is_success() {
            return Err(RenderError::Status(resp.status().as_u16()));
        }

        resp.json::<RenderResponse>()
            .await
            .map_err(|e| RenderError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_defaults() {
        let resp: RenderResponse =
            serde_json::from_str(r#"{"success":false,"url":"https://x.test","error":"dns"}"#)
                .unwrap();
        assert!(!resp.success);
        assert!(resp.content.is_empty());
        assert_eq!(resp.error.as_deref(), Some("dns"));
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let service =
            HttpRenderService::new("http://127.0.0.1:3000/", Duration::from_secs(1)).unwrap();
        assert_eq!(service.endpoint(), "http://127.0.0.1:3000");
    }

    #[tokio::test]
    async fn test_health_unreachable() {
        // Port 9 (discard) is closed on test machines
        let service = HttpRenderService::new("http://127.0.0.1:9", Duration::from_millis(500))
            .unwrap();
        let err = service.health().await.unwrap_err();
        assert!(matches!(err, RenderError::Unreachable(_)));
    }
}
