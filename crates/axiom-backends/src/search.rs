//! Search collaborator used by the reserved `axiom://search` page

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::render::RenderError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, RenderError>;
}

/// Search over HTTP: `GET {endpoint}?q={query}` returning a JSON array of hits.
pub struct HttpSearchService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSearchService {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (AXIOM)")
            .build()
            .map_err(|e| RenderError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl SearchService for HttpSearchService {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, RenderError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| RenderError::Unreachable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RenderError::Status(resp.status().as_u16()));
        }

        resp.json::<Vec<SearchHit>>()
            .await
            .map_err(|e| RenderError::Decode(e.to_string()))
    }
}
