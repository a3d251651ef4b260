use crate::error_chain;
use perplexica_pipe_core::{
    Error, Result, SearchBackend, SearchPayload, SearchResponse, Valves,
};
use std::time::{Duration, Instant};

/// HTTP client for Perplexica's `POST /api/search`.
#[derive(Debug, Clone)]
pub struct PerplexicaClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Option<Duration>,
}

impl PerplexicaClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout: None,
        }
    }

    pub fn from_valves(client: reqwest::Client, valves: &Valves) -> Self {
        Self {
            client,
            endpoint: valves.api_url.trim().to_string(),
            timeout: valves.timeout_ms.map(Duration::from_millis),
        }
    }
}

#[async_trait::async_trait]
impl SearchBackend for PerplexicaClient {
    fn name(&self) -> &'static str {
        "perplexica"
    }

    async fn search(&self, payload: &SearchPayload) -> Result<SearchResponse> {
        let t0 = Instant::now();
        tracing::debug!(
            endpoint = %self.endpoint,
            focus_mode = %payload.focus_mode,
            history_len = payload.history.len(),
            "perplexica search request"
        );

        let mut rb = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(t) = self.timeout {
            rb = rb.timeout(t);
        }

        let resp = rb
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Search(error_chain(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(%status, "perplexica search returned an error status");
            return Err(Error::Search(format!("perplexica search HTTP {status}")));
        }

        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| {
                Error::Search(format!("invalid response body: {}", error_chain(&e)))
            })?;
        tracing::info!(
            sources = parsed.sources.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "perplexica search done"
        );
        Ok(parsed)
    }
}
