use crate::error_chain;
use perplexica_pipe_core::{ChatCompletion, CompletionMessage, Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn openai_compat_base_url_from_env() -> Option<String> {
    env("PERPLEXICA_PIPE_OPENAI_COMPAT_BASE_URL")
}

fn openai_compat_api_key_from_env() -> Option<String> {
    env("PERPLEXICA_PIPE_OPENAI_COMPAT_API_KEY").or_else(|| env("OPENAI_API_KEY"))
}

/// Chat completions against any OpenAI-compatible server. Serves the host's
/// `complete_chat` when the pipe runs outside a chat host.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Option<Duration>,
}

impl OpenAiCompatClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            timeout: None,
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let base_url = openai_compat_base_url_from_env().ok_or_else(|| {
            Error::NotConfigured("missing PERPLEXICA_PIPE_OPENAI_COMPAT_BASE_URL".to_string())
        })?;
        Ok(Self::new(client, base_url, openai_compat_api_key_from_env()))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint_chat_completions(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }

    pub async fn complete(&self, req: &ChatCompletion) -> Result<String> {
        let body = ChatCompletionsRequest {
            model: &req.model,
            messages: &req.messages,
            stream: Some(false),
        };

        let mut rb = self
            .client
            .post(self.endpoint_chat_completions())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(t) = self.timeout {
            rb = rb.timeout(t);
        }
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        let resp = rb
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Llm(error_chain(&e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "openai_compat chat.completions HTTP {status}"
            )));
        }

        let parsed: ChatCompletionsResponse =
            resp.json().await.map_err(|e| Error::Llm(error_chain(&e)))?;
        tracing::debug!(model = %req.model, choices = parsed.choices.len(), "chat completion done");
        Ok(parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: &'a [CompletionMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    /// `null` for refusals and tool-call-only replies.
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn completion() -> ChatCompletion {
        ChatCompletion {
            model: "gpt-4o-mini".to_string(),
            messages: vec![CompletionMessage {
                role: "user".to_string(),
                content: "Generate a title".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["model"], "gpt-4o-mini");
                assert_eq!(body["stream"], false);
                Json(serde_json::json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": "Weather Chat"}},
                        {"message": {"role": "assistant", "content": "ignored"}}
                    ]
                }))
            }),
        );
        let addr = serve(app).await;
        let c = OpenAiCompatClient::new(reqwest::Client::new(), format!("http://{addr}/"), None);
        assert_eq!(c.complete(&completion()).await.unwrap(), "Weather Chat");
    }

    #[tokio::test]
    async fn null_content_is_an_empty_reply() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                Json(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": null}}]
                }))
            }),
        );
        let addr = serve(app).await;
        let c = OpenAiCompatClient::new(reqwest::Client::new(), format!("http://{addr}"), None);
        assert_eq!(c.complete(&completion()).await.unwrap(), "");
    }

    #[tokio::test]
    async fn http_error_is_llm_error() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { axum::http::StatusCode::UNAUTHORIZED }),
        );
        let addr = serve(app).await;
        let c = OpenAiCompatClient::new(
            reqwest::Client::new(),
            format!("http://{addr}"),
            Some("sk-bad".to_string()),
        );
        let err = c.complete(&completion()).await.unwrap_err();
        assert!(matches!(err, Error::Llm(ref m) if m.contains("401")), "{err}");
    }
}
