use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("search failed: {0}")]
    Search(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Substring a host model id must contain for the pipe to run a search.
pub const MODEL_MARKER: &str = "perplexica";

/// Session key used when the host supplies neither a chat id nor a user id.
pub const DEFAULT_SESSION: &str = "default";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Per-instance configuration ("valves"). Loaded once, never mutated by the pipe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Valves {
    pub enable_perplexica: bool,
    pub api_url: String,
    pub chat_provider: String,
    pub chat_model: String,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub focus_mode: String,
    pub optimization_mode: String,
    /// Only sent when set; Perplexica uses it with the `custom_openai` provider.
    pub custom_openai_base_url: Option<String>,
    pub custom_openai_key: Option<String>,
    /// Model used when the host asks for a utility task (titles, tags, ...).
    pub task_model: String,
    /// No timeout when unset.
    pub timeout_ms: Option<u64>,
}

impl Default for Valves {
    fn default() -> Self {
        Self {
            enable_perplexica: true,
            api_url: "http://localhost:3001/api/search".to_string(),
            chat_provider: "openai".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_provider: "openai".to_string(),
            embedding_model: "text-embedding-3-large".to_string(),
            focus_mode: "webSearch".to_string(),
            optimization_mode: "balanced".to_string(),
            custom_openai_base_url: None,
            custom_openai_key: None,
            task_model: "gpt-4o-mini".to_string(),
            timeout_ms: None,
        }
    }
}

impl Valves {
    pub fn validate(&self) -> Result<()> {
        parse_http_url("api_url", &self.api_url)?;
        if let Some(base) = self.custom_base_url() {
            parse_http_url("custom_openai_base_url", base)?;
        }
        for (name, v) in [
            ("chat_provider", &self.chat_provider),
            ("chat_model", &self.chat_model),
            ("embedding_provider", &self.embedding_provider),
            ("embedding_model", &self.embedding_model),
            ("focus_mode", &self.focus_mode),
            ("optimization_mode", &self.optimization_mode),
        ] {
            if v.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("{name} must not be empty")));
            }
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "timeout_ms must be positive (leave unset for no timeout)".to_string(),
            ));
        }
        Ok(())
    }

    /// `custom_openai_base_url` if set to a non-blank value.
    pub fn custom_base_url(&self) -> Option<&str> {
        set(&self.custom_openai_base_url)
    }

    /// `custom_openai_key` if set to a non-blank value.
    pub fn custom_key(&self) -> Option<&str> {
        set(&self.custom_openai_key)
    }
}

fn parse_http_url(name: &str, raw: &str) -> Result<url::Url> {
    let u = url::Url::parse(raw.trim())
        .map_err(|e| Error::InvalidConfig(format!("{name}: {e}")))?;
    match u.scheme() {
        "http" | "https" => Ok(u),
        other => Err(Error::InvalidConfig(format!(
            "{name}: unsupported scheme {other:?}"
        ))),
    }
}

/// Blank strings count as unset.
fn set(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Inbound request body
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipeRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub user: Option<UserInfo>,
    /// Conversation id; the history session key when present.
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Set by the host for non-search utility tasks (e.g. `title_generation`).
    #[serde(default)]
    pub task: Option<String>,
}

impl PipeRequest {
    /// Text of the latest message; empty when there is nothing to search for.
    pub fn user_input(&self) -> String {
        self.messages
            .last()
            .map(ChatMessage::text)
            .unwrap_or_default()
    }

    pub fn session_key(&self) -> &str {
        set(&self.chat_id)
            .or_else(|| self.user.as_ref().and_then(|u| set(&u.id)))
            .unwrap_or(DEFAULT_SESSION)
    }

    pub fn is_task(&self) -> bool {
        self.task.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(MessageContent::Text(text.into())),
        }
    }

    /// Plain string content as-is; for multi-part content, the first `text` part.
    pub fn text(&self) -> String {
        match &self.content {
            Some(MessageContent::Text(s)) => s.clone(),
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .find(|p| p.kind == "text")
                .and_then(|p| p.text.clone())
                .unwrap_or_default(),
            Some(MessageContent::Other(_)) | None => String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    /// Anything else a host might send; treated as no text.
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// ---------------------------------------------------------------------------
// Host interface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    InProgress,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusEvent {
    pub level: StatusLevel,
    pub description: String,
    pub done: bool,
}

impl StatusEvent {
    pub fn in_progress(description: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::InProgress,
            description: description.into(),
            done: false,
        }
    }

    pub fn complete(description: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Complete,
            description: description.into(),
            done: true,
        }
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Error,
            description: description.into(),
            done: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEvent {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionMessage {
    pub role: String,
    pub content: String,
}

/// A chat completion the pipe delegates back to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatCompletion {
    pub model: String,
    pub messages: Vec<CompletionMessage>,
}

/// Callbacks the host exposes to a running pipe.
#[async_trait::async_trait]
pub trait Host: Send + Sync {
    async fn emit_status(&self, ev: StatusEvent);
    async fn emit_message(&self, ev: MessageEvent);
    async fn complete_chat(&self, req: &ChatCompletion) -> Result<String>;
}

/// A host with no event emitter and no completion facility.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

#[async_trait::async_trait]
impl Host for NullHost {
    async fn emit_status(&self, _ev: StatusEvent) {}

    async fn emit_message(&self, _ev: MessageEvent) {}

    async fn complete_chat(&self, _req: &ChatCompletion) -> Result<String> {
        Err(Error::NotSupported(
            "host has no chat completion facility".to_string(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Search backend wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

/// One history turn; serialized as a `[role, text]` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry(pub Role, pub String);

impl HistoryEntry {
    pub fn role(&self) -> Role {
        self.0
    }

    pub fn text(&self) -> &str {
        &self.1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatModelSpec {
    pub provider: String,
    pub model: String,
    #[serde(
        rename = "customOpenAIBaseURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_openai_base_url: Option<String>,
    #[serde(
        rename = "customOpenAIKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_openai_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingModelSpec {
    pub provider: String,
    pub model: String,
}

/// JSON body POSTed to the Perplexica search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchPayload {
    pub chat_model: ChatModelSpec,
    pub embedding_model: EmbeddingModelSpec,
    pub optimization_mode: String,
    pub focus_mode: String,
    pub query: String,
    pub history: Vec<HistoryEntry>,
}

impl SearchPayload {
    pub fn build(query: &str, history: &[HistoryEntry], valves: &Valves) -> Self {
        Self {
            chat_model: ChatModelSpec {
                provider: valves.chat_provider.clone(),
                model: valves.chat_model.clone(),
                custom_openai_base_url: valves.custom_base_url().map(str::to_string),
                custom_openai_key: valves.custom_key().map(str::to_string),
            },
            embedding_model: EmbeddingModelSpec {
                provider: valves.embedding_provider.clone(),
                model: valves.embedding_model.clone(),
            },
            optimization_mode: valves.optimization_mode.clone(),
            focus_mode: valves.focus_mode.clone(),
            query: query.to_string(),
            history: history.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "WireSource")]
pub struct Source {
    pub title: Option<String>,
    /// Parsed but not rendered.
    pub snippet: Option<String>,
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct WireSource {
    #[serde(default, rename = "pageContent")]
    page_content: Option<String>,
    #[serde(default)]
    metadata: Option<WireMetadata>,
}

#[derive(Deserialize, Default)]
struct WireMetadata {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl From<WireSource> for Source {
    fn from(w: WireSource) -> Self {
        let meta = w.metadata.unwrap_or_default();
        Self {
            title: meta.title,
            snippet: w.page_content,
            url: meta.url,
        }
    }
}

/// Anything that can answer a [`SearchPayload`].
#[async_trait::async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, payload: &SearchPayload) -> Result<SearchResponse>;
}
