use crate::format;
use crate::history::HistoryStore;
use crate::perplexica::PerplexicaClient;
use perplexica_pipe_core::{
    ChatCompletion, CompletionMessage, HistoryEntry, Host, MessageEvent, PipeRequest, Result,
    SearchBackend, SearchPayload, StatusEvent, Valves, MODEL_MARKER,
};
use serde::Serialize;
use std::sync::Arc;

pub const PIPE_ID: &str = "perplexica";

pub const NO_QUERY: &str = "No search query provided";

/// One entry of the manifold model listing a host shows in its model picker.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PipeModel {
    pub id: String,
    pub name: String,
}

/// Result of a search: what the user sees, and what goes into history.
#[derive(Debug, Clone)]
struct SearchOutcome {
    display: String,
    answer: String,
}

/// The search adapter. Cheap to share behind an `Arc`; history is internally locked.
pub struct Pipe {
    valves: Valves,
    backend: Arc<dyn SearchBackend>,
    history: HistoryStore,
}

impl Pipe {
    pub fn new(valves: Valves, backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            valves,
            backend,
            history: HistoryStore::new(),
        }
    }

    /// Pipe backed by a reqwest [`PerplexicaClient`] pointed at `valves.api_url`.
    pub fn with_http(valves: Valves, client: reqwest::Client) -> Self {
        let backend = PerplexicaClient::from_valves(client, &valves);
        Self::new(valves, Arc::new(backend))
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn models(&self) -> Vec<PipeModel> {
        if !self.valves.enable_perplexica {
            return Vec::new();
        }
        vec![PipeModel {
            id: PIPE_ID.to_string(),
            name: self.valves.focus_mode.clone(),
        }]
    }

    pub fn extract_user_input(&self, req: &PipeRequest) -> String {
        req.user_input()
    }

    pub fn build_search_payload(&self, query: &str, history: &[HistoryEntry]) -> SearchPayload {
        SearchPayload::build(query, history, &self.valves)
    }

    /// Run one search and render it for display. No retries.
    pub async fn execute_search(&self, query: &str, history: &[HistoryEntry]) -> Result<String> {
        Ok(self.search(query, history).await?.display)
    }

    async fn search(&self, query: &str, history: &[HistoryEntry]) -> Result<SearchOutcome> {
        let payload = self.build_search_payload(query, history);
        let resp = self.backend.search(&payload).await?;
        Ok(SearchOutcome {
            display: format::render(&resp),
            answer: format::message_text(&resp).to_string(),
        })
    }

    pub fn update_history(&self, session: &str, query: &str, response: &str) {
        self.history.record_turn(session, query, response);
    }

    /// Top-level entry point. Never fails: every problem becomes a reply string.
    pub async fn dispatch(&self, req: &PipeRequest, host: &dyn Host) -> String {
        if req.is_task() {
            return self.run_task(req, host).await;
        }

        let query = self.extract_user_input(req);
        if query.is_empty() {
            return NO_QUERY.to_string();
        }

        let model = req.model.as_str();
        tracing::debug!(model, "dispatch");
        if !self.valves.enable_perplexica || !model.to_lowercase().contains(MODEL_MARKER) {
            tracing::info!(model, enabled = self.valves.enable_perplexica, "search not handled");
            return format!("Unsupported or disabled search engine for model: {model}");
        }

        let session = req.session_key();
        host.emit_status(StatusEvent::in_progress("Searching Perplexica..."))
            .await;

        let history = self.history.snapshot(session);
        match self.search(&query, &history).await {
            Ok(out) => {
                self.update_history(session, &query, &out.answer);
                host.emit_message(MessageEvent {
                    content: out.display.clone(),
                })
                .await;
                host.emit_status(StatusEvent::complete("Search completed"))
                    .await;
                out.display
            }
            Err(e) => {
                tracing::warn!(error = %e, backend = self.backend.name(), "search failed");
                host.emit_status(StatusEvent::error(e.to_string())).await;
                format!("An error occurred while searching Perplexica: {e}")
            }
        }
    }

    /// Utility tasks (titles, tags, follow-ups) skip search and go to the host's model.
    async fn run_task(&self, req: &PipeRequest, host: &dyn Host) -> String {
        let completion = ChatCompletion {
            model: self.valves.task_model.clone(),
            messages: req
                .messages
                .iter()
                .map(|m| CompletionMessage {
                    role: m.role.clone(),
                    content: m.text(),
                })
                .collect(),
        };
        tracing::debug!(task = ?req.task, model = %completion.model, "task bypass");
        match host.complete_chat(&completion).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "task completion failed");
                format!("An error occurred while completing the task: {e}")
            }
        }
    }
}
