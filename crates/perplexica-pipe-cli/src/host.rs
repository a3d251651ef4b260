use perplexica_pipe_core::{
    ChatCompletion, Error, Host, MessageEvent, Result, StatusEvent, StatusLevel,
};
use perplexica_pipe_local::openai_compat::OpenAiCompatClient;

/// Terminal host: status lines go to stderr, completions to an optional
/// OpenAI-compatible server. The final reply is printed by the caller.
pub struct ConsoleHost {
    llm: Option<OpenAiCompatClient>,
    quiet: bool,
}

impl ConsoleHost {
    pub fn new(llm: Option<OpenAiCompatClient>, quiet: bool) -> Self {
        Self { llm, quiet }
    }
}

#[async_trait::async_trait]
impl Host for ConsoleHost {
    async fn emit_status(&self, ev: StatusEvent) {
        if self.quiet && ev.level != StatusLevel::Error {
            return;
        }
        let tag = match ev.level {
            StatusLevel::InProgress => "..",
            StatusLevel::Complete => "ok",
            StatusLevel::Error => "!!",
        };
        eprintln!("[{tag}] {}", ev.description);
    }

    async fn emit_message(&self, ev: MessageEvent) {
        tracing::debug!(chars = ev.content.len(), "message event");
    }

    async fn complete_chat(&self, req: &ChatCompletion) -> Result<String> {
        match &self.llm {
            Some(c) => c.complete(req).await,
            None => Err(Error::NotConfigured(
                "set PERPLEXICA_PIPE_OPENAI_COMPAT_BASE_URL to run utility tasks".to_string(),
            )),
        }
    }
}
