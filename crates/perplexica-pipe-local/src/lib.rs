//! Local implementation of the Perplexica pipe: a reqwest search client, an
//! OpenAI-compatible completion client, per-session history, and the dispatcher.

pub mod format;
pub mod history;
pub mod openai_compat;
pub mod perplexica;
pub mod pipe;
pub mod valves;

pub use history::HistoryStore;
pub use perplexica::PerplexicaClient;
pub use pipe::{Pipe, PipeModel};

/// `e` followed by each of its `source()` causes, `": "`-separated.
pub(crate) fn error_chain(e: &dyn std::error::Error) -> String {
    let mut out = e.to_string();
    let mut cur = e.source();
    while let Some(cause) = cur {
        let msg = cause.to_string();
        if !out.contains(&msg) {
            out.push_str(": ");
            out.push_str(&msg);
        }
        cur = cause.source();
    }
    out
}

/// Shared HTTP client. Timeouts are applied per request from the valves.
pub fn http_client() -> perplexica_pipe_core::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("perplexica-pipe/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| perplexica_pipe_core::Error::NotConfigured(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Layer(&'static str, Option<Box<Layer>>);

    impl std::fmt::Display for Layer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    impl std::error::Error for Layer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            self.1.as_deref().map(|e| e as _)
        }
    }

    #[test]
    fn error_chain_appends_causes() {
        let e = Layer(
            "error sending request",
            Some(Box::new(Layer(
                "client error (Connect)",
                Some(Box::new(Layer("Connection refused", None))),
            ))),
        );
        assert_eq!(
            error_chain(&e),
            "error sending request: client error (Connect): Connection refused"
        );
    }

    #[test]
    fn error_chain_skips_repeated_messages() {
        let e = Layer("operation timed out", Some(Box::new(Layer("timed out", None))));
        assert_eq!(error_chain(&e), "operation timed out");
    }
}
