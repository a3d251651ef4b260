use perplexica_pipe_core::{SearchResponse, Source};
use std::fmt::Write as _;

/// Label older Perplexica builds prepend to `message`.
pub const RESULTS_LABEL: &str = "Perplexica Search Results:";

const NO_MESSAGE: &str = "No message available";
const NO_TITLE: &str = "No title";
const NO_URL: &str = "No URL available";

/// The answer text with the exact [`RESULTS_LABEL`] prefix (and the whitespace
/// after it) removed. Nothing else is stripped.
pub fn clean_message(message: &str) -> &str {
    match message.strip_prefix(RESULTS_LABEL) {
        Some(rest) => rest.trim_start(),
        None => message,
    }
}

pub fn message_text(resp: &SearchResponse) -> &str {
    clean_message(resp.message.as_deref().unwrap_or(NO_MESSAGE))
}

pub fn source_entry(index: usize, src: &Source) -> String {
    let title = src.title.as_deref().unwrap_or(NO_TITLE);
    let url = src.url.as_deref().unwrap_or(NO_URL);
    format!("{index}. {title}\n URL: {url}")
}

/// Collapsible sources block: count in the summary, one numbered entry per source.
pub fn sources_block(sources: &[Source]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<details>");
    let _ = writeln!(out, "<summary>Sources ({})</summary>", sources.len());
    out.push('\n');
    for (i, src) in sources.iter().enumerate() {
        out.push_str(&source_entry(i + 1, src));
        out.push_str("\n\n");
    }
    out.push_str("</details>");
    out
}

/// Display string for a search: sources block, blank line, answer text.
pub fn render(resp: &SearchResponse) -> String {
    format!("{}\n\n{}", sources_block(&resp.sources), message_text(resp))
}
