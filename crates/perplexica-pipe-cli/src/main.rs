use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use perplexica_pipe_core::{ChatMessage, MessageContent, PipeRequest, UserInfo, Valves};
use perplexica_pipe_local::openai_compat::OpenAiCompatClient;
use perplexica_pipe_local::{valves, Pipe};
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

mod host;

use host::ConsoleHost;

#[derive(Parser, Debug)]
#[command(name = "perplexica-pipe")]
#[command(about = "Ask a Perplexica search backend from the terminal", long_about = None)]
struct Cli {
    /// JSON valves file; missing fields take defaults, PERPLEXICA_PIPE_* env vars override.
    #[arg(long, global = true)]
    valves: Option<PathBuf>,
    /// KEY=VALUE file loaded into the environment (never overrides existing vars).
    #[arg(long, global = true, env = "PERPLEXICA_PIPE_ENV_FILE")]
    env_file: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug). Logs go to stderr.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Log filter directives (e.g. `debug`, `perplexica_pipe_local=trace`); overrides -v.
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one search and print the formatted reply.
    Ask(AskCmd),
    /// Multi-turn search over stdin, one query per line (history is kept).
    Chat(ChatCmd),
    /// List the models this pipe exposes to a host (json).
    Models,
    /// Check configuration (json; no secrets).
    Doctor,
    /// Print version info.
    Version,
}

#[derive(clap::Args, Debug)]
struct AskCmd {
    /// Search query.
    query: String,
    /// Host model id; must contain "perplexica" to be searched.
    #[arg(long, default_value = "perplexica")]
    model: String,
    /// Session key for history.
    #[arg(long)]
    session: Option<String>,
    /// Treat the query as a host utility task (e.g. title_generation).
    #[arg(long)]
    task: Option<String>,
    /// Only print errors to stderr.
    #[arg(long, short)]
    quiet: bool,
}

#[derive(clap::Args, Debug)]
struct ChatCmd {
    #[arg(long, default_value = "perplexica")]
    model: String,
    #[arg(long, default_value = "cli")]
    session: String,
    #[arg(long, short)]
    quiet: bool,
}

fn init_tracing(verbose: u8, log_level: Option<&str>) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = match log_level.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|e| {
            eprintln!("ignoring invalid log filter {directives:?}: {e}");
            EnvFilter::new(fallback)
        }),
        None => EnvFilter::new(fallback),
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn load_valves(path: Option<&PathBuf>) -> Result<Valves> {
    let v = match path {
        Some(p) => valves::from_file_and_env(p)?,
        None => valves::from_env()?,
    };
    Ok(v)
}

fn build_pipe(v: Valves) -> Result<Pipe> {
    let client = perplexica_pipe_local::http_client()?;
    Ok(Pipe::with_http(v, client))
}

fn console_host(v: &Valves, quiet: bool) -> Result<ConsoleHost> {
    let llm = match OpenAiCompatClient::from_env(perplexica_pipe_local::http_client()?) {
        Ok(c) => Some(c.with_timeout(v.timeout_ms.map(std::time::Duration::from_millis))),
        Err(e) => {
            tracing::debug!(error = %e, "no completion backend");
            None
        }
    };
    Ok(ConsoleHost::new(llm, quiet))
}

fn local_user() -> UserInfo {
    UserInfo {
        id: std::env::var("USER").ok(),
        name: std::env::var("USER").ok(),
        ..UserInfo::default()
    }
}

async fn ask(v: Valves, args: AskCmd) -> Result<()> {
    let host = console_host(&v, args.quiet)?;
    let pipe = build_pipe(v)?;
    let req = PipeRequest {
        messages: vec![ChatMessage::user(args.query)],
        model: args.model,
        user: Some(local_user()),
        chat_id: args.session,
        task: args.task,
    };
    let out = pipe.dispatch(&req, &host).await;
    println!("{out}");
    Ok(())
}

async fn chat(v: Valves, args: ChatCmd) -> Result<()> {
    let host = console_host(&v, args.quiet)?;
    let pipe = build_pipe(v)?;
    let mut messages: Vec<ChatMessage> = Vec::new();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/exit" || line == "/quit" {
            break;
        }
        messages.push(ChatMessage::user(line));
        let req = PipeRequest {
            messages: messages.clone(),
            model: args.model.clone(),
            user: Some(local_user()),
            chat_id: Some(args.session.clone()),
            task: None,
        };
        let out = pipe.dispatch(&req, &host).await;
        println!("{out}\n");
        messages.push(ChatMessage {
            role: "assistant".to_string(),
            content: Some(MessageContent::Text(out)),
        });
    }
    tracing::info!(
        turns = pipe.history().len(&args.session) / 2,
        "chat finished"
    );
    Ok(())
}

fn doctor(path: Option<&PathBuf>) -> serde_json::Value {
    fn has_env(k: &str) -> bool {
        std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
    }

    let mut checks: Vec<serde_json::Value> = Vec::new();
    let loaded = load_valves(path);
    let valves_ok = loaded.is_ok();
    checks.push(serde_json::json!({
        "name": "valves_valid",
        "ok": valves_ok,
        "message": match &loaded {
            Ok(_) => "valves are valid".to_string(),
            Err(e) => e.to_string(),
        },
    }));

    let v = loaded.unwrap_or_default();
    let completion_configured = has_env("PERPLEXICA_PIPE_OPENAI_COMPAT_BASE_URL");
    checks.push(serde_json::json!({
        "name": "task_completion_backend",
        "ok": completion_configured,
        "message": if completion_configured {
            "utility tasks will use the OpenAI-compatible server"
        } else {
            "utility tasks (--task) are unavailable"
        },
        "hint": if completion_configured { "" } else { "Set PERPLEXICA_PIPE_OPENAI_COMPAT_BASE_URL." },
    }));

    serde_json::json!({
        "ok": valves_ok,
        "name": "perplexica-pipe",
        "version": env!("CARGO_PKG_VERSION"),
        "enabled": v.enable_perplexica,
        "api_url": v.api_url,
        "focus_mode": v.focus_mode,
        "optimization_mode": v.optimization_mode,
        "custom_openai_base_url_set": v.custom_base_url().is_some(),
        "custom_openai_key_set": v.custom_key().is_some(),
        "timeout_ms": v.timeout_ms,
        "checks": checks,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_level.as_deref());

    if let Some(p) = &cli.env_file {
        valves::load_env_file(p).with_context(|| format!("env file {}", p.display()))?;
    }

    match cli.command {
        Commands::Ask(args) => ask(load_valves(cli.valves.as_ref())?, args).await?,
        Commands::Chat(args) => chat(load_valves(cli.valves.as_ref())?, args).await?,
        Commands::Models => {
            let pipe = build_pipe(load_valves(cli.valves.as_ref())?)?;
            println!("{}", serde_json::to_string_pretty(&pipe.models())?);
        }
        Commands::Doctor => {
            let report = doctor(cli.valves.as_ref());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Version => {
            println!(
                "{}",
                serde_json::json!({
                    "name": "perplexica-pipe",
                    "version": env!("CARGO_PKG_VERSION"),
                })
            );
        }
    }
    Ok(())
}
