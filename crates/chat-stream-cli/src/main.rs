//! Terminal front end: streams one prompt through the pipeline and prints the
//! paced text to stdout. Diagnostics go to stderr.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use chat_stream::prelude::*;
use chat_stream::{Channel, EventPayload, ToolExecution, ToolStatus, init_observability};
use clap::Parser;

/// Stream a chat response from a gateway.
#[derive(Parser, Debug)]
#[command(name = "chat-stream")]
struct Cli {
    /// Stream endpoint. Falls back to `CHAT_STREAM_URL`.
    #[arg(long, global = true)]
    url: Option<String>,

    /// Bearer token. Falls back to `CHAT_STREAM_TOKEN`.
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Send a prompt and print the reply as it streams.
    Send {
        /// Prompt text.
        prompt: String,

        /// Continue an existing conversation.
        #[arg(short, long)]
        conversation: Option<String>,

        /// Model to request.
        #[arg(short, long)]
        model: Option<String>,

        /// Characters revealed per tick.
        #[arg(long, default_value_t = 3)]
        chunk_size: usize,

        /// Milliseconds between reveal ticks.
        #[arg(long, default_value_t = 25)]
        tick_ms: u64,

        /// Print text as soon as it arrives.
        #[arg(long)]
        no_pacing: bool,
    },
    /// Open the push channel and print every event until it closes.
    Listen,
}

struct TerminalObserver;

impl StreamObserver for TerminalObserver {
    fn on_tool_update(&mut self, tool: &ToolExecution) {
        match tool.status {
            ToolStatus::Pending | ToolStatus::Executing => eprintln!("\n[tool] {} running", tool.name),
            ToolStatus::Completed => eprintln!("\n[tool] {} done", tool.name),
            ToolStatus::Failed => eprintln!(
                "\n[tool] {} failed: {}",
                tool.name,
                tool.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    fn on_display(&mut self, chunk: &str, _displayed: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(chunk.as_bytes());
        let _ = out.flush();
    }
}

fn credentials(token: Option<String>) -> Arc<dyn CredentialProvider> {
    match token.or_else(|| std::env::var("CHAT_STREAM_TOKEN").ok()) {
        Some(token) => Arc::new(StaticCredentials::bearer(token)),
        None => Arc::new(StaticCredentials::anonymous()),
    }
}

fn client_config(url: Option<String>) -> anyhow::Result<ClientConfig> {
    match url {
        Some(url) => Ok(ClientConfig::new(url)),
        None => ClientConfig::from_env().context("no --url given and CHAT_STREAM_URL is not set"),
    }
}

async fn send(cli: Cli) -> anyhow::Result<()> {
    let Command::Send {
        prompt,
        conversation,
        model,
        chunk_size,
        tick_ms,
        no_pacing,
    } = cli.command
    else {
        bail!("not a send command");
    };

    let pacing = (!no_pacing).then(|| {
        PacerConfig::default()
            .chunk_size(chunk_size)
            .tick_interval(Duration::from_millis(tick_ms))
    });
    let mut orchestrator = StreamOrchestrator::new(
        client_config(cli.url)?,
        credentials(cli.token),
        OrchestratorConfig::default().pacing(pacing),
        Box::new(TerminalObserver),
    )?;

    let mut request = ChatRequest::new(prompt);
    if let Some(conversation) = conversation {
        request = request.conversation(conversation);
    }
    if let Some(model) = model {
        request = request.model(model);
    }
    orchestrator.send(request)?;
    let message = orchestrator.run().await;
    println!();

    for block in orchestrator.parser().code_blocks() {
        let language = if block.language.is_empty() { "text" } else { block.language.as_str() };
        eprintln!("[code] {language}, {} lines", block.code.lines().count());
    }
    tracing::info!(status = ?message.status, tools = message.tools.len(), "finished");
    match message.status {
        MessageStatus::Failed => bail!(
            "{}",
            message.error.as_deref().unwrap_or("stream failed")
        ),
        _ => Ok(()),
    }
}

async fn listen(cli: Cli) -> anyhow::Result<()> {
    let mut client = StreamClient::new(client_config(cli.url)?, credentials(cli.token), Channel::Listen)?;
    client.connect()?;
    while let Some(event) = client.next_event().await {
        match event {
            TransportEvent::Event(event) => {
                let kind = event.kind();
                match event.payload {
                    EventPayload::Token { content } => {
                        print!("{content}");
                        let _ = std::io::stdout().flush();
                    }
                    other => eprintln!("[{kind}] {other:?}"),
                }
            }
            TransportEvent::Failed(err) => bail!("stream failed: {err}"),
            TransportEvent::Closed(reason) => eprintln!("\n[closed] {reason:?}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_observability();
    let cli = Cli::parse();
    match cli.command {
        Command::Send { .. } => send(cli).await,
        Command::Listen => listen(cli).await,
    }
}
