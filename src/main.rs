mod application;
mod config;
mod domain;
mod infrastructure;
mod session;

use application::agent::{
    AgentEvent, ApprovalDecision, ApprovalMode, EventReceiver, Orchestrator, ToolLoopEngine,
    event_channel,
};
use application::tooling::catalog::build_catalog;
use application::tooling::invoker::ToolInvoker;
use application::tooling::pool::ConnectionPool;
use clap::{Parser, ValueEnum};
use config::AppConfig;
use infrastructure::model::{OpenAiCompatClient, ProviderRegistry};
use std::error::Error;
use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "astrolabe",
    version,
    about = "CLI agent host connecting language models to MCP tool servers"
)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the configured model, as "provider/model".
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    system: Option<String>,
    /// Conversation file to restore from and save to.
    #[arg(long)]
    session: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = RunMode::Oneshot)]
    mode: RunMode,
    /// Approve every tool call without asking.
    #[arg(long)]
    auto_approve: bool,
    prompt: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RunMode {
    Oneshot,
    Repl,
    Tools,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();
    debug!(?cli.mode, config = ?cli.config, session = ?cli.session, "CLI arguments parsed");

    let config_path = cli.config.as_deref();
    let mut app_config = AppConfig::load(config_path)?;
    if let Some(model) = cli.model.clone() {
        app_config.model = model;
    }
    if let Some(system) = cli.system.clone() {
        app_config.system_prompt = Some(system);
    }
    let auto_approve = cli.auto_approve || app_config.auto_approve;
    info!(model = %app_config.model, servers = app_config.servers.len(), "configuration loaded");

    let pool = Arc::new(ConnectionPool::new(app_config.servers.clone()));
    let catalog = Arc::new(build_catalog(&pool, &app_config.servers).await?);
    info!(tools = catalog.len(), "tool catalog assembled");

    if matches!(cli.mode, RunMode::Tools) {
        for descriptor in catalog.descriptors() {
            println!("{}\n    {}", descriptor.name, descriptor.description);
        }
        pool.close().await;
        return Ok(());
    }

    let mut registry = ProviderRegistry::new();
    for provider in &app_config.providers {
        registry.register(Arc::new(OpenAiCompatClient::from_config(provider)?));
    }
    let resolved = registry.resolve(&app_config.model)?;

    let invoker = Arc::new(ToolInvoker::new(Arc::clone(&pool), Arc::clone(&catalog)));
    let engine = Arc::new(ToolLoopEngine::new(
        resolved,
        invoker,
        app_config.max_tool_steps,
    ));

    let (events, rx) = event_channel();
    let approval = approval_for(cli.mode, auto_approve);
    let agent = Orchestrator::new(engine, events, approval, app_config.system_prompt.clone());

    if let Some(path) = &cli.session {
        let history = session::load_history(path)?;
        if !history.is_empty() {
            info!(messages = history.len(), path = %path.display(), "session restored");
            agent.replace_history(history);
        }
    }

    let result = match cli.mode {
        RunMode::Oneshot => run_oneshot(&cli, &agent).await,
        RunMode::Repl => run_repl(&agent, rx).await,
        RunMode::Tools => unreachable!("handled above"),
    };

    if let Some(path) = &cli.session {
        session::save_history(path, &agent.history())?;
        debug!(path = %path.display(), "session saved");
    }
    agent.close().await;
    pool.close().await;
    result
}

async fn run_oneshot(cli: &Cli, agent: &Orchestrator) -> Result<(), Box<dyn Error>> {
    let prompt = load_prompt(cli)?;
    let response = agent.run_once(prompt).await?;
    println!("{response}");
    Ok(())
}

async fn run_repl(agent: &Orchestrator, mut rx: EventReceiver) -> Result<(), Box<dyn Error>> {
    println!("astrolabe ready; /help for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_approval: Option<oneshot::Sender<ApprovalDecision>> = None;
    let mut streamed = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                if let Some(respond) = pending_approval.take() {
                    let decision = if input.eq_ignore_ascii_case("y") {
                        ApprovalDecision::Approve
                    } else {
                        ApprovalDecision::Deny
                    };
                    let _ = respond.send(decision);
                    continue;
                }
                match input {
                    "" => continue,
                    "/quit" | "/exit" => break,
                    "/help" => print_help(),
                    "/cancel" => agent.cancel_current_step(),
                    "/clear" => {
                        agent.clear_messages();
                        println!("conversation cleared");
                    }
                    "/queue" => println!("{} prompt(s) queued", agent.queue_len()),
                    "/drop" => agent.clear_queue(),
                    prompt => agent.run(prompt),
                }
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    AgentEvent::ThinkingStarted => {
                        streamed = false;
                        print!("... ");
                        std::io::stdout().flush()?;
                    }
                    AgentEvent::ThinkingStopped => {
                        print!("\r    \r");
                        std::io::stdout().flush()?;
                    }
                    AgentEvent::StreamChunk(chunk) => {
                        streamed = true;
                        print!("{chunk}");
                        std::io::stdout().flush()?;
                    }
                    AgentEvent::ToolCallStarted { name, .. } => {
                        println!("[tool] {name} running");
                    }
                    AgentEvent::ToolCallFinished { name, is_error, .. } => {
                        if is_error {
                            println!("[tool] {name} failed");
                        } else {
                            println!("[tool] {name} done");
                        }
                    }
                    AgentEvent::StepCompleted { response, usage } => {
                        if streamed {
                            println!();
                        } else {
                            println!("{response}");
                        }
                        debug!(tokens = usage.total(), "step usage");
                    }
                    AgentEvent::StepCancelled => println!("(cancelled)"),
                    AgentEvent::StepFailed { message } => eprintln!("error: {message}"),
                    AgentEvent::QueueChanged(depth) => {
                        if depth > 0 {
                            println!("({depth} prompt(s) queued)");
                        }
                    }
                    AgentEvent::ApprovalRequired { request, respond } => {
                        println!(
                            "allow {} on {} with arguments {}? [y/N]",
                            request.tool, request.server, request.input
                        );
                        pending_approval = Some(respond);
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!("/cancel  stop the step in flight");
    println!("/clear   reset the conversation");
    println!("/queue   show pending prompt count");
    println!("/drop    discard pending prompts");
    println!("/quit    exit");
}

/// Non-interactive runs have nobody to ask, so tool calls are approved by
/// default; the REPL asks per call unless auto-approve is set.
fn approval_for(mode: RunMode, auto_approve: bool) -> ApprovalMode {
    match mode {
        RunMode::Repl if !auto_approve => ApprovalMode::Interactive,
        _ => ApprovalMode::auto(true),
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .with_writer(std::io::stderr)
            .init();
    });
}

fn load_prompt(cli: &Cli) -> Result<String, Box<dyn Error>> {
    if !cli.prompt.is_empty() {
        return Ok(cli.prompt.join(" ").trim().to_string());
    }

    if !std::io::stdin().is_terminal() {
        info!("reading prompt from standard input");
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        let prompt = buffer.trim().to_string();
        if !prompt.is_empty() {
            return Ok(prompt);
        }
    }

    warn!("no prompt via arguments or stdin");
    Err("prompt required via arguments or stdin".into())
}
