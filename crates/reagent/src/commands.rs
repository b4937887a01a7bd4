//! reagent command implementations

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use reagent_agent::tools::{register_default_tools, ToolRegistry, Toolkit};
use reagent_agent::{
    AgentLoop, AgentResponse, ConfirmationHandler, ConfirmationRequest, Decision, ResponseType,
    TerminationPolicy,
};
use reagent_bus::{AgentEvent, EventBus, TracingListener};
use reagent_config::{self, Config};
use reagent_provider::OpenAiCompatClient;

/// Timeout for the `exec` tool
const EXEC_TIMEOUT: Duration = Duration::from_secs(60);

/// Flags of the `run` command
pub struct RunOptions {
    pub message: String,
    pub confirm: bool,
    pub max_iterations: Option<u32>,
    pub until_done: bool,
    pub stream: bool,
    pub json: bool,
    pub verbose: bool,
}

/// Initialize config and workspace
pub async fn init_command() -> Result<()> {
    println!("◆ Initializing reagent...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = reagent_config::init().await?;

    let workspace = config.workspace_path();
    reagent_config::ensure_dir(&workspace).await?;
    create_template(&workspace, "AGENT.md", AGENT_MD).await?;

    println!("\n◆ reagent initialized");
    println!("\nNext steps:");
    println!("  1. Add your API key to ~/.reagent/config.json");
    println!("     or export {}", reagent_config::API_KEY_ENV);
    println!("  2. Run a task: reagent run -m \"List the files here\"");

    Ok(())
}

async fn create_template(dir: &Path, filename: &str, content: &str) -> Result<()> {
    let path = dir.join(filename);
    if !path.exists() {
        tokio::fs::write(&path, content).await?;
        info!("◆ Created {}", path.display());
    }
    Ok(())
}

/// Show status
pub async fn status_command() -> Result<()> {
    let config_path = reagent_config::config_path();

    println!("◆ reagent Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = Config::load().await?;
    let workspace = config.workspace_path();

    println!("Config:     {} {}", config_path.display(), marker(config_path.exists()));
    println!("Workspace:  {} {}", workspace.display(), marker(workspace.exists()));
    println!("Model:      {}", config.provider.model);
    println!(
        "API Key:    {}",
        if config.has_api_key() {
            "[Set]"
        } else {
            "[Missing]"
        }
    );

    let agent = &config.agent;
    println!("Termination: {:?}", agent.termination);
    println!("Max iterations: {}", agent.max_iterations);
    println!("Time limit: {} ms", agent.max_execution_time_ms);
    println!(
        "Confirmation: {}",
        if agent.tool_confirmation.enabled {
            "[Enabled]"
        } else {
            "[Disabled]"
        }
    );
    println!(
        "Retries:    {} (base {} ms, max {} ms, x{})",
        agent.retry.max_retries,
        agent.retry.base_delay_ms,
        agent.retry.max_delay_ms,
        agent.retry.backoff_factor
    );

    if let Err(e) = config.validate() {
        println!("\n✗ {}", e);
    } else {
        println!("\n◆ Ready");
    }

    Ok(())
}

fn marker(ok: bool) -> &'static str {
    if ok {
        "[OK]"
    } else {
        "[Missing]"
    }
}

/// List available tools
pub async fn tools_command() -> Result<()> {
    let config = Config::load().await?;
    let registry = default_registry(&config.workspace_path());

    println!("◆ Tools");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", registry.list_tools());

    Ok(())
}

fn default_registry(workspace: &Path) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_default_tools(&mut registry, workspace, EXEC_TIMEOUT);
    registry
}

/// Run one task through the reasoning loop
pub async fn run_command(options: RunOptions) -> Result<()> {
    let config = Config::load().await?;
    config.validate()?;

    let api_key = config.api_key().with_context(|| {
        format!(
            "No API key configured. Set one in ~/.reagent/config.json or {}",
            reagent_config::API_KEY_ENV
        )
    })?;
    let provider = &config.provider;
    let client = OpenAiCompatClient::new(
        api_key,
        provider.api_base.clone(),
        Some(provider.model.clone()),
    )
    .with_sampling(provider.temperature, provider.max_tokens);

    let workspace = config.workspace_path();
    reagent_config::ensure_dir(&workspace)
        .await
        .with_context(|| format!("cannot create workspace {}", workspace.display()))?;

    let bus = EventBus::new().with_debug(config.agent.debug_enabled || options.verbose);
    bus.subscribe(Arc::new(TracingListener));
    if options.stream && !options.json {
        bus.subscribe_fn("stdout", |event| {
            if let AgentEvent::StreamChunk { chunk, .. } = event {
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            }
            Ok(())
        });
    }
    if options.verbose {
        bus.subscribe_fn("progress", print_progress);
    }

    let mut builder = AgentLoop::builder()
        .from_config(&config.agent)
        .client(Arc::new(client))
        .toolkit(Arc::new(default_registry(&workspace)))
        .bus(bus)
        .working_directory(&workspace);

    if options.confirm || config.agent.tool_confirmation.enabled {
        let timeout = Duration::from_millis(config.agent.tool_confirmation.timeout_ms);
        builder = builder.confirmation(Arc::new(TerminalConfirmation { timeout }));
    }
    if let Some(max_iterations) = options.max_iterations {
        builder = builder.max_iterations(max_iterations);
    }
    if options.until_done {
        builder = builder.termination(TerminationPolicy::UntilDone);
    }
    if options.stream {
        builder = builder.streaming(true);
    }
    let agent = builder.build()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("◆ Interrupted, cancelling execution");
            on_signal.cancel();
        }
    });

    let response = agent.run(&options.message, &cancel).await;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        if !response.status.is_success() {
            anyhow::bail!("execution ended with {}", response.status);
        }
        return Ok(());
    }

    if options.stream {
        println!();
    }
    if !response.status.is_success() {
        anyhow::bail!("{}: {}", response.status, response.content);
    }
    // streamed answers are already on stdout
    if !streamed_answer(&options, &response) {
        println!("\n◆ {}", response.content);
    }

    Ok(())
}

/// A direct answer that went out chunk by chunk; tool results still need printing
fn streamed_answer(options: &RunOptions, response: &AgentResponse) -> bool {
    options.stream && response.response_type == ResponseType::Final
}

fn print_progress(event: &AgentEvent) -> std::result::Result<(), reagent_bus::ListenerError> {
    match event {
        AgentEvent::ThoughtStart { iteration, .. } => eprintln!("◆ thinking ({})", iteration),
        AgentEvent::ActionStart { tool, params, .. } => eprintln!("◆ {} {}", tool, params),
        AgentEvent::ActionEnd {
            tool,
            status,
            duration_ms,
            ..
        } => eprintln!("◆ {} {} in {} ms", tool, status, duration_ms),
        _ => {}
    }
    Ok(())
}

/// Asks on the terminal before each tool call; anything but `y` denies
struct TerminalConfirmation {
    timeout: Duration,
}

#[async_trait]
impl ConfirmationHandler for TerminalConfirmation {
    async fn confirm(&self, request: &ConfirmationRequest) -> Decision {
        let prompt = format!(
            "◆ Allow {} {} ({})? (y/N): ",
            request.tool, request.params, request.reason
        );
        let answer = tokio::task::spawn_blocking(move || {
            eprint!("{}", prompt);
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        });

        match tokio::time::timeout(self.timeout, answer).await {
            Ok(Ok(Ok(line))) if line.trim().eq_ignore_ascii_case("y") => Decision::Approve,
            Ok(_) => Decision::Deny,
            Err(_) => {
                eprintln!();
                warn!("◆ No answer within {} ms, denying", self.timeout.as_millis());
                Decision::Deny
            }
        }
    }
}

const AGENT_MD: &str = r#"# Agent Notes

This file is added to the system prompt of every run in this workspace.

## Guidelines

- Prefer reading before writing
- Keep shell commands short and non-interactive
- Answer directly once the task is done
"#;
