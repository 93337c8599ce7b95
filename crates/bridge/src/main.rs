use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mb_bridge::cli::{self, Cli, Command};
use mb_bridge::session::{BridgeSession, SessionOutcome};
use mb_domain::config::{Config, ToolServerConfig};
use mb_domain::error::Error;
use mb_mcp_client::ToolRegistry;
use mb_providers::{LlmClient, OpenAiCompatClient};

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run {
            prompt,
            tool,
            model,
            max_turns,
            system_prompt,
        } => cmd_run(prompt, tool, model, max_turns, system_prompt).await,
        Command::Tools { tool } => cmd_tools(tool).await,
        Command::Version => {
            println!("mcpbridge {}", env!("CARGO_PKG_VERSION"));
            0
        }
    };

    std::process::exit(code);
}

/// Compact stderr-only tracing, so diagnostics never pollute the answer
/// on stdout. Defaults to `warn`; override with `RUST_LOG`.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Print a categorized one-line error; known kinds never dump a trace.
fn report(e: &Error) -> i32 {
    eprintln!("{}: {e}", e.category().as_str());
    1
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn cmd_run(
    prompt: String,
    tool_specs: Vec<String>,
    model: Option<String>,
    max_turns: Option<u32>,
    system_prompt: Option<String>,
) -> i32 {
    let setup = async {
        let mut config = Config::from_env()?;
        if let Some(model) = model {
            config.llm.model = model;
        }
        if let Some(max_turns) = max_turns {
            config.session.max_turns = max_turns;
        }
        if let Some(system_prompt) = system_prompt {
            config.session.system_prompt = Some(system_prompt);
        }
        let servers = cli::parse_tool_specs(&tool_specs)?;
        // Build the LLM client first: a bad credential setup should fail
        // before any child process is spawned.
        let llm = OpenAiCompatClient::new(&config.llm)?;
        Ok::<_, Error>((config, servers, llm))
    };
    let (config, servers, llm) = match setup.await {
        Ok(parts) => parts,
        Err(e) => return report(&e),
    };

    let registry = match ToolRegistry::connect_all(&servers, &config.tools).await {
        Ok(registry) => registry,
        Err(e) => return report(&e),
    };

    let code = run_session(&config, &llm, &registry, &prompt).await;

    // Scoped acquisition: connections are released on every exit path,
    // including timeout and ctrl-c.
    registry.shutdown().await;
    code
}

async fn run_session(
    config: &Config,
    llm: &dyn LlmClient,
    registry: &ToolRegistry,
    prompt: &str,
) -> i32 {
    let session = BridgeSession::new(config, llm, registry, prompt);
    let budget = Duration::from_secs(config.session.timeout_secs);

    let result = tokio::select! {
        timed = tokio::time::timeout(budget, session.run()) => match timed {
            Ok(inner) => inner,
            Err(_) => Err(Error::Timeout(format!(
                "session exceeded {}s", config.session.timeout_secs
            ))),
        },
        _ = tokio::signal::ctrl_c() => Err(Error::Cancelled("interrupted".into())),
    };

    match result {
        Ok(SessionOutcome::Completed { answer, .. }) => {
            println!("{answer}");
            0
        }
        Ok(SessionOutcome::MaxTurnsExceeded { turns, transcript }) => {
            eprintln!(
                "session did not converge after {turns} turns ({} transcript entries)",
                transcript.len()
            );
            2
        }
        Err(e) => report(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connect to the configured servers and print what they advertise.
async fn cmd_tools(tool_specs: Vec<String>) -> i32 {
    let inner = async {
        // Listing tools needs no LLM credentials; fall back to default
        // timeouts when the environment is not fully configured.
        let config = Config::from_env().unwrap_or_default();
        let servers: Vec<ToolServerConfig> = cli::parse_tool_specs(&tool_specs)?;
        let registry = ToolRegistry::connect_all(&servers, &config.tools).await?;
        for (server_id, tool) in registry.catalog() {
            if tool.description.is_empty() {
                println!("{server_id}/{}", tool.name);
            } else {
                println!("{server_id}/{}: {}", tool.name, tool.description);
            }
        }
        registry.shutdown().await;
        Ok::<_, Error>(())
    };
    match inner.await {
        Ok(()) => 0,
        Err(e) => report(&e),
    }
}
