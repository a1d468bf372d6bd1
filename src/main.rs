// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Toolbridge command line: inspect providers and call tools.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;

use toolbridge::config;
use toolbridge::telemetry::{init_telemetry, TelemetryConfig};
use toolbridge::{SessionManager, SessionState};

/// Toolbridge version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Toolbridge - synchronous access to MCP tool providers.
#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(author, version, about = "Synchronous access to MCP tool providers", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the workspace, then the global config)
    #[arg(short, long, env = "TOOLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Show debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for toolbridge.
#[derive(Subcommand)]
enum Commands {
    /// List every routed tool with its provider
    Tools,

    /// Call a tool by name
    Call {
        /// Tool name
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Override the provider's tool timeout
        #[arg(short, long)]
        timeout_secs: Option<u64>,
    },

    /// Show the state of each provider after connecting
    Status,

    /// Print function-calling specs for every tool as JSON
    Functions,

    /// Print the resolved configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let telemetry = TelemetryConfig::for_cli(cli.verbose, cli.debug);
    let _guard = match init_telemetry(&telemetry) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("{} {}", "warning:".yellow(), e);
            None
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let workspace_root = std::env::current_dir()?;
    let config = config::load_config(cli.config.as_deref(), &workspace_root)
        .context("failed to load configuration")?;

    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if config.providers.is_empty() {
        println!("{}", "No providers configured".yellow());
        println!(
            "{}",
            "Add an \"mcpServers\" entry to mcp_config.json or .toolbridge.json".dimmed()
        );
        return Ok(());
    }

    let manager = SessionManager::new(config);
    let outcome = run_connected(&manager, cli.command, cli.verbose);

    let shutdown = manager.shutdown();
    if cli.verbose {
        eprintln!("{}", manager.metrics().snapshot().format_report().dimmed());
    }

    outcome?;
    shutdown.context("shutdown failed")?;
    Ok(())
}

fn run_connected(manager: &SessionManager, command: Commands, verbose: bool) -> anyhow::Result<()> {
    if let Err(e) = manager.connect_all() {
        for failure in &e.failures {
            eprintln!("{} {}", "warning:".yellow(), failure);
        }
    }

    match command {
        Commands::Tools => print_tools(manager, verbose),
        Commands::Call {
            tool,
            args,
            timeout_secs,
        } => call_tool(manager, &tool, &args, timeout_secs)?,
        Commands::Status => print_status(manager),
        Commands::Functions => {
            println!("{}", serde_json::to_string_pretty(&manager.function_specs())?);
        }
        Commands::Config => {}
    }
    Ok(())
}

fn print_tools(manager: &SessionManager, verbose: bool) {
    let tools = manager.all_tools();
    if tools.is_empty() {
        println!("{}", "No tools available".yellow());
        return;
    }

    println!("{}", format!("Tools ({})", tools.len()).bright_blue().bold());
    for (name, tool) in &tools {
        let description = tool.description.lines().next().unwrap_or("");
        println!(
            "  {} {} {}",
            name.bright_white(),
            format!("[{}]", tool.provider).cyan(),
            description.dimmed()
        );
        if verbose {
            println!("    {}", tool.input_schema);
        }
    }
}

fn call_tool(
    manager: &SessionManager,
    tool: &str,
    args: &str,
    timeout_secs: Option<u64>,
) -> anyhow::Result<()> {
    let args: serde_json::Value =
        serde_json::from_str(args).context("--args must be a JSON object")?;
    anyhow::ensure!(args.is_object(), "--args must be a JSON object");

    let output = match timeout_secs {
        Some(secs) => manager.call_tool_with_timeout(tool, args, Duration::from_secs(secs)),
        None => manager.call_tool(tool, args),
    }?;

    if let Some(structured) = &output.structured {
        println!("{}", serde_json::to_string_pretty(structured)?);
    } else {
        println!("{}", output.as_text());
    }
    Ok(())
}

fn print_status(manager: &SessionManager) {
    println!("{}", format!("toolbridge {VERSION}").bright_blue().bold());
    let routes = manager.routing_table();
    for (name, state) in manager.states() {
        let label = match state {
            SessionState::Ready => state.to_string().green(),
            SessionState::Disconnected => state.to_string().red(),
            _ => state.to_string().yellow(),
        };
        let session = manager.session(&name);
        let offered = session.map(|s| s.list_tools().len()).unwrap_or(0);
        let routed = routes.tools_for(&name).len();
        let server = session
            .and_then(|s| s.server_info())
            .map(|info| format!("{} {}", info.name, info.version))
            .unwrap_or_default();

        println!(
            "  {:<20} {:<12} {:>3}/{:<3} tools routed  {}",
            name.bright_white(),
            label,
            routed,
            offered,
            server.dimmed()
        );
    }
}
