//! personality-net binary
//!
//! Runs either an agent node with its tool server or the coordinator node
//! with its registry server.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use personality_net::cli::{Cli, Commands, ConfigSubcommand};
use personality_net::config::{self, NodeConfig};
use personality_net::error::{Error, Result};
use personality_net::logging::{self, LogGuards};
use personality_net::node::{AgentNode, CoordinatorNode};
use personality_net::protocol::AgentPersonality;
use personality_net::server::{self, agent, registry};
use personality_net::version;

fn main() {
    if let Err(e) = run() {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't need a runtime or full logging
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        Commands::Rid { reference } => {
            let rid: AgentPersonality = reference.parse()?;
            println!("{}", rid);
            return Ok(());
        }
        Commands::Agent { .. } | Commands::Coordinator { .. } => {}
    }

    let config_path = match &cli.command {
        Commands::Agent { config } | Commands::Coordinator { config } => config.clone(),
        _ => None,
    };
    let config = NodeConfig::load(config_path.as_deref())?;

    // Held until exit so buffered file logs get flushed
    let _log_guards = init_logging_from_config(&config, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting personality-net"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().clamp(2, 8))
        .thread_name("pnet-worker")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))?;

    match cli.command {
        Commands::Agent { .. } => runtime.block_on(run_agent(config)),
        Commands::Coordinator { .. } => runtime.block_on(run_coordinator(config)),
        Commands::Version | Commands::Config { .. } | Commands::Rid { .. } => {
            // Already handled above
            unreachable!()
        }
    }
}

fn init_logging_from_config(config: &NodeConfig, verbose: u8, quiet: bool) -> Result<LogGuards> {
    logging::init_logging(&config.logging, verbose, quiet)
}

// ─────────────────────────────────────────────────────────────────
// Node Runners
// ─────────────────────────────────────────────────────────────────

async fn run_agent(config: NodeConfig) -> Result<()> {
    let node = AgentNode::from_config(&config)?;
    info!(
        node = %node.identity(),
        rid = %node.personality(),
        first_contact = ?config.network.first_contact,
        "Agent node ready"
    );

    // Serve tools before the handshake so the coordinator can reach us
    let addr = server::listen_addr(&config.network.listen_host, config.agent.mcp_port)?;
    let router = agent::create_router(agent::AgentServerState::new(node.profile()));
    let server_task = tokio::spawn(server::serve(addr, router, server::shutdown_signal()));

    match node.start().await {
        Ok(report) => info!(
            announced = report.announced,
            coordinator = ?report.coordinator.as_ref().map(|r| r.to_string()),
            edge = ?report.edge.as_ref().map(|r| r.to_string()),
            "Bootstrap finished"
        ),
        Err(e) => error!(error = %e.format_for_log(), "Bootstrap failed"),
    }

    join_server(server_task).await
}

async fn run_coordinator(config: NodeConfig) -> Result<()> {
    let node = Arc::new(CoordinatorNode::from_config(&config)?);
    node.start().await?;
    info!(
        node = %node.identity(),
        base_url = %config.coordinator.base_url,
        "Coordinator node ready"
    );

    let addr = server::listen_addr(
        &config.network.listen_host,
        config.coordinator.mcp_registry_port,
    )?;
    let router = registry::create_router(registry::RegistryServerState::new(node));
    server::serve(addr, router, server::shutdown_signal()).await
}

async fn join_server(task: tokio::task::JoinHandle<Result<()>>) -> Result<()> {
    match task.await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "Server task aborted");
            Err(Error::Internal(format!("Server task failed: {}", e)))
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Config Commands
// ─────────────────────────────────────────────────────────────────

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = NodeConfig::load(config.as_deref())?;
            println!("{}", cfg.to_toml()?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            NodeConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
