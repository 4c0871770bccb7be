//! CLI argument parsing using clap v4

use clap::{Parser, Subcommand};

/// Personality network node
///
/// Runs an agent that announces its personality to a coordinator, or the
/// coordinator that aggregates agent personalities into a tool registry.
#[derive(Parser, Debug)]
#[command(name = "personality-net")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an agent node and its tool server
    Agent {
        /// Path to configuration file
        #[arg(short, long, env = "PNET_CONFIG")]
        config: Option<String>,
    },

    /// Run the coordinator node and its registry server
    Coordinator {
        /// Path to configuration file
        #[arg(short, long, env = "PNET_CONFIG")]
        config: Option<String>,
    },

    /// Parse a personality reference and print its canonical form
    Rid {
        /// e.g. orn:agent.personality:weather/1.0
        reference: String,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
