//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/warden/warden.toml";

/// Warden host monitoring daemon.
#[derive(Debug, Parser)]
#[command(name = "wardend")]
#[command(about = "Watches host signals and raises tiered alerts")]
#[command(version)]
pub struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty, env = "WARDEN_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon until interrupted.
    Run {
        /// Path to config file.
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "WARDEN_CONFIG")]
        config: PathBuf,
    },

    /// Evaluate every monitor without sending alerts or writing state.
    DryRun {
        /// Path to config file.
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "WARDEN_CONFIG")]
        config: PathBuf,

        /// Number of cycles to run.
        #[arg(long, default_value_t = 1)]
        cycles: u32,
    },

    /// Validate a config file and print what it defines.
    CheckConfig {
        /// Path to config file.
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "WARDEN_CONFIG")]
        config: PathBuf,
    },

    /// Write a commented sample config file.
    InitConfig {
        /// Path to write config.
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}
