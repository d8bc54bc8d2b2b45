//! wardend - the warden host monitoring daemon.
//!
//! The binary is a thin shell over [`warden_monitor::Daemon`]: it parses
//! the command line, installs logging, loads the config and bridges process
//! signals to the daemon's cancellation token.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;

pub use cli::{Cli, Command, LogFormat};
pub use error::{CliError, Result};
