//! Command-line interface for civicloop.
//!
//! This module provides the CLI structure for the `civicloop` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::{LogStyle, Verbosity};

pub use commands::{
    image_mime, BreakdownCommand, CollectCommand, ConfigCommand, JsonFlag, LoginCommand,
    PositionArgs, RoleArg, SetupCommand, StatusArg,
};

/// civicloop - Field app for waste-collection crews
///
/// Records household pickups and vehicle breakdowns on the device and
/// syncs them to the remote store when connectivity allows.
#[derive(Debug, Parser)]
#[command(name = "civicloop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in (or register) with a mobile number
    Login(LoginCommand),

    /// Choose crew role and ward
    Setup(SetupCommand),

    /// Switch crew role
    Role {
        /// New role
        #[arg(value_enum)]
        role: RoleArg,
    },

    /// Log out of this device
    Logout {
        /// Log out even if records are still unsynced
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the current profile
    Whoami(JsonFlag),

    /// Record a household pickup
    Collect(CollectCommand),

    /// Report a vehicle breakdown
    Breakdown(BreakdownCommand),

    /// List records stored on this device
    Records(JsonFlag),

    /// Show sync status
    Status(JsonFlag),

    /// Push pending records now
    Sync,

    /// Remove synced records from this device
    Prune,

    /// Run background sync in the foreground until interrupted
    Daemon,

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }

    /// Log layout for the chosen command.
    #[must_use]
    pub fn log_style(&self) -> LogStyle {
        if matches!(self.command, Command::Daemon) {
            LogStyle::Daemon
        } else {
            LogStyle::Command
        }
    }
}
