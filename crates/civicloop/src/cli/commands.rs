//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand, ValueEnum};

use crate::model::{CollectionStatus, GeoLocation, UserRole};

/// Login command arguments.
#[derive(Debug, Args)]
pub struct LoginCommand {
    /// Mobile number (10 digits; spaces and dashes are ignored)
    #[arg(short, long)]
    pub phone: String,

    /// Full name, required when registering
    #[arg(short, long)]
    pub name: Option<String>,

    /// Register a new worker instead of logging in
    #[arg(long)]
    pub register: bool,
}

/// Setup command arguments.
#[derive(Debug, Args)]
pub struct SetupCommand {
    /// Crew role
    #[arg(short, long, value_enum)]
    pub role: RoleArg,

    /// Ward to work in (defaults to the first configured ward)
    #[arg(short, long)]
    pub ward: Option<String>,
}

/// Collect command arguments.
#[derive(Debug, Args)]
pub struct CollectCommand {
    /// Pickup outcome
    #[arg(short, long, value_enum)]
    pub status: StatusArg,

    /// Household QR payload; repeat for every camera read, the first
    /// non-blank one is used (a placeholder is generated if none)
    #[arg(long, value_name = "ID")]
    pub household: Vec<String>,

    #[command(flatten)]
    pub position: PositionArgs,

    /// Photo to attach
    #[arg(short, long, value_name = "FILE")]
    pub image: Option<PathBuf>,
}

/// Breakdown command arguments.
#[derive(Debug, Args)]
pub struct BreakdownCommand {
    /// What went wrong
    #[arg(short, long)]
    pub details: String,

    #[command(flatten)]
    pub position: PositionArgs,

    /// Photo to attach
    #[arg(short, long, value_name = "FILE")]
    pub image: Option<PathBuf>,
}

/// Current position of the device, when known.
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct PositionArgs {
    /// Latitude in degrees
    #[arg(long, requires = "lng", allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Longitude in degrees
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    pub lng: Option<f64>,
}

impl PositionArgs {
    /// The position, if both coordinates were given.
    #[must_use]
    pub fn location(&self) -> Option<GeoLocation> {
        Some(GeoLocation::new(self.lat?, self.lng?))
    }
}

/// Output-format flag shared by listing commands.
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct JsonFlag {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Crew role argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    /// Drives the vehicle
    Driver,
    /// Assists with pickups
    Helper,
}

impl From<RoleArg> for UserRole {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Driver => Self::Driver,
            RoleArg::Helper => Self::Helper,
        }
    }
}

/// Pickup outcome argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    /// Wet and dry waste separated
    Segregated,
    /// Unsorted waste
    Mixed,
    /// Waste refused
    Rejected,
    /// Nobody home
    Locked,
}

impl From<StatusArg> for CollectionStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Segregated => Self::Segregated,
            StatusArg::Mixed => Self::Mixed,
            StatusArg::Rejected => Self::Rejected,
            StatusArg::Locked => Self::Locked,
        }
    }
}

/// MIME type for an attached photo, from its extension.
#[must_use]
pub fn image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}
