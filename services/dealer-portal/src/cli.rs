//! Command-line arguments for the driver binary

use std::convert::Infallible;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use common::Secret;

#[derive(Parser, Debug)]
#[command(name = "dealer-portal")]
#[command(about = "Dealer portal session and credential lifecycle driver", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true, env = "CONFIG_PATH", default_value = "dealer-portal.toml")]
    pub config: PathBuf,

    /// Print Prometheus counters after the command runs
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the session and PIN state
    Status,

    /// Accept a login callback payload
    Callback {
        /// Payload file, or `-` for stdin
        #[arg(value_name = "FILE|-")]
        source: String,
    },

    /// Set the PIN and finish a pending login
    SetPin {
        #[arg(value_parser = secret)]
        pin: Secret<String>,
    },

    /// Verify the PIN for this launch
    VerifyPin {
        #[arg(value_parser = secret)]
        pin: Secret<String>,
    },

    /// Forget the stored PIN
    ResetPin,

    /// End the session
    Logout,

    /// Simulate returning from the background
    Resume,

    /// Authenticated GET against the portal API
    Get { path: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Callback { .. } => "callback",
            Command::SetPin { .. } => "set-pin",
            Command::VerifyPin { .. } => "verify-pin",
            Command::ResetPin => "reset-pin",
            Command::Logout => "logout",
            Command::Resume => "resume",
            Command::Get { .. } => "get",
        }
    }
}

fn secret(value: &str) -> Result<Secret<String>, Infallible> {
    Ok(Secret::new(value.to_string()))
}
