use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for prefguard
#[derive(Parser, Debug)]
#[command(name = "prefguard")]
#[command(about = "Detect and undo out-of-band tampering of preference files")]
pub struct Cli {
    /// Secret seed for MAC computation, hex encoded
    #[arg(long)]
    pub seed: String,

    /// Device identifier bound into the MAC derivation
    #[arg(long, default_value = "")]
    pub device_id: String,

    /// Tracking configuration file (JSON array of tracked preferences)
    #[arg(short, long)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Seed hashes for an existing, unprotected preference file
    Init {
        /// Preference file (JSON object)
        file: PathBuf,
    },
    /// Validate a preference file and report per-preference states, without
    /// enforcing
    Check {
        /// Preference file (JSON object)
        file: PathBuf,
    },
    /// Run the full load-time validation pass, resetting tampered values
    Enforce {
        /// Preference file (JSON object)
        file: PathBuf,
    },
    /// Show or clear the last enforcement reset timestamp
    ResetTime {
        /// Preference file (JSON object)
        file: PathBuf,

        /// Clear the timestamp instead of showing it
        #[arg(long)]
        clear: bool,
    },
}
