//! CLI interface for Plugd
//!
//! Command-line interface using clap's derive API: signature tooling for
//! plugin authors and the `serve` command for the install service.

use clap::{Parser, Subcommand};
use packager::keys::DEFAULT_KEY_PAIR_NAME;
use std::path::PathBuf;

/// Plugd plugin daemon
///
/// Signs and verifies plugin packages and serves the plugin install API.
#[derive(Parser, Debug)]
#[command(name = "plugd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Plugin signature tooling
    Signature {
        #[command(subcommand)]
        action: SignatureAction,
    },

    /// Run the plugin install service
    Serve,
}

/// Signature actions
#[derive(Subcommand, Debug)]
pub enum SignatureAction {
    /// Generate a new signing key pair
    Generate {
        /// Base name of the key files (<NAME>.private.pem / <NAME>.public.pem)
        #[arg(short = 'f', long, default_value = DEFAULT_KEY_PAIR_NAME)]
        filename: String,
    },

    /// Sign a plugin package in place
    Sign {
        /// Package archive or extracted directory
        package_path: PathBuf,

        /// Private key file
        #[arg(short = 'p', long = "private_key", value_name = "PATH")]
        private_key: PathBuf,

        /// Keep the package's existing creation time
        #[arg(long)]
        reuse_timestamp: bool,
    },

    /// Verify a plugin package signature
    Verify {
        /// Package archive or extracted directory
        package_path: PathBuf,

        /// Public key file; the built-in key is used when omitted
        #[arg(short = 'p', long = "public_key", value_name = "PATH")]
        public_key: Option<PathBuf>,
    },
}
