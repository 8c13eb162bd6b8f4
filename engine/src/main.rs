// Plugd plugin daemon
// Main entry point for the plugd binary

use clap::Parser;
use plugd_engine::cli::{Cli, Command, SignatureAction};
use plugd_engine::config::Config;
use plugd_engine::handlers::{handle_generate, handle_serve, handle_sign, handle_verify};
use plugd_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_telemetry();
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    if let Some(level) = &cli.log {
        config.core.log_level = level.clone();
    }

    // RUST_LOG still wins over the configured level
    init_telemetry_with_level(&config.core.log_level);
    tracing::debug!("Plugd v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Signature { action } => match action {
            SignatureAction::Generate { filename } => handle_generate(&filename),
            SignatureAction::Sign {
                package_path,
                private_key,
                reuse_timestamp,
            } => handle_sign(&package_path, &private_key, reuse_timestamp),
            SignatureAction::Verify {
                package_path,
                public_key,
            } => handle_verify(&package_path, public_key.as_deref()),
        },

        Command::Serve => handle_serve(&config).await,
    }
}
