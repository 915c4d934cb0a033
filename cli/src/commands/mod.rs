//! CLI command definitions and dispatch.

mod mirror;
mod version;

use clap::{Parser, Subcommand};

pub use mirror::MirrorArgs;

/// A3S Mirror: copy container images into an archive and publish it to a registry.
#[derive(Parser)]
#[command(name = "a3s-mirror", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Tracing filter directive for this invocation.
    pub fn log_filter(&self) -> String {
        match &self.command {
            Command::Mirror(args) => args.log_filter(),
            Command::Version(_) => "warn".to_string(),
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Mirror images to an oci: archive or from an archive to a docker:// registry
    Mirror(mirror::MirrorArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Mirror(args) => mirror::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
