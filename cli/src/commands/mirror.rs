//! `a3s-mirror mirror` command.

use std::path::PathBuf;

use clap::{ArgAction, Args};

use a3s_mirror_core::options::{DEFAULT_BATCH_SIZE, DEFAULT_WORKING_DIR};
use a3s_mirror_core::{Destination, ImageSetConfiguration, LogLevel, MirrorOptions, TransferOptions};
use a3s_mirror_runtime::{CancelToken, Executor, RunOutcome};

#[derive(Args)]
pub struct MirrorArgs {
    /// Destination: oci:<path> builds an archive, docker://<registry>/<path> publishes one
    pub destination: String,

    /// Image set configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Archive to publish (required for docker:// destinations)
    #[arg(long)]
    pub from: Option<PathBuf>,

    /// Working directory that relative oci: destinations live under
    #[arg(long, default_value = DEFAULT_WORKING_DIR)]
    pub dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub loglevel: LogLevel,

    /// Run even if the configuration is unchanged or differs from the archive
    #[arg(long)]
    pub force: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Images copied concurrently per batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Extra attempts per image after a failed copy
    #[arg(long, default_value_t = 2)]
    pub retries: u32,

    /// Verify TLS certificates of the source registry
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub src_tls_verify: bool,

    /// Verify TLS certificates of the destination registry
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub dest_tls_verify: bool,
}

impl MirrorArgs {
    pub fn log_filter(&self) -> String {
        if self.quiet {
            LogLevel::Error.to_string()
        } else {
            self.loglevel.to_string()
        }
    }

    /// Run options for these arguments, validated.
    pub fn options(&self) -> a3s_mirror_core::Result<MirrorOptions> {
        let mut options = MirrorOptions::new(Destination::parse(&self.destination)?)
            .with_working_dir(&self.dir)
            .with_force(self.force)
            .with_batch_size(self.batch_size);
        if let Some(from) = &self.from {
            options = options.with_from(from);
        }
        options.transfer = TransferOptions {
            retries: self.retries,
            src_tls_verify: self.src_tls_verify,
            dest_tls_verify: self.dest_tls_verify,
        };
        options.validate()?;
        Ok(options)
    }
}

pub async fn execute(args: MirrorArgs) -> Result<(), Box<dyn std::error::Error>> {
    let options = args.options()?;
    let config = ImageSetConfiguration::load(&args.config)?;
    let executor = Executor::with_defaults(options, config)?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling transfers");
            on_interrupt.cancel();
        }
    });

    match executor.run(&cancel).await? {
        RunOutcome::NothingToDo => println!("Nothing to do"),
        RunOutcome::Mirrored { images } => {
            println!("Mirrored {} images to {}", images, args.destination)
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Command};
    use a3s_mirror_core::{MirrorError, MirrorMode};
    use clap::Parser;

    fn parse(args: &[&str]) -> MirrorArgs {
        let mut argv = vec!["a3s-mirror", "mirror"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Mirror(args) => args,
            Command::Version(_) => panic!("expected mirror command"),
        }
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["oci:archive", "--config", "isc.yaml"]);
        assert_eq!(args.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(args.loglevel, LogLevel::Info);
        assert!(args.dest_tls_verify);
        assert_eq!(args.log_filter(), "info");

        let options = args.options().unwrap();
        assert_eq!(options.mode(), MirrorMode::ToArchive);
        assert_eq!(
            options.archive_root().unwrap(),
            PathBuf::from(DEFAULT_WORKING_DIR).join("archive")
        );
    }

    #[test]
    fn test_quiet_overrides_loglevel() {
        let args = parse(&["oci:archive", "-c", "isc.yaml", "--loglevel", "debug", "-q"]);
        assert_eq!(args.log_filter(), "error");
    }

    #[test]
    fn test_registry_requires_from() {
        let args = parse(&["docker://registry.local:5000", "-c", "isc.yaml"]);
        assert!(matches!(args.options(), Err(MirrorError::Config(_))));

        let args = parse(&[
            "docker://registry.local:5000/mirror",
            "-c",
            "isc.yaml",
            "--from",
            "/archive",
            "--dest-tls-verify",
            "false",
            "--retries",
            "5",
        ]);
        let options = args.options().unwrap();
        assert_eq!(options.mode(), MirrorMode::ToRegistry);
        assert_eq!(options.registry(), Some("registry.local:5000/mirror"));
        assert!(!options.transfer.dest_tls_verify);
        assert_eq!(options.transfer.retries, 5);
    }

    #[test]
    fn test_unqualified_destination_rejected() {
        let args = parse(&["archive", "-c", "isc.yaml"]);
        assert!(matches!(args.options(), Err(MirrorError::Config(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let args = parse(&["oci:archive", "-c", "isc.yaml", "--batch-size", "0"]);
        assert!(args.options().is_err());
    }

    #[test]
    fn test_bad_loglevel_is_parse_error() {
        assert!(Cli::try_parse_from([
            "a3s-mirror",
            "mirror",
            "oci:archive",
            "-c",
            "isc.yaml",
            "--loglevel",
            "loud"
        ])
        .is_err());
    }
}
