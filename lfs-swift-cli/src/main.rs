//! `git-lfs-swift-transfer` — git-lfs custom transfer agent for OpenStack Swift.
//!
//! Register it with git-lfs:
//!
//! ```text
//! git config lfs.customtransfer.swift.path git-lfs-swift-transfer
//! git config lfs.customtransfer.swift.args "--use-slo --logfile /tmp/lfs-swift.log"
//! git config lfs.standalonetransferagent swift
//! ```
//!
//! Exit status is 0 after a terminate message or end of input, 1 on any
//! fatal error.

#![allow(clippy::print_stderr, clippy::missing_docs_in_private_items)]

mod logging;

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lfs_swift::{Agent, Config, DEFAULT_SEGMENT_SIZE, Swift, handshake};
use lfs_swift_proto::{Codec, Operation};
use tracing::{debug, error};

use logging::LogLevel;

#[derive(Debug, Parser)]
#[command(
    name = "git-lfs-swift-transfer",
    version,
    about = "Transfer agent for type 'swift' for git-lfs."
)]
struct Cli {
    /// Write logs to this file.
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Log verbosity.
    #[arg(long, value_enum, default_value_t = LogLevel::Warning)]
    loglevel: LogLevel,

    /// Use SLOs instead of DLOs for large objects.
    #[arg(long)]
    use_slo: bool,

    /// Size of segments for large objects, in bytes.
    #[arg(long, default_value_t = DEFAULT_SEGMENT_SIZE, value_parser = clap::value_parser!(u64).range(1..))]
    segment_size: u64,

    /// Directory downloads are written to before git-lfs moves them into place.
    #[arg(long)]
    tempdir: Option<PathBuf>,
}

fn main() {
    let cli = match Cli::try_parse_from(split_args(std::env::args_os())) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };
    if let Err(e) = logging::init(cli.logfile.as_deref(), cli.loglevel) {
        eprintln!("git-lfs-swift-transfer: {e:#}");
        std::process::exit(1);
    }
    if let Err(e) = cli.run() {
        error!("{e:#}");
        eprintln!("git-lfs-swift-transfer: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    /// Handshake, then serve requests on stdin/stdout until terminate.
    fn run(self) -> Result<()> {
        debug!(args = ?self, "program called");
        let mut codec = Codec::new(io::stdin().lock(), io::stdout().lock());
        let operation = handshake(&mut codec).context("handshake failed")?;

        let temp_dir = temp_dir(self.tempdir, operation)?;
        let config = Config::new(operation, temp_dir)
            .segment_size(self.segment_size)
            .use_slo(self.use_slo);
        Agent::new(config, Swift::new())
            .run(&mut codec)
            .context("transfer session failed")
    }
}

/// Directory downloads land in. Created up front for download sessions.
fn temp_dir(requested: Option<PathBuf>, operation: Operation) -> Result<PathBuf> {
    match (requested, operation) {
        (Some(dir), Operation::Download) => {
            fs::create_dir_all(&dir)
                .with_context(|| format!("cannot create temp directory {}", dir.display()))?;
            Ok(dir)
        }
        (Some(dir), Operation::Upload) => Ok(dir),
        (None, Operation::Download) => Ok(tempfile::Builder::new()
            .prefix("git-lfs-swift-")
            .tempdir()
            .context("cannot create temp directory")?
            .keep()),
        (None, Operation::Upload) => Ok(std::env::temp_dir()),
    }
}

/// git-lfs passes every configured argument as one string; split it.
fn split_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    let mut args: Vec<OsString> = args.into_iter().collect();
    if args.len() == 2 {
        if let Some(joined) = args.pop() {
            args.extend(
                joined
                    .to_string_lossy()
                    .split_whitespace()
                    .map(OsString::from),
            );
        }
    }
    args
}
