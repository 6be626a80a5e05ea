//! profilesync command-line tool
//!
//! Drives a profile manager over a local profile directory and, optionally,
//! a shared directory that other devices also point at.
//!
//! Usage:
//!   profilesync --local ~/.vpn/profiles --remote ~/Drive/vpn list
//!
//! Logs go to stderr; command output goes to stdout.

use anyhow::Result;
use clap::Parser;
use profilesync_cli::{Args, execute};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    for line in execute(&args).await? {
        println!("{line}");
    }
    Ok(())
}
