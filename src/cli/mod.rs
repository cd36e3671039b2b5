//! Command-line interface definitions for the `vmlease` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `vmlease` binary.
#[derive(Debug, Parser)]
#[command(
    name = "vmlease",
    version,
    about = "Lease a batch of ephemeral Hyperstack VMs and always tear them down",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Emit debug-level logs (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands understood by `vmlease`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create, wait for, hold, and delete a batch of instances.
    #[command(name = "up", about = "Create, wait for, hold, and delete a batch of instances")]
    Up(UpCommand),
    /// Delete instances left behind by an aborted lease.
    #[command(name = "sweep", about = "Delete instances left behind by an aborted lease")]
    Sweep(SweepCommand),
}

/// Arguments for the `vmlease up` subcommand.
#[derive(Debug, Default, Args)]
pub(crate) struct UpCommand {
    /// Number of instances to create in the batch.
    #[arg(long, value_name = "N")]
    pub(crate) count: Option<u32>,
    /// Override the flavor for this lease (for example a GPU flavor).
    #[arg(long, value_name = "FLAVOR")]
    pub(crate) flavor: Option<String>,
    /// Override the image for this lease.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Override the display name shared by the batch.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Seconds to hold the instances before teardown.
    #[arg(long, value_name = "SECONDS")]
    pub(crate) hold: Option<u64>,
    /// Provide cloud-init user-data inline for this lease.
    ///
    /// The payload is passed through to the provider untouched and applied
    /// during each instance's first boot.
    #[arg(long, value_name = "USER_DATA", conflicts_with = "cloud_init_file")]
    pub(crate) cloud_init: Option<String>,
    /// Provide cloud-init user-data from a local file for this lease.
    #[arg(long, value_name = "PATH", conflicts_with = "cloud_init")]
    pub(crate) cloud_init_file: Option<String>,
}

/// Arguments for the `vmlease sweep` subcommand.
#[derive(Debug, Default, Args)]
pub(crate) struct SweepCommand {
    /// Delete these instance ids instead of matching on the configured name.
    #[arg(long = "id", value_name = "ID")]
    pub(crate) ids: Vec<String>,
    /// Match on this name instead of the configured instance name.
    #[arg(long, value_name = "NAME", conflicts_with = "ids")]
    pub(crate) name: Option<String>,
    /// List what would be deleted without deleting it.
    #[arg(long)]
    pub(crate) dry_run: bool,
}
