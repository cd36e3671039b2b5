//! Binary entry point for the `vmlease` CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vmlease::{
    ConfigError, HyperstackError, HyperstackProvider, InstanceId, LeaseConfig, LeaseController,
    LeaseError, LeaseReport, SweepConfig, SweepConfigError, SweepError, SweepSummary, SweepTarget,
    Sweeper,
};

use cli::{Cli, Command, SweepCommand, UpCommand};

/// The lease finished and every instance was deleted.
const EXIT_OK: i32 = 0;
/// Configuration or creation failed before anything was leased.
const EXIT_FAILURE: i32 = 1;
/// Instances may still exist and need manual cleanup.
const EXIT_LEAKED: i32 = 3;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("provider error: {0}")]
    Provider(#[from] HyperstackError),
    #[error(transparent)]
    Lease(#[from] LeaseError<HyperstackError>),
    #[error("invalid sweep target: {0}")]
    SweepConfig(#[from] SweepConfigError),
    #[error("sweep failed: {0}")]
    Sweep(#[from] SweepError<HyperstackError>),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Sweep(SweepError::NotClean { .. }) => EXIT_LEAKED,
            _ => EXIT_FAILURE,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(command: Command) -> Result<i32, CliError> {
    match command {
        Command::Up(args) => run_up(args).await,
        Command::Sweep(args) => run_sweep(args).await,
    }
}

async fn run_up(args: UpCommand) -> Result<i32, CliError> {
    let mut config = LeaseConfig::load_without_cli_args()?;
    apply_overrides(&mut config, args);
    let spec = config.as_spec()?;
    let timings = config.timings();
    let provider = HyperstackProvider::from_config(&config)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let signals = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        trigger.cancel();
    });

    let controller = LeaseController::new(provider);
    let result = controller.run(&spec, &timings, &cancel).await;
    signals.abort();
    let report = result?;

    write_report(io::stdout(), &report);
    Ok(lease_exit_code(&report))
}

async fn run_sweep(args: SweepCommand) -> Result<i32, CliError> {
    let config = LeaseConfig::load_without_cli_args()?;
    let sweep_config = sweep_config(&config, args)?;
    let provider = HyperstackProvider::from_config(&config)?;

    let summary = Sweeper::new(sweep_config, provider).sweep().await?;
    write_sweep_summary(io::stdout(), &summary);
    Ok(EXIT_OK)
}

/// Applies per-invocation flags on top of the loaded configuration.
fn apply_overrides(config: &mut LeaseConfig, args: UpCommand) {
    if let Some(count) = args.count {
        config.count = count;
    }
    if let Some(flavor) = args.flavor {
        config.flavor_name = flavor;
    }
    if let Some(image) = args.image {
        config.image_name = image;
    }
    if let Some(name) = args.name {
        config.instance_name = name;
    }
    if let Some(hold) = args.hold {
        config.hold_secs = hold;
    }
    // A user-data flag replaces both configured sources.
    if args.cloud_init.is_some() || args.cloud_init_file.is_some() {
        config.cloud_init_user_data = args.cloud_init;
        config.cloud_init_user_data_file = args.cloud_init_file;
    }
}

fn sweep_config(config: &LeaseConfig, args: SweepCommand) -> Result<SweepConfig, CliError> {
    let target = if args.ids.is_empty() {
        SweepTarget::Name(args.name.unwrap_or_else(|| config.instance_name.clone()))
    } else {
        SweepTarget::Ids(args.ids.into_iter().map(InstanceId::from).collect())
    };
    let settle = Duration::from_secs(config.poll_interval_secs);
    Ok(SweepConfig::new(target)?
        .dry_run(args.dry_run)
        .settle(vmlease::sweep::DEFAULT_SETTLE_TIMEOUT, settle))
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C; tearing down"),
        () = terminate => info!("received SIGTERM; tearing down"),
    }
}

fn lease_exit_code(report: &LeaseReport) -> i32 {
    if report.teardown.failed.is_empty() {
        EXIT_OK
    } else {
        EXIT_LEAKED
    }
}

fn join_ids<'a>(ids: impl IntoIterator<Item = &'a InstanceId>) -> String {
    ids.into_iter()
        .map(InstanceId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_report(mut target: impl Write, report: &LeaseReport) {
    writeln!(target, "lease {}: {}", report.run_id, report.outcome).ok();
    if report.instances.is_empty() {
        return;
    }
    writeln!(target, "instances: {}", join_ids(&report.instances)).ok();
    for record in &report.last_seen {
        writeln!(
            target,
            "  {} {} {} {}",
            record.id,
            record.name,
            record.status,
            record.public_ip.as_deref().unwrap_or("-")
        )
        .ok();
    }
    for failure in &report.ingress_failures {
        writeln!(target, "ingress failed for {}: {}", failure.id, failure.message).ok();
    }
    writeln!(target, "deleted: {}", join_ids(&report.teardown.deleted)).ok();
    if !report.teardown.failed.is_empty() {
        let leaked = report.teardown.failed.iter().map(|failure| &failure.id);
        writeln!(
            target,
            "LEAKED (delete manually or run `vmlease sweep --id <ID>`): {}",
            join_ids(leaked)
        )
        .ok();
        for failure in &report.teardown.failed {
            writeln!(target, "  {}: {}", failure.id, failure.message).ok();
        }
    }
}

fn write_sweep_summary(mut target: impl Write, summary: &SweepSummary) {
    writeln!(target, "matched: {}", join_ids(&summary.matched)).ok();
    writeln!(target, "deleted: {}", join_ids(&summary.deleted)).ok();
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
