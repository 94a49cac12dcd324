use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kubesweep_core::{ReconciliationResult, Reconciler, RunConfig, SweepError};
use kubesweep_k8s::ClientFactory;

mod config;

use config::FileConfig;

/// Kubesweep - find and remove dangling pods, PVCs and LoadBalancer services
#[derive(Parser, Debug)]
#[command(name = "kubesweep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.kubesweep/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Result format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report dangling resources without deleting anything
    Scan {
        #[command(flatten)]
        target: Target,
    },

    /// Delete completed pods past retention and the resources they leave behind
    Delete {
        #[command(flatten)]
        target: Target,

        /// Delete pods that finished more than this many hours ago [default: 24]
        #[arg(short = 't', long, value_name = "HOURS")]
        delete_before_hours: Option<u32>,

        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(clap::Args, Debug)]
struct Target {
    /// Cluster to sweep (kubeconfig context or cluster name)
    #[arg(short, long)]
    cluster: String,

    /// Namespace to sweep (default: all namespaces)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Cancel the run after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

/// 2 for mistakes in the invocation, 1 for everything else
fn exit_status(error: &anyhow::Error) -> u8 {
    let user_error = error
        .downcast_ref::<SweepError>()
        .is_some_and(SweepError::is_user_error);
    if user_error { 2 } else { 1 }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "warn,kubesweep={0},kubesweep_core={0},kubesweep_k8s={0}",
            level
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let file = FileConfig::load(cli.config.as_deref())?;

    let (target, config) = match cli.command {
        Command::Scan { target } => {
            let config = file.run_config(target.namespace.clone(), None, true);
            (target, config)
        }
        Command::Delete {
            target,
            delete_before_hours,
            dry_run,
        } => {
            let config = file.run_config(target.namespace.clone(), delete_before_hours, dry_run);
            (target, config)
        }
    };

    announce(&target.cluster, &config);

    let client = file
        .client_factory()
        .connect(&target.cluster)
        .await
        .with_context(|| format!("Failed to connect to cluster '{}'", target.cluster))?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone(), file.timeout(target.timeout));

    let result = Reconciler::new(client.as_ref(), config)
        .run(&cancel)
        .await
        .with_context(|| format!("Sweep of cluster '{}' failed", target.cluster))?;

    print_result(&result, cli.output)?;

    if result.cancelled {
        anyhow::bail!("Sweep was cancelled before all deletions completed");
    }
    Ok(())
}

fn announce(cluster: &str, config: &RunConfig) {
    let verb = if config.dry_run { "Scanning" } else { "Deleting resources in" };
    match &config.namespace {
        Some(namespace) => info!("{} cluster {} in namespace {}", verb, cluster, namespace),
        None => info!("{} cluster {} across all namespaces", verb, cluster),
    }
}

/// Cancel on Ctrl-C or when the deadline passes
fn cancel_on_interrupt(cancel: CancellationToken, timeout: Option<Duration>) {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, cancelling sweep"),
            _ = deadline => warn!(?timeout, "Deadline reached, cancelling sweep"),
        }
        cancel.cancel();
    });
}

fn print_result(result: &ReconciliationResult, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Text => print!("{}", result),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(result).context("Failed to encode result")?;
            println!("{}", json);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cluster_is_required() {
        let err = Cli::try_parse_from(["kubesweep", "scan"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_delete_flags() {
        let cli = Cli::try_parse_from([
            "kubesweep",
            "delete",
            "-c",
            "prod",
            "-n",
            "batch",
            "-t",
            "12",
            "--dry-run",
        ])
        .unwrap();

        match cli.command {
            Command::Delete {
                target,
                delete_before_hours,
                dry_run,
            } => {
                assert_eq!(target.cluster, "prod");
                assert_eq!(target.namespace.as_deref(), Some("batch"));
                assert_eq!(delete_before_hours, Some(12));
                assert!(dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_exit_status_for_unknown_namespace() {
        let missing = anyhow::Error::new(SweepError::NamespaceNotFound {
            namespace: "nope".to_string(),
        })
        .context("Sweep of cluster 'prod' failed");
        assert_eq!(exit_status(&missing), 2);

        let cancelled = anyhow::Error::new(SweepError::Cancelled).context("Sweep failed");
        assert_eq!(exit_status(&cancelled), 1);
    }

    #[test]
    fn test_scan_has_no_retention_flag() {
        assert!(Cli::try_parse_from(["kubesweep", "scan", "-c", "prod", "-t", "5"]).is_err());
    }
}
