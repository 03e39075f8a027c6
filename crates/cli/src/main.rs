//! kdeploy CLI
//!
//! Deploys a containerized web frontend to Kubernetes with a zero-downtime
//! rolling update, then verifies it.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use deploy_lib::{ClusterApi, DeployMetrics, ExitOutcome, KubeCluster, ResourceDescriptor};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{DeployConfig, DescriptorArgs};
use output::{print_failure, OutputFormat};

/// Zero-downtime release orchestrator for Kubernetes
#[derive(Parser)]
#[command(name = "kdeploy")]
#[command(author, version, about = "Zero-downtime release orchestrator for Kubernetes", long_about = None)]
pub struct Cli {
    /// Config file (defaults to ~/.config/kdeploy/config.toml)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Structured run log, appended to
    #[arg(long, env = "KDEPLOY_LOG_FILE", default_value = ".kdeploy.log", global = true)]
    pub log_file: PathBuf,

    /// Write Prometheus metrics to this file when the run ends
    #[arg(long, global = true)]
    pub metrics_file: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Also log progress to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile, roll out and verify a release
    Deploy {
        #[command(flatten)]
        release: DescriptorArgs,
    },

    /// Check a deployed release without changing it
    Verify {
        #[command(flatten)]
        release: DescriptorArgs,

        /// Also check backend connectivity from inside a pod
        #[arg(long)]
        check_backend: bool,
    },

    /// Show the rolling-update steps without touching the cluster
    Plan {
        #[command(flatten)]
        release: DescriptorArgs,

        /// Ready pods of the current version (defaults to the replica count)
        #[arg(long)]
        current_replicas: Option<u32>,
    },
}

impl Commands {
    fn release(&self) -> &DescriptorArgs {
        match self {
            Commands::Deploy { release }
            | Commands::Verify { release, .. }
            | Commands::Plan { release, .. } => release,
        }
    }
}

fn init_tracing(log_file: &Path, verbose: bool) {
    let file_layer = match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => Some(fmt::layer().json().with_writer(Mutex::new(file))),
        Err(e) => {
            eprintln!(
                "{} cannot open log file {}: {}",
                "[WARN]".yellow().bold(),
                log_file.display(),
                e
            );
            None
        }
    };
    let stderr_layer = verbose.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(file_layer)
        .with(stderr_layer)
        .init();
}

fn load_descriptor(cli: &Cli) -> Result<ResourceDescriptor> {
    let mut config = DeployConfig::load(cli.config.as_deref())?;
    cli.command.release().apply(&mut config);

    let descriptor = config
        .into_descriptor()
        .context("Invalid release configuration")?;
    descriptor
        .validate()
        .context("Invalid release configuration")?;
    debug!(
        namespace = %descriptor.namespace,
        release = %descriptor.release_name,
        image = %descriptor.image_reference(),
        "Release configuration loaded"
    );
    Ok(descriptor)
}

async fn connect(kubeconfig: Option<&Path>) -> Result<Arc<dyn ClusterApi>> {
    let cluster = KubeCluster::connect(kubeconfig)
        .await
        .context("Failed to load cluster credentials")?;
    Ok(Arc::new(cluster))
}

async fn run(cli: Cli) -> i32 {
    let descriptor = match load_descriptor(&cli) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            print_failure(ExitOutcome::FatalApplyFailure, &format!("{:#}", e), cli.format);
            return ExitOutcome::FatalApplyFailure.exit_code();
        }
    };
    let metrics = DeployMetrics::new();

    let result = match &cli.command {
        Commands::Plan {
            current_replicas, ..
        } => Ok(commands::plan::plan(&descriptor, *current_replicas, cli.format)),
        Commands::Deploy { .. } | Commands::Verify { .. } => {
            let cluster = match connect(cli.kubeconfig.as_deref()).await {
                Ok(cluster) => cluster,
                Err(e) => {
                    print_failure(ExitOutcome::PrereqFailure, &format!("{:#}", e), cli.format);
                    return ExitOutcome::PrereqFailure.exit_code();
                }
            };

            match &cli.command {
                Commands::Verify { check_backend, .. } => {
                    commands::verify::verify(
                        cluster,
                        &descriptor,
                        *check_backend,
                        metrics.clone(),
                        cli.format,
                    )
                    .await
                }
                _ => commands::deploy::deploy(cluster, &descriptor, metrics.clone(), cli.format).await,
            }
        }
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            print_failure(ExitOutcome::FatalApplyFailure, &format!("{:#}", e), cli.format);
            ExitOutcome::FatalApplyFailure.exit_code()
        }
    };

    if let Some(path) = &cli.metrics_file {
        if let Err(e) = metrics.write_textfile(path) {
            eprintln!(
                "{} cannot write metrics to {}: {}",
                "[WARN]".yellow().bold(),
                path.display(),
                e
            );
        }
    }
    code
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    output::init_colors();
    init_tracing(&cli.log_file, cli.verbose);

    let code = run(cli).await;
    std::process::exit(code);
}
