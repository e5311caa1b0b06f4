use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod buildagent;
mod crdgen;
mod dashboard;
mod deps;
mod dse;
mod error;
mod k8s;
mod providers;
mod runner;
mod settings;
mod sync;

use settings::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about = "A per-developer local Kubernetes CI/CD control plane")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the DevStagingEnvironment and CIRunnerPool reconcilers
    #[command(visible_alias = "op")]
    Operator,
    /// Run the build-agent sidecar loop over a shared builds directory
    BuildAgent {
        /// Shared scratch directory watched for requests
        #[arg(long, default_value = "/builds")]
        dir: PathBuf,
    },
    /// Run the dashboard REST API server
    #[command(visible_alias = "dash")]
    Dashboard {
        /// Bind host (overrides configuration)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides configuration)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Sync local sources into a running deployment
    Sync {
        /// Target deployment name
        deployment: String,
        #[arg(long, short, default_value = "default")]
        namespace: String,
        /// Local source directory
        #[arg(long, default_value = ".")]
        src: PathBuf,
        /// Destination directory inside the container
        #[arg(long)]
        dest: Option<String>,
        /// Target container (defaults to the first container)
        #[arg(long)]
        container: Option<String>,
        /// Restart the workload after each sync
        #[arg(long)]
        restart: bool,
        /// Keep watching for changes until interrupted
        #[arg(long, short)]
        watch: bool,
    },
    /// Print the CRD manifests for kubectl apply
    Crd,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::load().context("failed to load configuration")?;

    match cli.command {
        Commands::Operator => {
            let client = k8s::client::create_client().await?;
            info!("starting kindling operator");
            tokio::join!(
                dse::controller::run(client.clone(), settings.operator.clone()),
                runner::controller::run(client, settings.clone()),
            );
        }
        Commands::BuildAgent { dir } => {
            buildagent::BuildAgent::new(dir, settings).run().await?;
        }
        Commands::Dashboard { host, port } => {
            let mut settings = settings;
            if let Some(host) = host {
                settings.dashboard.host = host;
            }
            if let Some(port) = port {
                settings.dashboard.port = port;
            }
            dashboard::run_server(settings).await?;
        }
        Commands::Sync {
            deployment,
            namespace,
            src,
            dest,
            container,
            restart,
            watch,
        } => {
            let options = sync::SyncOptions {
                deployment,
                namespace,
                src,
                dest: dest.unwrap_or_else(|| sync::SyncOptions::default_dest().to_string()),
                container,
                restart,
            };
            let engine = sync::SyncEngine::new(options, settings.sync.clone());
            let mut plan = engine.prepare().await?;
            engine.flush(&mut plan, None).await?;
            info!(
                "synced (runtime: {}, mode: {})",
                plan.detected.runtime,
                sync::mode_str(plan.detected.mode())
            );

            if watch {
                let debounce = std::time::Duration::from_millis(settings.sync.debounce_ms);
                let handle = sync::spawn_session(engine, plan, debounce);
                info!("watching for changes; press Ctrl+C to stop and restore");
                tokio::signal::ctrl_c().await?;
                handle.stop().await;
            }
        }
        Commands::Crd => {
            print!("{}", crdgen::manifests()?);
        }
    }

    Ok(())
}
