//! bpmn-scaffold
//!
//! Generates persistence, cache and HTTP scaffolding for deployed BPMN
//! processes, either behind an HTTP API or offline.
//!
//! # Usage
//!
//! ```bash
//! # Write the shared registry files into the target service
//! bpmn-scaffold init
//!
//! # Generate from a local model without an engine
//! bpmn-scaffold generate --bpmn resources/order.bpmn --version 1 --key 2251799813685249
//!
//! # Report generated files edited or removed since generation
//! bpmn-scaffold verify
//!
//! # Serve the HTTP API
//! bpmn-scaffold serve
//! ```

mod api;
mod settings;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bpmn_scaffold_core::extract::extract_processes;
use bpmn_scaffold_core::{
    DeploymentAdapter, Pipeline, ProcessMetadata, ScaffoldConfig, Scaffolder, UnconfiguredDeployer,
    ZeebeRestDeployer,
};

use crate::api::{create_router, AppState};
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "bpmn-scaffold")]
#[command(version)]
#[command(about = "Generate CRUD scaffolding for deployed BPMN processes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Scaffold configuration file (overrides SCAFFOLD_CONFIG)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve,

    /// Write the shared registry skeletons that are missing from the target
    Init,

    /// Generate scaffolding for a model file without contacting an engine
    Generate {
        /// BPMN model file
        #[arg(long)]
        bpmn: PathBuf,

        /// Deployed process version
        #[arg(long)]
        version: i32,

        /// Process definition key assigned by the engine
        #[arg(long)]
        key: i64,

        /// Process to generate (defaults to the first process in the model)
        #[arg(long)]
        process_id: Option<String>,

        /// Resource name recorded in the generated constants (defaults to the file name)
        #[arg(long)]
        resource_name: Option<String>,
    },

    /// Compare the manifest with the target tree
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bpmn_scaffold=info,tower_http=debug")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let config_path = cli.config.clone().or_else(|| settings.config_path.clone());
    let config = ScaffoldConfig::load(config_path.as_deref())
        .context("failed to load scaffold configuration")?;
    let scaffolder = Scaffolder::new(config).context("failed to prepare templates")?;

    match cli.command {
        Commands::Serve => serve(settings, scaffolder).await,
        Commands::Init => {
            let created = scaffolder.init_target()?;
            for path in &created {
                println!("created {}", path.display());
            }
            if created.is_empty() {
                println!("target already initialized");
            }
            Ok(())
        }
        Commands::Generate {
            bpmn,
            version,
            key,
            process_id,
            resource_name,
        } => generate(&scaffolder, &bpmn, version, key, process_id, resource_name),
        Commands::Verify => {
            let drift = scaffolder.verify()?;
            if drift.is_empty() {
                println!("no drift");
                return Ok(());
            }
            for d in &drift {
                println!("{:?}\t{}\t{}", d.kind, d.entity, d.path.display());
            }
            bail!("{} generated artifact(s) drifted", drift.len())
        }
    }
}

async fn serve(settings: Settings, scaffolder: Scaffolder) -> Result<()> {
    let deployer: Arc<dyn DeploymentAdapter> = match settings.zeebe.clone() {
        Some(zeebe) => {
            info!(url = %zeebe.base_url, "Deploying through the engine REST API");
            Arc::new(ZeebeRestDeployer::new(zeebe)?)
        }
        None => {
            warn!("ZEEBE_REST_URL is not set, deploy endpoints will fail");
            Arc::new(UnconfiguredDeployer)
        }
    };

    let state = AppState {
        pipeline: Pipeline::new(Arc::new(scaffolder), deployer),
        resources_dir: settings.resources_dir.clone(),
    };
    let app = create_router(state);

    info!("Starting server on {}", settings.addr);
    let listener = tokio::net::TcpListener::bind(settings.addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn generate(
    scaffolder: &Scaffolder,
    bpmn: &Path,
    version: i32,
    key: i64,
    process_id: Option<String>,
    resource_name: Option<String>,
) -> Result<()> {
    let model = std::fs::read(bpmn).with_context(|| format!("failed to read {}", bpmn.display()))?;

    let process_id = match process_id {
        Some(id) => id,
        None => {
            let processes = extract_processes(&model, scaffolder.config().duplicate_extensions)?;
            if processes.len() > 1 {
                warn!(
                    count = processes.len(),
                    "Model declares several processes, generating the first; pass --process-id to choose"
                );
            }
            match processes.into_iter().next() {
                Some(p) => p.id,
                None => bail!("{} declares no process", bpmn.display()),
            }
        }
    };

    let resource_name = match resource_name {
        Some(name) => name,
        None => bpmn
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("--bpmn has no file name")?,
    };

    let metadata = ProcessMetadata {
        bpmn_process_id: process_id,
        version,
        process_definition_key: key,
        resource_name,
    };
    let report = scaffolder.generate_deployment(&model, &[metadata])?;

    for entity in &report.entities {
        println!(
            "{}: {} written, {} unchanged",
            entity.entity,
            entity.written.len(),
            entity.unchanged.len()
        );
    }
    Ok(())
}
