//! # apigwctl
//!
//! Command-line driver for the APIGW resources. It plays the part of the
//! orchestration host: specs and states are JSON documents, and every
//! command runs one CRUD entry point of one resource type.
//!
//! ```bash
//! apigwctl types
//! apigwctl import opentelekomcloud_apigw_api_v2 gw-id/get_order
//! apigwctl apply opentelekomcloud_apigw_group_v2 --spec group.json --state group.state.json
//! apigwctl delete opentelekomcloud_apigw_group_v2 --state group.state.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use otc_apigw::observability::init_logging;
use otc_apigw::{Plan, Provider, ProviderConfig};

#[derive(Parser)]
#[command(name = "apigwctl")]
#[command(version)]
#[command(about = "Reconcile Open Telekom Cloud API Gateway resources", long_about = None)]
struct Cli {
    /// Provider configuration file (YAML, or JSON with a .json extension)
    #[arg(long, short, env = "APIGWCTL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the supported resource types
    Types,
    /// Show what apply would do
    Plan {
        resource_type: String,
        #[arg(long)]
        spec: PathBuf,
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Create or update a resource so that it matches a spec
    Apply {
        resource_type: String,
        #[arg(long)]
        spec: PathBuf,
        /// Prior state; absent means create
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Refresh a state from the service
    Read {
        resource_type: String,
        #[arg(long)]
        state: PathBuf,
    },
    /// Import an existing object by its composite id
    Import { resource_type: String, id: String },
    /// Delete the object behind a state
    Delete {
        resource_type: String,
        #[arg(long)]
        state: PathBuf,
    },
}

async fn load_config(path: Option<&Path>) -> Result<ProviderConfig> {
    let config = match path {
        Some(path) if path.extension().is_some_and(|ext| ext == "json") => {
            ProviderConfig::load_from_json(path).await?
        }
        Some(path) => ProviderConfig::load_from_file(path).await?,
        None => {
            let mut config = ProviderConfig::new("eu-de", "");
            config.apply_env_overrides()?;
            config.validate()?;
            config
        }
    };
    Ok(config)
}

async fn read_json(path: &Path) -> Result<Value> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

async fn read_optional(path: Option<&Path>) -> Result<Option<Value>> {
    match path {
        Some(path) => Ok(Some(read_json(path).await?)),
        None => Ok(None),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancel in-flight polling on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the running operation");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).await?;
    init_logging(&config.logging);

    let provider = Provider::new(config)?;

    match cli.command {
        Command::Types => {
            for type_name in provider.registry().type_names() {
                println!("{}", type_name);
            }
        }
        Command::Plan {
            resource_type,
            spec,
            state,
        } => {
            let resource = provider.resource(&resource_type)?;
            let prior = read_optional(state.as_deref()).await?;
            let desired = read_json(&spec).await?;
            match resource.plan(prior.as_ref(), &desired)? {
                Plan::Create => println!("create"),
                Plan::NoOp => println!("no changes"),
                Plan::Update => println!("update in place"),
                Plan::Replace { fields } => println!("replace (forced by {})", fields.join(", ")),
            }
        }
        Command::Apply {
            resource_type,
            spec,
            state,
        } => {
            let resource = provider.resource(&resource_type)?;
            let prior = read_optional(state.as_deref()).await?;
            let desired = read_json(&spec).await?;
            let ctx = provider.context_with_cancellation(cancel_on_interrupt())?;
            let applied = resource.apply(&ctx, prior.as_ref(), &desired).await?;
            print_json(&applied)?;
        }
        Command::Read {
            resource_type,
            state,
        } => {
            let resource = provider.resource(&resource_type)?;
            let state = read_json(&state).await?;
            let ctx = provider.context()?;
            match resource.read(&ctx, &state).await? {
                Some(fresh) => print_json(&fresh)?,
                None => bail!("{} no longer exists", resource_type),
            }
        }
        Command::Import { resource_type, id } => {
            let resource = provider.resource(&resource_type)?;
            let ctx = provider.context()?;
            print_json(&resource.import(&ctx, &id).await?)?;
        }
        Command::Delete {
            resource_type,
            state,
        } => {
            let resource = provider.resource(&resource_type)?;
            let state = read_json(&state).await?;
            let ctx = provider.context_with_cancellation(cancel_on_interrupt())?;
            resource.delete(&ctx, &state).await?;
            info!(resource = %resource_type, "Deleted");
        }
    }

    Ok(())
}
