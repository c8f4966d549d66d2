use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hearth_core::SourceKind;
use hearth_store::{
    AddonService, CatalogRefreshScheduler, CreateSourceRequest, HearthConfig, InstallResult,
    ServiceSeams, UpdateSourceRequest,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(
    name = "hearth",
    version,
    about = "Hearth addon manager: catalogs, installs and lifecycle"
)]
struct Cli {
    /// Config file (defaults to $HEARTH_CONFIG, ./hearth.toml, ~/.config/hearth/hearth.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `paths.data_dir`
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List merged catalog entries, optionally filtered
    List { query: Option<String> },
    /// Show one merged catalog entry
    Show { id: String },
    /// Install an addon from its winning catalog entry
    Install {
        id: String,
        /// Replace an existing install
        #[arg(long)]
        force: bool,
    },
    /// Uninstall an addon
    Uninstall {
        id: String,
        /// Move the files to the retained dir instead of deleting them
        #[arg(long)]
        keep_files: bool,
    },
    /// Lifecycle status of one addon, or of all known addons
    Status { id: Option<String> },
    /// Re-read catalog sources and cached catalogs
    Reload,
    /// Fetch remote catalogs now
    Refresh,
    /// Manifests that failed to load
    Errors,
    /// Manage catalog sources
    Sources {
        #[command(subcommand)]
        action: SourcesCommand,
    },
    /// Start up and keep remote catalogs fresh until Ctrl-C
    Serve,
}

#[derive(Subcommand)]
enum SourcesCommand {
    List,
    Add {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        trusted: bool,
        #[arg(long)]
        disabled: bool,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        trusted: Option<bool>,
    },
    Delete {
        id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Local,
    Remote,
}

impl From<KindArg> for SourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Local => SourceKind::Local,
            KindArg::Remote => SourceKind::Remote,
        }
    }
}

fn init_logging(json: bool) {
    // stderr only; stdout carries the JSON results
    let builder = fmt()
        .with_env_filter(EnvFilter::from_env("HEARTH_LOG"))
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_result(result: &InstallResult) -> Result<ExitCode> {
    print_json(result)?;
    Ok(if result.is_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let mut config = HearthConfig::discover(cli.config.as_deref()).context("loading config")?;
    if let Some(data_dir) = cli.data_dir {
        config.paths.data_dir = data_dir;
    }
    tracing::debug!(data_dir = %config.paths.data_dir.display(), "Configuration loaded");

    let seams = ServiceSeams::from_config(&config)?;
    let service = Arc::new(AddonService::new(config, seams)?);

    if !matches!(cli.command, Command::Serve) {
        service.prepare().await?;
    }

    match cli.command {
        Command::List { query } => print_json(&service.list_merged(query.as_deref()).await)?,
        Command::Show { id } => print_json(&service.get_entry(&id).await?)?,
        Command::Install { id, force } => return print_result(&service.install(&id, force).await),
        Command::Uninstall { id, keep_files } => {
            return print_result(&service.uninstall(&id, !keep_files).await);
        }
        Command::Status { id: Some(id) } => print_json(&service.status(&id).await?)?,
        Command::Status { id: None } => print_json(&service.status_all().await?)?,
        Command::Reload => print_json(&service.reload_catalog().await?)?,
        Command::Refresh => print_json(&service.refresh_catalogs().await?)?,
        Command::Errors => print_json(&service.manifest_errors().await)?,
        Command::Sources { action } => sources(&service, action).await?,
        Command::Serve => return serve(service).await,
    }
    Ok(ExitCode::SUCCESS)
}

async fn sources(service: &AddonService, action: SourcesCommand) -> Result<()> {
    match action {
        SourcesCommand::List => print_json(&service.list_sources().await?),
        SourcesCommand::Add {
            kind,
            name,
            url,
            path,
            trusted,
            disabled,
        } => {
            let req = CreateSourceRequest {
                name,
                kind: Some(kind.into()),
                url,
                path,
                enabled: !disabled,
                trusted,
            };
            print_json(&service.add_source(req).await?)
        }
        SourcesCommand::Update {
            id,
            name,
            url,
            path,
            enabled,
            trusted,
        } => {
            let req = UpdateSourceRequest {
                name,
                url,
                path,
                enabled,
                trusted,
            };
            print_json(&service.update_source(&id, req).await?)
        }
        SourcesCommand::Delete { id } => {
            service.delete_source(&id).await?;
            print_json(&serde_json::json!({ "deleted": id }))
        }
    }
}

async fn serve(service: Arc<AddonService>) -> Result<ExitCode> {
    service.startup().await?;

    let cancel = CancellationToken::new();
    let interval = service.config().refresh_interval();
    let scheduler = CatalogRefreshScheduler::spawn(service.clone(), interval, cancel.clone());
    tracing::info!("Hearth serving; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    cancel.cancel();
    scheduler.shutdown().await;
    Ok(ExitCode::SUCCESS)
}
