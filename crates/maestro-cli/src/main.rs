//! maestro - keeps a backup companion container alive for every container
//! labeled for backup, and runs one-off restore / force-backup containers on
//! demand.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::ConfigArgs;
use maestro_core::{Template, UserTemplates};
use maestro_engine::DockerEngine;
use maestro_manager::{ContainerManager, ListNamesOptions};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

#[derive(Parser)]
#[command(
    name = "maestro",
    version,
    about = "Automatically maintains backup containers for labeled targets"
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(long, default_value = "compact", env = "LOG_FORMAT", global = true)]
    log_format: String,

    #[command(flatten)]
    config: ConfigArgs,

    /// Without a subcommand the reconciliation daemon runs until signalled.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a one-off restore for a backup target
    Restore { name: String },
    /// Run a one-off restore for every backup target (including stopped)
    RestoreAll,
    /// Run a one-off forced backup for a backup target
    ForceBackup { name: String },
    /// Run a one-off forced backup for every backup target
    ForceBackupAll {
        /// Include stopped targets
        #[arg(long)]
        include_stopped: bool,
    },
    /// Build backup, restore and force-backup images
    BuildAll,
    /// Build the backup image
    BuildBackup,
    /// Build the restore image
    BuildRestore,
    /// Build the force-backup image
    BuildForce,
    /// Pull backup, restore and force-backup images
    PullAll,
    /// Pull the backup image
    PullBackup,
    /// Pull the restore image
    PullRestore,
    /// Pull the force-backup image
    PullForceBackup,
    /// Stop a companion container
    Stop { name: String },
    /// Stop all companion containers
    StopAll,
    /// Start a previously stopped companion container
    Start { name: String },
    /// Start all companion containers
    StartAll,
    /// Create a companion container
    Create { name: String },
    /// Create companion containers for all targets
    CreateAll,
    /// Remove a companion container
    Remove { name: String },
    /// Remove all companion containers
    RemoveAll,
    /// List backup names
    List {
        /// Include stopped containers
        #[arg(long)]
        all: bool,
        /// List companions instead of targets
        #[arg(long)]
        backup: bool,
        /// List restore one-offs
        #[arg(long)]
        restore: bool,
        /// List force-backup one-offs
        #[arg(long)]
        force_backup: bool,
    },
}

fn init_tracing(level: &str, format: &str) {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::new(format!(
            "maestro={level},\
             maestro_cli={level},\
             maestro_core={level},\
             maestro_engine={level},\
             maestro_manager={level},\
             bollard=warn,\
             hyper=warn",
            level = level
        )),
    };

    let fmt_layer = match format {
        "full" => tracing_subscriber::fmt::layer().with_target(true).boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set global default subscriber");
}

fn load_templates(config: &maestro_core::Config) -> anyhow::Result<UserTemplates> {
    let backuper = Template::load_required(&config.backup_template_path)?;
    let restore = Template::load_optional(&config.restore_template_path)?;
    let force_backup = Template::load_optional(&config.force_template_path)?;

    Ok(UserTemplates::resolve(
        backuper,
        restore,
        force_backup,
        config.no_restore_overlay,
        config.no_force_overlay,
    ))
}

async fn run_daemon(manager: &ContainerManager) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_shutdown_signal().await;
            info!("received shutdown signal");
            shutdown.cancel();
        }
    });

    info!("starting maestro");
    manager.run(shutdown).await?;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, &cli.log_format);

    let config = cli.config.into_config();

    let docker = bollard::Docker::connect_with_local_defaults()
        .context("failed to create engine client")?;
    let engine = Arc::new(DockerEngine::new(Arc::new(docker)));

    let templates = load_templates(&config)?;
    let manager = ContainerManager::new(engine, templates, config);

    match cli.command {
        None => run_daemon(&manager).await?,
        Some(Command::Restore { name }) => manager.restore(&name).await?,
        Some(Command::RestoreAll) => manager.restore_all().await?,
        Some(Command::ForceBackup { name }) => manager.force_backup(&name).await?,
        Some(Command::ForceBackupAll { include_stopped }) => {
            manager.force_backup_all(include_stopped).await?
        }
        Some(Command::BuildAll) => manager.build_all().await?,
        Some(Command::BuildBackup) => manager.build_backup().await?,
        Some(Command::BuildRestore) => manager.build_restore().await?,
        Some(Command::BuildForce) => manager.build_force().await?,
        Some(Command::PullAll) => manager.pull_all().await?,
        Some(Command::PullBackup) => manager.pull_backup().await?,
        Some(Command::PullRestore) => manager.pull_restore().await?,
        Some(Command::PullForceBackup) => manager.pull_force().await?,
        Some(Command::Stop { name }) => manager.stop(&name).await?,
        Some(Command::StopAll) => manager.stop_all().await?,
        Some(Command::Start { name }) => manager.start(&name).await?,
        Some(Command::StartAll) => manager.start_all().await?,
        Some(Command::Create { name }) => manager.create(&name).await?,
        Some(Command::CreateAll) => manager.create_all().await?,
        Some(Command::Remove { name }) => manager.remove(&name).await?,
        Some(Command::RemoveAll) => manager.remove_all().await?,
        Some(Command::List {
            all,
            backup,
            restore,
            force_backup,
        }) => {
            let names = manager
                .list_names(ListNamesOptions {
                    all,
                    backupers: backup,
                    restores: restore,
                    force_backups: force_backup,
                })
                .await?;
            for name in names {
                println!("{name}");
            }
        }
    }

    Ok(())
}
