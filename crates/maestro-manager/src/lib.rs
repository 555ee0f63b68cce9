//! Maestro Manager - reconciliation of backup companions
//!
//! The [`ContainerManager`] keeps one companion container alive for every
//! target labeled for backup: a snapshot reconciliation aligns companions
//! with targets, an engine event loop keeps them aligned at runtime, and
//! one-off restore / force-backup runs temporarily displace a companion.
//! All authoritative state lives in engine labels; every decision re-reads
//! them.

mod events;
mod images;
mod oneoff;
mod ops;

pub use ops::ListNamesOptions;

use maestro_core::{
    container_name, valid_backup_name, Config, LabelSchema, TemplateError, UserTemplates,
};
use maestro_engine::{ContainerSummary, EngineClient, EngineError, ListOptions};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Result type for manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;

/// Errors from reconciliation and management operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backup target '{0}' not found")]
    MissingTarget(String),

    #[error("companion container '{0}' is stopped or doesn't exist")]
    CompanionNotRunning(String),

    #[error("companion container '{0}' doesn't exist")]
    CompanionMissing(String),

    #[error("companion container '{0}' already exists, remove it first to recreate")]
    CompanionExists(String),

    #[error("{0} template not set")]
    TemplateNotSet(&'static str),

    #[error("no image in {0} template")]
    NoImage(&'static str),

    #[error("containers labeled {label}={value}: expected at most one, found {count}")]
    AmbiguousState {
        label: String,
        value: String,
        count: usize,
    },

    #[error("image pull failed: {0}")]
    PullFailed(String),

    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("build context '{0}' is not usable: {1}")]
    BuildContext(String, String),

    #[error("cannot decode {kind} progress line as JSON: {source}")]
    StreamDecode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot decode build aux payload: {0}")]
    AuxDecode(String),

    #[error("container '{id}' carries no '{label}' label value")]
    LabelValueMissing { id: String, label: String },

    #[error("error while listening for engine events: {0}")]
    EventStream(String),

    #[error("failed to restart companion for '{name}': {source}")]
    CompanionRestart {
        name: String,
        #[source]
        source: EngineError,
    },
}

/// Reconciles companion containers against backup targets.
pub struct ContainerManager {
    engine: Arc<dyn EngineClient>,
    templates: UserTemplates,
    config: Config,
    labels: LabelSchema,
}

impl ContainerManager {
    pub fn new(engine: Arc<dyn EngineClient>, templates: UserTemplates, config: Config) -> Self {
        let labels = LabelSchema::new(&config.label_prefix);
        ContainerManager {
            engine,
            templates,
            config,
            labels,
        }
    }

    /// Lists containers carrying the given label key.
    pub(crate) async fn list_with_label(
        &self,
        label: &str,
        all: bool,
    ) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .engine
            .list_containers(ListOptions::labeled(label, all))
            .await?)
    }

    /// Finds the single container labeled `label=value`.
    ///
    /// More than one match means an outside actor interfered and is reported
    /// as [`ManagerError::AmbiguousState`].
    pub(crate) async fn find_by_label_value(
        &self,
        label: &str,
        value: &str,
        all: bool,
    ) -> Result<Option<ContainerSummary>> {
        let mut matches = self
            .engine
            .list_containers(ListOptions::labeled(format!("{label}={value}"), all))
            .await?;

        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.remove(0))),
            count => Err(ManagerError::AmbiguousState {
                label: label.to_string(),
                value: value.to_string(),
                count,
            }),
        }
    }

    /// Snapshot reconciliation: drops dangling companions, then creates or
    /// updates a companion for every running target.
    pub(crate) async fn init_backupers(&self) -> Result<()> {
        let companions = self.list_with_label(&self.labels.backuper_name, true).await?;
        let targets = self.list_with_label(&self.labels.backup_name, false).await?;

        for companion in &companions {
            let name = companion
                .labels
                .get(&self.labels.backuper_name)
                .cloned()
                .unwrap_or_default();

            let matched = targets
                .iter()
                .any(|target| target.labels.get(&self.labels.backup_name) == Some(&name));

            if !matched {
                self.drop_backuper(&name).await?;
            }
        }

        for target in &targets {
            let name = target
                .labels
                .get(&self.labels.backup_name)
                .cloned()
                .unwrap_or_default();

            let companion = companions
                .iter()
                .find(|companion| companion.labels.get(&self.labels.backuper_name) == Some(&name));

            match companion {
                Some(companion) => self.update_backuper(target, companion).await?,
                None => self.create_backuper(&name).await?,
            }
        }

        Ok(())
    }

    /// Stops and removes the companion for `name`. A missing companion is
    /// logged and skipped.
    pub(crate) async fn drop_backuper(&self, name: &str) -> Result<()> {
        info!("dropping companion for '{name}'");

        let Some(companion) = self
            .find_by_label_value(&self.labels.backuper_name, name, true)
            .await?
        else {
            warn!("companion for '{name}' not found, skipping");
            return Ok(());
        };

        self.engine.stop_container(&companion.id).await?;
        self.engine.remove_container(&companion.id).await?;

        Ok(())
    }

    /// Creates the companion for `name` from the target's current labels.
    ///
    /// An invalid name is logged and swallowed - the target is simply not
    /// backed up. If a companion already exists (a snapshot racing the event
    /// loop), the call routes to [`Self::update_backuper`] instead.
    pub(crate) async fn create_backuper(&self, name: &str) -> Result<()> {
        info!("creating companion for '{name}'");

        if !valid_backup_name(name) {
            error!(
                "invalid backup name '{name}': only letters, digits, '-', '_' and '.' are allowed"
            );
            return Ok(());
        }

        if let Some(existing) = self
            .find_by_label_value(&self.labels.backuper_name, name, true)
            .await?
        {
            let target = self
                .find_by_label_value(&self.labels.backup_name, name, true)
                .await?
                .ok_or_else(|| ManagerError::MissingTarget(name.to_string()))?;
            return Box::pin(self.update_backuper(&target, &existing)).await;
        }

        let derived = self.prepare_backuper_config_for(name, false).await?;
        let mut config = self.templates.backuper.overlay(&derived);

        let hash = config.hash();
        config
            .labels
            .0
            .insert(self.labels.backuper_consistency_hash.clone(), hash);

        let container_name = container_name(&self.config.backup_name_format, name);
        let id = self
            .create_container(&config, &self.config.backup_tag, &container_name)
            .await?;
        self.engine.start_container(&id).await?;

        Ok(())
    }

    /// Recreates the companion when its stored consistency hash no longer
    /// matches the hash derived from the target's current labels.
    pub(crate) async fn update_backuper(
        &self,
        target: &ContainerSummary,
        companion: &ContainerSummary,
    ) -> Result<()> {
        let name = target
            .labels
            .get(&self.labels.backup_name)
            .cloned()
            .unwrap_or_default();

        debug!("syncing companion for '{name}'");

        let derived = self.prepare_backuper_config_for(&name, false).await?;
        let desired = self.templates.backuper.overlay(&derived);

        let current = companion
            .labels
            .get(&self.labels.backuper_consistency_hash)
            .map(String::as_str)
            .unwrap_or_default();

        if desired.hash() == current {
            debug!("companion for '{name}' is up to date");
            return Ok(());
        }

        info!("companion for '{name}' drifted from its target, recreating");
        self.drop_backuper(&name).await?;
        self.create_backuper(&name).await
    }

    /// Derives the per-target template from the target's labels.
    pub(crate) async fn prepare_backuper_config_for(
        &self,
        name: &str,
        rw: bool,
    ) -> Result<maestro_core::Template> {
        let target = self
            .find_by_label_value(&self.labels.backup_name, name, true)
            .await?
            .ok_or_else(|| ManagerError::MissingTarget(name.to_string()))?;

        Ok(self.labels.derive_template(
            name,
            &target.labels,
            &self.config.bind_path,
            rw || self.config.always_rw,
        ))
    }

    pub(crate) fn backup_name_of(&self, container: &ContainerSummary) -> Result<String> {
        container
            .labels
            .get(&self.labels.backup_name)
            .cloned()
            .ok_or_else(|| ManagerError::LabelValueMissing {
                id: container.id.clone(),
                label: self.labels.backup_name.clone(),
            })
    }
}
