//! Imperative management operations invoked by the CLI.
//!
//! Single-name operations fail when the targeted entity is missing; the
//! `*_all` variants stop at the first error.

use crate::{ContainerManager, ManagerError, Result};
use maestro_core::Template;
use tracing::info;

/// Which label the `list` operation scans.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListNamesOptions {
    /// Include stopped containers.
    pub all: bool,
    /// List companions instead of backup targets.
    pub backupers: bool,
    /// List restore one-offs.
    pub restores: bool,
    /// List force-backup one-offs.
    pub force_backups: bool,
}

impl ContainerManager {
    /// One-off restore for a single target.
    pub async fn restore(&self, name: &str) -> Result<()> {
        let template = self.restore_template()?;
        self.one_off(
            name,
            template,
            &self.labels.restore,
            &self.config.restore_name_format,
            &self.config.restore_tag,
        )
        .await
    }

    /// One-off restore for every backup target, including stopped ones.
    pub async fn restore_all(&self) -> Result<()> {
        self.restore_template()?;

        let targets = self.list_with_label(&self.labels.backup_name, true).await?;
        for target in targets {
            let name = self.backup_name_of(&target)?;
            info!("restoring '{name}'");
            self.restore(&name).await?;
        }

        Ok(())
    }

    /// One-off forced backup for a single target.
    pub async fn force_backup(&self, name: &str) -> Result<()> {
        let template = self.force_backup_template()?;
        self.one_off(
            name,
            template,
            &self.labels.force_backup,
            &self.config.force_name_format,
            &self.config.force_tag,
        )
        .await
    }

    /// One-off forced backup for every target.
    pub async fn force_backup_all(&self, include_stopped: bool) -> Result<()> {
        self.force_backup_template()?;

        let targets = self
            .list_with_label(&self.labels.backup_name, include_stopped)
            .await?;
        for target in targets {
            let name = self.backup_name_of(&target)?;
            info!("running forced backup for '{name}'");
            self.force_backup(&name).await?;
        }

        Ok(())
    }

    /// Stops the companion for `name`; it must currently be live.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let companion = self
            .find_by_label_value(&self.labels.backuper_name, name, false)
            .await?
            .ok_or_else(|| ManagerError::CompanionNotRunning(name.to_string()))?;

        info!("stopping companion for '{name}'");
        Ok(self.engine.stop_container(&companion.id).await?)
    }

    /// Stops every live companion.
    pub async fn stop_all(&self) -> Result<()> {
        for companion in self
            .list_with_label(&self.labels.backuper_name, false)
            .await?
        {
            info!(
                "stopping companion for '{}'",
                companion
                    .labels
                    .get(&self.labels.backuper_name)
                    .map(String::as_str)
                    .unwrap_or_default()
            );
            self.engine.stop_container(&companion.id).await?;
        }

        Ok(())
    }

    /// Starts a previously stopped companion.
    pub async fn start(&self, name: &str) -> Result<()> {
        let companion = self
            .find_by_label_value(&self.labels.backuper_name, name, true)
            .await?
            .ok_or_else(|| ManagerError::CompanionMissing(name.to_string()))?;

        info!("starting companion for '{name}'");
        Ok(self.engine.start_container(&companion.id).await?)
    }

    /// Starts every companion.
    pub async fn start_all(&self) -> Result<()> {
        for companion in self
            .list_with_label(&self.labels.backuper_name, true)
            .await?
        {
            info!(
                "starting companion for '{}'",
                companion
                    .labels
                    .get(&self.labels.backuper_name)
                    .map(String::as_str)
                    .unwrap_or_default()
            );
            self.engine.start_container(&companion.id).await?;
        }

        Ok(())
    }

    /// Stops and removes the companion for `name`.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let companion = self
            .find_by_label_value(&self.labels.backuper_name, name, true)
            .await?
            .ok_or_else(|| ManagerError::CompanionMissing(name.to_string()))?;

        self.engine.stop_container(&companion.id).await?;
        info!("removing companion for '{name}'");
        Ok(self.engine.remove_container(&companion.id).await?)
    }

    /// Stops and removes every companion.
    pub async fn remove_all(&self) -> Result<()> {
        for companion in self
            .list_with_label(&self.labels.backuper_name, true)
            .await?
        {
            self.engine.stop_container(&companion.id).await?;
            info!(
                "removing companion for '{}'",
                companion
                    .labels
                    .get(&self.labels.backuper_name)
                    .map(String::as_str)
                    .unwrap_or_default()
            );
            self.engine.remove_container(&companion.id).await?;
        }

        Ok(())
    }

    /// Creates the companion for `name`; fails when it already exists or no
    /// matching target does.
    pub async fn create(&self, name: &str) -> Result<()> {
        if self
            .find_by_label_value(&self.labels.backuper_name, name, true)
            .await?
            .is_some()
        {
            return Err(ManagerError::CompanionExists(name.to_string()));
        }

        self.find_by_label_value(&self.labels.backup_name, name, true)
            .await?
            .ok_or_else(|| ManagerError::MissingTarget(name.to_string()))?;

        self.create_backuper(name).await
    }

    /// Creates companions for all targets missing one.
    pub async fn create_all(&self) -> Result<()> {
        for target in self.list_with_label(&self.labels.backup_name, true).await? {
            let name = self.backup_name_of(&target)?;

            if self
                .find_by_label_value(&self.labels.backuper_name, &name, true)
                .await?
                .is_some()
            {
                info!("companion for '{name}' already exists, skipping");
                continue;
            }

            self.create_backuper(&name).await?;
        }

        Ok(())
    }

    /// Pulls the backuper template's image.
    pub async fn pull_backup(&self) -> Result<()> {
        let image = required_image(&self.templates.backuper, "backuper")?;
        self.pull_image(&image, true).await
    }

    /// Pulls the restore template's image.
    pub async fn pull_restore(&self) -> Result<()> {
        let image = required_image(self.restore_template()?, "restore")?;
        self.pull_image(&image, true).await
    }

    /// Pulls the force-backup template's image.
    pub async fn pull_force(&self) -> Result<()> {
        let image = required_image(self.force_backup_template()?, "force backup")?;
        self.pull_image(&image, true).await
    }

    /// Pulls every template image; build-only templates are skipped.
    pub async fn pull_all(&self) -> Result<()> {
        let variants = [
            Some(&self.templates.backuper),
            self.templates.restore.as_ref(),
            self.templates.force_backup.as_ref(),
        ];

        for template in variants.into_iter().flatten() {
            if template.image.is_empty() {
                continue;
            }
            self.pull_image(&template.image, true).await?;
        }

        Ok(())
    }

    /// Builds the backuper image when the template carries build
    /// instructions.
    pub async fn build_backup(&self) -> Result<()> {
        self.build_template_image(&self.templates.backuper, &self.config.backup_tag)
            .await
    }

    /// Builds the restore image.
    pub async fn build_restore(&self) -> Result<()> {
        let template = self.restore_template()?;
        self.build_template_image(template, &self.config.restore_tag).await
    }

    /// Builds the force-backup image.
    pub async fn build_force(&self) -> Result<()> {
        let template = self.force_backup_template()?;
        self.build_template_image(template, &self.config.force_tag).await
    }

    /// Builds every variant image that has build instructions.
    pub async fn build_all(&self) -> Result<()> {
        self.build_backup().await?;
        self.build_restore().await?;
        self.build_force().await
    }

    /// Collects the names behind the label selected by `opts`.
    pub async fn list_names(&self, opts: ListNamesOptions) -> Result<Vec<String>> {
        let label = if opts.backupers {
            &self.labels.backuper_name
        } else if opts.restores {
            &self.labels.restore
        } else if opts.force_backups {
            &self.labels.force_backup
        } else {
            &self.labels.backup_name
        };
        let label = label.clone();

        let containers = self.list_with_label(&label, opts.all).await?;

        let mut names = Vec::with_capacity(containers.len());
        for container in containers {
            let name = container.labels.get(&label).cloned().ok_or_else(|| {
                ManagerError::LabelValueMissing {
                    id: container.id.clone(),
                    label: label.clone(),
                }
            })?;
            names.push(name);
        }

        Ok(names)
    }

    async fn build_template_image(&self, template: &Template, tag: &str) -> Result<()> {
        let (build, spec) = template.create_config(tag)?;

        if let Some(build) = build {
            info!("building {}", spec.container.image);
            self.build_image(&build, &spec.container.image, true).await?;
        }

        Ok(())
    }

    fn restore_template(&self) -> Result<&Template> {
        self.templates
            .restore
            .as_ref()
            .ok_or(ManagerError::TemplateNotSet("restore"))
    }

    fn force_backup_template(&self) -> Result<&Template> {
        self.templates
            .force_backup
            .as_ref()
            .ok_or(ManagerError::TemplateNotSet("force backup"))
    }
}

fn required_image(template: &Template, variant: &'static str) -> Result<String> {
    if template.image.is_empty() {
        return Err(ManagerError::NoImage(variant));
    }
    Ok(template.image.clone())
}
