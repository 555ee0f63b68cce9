//! Label schema and per-target configuration derivation.
//!
//! All daemon state lives in container labels namespaced under a
//! configurable prefix. [`LabelSchema`] holds the fully qualified label
//! names for one prefix; two daemons with different prefixes ignore each
//! other's containers entirely.

use crate::template::{StringMap, Template};
use std::collections::HashMap;

/// Fully qualified label names for one prefix.
#[derive(Debug, Clone)]
pub struct LabelSchema {
    /// `<prefix>.backup.name` - marks a target and names its backup stream.
    pub backup_name: String,
    /// `<prefix>.backup.path` - single host path to bind at the bind path.
    pub backup_path: String,
    /// `<prefix>.backup.networks` - comma-separated networks to attach.
    pub backup_networks: String,
    /// `<prefix>.backup.volume` - prefix for raw extra binds.
    pub backup_volume: String,
    /// `<prefix>.backup.env.` - prefix for forwarded environment variables.
    pub backup_env_prefix: String,
    /// `<prefix>.backuper.name` - identifies a companion.
    pub backuper_name: String,
    /// `<prefix>.backuper.consistencyhash` - hash the companion was built from.
    pub backuper_consistency_hash: String,
    /// `<prefix>.restore` - marker on restore one-offs.
    pub restore: String,
    /// `<prefix>.forcebackup` - marker on force-backup one-offs.
    pub force_backup: String,
}

impl LabelSchema {
    pub fn new(prefix: &str) -> Self {
        let backup = format!("{prefix}.backup");
        let backuper = format!("{prefix}.backuper");

        LabelSchema {
            backup_name: format!("{backup}.name"),
            backup_path: format!("{backup}.path"),
            backup_networks: format!("{backup}.networks"),
            backup_volume: format!("{backup}.volume"),
            backup_env_prefix: format!("{backup}.env."),
            backuper_name: format!("{backuper}.name"),
            backuper_consistency_hash: format!("{backuper}.consistencyhash"),
            restore: format!("{prefix}.restore"),
            force_backup: format!("{prefix}.forcebackup"),
        }
    }

    /// Derives the target-specific template fields from a target's labels.
    ///
    /// The result carries only label-derived content plus the
    /// `backuper.name` identification label; it is meant to be overlaid
    /// onto a user template. Multi-path labels take precedence over the
    /// single-path label; primary-path binds get `:ro` unless `rw`.
    pub fn derive_template(
        &self,
        name: &str,
        target_labels: &HashMap<String, String>,
        bind_path: &str,
        rw: bool,
    ) -> Template {
        let mut volumes = Vec::new();

        let multi_path_prefix = format!("{}.", self.backup_path);
        for (label, host_path) in target_labels {
            if let Some(dir_name) = label.strip_prefix(&multi_path_prefix) {
                let mut bind = format!("{host_path}:{}", join_path(bind_path, dir_name));
                if !rw {
                    bind.push_str(":ro");
                }
                volumes.push(bind);
            }
        }

        if volumes.is_empty() {
            if let Some(host_path) = target_labels.get(&self.backup_path) {
                if !host_path.is_empty() {
                    let mut bind = format!("{host_path}:{bind_path}");
                    if !rw {
                        bind.push_str(":ro");
                    }
                    volumes.push(bind);
                }
            }
        }

        for (label, value) in target_labels {
            if label.starts_with(&self.backup_volume) {
                volumes.push(value.clone());
            }
        }

        let mut environment = StringMap::default();
        for (label, value) in target_labels {
            if let Some(var) = label.strip_prefix(&self.backup_env_prefix) {
                environment.0.insert(var.to_string(), value.clone());
            }
        }

        let networks = target_labels
            .get(&self.backup_networks)
            .map(|list| list.split(',').map(str::to_string).collect())
            .unwrap_or_default();

        let mut labels = StringMap::default();
        labels
            .0
            .insert(self.backuper_name.clone(), name.to_string());

        Template {
            labels,
            volumes,
            environment,
            networks,
            ..Default::default()
        }
    }
}

/// Whether `name` is acceptable as a backup stream name.
pub fn valid_backup_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn join_path(base: &str, child: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), child)
}
