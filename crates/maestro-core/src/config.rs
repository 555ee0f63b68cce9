//! Daemon configuration.

use std::path::PathBuf;

/// Process-wide parameters, immutable after startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace for every label the daemon reads or writes.
    pub label_prefix: String,
    /// Where a target's data directory is mounted inside companions.
    pub bind_path: String,

    /// Companion container name formats; `{name}` is replaced by the backup
    /// stream name.
    pub backup_name_format: String,
    pub restore_name_format: String,
    pub force_name_format: String,

    /// Image tags used when a template builds its own image.
    pub backup_tag: String,
    pub restore_tag: String,
    pub force_tag: String,

    pub backup_template_path: PathBuf,
    pub restore_template_path: PathBuf,
    pub force_template_path: PathBuf,

    /// Mount primary-path binds read-write even for companions.
    pub always_rw: bool,
    /// Use the legacy image builder instead of BuildKit.
    pub builder_v1: bool,
    /// Take the restore template verbatim instead of overlaying it onto the
    /// backuper template.
    pub no_restore_overlay: bool,
    /// Same for the force-backup template.
    pub no_force_overlay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            label_prefix: "docker-backup-maestro".to_string(),
            bind_path: "/data".to_string(),
            backup_name_format: "docker-backup-maestro.backup_{name}".to_string(),
            restore_name_format: "docker-backup-maestro.restore_{name}".to_string(),
            force_name_format: "docker-backup-maestro.forcebackup_{name}".to_string(),
            backup_tag: "maestro-backup".to_string(),
            restore_tag: "maestro-restore".to_string(),
            force_tag: "maestro-forcebackup".to_string(),
            backup_template_path: PathBuf::from("/root/backup_tmpl.yml"),
            restore_template_path: PathBuf::from("/root/restore_tmpl.yml"),
            force_template_path: PathBuf::from("/root/forcebackup_tmpl.yml"),
            always_rw: false,
            builder_v1: false,
            no_restore_overlay: false,
            no_force_overlay: false,
        }
    }
}

/// Expands a container name format by substituting `{name}`.
pub fn container_name(format: &str, name: &str) -> String {
    format.replace("{name}", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.label_prefix, "docker-backup-maestro");
        assert_eq!(config.bind_path, "/data");
        assert_eq!(
            config.backup_name_format,
            "docker-backup-maestro.backup_{name}"
        );
        assert!(!config.always_rw);
    }

    #[test]
    fn test_container_name_substitution() {
        assert_eq!(
            container_name("docker-backup-maestro.backup_{name}", "example"),
            "docker-backup-maestro.backup_example"
        );
        assert_eq!(container_name("static", "example"), "static");
    }
}
