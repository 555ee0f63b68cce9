//! Environment-backed configuration flags.

use clap::Args;
use maestro_core::Config;
use std::path::PathBuf;

/// Daemon configuration; every flag can also be set through its environment
/// variable.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Path inside companion containers where the target's data is mounted
    #[arg(long, env = "BIND_PATH", default_value = "/data", global = true)]
    bind_path: String,

    /// Namespace prefix for all labels the daemon reads and writes
    #[arg(
        long,
        env = "LABEL_PREFIX",
        default_value = "docker-backup-maestro",
        global = true
    )]
    label_prefix: String,

    /// Backuper template file
    #[arg(
        long,
        env = "BACKUP_TMPL_PATH",
        default_value = "/root/backup_tmpl.yml",
        global = true
    )]
    backup_tmpl_path: PathBuf,

    /// Restore template file
    #[arg(
        long,
        env = "RESTORE_TMPL_PATH",
        default_value = "/root/restore_tmpl.yml",
        global = true
    )]
    restore_tmpl_path: PathBuf,

    /// Force-backup template file
    #[arg(
        long,
        env = "FORCEBACKUP_TMPL_PATH",
        default_value = "/root/forcebackup_tmpl.yml",
        global = true
    )]
    forcebackup_tmpl_path: PathBuf,

    /// Companion container name format ({name} is the backup name)
    #[arg(
        long,
        env = "BACKUP_NAME_FORMAT",
        default_value = "docker-backup-maestro.backup_{name}",
        global = true
    )]
    backup_name_format: String,

    /// Restore one-off container name format
    #[arg(
        long,
        env = "RESTORE_NAME_FORMAT",
        default_value = "docker-backup-maestro.restore_{name}",
        global = true
    )]
    restore_name_format: String,

    /// Force-backup one-off container name format
    #[arg(
        long,
        env = "FORCEBACKUP_NAME_FORMAT",
        default_value = "docker-backup-maestro.forcebackup_{name}",
        global = true
    )]
    forcebackup_name_format: String,

    /// Image tag for a built backuper image
    #[arg(
        long,
        env = "BACKUP_TAG",
        default_value = "maestro-backup",
        global = true
    )]
    backup_tag: String,

    /// Image tag for a built restore image
    #[arg(
        long,
        env = "RESTORE_TAG",
        default_value = "maestro-restore",
        global = true
    )]
    restore_tag: String,

    /// Image tag for a built force-backup image
    #[arg(
        long,
        env = "FORCEBACKUP_TAG",
        default_value = "maestro-forcebackup",
        global = true
    )]
    forcebackup_tag: String,

    /// Take the restore template verbatim instead of overlaying it onto the
    /// backuper template
    #[arg(long, env = "RESTORE_NO_OVERLAY", global = true)]
    restore_no_overlay: bool,

    /// Take the force-backup template verbatim
    #[arg(long, env = "FORCEBACKUP_NO_OVERLAY", global = true)]
    forcebackup_no_overlay: bool,

    /// Mount primary-path binds read-write even for companions
    #[arg(long, env = "ALWAYS_RW", global = true)]
    always_rw: bool,

    /// Build with the legacy builder instead of BuildKit
    #[arg(long, env = "BUILDER_V1", global = true)]
    builder_v1: bool,
}

impl ConfigArgs {
    pub fn into_config(self) -> Config {
        Config {
            label_prefix: self.label_prefix,
            bind_path: self.bind_path,
            backup_name_format: self.backup_name_format,
            restore_name_format: self.restore_name_format,
            force_name_format: self.forcebackup_name_format,
            backup_tag: self.backup_tag,
            restore_tag: self.restore_tag,
            force_tag: self.forcebackup_tag,
            backup_template_path: self.backup_tmpl_path,
            restore_template_path: self.restore_tmpl_path,
            force_template_path: self.forcebackup_tmpl_path,
            always_rw: self.always_rw,
            builder_v1: self.builder_v1,
            no_restore_overlay: self.restore_no_overlay,
            no_force_overlay: self.forcebackup_no_overlay,
        }
    }
}
