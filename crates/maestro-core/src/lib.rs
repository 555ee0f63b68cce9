//! Maestro Core - templates, label schema and configuration
//!
//! The value types of the daemon: the YAML-level [`Template`] with its
//! overlay composition and consistency hash, the [`LabelSchema`] that maps a
//! configurable prefix onto fully qualified label names, and the process
//! [`Config`].

mod config;
mod expand;
mod labels;
mod template;

pub use config::{container_name, Config};
pub use expand::expand_env;
pub use labels::{valid_backup_name, LabelSchema};
pub use template::{
    Build, DependentBuild, ShellWords, StringMap, StringOrList, Template, TemplateError,
    UserTemplates,
};
