//! Backup container templates.
//!
//! A [`Template`] is the YAML-level description of a companion container:
//! image or build instructions, process configuration and host bindings.
//! Templates are immutable values; composing a per-target configuration with
//! a user template goes through [`Template::overlay`], and configuration
//! drift is detected by comparing [`Template::hash`] digests.

use crate::expand::expand_env;
use maestro_engine::{
    ContainerSpec, CreateSpec, DeviceMapping, HostSpec, NetworkSpec, RestartPolicy,
};
use md5::{Digest, Md5};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Errors from template loading and translation.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("required template '{0}' is missing")]
    Missing(PathBuf),

    #[error("template '{path}' read failed: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template '{path}' parsing failed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid restart policy '{value}': {reason}")]
    Restart { value: String, reason: String },

    #[error("invalid device mapping '{0}', expected 'host:container[:permissions]'")]
    Device(String),

    #[error("env_file '{path}': {source}")]
    EnvFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A value that may appear in YAML as a single string or a string sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StringOrList(pub Vec<String>);

impl<'de> Deserialize<'de> for StringOrList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(value) => StringOrList(vec![value]),
            Raw::Many(values) => StringOrList(values),
        })
    }
}

/// A command line: a pre-tokenized sequence, or a single string that is
/// split into shell words.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ShellWords(pub Vec<String>);

impl<'de> Deserialize<'de> for ShellWords {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(line) => ShellWords(shlex::split(&line).ok_or_else(|| {
                D::Error::custom(format!("cannot split '{line}' into shell words"))
            })?),
            Raw::Many(words) => ShellWords(words),
        })
    }
}

/// A string map: a YAML mapping, or a sequence of `KEY=value` entries.
///
/// Backed by a `BTreeMap` so the canonical JSON encoding used for hashing
/// has a deterministic key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StringMap(pub BTreeMap<String, String>);

impl StringMap {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for StringMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Map(BTreeMap<String, String>),
            List(Vec<String>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Map(map) => StringMap(map),
            Raw::List(entries) => {
                let mut map = BTreeMap::new();
                for entry in entries {
                    let (key, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
                    map.insert(key.to_string(), value.to_string());
                }
                StringMap(map)
            }
        })
    }
}

impl<const N: usize> From<[(&str, &str); N]> for StringMap {
    fn from(entries: [(&str, &str); N]) -> Self {
        StringMap(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Build instructions: a bare context string, or the structured form.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Build {
    pub context: String,
    pub dockerfile: String,
    pub args: StringMap,
    pub dependent_builds: Vec<DependentBuild>,
}

impl Build {
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.dockerfile.is_empty()
            && self.args.is_empty()
            && self.dependent_builds.is_empty()
    }
}

impl<'de> Deserialize<'de> for Build {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Default, Deserialize)]
        #[serde(default)]
        struct RawBuild {
            context: String,
            dockerfile: String,
            args: StringMap,
            dependent_builds: Vec<DependentBuild>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Context(String),
            Full(RawBuild),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Context(context) => Build {
                context,
                ..Default::default()
            },
            Raw::Full(raw) => Build {
                context: raw.context,
                dockerfile: raw.dockerfile,
                args: raw.args,
                dependent_builds: raw.dependent_builds,
            },
        })
    }
}

/// An image that must be built before its owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependentBuild {
    pub context: String,
    pub dockerfile: String,
    pub args: StringMap,
    pub tag: String,
}

/// A companion container template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    pub image: String,
    pub build: Build,
    pub entrypoint: ShellWords,
    pub command: ShellWords,
    pub restart: String,
    pub env_file: StringOrList,
    pub environment: StringMap,
    pub volumes: Vec<String>,
    pub labels: StringMap,
    pub networks: Vec<String>,
    pub devices: Vec<String>,
    pub privileged: bool,

    /// Not part of the YAML schema; set on one-off containers so the engine
    /// reaps them on exit. Excluded from the consistency hash.
    #[serde(skip)]
    pub auto_remove: bool,
}

impl Template {
    /// Merges `other` over `self`, producing a new template.
    ///
    /// Scalars from `other` win when non-empty; `build` and `image` stay
    /// mutually exclusive; mappings union with `other` overriding; sequence
    /// fields union, deduplicate and sort (the sort keeps [`Template::hash`]
    /// stable under input permutations); `privileged` ORs.
    pub fn overlay(&self, other: &Template) -> Template {
        let mut merged = self.clone();

        if !other.image.is_empty() {
            merged.image = other.image.clone();
        }

        if !other.build.is_empty() {
            merged.build = other.build.clone();
            if other.image.is_empty() {
                merged.image = String::new();
            }
        } else if !other.image.is_empty() {
            merged.build = Build::default();
        }

        if !other.entrypoint.0.is_empty() {
            merged.entrypoint = other.entrypoint.clone();
        }

        if !other.command.0.is_empty() {
            merged.command = other.command.clone();
        }

        if !other.restart.is_empty() {
            merged.restart = other.restart.clone();
        }

        for (key, value) in &other.environment.0 {
            merged.environment.0.insert(key.clone(), value.clone());
        }

        for (key, value) in &other.labels.0 {
            merged.labels.0.insert(key.clone(), value.clone());
        }

        merged.env_file = StringOrList(merge_sorted(&self.env_file.0, &other.env_file.0));
        merged.volumes = merge_sorted(&self.volumes, &other.volumes);
        merged.networks = merge_sorted(&self.networks, &other.networks);
        merged.devices = merge_sorted(&self.devices, &other.devices);
        merged.privileged = self.privileged || other.privileged;
        merged.auto_remove = false;

        merged
    }

    /// Consistency hash: MD5 over the canonical JSON encoding.
    ///
    /// Stable across runs for the same logical content; collision resistance
    /// is not required, only determinism.
    pub fn hash(&self) -> String {
        let encoded = serde_json::to_vec(self).expect("template serializes to JSON");
        let mut digest = Md5::new();
        digest.update(&encoded);
        hex::encode(digest.finalize())
    }

    /// Translates the template into engine create requests.
    ///
    /// Returns the build instructions (when present) and the create spec.
    /// When the template builds its own image and names none, the container
    /// image defaults to `tag`.
    pub fn create_config(&self, tag: &str) -> Result<(Option<Build>, CreateSpec), TemplateError> {
        let mut environment: Vec<(String, String)> = Vec::new();

        for path in &self.env_file.0 {
            read_env_file(path, &mut environment)?;
        }

        for (key, value) in &self.environment.0 {
            upsert(&mut environment, key, value.clone());
        }

        let image = if self.image.is_empty() && !self.build.is_empty() {
            tag.to_string()
        } else {
            self.image.clone()
        };

        let container = ContainerSpec {
            image,
            env: environment
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect(),
            entrypoint: self.entrypoint.0.clone(),
            cmd: self.command.0.clone(),
            labels: self
                .labels
                .0
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        };

        let host = HostSpec {
            binds: self.volumes.clone(),
            restart_policy: parse_restart(&self.restart)?,
            auto_remove: self.auto_remove,
            devices: self
                .devices
                .iter()
                .map(|device| parse_device(device))
                .collect::<Result<_, _>>()?,
            privileged: self.privileged,
        };

        let network = (!self.networks.is_empty()).then(|| NetworkSpec {
            networks: self.networks.clone(),
        });

        let build = (!self.build.is_empty()).then(|| self.build.clone());

        let spec = CreateSpec {
            container,
            host,
            network,
        };

        Ok((build, spec))
    }

    /// Loads a template from a YAML file; the file must exist.
    ///
    /// `$VAR`/`${VAR}` references are expanded over the raw file text before
    /// parsing; sequence-valued fields are sorted afterwards so freshly
    /// loaded templates hash the same as overlay results.
    pub fn load_required(path: &Path) -> Result<Template, TemplateError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(TemplateError::Missing(path.to_path_buf()))
            }
            Err(err) => {
                return Err(TemplateError::Read {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        };

        Self::parse(path, &text)
    }

    /// Like [`Template::load_required`], but a missing file is not an error.
    pub fn load_optional(path: &Path) -> Result<Option<Template>, TemplateError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(TemplateError::Read {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        };

        Self::parse(path, &text).map(Some)
    }

    fn parse(path: &Path, text: &str) -> Result<Template, TemplateError> {
        let expanded = expand_env(text);
        let mut template: Template =
            serde_yaml::from_str(&expanded).map_err(|err| TemplateError::Parse {
                path: path.to_path_buf(),
                source: err,
            })?;
        template.normalize();

        Ok(template)
    }

    fn normalize(&mut self) {
        self.env_file.0.sort();
        self.volumes.sort();
        self.networks.sort();
        self.devices.sort();
    }
}

/// The three user-supplied templates after overlay resolution.
#[derive(Debug, Clone)]
pub struct UserTemplates {
    pub backuper: Template,
    pub restore: Option<Template>,
    pub force_backup: Option<Template>,
}

impl UserTemplates {
    /// Resolves the variant templates against the backuper template.
    ///
    /// With overlay enabled (the default) a variant is the backuper template
    /// with the user's variant merged over it; a missing user variant then
    /// resolves to a clone of the backuper. With overlay disabled the user
    /// variant is taken verbatim, and stays absent when no file was given.
    pub fn resolve(
        backuper: Template,
        restore: Option<Template>,
        force_backup: Option<Template>,
        no_restore_overlay: bool,
        no_force_overlay: bool,
    ) -> Self {
        let restore = if no_restore_overlay {
            restore
        } else {
            Some(backuper.overlay(&restore.unwrap_or_default()))
        };

        let force_backup = if no_force_overlay {
            force_backup
        } else {
            Some(backuper.overlay(&force_backup.unwrap_or_default()))
        };

        UserTemplates {
            backuper,
            restore,
            force_backup,
        }
    }
}

fn merge_sorted(base: &[String], extra: &[String]) -> Vec<String> {
    let mut merged = base.to_vec();
    for item in extra {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged.sort();
    merged.dedup();
    merged
}

fn upsert(environment: &mut Vec<(String, String)>, key: &str, value: String) {
    match environment.iter_mut().find(|(existing, _)| existing == key) {
        Some(slot) => slot.1 = value,
        None => environment.push((key.to_string(), value)),
    }
}

fn read_env_file(
    path: &str,
    environment: &mut Vec<(String, String)>,
) -> Result<(), TemplateError> {
    let text = fs::read_to_string(path).map_err(|err| TemplateError::EnvFile {
        path: path.to_string(),
        source: err,
    })?;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').unwrap_or((line, ""));
        upsert(environment, key, expand_env(value));
    }

    Ok(())
}

fn parse_restart(restart: &str) -> Result<Option<RestartPolicy>, TemplateError> {
    if restart.is_empty() {
        return Ok(None);
    }

    let parts: Vec<&str> = restart.split(':').collect();
    if parts.len() > 2 {
        return Err(TemplateError::Restart {
            value: restart.to_string(),
            reason: "more than one ':'".to_string(),
        });
    }

    let mode = parts[0]
        .parse()
        .map_err(|reason| TemplateError::Restart {
            value: restart.to_string(),
            reason,
        })?;

    let maximum_retries = match parts.get(1) {
        Some(retries) => Some(retries.parse::<i64>().map_err(|err| TemplateError::Restart {
            value: restart.to_string(),
            reason: format!("cannot parse retries '{retries}': {err}"),
        })?),
        None => None,
    };

    Ok(Some(RestartPolicy {
        mode,
        maximum_retries,
    }))
}

fn parse_device(device: &str) -> Result<DeviceMapping, TemplateError> {
    let parts: Vec<&str> = device.split(':').collect();

    match parts.as_slice() {
        [host, container] if !host.is_empty() && !container.is_empty() => Ok(DeviceMapping {
            path_on_host: host.to_string(),
            path_in_container: container.to_string(),
            cgroup_permissions: String::new(),
        }),
        [host, container, permissions] if !host.is_empty() && !container.is_empty() => {
            Ok(DeviceMapping {
                path_on_host: host.to_string(),
                path_in_container: container.to_string(),
                cgroup_permissions: permissions.to_string(),
            })
        }
        _ => Err(TemplateError::Device(device.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_engine::RestartMode;
    use std::io::Write;

    fn template_with_volumes(volumes: &[&str]) -> Template {
        Template {
            image: "example".to_string(),
            volumes: volumes.iter().map(|v| v.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_overlay_scalars_and_collections() {
        let base = Template {
            image: "example".to_string(),
            entrypoint: ShellWords(vec!["entry".to_string()]),
            command: ShellWords(vec!["cmd".to_string()]),
            restart: "unless-stopped".to_string(),
            env_file: StringOrList(vec!["env_file".to_string()]),
            environment: StringMap::from([("ENV1", "VAL1")]),
            volumes: vec!["/data1:/inside1".to_string()],
            labels: StringMap::from([("lbl", "txt"), ("lbl2", "")]),
            networks: vec!["net".to_string()],
            ..Default::default()
        };

        let extra = Template {
            image: "bar".to_string(),
            entrypoint: ShellWords(vec!["entry2".to_string()]),
            command: ShellWords(vec!["cmd2".to_string()]),
            restart: "always".to_string(),
            env_file: StringOrList(vec!["env_file2".to_string()]),
            environment: StringMap::from([("ENV1", "VAL!"), ("ENV2", "VAL2")]),
            volumes: vec!["/data2:/inside2".to_string()],
            labels: StringMap::from([("lbl", "boo"), ("lbl3", "hello")]),
            networks: vec!["net2".to_string()],
            ..Default::default()
        };

        let merged = base.overlay(&extra);

        assert_eq!(merged.image, "bar");
        assert_eq!(merged.entrypoint.0, vec!["entry2"]);
        assert_eq!(merged.command.0, vec!["cmd2"]);
        assert_eq!(merged.restart, "always");
        assert_eq!(merged.env_file.0, vec!["env_file", "env_file2"]);
        assert_eq!(
            merged.environment,
            StringMap::from([("ENV1", "VAL!"), ("ENV2", "VAL2")])
        );
        assert_eq!(merged.volumes, vec!["/data1:/inside1", "/data2:/inside2"]);
        assert_eq!(
            merged.labels,
            StringMap::from([("lbl", "boo"), ("lbl2", ""), ("lbl3", "hello")])
        );
        assert_eq!(merged.networks, vec!["net", "net2"]);
    }

    #[test]
    fn test_overlay_keeps_image_and_build_exclusive() {
        let build = Build {
            context: ".".to_string(),
            ..Default::default()
        };

        // An extra image without a build clears the base build.
        let merged = Template {
            image: "img".to_string(),
            build: build.clone(),
            ..Default::default()
        }
        .overlay(&Template {
            image: "alpine".to_string(),
            ..Default::default()
        });
        assert!(merged.build.is_empty());
        assert_eq!(merged.image, "alpine");

        // An extra providing both keeps both.
        let merged = Template {
            image: "alpine".to_string(),
            ..Default::default()
        }
        .overlay(&Template {
            image: "img".to_string(),
            build: build.clone(),
            ..Default::default()
        });
        assert_eq!(merged.build, build);
        assert_eq!(merged.image, "img");

        // An extra build without an image clears the base image.
        let merged = Template {
            image: "alpine".to_string(),
            ..Default::default()
        }
        .overlay(&Template {
            build: build.clone(),
            ..Default::default()
        });
        assert_eq!(merged.build, build);
        assert_eq!(merged.image, "");
    }

    #[test]
    fn test_overlay_does_not_share_state_with_inputs() {
        let base = Template {
            environment: StringMap::from([("A", "1")]),
            volumes: vec!["/a:/a".to_string()],
            ..Default::default()
        };

        let mut merged = base.overlay(&Template::default());
        merged.environment.0.insert("B".to_string(), "2".to_string());
        merged.volumes.push("/b:/b".to_string());

        assert_eq!(base.environment, StringMap::from([("A", "1")]));
        assert_eq!(base.volumes, vec!["/a:/a"]);
    }

    #[test]
    fn test_hash_is_stable_across_invocations() {
        let template = template_with_volumes(&["/a:/a", "/b:/b"]);
        assert_eq!(template.hash(), template.hash());
    }

    #[test]
    fn test_hash_ignores_sequence_permutations_after_overlay() {
        let forward = template_with_volumes(&["/a:/a", "/b:/b"]);
        let backward = template_with_volumes(&["/b:/b", "/a:/a"]);
        let extra = Template {
            networks: vec!["z".to_string(), "a".to_string()],
            ..Default::default()
        };
        let extra_flipped = Template {
            networks: vec!["a".to_string(), "z".to_string()],
            ..Default::default()
        };

        assert_eq!(
            forward.overlay(&extra).hash(),
            backward.overlay(&extra_flipped).hash()
        );
    }

    #[test]
    fn test_hash_changes_with_content() {
        let template = template_with_volumes(&["/a:/a"]);
        let mut changed = template.clone();
        changed
            .labels
            .0
            .insert("owner".to_string(), "someone".to_string());

        assert_ne!(template.hash(), changed.hash());
    }

    #[test]
    fn test_hash_excludes_auto_remove() {
        let template = template_with_volumes(&["/a:/a"]);
        let mut one_off = template.clone();
        one_off.auto_remove = true;

        assert_eq!(template.hash(), one_off.hash());
    }

    #[test]
    fn test_restart_parsing() {
        assert_eq!(parse_restart("").unwrap(), None);

        let always = parse_restart("always").unwrap().unwrap();
        assert_eq!(always.mode, RestartMode::Always);
        assert_eq!(always.maximum_retries, None);

        let bounded = parse_restart("on-failure:3").unwrap().unwrap();
        assert_eq!(bounded.mode, RestartMode::OnFailure);
        assert_eq!(bounded.maximum_retries, Some(3));

        assert!(parse_restart("foo:1:2").is_err());
        assert!(parse_restart("sometimes").is_err());
        assert!(parse_restart("on-failure:lots").is_err());
    }

    #[test]
    fn test_device_parsing() {
        assert_eq!(
            parse_device("/dev/sda:/dev/sdb").unwrap(),
            DeviceMapping {
                path_on_host: "/dev/sda".to_string(),
                path_in_container: "/dev/sdb".to_string(),
                cgroup_permissions: String::new(),
            }
        );

        assert_eq!(
            parse_device("/dev/sda:/dev/sdb:rwm").unwrap().cgroup_permissions,
            "rwm"
        );

        assert!(parse_device("/dev/sda").is_err());
        assert!(parse_device("a:b:c:d").is_err());
        assert!(parse_device(":/dev/sdb").is_err());
    }

    #[test]
    fn test_create_config() {
        let template = Template {
            image: "example".to_string(),
            entrypoint: ShellWords(vec!["entry".to_string()]),
            restart: "unless-stopped".to_string(),
            volumes: vec!["/data:/inside".to_string()],
            networks: vec!["example_net".to_string()],
            labels: StringMap::from([("lbl", "txt"), ("lbl2", "")]),
            environment: StringMap::from([("ENV1", "VAL1")]),
            devices: vec!["/dev/sda:/dev/sdb".to_string()],
            privileged: true,
            ..Default::default()
        };

        let (build, spec) = template.create_config("unused").unwrap();

        assert!(build.is_none());
        assert_eq!(spec.container.image, "example");
        assert_eq!(spec.container.env, vec!["ENV1=VAL1"]);
        assert_eq!(spec.container.entrypoint, vec!["entry"]);
        assert!(spec.container.cmd.is_empty());
        assert_eq!(spec.container.labels.len(), 2);

        assert_eq!(spec.host.binds, vec!["/data:/inside"]);
        let restart = spec.host.restart_policy.unwrap();
        assert_eq!(restart.mode, RestartMode::UnlessStopped);
        assert_eq!(
            spec.host.devices,
            vec![DeviceMapping {
                path_on_host: "/dev/sda".to_string(),
                path_in_container: "/dev/sdb".to_string(),
                cgroup_permissions: String::new(),
            }]
        );
        assert!(spec.host.privileged);
        assert!(!spec.host.auto_remove);

        assert_eq!(
            spec.network.unwrap().networks,
            vec!["example_net".to_string()]
        );
    }

    #[test]
    fn test_create_config_build_defaults_image_to_tag() {
        let template = Template {
            build: Build {
                context: ".".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let (build, spec) = template.create_config("maestro-backup").unwrap();
        assert!(build.is_some());
        assert_eq!(spec.container.image, "maestro-backup");
    }

    #[test]
    fn test_create_config_reads_env_files_in_order() {
        let mut first = tempfile::NamedTempFile::new().unwrap();
        writeln!(first, "SHARED=from_first").unwrap();
        writeln!(first, "ONLY_FIRST=1").unwrap();

        let mut second = tempfile::NamedTempFile::new().unwrap();
        writeln!(second, "# comment").unwrap();
        writeln!(second, "SHARED=from_second").unwrap();

        let template = Template {
            image: "example".to_string(),
            env_file: StringOrList(vec![
                first.path().to_string_lossy().to_string(),
                second.path().to_string_lossy().to_string(),
            ]),
            environment: StringMap::from([("EXPLICIT", "wins")]),
            ..Default::default()
        };

        let (_, spec) = template.create_config("unused").unwrap();
        assert_eq!(
            spec.container.env,
            vec!["SHARED=from_second", "ONLY_FIRST=1", "EXPLICIT=wins"]
        );
    }

    #[test]
    fn test_create_config_expands_env_file_values() {
        std::env::set_var("MAESTRO_TEST_EXPANSION", "expanded");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "VALUE=${{MAESTRO_TEST_EXPANSION}}").unwrap();

        let template = Template {
            image: "example".to_string(),
            env_file: StringOrList(vec![file.path().to_string_lossy().to_string()]),
            ..Default::default()
        };

        let (_, spec) = template.create_config("unused").unwrap();
        assert_eq!(spec.container.env, vec!["VALUE=expanded"]);
    }

    #[test]
    fn test_create_config_missing_env_file() {
        let template = Template {
            env_file: StringOrList(vec!["/does/not/exist.env".to_string()]),
            ..Default::default()
        };

        assert!(matches!(
            template.create_config("unused"),
            Err(TemplateError::EnvFile { .. })
        ));
    }

    #[test]
    fn test_load_shorthand_forms() {
        std::env::set_var("MAESTRO_TEST_VAR", "varval");
        std::env::set_var("MAESTRO_TEST_VAR2", "var2val");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"image: alpine
build: .
entrypoint: hello
command: cmd subcmd exec "-p 800 ${{MAESTRO_TEST_VAR}}"
restart: unless-stopped
env_file: .env
environment:
  - ENV=${{MAESTRO_TEST_VAR2}}
  - ENV1=VAL
volumes:
  - /host:/cntr
labels:
  - lbl1=val1
  - lbl2=val2
networks:
  - net1
"#
        )
        .unwrap();

        let template = Template::load_required(file.path()).unwrap();

        assert_eq!(template.image, "alpine");
        assert_eq!(template.build.context, ".");
        assert_eq!(template.entrypoint.0, vec!["hello"]);
        assert_eq!(
            template.command.0,
            vec!["cmd", "subcmd", "exec", "-p 800 varval"]
        );
        assert_eq!(template.restart, "unless-stopped");
        assert_eq!(template.env_file.0, vec![".env"]);
        assert_eq!(
            template.environment,
            StringMap::from([("ENV", "var2val"), ("ENV1", "VAL")])
        );
        assert_eq!(template.volumes, vec!["/host:/cntr"]);
        assert_eq!(
            template.labels,
            StringMap::from([("lbl1", "val1"), ("lbl2", "val2")])
        );
        assert_eq!(template.networks, vec!["net1"]);
    }

    #[test]
    fn test_load_structured_forms() {
        std::env::set_var("MAESTRO_TEST_VAR2", "var2val");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"image: alpine
build:
  context: /ctx
  dockerfile: cfg/Dockerfile
  dependent_builds:
    - context: /dep
      tag: dep-image
env_file:
  - .env2
environment:
  ENV: ${{MAESTRO_TEST_VAR2}}
  ENV1: VAL
"#
        )
        .unwrap();

        let template = Template::load_required(file.path()).unwrap();

        assert_eq!(template.image, "alpine");
        assert_eq!(template.build.context, "/ctx");
        assert_eq!(template.build.dockerfile, "cfg/Dockerfile");
        assert_eq!(template.build.dependent_builds.len(), 1);
        assert_eq!(template.build.dependent_builds[0].tag, "dep-image");
        assert_eq!(template.env_file.0, vec![".env2"]);
        assert_eq!(
            template.environment,
            StringMap::from([("ENV", "var2val"), ("ENV1", "VAL")])
        );
    }

    #[test]
    fn test_load_missing_file() {
        let path = Path::new("/definitely/not/here.yml");

        assert!(Template::load_optional(path).unwrap().is_none());
        assert!(matches!(
            Template::load_required(path),
            Err(TemplateError::Missing(_))
        ));
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"image: alpine
restart: always
environment:
  A: "1"
volumes:
  - /b:/b
  - /a:/a
networks:
  - net1
"#
        )
        .unwrap();

        let template = Template::load_required(file.path()).unwrap();
        let rendered = serde_yaml::to_string(&template).unwrap();
        let reparsed: Template = serde_yaml::from_str(&rendered).unwrap();

        assert_eq!(reparsed, template);
    }

    #[test]
    fn test_user_templates_resolution() {
        let backuper = Template {
            image: "alpine".to_string(),
            volumes: vec!["/data:/data".to_string()],
            ..Default::default()
        };
        let restore = Template {
            image: "restorer".to_string(),
            ..Default::default()
        };

        // Overlay enabled: variant merged over the backuper, missing variant
        // resolves to a clone of the backuper.
        let templates = UserTemplates::resolve(
            backuper.clone(),
            Some(restore.clone()),
            None,
            false,
            false,
        );
        let resolved = templates.restore.unwrap();
        assert_eq!(resolved.image, "restorer");
        assert_eq!(resolved.volumes, vec!["/data:/data"]);
        assert_eq!(templates.force_backup.unwrap(), backuper.overlay(&Template::default()));

        // Overlay disabled: taken verbatim, missing stays missing.
        let templates =
            UserTemplates::resolve(backuper.clone(), Some(restore.clone()), None, true, true);
        assert_eq!(templates.restore.unwrap(), restore);
        assert!(templates.force_backup.is_none());
    }
}
