//! Maestro Engine - Abstract container engine capability surface
//!
//! This crate defines the narrow interface the daemon needs from a container
//! engine: listing and lifecycle of containers, an event subscription, and
//! image listing/pulling/building. The production implementation talks to
//! Docker through bollard (see [`docker`]); tests script the trait with an
//! in-memory mock.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

pub mod docker;
pub mod progress;

pub use docker::DockerEngine;

/// Container state string reported for a running container.
pub const CONTAINER_STATE_RUNNING: &str = "running";

/// Container state string reported for a restarting container.
pub const CONTAINER_STATE_RESTARTING: &str = "restarting";

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by an engine client.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Any failure reported by the engine API.
    #[error("engine api error: {0}")]
    Api(String),

    /// An event subscription ended without the caller asking for it.
    #[error("event stream closed")]
    StreamClosed,
}

impl EngineError {
    pub(crate) fn api(err: impl std::fmt::Display) -> Self {
        EngineError::Api(err.to_string())
    }
}

/// Options for listing containers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Include stopped containers.
    pub all: bool,
    /// Label filter expression, either `key` or `key=value`.
    pub label: Option<String>,
}

impl ListOptions {
    /// Filter by label presence or `key=value` equality.
    pub fn labeled(expr: impl Into<String>, all: bool) -> Self {
        ListOptions {
            all,
            label: Some(expr.into()),
        }
    }
}

/// Filters for an event subscription, as `(key, value)` pairs understood by
/// the engine's event endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilters {
    pub pairs: Vec<(String, String)>,
}

impl EventFilters {
    /// Events for containers carrying the given label.
    pub fn labeled(label: impl Into<String>) -> Self {
        EventFilters {
            pairs: vec![("label".to_string(), label.into())],
        }
    }

    /// The `die` event of one specific container.
    pub fn container_die(id: impl Into<String>) -> Self {
        EventFilters {
            pairs: vec![
                ("id".to_string(), id.into()),
                ("type".to_string(), "container".to_string()),
                ("event".to_string(), "die".to_string()),
            ],
        }
    }
}

/// A container as reported by the engine's list endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSummary {
    pub id: String,
    pub labels: HashMap<String, String>,
    /// Engine state string (`running`, `exited`, ...).
    pub state: String,
}

impl ContainerSummary {
    /// True when the container is running or restarting.
    pub fn is_alive(&self) -> bool {
        self.state == CONTAINER_STATE_RUNNING || self.state == CONTAINER_STATE_RESTARTING
    }
}

/// Response of a container create call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreatedContainer {
    pub id: String,
    pub warnings: Vec<String>,
}

/// A locally cached image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageSummary {
    pub repo_tags: Vec<String>,
}

/// An engine event relevant to the daemon.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineEvent {
    /// Event action (`start`, `die`, ...).
    pub action: String,
    /// Actor attributes; for container events these include the labels.
    pub attributes: HashMap<String, String>,
}

/// Restart policy modes accepted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMode {
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

impl std::fmt::Display for RestartMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartMode::No => write!(f, "no"),
            RestartMode::Always => write!(f, "always"),
            RestartMode::OnFailure => write!(f, "on-failure"),
            RestartMode::UnlessStopped => write!(f, "unless-stopped"),
        }
    }
}

impl FromStr for RestartMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no" => Ok(RestartMode::No),
            "always" => Ok(RestartMode::Always),
            "on-failure" => Ok(RestartMode::OnFailure),
            "unless-stopped" => Ok(RestartMode::UnlessStopped),
            other => Err(format!("unknown restart policy mode '{other}'")),
        }
    }
}

/// A parsed restart policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    pub mode: RestartMode,
    pub maximum_retries: Option<i64>,
}

/// A device mapping of the form `host:container[:permissions]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMapping {
    pub path_on_host: String,
    pub path_in_container: String,
    pub cgroup_permissions: String,
}

/// Container process configuration for a create call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    /// `KEY=value` entries.
    pub env: Vec<String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// Host-side configuration for a create call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSpec {
    /// `host:container[:ro]` bind specs, already in their final order.
    pub binds: Vec<String>,
    pub restart_policy: Option<RestartPolicy>,
    pub auto_remove: bool,
    pub devices: Vec<DeviceMapping>,
    pub privileged: bool,
}

/// Networks to attach, each with empty endpoint settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkSpec {
    pub networks: Vec<String>,
}

/// Everything the engine needs to create a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSpec {
    pub container: ContainerSpec,
    pub host: HostSpec,
    pub network: Option<NetworkSpec>,
}

/// Options for an image build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOptions {
    /// Tag for the built image (including `:tag` suffix).
    pub tag: String,
    /// Dockerfile path relative to the context; empty selects the default.
    pub dockerfile: String,
    pub build_args: HashMap<String, String>,
    /// Use BuildKit instead of the legacy builder.
    pub use_buildkit: bool,
}

/// The capability surface the daemon requires from a container engine.
///
/// Pull and build return the engine's newline-delimited JSON progress stream
/// as raw bytes; decoding happens in the caller so it stays engine-agnostic.
/// The event stream ends (yields `None`) when the subscription hits EOF -
/// callers that need the subscription to outlive that must resubscribe.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Subscribe to engine events matching the filters.
    fn events(&self, filters: EventFilters) -> BoxStream<'static, EngineResult<EngineEvent>>;

    /// List containers, optionally filtered by label.
    async fn list_containers(&self, opts: ListOptions) -> EngineResult<Vec<ContainerSummary>>;

    /// Create a container under the given name.
    async fn create_container(&self, name: &str, spec: CreateSpec)
        -> EngineResult<CreatedContainer>;

    /// Start a created or stopped container.
    async fn start_container(&self, id: &str) -> EngineResult<()>;

    /// Stop a running container.
    async fn stop_container(&self, id: &str) -> EngineResult<()>;

    /// Remove a container.
    async fn remove_container(&self, id: &str) -> EngineResult<()>;

    /// List locally cached images.
    async fn list_images(&self) -> EngineResult<Vec<ImageSummary>>;

    /// Pull an image; the stream carries NDJSON progress lines.
    fn pull_image(&self, reference: &str) -> BoxStream<'static, EngineResult<Bytes>>;

    /// Build an image from a gzipped tar context; the stream carries NDJSON
    /// progress lines.
    fn build_image(
        &self,
        context: Bytes,
        opts: BuildOptions,
    ) -> BoxStream<'static, EngineResult<Bytes>>;
}
