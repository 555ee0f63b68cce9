//! Docker implementation of the [`EngineClient`] trait via bollard.

use crate::progress::{
    BuildLine, BuildStatus, BuildVertex, BuildVertexLog, BuildVertexStatus, BuildVertexWarning,
    PullLine,
};
use crate::{
    BuildOptions, ContainerSummary, CreateSpec, CreatedContainer, EngineClient, EngineError,
    EngineEvent, EngineResult, EventFilters, ImageSummary, ListOptions,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use bollard::query_parameters::{
    BuildImageOptions, BuilderVersion, CreateContainerOptionsBuilder, CreateImageOptions,
    EventsOptions, ListContainersOptions, ListImagesOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use prost::Message;
use std::collections::HashMap;
use std::sync::Arc;

/// [`EngineClient`] backed by a Docker daemon.
///
/// Progress items parsed by bollard are normalized back into the NDJSON line
/// format of [`crate::progress`], so the decoding side never depends on the
/// concrete engine SDK.
pub struct DockerEngine {
    docker: Arc<Docker>,
}

impl DockerEngine {
    pub fn new(docker: Arc<Docker>) -> Self {
        Self { docker }
    }

    fn filter_map(pairs: &[(String, String)]) -> HashMap<String, Vec<String>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in pairs {
            filters.entry(key.clone()).or_default().push(value.clone());
        }
        filters
    }

    fn encode_line<T: serde::Serialize>(line: &T) -> EngineResult<Bytes> {
        let mut encoded = serde_json::to_vec(line).map_err(EngineError::api)?;
        encoded.push(b'\n');
        Ok(Bytes::from(encoded))
    }
}

fn restart_policy(policy: &crate::RestartPolicy) -> bollard::models::RestartPolicy {
    use bollard::models::RestartPolicyNameEnum;

    let name = match policy.mode {
        crate::RestartMode::No => RestartPolicyNameEnum::NO,
        crate::RestartMode::Always => RestartPolicyNameEnum::ALWAYS,
        crate::RestartMode::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        crate::RestartMode::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    };

    bollard::models::RestartPolicy {
        name: Some(name),
        maximum_retry_count: policy.maximum_retries,
    }
}

fn create_body(spec: CreateSpec) -> bollard::models::ContainerCreateBody {
    let host_config = bollard::models::HostConfig {
        binds: (!spec.host.binds.is_empty()).then_some(spec.host.binds),
        restart_policy: spec.host.restart_policy.as_ref().map(restart_policy),
        auto_remove: Some(spec.host.auto_remove),
        privileged: Some(spec.host.privileged),
        devices: (!spec.host.devices.is_empty()).then(|| {
            spec.host
                .devices
                .into_iter()
                .map(|device| bollard::models::DeviceMapping {
                    path_on_host: Some(device.path_on_host),
                    path_in_container: Some(device.path_in_container),
                    cgroup_permissions: Some(device.cgroup_permissions),
                })
                .collect()
        }),
        ..Default::default()
    };

    let networking_config = spec.network.map(|network| {
        let endpoints = network
            .networks
            .into_iter()
            .map(|name| (name, bollard::models::EndpointSettings::default()))
            .collect();
        bollard::models::NetworkingConfig {
            endpoints_config: Some(endpoints),
        }
    });

    bollard::models::ContainerCreateBody {
        image: (!spec.container.image.is_empty()).then_some(spec.container.image),
        env: Some(spec.container.env),
        entrypoint: (!spec.container.entrypoint.is_empty()).then_some(spec.container.entrypoint),
        cmd: (!spec.container.cmd.is_empty()).then_some(spec.container.cmd),
        labels: Some(spec.container.labels),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    }
}

fn build_aux(aux: bollard::models::BuildInfoAux) -> Option<serde_json::Value> {
    match aux {
        bollard::models::BuildInfoAux::BuildKit(status) => {
            let payload = BuildStatus {
                vertexes: status
                    .vertexes
                    .into_iter()
                    .map(|vertex| BuildVertex {
                        digest: vertex.digest,
                        name: vertex.name,
                    })
                    .collect(),
                statuses: status
                    .statuses
                    .into_iter()
                    .map(|status| BuildVertexStatus {
                        id: status.id,
                        vertex: status.vertex,
                    })
                    .collect(),
                logs: status
                    .logs
                    .into_iter()
                    .map(|log| BuildVertexLog {
                        vertex: log.vertex,
                        msg: log.msg,
                    })
                    .collect(),
                warnings: status
                    .warnings
                    .into_iter()
                    .map(|warning| BuildVertexWarning {
                        vertex: warning.vertex,
                        short: warning.short,
                    })
                    .collect(),
            };
            Some(serde_json::Value::String(
                BASE64_STANDARD.encode(payload.encode_to_vec()),
            ))
        }
        bollard::models::BuildInfoAux::Default(image_id) => serde_json::to_value(image_id).ok(),
    }
}

#[async_trait]
impl EngineClient for DockerEngine {
    fn events(&self, filters: EventFilters) -> BoxStream<'static, EngineResult<EngineEvent>> {
        let options = EventsOptions {
            filters: Some(Self::filter_map(&filters.pairs)),
            ..Default::default()
        };

        self.docker
            .events(Some(options))
            .map(|item| match item {
                Ok(message) => Ok(EngineEvent {
                    action: message.action.unwrap_or_default(),
                    attributes: message
                        .actor
                        .and_then(|actor| actor.attributes)
                        .unwrap_or_default(),
                }),
                Err(err) => Err(EngineError::api(err)),
            })
            .boxed()
    }

    async fn list_containers(&self, opts: ListOptions) -> EngineResult<Vec<ContainerSummary>> {
        let filters = opts
            .label
            .map(|expr| Self::filter_map(&[("label".to_string(), expr)]));

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: opts.all,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(EngineError::api)?;

        Ok(containers
            .into_iter()
            .map(|container| ContainerSummary {
                id: container.id.unwrap_or_default(),
                labels: container.labels.unwrap_or_default(),
                state: container
                    .state
                    .map(|state| state.to_string())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn create_container(
        &self,
        name: &str,
        spec: CreateSpec,
    ) -> EngineResult<CreatedContainer> {
        let options = CreateContainerOptionsBuilder::new().name(name).build();

        let response = self
            .docker
            .create_container(Some(options), create_body(spec))
            .await
            .map_err(EngineError::api)?;

        Ok(CreatedContainer {
            id: response.id,
            warnings: response.warnings,
        })
    }

    async fn start_container(&self, id: &str) -> EngineResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(EngineError::api)
    }

    async fn stop_container(&self, id: &str) -> EngineResult<()> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(EngineError::api)
    }

    async fn remove_container(&self, id: &str) -> EngineResult<()> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await
            .map_err(EngineError::api)
    }

    async fn list_images(&self) -> EngineResult<Vec<ImageSummary>> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::default()))
            .await
            .map_err(EngineError::api)?;

        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                repo_tags: image.repo_tags,
            })
            .collect())
    }

    fn pull_image(&self, reference: &str) -> BoxStream<'static, EngineResult<Bytes>> {
        let options = CreateImageOptions {
            from_image: Some(reference.to_string()),
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .map(|item| match item {
                Ok(info) => Self::encode_line(&PullLine {
                    id: info.id.unwrap_or_default(),
                    status: info.status.unwrap_or_default(),
                    progress: info.progress.unwrap_or_default(),
                    message: String::new(),
                    error: info.error.unwrap_or_default(),
                }),
                Err(err) => Err(EngineError::api(err)),
            })
            .boxed()
    }

    fn build_image(
        &self,
        context: Bytes,
        opts: BuildOptions,
    ) -> BoxStream<'static, EngineResult<Bytes>> {
        let options = BuildImageOptions {
            dockerfile: if opts.dockerfile.is_empty() {
                "Dockerfile".to_string()
            } else {
                opts.dockerfile
            },
            t: Some(opts.tag),
            buildargs: Some(opts.build_args),
            version: if opts.use_buildkit {
                BuilderVersion::BuilderBuildKit
            } else {
                BuilderVersion::BuilderV1
            },
            session: opts
                .use_buildkit
                .then(|| uuid::Uuid::new_v4().to_string()),
            ..Default::default()
        };

        let body = http_body_util::Either::Left(http_body_util::Full::new(context));

        // bollard's `build_image` returns a stream borrowed from `&Docker`
        // (`impl Stream + '_`), which can't be named as `'static`. Drive it
        // to completion on an owned clone of the client inside a spawned
        // task and relay items through a channel so the returned stream
        // owns no borrowed state.
        let docker = (*self.docker).clone();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut stream = docker.build_image(options, None, Some(body));
            while let Some(item) = stream.next().await {
                let mapped = match item {
                    Ok(info) => Self::encode_line(&BuildLine {
                        message: String::new(),
                        stream: info.stream.unwrap_or_default(),
                        error: info.error.unwrap_or_default(),
                        aux: info.aux.and_then(build_aux),
                    }),
                    Err(err) => Err(EngineError::api(err)),
                };
                if tx.send(mapped).is_err() {
                    break;
                }
            }
        });

        futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RestartMode, RestartPolicy};

    #[test]
    fn test_filter_map_groups_values_per_key() {
        let map = DockerEngine::filter_map(&[
            ("label".to_string(), "a".to_string()),
            ("label".to_string(), "b".to_string()),
            ("event".to_string(), "die".to_string()),
        ]);

        assert_eq!(map["label"], vec!["a".to_string(), "b".to_string()]);
        assert_eq!(map["event"], vec!["die".to_string()]);
    }

    #[test]
    fn test_restart_policy_mapping() {
        let mapped = restart_policy(&RestartPolicy {
            mode: RestartMode::OnFailure,
            maximum_retries: Some(3),
        });

        assert_eq!(
            mapped.name,
            Some(bollard::models::RestartPolicyNameEnum::ON_FAILURE)
        );
        assert_eq!(mapped.maximum_retry_count, Some(3));
    }

    #[test]
    fn test_create_body_omits_empty_fields() {
        let body = create_body(CreateSpec {
            container: crate::ContainerSpec {
                image: "alpine".to_string(),
                ..Default::default()
            },
            ..Default::default()
        });

        assert_eq!(body.image.as_deref(), Some("alpine"));
        assert!(body.entrypoint.is_none());
        assert!(body.cmd.is_none());
        assert!(body.networking_config.is_none());

        let host = body.host_config.unwrap();
        assert!(host.binds.is_none());
        assert!(host.restart_policy.is_none());
        assert_eq!(host.auto_remove, Some(false));
    }
}
