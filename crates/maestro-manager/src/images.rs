//! Image procurement: cache checks, pulls, builds and progress decoding.
//!
//! Pull and build progress arrives from the engine as newline-delimited JSON
//! lines; an `error` payload in any line aborts the operation. Builds
//! resolve their dependent builds recursively before the owner, and BuildKit
//! status payloads (base64-encoded protobuf in the `aux` field) are decoded
//! and logged.

use crate::{ContainerManager, ManagerError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use maestro_core::{Build, Template};
use maestro_engine::progress::{BuildLine, BuildStatus, PullLine};
use maestro_engine::{BuildOptions, EngineResult};
use prost::Message;
use std::path::Path;
use tracing::{debug, info, warn};

impl ContainerManager {
    /// Materializes a container from a template: ensures its image exists
    /// (building or pulling as the template dictates), then creates the
    /// container. Returns the new container id.
    pub(crate) async fn create_container(
        &self,
        template: &Template,
        tag: &str,
        name: &str,
    ) -> Result<String> {
        let (build, spec) = template.create_config(tag)?;

        self.ensure_image(&spec.container.image, build.as_ref(), false)
            .await?;

        let created = self.engine.create_container(name, spec).await?;
        for warning in &created.warnings {
            warn!("engine warning: {warning}");
        }

        Ok(created.id)
    }

    /// Ensures an image exists locally, building when instructions are
    /// given and pulling otherwise.
    pub(crate) async fn ensure_image(
        &self,
        image: &str,
        build: Option<&Build>,
        force: bool,
    ) -> Result<()> {
        match build {
            Some(build) => self.build_image(build, image, force).await,
            None => self.pull_image(image, force).await,
        }
    }

    /// Pulls `tag` unless a matching image is already cached (or `force`).
    pub(crate) async fn pull_image(&self, tag: &str, force: bool) -> Result<()> {
        let tag = normalize_tag(tag);

        if !force && self.image_cached(&tag).await? {
            return Ok(());
        }

        info!("pulling {tag}");

        let stream = self.engine.pull_image(&tag);
        drain_ndjson(stream, |raw| self.handle_pull_line(raw)).await?;

        info!("successfully pulled {tag}");
        Ok(())
    }

    /// Builds `tag` from `build`, resolving dependent builds first.
    ///
    /// The cache is consulted even when forcing (the engine decides what to
    /// reuse); a cached image only short-circuits an unforced build.
    pub(crate) fn build_image<'a>(
        &'a self,
        build: &'a Build,
        tag: &'a str,
        force: bool,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let tag = normalize_tag(tag);

            let cached = self.image_cached(&tag).await?;
            if cached && !force {
                return Ok(());
            }

            for dependency in &build.dependent_builds {
                let dependency_build = Build {
                    context: dependency.context.clone(),
                    dockerfile: dependency.dockerfile.clone(),
                    args: dependency.args.clone(),
                    dependent_builds: Vec::new(),
                };

                self.build_image(&dependency_build, &dependency.tag, force)
                    .await
                    .map_err(|err| {
                        ManagerError::BuildFailed(format!(
                            "dependency '{}' build failed: {err}",
                            dependency.tag
                        ))
                    })?;
            }

            info!("building {tag}");

            let context_dir = if build.context.is_empty() {
                "."
            } else {
                build.context.as_str()
            };
            let context = tar_gz_context(Path::new(context_dir))?;

            let options = BuildOptions {
                tag: tag.clone(),
                dockerfile: build.dockerfile.clone(),
                build_args: build
                    .args
                    .0
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
                use_buildkit: !self.config.builder_v1,
            };

            let stream = self.engine.build_image(context, options);
            drain_ndjson(stream, |raw| self.handle_build_line(raw)).await?;

            info!("successfully built {tag}");
            Ok(())
        }
        .boxed()
    }

    pub(crate) async fn image_cached(&self, tag: &str) -> Result<bool> {
        let images = self.engine.list_images().await?;
        Ok(images
            .iter()
            .any(|image| image.repo_tags.iter().any(|cached| cached == tag)))
    }

    fn handle_pull_line(&self, raw: &[u8]) -> Result<()> {
        let line: PullLine =
            serde_json::from_slice(raw).map_err(|source| ManagerError::StreamDecode {
                kind: "pull",
                source,
            })?;

        if !line.error.is_empty() {
            return Err(ManagerError::PullFailed(line.error));
        }

        if !line.message.is_empty() {
            debug!("pull: {}", line.message);
        } else {
            debug!("pull: {}: {} {}", line.id, line.status, line.progress);
        }

        Ok(())
    }

    fn handle_build_line(&self, raw: &[u8]) -> Result<()> {
        let line: BuildLine =
            serde_json::from_slice(raw).map_err(|source| ManagerError::StreamDecode {
                kind: "build",
                source,
            })?;

        if !line.error.is_empty() {
            return Err(ManagerError::BuildFailed(line.error));
        }

        if let Some(aux) = &line.aux {
            log_build_status(aux)?;
        }

        if !line.message.is_empty() {
            debug!("build: {}", line.message);
        }

        if !line.stream.is_empty() {
            debug!("build: {}", line.stream.trim_end());
        }

        Ok(())
    }
}

/// Decodes and logs a build line's `aux` payload.
///
/// A string payload is the base64-encoded BuildKit status protobuf; anything
/// else (the legacy builder's image id object) is logged as-is.
fn log_build_status(aux: &serde_json::Value) -> Result<()> {
    let Some(encoded) = aux.as_str() else {
        debug!("build aux: {aux}");
        return Ok(());
    };

    let payload = BASE64_STANDARD
        .decode(encoded)
        .map_err(|err| ManagerError::AuxDecode(format!("invalid base64: {err}")))?;
    let status = BuildStatus::decode(payload.as_slice())
        .map_err(|err| ManagerError::AuxDecode(format!("invalid status payload: {err}")))?;

    for vertex in &status.vertexes {
        debug!("buildkit: {}", vertex.name);
    }
    for log in &status.logs {
        debug!("buildkit: {}", String::from_utf8_lossy(&log.msg).trim_end());
    }
    for vertex_status in &status.statuses {
        debug!("buildkit: {}", vertex_status.id);
    }
    for warning in &status.warnings {
        warn!("buildkit: {}", String::from_utf8_lossy(&warning.short));
    }

    Ok(())
}

/// Feeds every newline-delimited line of the stream to `handle`, tolerating
/// lines split across chunks.
async fn drain_ndjson(
    mut stream: BoxStream<'static, EngineResult<Bytes>>,
    mut handle: impl FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);

        while let Some(newline) = buffer.iter().position(|&byte| byte == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            let line = &line[..line.len() - 1];
            if !line.iter().all(u8::is_ascii_whitespace) {
                handle(line)?;
            }
        }
    }

    if !buffer.iter().all(u8::is_ascii_whitespace) {
        handle(&buffer)?;
    }

    Ok(())
}

fn normalize_tag(tag: &str) -> String {
    if tag.contains(':') {
        tag.to_string()
    } else {
        format!("{tag}:latest")
    }
}

/// Packages a build context directory as a gzipped tar archive.
fn tar_gz_context(dir: &Path) -> Result<Bytes> {
    if !dir.exists() {
        return Err(ManagerError::BuildContext(
            dir.display().to_string(),
            "directory does not exist".to_string(),
        ));
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    {
        let mut archive = tar::Builder::new(&mut encoder);
        archive.append_dir_all(".", dir)?;
        archive.finish()?;
    }
    let compressed = encoder.finish()?;

    Ok(Bytes::from(compressed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("alpine"), "alpine:latest");
        assert_eq!(normalize_tag("alpine:3.18"), "alpine:3.18");
        assert_eq!(normalize_tag("registry:5000/img"), "registry:5000/img");
    }

    #[test]
    fn test_tar_gz_context_packages_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut dockerfile = std::fs::File::create(dir.path().join("Dockerfile")).unwrap();
        writeln!(dockerfile, "FROM alpine").unwrap();

        let archive = tar_gz_context(dir.path()).unwrap();
        assert!(archive.len() > 2);
        // gzip magic
        assert_eq!(&archive[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_tar_gz_context_missing_directory() {
        assert!(matches!(
            tar_gz_context(Path::new("/no/such/context")),
            Err(ManagerError::BuildContext(_, _))
        ));
    }

    #[tokio::test]
    async fn test_drain_ndjson_reassembles_split_lines() {
        let chunks: Vec<EngineResult<Bytes>> = vec![
            Ok(Bytes::from_static(b"{\"a\"")),
            Ok(Bytes::from_static(b":1}\n{\"b\":2}\n")),
            Ok(Bytes::from_static(b"{\"c\":3}")),
        ];

        let mut lines = Vec::new();
        drain_ndjson(futures::stream::iter(chunks).boxed(), |raw| {
            lines.push(String::from_utf8_lossy(raw).to_string());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}", "{\"c\":3}"]);
    }

    #[test]
    fn test_build_status_logging_rejects_bad_base64() {
        let aux = serde_json::Value::String("not base64!!!".to_string());
        assert!(matches!(
            log_build_status(&aux),
            Err(ManagerError::AuxDecode(_))
        ));
    }

    #[test]
    fn test_build_status_logging_accepts_encoded_payload() {
        let status = BuildStatus {
            vertexes: vec![maestro_engine::progress::BuildVertex {
                digest: "sha256:abc".to_string(),
                name: "[1/1] FROM alpine".to_string(),
            }],
            ..Default::default()
        };

        let aux = serde_json::Value::String(BASE64_STANDARD.encode(status.encode_to_vec()));
        log_build_status(&aux).unwrap();
    }

    #[test]
    fn test_build_status_logging_passes_objects_through() {
        let aux = serde_json::json!({"ID": "sha256:built"});
        log_build_status(&aux).unwrap();
    }
}
