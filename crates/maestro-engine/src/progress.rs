//! Wire format of pull/build progress streams.
//!
//! Pull and build progress travels as newline-delimited JSON lines. The
//! structs here are the line vocabulary shared by engine implementations
//! (which emit them) and the procurement layer (which decodes them). A build
//! line's `aux` field may carry a base64-encoded protobuf status payload when
//! the engine builds with BuildKit; [`BuildStatus`] models the slice of that
//! payload the daemon reports.

use serde::{Deserialize, Serialize};

/// One line of image pull progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullLine {
    pub id: String,
    pub status: String,
    pub progress: String,
    pub message: String,
    pub error: String,
}

/// One line of image build progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildLine {
    pub message: String,
    pub stream: String,
    pub error: String,
    /// Either a base64 string (BuildKit status payload) or a plain JSON
    /// object (legacy builder image id).
    pub aux: Option<serde_json::Value>,
}

/// BuildKit status payload carried in a build line's `aux` field.
///
/// Field tags follow the BuildKit control API `StatusResponse` message; only
/// the fields the daemon logs are modeled.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BuildStatus {
    #[prost(message, repeated, tag = "1")]
    pub vertexes: Vec<BuildVertex>,
    #[prost(message, repeated, tag = "2")]
    pub statuses: Vec<BuildVertexStatus>,
    #[prost(message, repeated, tag = "3")]
    pub logs: Vec<BuildVertexLog>,
    #[prost(message, repeated, tag = "4")]
    pub warnings: Vec<BuildVertexWarning>,
}

/// A build graph vertex (one build step).
#[derive(Clone, PartialEq, prost::Message)]
pub struct BuildVertex {
    #[prost(string, tag = "1")]
    pub digest: String,
    #[prost(string, tag = "3")]
    pub name: String,
}

/// Progress of one vertex (downloads, extractions, ...).
#[derive(Clone, PartialEq, prost::Message)]
pub struct BuildVertexStatus {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub vertex: String,
}

/// Log output attached to a vertex.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BuildVertexLog {
    #[prost(string, tag = "1")]
    pub vertex: String,
    #[prost(bytes = "vec", tag = "4")]
    pub msg: Vec<u8>,
}

/// A warning attached to a vertex.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BuildVertexWarning {
    #[prost(string, tag = "1")]
    pub vertex: String,
    #[prost(bytes = "vec", tag = "3")]
    pub short: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_pull_line_decodes_partial_json() {
        let line: PullLine =
            serde_json::from_str(r#"{"status":"Downloading","id":"abc"}"#).unwrap();
        assert_eq!(line.status, "Downloading");
        assert_eq!(line.id, "abc");
        assert!(line.error.is_empty());
    }

    #[test]
    fn test_build_line_aux_forms() {
        let with_string: BuildLine = serde_json::from_str(r#"{"aux":"c29tZSBieXRlcw=="}"#).unwrap();
        assert!(with_string.aux.unwrap().is_string());

        let with_object: BuildLine = serde_json::from_str(r#"{"aux":{"ID":"sha256:x"}}"#).unwrap();
        assert!(with_object.aux.unwrap().is_object());

        let without: BuildLine = serde_json::from_str(r#"{"stream":"Step 1/2"}"#).unwrap();
        assert!(without.aux.is_none());
    }

    #[test]
    fn test_build_status_protobuf_round_trip() {
        let status = BuildStatus {
            vertexes: vec![BuildVertex {
                digest: "sha256:aaa".to_string(),
                name: "[1/2] FROM alpine".to_string(),
            }],
            statuses: vec![],
            logs: vec![BuildVertexLog {
                vertex: "sha256:aaa".to_string(),
                msg: b"hello\n".to_vec(),
            }],
            warnings: vec![],
        };

        let encoded = status.encode_to_vec();
        let decoded = BuildStatus::decode(encoded.as_slice()).unwrap();
        assert_eq!(decoded, status);
    }
}
