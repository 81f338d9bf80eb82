//! Locator resolution: turning stored artifacts into externally
//! dereferenceable references.
//!
//! Two interchangeable strategies, selected at composition time:
//!
//! - **Local**: prepend a public static-mount prefix. Deterministic, never
//!   fails, requires the session tree to stay on disk (persistent retention).
//! - **Remote**: upload to a blob store and return the durable URL. Failure
//!   is a structured [`ExportError`], never a failure string in the URL
//!   channel.
//!
//! Both strategies emit the same trailing structure
//! `<session_id>/activations/<index>.jpg`, and the parser lives next to the
//! formatters so the selection reconciler can never drift from what the
//! resolver emits.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ExportError, SelectError};
use crate::paths::{SessionPaths, ACTIVATIONS_DIR};
use crate::session::RetentionMode;

pub type ExportResult<T> = std::result::Result<T, ExportError>;

/// The identity recovered from an activation locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLocator {
    pub session_id: String,
    pub index: usize,
}

/// Parse an activation locator back to `(session id, index)`.
///
/// The structure is fixed: the last path segment's stem is the activation
/// index, the second-from-last segment must be `activations`, and the
/// third-from-last is the session identifier. Anything else is a
/// [`SelectError::MalformedLocator`].
pub fn parse_activation_locator(locator: &str) -> Result<ParsedLocator, SelectError> {
    let malformed = |reason: &str| SelectError::MalformedLocator {
        locator: locator.to_string(),
        reason: reason.to_string(),
    };

    let segments: Vec<&str> = locator.split('/').collect();
    if segments.len() < 3 {
        return Err(malformed("too few path segments"));
    }

    let file = segments[segments.len() - 1];
    let dir = segments[segments.len() - 2];
    let session_id = segments[segments.len() - 3];

    if dir != ACTIVATIONS_DIR {
        return Err(malformed("expected an activations/ path segment"));
    }
    if session_id.is_empty() || !session_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(malformed("session identifier segment is not alphanumeric"));
    }

    let stem = file.split('.').next().unwrap_or("");
    let index: usize = stem
        .parse()
        .map_err(|_| malformed("activation index is not a number"))?;

    Ok(ParsedLocator {
        session_id: session_id.to_string(),
        index,
    })
}

/// A remote blob store an artifact can be uploaded to.
pub trait BlobStore: Send + Sync {
    /// Upload the file at `local_path` under `key` and return its durable
    /// public URL.
    fn upload(&self, local_path: &Path, key: &str) -> ExportResult<String>;
}

/// Blob store speaking plain HTTP PUT (S3-compatible gateways, MinIO,
/// WebDAV-style stores) with optional bearer authentication.
pub struct HttpBlobStore {
    endpoint: String,
    public_base: String,
    access_token: Option<String>,
    agent: ureq::Agent,
}

impl HttpBlobStore {
    pub fn new(endpoint: &str, public_base: &str, access_token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            public_base: public_base.trim_end_matches('/').to_string(),
            access_token,
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(30))
                .build(),
        }
    }
}

impl BlobStore for HttpBlobStore {
    fn upload(&self, local_path: &Path, key: &str) -> ExportResult<String> {
        let bytes = std::fs::read(local_path).map_err(|_| ExportError::FileNotFound {
            path: local_path.display().to_string(),
        })?;

        let url = format!("{}/{key}", self.endpoint);
        let mut request = self
            .agent
            .put(&url)
            .set("Content-Type", "application/octet-stream");
        if let Some(token) = &self.access_token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }

        match request.send_bytes(&bytes) {
            Ok(_) => Ok(format!("{}/{key}", self.public_base)),
            Err(ureq::Error::Status(status, _)) => Err(ExportError::Http {
                key: key.to_string(),
                status,
            }),
            Err(ureq::Error::Transport(t)) => Err(ExportError::Transport {
                key: key.to_string(),
                message: t.to_string(),
            }),
        }
    }
}

/// Artifact-to-locator resolution strategy.
pub enum Exporter {
    /// Static-mount path construction under a public prefix.
    Local { public_prefix: String },
    /// Upload through a blob store.
    Remote { store: Arc<dyn BlobStore> },
}

impl Exporter {
    pub fn local(public_prefix: &str) -> Self {
        Self::Local {
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn remote(store: Arc<dyn BlobStore>) -> Self {
        Self::Remote { store }
    }

    /// Resolve one stored artifact to an external locator.
    pub fn resolve(&self, session: &SessionPaths, relative_path: &str) -> ExportResult<String> {
        match self {
            Exporter::Local { public_prefix } => {
                Ok(format!("{public_prefix}/{}/{relative_path}", session.id))
            }
            Exporter::Remote { store } => {
                let key = format!("{}/{relative_path}", session.id);
                store.upload(&session.root.join(relative_path), &key)
            }
        }
    }

    /// The retention mode this strategy pairs with by default: local export
    /// needs the tree on disk, remote export does not.
    pub fn default_retention(&self) -> RetentionMode {
        match self {
            Exporter::Local { .. } => RetentionMode::Persistent,
            Exporter::Remote { .. } => RetentionMode::Ephemeral,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::{activation_rel, StoragePaths};

    #[test]
    fn local_resolution_is_deterministic() {
        let storage = StoragePaths::new("/data");
        let session = storage.session("aB3xY91700000000");
        let exporter = Exporter::local("/static/");

        let url = exporter.resolve(&session, &activation_rel(3)).unwrap();
        assert_eq!(url, "/static/aB3xY91700000000/activations/3.jpg");
    }

    #[test]
    fn emitted_locators_parse_back() {
        let storage = StoragePaths::new("/data");
        let session = storage.session("s3ssionId1700000000");
        let exporter = Exporter::local("/static");

        for index in 0..10 {
            let url = exporter.resolve(&session, &activation_rel(index)).unwrap();
            let parsed = parse_activation_locator(&url).unwrap();
            assert_eq!(parsed.session_id, "s3ssionId1700000000");
            assert_eq!(parsed.index, index);
        }
    }

    #[test]
    fn remote_style_urls_parse_back() {
        let parsed = parse_activation_locator(
            "https://bucket.example.com/aB3xY91700000000/activations/7.jpg",
        )
        .unwrap();
        assert_eq!(parsed.session_id, "aB3xY91700000000");
        assert_eq!(parsed.index, 7);
    }

    #[test]
    fn malformed_locators_are_rejected() {
        for bad in [
            "",
            "no-segments",
            "a/b",
            "/static/sess/selected/3.jpg",
            "/static/sess/activations/not-a-number.jpg",
            "/static/bad!id/activations/3.jpg",
            "/static//activations/3.jpg",
        ] {
            assert!(
                matches!(
                    parse_activation_locator(bad),
                    Err(SelectError::MalformedLocator { .. })
                ),
                "expected rejection of {bad:?}"
            );
        }
    }

    #[test]
    fn extensionless_index_segment_still_parses() {
        let parsed = parse_activation_locator("/static/sess0/activations/5").unwrap();
        assert_eq!(parsed.index, 5);
    }

    #[test]
    fn default_retention_pairs_with_strategy() {
        assert_eq!(
            Exporter::local("/static").default_retention(),
            RetentionMode::Persistent
        );
        let store: Arc<dyn BlobStore> =
            Arc::new(HttpBlobStore::new("http://127.0.0.1:9", "http://cdn", None));
        assert_eq!(
            Exporter::remote(store).default_retention(),
            RetentionMode::Ephemeral
        );
    }
}
