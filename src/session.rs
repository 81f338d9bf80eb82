//! Session identity and the session directory manager.
//!
//! A session is one upload request's unit of storage: a generated identifier,
//! a directory tree laid out by [`crate::paths`], and a manifest recording
//! what was written. Identifier uniqueness is probabilistic at generation
//! time and enforced at directory creation, which fails loudly (and is not
//! retried) on a collision.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::paths::{SessionPaths, StoragePaths};

/// Length of the random component of a session identifier.
pub const SESSION_RANDOM_LEN: usize = 22;

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Generate a fresh session identifier: 22 random alphanumeric characters
/// followed by the unix timestamp in seconds.
///
/// No coordination with other in-flight requests is needed; the timestamp
/// suffix keeps identifiers coarsely ordered and the random prefix makes a
/// collision within one second astronomically unlikely (62^22 space).
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let random: String = (0..SESSION_RANDOM_LEN)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect();
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{random}{epoch}")
}

/// What happens to a session tree once its artifacts have been exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionMode {
    /// Destroyed immediately after export. Pairs with remote export, where
    /// the blob store holds the durable copies.
    Ephemeral,
    /// Retained on storage so locators keep resolving and the selection
    /// phase can run. Pairs with local export.
    Persistent,
}

/// Per-session metadata held in the in-memory index.
#[derive(Debug, Clone)]
pub struct SessionManifest {
    pub id: String,
    pub created_at: SystemTime,
    pub root: PathBuf,
    pub retention: RetentionMode,
    /// Relative paths of artifacts written through the store, in write order.
    pub artifacts: Vec<String>,
}

/// Session store: creates, indexes, and destroys session trees.
///
/// The on-disk tree is the source of truth for artifact bytes; the manifest
/// index is an explicit record of what each live session contains, and can
/// be rebuilt per-session from disk after a restart via [`Self::open_existing`].
pub struct SessionStore {
    paths: StoragePaths,
    sessions: DashMap<String, SessionManifest>,
}

impl SessionStore {
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            sessions: DashMap::new(),
        }
    }

    /// The storage root this store allocates sessions under.
    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Allocate a new session with a generated identifier.
    pub fn create(&self, retention: RetentionMode) -> SessionResult<SessionPaths> {
        self.create_with_id(&generate_session_id(), retention)
    }

    /// Allocate a session tree under an explicit identifier.
    ///
    /// Fails with [`SessionError::IdentifierCollision`] if the tree already
    /// exists. This is the actual uniqueness enforcement point for generated
    /// identifiers and is treated as fatal, not retried.
    pub fn create_with_id(
        &self,
        session_id: &str,
        retention: RetentionMode,
    ) -> SessionResult<SessionPaths> {
        let session = self.paths.session(session_id);
        if session.exists() {
            return Err(SessionError::IdentifierCollision {
                session_id: session_id.to_string(),
            });
        }

        for dir in [&session.root, &session.activations_dir] {
            std::fs::create_dir_all(dir).map_err(|e| SessionError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }

        self.sessions.insert(
            session_id.to_string(),
            SessionManifest {
                id: session_id.to_string(),
                created_at: SystemTime::now(),
                root: session.root.clone(),
                retention,
                artifacts: Vec::new(),
            },
        );

        tracing::debug!(session = %session_id, ?retention, "session created");
        Ok(session)
    }

    /// Write one artifact under the session tree and record it in the
    /// manifest. `relative_path` is interpreted against the session root.
    pub fn write(
        &self,
        session_id: &str,
        relative_path: &str,
        bytes: &[u8],
    ) -> SessionResult<PathBuf> {
        let session = self.resolve(session_id)?;
        let path = session.root.join(relative_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SessionError::CreateDir {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(&path, bytes).map_err(|e| SessionError::Write {
            path: path.display().to_string(),
            source: e,
        })?;

        if let Some(mut manifest) = self.sessions.get_mut(session_id) {
            manifest.artifacts.push(relative_path.to_string());
        }
        Ok(path)
    }

    /// Recursively remove the session tree and drop its manifest.
    ///
    /// Destroying a session that was already destroyed fails with
    /// [`SessionError::Destroy`].
    pub fn destroy(&self, session_id: &str) -> SessionResult<()> {
        let session = self.paths.session(session_id);
        std::fs::remove_dir_all(&session.root).map_err(|e| SessionError::Destroy {
            path: session.root.display().to_string(),
            source: e,
        })?;
        self.sessions.remove(session_id);
        tracing::debug!(session = %session_id, "session destroyed");
        Ok(())
    }

    /// Resolve a session that must already exist, either in the index or on
    /// disk (e.g. a persistent session from before a restart). Re-opening a
    /// disk-only session registers it with `Persistent` retention.
    pub fn open_existing(&self, session_id: &str) -> SessionResult<SessionPaths> {
        let session = self.resolve(session_id)?;
        if !self.sessions.contains_key(session_id) {
            self.sessions.insert(
                session_id.to_string(),
                SessionManifest {
                    id: session_id.to_string(),
                    created_at: SystemTime::now(),
                    root: session.root.clone(),
                    retention: RetentionMode::Persistent,
                    artifacts: Vec::new(),
                },
            );
        }
        Ok(session)
    }

    /// Snapshot of a session's manifest, if it is live in this process.
    pub fn manifest(&self, session_id: &str) -> Option<SessionManifest> {
        self.sessions.get(session_id).map(|m| m.value().clone())
    }

    /// Number of sessions live in the in-memory index.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn resolve(&self, session_id: &str) -> SessionResult<SessionPaths> {
        let session = self.paths.session(session_id);
        if !session.exists() {
            return Err(SessionError::NotFound {
                session_id: session_id.to_string(),
            });
        }
        Ok(session)
    }
}
