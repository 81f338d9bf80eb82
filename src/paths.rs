//! On-disk artifact layout for protolens.
//!
//! Provides `StoragePaths` (the service storage root) and `SessionPaths`
//! (the per-session tree). The layout is canonical and shared between the
//! pipeline, the locator resolver, and the selection reconciler:
//!
//! ```text
//! <root>/<session_id>/upload.jpg
//! <root>/<session_id>/scaled.jpg
//! <root>/<session_id>/activations/<0..k-1>.jpg
//! <root>/<session_id>/selected/<i>.jpg
//! ```

use std::path::PathBuf;

use crate::error::PathError;

/// File name of the stored raw upload.
pub const UPLOAD_FILE: &str = "upload.jpg";
/// File name of the rescaled canonical image.
pub const SCALED_FILE: &str = "scaled.jpg";
/// Directory holding the rank-ordered activation renderings.
pub const ACTIVATIONS_DIR: &str = "activations";
/// Directory holding the client's curated selection.
pub const SELECTED_DIR: &str = "selected";
/// Extension used for every materialized artifact.
pub const ARTIFACT_EXT: &str = "jpg";

/// Relative path of the activation artifact at `index`, e.g. `activations/3.jpg`.
pub fn activation_rel(index: usize) -> String {
    format!("{ACTIVATIONS_DIR}/{index}.{ARTIFACT_EXT}")
}

/// Service-level storage root under which all session trees live.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub root: PathBuf,
}

impl StoragePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the storage root. Idempotent.
    pub fn ensure_dirs(&self) -> Result<(), PathError> {
        std::fs::create_dir_all(&self.root).map_err(|e| PathError::CreateDir {
            path: self.root.display().to_string(),
            source: e,
        })
    }

    /// Derive the session tree for a given identifier.
    pub fn session(&self, session_id: &str) -> SessionPaths {
        let root = self.root.join(session_id);
        SessionPaths {
            id: session_id.to_string(),
            upload: root.join(UPLOAD_FILE),
            scaled: root.join(SCALED_FILE),
            activations_dir: root.join(ACTIVATIONS_DIR),
            selected_dir: root.join(SELECTED_DIR),
            root,
        }
    }

    /// List session identifiers currently present on storage.
    pub fn list_sessions(&self) -> Vec<String> {
        match std::fs::read_dir(&self.root) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
                .filter_map(|e| e.file_name().into_string().ok())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Per-session directory layout.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub id: String,
    /// `<root>/<session_id>/`
    pub root: PathBuf,
    /// `root/upload.jpg` — raw upload, immutable after write
    pub upload: PathBuf,
    /// `root/scaled.jpg` — rescaled canonical image
    pub scaled: PathBuf,
    /// `root/activations/` — rank-ordered activation renderings
    pub activations_dir: PathBuf,
    /// `root/selected/` — client-curated selection
    pub selected_dir: PathBuf,
}

impl SessionPaths {
    /// Absolute path of the activation artifact at `index`.
    pub fn activation(&self, index: usize) -> PathBuf {
        self.activations_dir.join(format!("{index}.{ARTIFACT_EXT}"))
    }

    /// Absolute path of the selected copy of the activation at `index`.
    pub fn selected(&self, index: usize) -> PathBuf {
        self.selected_dir.join(format!("{index}.{ARTIFACT_EXT}"))
    }

    /// Check if this session tree exists on storage.
    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_paths_derive_from_id() {
        let storage = StoragePaths::new("/data/protolens");
        let session = storage.session("aB3xY9");

        assert_eq!(session.id, "aB3xY9");
        assert_eq!(session.root, PathBuf::from("/data/protolens/aB3xY9"));
        assert_eq!(session.upload, PathBuf::from("/data/protolens/aB3xY9/upload.jpg"));
        assert_eq!(session.scaled, PathBuf::from("/data/protolens/aB3xY9/scaled.jpg"));
        assert_eq!(
            session.activation(3),
            PathBuf::from("/data/protolens/aB3xY9/activations/3.jpg")
        );
        assert_eq!(
            session.selected(7),
            PathBuf::from("/data/protolens/aB3xY9/selected/7.jpg")
        );
    }

    #[test]
    fn activation_rel_matches_session_layout() {
        let storage = StoragePaths::new("/data");
        let session = storage.session("s");
        assert_eq!(session.root.join(activation_rel(4)), session.activation(4));
    }

    #[test]
    fn list_sessions_empty_dir() {
        let storage = StoragePaths::new("/nonexistent");
        assert!(storage.list_sessions().is_empty());
    }
}
