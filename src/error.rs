//! Rich diagnostic error types for the protolens service.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]`
//! derives, providing error codes, help text, and source chains. The server
//! layer maps these onto HTTP statuses: errors caused by client input
//! (unreadable image, out-of-domain image, malformed locator, missing
//! artifact) become 4xx responses, everything else is logged and surfaced as
//! a generic internal failure.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the protolens service.
#[derive(Debug, Error, Diagnostic)]
pub enum ProtoError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Path errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(protolens::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SessionError {
    #[error("session identifier collision: \"{session_id}\" already exists")]
    #[diagnostic(
        code(protolens::session::collision),
        help(
            "A freshly generated session identifier matched an existing directory. \
             With 22 random alphanumeric characters this is overwhelmingly unlikely; \
             if you see it repeatedly, check for a stuck clock or a bad RNG source."
        )
    )]
    IdentifierCollision { session_id: String },

    #[error("failed to create session directory: {path}")]
    #[diagnostic(
        code(protolens::session::create_dir),
        help("Ensure the storage root exists and is writable.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write artifact: {path}")]
    #[diagnostic(
        code(protolens::session::write),
        help("The storage medium rejected the write. Check permissions and free space.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to destroy session tree: {path}")]
    #[diagnostic(
        code(protolens::session::destroy),
        help(
            "The session directory could not be removed. It may already have been \
             destroyed, or a file inside it is held open."
        )
    )]
    Destroy {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session not found: \"{session_id}\"")]
    #[diagnostic(
        code(protolens::session::not_found),
        help(
            "No session directory with this identifier exists on storage. \
             Ephemeral sessions are removed after export and cannot be reopened."
        )
    )]
    NotFound { session_id: String },
}

// ---------------------------------------------------------------------------
// Model errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    #[error("failed to read image file: {path}")]
    #[diagnostic(
        code(protolens::model::read),
        help("The stored upload could not be read back. Check the storage medium.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode image {path}: {message}")]
    #[diagnostic(
        code(protolens::model::decode),
        help("The uploaded bytes are not a decodable image. Supported formats depend on the backend.")
    )]
    Decode { path: String, message: String },

    #[error("classifier inference failed: {message}")]
    #[diagnostic(
        code(protolens::model::inference),
        help("The classifier backend reported an internal failure. See the server log for details.")
    )]
    Inference { message: String },
}

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("uploaded image could not be read or decoded (session \"{session_id}\")")]
    #[diagnostic(
        code(protolens::pipeline::image_not_found),
        help("Upload a valid image file. The session directory has been cleaned up.")
    )]
    ImageNotFound { session_id: String },

    #[error("image rejected by the domain gate (session \"{session_id}\")")]
    #[diagnostic(
        code(protolens::pipeline::domain_rejected),
        help(
            "The input does not belong to the classifier's subject domain. \
             The session directory has been cleaned up."
        )
    )]
    DomainRejected { session_id: String },

    #[error("inference failed: {message}")]
    #[diagnostic(
        code(protolens::pipeline::inference),
        help("The classifier backend failed. This is an internal error, not a problem with the upload.")
    )]
    Inference { message: String },

    #[error("failed to encode artifact image: {message}")]
    #[diagnostic(
        code(protolens::pipeline::encode),
        help("An artifact image could not be encoded to JPEG before writing.")
    )]
    Encode { message: String },

    #[error("activation extraction returned {actual} images, expected {expected}")]
    #[diagnostic(
        code(protolens::pipeline::activation_count),
        help(
            "The backend must return exactly the requested number of activation \
             renderings, rank-ordered. A short list would silently truncate the \
             client response, so the whole request fails instead."
        )
    )]
    ActivationCount { expected: usize, actual: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),
}

// ---------------------------------------------------------------------------
// Export errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ExportError {
    #[error("artifact file not found for export: {path}")]
    #[diagnostic(
        code(protolens::export::file_not_found),
        help("The artifact vanished between materialization and export. Check the storage medium.")
    )]
    FileNotFound { path: String },

    #[error("blob store rejected upload of \"{key}\" with status {status}")]
    #[diagnostic(
        code(protolens::export::http_status),
        help("Check the blob store endpoint, the access token, and the bucket policy.")
    )]
    Http { key: String, status: u16 },

    #[error("blob store upload of \"{key}\" failed: {message}")]
    #[diagnostic(
        code(protolens::export::transport),
        help("The blob store endpoint could not be reached. Check connectivity and the configured URL.")
    )]
    Transport { key: String, message: String },
}

// ---------------------------------------------------------------------------
// Selection errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SelectError {
    #[error("malformed locator \"{locator}\": {reason}")]
    #[diagnostic(
        code(protolens::select::malformed_locator),
        help(
            "Selection input must be locators previously issued by /upload, \
             shaped like .../<session_id>/activations/<index>.jpg."
        )
    )]
    MalformedLocator { locator: String, reason: String },

    #[error("activation {index} not found in session \"{session_id}\"")]
    #[diagnostic(
        code(protolens::select::artifact_not_found),
        help("The referenced activation image does not exist on storage. It may never have been produced.")
    )]
    ArtifactNotFound { session_id: String, index: usize },

    #[error("session not found: \"{session_id}\"")]
    #[diagnostic(
        code(protolens::select::session_not_found),
        help(
            "The session referenced by the locator no longer exists. Ephemeral \
             sessions are removed after export; only persistent sessions support selection."
        )
    )]
    SessionNotFound { session_id: String },

    #[error("failed to copy selected artifact: {path}")]
    #[diagnostic(
        code(protolens::select::copy),
        help("Check permissions and free space under the session's selected/ directory.")
    )]
    Copy {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(protolens::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {path}")]
    #[diagnostic(
        code(protolens::config::parse),
        help("Check the TOML syntax. {message}")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config file: {path}")]
    #[diagnostic(
        code(protolens::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(protolens::config::invalid),
        help("Check the ServiceConfig fields. {message}")
    )]
    Invalid { message: String },
}

/// Convenience alias for functions returning protolens results.
pub type ProtoResult<T> = std::result::Result<T, ProtoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_converts_to_proto_error() {
        let err = SessionError::IdentifierCollision {
            session_id: "abc".into(),
        };
        let proto: ProtoError = err.into();
        assert!(matches!(
            proto,
            ProtoError::Session(SessionError::IdentifierCollision { .. })
        ));
    }

    #[test]
    fn session_error_wraps_into_pipeline_error() {
        let err = SessionError::NotFound {
            session_id: "abc".into(),
        };
        let pipe: PipelineError = err.into();
        assert!(matches!(
            pipe,
            PipelineError::Session(SessionError::NotFound { .. })
        ));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = PipelineError::ActivationCount {
            expected: 10,
            actual: 7,
        };
        let msg = format!("{err}");
        assert!(msg.contains("10"));
        assert!(msg.contains("7"));

        let err = SelectError::ArtifactNotFound {
            session_id: "xyz".into(),
            index: 3,
        };
        let msg = format!("{err}");
        assert!(msg.contains("xyz"));
        assert!(msg.contains('3'));
    }
}
