//! Inference orchestrator: drives one upload from raw bytes to a fully
//! materialized session tree.
//!
//! Stage order: persist raw bytes → domain gate → decode → forward pass →
//! persist canonical image → render and persist k activation images. The
//! gate runs on the stored file *before* classifier decode, so out-of-domain
//! uploads do not pay the decode cost. Client-caused failures
//! (`ImageNotFound`, `DomainRejected`) destroy the session tree before the
//! error is surfaced; no orphaned directories on those paths.

use std::io::Cursor;
use std::sync::Arc;

use image::RgbImage;

use crate::error::{ModelError, PipelineError};
use crate::model::{DomainGate, Model, PredictionResult};
use crate::paths::{activation_rel, SCALED_FILE, UPLOAD_FILE};
use crate::session::{RetentionMode, SessionStore};

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Everything `/upload` needs to build a response: the session identity,
/// the predictions, and the relative paths of the materialized artifacts.
#[derive(Debug, Clone)]
pub struct UploadArtifacts {
    pub session_id: String,
    pub predictions: PredictionResult,
    /// Relative path of the stored raw upload (`upload.jpg`).
    pub original: String,
    /// Relative path of the rescaled canonical image (`scaled.jpg`).
    pub scaled: String,
    /// Relative paths of the activation renderings, index = similarity rank.
    pub activations: Vec<String>,
}

/// The request-scoped artifact pipeline.
///
/// Owns no classifier state itself; the model and gate are injected shared
/// capabilities. Admission control for the (possibly non-reentrant)
/// classifier lives at the server layer.
pub struct Pipeline {
    store: Arc<SessionStore>,
    model: Arc<dyn Model>,
    gate: Arc<dyn DomainGate>,
    prototype_count: usize,
}

impl Pipeline {
    pub fn new(
        store: Arc<SessionStore>,
        model: Arc<dyn Model>,
        gate: Arc<dyn DomainGate>,
        prototype_count: usize,
    ) -> Self {
        Self {
            store,
            model,
            gate,
            prototype_count,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn prototype_count(&self) -> usize {
        self.prototype_count
    }

    /// Run the full pipeline for one upload.
    ///
    /// Any storage write failure is fatal to the whole request; a partial
    /// session tree is never reported as success.
    pub fn process(
        &self,
        raw_image_bytes: &[u8],
        retention: RetentionMode,
    ) -> PipelineResult<UploadArtifacts> {
        let session = self.store.create(retention)?;
        let session_id = session.id.clone();

        self.store.write(&session_id, UPLOAD_FILE, raw_image_bytes)?;

        // Gate before decode: header-only inspection of the stored file.
        match self.gate.check(&session.upload) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(session = %session_id, "upload rejected by domain gate");
                return Err(self.fail_cleanup(
                    &session_id,
                    PipelineError::DomainRejected { session_id: session_id.clone() },
                ));
            }
            Err(e) => return Err(self.fail_model(&session_id, e)),
        }

        let tensor = match self.model.load_image(&session.upload) {
            Ok(t) => t,
            Err(e) => return Err(self.fail_model(&session_id, e)),
        };

        let inference = self
            .model
            .predict(&tensor)
            .map_err(|e| PipelineError::Inference {
                message: e.to_string(),
            })?;

        self.store
            .write(&session_id, SCALED_FILE, &encode_jpeg(&inference.canonical)?)?;

        let renderings = self
            .model
            .nearest_k_prototypes(
                self.prototype_count,
                &inference.canonical,
                &inference.signals,
                &inference.patterns,
            )
            .map_err(|e| PipelineError::Inference {
                message: e.to_string(),
            })?;
        if renderings.len() != self.prototype_count {
            return Err(PipelineError::ActivationCount {
                expected: self.prototype_count,
                actual: renderings.len(),
            });
        }

        let mut activations = Vec::with_capacity(renderings.len());
        for (index, rendering) in renderings.iter().enumerate() {
            let rel = activation_rel(index);
            self.store
                .write(&session_id, &rel, &encode_jpeg(rendering)?)?;
            activations.push(rel);
        }

        tracing::info!(
            session = %session_id,
            classes = inference.predictions.len(),
            activations = activations.len(),
            "upload processed"
        );

        Ok(UploadArtifacts {
            session_id,
            predictions: inference.predictions,
            original: UPLOAD_FILE.to_string(),
            scaled: SCALED_FILE.to_string(),
            activations,
        })
    }

    /// Map a model-layer failure on the read/decode path. Client-caused
    /// failures destroy the session tree first so no orphaned directory is
    /// left behind; backend failures keep the tree for postmortem.
    fn fail_model(&self, session_id: &str, err: ModelError) -> PipelineError {
        match err {
            ModelError::Read { .. } | ModelError::Decode { .. } => self.fail_cleanup(
                session_id,
                PipelineError::ImageNotFound {
                    session_id: session_id.to_string(),
                },
            ),
            ModelError::Inference { message } => PipelineError::Inference { message },
        }
    }

    fn fail_cleanup(&self, session_id: &str, err: PipelineError) -> PipelineError {
        if let Err(destroy_err) = self.store.destroy(session_id) {
            tracing::warn!(
                session = %session_id,
                error = %destroy_err,
                "failed to clean up session after pipeline failure"
            );
        }
        err
    }
}

fn encode_jpeg(img: &RgbImage) -> PipelineResult<Vec<u8>> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
        .map_err(|e| PipelineError::Encode {
            message: e.to_string(),
        })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixture::{FixtureGate, FixtureModel};
    use crate::paths::StoragePaths;

    fn test_pipeline(root: &std::path::Path) -> Pipeline {
        let store = Arc::new(SessionStore::new(StoragePaths::new(root)));
        store.paths().ensure_dirs().unwrap();
        Pipeline::new(
            store,
            Arc::new(FixtureModel::small()),
            Arc::new(FixtureGate { min_edge: 32 }),
            10,
        )
    }

    fn jpeg_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    #[test]
    fn process_materializes_full_session_tree() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pipeline = test_pipeline(tmp.path());

        let raw = jpeg_bytes(120, 96);
        let artifacts = pipeline
            .process(&raw, RetentionMode::Persistent)
            .unwrap();

        assert_eq!(artifacts.activations.len(), 10);
        for (i, rel) in artifacts.activations.iter().enumerate() {
            assert_eq!(rel, &activation_rel(i));
        }

        let session = pipeline.store().paths().session(&artifacts.session_id);
        assert_eq!(std::fs::read(&session.upload).unwrap(), raw);
        assert!(session.scaled.is_file());
        for i in 0..10 {
            assert!(session.activation(i).is_file(), "activation {i} missing");
        }
        assert!(!artifacts.predictions.is_empty());
    }

    #[test]
    fn unreadable_upload_fails_and_leaves_no_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pipeline = test_pipeline(tmp.path());

        let err = pipeline
            .process(b"this is not an image", RetentionMode::Persistent)
            .unwrap_err();
        assert!(matches!(err, PipelineError::ImageNotFound { .. }));
        assert!(pipeline.store().paths().list_sessions().is_empty());
    }

    #[test]
    fn out_of_domain_upload_fails_and_leaves_no_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pipeline = test_pipeline(tmp.path());

        // 16x16 is below the gate's 32px minimum edge.
        let err = pipeline
            .process(&jpeg_bytes(16, 16), RetentionMode::Persistent)
            .unwrap_err();
        assert!(matches!(err, PipelineError::DomainRejected { .. }));
        assert!(pipeline.store().paths().list_sessions().is_empty());
    }

    #[test]
    fn short_activation_list_fails_the_request() {
        struct TruncatingModel(FixtureModel);
        impl Model for TruncatingModel {
            fn load_image(&self, path: &std::path::Path) -> crate::model::ModelResult<crate::model::ImageTensor> {
                self.0.load_image(path)
            }
            fn predict(&self, input: &crate::model::ImageTensor) -> crate::model::ModelResult<crate::model::Inference> {
                self.0.predict(input)
            }
            fn nearest_k_prototypes(
                &self,
                k: usize,
                canonical: &RgbImage,
                signals: &crate::model::ActivationSignals,
                patterns: &crate::model::ActivationPatterns,
            ) -> crate::model::ModelResult<Vec<RgbImage>> {
                let mut v = self.0.nearest_k_prototypes(k, canonical, signals, patterns)?;
                v.truncate(k - 3);
                Ok(v)
            }
        }

        let tmp = tempfile::TempDir::new().unwrap();
        let store = Arc::new(SessionStore::new(StoragePaths::new(tmp.path())));
        store.paths().ensure_dirs().unwrap();
        let pipeline = Pipeline::new(
            store,
            Arc::new(TruncatingModel(FixtureModel::small())),
            Arc::new(FixtureGate { min_edge: 32 }),
            10,
        );

        let err = pipeline
            .process(&jpeg_bytes(64, 64), RetentionMode::Persistent)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ActivationCount {
                expected: 10,
                actual: 7
            }
        ));
    }
}
