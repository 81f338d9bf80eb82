//! Classifier and domain-gate capability seams.
//!
//! The classifier's internals (architecture, training, prototype learning)
//! are out of scope for this service: they are consumed through the opaque
//! [`Model`] trait and injected at composition time, with the concurrency
//! contract made explicit at the server layer (a bounded semaphore guards
//! inference; backends are not assumed reentrant).
//!
//! The [`DomainGate`] is the binary input filter restricting uploads to the
//! classifier's subject domain.

pub mod fixture;

use std::collections::BTreeMap;
use std::path::Path;

use image::{GrayImage, RgbImage};

use crate::error::ModelError;

pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// Predicted classes: class id → (confidence, rank).
///
/// Keys are unique; the map carries no ordering guarantee beyond what the
/// classifier returns, which is why the rank travels in the value.
pub type PredictionResult = BTreeMap<u32, (f32, u32)>;

/// A decoded, classifier-ready input image.
#[derive(Debug, Clone)]
pub struct ImageTensor {
    pub pixels: RgbImage,
}

/// Per-prototype similarity maps produced during a forward pass.
///
/// One grayscale map per learned prototype, aligned with the canonical
/// image's coordinate space, in the backend's internal prototype order.
#[derive(Debug, Clone)]
pub struct ActivationSignals {
    pub maps: Vec<GrayImage>,
}

/// Learned per-prototype weights paired with [`ActivationSignals`].
#[derive(Debug, Clone)]
pub struct ActivationPatterns {
    pub weights: Vec<f32>,
}

/// Everything a forward pass produces.
#[derive(Debug, Clone)]
pub struct Inference {
    pub predictions: PredictionResult,
    /// The rescaled canonical image the explanation artifacts are drawn on.
    pub canonical: RgbImage,
    pub signals: ActivationSignals,
    pub patterns: ActivationPatterns,
}

/// A prototype-based classifier backend.
pub trait Model: Send + Sync {
    /// Load and decode a stored image into classifier-ready form.
    fn load_image(&self, path: &Path) -> ModelResult<ImageTensor>;

    /// Run a forward pass.
    fn predict(&self, input: &ImageTensor) -> ModelResult<Inference>;

    /// Render the `k` nearest-prototype activation images, rank-ordered by
    /// similarity (index 0 is the strongest match). Must return exactly `k`
    /// images.
    fn nearest_k_prototypes(
        &self,
        k: usize,
        canonical: &RgbImage,
        signals: &ActivationSignals,
        patterns: &ActivationPatterns,
    ) -> ModelResult<Vec<RgbImage>>;
}

/// Binary filter restricting inputs to the classifier's subject domain.
pub trait DomainGate: Send + Sync {
    /// Returns `true` if the stored image belongs to the expected domain.
    fn check(&self, path: &Path) -> ModelResult<bool>;
}
