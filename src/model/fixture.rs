//! Deterministic fixture backend.
//!
//! Stands in for a real prototype classifier in tests and local development:
//! decoding, rescaling, and artifact shapes are real, while predictions and
//! activation maps are synthesized deterministically from pixel content.
//! Production deployments inject their own [`Model`] / [`DomainGate`]
//! implementations instead.

use std::path::Path;

use image::imageops::FilterType;
use image::{GrayImage, Luma, Rgb, RgbImage};

use crate::error::ModelError;
use crate::model::{
    ActivationPatterns, ActivationSignals, DomainGate, ImageTensor, Inference, Model,
    ModelResult, PredictionResult,
};

/// Fixture classifier: rescales to a square canonical image and synthesizes
/// banded activation maps.
#[derive(Debug, Clone)]
pub struct FixtureModel {
    /// Canonical image edge length in pixels.
    pub input_edge: u32,
    /// Number of learned prototypes the backend pretends to hold. Must be at
    /// least the `k` requested from `nearest_k_prototypes`.
    pub prototype_pool: usize,
    /// Number of output classes.
    pub class_count: u32,
}

impl Default for FixtureModel {
    fn default() -> Self {
        Self {
            input_edge: 224,
            prototype_pool: 16,
            class_count: 200,
        }
    }
}

impl FixtureModel {
    /// Small variant for fast tests.
    pub fn small() -> Self {
        Self {
            input_edge: 64,
            ..Default::default()
        }
    }
}

impl Model for FixtureModel {
    fn load_image(&self, path: &Path) -> ModelResult<ImageTensor> {
        let bytes = std::fs::read(path).map_err(|e| ModelError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let decoded = image::load_from_memory(&bytes).map_err(|e| ModelError::Decode {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(ImageTensor {
            pixels: decoded.to_rgb8(),
        })
    }

    fn predict(&self, input: &ImageTensor) -> ModelResult<Inference> {
        let edge = self.input_edge;
        let canonical = image::DynamicImage::ImageRgb8(input.pixels.clone())
            .resize_exact(edge, edge, FilterType::Triangle)
            .to_rgb8();

        // Mean brightness drives the synthetic class scores, so the same
        // image always predicts the same classes.
        let sum: u64 = canonical
            .pixels()
            .map(|p| p[0] as u64 + p[1] as u64 + p[2] as u64)
            .sum();
        let mean = (sum / (3 * edge as u64 * edge as u64)) as u32;

        let mut predictions = PredictionResult::new();
        for rank in 0..3u32 {
            let class = (mean + rank) % self.class_count;
            let confidence = (0.9 - 0.3 * rank as f32).max(0.05);
            predictions.insert(class, (confidence, rank));
        }

        let bands = self.prototype_pool.max(1) as u32;
        let band_h = (edge / bands).max(1);
        let maps: Vec<GrayImage> = (0..self.prototype_pool)
            .map(|p| {
                let band = p as u32 % bands;
                GrayImage::from_fn(edge, edge, move |_x, y| {
                    Luma([if y / band_h == band { 230 } else { 40 }])
                })
            })
            .collect();
        let weights: Vec<f32> = (0..self.prototype_pool)
            .map(|p| 1.0 / (p as f32 + 1.0))
            .collect();

        Ok(Inference {
            predictions,
            canonical,
            signals: ActivationSignals { maps },
            patterns: ActivationPatterns { weights },
        })
    }

    fn nearest_k_prototypes(
        &self,
        k: usize,
        canonical: &RgbImage,
        signals: &ActivationSignals,
        patterns: &ActivationPatterns,
    ) -> ModelResult<Vec<RgbImage>> {
        if signals.maps.len() < k || patterns.weights.len() < k {
            return Err(ModelError::Inference {
                message: format!(
                    "prototype pool of {} cannot serve k={k}",
                    signals.maps.len()
                ),
            });
        }

        let mut renderings = Vec::with_capacity(k);
        for i in 0..k {
            let map = &signals.maps[i];
            let boost = 0.5 + 0.5 * patterns.weights[i].clamp(0.0, 1.0);
            let img = RgbImage::from_fn(canonical.width(), canonical.height(), |x, y| {
                let px = canonical.get_pixel(x, y);
                let mx = x.min(map.width().saturating_sub(1));
                let my = y.min(map.height().saturating_sub(1));
                let m = map.get_pixel(mx, my)[0] as f32 / 255.0;
                let gain = boost * (0.25 + 0.75 * m);
                Rgb([shade(px[0], gain), shade(px[1], gain), shade(px[2], gain)])
            });
            renderings.push(img);
        }
        Ok(renderings)
    }
}

fn shade(v: u8, gain: f32) -> u8 {
    (v as f32 * gain).round().clamp(0.0, 255.0) as u8
}

/// Fixture domain gate: accepts images whose shorter edge meets a minimum,
/// reading only the header (no full decode).
#[derive(Debug, Clone)]
pub struct FixtureGate {
    pub min_edge: u32,
}

impl Default for FixtureGate {
    fn default() -> Self {
        Self { min_edge: 64 }
    }
}

impl DomainGate for FixtureGate {
    fn check(&self, path: &Path) -> ModelResult<bool> {
        match image::image_dimensions(path) {
            Ok((w, h)) => Ok(w.min(h) >= self.min_edge),
            Err(image::ImageError::IoError(e)) => Err(ModelError::Read {
                path: path.display().to_string(),
                source: e,
            }),
            Err(e) => Err(ModelError::Decode {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn gradient_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    fn jpeg_bytes(w: u32, h: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        gradient_image(w, h)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    #[test]
    fn load_image_rejects_garbage() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("upload.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let model = FixtureModel::small();
        assert!(matches!(
            model.load_image(&path),
            Err(ModelError::Decode { .. })
        ));
    }

    #[test]
    fn predict_is_deterministic_and_canonical_sized() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("upload.jpg");
        std::fs::write(&path, jpeg_bytes(120, 90)).unwrap();

        let model = FixtureModel::small();
        let tensor = model.load_image(&path).unwrap();
        let a = model.predict(&tensor).unwrap();
        let b = model.predict(&tensor).unwrap();

        assert_eq!(a.canonical.dimensions(), (64, 64));
        assert_eq!(a.predictions, b.predictions);
        assert_eq!(a.predictions.len(), 3);
        // Ranks are carried in the values and are unique.
        let mut ranks: Vec<u32> = a.predictions.values().map(|&(_, r)| r).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn nearest_k_returns_exactly_k_rank_ordered() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("upload.jpg");
        std::fs::write(&path, jpeg_bytes(100, 100)).unwrap();

        let model = FixtureModel::small();
        let tensor = model.load_image(&path).unwrap();
        let inf = model.predict(&tensor).unwrap();
        let acts = model
            .nearest_k_prototypes(10, &inf.canonical, &inf.signals, &inf.patterns)
            .unwrap();

        assert_eq!(acts.len(), 10);
        // Different prototypes highlight different bands.
        assert_ne!(acts[0].as_raw(), acts[9].as_raw());
    }

    #[test]
    fn nearest_k_fails_when_pool_too_small() {
        let model = FixtureModel {
            prototype_pool: 4,
            ..FixtureModel::small()
        };
        let canonical = gradient_image(64, 64);
        let signals = ActivationSignals {
            maps: vec![GrayImage::new(64, 64); 4],
        };
        let patterns = ActivationPatterns {
            weights: vec![1.0; 4],
        };
        assert!(matches!(
            model.nearest_k_prototypes(10, &canonical, &signals, &patterns),
            Err(ModelError::Inference { .. })
        ));
    }

    #[test]
    fn gate_filters_by_minimum_edge() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ok = tmp.path().join("ok.jpg");
        let small = tmp.path().join("small.jpg");
        std::fs::write(&ok, jpeg_bytes(128, 96)).unwrap();
        std::fs::write(&small, jpeg_bytes(16, 16)).unwrap();

        let gate = FixtureGate { min_edge: 32 };
        assert!(gate.check(&ok).unwrap());
        assert!(!gate.check(&small).unwrap());
    }

    #[test]
    fn gate_errors_on_undecodable_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("junk.jpg");
        std::fs::write(&path, b"junk").unwrap();
        let gate = FixtureGate::default();
        assert!(gate.check(&path).is_err());
    }
}
