//! # protolens
//!
//! An explainable image-classification service built around a prototype-based
//! classifier: every prediction ships with the visual evidence for it.
//!
//! ## Architecture
//!
//! - **Session layer** (`session`, `paths`): collision-resistant session
//!   identities and a fixed on-disk artifact layout per request
//! - **Pipeline** (`pipeline`): domain gate → classifier → nearest-prototype
//!   extraction → artifact materialization
//! - **Export** (`export`): resolves stored artifacts to fetchable locators,
//!   either through a static mount or a remote blob store
//! - **Selection** (`select`): recovers `(session, index)` from previously
//!   issued locators and persists a curated subset
//! - **Model seam** (`model`): the classifier and the input-domain filter are
//!   opaque capabilities injected at composition time
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use protolens::model::fixture::{FixtureGate, FixtureModel};
//! use protolens::paths::StoragePaths;
//! use protolens::pipeline::Pipeline;
//! use protolens::session::{RetentionMode, SessionStore};
//!
//! let store = Arc::new(SessionStore::new(StoragePaths::new("requests")));
//! let pipeline = Pipeline::new(
//!     Arc::clone(&store),
//!     Arc::new(FixtureModel::default()),
//!     Arc::new(FixtureGate::default()),
//!     10,
//! );
//! let bytes = std::fs::read("bird.jpg").unwrap();
//! let artifacts = pipeline.process(&bytes, RetentionMode::Persistent).unwrap();
//! assert_eq!(artifacts.activations.len(), 10);
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod select;
pub mod session;
