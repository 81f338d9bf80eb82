//! Selection reconciliation: the second phase of the protocol.
//!
//! The client echoes back a subset of previously issued activation locators;
//! the reconciler recovers `(session id, index)` pairs purely by parsing
//! them, then copies the referenced activation images into the session's
//! `selected/` subdirectory.
//!
//! Policy: all locators are parsed before any side effect, so a malformed
//! locator never leaves partial state. Copies then run in input order; a
//! missing artifact aborts the call, and side effects already applied
//! (directory creation, prior copies) are retained. Re-running the same
//! selection overwrites idempotently.

use std::sync::Arc;

use crate::error::{SelectError, SessionError};
use crate::export::{parse_activation_locator, ParsedLocator};
use crate::session::SessionStore;

pub type SelectResult<T> = std::result::Result<T, SelectError>;

/// Outcome of a selection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The client sent no locators. A notice, not an error.
    Empty,
    /// Indices recovered and materialized, in input order.
    Selected { indices: Vec<usize> },
}

/// Recovers selections from issued locators and materializes them.
pub struct Reconciler {
    store: Arc<SessionStore>,
}

impl Reconciler {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }

    /// Reconcile a set of locators into a persisted selection.
    pub fn select(&self, locators: &[String]) -> SelectResult<Selection> {
        if locators.is_empty() {
            return Ok(Selection::Empty);
        }

        // Parse everything up front: structural errors are client errors and
        // must surface before any filesystem mutation.
        let parsed: Vec<ParsedLocator> = locators
            .iter()
            .map(|l| parse_activation_locator(l))
            .collect::<Result<_, _>>()?;

        let mut indices = Vec::with_capacity(parsed.len());
        for p in &parsed {
            let session = self.store.open_existing(&p.session_id).map_err(|e| match e {
                SessionError::NotFound { session_id } => {
                    SelectError::SessionNotFound { session_id }
                }
                other => SelectError::Copy {
                    path: p.session_id.clone(),
                    source: std::io::Error::other(other.to_string()),
                },
            })?;

            let source = session.activation(p.index);
            if !source.is_file() {
                return Err(SelectError::ArtifactNotFound {
                    session_id: p.session_id.clone(),
                    index: p.index,
                });
            }

            std::fs::create_dir_all(&session.selected_dir).map_err(|e| SelectError::Copy {
                path: session.selected_dir.display().to_string(),
                source: e,
            })?;

            let target = session.selected(p.index);
            std::fs::copy(&source, &target).map_err(|e| SelectError::Copy {
                path: target.display().to_string(),
                source: e,
            })?;
            indices.push(p.index);
        }

        tracing::info!(count = indices.len(), "selection materialized");
        Ok(Selection::Selected { indices })
    }
}
