//! Error taxonomy for the edit layer.
//!
//! Three classes of failure, per the editing contract:
//! - validation errors reject a malformed request before any mutation,
//! - conflict errors need explicit caller confirmation before proceeding,
//! - consistency errors abort the in-progress action, which is rolled back in
//!   full; the session continues.

use crate::graph::{Edge, GraphError};
use thiserror::Error;

/// The specific category of a validation rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// Wrong time ordering (horizontal edge, mask/node time mismatch).
    TimeOrder,
    /// Wrong number of things (empty selection, triple division, missing
    /// position).
    Cardinality,
    /// The requested edge already exists.
    DuplicateEdge,
    /// A referenced node is not in the graph.
    UnknownNode,
    /// A referenced edge is not in the graph.
    UnknownEdge,
    /// A skip connection would bypass an existing node of the same track.
    Bypass,
    /// A (track, time) slot or segmentation label is already taken.
    SlotOccupied,
    /// The attribute is segmentation-managed and cannot be set directly.
    DerivedAttribute,
    /// Pixels were supplied but no segmentation volume is attached.
    MissingSegmentation,
    /// A solver result is not forest-shaped.
    MalformedSolution,
}

/// Failure of an edit operation. No mutation survives an error: validation
/// and conflict errors are raised before anything is touched, and anything
/// else is rolled back.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditError {
    #[error("{message}")]
    Validation {
        kind: ValidationKind,
        message: String,
    },
    /// The target of a new edge already has an incoming edge. Never resolved
    /// silently: the caller must confirm breaking `existing` and retry with
    /// [`OnConflict::BreakExisting`](super::OnConflict::BreakExisting).
    #[error("target already has an incoming edge {existing}; breaking it requires confirmation")]
    Conflict { existing: Edge },
    #[error("graph rejected mutation: {0}")]
    Graph(#[from] GraphError),
    /// An internal invariant failed mid-action. The action was aborted; if
    /// the rollback itself succeeded the model is back in its prior state.
    #[error("action aborted: {0}")]
    Inconsistent(String),
}

impl EditError {
    pub(crate) fn validation(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self::Validation {
            kind,
            message: message.into(),
        }
    }
}
