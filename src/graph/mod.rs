//! The tracks model: an arena-stored lineage forest with invariant-preserving
//! primitive mutations.

mod error;
mod forest;
mod tracks;
mod types;
mod validate;

// Re-export key types for convenient access
pub use error::{ConsistencyError, ConsistencyKind, GraphError};
pub use forest::Forest;
pub use tracks::Tracks;
pub use types::{Edge, NodeAttrs, NodeId, Position, TimePoint, TrackId};
pub use validate::ConsistencyChecker;
