//! Interactive cell-tracking core: an editable lineage forest with
//! localized track-identity maintenance, invertible edit actions with
//! undo/redo, segmentation correspondence, and the interfaces to the
//! external optimizer and visual layers.
//!
//! The editing entry point is [`actions::TracksController`]; the data model
//! it drives is [`graph::Tracks`].

pub mod actions;
pub mod export;
pub mod graph;
pub mod identity;
pub mod segmentation;
pub mod session;
pub mod solver;
pub mod sync;

pub use actions::{
    EditError, NodeSpec, OnConflict, SegmentationEdit, TracksAction, TracksController,
};
pub use graph::{Edge, NodeAttrs, NodeId, Position, TimePoint, TrackId, Tracks};
pub use session::{Run, Session};
pub use solver::{Solution, Solver, SolverParams};
pub use sync::TracksEvent;
