//! Error types for the tracks model.
use super::types::{Edge, NodeId, TimePoint, TrackId};
use crate::segmentation::SegError;
use thiserror::Error;

/// Rejection of a primitive mutation. The graph is untouched when one of
/// these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),
    #[error("node {0} not found")]
    MissingNode(NodeId),
    #[error("track {track} already has a node at time {time}")]
    SlotOccupied { track: TrackId, time: TimePoint },
    #[error("segmentation label {label} at time {time} is already assigned to a node")]
    LabelOccupied { time: TimePoint, label: u64 },
    #[error("edge {0} already exists")]
    DuplicateEdge(Edge),
    #[error("no edge {0}")]
    MissingEdge(Edge),
    #[error("edge {edge} does not increase in time ({source_time} -> {target_time})")]
    NonIncreasingTime {
        edge: Edge,
        source_time: TimePoint,
        target_time: TimePoint,
    },
    #[error("edge {edge} would merge: target already has an incoming edge from {existing}")]
    WouldMerge { edge: Edge, existing: NodeId },
    #[error("node {0} already has two outgoing edges")]
    TooManyChildren(NodeId),
    #[error("cannot remove node {0} while it still has incident edges")]
    IncidentEdges(NodeId),
    #[error("segmentation: {0}")]
    Segmentation(#[from] SegError),
}

/// The specific category of a consistency error.
//
// This enum allows for programmatic inspection of errors, which is more
// robust than string matching on the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyKind {
    /// Parent and child lists disagree with each other.
    LinkAsymmetry,
    /// A node has more than two outgoing edges.
    TooManyChildren,
    /// An edge does not strictly increase in time.
    TimeOrder,
    /// A query index disagrees with the node arena.
    IndexDrift,
}

/// A structured report from the full-graph consistency sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyError {
    /// The node where the violation was detected.
    pub node: NodeId,
    pub kind: ConsistencyKind,
    /// A human-readable message explaining the violation.
    pub message: String,
}
