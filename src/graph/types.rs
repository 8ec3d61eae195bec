use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// A unique, session-stable identifier for a detection.
///
/// Never reused while a session is alive, so exported data can refer to nodes
/// across edits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a track: a maximal non-branching run of nodes.
///
/// Allocation is monotonically increasing and ids are never reused within a
/// session, keeping historical references in exported data stable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Integer time frame index.
pub type TimePoint = u32;

/// Spatial position in ([z,] y, x) order, 2 or 3 coordinates.
pub type Position = SmallVec<[f64; 3]>;

/// Per-node attributes.
///
/// When a segmentation volume is attached, `position` and `area` are derived
/// from the node's label region and must not be set independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAttrs {
    pub time: TimePoint,
    pub position: Position,
    pub track_id: TrackId,
    /// Label id in the segmentation volume at `time`, if any.
    pub seg_id: Option<u64>,
    /// Pixel count of the label region (area in 2D, volume in 3D).
    pub area: Option<f64>,
}

impl NodeAttrs {
    pub fn new(time: TimePoint, position: Position, track_id: TrackId) -> Self {
        Self {
            time,
            position,
            track_id,
            seg_id: None,
            area: None,
        }
    }
}

/// A directed link from a node at time t to a node at time t' > t.
///
/// May span more than one frame (a "skip edge", formed when an intermediate
/// node is removed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
}

impl Edge {
    pub fn new(source: NodeId, target: NodeId) -> Self {
        Self { source, target }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}
