//! Arena storage for the lineage forest.
//!
//! Nodes live in a flat map keyed by [`NodeId`]; parent/child relations are
//! stored as identifier lists rather than references, so the forest is free
//! of ownership cycles. Every primitive mutation either fully applies and
//! emits a change notification, or rejects with a [`GraphError`] leaving the
//! arena untouched.

use super::error::GraphError;
use super::types::{Edge, NodeAttrs, NodeId, TimePoint, TrackId};
use crate::sync::{EventBus, TracksEvent};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct NodeEntry {
    pub attrs: NodeAttrs,
    pub parent: Option<NodeId>,
    // A valid forest never has more than two children per node.
    pub children: SmallVec<[NodeId; 2]>,
}

/// The lineage forest: detections linked across time.
///
/// Invariants enforced by every mutation:
/// - at most one incoming edge per node (tree/forest, never a merging DAG),
/// - at most two outgoing edges per node (continuation or division),
/// - edge time strictly increasing from source to target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Forest {
    pub(crate) nodes: HashMap<NodeId, NodeEntry>,
    edge_count: usize,

    // Query indexes, rebuilt on load (not serialized).
    /// track id -> time -> node. At most one node per track per frame.
    #[serde(skip)]
    pub(crate) track_index: HashMap<TrackId, BTreeMap<TimePoint, NodeId>>,
    /// (time, segmentation label) -> node.
    #[serde(skip)]
    pub(crate) seg_index: HashMap<(TimePoint, u64), NodeId>,

    #[serde(skip)]
    pub(crate) events: EventBus,
}

static NO_CHILDREN: [NodeId; 0] = [];

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Accessors ---

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn attrs(&self, id: NodeId) -> Result<&NodeAttrs, GraphError> {
        self.nodes
            .get(&id)
            .map(|entry| &entry.attrs)
            .ok_or(GraphError::MissingNode(id))
    }

    pub fn time(&self, id: NodeId) -> Result<TimePoint, GraphError> {
        Ok(self.attrs(id)?.time)
    }

    pub fn track_id(&self, id: NodeId) -> Result<TrackId, GraphError> {
        Ok(self.attrs(id)?.track_id)
    }

    pub fn seg_id(&self, id: NodeId) -> Result<Option<u64>, GraphError> {
        Ok(self.attrs(id)?.seg_id)
    }

    /// The node's predecessor in the forest, if linked.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|entry| entry.parent)
    }

    /// The node's successors; empty for leaves and unknown ids.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|entry| entry.children.as_slice())
            .unwrap_or(&NO_CHILDREN)
    }

    pub fn has_edge(&self, edge: Edge) -> bool {
        self.nodes
            .get(&edge.source)
            .is_some_and(|entry| entry.children.contains(&edge.target))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.nodes.iter().flat_map(|(&source, entry)| {
            entry
                .children
                .iter()
                .map(move |&target| Edge::new(source, target))
        })
    }

    /// The node of the given track at exactly `time`, if any.
    pub fn node_at(&self, track: TrackId, time: TimePoint) -> Option<NodeId> {
        self.track_index
            .get(&track)?
            .get(&time)
            .copied()
    }

    /// The last node of `track` strictly before `time` and the first strictly
    /// after, if any. A node of the track at exactly `time` need not exist.
    pub fn pred_and_succ(
        &self,
        track: TrackId,
        time: TimePoint,
    ) -> (Option<NodeId>, Option<NodeId>) {
        let Some(by_time) = self.track_index.get(&track) else {
            return (None, None);
        };
        let pred = by_time.range(..time).next_back().map(|(_, &node)| node);
        let succ = by_time
            .range((Excluded(time), Unbounded))
            .next()
            .map(|(_, &node)| node);
        (pred, succ)
    }

    /// The node carrying segmentation label `label` at `time`, if any.
    pub fn seg_node(&self, time: TimePoint, label: u64) -> Option<NodeId> {
        self.seg_index.get(&(time, label)).copied()
    }

    pub fn max_node_id(&self) -> Option<NodeId> {
        self.nodes.keys().copied().max()
    }

    pub fn max_track_id(&self) -> Option<TrackId> {
        self.nodes
            .values()
            .map(|entry| entry.attrs.track_id)
            .max()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Registers a change-notification subscriber.
    pub fn subscribe(&mut self) -> crossbeam_channel::Receiver<TracksEvent> {
        self.events.subscribe()
    }

    // --- Primitive mutations ---

    /// Inserts a new, unconnected node.
    pub fn add_node(&mut self, id: NodeId, attrs: NodeAttrs) -> Result<(), GraphError> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        if self.node_at(attrs.track_id, attrs.time).is_some() {
            return Err(GraphError::SlotOccupied {
                track: attrs.track_id,
                time: attrs.time,
            });
        }
        if let Some(label) = attrs.seg_id {
            if self.seg_index.contains_key(&(attrs.time, label)) {
                return Err(GraphError::LabelOccupied {
                    time: attrs.time,
                    label,
                });
            }
        }

        self.track_index
            .entry(attrs.track_id)
            .or_default()
            .insert(attrs.time, id);
        if let Some(label) = attrs.seg_id {
            self.seg_index.insert((attrs.time, label), id);
        }
        self.nodes.insert(
            id,
            NodeEntry {
                attrs,
                parent: None,
                children: SmallVec::new(),
            },
        );
        self.events.emit(TracksEvent::NodeAdded { node: id });
        Ok(())
    }

    /// Removes a node and returns its attributes.
    ///
    /// Incident edges must have been removed first; this keeps node and edge
    /// mutations separately invertible.
    pub fn remove_node(&mut self, id: NodeId) -> Result<NodeAttrs, GraphError> {
        let entry = self.nodes.get(&id).ok_or(GraphError::MissingNode(id))?;
        if entry.parent.is_some() || !entry.children.is_empty() {
            return Err(GraphError::IncidentEdges(id));
        }
        let entry = self.nodes.remove(&id).expect("checked above");
        self.unindex(id, &entry.attrs);
        self.events.emit(TracksEvent::NodeRemoved { node: id });
        Ok(entry.attrs)
    }

    /// Links two existing nodes across time.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        let source_time = self.time(edge.source)?;
        let target = self
            .nodes
            .get(&edge.target)
            .ok_or(GraphError::MissingNode(edge.target))?;
        if source_time >= target.attrs.time {
            return Err(GraphError::NonIncreasingTime {
                edge,
                source_time,
                target_time: target.attrs.time,
            });
        }
        if let Some(existing) = target.parent {
            if existing == edge.source {
                return Err(GraphError::DuplicateEdge(edge));
            }
            return Err(GraphError::WouldMerge { edge, existing });
        }
        let source = self.nodes.get(&edge.source).expect("checked above");
        if source.children.len() >= 2 {
            return Err(GraphError::TooManyChildren(edge.source));
        }

        self.nodes
            .get_mut(&edge.source)
            .expect("checked above")
            .children
            .push(edge.target);
        self.nodes
            .get_mut(&edge.target)
            .expect("checked above")
            .parent = Some(edge.source);
        self.edge_count += 1;
        self.events.emit(TracksEvent::EdgeAdded { edge });
        Ok(())
    }

    pub fn remove_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        if !self.has_edge(edge) {
            return Err(GraphError::MissingEdge(edge));
        }
        self.nodes
            .get_mut(&edge.source)
            .expect("has_edge checked the source")
            .children
            .retain(|&mut child| child != edge.target);
        self.nodes
            .get_mut(&edge.target)
            .expect("edge target must exist")
            .parent = None;
        self.edge_count -= 1;
        self.events.emit(TracksEvent::EdgeRemoved { edge });
        Ok(())
    }

    /// Replaces a node's attributes, keeping the query indexes current.
    /// Returns the previous attributes.
    pub fn set_attrs(&mut self, id: NodeId, attrs: NodeAttrs) -> Result<NodeAttrs, GraphError> {
        let old = self.attrs(id)?.clone();

        let slot_moved = (attrs.track_id, attrs.time) != (old.track_id, old.time);
        if slot_moved && self.node_at(attrs.track_id, attrs.time).is_some() {
            return Err(GraphError::SlotOccupied {
                track: attrs.track_id,
                time: attrs.time,
            });
        }
        let label_moved = (attrs.time, attrs.seg_id) != (old.time, old.seg_id);
        if label_moved {
            if let Some(label) = attrs.seg_id {
                if self.seg_index.contains_key(&(attrs.time, label)) {
                    return Err(GraphError::LabelOccupied {
                        time: attrs.time,
                        label,
                    });
                }
            }
        }

        self.unindex(id, &old);
        self.track_index
            .entry(attrs.track_id)
            .or_default()
            .insert(attrs.time, id);
        if let Some(label) = attrs.seg_id {
            self.seg_index.insert((attrs.time, label), id);
        }
        self.nodes.get_mut(&id).expect("attrs checked above").attrs = attrs;
        self.events.emit(TracksEvent::AttrsUpdated { node: id });
        Ok(old)
    }

    /// Reassigns a single node's track id. Returns the previous id.
    pub fn set_track_id(&mut self, id: NodeId, track: TrackId) -> Result<TrackId, GraphError> {
        let mut attrs = self.attrs(id)?.clone();
        let old = attrs.track_id;
        if old == track {
            return Ok(old);
        }
        attrs.track_id = track;
        self.set_attrs(id, attrs)?;
        Ok(old)
    }

    /// Reassigns a single node's segmentation label. Returns the previous one.
    pub fn set_seg_id(&mut self, id: NodeId, label: Option<u64>) -> Result<Option<u64>, GraphError> {
        let mut attrs = self.attrs(id)?.clone();
        let old = attrs.seg_id;
        if old == label {
            return Ok(old);
        }
        attrs.seg_id = label;
        self.set_attrs(id, attrs)?;
        Ok(old)
    }

    /// Rebuilds the query indexes after deserialization.
    pub fn rebuild_indexes(&mut self) {
        self.track_index.clear();
        self.seg_index.clear();
        for (&id, entry) in &self.nodes {
            self.track_index
                .entry(entry.attrs.track_id)
                .or_default()
                .insert(entry.attrs.time, id);
            if let Some(label) = entry.attrs.seg_id {
                self.seg_index.insert((entry.attrs.time, label), id);
            }
        }
    }

    fn unindex(&mut self, id: NodeId, attrs: &NodeAttrs) {
        if let Some(by_time) = self.track_index.get_mut(&attrs.track_id) {
            if by_time.get(&attrs.time) == Some(&id) {
                by_time.remove(&attrs.time);
            }
            if by_time.is_empty() {
                self.track_index.remove(&attrs.track_id);
            }
        }
        if let Some(label) = attrs.seg_id {
            if self.seg_index.get(&(attrs.time, label)) == Some(&id) {
                self.seg_index.remove(&(attrs.time, label));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn attrs(time: TimePoint, track: u32) -> NodeAttrs {
        NodeAttrs::new(time, smallvec![50.0, 50.0], TrackId(track))
    }

    fn linear_forest() -> Forest {
        // 1 -> 2 -> 3 on track 1
        let mut forest = Forest::new();
        for (id, time) in [(1, 0), (2, 1), (3, 2)] {
            forest.add_node(NodeId(id), attrs(time, 1)).unwrap();
        }
        forest.add_edge(Edge::new(NodeId(1), NodeId(2))).unwrap();
        forest.add_edge(Edge::new(NodeId(2), NodeId(3))).unwrap();
        forest
    }

    #[test]
    fn test_add_and_query_nodes() {
        let forest = linear_forest();
        assert_eq!(forest.node_count(), 3);
        assert_eq!(forest.edge_count(), 2);
        assert_eq!(forest.parent(NodeId(2)), Some(NodeId(1)));
        assert_eq!(forest.children(NodeId(2)), &[NodeId(3)]);
        assert_eq!(forest.node_at(TrackId(1), 1), Some(NodeId(2)));
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut forest = linear_forest();
        let err = forest.add_node(NodeId(1), attrs(5, 9)).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode(NodeId(1)));
    }

    #[test]
    fn test_occupied_slot_rejected() {
        let mut forest = linear_forest();
        let err = forest.add_node(NodeId(9), attrs(1, 1)).unwrap_err();
        assert_eq!(
            err,
            GraphError::SlotOccupied {
                track: TrackId(1),
                time: 1
            }
        );
    }

    #[test]
    fn test_second_incoming_edge_rejected() {
        let mut forest = linear_forest();
        forest.add_node(NodeId(9), attrs(0, 9)).unwrap();
        let edge = Edge::new(NodeId(9), NodeId(2));
        let err = forest.add_edge(edge).unwrap_err();
        assert_eq!(
            err,
            GraphError::WouldMerge {
                edge,
                existing: NodeId(1)
            }
        );
        // nothing applied
        assert_eq!(forest.parent(NodeId(2)), Some(NodeId(1)));
        assert!(forest.children(NodeId(9)).is_empty());
    }

    #[test]
    fn test_third_child_rejected() {
        let mut forest = Forest::new();
        forest.add_node(NodeId(1), attrs(0, 1)).unwrap();
        for (id, track) in [(2, 2), (3, 3), (4, 4)] {
            forest.add_node(NodeId(id), attrs(1, track)).unwrap();
        }
        forest.add_edge(Edge::new(NodeId(1), NodeId(2))).unwrap();
        forest.add_edge(Edge::new(NodeId(1), NodeId(3))).unwrap();
        let err = forest.add_edge(Edge::new(NodeId(1), NodeId(4))).unwrap_err();
        assert_eq!(err, GraphError::TooManyChildren(NodeId(1)));
    }

    #[test]
    fn test_non_increasing_time_rejected() {
        let mut forest = linear_forest();
        forest.add_node(NodeId(9), attrs(1, 9)).unwrap();
        let err = forest.add_edge(Edge::new(NodeId(9), NodeId(2))).unwrap_err();
        assert!(matches!(err, GraphError::NonIncreasingTime { .. }));
        let err = forest.add_edge(Edge::new(NodeId(3), NodeId(9))).unwrap_err();
        assert!(matches!(err, GraphError::NonIncreasingTime { .. }));
    }

    #[test]
    fn test_remove_node_with_incident_edges_rejected() {
        let mut forest = linear_forest();
        let err = forest.remove_node(NodeId(2)).unwrap_err();
        assert_eq!(err, GraphError::IncidentEdges(NodeId(2)));

        forest.remove_edge(Edge::new(NodeId(1), NodeId(2))).unwrap();
        forest.remove_edge(Edge::new(NodeId(2), NodeId(3))).unwrap();
        let removed = forest.remove_node(NodeId(2)).unwrap();
        assert_eq!(removed.time, 1);
        assert_eq!(forest.node_at(TrackId(1), 1), None);
    }

    #[test]
    fn test_pred_and_succ_skips_own_time() {
        let mut forest = linear_forest();
        // remove the middle node so track 1 has times {0, 2}
        forest.remove_edge(Edge::new(NodeId(1), NodeId(2))).unwrap();
        forest.remove_edge(Edge::new(NodeId(2), NodeId(3))).unwrap();
        forest.remove_node(NodeId(2)).unwrap();

        let (pred, succ) = forest.pred_and_succ(TrackId(1), 1);
        assert_eq!(pred, Some(NodeId(1)));
        assert_eq!(succ, Some(NodeId(3)));

        let (pred, succ) = forest.pred_and_succ(TrackId(1), 0);
        assert_eq!(pred, None);
        assert_eq!(succ, Some(NodeId(3)));

        let (pred, succ) = forest.pred_and_succ(TrackId(77), 0);
        assert_eq!(pred, None);
        assert_eq!(succ, None);
    }

    #[test]
    fn test_set_attrs_moves_indexes() {
        let mut forest = linear_forest();
        let mut new_attrs = forest.attrs(NodeId(3)).unwrap().clone();
        new_attrs.track_id = TrackId(2);
        new_attrs.seg_id = Some(4);
        forest.set_attrs(NodeId(3), new_attrs).unwrap();

        assert_eq!(forest.node_at(TrackId(1), 2), None);
        assert_eq!(forest.node_at(TrackId(2), 2), Some(NodeId(3)));
        assert_eq!(forest.seg_node(2, 4), Some(NodeId(3)));
    }

    #[test]
    fn test_serde_roundtrip_rebuilds_indexes() {
        let forest = linear_forest();
        let json = serde_json::to_string(&forest).unwrap();
        let mut restored: Forest = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.node_at(TrackId(1), 1), None); // indexes empty pre-rebuild
        restored.rebuild_indexes();
        assert_eq!(restored.node_at(TrackId(1), 1), Some(NodeId(2)));
        assert_eq!(restored.edge_count(), 2);
    }

    #[test]
    fn test_mutations_emit_events() {
        let mut forest = Forest::new();
        let rx = forest.subscribe();
        forest.add_node(NodeId(1), attrs(0, 1)).unwrap();
        forest.add_node(NodeId(2), attrs(1, 1)).unwrap();
        let edge = Edge::new(NodeId(1), NodeId(2));
        forest.add_edge(edge).unwrap();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                TracksEvent::NodeAdded { node: NodeId(1) },
                TracksEvent::NodeAdded { node: NodeId(2) },
                TracksEvent::EdgeAdded { edge },
            ]
        );
    }
}
