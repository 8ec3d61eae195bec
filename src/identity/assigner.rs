use crate::graph::{Edge, Forest, GraphError, NodeId, TrackId, Tracks};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

/// Monotonic source of fresh track ids.
///
/// Ids are never reused within a session, even after deletes, so historical
/// references in exported data stay stable. On load, `observe` absorbs every
/// existing id so allocation continues above the imported maximum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackIdAllocator {
    max_track_id: u32,
}

impl TrackIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the allocation floor to cover an id seen in existing data.
    pub fn observe(&mut self, id: TrackId) {
        if id.0 > self.max_track_id {
            self.max_track_id = id.0;
        }
    }

    /// Allocates a track id unique from all previously seen or allocated ids.
    pub fn next(&mut self) -> TrackId {
        self.max_track_id += 1;
        TrackId(self.max_track_id)
    }

    pub fn current_max(&self) -> TrackId {
        TrackId(self.max_track_id)
    }
}

/// Collects the maximal same-track run starting at `start`: the start node
/// plus every successor carrying the same track id, following first children.
/// The walk ends past a division because division children carry their own
/// ids.
pub fn run_from(forest: &Forest, start: NodeId) -> Result<Vec<NodeId>, GraphError> {
    let track = forest.track_id(start)?;
    let mut run = vec![start];
    let mut current = start;
    while let Some(&child) = forest.children(current).first() {
        if forest.track_id(child)? != track {
            break;
        }
        run.push(child);
        current = child;
    }
    Ok(run)
}

/// Relabels the run starting at `start` to `new_id` and returns the previous
/// id.
///
/// When a segmentation is attached, each node's label region is repainted to
/// the new id and its `seg_id` follows, keeping label and track id in step.
pub fn relabel_run(
    tracks: &mut Tracks,
    start: NodeId,
    new_id: TrackId,
) -> Result<TrackId, GraphError> {
    let old_id = tracks.forest().track_id(start)?;
    if old_id == new_id {
        return Ok(old_id);
    }
    let run = run_from(tracks.forest(), start)?;

    // Pre-check every slot and label so the walk below cannot fail halfway
    // through the run.
    for &node in &run {
        let attrs = tracks.forest().attrs(node)?;
        if let Some(existing) = tracks.forest().node_at(new_id, attrs.time) {
            if existing != node {
                return Err(GraphError::SlotOccupied {
                    track: new_id,
                    time: attrs.time,
                });
            }
        }
        if let (Some(volume), Some(_)) = (tracks.segmentation(), attrs.seg_id) {
            let new_label = u64::from(new_id.0);
            if let Some(existing) = tracks.forest().seg_node(attrs.time, new_label) {
                if existing != node {
                    return Err(GraphError::LabelOccupied {
                        time: attrs.time,
                        label: new_label,
                    });
                }
            }
            volume.frame(attrs.time)?;
        }
    }

    for node in run {
        tracks.relabel_node(node, new_id)?;
    }
    Ok(old_id)
}

/// Assigns track ids to a forest given as plain node/edge lists (e.g. a
/// solver solution arriving without identities).
///
/// Conceptually removes division edges and labels each remaining component:
/// runs start at roots and at division children. Starts are processed in
/// ascending node-id order so allocation is deterministic.
pub fn solution_track_ids(
    nodes: &[NodeId],
    edges: &[Edge],
    alloc: &mut TrackIdAllocator,
) -> HashMap<NodeId, TrackId> {
    let mut children: HashMap<NodeId, SmallVec<[NodeId; 2]>> = HashMap::new();
    let mut has_parent: HashSet<NodeId> = HashSet::new();
    for edge in edges {
        children.entry(edge.source).or_default().push(edge.target);
        has_parent.insert(edge.target);
    }

    let mut starts: Vec<NodeId> = nodes
        .iter()
        .copied()
        .filter(|node| !has_parent.contains(node))
        .collect();
    for siblings in children.values() {
        if siblings.len() >= 2 {
            starts.extend(siblings.iter().copied());
        }
    }
    starts.sort_unstable();

    let mut ids = HashMap::with_capacity(nodes.len());
    for start in starts {
        let track = alloc.next();
        let mut current = start;
        loop {
            ids.insert(current, track);
            match children.get(&current) {
                Some(next) if next.len() == 1 => current = next[0],
                _ => break,
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeAttrs, TimePoint};
    use smallvec::smallvec;

    fn attrs(time: TimePoint, track: u32) -> NodeAttrs {
        NodeAttrs::new(time, smallvec![0.0, 0.0], TrackId(track))
    }

    #[test]
    fn test_allocator_is_monotonic_and_never_reuses() {
        let mut alloc = TrackIdAllocator::new();
        alloc.observe(TrackId(5));
        assert_eq!(alloc.next(), TrackId(6));
        // observing a smaller id must not lower the floor
        alloc.observe(TrackId(2));
        assert_eq!(alloc.next(), TrackId(7));
        assert_eq!(alloc.current_max(), TrackId(7));
    }

    #[test]
    fn test_run_from_stops_at_division() {
        // 1 -> 2 -> 3(track 1), then 3 divides into 4(track 2), 5(track 3)
        let mut forest = Forest::new();
        for (id, time, track) in [(1, 0, 1), (2, 1, 1), (3, 2, 1), (4, 3, 2), (5, 3, 3)] {
            forest.add_node(NodeId(id), attrs(time, track)).unwrap();
        }
        for (source, target) in [(1, 2), (2, 3), (3, 4), (3, 5)] {
            forest
                .add_edge(Edge::new(NodeId(source), NodeId(target)))
                .unwrap();
        }

        let run = run_from(&forest, NodeId(1)).unwrap();
        assert_eq!(run, vec![NodeId(1), NodeId(2), NodeId(3)]);
        let run = run_from(&forest, NodeId(2)).unwrap();
        assert_eq!(run, vec![NodeId(2), NodeId(3)]);
        let run = run_from(&forest, NodeId(4)).unwrap();
        assert_eq!(run, vec![NodeId(4)]);
    }

    #[test]
    fn test_solution_track_ids_splits_at_divisions() {
        // 1 -> 2 -> {3, 4}; 4 -> 5; plus isolated 6
        let nodes: Vec<NodeId> = (1..=6).map(NodeId).collect();
        let edges = vec![
            Edge::new(NodeId(1), NodeId(2)),
            Edge::new(NodeId(2), NodeId(3)),
            Edge::new(NodeId(2), NodeId(4)),
            Edge::new(NodeId(4), NodeId(5)),
        ];
        let mut alloc = TrackIdAllocator::new();
        let ids = solution_track_ids(&nodes, &edges, &mut alloc);

        assert_eq!(ids[&NodeId(1)], ids[&NodeId(2)]);
        assert_ne!(ids[&NodeId(3)], ids[&NodeId(2)]);
        assert_ne!(ids[&NodeId(4)], ids[&NodeId(2)]);
        assert_ne!(ids[&NodeId(3)], ids[&NodeId(4)]);
        assert_eq!(ids[&NodeId(4)], ids[&NodeId(5)]);
        // isolated node gets its own run
        assert_eq!(ids.len(), 6);
        // deterministic: starts sorted by node id -> 1 before 6
        assert!(ids[&NodeId(1)] < ids[&NodeId(6)]);
    }
}
