//! High-level edit operations over a [`Tracks`] model.
//!
//! All changes to the data should go through this API: it validates
//! requests, composes groups of low-level actions (applying them eagerly so
//! later steps see the effects of earlier ones), records the result in the
//! undo history, and emits a `Refreshed` notification per completed
//! operation.

use super::action::TracksAction;
use super::error::{EditError, ValidationKind};
use super::history::{ActionHistory, HistoryEntry};
use crate::graph::{Edge, NodeAttrs, NodeId, Position, TimePoint, TrackId, Tracks};
use crate::identity;
use crate::segmentation::SegMask;
use crate::solver::Solution;
use crate::sync::TracksEvent;
use crossbeam_channel::Receiver;
use std::collections::{BTreeSet, HashMap, HashSet};

/// What to do when a new edge's target already has an incoming edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnConflict {
    /// Fail with [`EditError::Conflict`] and apply nothing. The caller can
    /// surface a confirmation prompt and retry with `BreakExisting`.
    #[default]
    Reject,
    /// The caller confirmed: break the existing incoming edge first, as part
    /// of the same undoable operation.
    BreakExisting,
}

/// Request to create one node.
///
/// Without a segmentation volume, `position` is required. With one, `pixels`
/// and `seg_id` are required instead and position/area are derived from the
/// painted region.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub time: TimePoint,
    pub track_id: TrackId,
    pub position: Option<Position>,
    pub seg_id: Option<u64>,
    pub pixels: Option<SegMask>,
}

impl NodeSpec {
    /// A point detection at an explicit position.
    pub fn at(time: TimePoint, track_id: TrackId, position: Position) -> Self {
        Self {
            time,
            track_id,
            position: Some(position),
            seg_id: None,
            pixels: None,
        }
    }

    /// A detection backed by a painted label region.
    pub fn painted(time: TimePoint, track_id: TrackId, label: u64, pixels: SegMask) -> Self {
        Self {
            time,
            track_id,
            position: None,
            seg_id: Some(label),
            pixels: Some(pixels),
        }
    }
}

/// A translated paint/erase event from an external label layer.
#[derive(Debug, Clone, Default)]
pub struct SegmentationEdit {
    /// Nodes whose label region was fully erased.
    pub to_remove: Vec<NodeId>,
    /// Nodes whose label region lost pixels: (node, erased pixels).
    pub shrunk: Vec<(NodeId, SegMask)>,
    /// Nodes whose label region gained pixels: (node, painted pixels).
    pub grown: Vec<(NodeId, SegMask)>,
    /// Newly painted labels: (label, pixels). Each becomes a node with
    /// `track_id == seg_id == label`, auto-linked to same-track neighbors.
    pub to_add: Vec<(u64, SegMask)>,
}

type Step = (TracksAction, TracksAction);

/// A set of high level functions to change the data model.
pub struct TracksController {
    tracks: Tracks,
    history: ActionHistory,
    node_id_counter: u64,
}

impl TracksController {
    pub fn new(tracks: Tracks) -> Self {
        let node_id_counter = tracks
            .forest()
            .max_node_id()
            .map(|id| id.0 + 1)
            .unwrap_or(1);
        Self {
            tracks,
            history: ActionHistory::new(),
            node_id_counter,
        }
    }

    pub fn tracks(&self) -> &Tracks {
        &self.tracks
    }

    pub fn history(&self) -> &ActionHistory {
        &self.history
    }

    pub fn into_tracks(self) -> Tracks {
        self.tracks
    }

    /// Registers a change-notification subscriber.
    pub fn subscribe(&mut self) -> Receiver<TracksEvent> {
        self.tracks.subscribe()
    }

    // --- Editing operations ---

    /// Adds nodes, linking each to its same-track neighbors.
    ///
    /// If a new node lands inside a skip edge of its track, that edge is
    /// replaced by edges through the node. Returns the new node ids; the
    /// first one is suggested as viewer focus.
    pub fn add_nodes(&mut self, specs: Vec<NodeSpec>) -> Result<Vec<NodeId>, EditError> {
        self.validate_node_specs(&specs)?;
        let mut applied = Vec::new();
        let result = self.compose_add_nodes(&mut applied, &specs);
        match result {
            Ok(ids) => {
                let focus = ids.first().copied();
                self.commit(applied, focus);
                Ok(ids)
            }
            Err(error) => Err(self.abort(applied, error)),
        }
    }

    /// Deletes nodes while keeping their tracks connected: predecessor and
    /// successor of a deleted node are bridged with a skip edge, and a
    /// division reduced to a single child relabels that child's run to the
    /// parent's track id.
    pub fn delete_nodes(&mut self, nodes: &[NodeId]) -> Result<(), EditError> {
        if nodes.is_empty() {
            return Err(EditError::validation(
                ValidationKind::Cardinality,
                "no nodes selected",
            ));
        }
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(nodes.len());
        for &id in nodes {
            if !self.tracks.forest().contains(id) {
                return Err(EditError::validation(
                    ValidationKind::UnknownNode,
                    format!("node {} is not in the graph", id),
                ));
            }
            if seen.insert(id) {
                targets.push(id);
            }
        }

        let mut applied = Vec::new();
        let result = self.compose_delete_nodes(&mut applied, &targets);
        match result {
            Ok(()) => {
                self.commit(applied, None);
                Ok(())
            }
            Err(error) => Err(self.abort(applied, error)),
        }
    }

    /// Connects pairs of nodes. Sources must be earlier in time than targets
    /// (pairs are reoriented if given backwards).
    ///
    /// Joining two runs relabels the target run to the source's track id;
    /// turning a continuation into a division gives the pre-existing child's
    /// run a fresh id. A target that already has an incoming edge raises
    /// [`EditError::Conflict`] unless `on_conflict` confirms breaking it.
    pub fn add_edges(&mut self, edges: &[Edge], on_conflict: OnConflict) -> Result<(), EditError> {
        if edges.is_empty() {
            return Err(EditError::validation(
                ValidationKind::Cardinality,
                "no edges selected",
            ));
        }

        // Validate everything before mutating anything.
        let mut normalized = Vec::with_capacity(edges.len());
        let mut conflicts: Vec<Edge> = Vec::new();
        for &requested in edges {
            let (edge, source_time, target_time) = self.orient_edge(requested)?;
            if self.tracks.forest().has_edge(edge) {
                return Err(EditError::validation(
                    ValidationKind::DuplicateEdge,
                    format!("edge {} already exists", edge),
                ));
            }
            if let Some(parent) = self.tracks.forest().parent(edge.target) {
                let existing = Edge::new(parent, edge.target);
                match on_conflict {
                    OnConflict::Reject => return Err(EditError::Conflict { existing }),
                    OnConflict::BreakExisting => conflicts.push(existing),
                }
            }
            if self.tracks.forest().children(edge.source).len() >= 2 {
                return Err(EditError::validation(
                    ValidationKind::Cardinality,
                    "triple divisions are not allowed",
                ));
            }
            if target_time - source_time > 1 {
                // A skip connection must be the shortest possible link: no
                // node of either endpoint's track may sit between them.
                let source_track = self.tracks.forest().track_id(edge.source)?;
                let target_track = self.tracks.forest().track_id(edge.target)?;
                for time in (source_time + 1)..target_time {
                    if self.tracks.forest().node_at(source_track, time).is_some()
                        || self.tracks.forest().node_at(target_track, time).is_some()
                    {
                        return Err(EditError::validation(
                            ValidationKind::Bypass,
                            "connect to the closest node of the track instead",
                        ));
                    }
                }
            }
            normalized.push(edge);
        }

        let mut applied = Vec::new();
        let result = self.compose_add_edges(&mut applied, &conflicts, &normalized);
        match result {
            Ok(()) => {
                self.commit(applied, None);
                Ok(())
            }
            Err(error) => Err(self.abort(applied, error)),
        }
    }

    /// Deletes edges. Breaking a continuation gives the orphaned downstream
    /// run a fresh track id; breaking a division relabels the remaining
    /// sibling run to the parent's id.
    pub fn delete_edges(&mut self, edges: &[Edge]) -> Result<(), EditError> {
        if edges.is_empty() {
            return Err(EditError::validation(
                ValidationKind::Cardinality,
                "no edges selected",
            ));
        }
        for &edge in edges {
            if !self.tracks.forest().has_edge(edge) {
                return Err(EditError::validation(
                    ValidationKind::UnknownEdge,
                    format!("cannot delete non-existing edge {}", edge),
                ));
            }
        }

        let mut applied = Vec::new();
        let result = self.compose_delete_edges(&mut applied, edges);
        match result {
            Ok(()) => {
                self.commit(applied, None);
                Ok(())
            }
            Err(error) => Err(self.abort(applied, error)),
        }
    }

    /// Updates node attributes that are not structurally managed.
    ///
    /// Time and track id are never settable here; position and area are
    /// rejected while a segmentation exists, since they are derived from the
    /// label regions.
    pub fn update_node_attrs(
        &mut self,
        updates: Vec<(NodeId, NodeAttrs)>,
    ) -> Result<(), EditError> {
        if updates.is_empty() {
            return Err(EditError::validation(
                ValidationKind::Cardinality,
                "no nodes selected",
            ));
        }
        for (id, new_attrs) in &updates {
            let old = self
                .tracks
                .forest()
                .attrs(*id)
                .map_err(|_| {
                    EditError::validation(
                        ValidationKind::UnknownNode,
                        format!("node {} is not in the graph", id),
                    )
                })?;
            if new_attrs.time != old.time {
                return Err(EditError::validation(
                    ValidationKind::TimeOrder,
                    "nodes cannot be moved in time",
                ));
            }
            if new_attrs.track_id != old.track_id {
                return Err(EditError::validation(
                    ValidationKind::DerivedAttribute,
                    "track ids are assigned by the model, not settable directly",
                ));
            }
            if self.tracks.segmentation().is_some()
                && (new_attrs.position != old.position
                    || new_attrs.area != old.area
                    || new_attrs.seg_id != old.seg_id)
            {
                return Err(EditError::validation(
                    ValidationKind::DerivedAttribute,
                    "position, area and label are derived from the segmentation; paint instead",
                ));
            }
        }

        let mut applied = Vec::new();
        let result = self.step(&mut applied, TracksAction::UpdateNodeAttrs { updates });
        match result {
            Ok(()) => {
                self.commit(applied, None);
                Ok(())
            }
            Err(error) => Err(self.abort(applied, error)),
        }
    }

    /// Applies a translated paint/erase event as one undoable operation:
    /// erased regions delete their nodes, changed regions recompute derived
    /// attributes, newly painted labels become nodes.
    ///
    /// Returns the ids of newly created nodes; if one of them sits at
    /// `current_time` it is suggested as viewer focus.
    pub fn update_segmentation(
        &mut self,
        edit: SegmentationEdit,
        current_time: Option<TimePoint>,
    ) -> Result<Vec<NodeId>, EditError> {
        if self.tracks.segmentation().is_none() {
            return Err(EditError::validation(
                ValidationKind::MissingSegmentation,
                "no segmentation volume attached",
            ));
        }
        for (node, mask) in edit.shrunk.iter().chain(edit.grown.iter()) {
            let attrs = self.tracks.forest().attrs(*node).map_err(|_| {
                EditError::validation(
                    ValidationKind::UnknownNode,
                    format!("node {} is not in the graph", node),
                )
            })?;
            if attrs.seg_id.is_none() {
                return Err(EditError::validation(
                    ValidationKind::DerivedAttribute,
                    format!("node {} has no label region to update", node),
                ));
            }
            if mask.time != attrs.time {
                return Err(EditError::validation(
                    ValidationKind::TimeOrder,
                    "painted pixels are in a different frame than the node",
                ));
            }
        }
        let add_specs: Vec<NodeSpec> = edit
            .to_add
            .iter()
            .map(|(label, mask)| {
                NodeSpec::painted(mask.time, TrackId(*label as u32), *label, mask.clone())
            })
            .collect();
        if !add_specs.is_empty() {
            self.validate_node_specs(&add_specs)?;
        }
        for &node in &edit.to_remove {
            if !self.tracks.forest().contains(node) {
                return Err(EditError::validation(
                    ValidationKind::UnknownNode,
                    format!("node {} is not in the graph", node),
                ));
            }
        }

        let mut applied = Vec::new();
        let result = (|| -> Result<Vec<NodeId>, EditError> {
            if !edit.to_remove.is_empty() {
                self.compose_delete_nodes(&mut applied, &edit.to_remove)?;
            }
            if !edit.shrunk.is_empty() {
                let (nodes, pixels): (Vec<_>, Vec<_>) = edit.shrunk.iter().cloned().unzip();
                self.step(
                    &mut applied,
                    TracksAction::UpdateNodeSegs {
                        nodes,
                        pixels,
                        added: false,
                    },
                )?;
            }
            if !edit.grown.is_empty() {
                let (nodes, pixels): (Vec<_>, Vec<_>) = edit.grown.iter().cloned().unzip();
                self.step(
                    &mut applied,
                    TracksAction::UpdateNodeSegs {
                        nodes,
                        pixels,
                        added: true,
                    },
                )?;
            }
            if add_specs.is_empty() {
                Ok(Vec::new())
            } else {
                self.compose_add_nodes(&mut applied, &add_specs)
            }
        })();

        match result {
            Ok(new_nodes) => {
                let focus = match current_time {
                    Some(now) => new_nodes
                        .iter()
                        .copied()
                        .find(|&id| self.tracks.forest().time(id) == Ok(now)),
                    None => None,
                };
                if applied.is_empty() {
                    // a vacuous edit: nothing to record or announce
                    return Ok(new_nodes);
                }
                self.commit(applied, focus);
                Ok(new_nodes)
            }
            Err(error) => Err(self.abort(applied, error)),
        }
    }

    /// Installs a solver result as one atomic, undoable action: the current
    /// graph content is replaced by the solution, track ids are assigned
    /// fresh, and the whole swap sits in the history like any user edit.
    ///
    /// The segmentation volume is left untouched; solution nodes are
    /// expected to reference its labels.
    pub fn commit_solution(&mut self, solution: &Solution) -> Result<(), EditError> {
        self.validate_solution(solution)?;

        let ids: Vec<NodeId> = solution.nodes.iter().map(|detection| detection.id).collect();
        let assigned =
            identity::solution_track_ids(&ids, &solution.edges, &mut self.tracks.track_ids);

        let mut applied = Vec::new();
        let result = (|| -> Result<(), EditError> {
            let mut old_edges: Vec<Edge> = self.tracks.forest().edges().collect();
            old_edges.sort_unstable();
            if !old_edges.is_empty() {
                self.step(&mut applied, TracksAction::DeleteEdges { edges: old_edges })?;
            }
            let mut old_nodes: Vec<NodeId> = self.tracks.forest().node_ids().collect();
            old_nodes.sort_unstable();
            if !old_nodes.is_empty() {
                self.step(
                    &mut applied,
                    TracksAction::DeleteNodes {
                        nodes: old_nodes,
                        pixels: None,
                    },
                )?;
            }

            let nodes: Vec<(NodeId, NodeAttrs)> = solution
                .nodes
                .iter()
                .map(|detection| {
                    let track_id = assigned
                        .get(&detection.id)
                        .copied()
                        .unwrap_or_else(|| TrackId(0));
                    let mut attrs =
                        NodeAttrs::new(detection.time, detection.position.clone(), track_id);
                    attrs.seg_id = detection.seg_id;
                    attrs.area = detection.area;
                    (detection.id, attrs)
                })
                .collect();
            self.step(
                &mut applied,
                TracksAction::AddNodes {
                    nodes,
                    pixels: None,
                },
            )?;

            if !solution.edges.is_empty() {
                let mut edges = solution.edges.clone();
                edges.sort_unstable();
                self.step(&mut applied, TracksAction::AddEdges { edges })?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                if let Some(max) = ids.iter().max() {
                    self.node_id_counter = self.node_id_counter.max(max.0 + 1);
                }
                self.commit(applied, None);
                Ok(())
            }
            Err(error) => Err(self.abort(applied, error)),
        }
    }

    // --- Undo / redo ---

    /// Reverts the most recent operation. Returns `false` (reported, not
    /// fatal) when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, EditError> {
        let result = match self.history.move_back() {
            None => {
                log::warn!("no more actions to undo");
                return Ok(false);
            }
            Some(entry) => entry.inverse.apply(&mut self.tracks),
        };
        match result {
            Ok(_) => {
                self.tracks
                    .forest()
                    .events()
                    .emit(TracksEvent::Refreshed { focus: None });
                Ok(true)
            }
            Err(error) => {
                // the entry's own rollback restored the model; restore the pointer
                self.history.move_forward();
                Err(error)
            }
        }
    }

    /// Re-applies the most recently undone operation. Returns `false` when
    /// there is nothing to redo.
    pub fn redo(&mut self) -> Result<bool, EditError> {
        let result = match self.history.move_forward() {
            None => {
                log::warn!("no more actions to redo");
                return Ok(false);
            }
            Some(entry) => entry.forward.apply(&mut self.tracks),
        };
        match result {
            Ok(_) => {
                self.tracks
                    .forest()
                    .events()
                    .emit(TracksEvent::Refreshed { focus: None });
                Ok(true)
            }
            Err(error) => {
                self.history.move_back();
                Err(error)
            }
        }
    }

    // --- Composition helpers ---

    /// Applies one action, keeping its inverse for commit or rollback.
    fn step(&mut self, applied: &mut Vec<Step>, action: TracksAction) -> Result<(), EditError> {
        let inverse = action.apply(&mut self.tracks)?;
        applied.push((action, inverse));
        Ok(())
    }

    /// Rolls back every applied step and returns the error to surface. If
    /// the rollback itself fails the error is upgraded to `Inconsistent`.
    fn abort(&mut self, mut applied: Vec<Step>, error: EditError) -> EditError {
        while let Some((_, inverse)) = applied.pop() {
            if let Err(rollback_error) = inverse.apply(&mut self.tracks) {
                log::error!("rollback failed: {rollback_error}");
                return EditError::Inconsistent(format!(
                    "rollback failed after {error}: {rollback_error}"
                ));
            }
        }
        error
    }

    /// Records the applied steps as one history entry and announces the
    /// completed operation.
    fn commit(&mut self, applied: Vec<Step>, focus: Option<NodeId>) {
        let mut forwards = Vec::with_capacity(applied.len());
        let mut inverses = Vec::with_capacity(applied.len());
        for (forward, inverse) in applied {
            forwards.push(forward);
            inverses.push(inverse);
        }
        inverses.reverse();
        let forward = if forwards.len() == 1 {
            forwards.remove(0)
        } else {
            TracksAction::Group { actions: forwards }
        };
        let inverse = if inverses.len() == 1 {
            inverses.remove(0)
        } else {
            TracksAction::Group { actions: inverses }
        };
        self.history.record(HistoryEntry { forward, inverse });
        self.tracks
            .forest()
            .events()
            .emit(TracksEvent::Refreshed { focus });
    }

    fn next_node_ids(&mut self, count: usize) -> Vec<NodeId> {
        let ids = (0..count)
            .map(|offset| NodeId(self.node_id_counter + offset as u64))
            .collect();
        self.node_id_counter += count as u64;
        ids
    }

    fn validate_node_specs(&self, specs: &[NodeSpec]) -> Result<(), EditError> {
        if specs.is_empty() {
            return Err(EditError::validation(
                ValidationKind::Cardinality,
                "no nodes given",
            ));
        }
        let with_pixels = specs.iter().filter(|spec| spec.pixels.is_some()).count();
        if with_pixels != 0 && with_pixels != specs.len() {
            return Err(EditError::validation(
                ValidationKind::Cardinality,
                "cannot mix painted and point nodes in one operation",
            ));
        }

        let mut slots = HashSet::new();
        for spec in specs {
            match (&spec.position, &spec.pixels) {
                (None, None) => {
                    return Err(EditError::validation(
                        ValidationKind::Cardinality,
                        "a new node needs either a position or pixels",
                    ))
                }
                (Some(_), Some(_)) => {
                    return Err(EditError::validation(
                        ValidationKind::DerivedAttribute,
                        "position is derived from pixels; do not pass both",
                    ))
                }
                (None, Some(mask)) => {
                    if self.tracks.segmentation().is_none() {
                        return Err(EditError::validation(
                            ValidationKind::MissingSegmentation,
                            "pixels given but no segmentation volume attached",
                        ));
                    }
                    let Some(label) = spec.seg_id else {
                        return Err(EditError::validation(
                            ValidationKind::Cardinality,
                            "a painted node needs a seg_id",
                        ));
                    };
                    if mask.is_empty() {
                        return Err(EditError::validation(
                            ValidationKind::Cardinality,
                            "empty pixel mask",
                        ));
                    }
                    if mask.time != spec.time {
                        return Err(EditError::validation(
                            ValidationKind::TimeOrder,
                            "pixel mask is in a different frame than the node",
                        ));
                    }
                    if self.tracks.forest().seg_node(spec.time, label).is_some() {
                        return Err(EditError::validation(
                            ValidationKind::SlotOccupied,
                            format!("label {} at time {} is already assigned", label, spec.time),
                        ));
                    }
                }
                (Some(_), None) => {
                    if self.tracks.segmentation().is_some() {
                        return Err(EditError::validation(
                            ValidationKind::DerivedAttribute,
                            "positions are segmentation-managed; paint pixels instead",
                        ));
                    }
                }
            }
            if self
                .tracks
                .forest()
                .node_at(spec.track_id, spec.time)
                .is_some()
                || !slots.insert((spec.track_id, spec.time))
            {
                return Err(EditError::validation(
                    ValidationKind::SlotOccupied,
                    format!(
                        "track {} already has a node at time {}",
                        spec.track_id, spec.time
                    ),
                ));
            }
        }
        Ok(())
    }

    /// The add-nodes composition: remove interrupted skip edges, insert the
    /// nodes, then connect each to its same-track neighbors. Neighbor edges
    /// are computed after insertion so consecutive new nodes chain up.
    fn compose_add_nodes(
        &mut self,
        applied: &mut Vec<Step>,
        specs: &[NodeSpec],
    ) -> Result<Vec<NodeId>, EditError> {
        let ids = self.next_node_ids(specs.len());
        for spec in specs {
            // Painting an id above the allocation floor must push it up, so
            // later fresh tracks stay unique.
            self.tracks.track_ids.observe(spec.track_id);
        }

        let mut interrupted = BTreeSet::new();
        for spec in specs {
            let (pred, succ) = self.tracks.forest().pred_and_succ(spec.track_id, spec.time);
            if let (Some(pred), Some(succ)) = (pred, succ) {
                let edge = Edge::new(pred, succ);
                if self.tracks.forest().has_edge(edge) {
                    interrupted.insert(edge);
                }
            }
        }
        if !interrupted.is_empty() {
            self.step(
                applied,
                TracksAction::DeleteEdges {
                    edges: interrupted.into_iter().collect(),
                },
            )?;
        }

        let mut nodes = Vec::with_capacity(specs.len());
        let mut masks = Vec::with_capacity(specs.len());
        for (&id, spec) in ids.iter().zip(specs) {
            let attrs = match (&spec.pixels, self.tracks.segmentation()) {
                (Some(mask), Some(volume)) => {
                    let mut attrs =
                        NodeAttrs::new(spec.time, volume.centroid(mask), spec.track_id);
                    attrs.seg_id = spec.seg_id;
                    attrs.area = Some(mask.len() as f64);
                    masks.push(mask.clone());
                    attrs
                }
                _ => {
                    let position = spec.position.clone().ok_or_else(|| {
                        EditError::Inconsistent("validated request lost its position".into())
                    })?;
                    let mut attrs = NodeAttrs::new(spec.time, position, spec.track_id);
                    attrs.seg_id = spec.seg_id;
                    attrs
                }
            };
            nodes.push((id, attrs));
        }
        let pixels = if masks.is_empty() { None } else { Some(masks) };
        self.step(applied, TracksAction::AddNodes { nodes, pixels })?;

        let mut links = BTreeSet::new();
        for (&id, spec) in ids.iter().zip(specs) {
            let (pred, succ) = self.tracks.forest().pred_and_succ(spec.track_id, spec.time);
            if let Some(pred) = pred {
                links.insert(Edge::new(pred, id));
            }
            if let Some(succ) = succ {
                links.insert(Edge::new(id, succ));
            }
        }
        if !links.is_empty() {
            self.step(
                applied,
                TracksAction::AddEdges {
                    edges: links.into_iter().collect(),
                },
            )?;
        }
        Ok(ids)
    }

    /// The delete-nodes composition: drop incident edges (relabeling a lone
    /// remaining sibling when a division disappears), remove the nodes and
    /// their pixels, then bridge predecessor/successor with skip edges.
    fn compose_delete_nodes(
        &mut self,
        applied: &mut Vec<Step>,
        targets: &[NodeId],
    ) -> Result<(), EditError> {
        let deleted: HashSet<NodeId> = targets.iter().copied().collect();

        let mut incident = BTreeSet::new();
        let mut relabels: Vec<(NodeId, TrackId)> = Vec::new();
        let mut track_times = Vec::with_capacity(targets.len());
        for &node in targets {
            let forest = self.tracks.forest();
            if let Some(pred) = forest.parent(node) {
                incident.insert(Edge::new(pred, node));
                let siblings = forest.children(pred);
                if siblings.len() == 2 {
                    // Deleting this child implicitly removes a division, so
                    // the other child continues the parent's track.
                    let sibling = if siblings[0] == node {
                        siblings[1]
                    } else {
                        siblings[0]
                    };
                    if !deleted.contains(&sibling) {
                        relabels.push((sibling, forest.track_id(pred)?));
                    }
                }
            }
            for &succ in forest.children(node) {
                incident.insert(Edge::new(node, succ));
            }
            track_times.push((forest.track_id(node)?, forest.time(node)?));
        }

        // Pixel regions to erase, captured before any mutation.
        let masks = match self.tracks.segmentation() {
            Some(volume) => {
                let mut masks = Vec::with_capacity(targets.len());
                for &node in targets {
                    let attrs = self.tracks.forest().attrs(node)?;
                    let mask = match attrs.seg_id {
                        Some(label) => volume
                            .mask_of(attrs.time, label)
                            .map_err(crate::graph::GraphError::from)?,
                        None => SegMask::new(attrs.time, Vec::new()),
                    };
                    masks.push(mask);
                }
                Some(masks)
            }
            None => None,
        };

        if !incident.is_empty() {
            self.step(
                applied,
                TracksAction::DeleteEdges {
                    edges: incident.into_iter().collect(),
                },
            )?;
        }
        for (start, track_id) in relabels {
            self.step(applied, TracksAction::UpdateTrackId { start, track_id })?;
        }
        self.step(
            applied,
            TracksAction::DeleteNodes {
                nodes: targets.to_vec(),
                pixels: masks,
            },
        )?;

        let mut bridges = BTreeSet::new();
        for (track, time) in track_times {
            let (pred, succ) = self.tracks.forest().pred_and_succ(track, time);
            if let (Some(pred), Some(succ)) = (pred, succ) {
                bridges.insert(Edge::new(pred, succ));
            }
        }
        if !bridges.is_empty() {
            self.step(
                applied,
                TracksAction::AddEdges {
                    edges: bridges.into_iter().collect(),
                },
            )?;
        }
        Ok(())
    }

    fn compose_add_edges(
        &mut self,
        applied: &mut Vec<Step>,
        conflicts: &[Edge],
        edges: &[Edge],
    ) -> Result<(), EditError> {
        // Break confirmed existing edges first, with full delete semantics
        // (the orphaned run gets a fresh id, restored on undo).
        if !conflicts.is_empty() {
            self.compose_delete_edges(applied, conflicts)?;
        }

        for &edge in edges {
            match self.tracks.forest().children(edge.source).len() {
                0 => {
                    // Joining two runs: the target run continues the source's
                    // track.
                    let track_id = self.tracks.forest().track_id(edge.source)?;
                    self.step(
                        applied,
                        TracksAction::UpdateTrackId {
                            start: edge.target,
                            track_id,
                        },
                    )?;
                }
                1 => {
                    // Creating a division: the pre-existing child no longer
                    // continues the source's track and needs its own id.
                    let sibling = self.tracks.forest().children(edge.source)[0];
                    let track_id = self.tracks.next_track_id();
                    self.step(
                        applied,
                        TracksAction::UpdateTrackId {
                            start: sibling,
                            track_id,
                        },
                    )?;
                }
                _ => {
                    return Err(EditError::validation(
                        ValidationKind::Cardinality,
                        "triple divisions are not allowed",
                    ));
                }
            }
            self.step(applied, TracksAction::AddEdges { edges: vec![edge] })?;
        }
        Ok(())
    }

    fn compose_delete_edges(
        &mut self,
        applied: &mut Vec<Step>,
        edges: &[Edge],
    ) -> Result<(), EditError> {
        self.step(
            applied,
            TracksAction::DeleteEdges {
                edges: edges.to_vec(),
            },
        )?;
        for &edge in edges {
            match self.tracks.forest().children(edge.source).len() {
                0 => {
                    // A continuation was broken: the downstream fragment
                    // becomes a new track.
                    let track_id = self.tracks.next_track_id();
                    self.step(
                        applied,
                        TracksAction::UpdateTrackId {
                            start: edge.target,
                            track_id,
                        },
                    )?;
                }
                1 => {
                    // A division was broken: the remaining child continues
                    // the parent's track.
                    let sibling = self.tracks.forest().children(edge.source)[0];
                    let track_id = self.tracks.forest().track_id(edge.source)?;
                    self.step(
                        applied,
                        TracksAction::UpdateTrackId {
                            start: sibling,
                            track_id,
                        },
                    )?;
                }
                _ => {
                    return Err(EditError::Inconsistent(format!(
                        "node {} still has more than one child after edge removal",
                        edge.source
                    )));
                }
            }
        }
        Ok(())
    }

    fn orient_edge(&self, edge: Edge) -> Result<(Edge, TimePoint, TimePoint), EditError> {
        let source_time = self.node_time(edge.source)?;
        let target_time = self.node_time(edge.target)?;
        if source_time == target_time {
            return Err(EditError::validation(
                ValidationKind::TimeOrder,
                "cannot connect two nodes in the same time frame",
            ));
        }
        if source_time < target_time {
            Ok((edge, source_time, target_time))
        } else {
            Ok((Edge::new(edge.target, edge.source), target_time, source_time))
        }
    }

    fn node_time(&self, id: NodeId) -> Result<TimePoint, EditError> {
        self.tracks.forest().time(id).map_err(|_| {
            EditError::validation(
                ValidationKind::UnknownNode,
                format!("node {} is not in the graph", id),
            )
        })
    }

    fn validate_solution(&self, solution: &Solution) -> Result<(), EditError> {
        let mut times: HashMap<NodeId, TimePoint> = HashMap::with_capacity(solution.nodes.len());
        for detection in &solution.nodes {
            if times.insert(detection.id, detection.time).is_some() {
                return Err(EditError::validation(
                    ValidationKind::MalformedSolution,
                    format!("solution contains node {} twice", detection.id),
                ));
            }
        }
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut out_degree: HashMap<NodeId, usize> = HashMap::new();
        for edge in &solution.edges {
            let (Some(&source_time), Some(&target_time)) =
                (times.get(&edge.source), times.get(&edge.target))
            else {
                return Err(EditError::validation(
                    ValidationKind::MalformedSolution,
                    format!("solution edge {} references an unknown node", edge),
                ));
            };
            if source_time >= target_time {
                return Err(EditError::validation(
                    ValidationKind::MalformedSolution,
                    format!("solution edge {} does not increase in time", edge),
                ));
            }
            let incoming = in_degree.entry(edge.target).or_insert(0);
            *incoming += 1;
            if *incoming > 1 {
                return Err(EditError::validation(
                    ValidationKind::MalformedSolution,
                    format!("solution merges at node {}", edge.target),
                ));
            }
            let outgoing = out_degree.entry(edge.source).or_insert(0);
            *outgoing += 1;
            if *outgoing > 2 {
                return Err(EditError::validation(
                    ValidationKind::MalformedSolution,
                    format!("solution node {} has more than two children", edge.source),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ConsistencyChecker, Forest, Tracks};
    use crate::segmentation::LabelVolume;
    use crate::solver::{Detection, Solution};
    use smallvec::smallvec;
    use std::collections::BTreeMap;

    fn attrs(time: TimePoint, track: u32, y: f64, x: f64) -> NodeAttrs {
        NodeAttrs::new(time, smallvec![y, x], TrackId(track))
    }

    /// Two lineages: a division at node 1 into tracks 2 and 3, where track 3
    /// runs on through times 1..=4, plus an isolated node 8 on track 5.
    ///
    ///   1 ─┬─ 2
    ///      └─ 3 ── 4 ── 5 ── 6        8
    fn fixture() -> TracksController {
        let mut forest = Forest::new();
        forest.add_node(NodeId(1), attrs(0, 1, 50.0, 50.0)).unwrap();
        forest.add_node(NodeId(2), attrs(1, 2, 20.0, 80.0)).unwrap();
        forest.add_node(NodeId(3), attrs(1, 3, 60.0, 45.0)).unwrap();
        forest.add_node(NodeId(4), attrs(2, 3, 61.0, 45.0)).unwrap();
        forest.add_node(NodeId(5), attrs(3, 3, 62.0, 45.0)).unwrap();
        forest.add_node(NodeId(6), attrs(4, 3, 63.0, 45.0)).unwrap();
        forest.add_node(NodeId(8), attrs(4, 5, 90.0, 90.0)).unwrap();
        for (source, target) in [(1, 2), (1, 3), (3, 4), (4, 5), (5, 6)] {
            forest
                .add_edge(Edge::new(NodeId(source), NodeId(target)))
                .unwrap();
        }
        TracksController::new(Tracks::from_forest(forest, None))
    }

    fn snapshot(tracks: &Tracks) -> (BTreeMap<NodeId, NodeAttrs>, Vec<Edge>) {
        let forest = tracks.forest();
        let nodes = forest
            .node_ids()
            .map(|id| (id, forest.attrs(id).unwrap().clone()))
            .collect();
        let mut edges: Vec<Edge> = forest.edges().collect();
        edges.sort_unstable();
        (nodes, edges)
    }

    fn assert_consistent(tracks: &Tracks) {
        ConsistencyChecker::new(tracks.forest())
            .check()
            .expect("forest invariants must hold after every operation");
    }

    fn track_of(controller: &TracksController, id: u64) -> TrackId {
        controller.tracks().forest().track_id(NodeId(id)).unwrap()
    }

    // --- add_nodes ---

    #[test]
    fn test_add_node_starts_new_track() {
        let mut controller = fixture();
        let edges_before = controller.tracks().forest().edge_count();
        let ids = controller
            .add_nodes(vec![NodeSpec::at(0, TrackId(6), smallvec![1.0, 3.0])])
            .unwrap();

        let forest = controller.tracks().forest();
        let added = forest.attrs(ids[0]).unwrap();
        assert_eq!(added.position.as_slice(), &[1.0, 3.0]);
        assert_eq!(added.track_id, TrackId(6));
        assert_eq!(forest.edge_count(), edges_before); // nothing to link to
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_add_node_extends_existing_track() {
        let mut controller = fixture();
        let ids = controller
            .add_nodes(vec![NodeSpec::at(2, TrackId(2), smallvec![21.0, 80.0])])
            .unwrap();

        let forest = controller.tracks().forest();
        assert!(forest.has_edge(Edge::new(NodeId(2), ids[0])));
        assert_eq!(forest.children(ids[0]).len(), 0);
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_add_node_into_skip_edge_relinks_through_it() {
        let mut controller = fixture();
        controller.delete_nodes(&[NodeId(4)]).unwrap();
        assert!(controller
            .tracks()
            .forest()
            .has_edge(Edge::new(NodeId(3), NodeId(5))));

        let ids = controller
            .add_nodes(vec![NodeSpec::at(2, TrackId(3), smallvec![61.0, 45.0])])
            .unwrap();

        let forest = controller.tracks().forest();
        assert!(!forest.has_edge(Edge::new(NodeId(3), NodeId(5))));
        assert!(forest.has_edge(Edge::new(NodeId(3), ids[0])));
        assert!(forest.has_edge(Edge::new(ids[0], NodeId(5))));
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_add_adjacent_nodes_chain_up() {
        let mut controller = fixture();
        let ids = controller
            .add_nodes(vec![
                NodeSpec::at(2, TrackId(2), smallvec![21.0, 80.0]),
                NodeSpec::at(3, TrackId(2), smallvec![22.0, 80.0]),
            ])
            .unwrap();

        let forest = controller.tracks().forest();
        assert!(forest.has_edge(Edge::new(NodeId(2), ids[0])));
        assert!(forest.has_edge(Edge::new(ids[0], ids[1])));
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_add_node_occupied_slot_rejected() {
        let mut controller = fixture();
        let before = snapshot(controller.tracks());
        let err = controller
            .add_nodes(vec![NodeSpec::at(1, TrackId(3), smallvec![0.0, 0.0])])
            .unwrap_err();
        assert!(matches!(
            err,
            EditError::Validation {
                kind: ValidationKind::SlotOccupied,
                ..
            }
        ));
        assert_eq!(snapshot(controller.tracks()), before);
    }

    // --- delete_nodes ---

    #[test]
    fn test_delete_unconnected_node() {
        let mut controller = fixture();
        let edges_before = controller.tracks().forest().edge_count();
        controller.delete_nodes(&[NodeId(8)]).unwrap();
        assert!(!controller.tracks().forest().contains(NodeId(8)));
        assert_eq!(controller.tracks().forest().edge_count(), edges_before);
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_delete_end_node() {
        let mut controller = fixture();
        controller.delete_nodes(&[NodeId(6)]).unwrap();
        let forest = controller.tracks().forest();
        assert!(!forest.contains(NodeId(6)));
        assert!(!forest.has_edge(Edge::new(NodeId(5), NodeId(6))));
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_delete_continuation_node_bridges_with_skip_edge() {
        let mut controller = fixture();
        controller.delete_nodes(&[NodeId(4)]).unwrap();

        let forest = controller.tracks().forest();
        assert!(!forest.contains(NodeId(4)));
        assert!(forest.has_edge(Edge::new(NodeId(3), NodeId(5))));
        // the run is preserved, just shorter: no identifier changes
        assert_eq!(track_of(&controller, 5), TrackId(3));
        assert_eq!(track_of(&controller, 6), TrackId(3));
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_delete_continuation_node_undo_removes_skip_edge() {
        let mut controller = fixture();
        let before = snapshot(controller.tracks());
        controller.delete_nodes(&[NodeId(4)]).unwrap();

        assert!(controller.undo().unwrap());
        assert_eq!(snapshot(controller.tracks()), before);
        assert!(!controller
            .tracks()
            .forest()
            .has_edge(Edge::new(NodeId(3), NodeId(5))));
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_delete_division_child_relabels_sibling_run() {
        let mut controller = fixture();
        controller.delete_nodes(&[NodeId(2)]).unwrap();

        // node 1 no longer divides, so the remaining child continues track 1
        for id in [3, 4, 5, 6] {
            assert_eq!(track_of(&controller, id), TrackId(1));
        }
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_delete_both_division_children_skips_relabel() {
        let mut controller = fixture();
        controller.delete_nodes(&[NodeId(2), NodeId(3)]).unwrap();
        let forest = controller.tracks().forest();
        assert!(forest.children(NodeId(1)).is_empty());
        // downstream of node 3 became parentless but keeps its track id
        assert_eq!(track_of(&controller, 4), TrackId(3));
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_delete_division_parent_keeps_child_tracks() {
        let mut controller = fixture();
        controller.delete_nodes(&[NodeId(1)]).unwrap();
        let forest = controller.tracks().forest();
        assert!(!forest.contains(NodeId(1)));
        assert_eq!(forest.parent(NodeId(2)), None);
        assert_eq!(forest.parent(NodeId(3)), None);
        assert_eq!(track_of(&controller, 2), TrackId(2));
        assert_eq!(track_of(&controller, 3), TrackId(3));
        assert_consistent(controller.tracks());
    }

    // --- delete_edges ---

    #[test]
    fn test_break_continuation_edge_gives_fragment_fresh_id() {
        // 5-node linear track; break between positions 3 and 4.
        let mut forest = Forest::new();
        for (id, time) in [(1, 0), (2, 1), (3, 2), (4, 3), (5, 4)] {
            forest
                .add_node(NodeId(id), attrs(time, 1, 10.0, 10.0))
                .unwrap();
        }
        for (source, target) in [(1, 2), (2, 3), (3, 4), (4, 5)] {
            forest
                .add_edge(Edge::new(NodeId(source), NodeId(target)))
                .unwrap();
        }
        let mut controller = TracksController::new(Tracks::from_forest(forest, None));

        controller
            .delete_edges(&[Edge::new(NodeId(3), NodeId(4))])
            .unwrap();

        // source side keeps the original identifier
        for id in [1, 2, 3] {
            assert_eq!(track_of(&controller, id), TrackId(1));
        }
        // target side gets a fresh identifier, distinct from all existing
        let fresh = track_of(&controller, 4);
        assert_ne!(fresh, TrackId(1));
        assert_eq!(fresh, TrackId(2)); // monotonic allocation from max 1
        assert_eq!(track_of(&controller, 5), fresh);
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_break_division_edge_relabels_remaining_sibling() {
        let mut controller = fixture();
        controller
            .delete_edges(&[Edge::new(NodeId(1), NodeId(3))])
            .unwrap();

        // the broken-off child keeps its identifier
        assert_eq!(track_of(&controller, 3), TrackId(3));
        // the remaining child continues the parent's track
        assert_eq!(track_of(&controller, 2), TrackId(1));
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_delete_missing_edge_rejected() {
        let mut controller = fixture();
        let err = controller
            .delete_edges(&[Edge::new(NodeId(2), NodeId(4))])
            .unwrap_err();
        assert!(matches!(
            err,
            EditError::Validation {
                kind: ValidationKind::UnknownEdge,
                ..
            }
        ));
    }

    // --- add_edges ---

    #[test]
    fn test_add_edge_joins_runs_and_relabels_target() {
        let mut controller = fixture();
        // detach track 3 from the division first
        controller
            .delete_edges(&[Edge::new(NodeId(1), NodeId(3))])
            .unwrap();
        // node 1 now has a single child: re-adding makes a division again
        controller
            .add_edges(&[Edge::new(NodeId(1), NodeId(3))], OnConflict::Reject)
            .unwrap();

        // target keeps its id, the pre-existing child's run was relabeled
        assert_eq!(track_of(&controller, 3), TrackId(3));
        assert_ne!(track_of(&controller, 2), TrackId(1));
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_add_edge_to_leaf_continues_source_track() {
        let mut controller = fixture();
        // node 2 (t1, leaf of track 2) -> node 8 (t4, isolated track 5)
        controller
            .add_edges(&[Edge::new(NodeId(2), NodeId(8))], OnConflict::Reject)
            .unwrap();
        assert_eq!(track_of(&controller, 8), TrackId(2));
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_add_edge_reoriented_when_given_backwards() {
        let mut controller = fixture();
        controller
            .add_edges(&[Edge::new(NodeId(8), NodeId(2))], OnConflict::Reject)
            .unwrap();
        assert!(controller
            .tracks()
            .forest()
            .has_edge(Edge::new(NodeId(2), NodeId(8))));
    }

    #[test]
    fn test_add_edge_conflict_applies_no_mutation() {
        let mut controller = fixture();
        let before = snapshot(controller.tracks());
        // node 4 already has an incoming edge from node 3
        let err = controller
            .add_edges(&[Edge::new(NodeId(2), NodeId(4))], OnConflict::Reject)
            .unwrap_err();
        assert_eq!(
            err,
            EditError::Conflict {
                existing: Edge::new(NodeId(3), NodeId(4))
            }
        );
        assert_eq!(snapshot(controller.tracks()), before);
    }

    #[test]
    fn test_add_edge_confirmed_breaks_existing_and_links() {
        let mut controller = fixture();
        controller
            .add_edges(&[Edge::new(NodeId(2), NodeId(4))], OnConflict::BreakExisting)
            .unwrap();

        let forest = controller.tracks().forest();
        assert!(!forest.has_edge(Edge::new(NodeId(3), NodeId(4))));
        assert!(forest.has_edge(Edge::new(NodeId(2), NodeId(4))));
        // the reconnected run continues the source's track
        assert_eq!(track_of(&controller, 4), TrackId(2));
        assert_eq!(track_of(&controller, 6), TrackId(2));
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_add_edge_rejects_same_frame_and_duplicates_and_triples() {
        let mut controller = fixture();

        let err = controller
            .add_edges(&[Edge::new(NodeId(2), NodeId(3))], OnConflict::Reject)
            .unwrap_err();
        assert!(matches!(
            err,
            EditError::Validation {
                kind: ValidationKind::TimeOrder,
                ..
            }
        ));

        let err = controller
            .add_edges(&[Edge::new(NodeId(1), NodeId(2))], OnConflict::Reject)
            .unwrap_err();
        assert!(matches!(
            err,
            EditError::Validation {
                kind: ValidationKind::DuplicateEdge,
                ..
            }
        ));

        // node 1 already divides; a third child is not allowed
        let ids = controller
            .add_nodes(vec![NodeSpec::at(1, TrackId(9), smallvec![5.0, 5.0])])
            .unwrap();
        let err = controller
            .add_edges(&[Edge::new(NodeId(1), ids[0])], OnConflict::Reject)
            .unwrap_err();
        assert!(matches!(
            err,
            EditError::Validation {
                kind: ValidationKind::Cardinality,
                ..
            }
        ));
    }

    #[test]
    fn test_add_skip_edge_must_connect_closest_node() {
        let mut controller = fixture();
        // connecting 3 (t1) to the isolated node 8 (t4) would bypass nodes
        // 4 and 5 of node 3's own track
        let err = controller
            .add_edges(&[Edge::new(NodeId(3), NodeId(8))], OnConflict::Reject)
            .unwrap_err();
        assert!(matches!(
            err,
            EditError::Validation {
                kind: ValidationKind::Bypass,
                ..
            }
        ));
    }

    // --- undo / redo ---

    #[test]
    fn test_undo_redo_restores_exact_state() {
        let mut controller = fixture();
        let initial = snapshot(controller.tracks());
        controller.delete_nodes(&[NodeId(2)]).unwrap();
        let after = snapshot(controller.tracks());

        assert!(controller.undo().unwrap());
        assert_eq!(snapshot(controller.tracks()), initial);
        assert!(controller.redo().unwrap());
        assert_eq!(snapshot(controller.tracks()), after);
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_undo_redo_at_boundaries_are_reported_noops() {
        let mut controller = fixture();
        assert!(!controller.undo().unwrap());
        assert!(!controller.redo().unwrap());

        controller.delete_nodes(&[NodeId(8)]).unwrap();
        assert!(controller.undo().unwrap());
        assert!(!controller.undo().unwrap());
    }

    #[test]
    fn test_new_action_after_undos_discards_redo_tail() {
        let mut controller = fixture();
        controller.delete_nodes(&[NodeId(8)]).unwrap();
        controller.delete_nodes(&[NodeId(6)]).unwrap();
        assert!(controller.undo().unwrap());
        assert!(controller.undo().unwrap());

        controller
            .add_nodes(vec![NodeSpec::at(0, TrackId(7), smallvec![2.0, 2.0])])
            .unwrap();
        // the two undone deletions are gone from the redo path
        assert!(!controller.redo().unwrap());
        assert!(controller.tracks().forest().contains(NodeId(8)));
        assert!(controller.tracks().forest().contains(NodeId(6)));
    }

    #[test]
    fn test_track_ids_are_never_reused_across_undo() {
        let mut controller = fixture();
        controller
            .delete_edges(&[Edge::new(NodeId(4), NodeId(5))])
            .unwrap();
        let first_fresh = track_of(&controller, 5);
        assert!(controller.undo().unwrap());
        controller
            .delete_edges(&[Edge::new(NodeId(4), NodeId(5))])
            .unwrap();
        let second_fresh = track_of(&controller, 5);
        assert!(second_fresh > first_fresh);
    }

    // --- events ---

    #[test]
    fn test_operations_emit_refreshed_with_focus() {
        let mut controller = fixture();
        let rx = controller.subscribe();
        let ids = controller
            .add_nodes(vec![NodeSpec::at(0, TrackId(6), smallvec![1.0, 1.0])])
            .unwrap();

        let events: Vec<TracksEvent> = rx.try_iter().collect();
        assert!(events.contains(&TracksEvent::NodeAdded { node: ids[0] }));
        assert_eq!(
            events.last(),
            Some(&TracksEvent::Refreshed {
                focus: Some(ids[0])
            })
        );

        controller.undo().unwrap();
        let events: Vec<TracksEvent> = rx.try_iter().collect();
        assert!(events.contains(&TracksEvent::NodeRemoved { node: ids[0] }));
        assert_eq!(
            events.last(),
            Some(&TracksEvent::Refreshed { focus: None })
        );
    }

    // --- segmentation-backed editing ---

    /// A 3-frame, 6x6 volume with a 2x2 square painted as label 1 in the
    /// first two frames, tracked as one run.
    fn painted_controller() -> TracksController {
        let volume = LabelVolume::new(3, &[6, 6]);
        let mut controller = TracksController::new(Tracks::new(Some(volume)));
        let region0 = SegMask::new(0, vec![0, 1, 6, 7]); // 2x2 at (0,0)
        let region1 = SegMask::new(1, vec![14, 15, 20, 21]); // 2x2 at (2,2)
        controller
            .add_nodes(vec![
                NodeSpec::painted(0, TrackId(1), 1, region0),
                NodeSpec::painted(1, TrackId(1), 1, region1),
            ])
            .unwrap();
        controller
    }

    #[test]
    fn test_painted_nodes_derive_position_and_area() {
        let controller = painted_controller();
        let forest = controller.tracks().forest();
        let first = forest.seg_node(0, 1).unwrap();
        let attrs = forest.attrs(first).unwrap();
        assert_eq!(attrs.position.as_slice(), &[0.5, 0.5]);
        assert_eq!(attrs.area, Some(4.0));
        // the two same-track nodes were auto-linked
        let second = forest.seg_node(1, 1).unwrap();
        assert!(forest.has_edge(Edge::new(first, second)));
        assert_consistent(controller.tracks());
    }

    #[test]
    fn test_painting_rejects_direct_position_updates() {
        let mut controller = painted_controller();
        let node = controller.tracks().forest().seg_node(0, 1).unwrap();
        let mut attrs = controller.tracks().forest().attrs(node).unwrap().clone();
        attrs.position = smallvec![3.0, 3.0];
        let err = controller.update_node_attrs(vec![(node, attrs)]).unwrap_err();
        assert!(matches!(
            err,
            EditError::Validation {
                kind: ValidationKind::DerivedAttribute,
                ..
            }
        ));
    }

    #[test]
    fn test_grow_region_recomputes_derived_attrs_and_undoes() {
        let mut controller = painted_controller();
        let node = controller.tracks().forest().seg_node(1, 1).unwrap();
        let before = controller.tracks().forest().attrs(node).unwrap().clone();

        let grown = SegMask::new(1, vec![26, 27]); // extend the square down
        let edit = SegmentationEdit {
            grown: vec![(node, grown)],
            ..SegmentationEdit::default()
        };
        controller.update_segmentation(edit, None).unwrap();

        let attrs = controller.tracks().forest().attrs(node).unwrap().clone();
        assert_eq!(attrs.area, Some(6.0));
        assert_ne!(attrs.position, before.position);

        assert!(controller.undo().unwrap());
        let restored = controller.tracks().forest().attrs(node).unwrap();
        assert_eq!(restored, &before);
        assert_eq!(
            controller
                .tracks()
                .segmentation()
                .unwrap()
                .mask_of(1, 1)
                .unwrap()
                .len(),
            4
        );
    }

    #[test]
    fn test_erasing_a_label_deletes_its_node() {
        let mut controller = painted_controller();
        let node = controller.tracks().forest().seg_node(1, 1).unwrap();
        let edit = SegmentationEdit {
            to_remove: vec![node],
            ..SegmentationEdit::default()
        };
        controller.update_segmentation(edit, None).unwrap();

        assert!(!controller.tracks().forest().contains(node));
        assert!(controller
            .tracks()
            .segmentation()
            .unwrap()
            .mask_of(1, 1)
            .unwrap()
            .is_empty());

        assert!(controller.undo().unwrap());
        assert!(controller.tracks().forest().contains(node));
        assert_eq!(
            controller
                .tracks()
                .segmentation()
                .unwrap()
                .mask_of(1, 1)
                .unwrap()
                .len(),
            4
        );
    }

    #[test]
    fn test_painting_new_label_adds_focused_node() {
        let mut controller = painted_controller();
        let region = SegMask::new(2, vec![0, 1]);
        let edit = SegmentationEdit {
            to_add: vec![(12, region)],
            ..SegmentationEdit::default()
        };
        let new_nodes = controller.update_segmentation(edit, Some(2)).unwrap();
        assert_eq!(new_nodes.len(), 1);

        let forest = controller.tracks().forest();
        let attrs = forest.attrs(new_nodes[0]).unwrap();
        assert_eq!(attrs.track_id, TrackId(12));
        assert_eq!(attrs.seg_id, Some(12));
        // the painted id raised the allocation floor
        let mut tracks = controller.into_tracks();
        assert!(tracks.next_track_id() > TrackId(12));
    }

    #[test]
    fn test_relabeling_repaints_segmentation() {
        let mut controller = painted_controller();
        let first = controller.tracks().forest().seg_node(0, 1).unwrap();
        let second = controller.tracks().forest().seg_node(1, 1).unwrap();
        // breaking the link gives the downstream node a fresh track id and
        // must repaint its region to match
        controller
            .delete_edges(&[Edge::new(first, second)])
            .unwrap();

        let new_track = track_of_node(&controller, second);
        assert_ne!(new_track, TrackId(1));
        let volume = controller.tracks().segmentation().unwrap();
        assert!(volume.mask_of(1, 1).unwrap().is_empty());
        assert_eq!(
            volume.mask_of(1, u64::from(new_track.0)).unwrap().len(),
            4
        );
        assert_eq!(
            controller.tracks().forest().attrs(second).unwrap().seg_id,
            Some(u64::from(new_track.0))
        );
    }

    fn track_of_node(controller: &TracksController, id: NodeId) -> TrackId {
        controller.tracks().forest().track_id(id).unwrap()
    }

    // --- solver commit ---

    #[test]
    fn test_commit_solution_replaces_content_atomically() {
        let mut controller = fixture();
        let before = snapshot(controller.tracks());

        let solution = Solution {
            nodes: vec![
                Detection::new(NodeId(100), 0, smallvec![0.0, 0.0]),
                Detection::new(NodeId(101), 1, smallvec![1.0, 0.0]),
                Detection::new(NodeId(102), 1, smallvec![0.0, 1.0]),
            ],
            edges: vec![
                Edge::new(NodeId(100), NodeId(101)),
                Edge::new(NodeId(100), NodeId(102)),
            ],
        };
        controller.commit_solution(&solution).unwrap();

        let forest = controller.tracks().forest();
        assert_eq!(forest.node_count(), 3);
        assert!(forest.contains(NodeId(100)));
        assert!(!forest.contains(NodeId(1)));
        // fresh ids above the fixture's maximum (5), one per run
        let parent_track = track_of(&controller, 100);
        assert!(parent_track > TrackId(5));
        assert_ne!(track_of(&controller, 101), parent_track);
        assert_ne!(track_of(&controller, 102), parent_track);
        assert_consistent(controller.tracks());

        // one atomic history entry: a single undo restores everything
        assert!(controller.undo().unwrap());
        assert_eq!(snapshot(controller.tracks()), before);
    }

    #[test]
    fn test_commit_solution_rejects_merges() {
        let mut controller = fixture();
        let before = snapshot(controller.tracks());
        let solution = Solution {
            nodes: vec![
                Detection::new(NodeId(100), 0, smallvec![0.0, 0.0]),
                Detection::new(NodeId(101), 0, smallvec![1.0, 0.0]),
                Detection::new(NodeId(102), 1, smallvec![0.0, 1.0]),
            ],
            edges: vec![
                Edge::new(NodeId(100), NodeId(102)),
                Edge::new(NodeId(101), NodeId(102)),
            ],
        };
        let err = controller.commit_solution(&solution).unwrap_err();
        assert!(matches!(
            err,
            EditError::Validation {
                kind: ValidationKind::MalformedSolution,
                ..
            }
        ));
        assert_eq!(snapshot(controller.tracks()), before);
    }
}
