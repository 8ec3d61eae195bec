//! The low-level, invertible mutations used to edit a [`Tracks`] model.
//!
//! Actions keep segmentation pixels and node attributes in step and capture
//! whatever pre-state is needed to undo themselves; applying one returns its
//! exact inverse. They carry no application logic: track-id bookkeeping and
//! validation of "allowed" edits live in the controller, which composes
//! groups of these.

use super::error::EditError;
use crate::graph::{Edge, NodeAttrs, NodeId, TrackId, Tracks};
use crate::identity;
use crate::segmentation::{LabelVolume, SegMask};
use serde::{Deserialize, Serialize};

/// One modular, invertible change to a tracks model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TracksAction {
    /// Insert unconnected nodes; with `pixels`, also paint their label
    /// regions (existing pixel values are assumed to be background).
    AddNodes {
        nodes: Vec<(NodeId, NodeAttrs)>,
        pixels: Option<Vec<SegMask>>,
    },
    /// Remove nodes (incident edges must already be gone); with `pixels`,
    /// also erase those regions. Without `pixels` the volume is untouched.
    DeleteNodes {
        nodes: Vec<NodeId>,
        pixels: Option<Vec<SegMask>>,
    },
    /// Overwrite node attributes.
    UpdateNodeAttrs { updates: Vec<(NodeId, NodeAttrs)> },
    /// Apply painted (`added`) or erased pixels to each node's label region
    /// and recompute the derived position and area.
    UpdateNodeSegs {
        nodes: Vec<NodeId>,
        pixels: Vec<SegMask>,
        added: bool,
    },
    AddEdges { edges: Vec<Edge> },
    DeleteEdges { edges: Vec<Edge> },
    /// Relabel the run starting at `start` to `track_id`, repainting label
    /// regions when a segmentation is attached.
    UpdateTrackId { start: NodeId, track_id: TrackId },
    /// A sequence applied as one unit; a mid-group failure rolls back the
    /// already-applied prefix.
    Group { actions: Vec<TracksAction> },
}

impl TracksAction {
    /// Applies the action and returns the action that undoes it.
    ///
    /// Each variant is atomic: on error the model is exactly as it was
    /// before the call (a failed internal rollback surfaces as
    /// [`EditError::Inconsistent`]).
    pub fn apply(&self, tracks: &mut Tracks) -> Result<TracksAction, EditError> {
        match self {
            TracksAction::AddNodes { nodes, pixels } => {
                apply_add_nodes(tracks, nodes, pixels.as_deref())
            }
            TracksAction::DeleteNodes { nodes, pixels } => {
                apply_delete_nodes(tracks, nodes, pixels.as_deref())
            }
            TracksAction::UpdateNodeAttrs { updates } => apply_update_attrs(tracks, updates),
            TracksAction::UpdateNodeSegs {
                nodes,
                pixels,
                added,
            } => apply_update_segs(tracks, nodes, pixels, *added),
            TracksAction::AddEdges { edges } => apply_add_edges(tracks, edges),
            TracksAction::DeleteEdges { edges } => apply_delete_edges(tracks, edges),
            TracksAction::UpdateTrackId { start, track_id } => {
                let old = identity::relabel_run(tracks, *start, *track_id)?;
                Ok(TracksAction::UpdateTrackId {
                    start: *start,
                    track_id: old,
                })
            }
            TracksAction::Group { actions } => apply_group(tracks, actions),
        }
    }
}

fn check_pixel_len(nodes: usize, pixels: Option<&[SegMask]>) -> Result<(), EditError> {
    match pixels {
        Some(masks) if masks.len() != nodes => Err(EditError::Inconsistent(format!(
            "pixel list length {} does not match node count {}",
            masks.len(),
            nodes
        ))),
        _ => Ok(()),
    }
}

fn volume_mut<'a>(tracks: &'a mut Tracks) -> Result<&'a mut LabelVolume, EditError> {
    tracks
        .segmentation
        .as_mut()
        .ok_or_else(|| EditError::Inconsistent("pixels given but no segmentation volume".into()))
}

fn apply_add_nodes(
    tracks: &mut Tracks,
    nodes: &[(NodeId, NodeAttrs)],
    pixels: Option<&[SegMask]>,
) -> Result<TracksAction, EditError> {
    check_pixel_len(nodes.len(), pixels)?;

    let mut failure: Option<EditError> = None;
    let mut applied = 0;
    for (index, (id, attrs)) in nodes.iter().enumerate() {
        // Paint first: a paint failure costs nothing, and the centroid in
        // `attrs` was derived from these pixels by the caller.
        if let Some(masks) = pixels {
            let Some(label) = attrs.seg_id else {
                failure = Some(EditError::Inconsistent(format!(
                    "node {} has pixels but no seg_id",
                    id
                )));
                break;
            };
            let volume = match volume_mut(tracks) {
                Ok(volume) => volume,
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            };
            if let Err(error) = volume.set_pixels(&masks[index], label) {
                failure = Some(EditError::Inconsistent(error.to_string()));
                break;
            }
        }
        if let Err(error) = tracks.forest.add_node(*id, attrs.clone()) {
            if let (Some(masks), Some(volume)) = (pixels, tracks.segmentation.as_mut()) {
                let _ = volume.set_pixels(&masks[index], 0);
            }
            failure = Some(error.into());
            break;
        }
        applied = index + 1;
    }

    if let Some(error) = failure {
        for index in (0..applied).rev() {
            let (id, _) = &nodes[index];
            let _ = tracks.forest.remove_node(*id);
            if let (Some(masks), Some(volume)) = (pixels, tracks.segmentation.as_mut()) {
                let _ = volume.set_pixels(&masks[index], 0);
            }
        }
        return Err(error);
    }

    Ok(TracksAction::DeleteNodes {
        nodes: nodes.iter().map(|(id, _)| *id).collect(),
        pixels: pixels.map(<[SegMask]>::to_vec),
    })
}

fn apply_delete_nodes(
    tracks: &mut Tracks,
    nodes: &[NodeId],
    pixels: Option<&[SegMask]>,
) -> Result<TracksAction, EditError> {
    check_pixel_len(nodes.len(), pixels)?;

    // Capture attributes and reject up front, so nothing below can fail
    // halfway.
    let mut captured = Vec::with_capacity(nodes.len());
    for &id in nodes {
        let attrs = tracks.forest.attrs(id)?.clone();
        if tracks.forest.parent(id).is_some() || !tracks.forest.children(id).is_empty() {
            return Err(crate::graph::GraphError::IncidentEdges(id).into());
        }
        captured.push((id, attrs));
    }

    if let Some(masks) = pixels {
        let volume = volume_mut(tracks)?;
        for (index, mask) in masks.iter().enumerate() {
            if let Err(error) = volume.set_pixels(mask, 0) {
                // Repaint the prefix before reporting.
                for repaint in (0..index).rev() {
                    let label = captured[repaint].1.seg_id.unwrap_or(0);
                    let _ = volume.set_pixels(&masks[repaint], label);
                }
                return Err(EditError::Inconsistent(error.to_string()));
            }
        }
    }

    for &id in nodes {
        tracks
            .forest
            .remove_node(id)
            .map_err(|error| EditError::Inconsistent(error.to_string()))?;
    }

    Ok(TracksAction::AddNodes {
        nodes: captured,
        pixels: pixels.map(<[SegMask]>::to_vec),
    })
}

fn apply_update_attrs(
    tracks: &mut Tracks,
    updates: &[(NodeId, NodeAttrs)],
) -> Result<TracksAction, EditError> {
    let mut previous = Vec::with_capacity(updates.len());
    for (id, attrs) in updates {
        match tracks.forest.set_attrs(*id, attrs.clone()) {
            Ok(old) => previous.push((*id, old)),
            Err(error) => {
                for (id, old) in previous.into_iter().rev() {
                    let _ = tracks.forest.set_attrs(id, old);
                }
                return Err(error.into());
            }
        }
    }
    Ok(TracksAction::UpdateNodeAttrs { updates: previous })
}

fn apply_update_segs(
    tracks: &mut Tracks,
    nodes: &[NodeId],
    pixels: &[SegMask],
    added: bool,
) -> Result<TracksAction, EditError> {
    check_pixel_len(nodes.len(), Some(pixels))?;

    // (node, previous attrs, label); used for rollback of the prefix.
    let mut done: Vec<(NodeId, NodeAttrs, u64)> = Vec::with_capacity(nodes.len());

    let mut failure: Option<EditError> = None;
    for (&node, mask) in nodes.iter().zip(pixels) {
        let attrs = match tracks.forest.attrs(node) {
            Ok(attrs) => attrs.clone(),
            Err(error) => {
                failure = Some(error.into());
                break;
            }
        };
        let Some(label) = attrs.seg_id else {
            failure = Some(EditError::Inconsistent(format!(
                "node {} has no label to update",
                node
            )));
            break;
        };
        let step = (|| -> Result<(), EditError> {
            let volume = volume_mut(tracks)?;
            let value = if added { label } else { 0 };
            volume
                .set_pixels(mask, value)
                .map_err(|error| EditError::Inconsistent(error.to_string()))?;
            // Re-derive position and area from the full region.
            let region = volume
                .mask_of(attrs.time, label)
                .map_err(|error| EditError::Inconsistent(error.to_string()))?;
            let mut new_attrs = attrs.clone();
            new_attrs.position = volume.centroid(&region);
            new_attrs.area = Some(LabelVolume::area(&region));
            tracks.forest.set_attrs(node, new_attrs)?;
            Ok(())
        })();
        match step {
            Ok(()) => done.push((node, attrs, label)),
            Err(error) => {
                failure = Some(error);
                break;
            }
        }
    }

    if let Some(error) = failure {
        for ((node, attrs, label), mask) in done.into_iter().zip(pixels).rev() {
            if let Some(volume) = tracks.segmentation.as_mut() {
                let value = if added { 0 } else { label };
                let _ = volume.set_pixels(mask, value);
            }
            let _ = tracks.forest.set_attrs(node, attrs);
        }
        return Err(error);
    }

    Ok(TracksAction::UpdateNodeSegs {
        nodes: nodes.to_vec(),
        pixels: pixels.to_vec(),
        added: !added,
    })
}

fn apply_add_edges(tracks: &mut Tracks, edges: &[Edge]) -> Result<TracksAction, EditError> {
    for (index, &edge) in edges.iter().enumerate() {
        if let Err(error) = tracks.forest.add_edge(edge) {
            for &undo in edges[..index].iter().rev() {
                let _ = tracks.forest.remove_edge(undo);
            }
            return Err(error.into());
        }
    }
    Ok(TracksAction::DeleteEdges {
        edges: edges.to_vec(),
    })
}

fn apply_delete_edges(tracks: &mut Tracks, edges: &[Edge]) -> Result<TracksAction, EditError> {
    for (index, &edge) in edges.iter().enumerate() {
        if let Err(error) = tracks.forest.remove_edge(edge) {
            for &undo in edges[..index].iter().rev() {
                let _ = tracks.forest.add_edge(undo);
            }
            return Err(error.into());
        }
    }
    Ok(TracksAction::AddEdges {
        edges: edges.to_vec(),
    })
}

fn apply_group(tracks: &mut Tracks, actions: &[TracksAction]) -> Result<TracksAction, EditError> {
    let mut inverses = Vec::with_capacity(actions.len());
    for action in actions {
        match action.apply(tracks) {
            Ok(inverse) => inverses.push(inverse),
            Err(error) => {
                for inverse in inverses.iter().rev() {
                    if let Err(rollback_error) = inverse.apply(tracks) {
                        log::error!("group rollback failed: {rollback_error}");
                        return Err(EditError::Inconsistent(format!(
                            "rollback failed after {error}: {rollback_error}"
                        )));
                    }
                }
                return Err(error);
            }
        }
    }
    inverses.reverse();
    Ok(TracksAction::Group { actions: inverses })
}
