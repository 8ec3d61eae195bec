//! The complete tracks model: lineage forest plus optional segmentation.

use super::error::GraphError;
use super::forest::Forest;
use super::types::{NodeId, TrackId};
use crate::identity::TrackIdAllocator;
use crate::segmentation::LabelVolume;
use crate::sync::TracksEvent;
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

/// A set of tracks: the lineage graph and, optionally, the segmentation it
/// was derived from.
///
/// Every node carries a track id; the embedded allocator hands out fresh ids
/// monotonically for the lifetime of the session. All edits should go through
/// the action layer; the model itself only guarantees graph-level
/// invariants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tracks {
    pub(crate) forest: Forest,
    pub(crate) segmentation: Option<LabelVolume>,
    pub(crate) track_ids: TrackIdAllocator,
}

impl Tracks {
    pub fn new(segmentation: Option<LabelVolume>) -> Self {
        Self {
            forest: Forest::new(),
            segmentation,
            track_ids: TrackIdAllocator::new(),
        }
    }

    /// Wraps an already populated forest, absorbing its track ids so future
    /// allocation stays above the observed maximum.
    pub fn from_forest(forest: Forest, segmentation: Option<LabelVolume>) -> Self {
        let mut track_ids = TrackIdAllocator::new();
        if let Some(max) = forest.max_track_id() {
            track_ids.observe(max);
        }
        Self {
            forest,
            segmentation,
            track_ids,
        }
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn segmentation(&self) -> Option<&LabelVolume> {
        self.segmentation.as_ref()
    }

    /// Allocates a track id unique from all existing ones. Deleted ids are
    /// not recycled.
    pub fn next_track_id(&mut self) -> TrackId {
        self.track_ids.next()
    }

    /// Registers a change-notification subscriber.
    pub fn subscribe(&mut self) -> Receiver<TracksEvent> {
        self.forest.subscribe()
    }

    /// Number of spatial dimensions (2 or 3), taken from the segmentation if
    /// present, otherwise from any node's position.
    pub fn ndim(&self) -> usize {
        if let Some(volume) = &self.segmentation {
            return volume.ndim();
        }
        self.forest
            .nodes
            .values()
            .next()
            .map(|entry| entry.attrs.position.len())
            .unwrap_or(2)
    }

    /// Rebuilds derived state after deserialization.
    pub fn rebuild(&mut self) {
        self.forest.rebuild_indexes();
        if let Some(max) = self.forest.max_track_id() {
            self.track_ids.observe(max);
        }
    }

    /// Moves one node to a new track id, repainting its label region so
    /// segmentation labels keep matching track ids.
    pub(crate) fn relabel_node(&mut self, node: NodeId, track: TrackId) -> Result<(), GraphError> {
        let attrs = self.forest.attrs(node)?.clone();
        match (&self.segmentation, attrs.seg_id) {
            (Some(volume), Some(old_label)) => {
                let time = attrs.time;
                let new_label = u64::from(track.0);
                // Validate the frame before touching the graph so a failure
                // cannot leave the two halves disagreeing.
                volume.frame(time)?;
                let mut new_attrs = attrs;
                new_attrs.track_id = track;
                new_attrs.seg_id = Some(new_label);
                self.forest.set_attrs(node, new_attrs)?;
                self.segmentation
                    .as_mut()
                    .expect("matched above")
                    .relabel(time, old_label, new_label)?;
            }
            _ => {
                self.forest.set_track_id(node, track)?;
            }
        }
        Ok(())
    }
}
