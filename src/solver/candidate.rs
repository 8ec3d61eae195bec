//! Candidate graph construction.
//!
//! Before solving, detections are linked to every detection in the next
//! frame within the movement bound. The optimizer then picks the subset of
//! nodes and links that minimizes the configured costs.

use super::params::SolverParams;
use crate::graph::{NodeId, Position, TimePoint};
use crate::segmentation::LabelVolume;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashSet;

/// One detection offered to the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: NodeId,
    pub time: TimePoint,
    pub position: Position,
    pub seg_id: Option<u64>,
    pub area: Option<f64>,
}

impl Detection {
    pub fn new(id: NodeId, time: TimePoint, position: Position) -> Self {
        Self {
            id,
            time,
            position,
            seg_id: None,
            area: None,
        }
    }
}

/// Features of a candidate link, used by the solver's cost terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateLink {
    /// Center-to-center distance between the two detections.
    pub distance: f64,
    /// Intersection over union of the two label regions, when a
    /// segmentation is available.
    pub iou: Option<f64>,
}

/// Detections plus all links the solver may select from.
#[derive(Debug, Clone, Default)]
pub struct CandidateGraph {
    graph: StableDiGraph<Detection, CandidateLink>,
    by_time: BTreeMap<TimePoint, Vec<NodeIndex>>,
}

impl CandidateGraph {
    /// Links every detection to each detection of the following frame within
    /// `params.max_edge_distance`. IoU features are computed when a
    /// segmentation volume is provided and both detections carry labels.
    pub fn build(
        detections: Vec<Detection>,
        params: &SolverParams,
        volume: Option<&LabelVolume>,
    ) -> Self {
        let mut graph = StableDiGraph::default();
        let mut by_time: BTreeMap<TimePoint, Vec<NodeIndex>> = BTreeMap::new();
        for detection in detections {
            let time = detection.time;
            let index = graph.add_node(detection);
            by_time.entry(time).or_default().push(index);
        }

        let times: Vec<TimePoint> = by_time.keys().copied().collect();
        for window in times.windows(2) {
            let (frame, next_frame) = (window[0], window[1]);
            if next_frame != frame + 1 {
                continue;
            }
            for &source in &by_time[&frame] {
                for &target in &by_time[&next_frame] {
                    let distance =
                        euclidean_distance(&graph[source].position, &graph[target].position);
                    if distance > params.max_edge_distance {
                        continue;
                    }
                    let iou = match (volume, graph[source].seg_id, graph[target].seg_id) {
                        (Some(volume), Some(source_label), Some(target_label)) => {
                            label_iou(volume, frame, source_label, next_frame, target_label)
                        }
                        _ => None,
                    };
                    graph.add_edge(source, target, CandidateLink { distance, iou });
                }
            }
        }

        log::debug!(
            "candidate graph has {} nodes and {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Self { graph, by_time }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn detections(&self) -> impl Iterator<Item = &Detection> {
        self.graph.node_weights()
    }

    /// Detections present in the given frame.
    pub fn frame(&self, time: TimePoint) -> impl Iterator<Item = &Detection> {
        self.by_time
            .get(&time)
            .into_iter()
            .flatten()
            .map(|&index| &self.graph[index])
    }

    /// The underlying petgraph structure, for solver implementations.
    pub fn graph(&self) -> &StableDiGraph<Detection, CandidateLink> {
        &self.graph
    }
}

pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn label_iou(
    volume: &LabelVolume,
    source_time: TimePoint,
    source_label: u64,
    target_time: TimePoint,
    target_label: u64,
) -> Option<f64> {
    let source_mask = volume.mask_of(source_time, source_label).ok()?;
    let target_mask = volume.mask_of(target_time, target_label).ok()?;
    if source_mask.is_empty() && target_mask.is_empty() {
        return None;
    }
    // Frames share a shape, so flat indices are comparable across time.
    let source: HashSet<usize> = source_mask.indices.iter().copied().collect();
    let intersection = target_mask
        .indices
        .iter()
        .filter(|index| source.contains(index))
        .count();
    let union = source.len() + target_mask.len() - intersection;
    Some(intersection as f64 / union as f64)
}
