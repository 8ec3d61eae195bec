use serde::{Deserialize, Serialize};

/// The set of solver parameters supported by the tracking optimizer.
/// Stored with runs so a solve can be reproduced later.
///
/// `max_edge_distance` and `max_children` are hard constraints; the optional
/// fields are weighted costs forming the minimized objective, skipped
/// entirely when `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverParams {
    /// The maximum distance an object center can move between time frames.
    /// Objects further apart than this cannot be matched.
    pub max_edge_distance: f64,
    /// The maximum number of objects in time t+1 that can be linked to an
    /// object in time t. Set to 1 to disallow divisions.
    pub max_children: u32,
    /// Cost for selecting an edge. The more negative, the more edges get
    /// selected.
    pub edge_selection_cost: Option<f64>,
    /// Cost for starting a new track. Higher means fewer, longer tracks.
    pub appear_cost: Option<f64>,
    /// Cost for a track dividing. Higher means fewer divisions; above the
    /// appear cost, tracks will likely never divide.
    pub division_cost: Option<f64>,
    /// Weight multiplied with the edge distance to form a selection cost.
    pub distance_cost: Option<f64>,
    /// Weight multiplied with the intersection-over-union of two regions.
    /// Recommended negative, since bigger overlap is better.
    pub iou_cost: Option<f64>,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            max_edge_distance: 50.0,
            max_children: 2,
            edge_selection_cost: Some(-20.0),
            appear_cost: Some(30.0),
            division_cost: Some(20.0),
            distance_cost: Some(1.0),
            iou_cost: Some(-5.0),
        }
    }
}
