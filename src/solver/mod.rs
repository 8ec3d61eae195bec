//! The tracking optimizer interface.
//!
//! The actual ILP solve is an external collaborator: this module defines the
//! cost configuration, the candidate graph handed to the optimizer, the
//! forest-shaped [`Solution`] it must return, and a worker wrapper that runs
//! a solve off the UI thread with cancel-before-commit semantics.

mod candidate;
mod params;
mod worker;

pub use candidate::{euclidean_distance, CandidateGraph, CandidateLink, Detection};
pub use params::SolverParams;
pub use worker::{spawn_solve, CancelToken, SolveHandle, SolveOutcome};

use crate::graph::Edge;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("solve was cancelled")]
    Cancelled,
    #[error("no feasible tracking satisfies the constraints: {0}")]
    Infeasible(String),
    #[error("solver backend failed: {0}")]
    Backend(String),
}

/// The selected subgraph returned by an optimizer: per-node and per-edge
/// selection decisions, guaranteed forest-shaped by the solver's hard
/// constraints and re-validated before commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub nodes: Vec<Detection>,
    pub edges: Vec<Edge>,
}

/// A black-box cost minimizer over a candidate graph.
///
/// Implementations must treat `max_edge_distance` (already encoded in the
/// candidate edges) and `max_children` as hard constraints, and the optional
/// costs in [`SolverParams`] as the weighted objective. Long solves should
/// poll `cancel` and bail out with [`SolveError::Cancelled`].
pub trait Solver {
    fn solve(
        &self,
        candidates: &CandidateGraph,
        params: &SolverParams,
        cancel: &CancelToken,
    ) -> Result<Solution, SolveError>;
}
