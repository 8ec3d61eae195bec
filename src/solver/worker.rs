//! Runs a solve on a worker thread.
//!
//! Graph mutation stays on the UI thread: the worker only computes a
//! [`Solution`] and reports it over a channel. Committing the result (or
//! not, after cancellation) is the caller's single-threaded concern, so a
//! cancelled solve leaves the tracks model untouched by construction.

use super::{CandidateGraph, Solution, SolveError, Solver, SolverParams};
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

pub type SolveOutcome = Result<Solution, SolveError>;

/// Shared cancellation flag, polled by solver implementations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Handle to an in-flight solve.
pub struct SolveHandle {
    outcome: Receiver<SolveOutcome>,
    cancel: CancelToken,
}

impl SolveHandle {
    /// Requests cancellation. The running solve finishes or aborts on its
    /// own schedule; its outcome is reported as [`SolveError::Cancelled`]
    /// either way, so nothing gets committed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The outcome, if the worker has finished.
    pub fn try_outcome(&self) -> Option<SolveOutcome> {
        self.outcome.try_recv().ok()
    }

    /// Blocks until the worker finishes.
    pub fn wait(&self) -> SolveOutcome {
        self.outcome
            .recv()
            .unwrap_or_else(|_| Err(SolveError::Backend("solver worker disappeared".into())))
    }
}

/// Spawns a detached worker running `solver` over the candidate graph.
pub fn spawn_solve(
    solver: Box<dyn Solver + Send>,
    candidates: CandidateGraph,
    params: SolverParams,
) -> SolveHandle {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let (sender, outcome) = bounded(1);
    thread::spawn(move || {
        let started = Instant::now();
        let mut result = solver.solve(&candidates, &params, &token);
        if token.is_cancelled() {
            // Whatever the backend returned, a cancelled solve must not be
            // committed.
            result = Err(SolveError::Cancelled);
        }
        match &result {
            Ok(solution) => log::info!(
                "solve selected {} nodes and {} edges in {:.3}s",
                solution.nodes.len(),
                solution.edges.len(),
                started.elapsed().as_secs_f64()
            ),
            Err(error) => log::info!("solve ended without a solution: {error}"),
        }
        let _ = sender.send(result);
    });
    SolveHandle { outcome, cancel }
}
