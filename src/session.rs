//! Session-scoped run bookkeeping.
//!
//! A [`Session`] is created at application start and dropped at exit; it is
//! passed explicitly wherever the run list is needed, never kept as ambient
//! global state. Flushing snapshots to disk happens at explicit save points
//! owned by the caller.

use crate::graph::Tracks;
use crate::solver::SolverParams;
use serde::{Deserialize, Serialize};

/// One tracking result: the parameters it was solved (or edited) with and
/// the tracks themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Run {
    pub name: String,
    pub params: SolverParams,
    pub tracks: Tracks,
}

impl Run {
    pub fn new(name: impl Into<String>, params: SolverParams, tracks: Tracks) -> Self {
        Self {
            name: name.into(),
            params,
            tracks,
        }
    }
}

/// The ordered list of runs alive in this session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    runs: Vec<Run>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_run(&mut self, run: Run) {
        self.runs.push(run);
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn run(&self, name: &str) -> Option<&Run> {
        self.runs.iter().find(|run| run.name == name)
    }

    pub fn run_mut(&mut self, name: &str) -> Option<&mut Run> {
        self.runs.iter_mut().find(|run| run.name == name)
    }

    /// Removes and returns the named run, if present.
    pub fn remove_run(&mut self, name: &str) -> Option<Run> {
        let index = self.runs.iter().position(|run| run.name == name)?;
        Some(self.runs.remove(index))
    }

    /// JSON snapshot of the whole session.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Restores a snapshot, rebuilding the derived state serialization
    /// skips.
    pub fn from_json(json: &str) -> serde_json::Result<Session> {
        let mut session: Session = serde_json::from_str(json)?;
        for run in &mut session.runs {
            run.tracks.rebuild();
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Forest, NodeAttrs, NodeId, TrackId};
    use smallvec::smallvec;

    fn one_node_tracks() -> Tracks {
        let mut forest = Forest::new();
        forest
            .add_node(NodeId(1), NodeAttrs::new(0, smallvec![1.0, 2.0], TrackId(3)))
            .unwrap();
        Tracks::from_forest(forest, None)
    }

    #[test]
    fn test_run_lookup_and_removal() {
        let mut session = Session::new();
        session.add_run(Run::new("first", SolverParams::default(), one_node_tracks()));
        session.add_run(Run::new("second", SolverParams::default(), Tracks::new(None)));

        assert_eq!(session.runs().len(), 2);
        assert!(session.run("first").is_some());
        assert!(session.run("missing").is_none());

        let removed = session.remove_run("first").unwrap();
        assert_eq!(removed.name, "first");
        assert_eq!(session.runs().len(), 1);
    }

    #[test]
    fn test_snapshot_roundtrip_rebuilds_indexes() {
        let mut session = Session::new();
        session.add_run(Run::new("solved", SolverParams::default(), one_node_tracks()));

        let json = session.to_json().unwrap();
        let restored = Session::from_json(&json).unwrap();
        let tracks = &restored.run("solved").unwrap().tracks;
        // the rebuilt query index answers again
        assert_eq!(tracks.forest().node_at(TrackId(3), 0), Some(NodeId(1)));
        // and fresh track ids stay above the restored maximum
        let mut tracks = tracks.clone();
        assert_eq!(tracks.next_track_id(), TrackId(4));
    }
}
