//! Full-graph consistency sweep.
use super::error::{ConsistencyError, ConsistencyKind};
use super::forest::Forest;

/// Checks every structural invariant of the forest.
///
/// This struct holds a reference to the forest and walks its nodes, applying
/// each check and collecting all violations rather than stopping at the
/// first. Primitive mutations already prevent these states; the sweep exists
/// to catch drift after deserialization and in tests.
pub struct ConsistencyChecker<'a> {
    forest: &'a Forest,
}

impl<'a> ConsistencyChecker<'a> {
    pub fn new(forest: &'a Forest) -> Self {
        Self { forest }
    }

    /// Executes all checks against the forest.
    ///
    /// # Returns
    /// - `Ok(())` if no violation is found.
    /// - `Err(Vec<ConsistencyError>)` with every violation discovered.
    pub fn check(&self) -> Result<(), Vec<ConsistencyError>> {
        let mut errors = Vec::new();

        for (&id, entry) in &self.forest.nodes {
            if entry.children.len() > 2 {
                errors.push(ConsistencyError {
                    node: id,
                    kind: ConsistencyKind::TooManyChildren,
                    message: format!("node {} has {} outgoing edges", id, entry.children.len()),
                });
            }

            for &child in &entry.children {
                match self.forest.nodes.get(&child) {
                    None => errors.push(ConsistencyError {
                        node: id,
                        kind: ConsistencyKind::LinkAsymmetry,
                        message: format!("node {} lists unknown child {}", id, child),
                    }),
                    Some(child_entry) => {
                        if child_entry.parent != Some(id) {
                            errors.push(ConsistencyError {
                                node: child,
                                kind: ConsistencyKind::LinkAsymmetry,
                                message: format!(
                                    "node {} is a child of {} but records parent {:?}",
                                    child, id, child_entry.parent
                                ),
                            });
                        }
                        if child_entry.attrs.time <= entry.attrs.time {
                            errors.push(ConsistencyError {
                                node: id,
                                kind: ConsistencyKind::TimeOrder,
                                message: format!(
                                    "edge {}->{} does not increase in time ({} -> {})",
                                    id, child, entry.attrs.time, child_entry.attrs.time
                                ),
                            });
                        }
                    }
                }
            }

            if let Some(parent) = entry.parent {
                let linked_back = self
                    .forest
                    .nodes
                    .get(&parent)
                    .is_some_and(|parent_entry| parent_entry.children.contains(&id));
                if !linked_back {
                    errors.push(ConsistencyError {
                        node: id,
                        kind: ConsistencyKind::LinkAsymmetry,
                        message: format!(
                            "node {} records parent {} which does not list it",
                            id, parent
                        ),
                    });
                }
            }

            if self.forest.node_at(entry.attrs.track_id, entry.attrs.time) != Some(id) {
                errors.push(ConsistencyError {
                    node: id,
                    kind: ConsistencyKind::IndexDrift,
                    message: format!(
                        "track index does not map (track {}, time {}) back to node {}",
                        entry.attrs.track_id, entry.attrs.time, id
                    ),
                });
            }
            if let Some(label) = entry.attrs.seg_id {
                if self.forest.seg_node(entry.attrs.time, label) != Some(id) {
                    errors.push(ConsistencyError {
                        node: id,
                        kind: ConsistencyKind::IndexDrift,
                        message: format!(
                            "segmentation index does not map (time {}, label {}) back to node {}",
                            entry.attrs.time, label, id
                        ),
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
