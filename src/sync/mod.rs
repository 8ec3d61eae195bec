//! Change notifications for external visual layers.
//!
//! The tracks model emits a [`TracksEvent`] for every primitive mutation, and
//! the controller emits one `Refreshed` per completed operation. Point
//! markers, label images and tree renderings consume these to stay in sync;
//! they never mutate the model directly.

use crossbeam_channel::{unbounded, Receiver, Sender};
use crate::graph::{Edge, NodeId};

/// A single change to the tracks model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracksEvent {
    NodeAdded { node: NodeId },
    NodeRemoved { node: NodeId },
    AttrsUpdated { node: NodeId },
    EdgeAdded { edge: Edge },
    EdgeRemoved { edge: Edge },
    /// A complete edit (or undo/redo) finished; `focus` suggests a node the
    /// viewer may want to select, e.g. the first newly added node.
    Refreshed { focus: Option<NodeId> },
}

/// Fan-out bus for [`TracksEvent`]s.
///
/// Subscribers each get their own unbounded channel; a dropped or lagging
/// receiver never blocks a mutation.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    senders: Vec<Sender<TracksEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&mut self) -> Receiver<TracksEvent> {
        let (tx, rx) = unbounded();
        self.senders.push(tx);
        rx
    }

    /// Delivers an event to every live subscriber.
    pub fn emit(&self, event: TracksEvent) {
        for sender in &self.senders {
            // Disconnected subscribers are ignored, not pruned; the vec only
            // grows with explicit subscribe calls.
            let _ = sender.send(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.len()
    }
}
