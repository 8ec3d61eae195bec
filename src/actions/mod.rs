//! Invertible edit actions, the undo/redo history, and the controller that
//! composes validated high-level edits out of them.

mod action;
mod controller;
mod error;
mod history;

pub use action::TracksAction;
pub use controller::{NodeSpec, OnConflict, SegmentationEdit, TracksController};
pub use error::{EditError, ValidationKind};
pub use history::{ActionHistory, HistoryEntry};
