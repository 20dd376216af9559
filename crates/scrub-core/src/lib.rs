//! Temporal event-overlay engine.
//!
//! Walks a bounded week of 15-minute timestamps, aggregates the event batches
//! loaded for the active window, filters them by category selection and mask
//! mode, and produces enter/update/exit diffs for an external renderer.
//!
//! Zero I/O: batches arrive through the [`BatchSource`] seam and diffs leave
//! through the [`Renderer`] seam.

pub mod category;
pub mod constants;
pub mod controller;
pub mod diff;
pub mod error;
pub mod event;
pub mod render;
pub mod selection;
pub mod source;
pub mod timestamp;

pub use category::CategoryCode;
pub use constants::{DATASET_END, DATASET_START, STEP_MINUTES};
pub use controller::{
    ControllerConfig, Direction, MaskPredicate, OverlayController, OverlayState, StepOutcome,
};
pub use diff::{Diff, RenderedEvent, Style, compute_diff};
pub use error::{CategoryError, OverlayError, TimestampError};
pub use event::{Batch, EventId, EventRecord};
pub use render::{DiffLog, Projection, Renderer, Unprojected};
pub use selection::{SelectionSet, SelectionState};
pub use source::BatchSource;
pub use timestamp::{TemporalCursor, Timestamp};
