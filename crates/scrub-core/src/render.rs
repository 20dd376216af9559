//! Seams to the external renderer and map projection.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::diff::Diff;

/// Geo-coordinate → plane-coordinate mapping, fitted by the map collaborator.
pub trait Projection: Send + Sync {
    fn project(&self, long: f64, lat: f64) -> (f64, f64);
}

impl<F> Projection for F
where
    F: Fn(f64, f64) -> (f64, f64) + Send + Sync,
{
    fn project(&self, long: f64, lat: f64) -> (f64, f64) {
        self(long, lat)
    }
}

/// Passes coordinates through unchanged; used until a real projection is fitted.
pub struct Unprojected;

impl Projection for Unprojected {
    fn project(&self, long: f64, lat: f64) -> (f64, f64) {
        (long, lat)
    }
}

/// Consumer of render diffs. Owns all visual and timing concerns.
pub trait Renderer: Send {
    fn render(&mut self, diff: &Diff, projection: &dyn Projection);
}

/// Renderer that records every diff it receives. Clones share one log.
#[derive(Clone, Default)]
pub struct DiffLog(Arc<Mutex<Vec<Diff>>>);

impl DiffLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn last(&self) -> Option<Diff> {
        self.0.lock().last().cloned()
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<Diff> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl Renderer for DiffLog {
    fn render(&mut self, diff: &Diff, _projection: &dyn Projection) {
        self.0.lock().push(diff.clone());
    }
}
