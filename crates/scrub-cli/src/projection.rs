use scrub_core::Projection;
use scrub_store::Bounds;

/// Equirectangular projection scaled so the outline's bounding box fits the
/// canvas, centred along the slack axis.
#[derive(Clone, Debug, PartialEq)]
pub struct FittedProjection {
    scale: f64,
    min_long: f64,
    max_lat: f64,
    offset_x: f64,
    offset_y: f64,
}

impl FittedProjection {
    pub fn fit(bounds: &Bounds, width: f64, height: f64) -> Self {
        let (w, h) = (bounds.width(), bounds.height());
        let scale = match (w > 0.0, h > 0.0) {
            (true, true) => (width / w).min(height / h),
            (true, false) => width / w,
            (false, true) => height / h,
            (false, false) => 1.0,
        };
        Self {
            scale,
            min_long: bounds.min_long,
            max_lat: bounds.max_lat,
            offset_x: (width - w * scale) / 2.0,
            offset_y: (height - h * scale) / 2.0,
        }
    }
}

impl Projection for FittedProjection {
    fn project(&self, long: f64, lat: f64) -> (f64, f64) {
        (
            self.offset_x + (long - self.min_long) * self.scale,
            self.offset_y + (self.max_lat - lat) * self.scale,
        )
    }
}
