//! World outline GeoJSON, loaded once and independent of time.

use serde_json::Value;

/// Geographic bounding box in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min_long: f64,
    pub min_lat: f64,
    pub max_long: f64,
    pub max_lat: f64,
}

impl Bounds {
    fn include(&mut self, long: f64, lat: f64) {
        self.min_long = self.min_long.min(long);
        self.min_lat = self.min_lat.min(lat);
        self.max_long = self.max_long.max(long);
        self.max_lat = self.max_lat.max(lat);
    }

    pub fn width(&self) -> f64 {
        self.max_long - self.min_long
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }
}

#[derive(Clone, Debug)]
pub struct MapOutline {
    pub geojson: Value,
    pub feature_count: usize,
    /// `None` when the document holds no coordinates.
    pub bounds: Option<Bounds>,
}

impl MapOutline {
    pub fn from_geojson(geojson: Value) -> Self {
        let feature_count = geojson
            .get("features")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let mut bounds: Option<Bounds> = None;
        visit_positions(&geojson, &mut |long, lat| match bounds.as_mut() {
            Some(b) => b.include(long, lat),
            None => {
                bounds = Some(Bounds {
                    min_long: long,
                    min_lat: lat,
                    max_long: long,
                    max_lat: lat,
                })
            }
        });
        Self {
            geojson,
            feature_count,
            bounds,
        }
    }
}

/// Walk every `coordinates` member, calling `f` for each `[long, lat, ..]` position.
fn visit_positions(value: &Value, f: &mut impl FnMut(f64, f64)) {
    match value {
        Value::Object(map) => {
            if let Some(coords) = map.get("coordinates") {
                visit_coordinates(coords, f);
            }
            for (key, child) in map {
                if key != "coordinates" {
                    visit_positions(child, f);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| visit_positions(v, f)),
        _ => {}
    }
}

fn visit_coordinates(value: &Value, f: &mut impl FnMut(f64, f64)) {
    let Some(items) = value.as_array() else {
        return;
    };
    if let [Value::Number(long), Value::Number(lat), ..] = items.as_slice()
        && let (Some(long), Some(lat)) = (long.as_f64(), lat.as_f64())
    {
        f(long, lat);
        return;
    }
    items.iter().for_each(|v| visit_coordinates(v, f));
}
