//! Layout of the published data tree. The only place that knows it.

use scrub_core::{CategoryCode, Timestamp};

const EVENTS_DIR: &str = "gdelt/events";
const MAP_OUTLINE: &str = "geojson/world.json";

/// Folder holding one category's per-timestamp files.
pub fn category_folder(category: CategoryCode) -> &'static str {
    match category {
        CategoryCode::VerbalCooperation => "VERBAL_COOPERATION",
        CategoryCode::MaterialCooperation => "MATERIAL_COOPERATION",
        CategoryCode::VerbalConflict => "VERBAL_CONFLICT",
        CategoryCode::MaterialConflict => "MATERIAL_CONFLICT",
    }
}

/// `gdelt/events/<FOLDER>/<timestamp>.json`, relative to the storage root.
pub fn event_batch_path(timestamp: &Timestamp, category: CategoryCode) -> String {
    format!("{EVENTS_DIR}/{}/{timestamp}.json", category_folder(category))
}

/// The time-independent world outline.
pub fn map_outline_path() -> &'static str {
    MAP_OUTLINE
}
