use crate::timestamp::epoch_minutes;

/// Cursor stride in minutes (one GDELT update interval).
pub const STEP_MINUTES: i64 = 15;

/// First instant of the dataset window: 2018-11-05 00:00.
pub const DATASET_START: i64 = epoch_minutes(2018, 11, 5, 0, 0);

/// End of the dataset window, exclusive: 2018-11-12 00:00.
pub const DATASET_END: i64 = epoch_minutes(2018, 11, 12, 0, 0);
