pub mod backend;
pub mod broker;
pub mod config;
pub mod error;
pub mod outline;
pub mod paths;

pub use backend::{FsStorage, HttpStorage, Storage, StorageBackend};
pub use broker::EventsBroker;
pub use config::{ScrubConfig, WindowConfig};
pub use error::{Result, StoreError};
pub use outline::{Bounds, MapOutline};
