pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::core::{SyncConfig, SyncDirection, SyncEngine, SyncMode, SyncReport};
pub use config::{AppConfig, Credentials, StorageConfig, SyncUri};
pub use error::{ConfigError, ManifestError};
pub use storage::{create_storage, Storage};
