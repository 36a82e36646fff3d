pub mod engine;
pub mod manifest;
pub mod reconcile;
pub mod scanner;

pub use engine::{SyncConfig, SyncEngine, SyncMode, SyncReport};
pub use manifest::{Manifest, ManifestEntry, MANIFEST_NAME};
pub use reconcile::{plan_restore, plan_save, RestorePlan, SavePlan, SyncDirection};
pub use scanner::{calculate_hash, FileScanner, Inventory, InventoryEntry, ScanConfig};
