//! Model residency under a memory budget.

pub mod loader;
pub mod manager;

pub use loader::{HashingModelLoader, ModelLoader};
pub use manager::{ModelCacheEntryInfo, ModelLifecycleManager};
