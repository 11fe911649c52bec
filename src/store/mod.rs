//! Store Module - workflow document storage
//!
//! Key types:
//! - `Persistence`: whole-document backend contract (memory, JSON directory)
//! - `WorkflowStore`: CRUD with per-document locking and status rules

mod persistence;
mod workflow_store;

// Re-export all public types
pub use persistence::{JsonDirPersistence, MemoryPersistence, Persistence};
pub use workflow_store::WorkflowStore;
