//! Entity layer for the cayman case engine.
//!
//! Defines the lifecycle state enums, the `CaseInstance` and
//! `PlanItemInstance` records, the [`EntityStore`] collaborator trait the
//! engine commits through, and [`MemoryStore`], an in-memory reference
//! implementation with optimistic versioning.

pub mod memory;
pub mod records;
pub mod store;

pub use memory::MemoryStore;
pub use store::{EntityStore, StoreError, VersionedSnapshot};
