//! The entity store collaborator trait.
//!
//! The engine treats persistence as an external concern: it loads a case's
//! full working set at context open, mutates it in memory, and commits it
//! back in one optimistic-versioned write. Implementations provide the
//! transactional semantics; the engine never performs I/O mid-drain.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::records::{CaseInstance, CaseSnapshot, PlanItemInstance, TransitionEvent};

/// Errors surfaced by an entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("case instance {0} not found")]
    CaseNotFound(Uuid),

    #[error("plan item instance {0} not found")]
    PlanItemNotFound(Uuid),

    #[error(
        "conflict on case instance {case_instance_id}: \
         expected version {expected}, store has {actual}"
    )]
    Conflict {
        case_instance_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// A conflict means another unit of work committed first. The caller
    /// may re-issue the whole trigger against fresh state; nothing was
    /// written.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// A case snapshot paired with the version it was read at.
///
/// The version is passed back to [`EntityStore::commit_case`]; a mismatch
/// there means a concurrent unit of work won the race.
#[derive(Debug, Clone)]
pub struct VersionedSnapshot {
    pub version: u64,
    pub snapshot: CaseSnapshot,
}

/// Durable, transactional storage for case and plan item instances.
///
/// `load_case`/`commit_case` bracket one unit of work. The read-side
/// methods serve callers outside any unit of work and may observe only
/// committed state.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Read the full working set for a case instance together with its
    /// current version. Errors with [`StoreError::CaseNotFound`] for an
    /// unknown id.
    async fn load_case(&self, case_instance_id: Uuid) -> Result<VersionedSnapshot, StoreError>;

    /// Atomically replace the stored working set and append the fired
    /// transitions to the case's history.
    ///
    /// `expected_version` 0 creates the case and fails with
    /// [`StoreError::Conflict`] if it already exists; any other value is a
    /// compare-and-swap against the stored version. Returns the new
    /// version.
    async fn commit_case(
        &self,
        case_instance_id: Uuid,
        expected_version: u64,
        snapshot: CaseSnapshot,
        fired: Vec<TransitionEvent>,
    ) -> Result<u64, StoreError>;

    /// Remove a case instance, its plan items, and its history.
    async fn delete_case(&self, case_instance_id: Uuid) -> Result<(), StoreError>;

    /// Fetch a single case instance record.
    async fn get_case_instance(
        &self,
        case_instance_id: Uuid,
    ) -> Result<Option<CaseInstance>, StoreError>;

    /// Fetch a single plan item instance record.
    async fn get_plan_item_instance(
        &self,
        plan_item_instance_id: Uuid,
    ) -> Result<Option<PlanItemInstance>, StoreError>;

    /// All plan item instances of a case, in creation order.
    async fn find_plan_item_instances(
        &self,
        case_instance_id: Uuid,
    ) -> Result<Vec<PlanItemInstance>, StoreError>;

    /// Children of a stage instance, in model-declared order.
    async fn children_of(
        &self,
        stage_instance_id: Uuid,
    ) -> Result<Vec<PlanItemInstance>, StoreError>;

    /// The fired-transition history of a case, in commit order.
    async fn history(&self, case_instance_id: Uuid) -> Result<Vec<TransitionEvent>, StoreError>;
}
