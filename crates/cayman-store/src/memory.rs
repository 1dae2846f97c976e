//! In-memory [`EntityStore`] implementation.
//!
//! Reference store for embedders that do not need durability, and the
//! backing store for the engine's tests. Optimistic concurrency is a
//! per-case version counter checked at commit.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::records::{CaseInstance, CaseSnapshot, PlanItemInstance, TransitionEvent};
use crate::store::{EntityStore, StoreError, VersionedSnapshot};

struct StoredCase {
    version: u64,
    snapshot: CaseSnapshot,
    history: Vec<TransitionEvent>,
}

#[derive(Default)]
struct Inner {
    cases: HashMap<Uuid, StoredCase>,
    /// plan item instance id -> owning case instance id
    item_index: HashMap<Uuid, Uuid>,
}

/// In-memory entity store with optimistic versioning.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn load_case(&self, case_instance_id: Uuid) -> Result<VersionedSnapshot, StoreError> {
        let inner = self.inner.read().await;
        let stored = inner
            .cases
            .get(&case_instance_id)
            .ok_or(StoreError::CaseNotFound(case_instance_id))?;
        Ok(VersionedSnapshot {
            version: stored.version,
            snapshot: stored.snapshot.clone(),
        })
    }

    async fn commit_case(
        &self,
        case_instance_id: Uuid,
        expected_version: u64,
        snapshot: CaseSnapshot,
        fired: Vec<TransitionEvent>,
    ) -> Result<u64, StoreError> {
        if snapshot.case.id != case_instance_id {
            return Err(StoreError::Internal(format!(
                "snapshot case id {} does not match commit target {}",
                snapshot.case.id, case_instance_id
            )));
        }

        let mut inner = self.inner.write().await;

        let actual = inner
            .cases
            .get(&case_instance_id)
            .map(|s| s.version)
            .unwrap_or(0);
        if actual != expected_version {
            return Err(StoreError::Conflict {
                case_instance_id,
                expected: expected_version,
                actual,
            });
        }

        let new_version = expected_version + 1;

        // Re-index plan items: instances never move between cases, but new
        // ones appear on every stage activation.
        for item in &snapshot.plan_items {
            inner.item_index.insert(item.id, case_instance_id);
        }

        let stored = inner.cases.entry(case_instance_id).or_insert(StoredCase {
            version: 0,
            snapshot: snapshot.clone(),
            history: Vec::new(),
        });
        stored.version = new_version;
        stored.snapshot = snapshot;
        stored.history.extend(fired);

        tracing::debug!(
            case_instance_id = %case_instance_id,
            version = new_version,
            "committed case snapshot"
        );

        Ok(new_version)
    }

    async fn delete_case(&self, case_instance_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .cases
            .remove(&case_instance_id)
            .ok_or(StoreError::CaseNotFound(case_instance_id))?;
        for item in &stored.snapshot.plan_items {
            inner.item_index.remove(&item.id);
        }
        Ok(())
    }

    async fn get_case_instance(
        &self,
        case_instance_id: Uuid,
    ) -> Result<Option<CaseInstance>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .cases
            .get(&case_instance_id)
            .map(|s| s.snapshot.case.clone()))
    }

    async fn get_plan_item_instance(
        &self,
        plan_item_instance_id: Uuid,
    ) -> Result<Option<PlanItemInstance>, StoreError> {
        let inner = self.inner.read().await;
        let Some(case_id) = inner.item_index.get(&plan_item_instance_id) else {
            return Ok(None);
        };
        let Some(stored) = inner.cases.get(case_id) else {
            return Ok(None);
        };
        Ok(stored
            .snapshot
            .plan_items
            .iter()
            .find(|i| i.id == plan_item_instance_id)
            .cloned())
    }

    async fn find_plan_item_instances(
        &self,
        case_instance_id: Uuid,
    ) -> Result<Vec<PlanItemInstance>, StoreError> {
        let inner = self.inner.read().await;
        let stored = inner
            .cases
            .get(&case_instance_id)
            .ok_or(StoreError::CaseNotFound(case_instance_id))?;
        Ok(stored.snapshot.plan_items.clone())
    }

    async fn children_of(
        &self,
        stage_instance_id: Uuid,
    ) -> Result<Vec<PlanItemInstance>, StoreError> {
        let inner = self.inner.read().await;
        let case_id = inner
            .item_index
            .get(&stage_instance_id)
            .ok_or(StoreError::PlanItemNotFound(stage_instance_id))?;
        let stored = inner
            .cases
            .get(case_id)
            .ok_or(StoreError::PlanItemNotFound(stage_instance_id))?;

        let stage = stored
            .snapshot
            .plan_items
            .iter()
            .find(|i| i.id == stage_instance_id)
            .ok_or(StoreError::PlanItemNotFound(stage_instance_id))?;

        // Preserve the stage's declared child order, not creation order.
        let mut children = Vec::with_capacity(stage.child_ids.len());
        for child_id in &stage.child_ids {
            if let Some(child) = stored.snapshot.plan_items.iter().find(|i| i.id == *child_id) {
                children.push(child.clone());
            }
        }
        Ok(children)
    }

    async fn history(&self, case_instance_id: Uuid) -> Result<Vec<TransitionEvent>, StoreError> {
        let inner = self.inner.read().await;
        let stored = inner
            .cases
            .get(&case_instance_id)
            .ok_or(StoreError::CaseNotFound(case_instance_id))?;
        Ok(stored.history.clone())
    }
}
