//! The unit of work.
//!
//! A [`CommandContext`] demarcates one atomic externally-triggered
//! execution: it owns the case's in-memory working set, the agenda, and
//! the log of fired transitions. The drain loop is an explicit work-list —
//! operations enqueue follow-on operations rather than recursing — so
//! stack depth stays bounded regardless of model nesting.
//!
//! All mutations stay private to the context until the engine commits the
//! resulting snapshot to the store in one optimistic write; any error
//! rolls the whole unit of work back by discarding the context.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use cayman_store::records::{
    CaseInstance, CaseSnapshot, PlanItemInstance, Transition, TransitionEvent,
};

use crate::agenda::Agenda;
use crate::error::EngineError;
use crate::model::CaseDefinition;
use crate::operation;

/// Phase of a command context. Terminal phases are final; a context is
/// single-use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPhase {
    Open,
    Draining,
    Committed,
    RolledBack,
}

impl fmt::Display for ContextPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Draining => "draining",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// The in-memory working set of one case instance: the case record and an
/// arena of plan item instances keyed by id. Parent/child links are id
/// references, so the recursive stage structure involves no ownership
/// cycles.
#[derive(Debug)]
pub struct CaseWorkingSet {
    case: CaseInstance,
    items: HashMap<Uuid, PlanItemInstance>,
    /// Creation order, preserved into the committed snapshot.
    order: Vec<Uuid>,
}

impl CaseWorkingSet {
    /// A working set for a case with no plan items yet.
    pub fn new(case: CaseInstance) -> Self {
        Self {
            case,
            items: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn from_snapshot(snapshot: CaseSnapshot) -> Self {
        let order = snapshot.plan_items.iter().map(|i| i.id).collect();
        Self {
            case: snapshot.case,
            items: snapshot
                .plan_items
                .into_iter()
                .map(|i| (i.id, i))
                .collect(),
            order,
        }
    }

    pub fn case(&self) -> &CaseInstance {
        &self.case
    }

    pub fn case_mut(&mut self) -> &mut CaseInstance {
        &mut self.case
    }

    pub fn get(&self, id: Uuid) -> Option<&PlanItemInstance> {
        self.items.get(&id)
    }

    pub fn item(&self, id: Uuid) -> Result<&PlanItemInstance, EngineError> {
        self.items.get(&id).ok_or(EngineError::PlanItemNotFound(id))
    }

    pub fn item_mut(&mut self, id: Uuid) -> Result<&mut PlanItemInstance, EngineError> {
        self.items
            .get_mut(&id)
            .ok_or(EngineError::PlanItemNotFound(id))
    }

    pub fn insert(&mut self, item: PlanItemInstance) {
        self.order.push(item.id);
        self.items.insert(item.id, item);
    }

    /// The root plan model instance, if the case has been initialised.
    pub fn root(&self) -> Option<&PlanItemInstance> {
        self.order
            .iter()
            .filter_map(|id| self.items.get(id))
            .find(|i| i.stage_instance_id.is_none())
    }

    /// The live instance of a plan item definition. Instances are unique
    /// per definition (no repetition rules).
    pub fn find_by_definition(&self, definition_id: &str) -> Option<&PlanItemInstance> {
        self.order
            .iter()
            .filter_map(|id| self.items.get(id))
            .find(|i| i.plan_item_definition_id == definition_id)
    }

    /// Ids of a stage's non-terminal children, in declared order.
    pub fn live_children(&self, stage_instance_id: Uuid) -> Vec<Uuid> {
        let Some(stage) = self.items.get(&stage_instance_id) else {
            return Vec::new();
        };
        stage
            .child_ids
            .iter()
            .copied()
            .filter(|id| {
                self.items
                    .get(id)
                    .is_some_and(|c| !c.state.is_terminal())
            })
            .collect()
    }

    pub fn has_live_children(&self, stage_instance_id: Uuid) -> bool {
        !self.live_children(stage_instance_id).is_empty()
    }

    fn into_snapshot(self) -> CaseSnapshot {
        let mut items = self.items;
        CaseSnapshot {
            case: self.case,
            plan_items: self
                .order
                .iter()
                .filter_map(|id| items.remove(id))
                .collect(),
        }
    }
}

/// One atomic externally-triggered execution.
pub struct CommandContext {
    model: Arc<CaseDefinition>,
    pub(crate) working_set: CaseWorkingSet,
    pub(crate) agenda: Agenda,
    phase: ContextPhase,
    fired: Vec<TransitionEvent>,
}

impl CommandContext {
    pub fn new(model: Arc<CaseDefinition>, working_set: CaseWorkingSet) -> Self {
        Self {
            model,
            working_set,
            agenda: Agenda::new(),
            phase: ContextPhase::Open,
            fired: Vec::new(),
        }
    }

    pub fn model(&self) -> &CaseDefinition {
        &self.model
    }

    pub(crate) fn model_arc(&self) -> Arc<CaseDefinition> {
        Arc::clone(&self.model)
    }

    pub fn phase(&self) -> ContextPhase {
        self.phase
    }

    /// Append a fired plan-item transition to the unit of work's log.
    /// Reads the instance's current (post-mutation) state.
    pub(crate) fn record_item_transition(
        &mut self,
        plan_item_instance_id: Uuid,
        transition: Transition,
    ) -> Result<(), EngineError> {
        let item = self.working_set.item(plan_item_instance_id)?;
        tracing::debug!(
            plan_item_instance_id = %item.id,
            plan_item_definition_id = %item.plan_item_definition_id,
            transition = %transition,
            to_state = %item.state,
            "fired transition"
        );
        self.fired.push(TransitionEvent {
            case_instance_id: item.case_instance_id,
            plan_item_instance_id: Some(item.id),
            plan_item_definition_id: Some(item.plan_item_definition_id.clone()),
            transition,
            to_state: item.state.to_string(),
            fired_at: Utc::now(),
        });
        Ok(())
    }

    /// Append a fired case-level transition to the unit of work's log.
    pub(crate) fn record_case_transition(&mut self, transition: Transition) {
        let case = self.working_set.case();
        tracing::debug!(
            case_instance_id = %case.id,
            transition = %transition,
            to_state = %case.state,
            "fired case transition"
        );
        self.fired.push(TransitionEvent {
            case_instance_id: case.id,
            plan_item_instance_id: None,
            plan_item_definition_id: None,
            transition,
            to_state: case.state.to_string(),
            fired_at: Utc::now(),
        });
    }

    /// Drain the agenda to exhaustion, one operation at a time.
    ///
    /// Operations run to completion before the next is dequeued and may
    /// enqueue follow-on operations. The first error flips the context to
    /// rolled back and propagates; the working set is then discarded by
    /// the caller.
    pub fn drain(&mut self) -> Result<(), EngineError> {
        if self.phase != ContextPhase::Open {
            return Err(EngineError::ContextPhase {
                phase: self.phase,
                expected: ContextPhase::Open,
            });
        }
        self.phase = ContextPhase::Draining;

        while let Some(op) = self.agenda.pop() {
            tracing::debug!(operation = %op, "executing agenda operation");
            if let Err(e) = operation::apply(self, op) {
                tracing::warn!(
                    case_instance_id = %self.working_set.case().id,
                    error = %e,
                    "operation failed, rolling back unit of work"
                );
                self.phase = ContextPhase::RolledBack;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Consume the drained context into the snapshot and fired transitions
    /// to commit. Consumption is the committed phase: ownership makes a
    /// second drain or commit unrepresentable.
    pub fn commit(mut self) -> Result<(CaseSnapshot, Vec<TransitionEvent>), EngineError> {
        if self.phase != ContextPhase::Draining {
            return Err(EngineError::ContextPhase {
                phase: self.phase,
                expected: ContextPhase::Draining,
            });
        }
        self.phase = ContextPhase::Committed;
        tracing::debug!(
            case_instance_id = %self.working_set.case().id,
            phase = %self.phase,
            fired = self.fired.len(),
            "unit of work drained, handing snapshot to the store"
        );
        let Self {
            working_set, fired, ..
        } = self;
        Ok((working_set.into_snapshot(), fired))
    }
}
