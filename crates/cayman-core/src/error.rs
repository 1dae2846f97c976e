//! Engine error taxonomy.
//!
//! Every error raised mid-drain aborts the whole unit of work; nothing is
//! committed. Only store conflicts are retryable — the caller re-issues the
//! entire trigger, it never resumes a stale agenda.

use thiserror::Error;
use uuid::Uuid;

use cayman_store::records::{CaseState, PlanItemState, Transition};
use cayman_store::StoreError;

use crate::context::ContextPhase;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "invalid transition {transition} for plan item instance \
         {plan_item_instance_id} in state {state}"
    )]
    InvalidTransition {
        plan_item_instance_id: Uuid,
        state: PlanItemState,
        transition: Transition,
    },

    #[error("invalid transition {transition} for case instance {case_instance_id} in state {state}")]
    InvalidCaseTransition {
        case_instance_id: Uuid,
        state: CaseState,
        transition: Transition,
    },

    #[error("occur is not a valid transition for stage instance {0}")]
    OccurOnStage(Uuid),

    #[error(
        "cannot complete stage instance {stage_instance_id}: \
         child {child_id} is in state {child_state}"
    )]
    StageNotCompletable {
        stage_instance_id: Uuid,
        child_id: Uuid,
        child_state: PlanItemState,
    },

    #[error("cannot complete case instance {case_instance_id}: root plan item is in state {root_state}")]
    CaseNotCompletable {
        case_instance_id: Uuid,
        root_state: PlanItemState,
    },

    #[error("case instance {case_instance_id} is {state}, expected active")]
    CaseNotActive {
        case_instance_id: Uuid,
        state: CaseState,
    },

    #[error("case definition {0:?} not found")]
    UnknownCaseDefinition(String),

    #[error(
        "plan item definition {definition_id:?} not found in \
         case definition {case_definition_id:?}"
    )]
    UnknownPlanItemDefinition {
        case_definition_id: String,
        definition_id: String,
    },

    #[error("case instance {0} not found")]
    CaseNotFound(Uuid),

    #[error("plan item instance {0} not found")]
    PlanItemNotFound(Uuid),

    #[error("transition {0} cannot be requested as an external trigger")]
    UnsupportedTrigger(Transition),

    #[error("command context is {phase}, expected {expected}")]
    ContextPhase {
        phase: ContextPhase,
        expected: ContextPhase,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// True for errors the caller may resolve by re-issuing the whole
    /// trigger (a concurrent unit of work won the commit race).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }
}
