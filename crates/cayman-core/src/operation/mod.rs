//! Operation application and cascades.
//!
//! The single dispatch point for the closed operation set. Each function
//! validates the precondition against the state machine, mutates the
//! working set, records the fired transition, and enqueues follow-on
//! operations. A failed precondition aborts the whole unit of work — an
//! operation never partially applies.
//!
//! The shared delete path enforces the cascade invariant: a parent never
//! reaches a terminal state while a child is non-terminal. Child cascades
//! run depth-first inside the parent's operation; everything else goes
//! back through the agenda.

use chrono::Utc;
use uuid::Uuid;

use cayman_store::records::{CaseState, PlanItemInstance, PlanItemState, Transition};

use crate::agenda::Operation;
use crate::context::CommandContext;
use crate::criteria;
use crate::error::EngineError;
use crate::model::{PlanItemDefinition, PlanItemType};
use crate::state::{CaseStateMachine, PlanItemStateMachine};

/// Apply one dequeued operation to the working set.
pub(crate) fn apply(ctx: &mut CommandContext, op: Operation) -> Result<(), EngineError> {
    match op {
        Operation::InitStage { target } => init_stage(ctx, target),
        Operation::Enable { target } => enable(ctx, target),
        Operation::Start { target } => start(ctx, target),
        Operation::Occur { target } => occur(ctx, target),
        Operation::Complete { target } => complete(ctx, target),
        Operation::Terminate { target } => {
            delete_plan_item(ctx, target, PlanItemState::Terminated, Transition::Terminate, false)
        }
        Operation::Exit { target } => {
            delete_plan_item(ctx, target, PlanItemState::Terminated, Transition::Exit, false)
        }
        Operation::CompleteStage { target } => complete_stage_check(ctx, target),
        Operation::EvaluateCriteria { .. } => criteria::evaluate(ctx),
        Operation::CompleteCase { case_instance_id } => complete_case(ctx, case_instance_id),
        Operation::TerminateCase { case_instance_id } => terminate_case(ctx, case_instance_id),
    }
}

/// Create a plan item instance for a definition, in the available state,
/// owned by `parent`. Fires the create transition.
pub(crate) fn create_plan_item_instance(
    ctx: &mut CommandContext,
    definition: &PlanItemDefinition,
    parent: Option<Uuid>,
) -> Result<Uuid, EngineError> {
    let case = ctx.working_set.case();
    let instance = PlanItemInstance {
        id: Uuid::new_v4(),
        case_definition_id: case.case_definition_id.clone(),
        case_instance_id: case.id,
        stage_instance_id: parent,
        plan_item_definition_id: definition.id.clone(),
        name: definition.name.clone(),
        state: PlanItemState::Available,
        is_stage: definition.item_type == PlanItemType::Stage,
        tenant_id: case.tenant_id.clone(),
        child_ids: Vec::new(),
        create_time: Utc::now(),
        ended_time: None,
    };
    let id = instance.id;
    ctx.working_set.insert(instance);
    if let Some(parent) = parent {
        ctx.working_set.item_mut(parent)?.child_ids.push(id);
    }
    ctx.record_item_transition(id, Transition::Create)?;
    Ok(id)
}

/// Activate a freshly created stage instance: the root plan model on case
/// start, or a nested stage reached through `start`.
fn init_stage(ctx: &mut CommandContext, target: Uuid) -> Result<(), EngineError> {
    let state = ctx.working_set.item(target)?.state;
    if state != PlanItemState::Available {
        return Err(EngineError::InvalidTransition {
            plan_item_instance_id: target,
            state,
            transition: Transition::Start,
        });
    }
    activate(ctx, target)
}

fn enable(ctx: &mut CommandContext, target: Uuid) -> Result<(), EngineError> {
    let state = ctx.working_set.item(target)?.state;
    if state != PlanItemState::Available {
        return Err(EngineError::InvalidTransition {
            plan_item_instance_id: target,
            state,
            transition: Transition::Enable,
        });
    }
    ctx.working_set.item_mut(target)?.state = PlanItemState::Enabled;
    ctx.record_item_transition(target, Transition::Enable)?;
    ctx.agenda
        .plan_evaluate_criteria(ctx.working_set.case().id);
    Ok(())
}

fn start(ctx: &mut CommandContext, target: Uuid) -> Result<(), EngineError> {
    let state = ctx.working_set.item(target)?.state;
    if !PlanItemStateMachine::is_valid_transition(state, PlanItemState::Active) {
        return Err(EngineError::InvalidTransition {
            plan_item_instance_id: target,
            state,
            transition: Transition::Start,
        });
    }
    activate(ctx, target)
}

/// Shared activation: set active, fire start, and for stages create one
/// child instance per child definition in model order.
fn activate(ctx: &mut CommandContext, target: Uuid) -> Result<(), EngineError> {
    let definition_id = ctx
        .working_set
        .item(target)?
        .plan_item_definition_id
        .clone();
    let model = ctx.model_arc();
    let definition = model.find_plan_item(&definition_id).ok_or_else(|| {
        EngineError::UnknownPlanItemDefinition {
            case_definition_id: model.id.clone(),
            definition_id: definition_id.clone(),
        }
    })?;
    let is_stage = definition.item_type == PlanItemType::Stage;

    {
        let item = ctx.working_set.item_mut(target)?;
        item.state = PlanItemState::Active;
        item.is_stage = is_stage;
    }
    ctx.record_item_transition(target, Transition::Start)?;

    if is_stage {
        for child in &definition.children {
            create_plan_item_instance(ctx, child, Some(target))?;
        }
    }

    ctx.agenda
        .plan_evaluate_criteria(ctx.working_set.case().id);
    Ok(())
}

fn occur(ctx: &mut CommandContext, target: Uuid) -> Result<(), EngineError> {
    let item = ctx.working_set.item(target)?;
    if item.is_stage {
        return Err(EngineError::OccurOnStage(target));
    }
    if item.state != PlanItemState::Active {
        return Err(EngineError::InvalidTransition {
            plan_item_instance_id: target,
            state: item.state,
            transition: Transition::Occur,
        });
    }
    delete_plan_item(ctx, target, PlanItemState::Completed, Transition::Occur, false)
}

fn complete(ctx: &mut CommandContext, target: Uuid) -> Result<(), EngineError> {
    let item = ctx.working_set.item(target)?;
    if item.state != PlanItemState::Active {
        return Err(EngineError::InvalidTransition {
            plan_item_instance_id: target,
            state: item.state,
            transition: Transition::Complete,
        });
    }
    if item.is_stage {
        if let Some(child_id) = ctx.working_set.live_children(target).first().copied() {
            let child_state = ctx.working_set.item(child_id)?.state;
            return Err(EngineError::StageNotCompletable {
                stage_instance_id: target,
                child_id,
                child_state,
            });
        }
    }
    delete_plan_item(ctx, target, PlanItemState::Completed, Transition::Complete, false)
}

/// Completion check planned when a stage loses its last live child. Unlike
/// `complete`, racing checks in one drain are harmless: anything other
/// than an active stage with only terminal children is a no-op.
fn complete_stage_check(ctx: &mut CommandContext, target: Uuid) -> Result<(), EngineError> {
    let item = ctx.working_set.item(target)?;
    if !item.is_stage || item.state != PlanItemState::Active {
        return Ok(());
    }
    if ctx.working_set.has_live_children(target) {
        return Ok(());
    }
    delete_plan_item(ctx, target, PlanItemState::Completed, Transition::Complete, false)
}

/// The shared delete path: every road to a terminal state runs through
/// here.
///
/// Order is mandatory: live children are cascaded depth-first before the
/// target itself is marked terminal. The parent completion check and the
/// case-level follow-up are suppressed while this deletion is itself part
/// of an enclosing cascade — the outermost call owns them.
fn delete_plan_item(
    ctx: &mut CommandContext,
    target: Uuid,
    new_state: PlanItemState,
    transition: Transition,
    cascading: bool,
) -> Result<(), EngineError> {
    let (state, is_stage, parent_id) = {
        let item = ctx.working_set.item(target)?;
        (item.state, item.is_stage, item.stage_instance_id)
    };
    if !PlanItemStateMachine::is_valid_transition(state, new_state) {
        return Err(EngineError::InvalidTransition {
            plan_item_instance_id: target,
            state,
            transition,
        });
    }

    if is_stage {
        for child_id in ctx.working_set.live_children(target) {
            delete_plan_item(ctx, child_id, PlanItemState::Terminated, transition_for_cascade(transition), true)?;
        }
    }

    {
        let item = ctx.working_set.item_mut(target)?;
        item.state = new_state;
        item.ended_time = Some(Utc::now());
    }
    ctx.record_item_transition(target, transition)?;

    if cascading {
        return Ok(());
    }

    let case_id = ctx.working_set.case().id;
    match parent_id {
        Some(parent_id) => {
            let parent_active =
                ctx.working_set.item(parent_id)?.state == PlanItemState::Active;
            if parent_active && !ctx.working_set.has_live_children(parent_id) {
                ctx.agenda.plan(Operation::CompleteStage { target: parent_id });
            }
        }
        // The root plan model ended outside a case-level cascade: the case
        // follows it down.
        None => {
            if new_state == PlanItemState::Completed {
                ctx.agenda.plan(Operation::CompleteCase {
                    case_instance_id: case_id,
                });
            } else {
                ctx.agenda.plan(Operation::TerminateCase {
                    case_instance_id: case_id,
                });
            }
        }
    }

    ctx.agenda.plan_evaluate_criteria(case_id);
    Ok(())
}

/// Transition label propagated onto cascaded children. Completing a stage
/// never cascades (checked upstream); termination keeps its label, exits
/// stay exits.
fn transition_for_cascade(transition: Transition) -> Transition {
    match transition {
        Transition::Terminate => Transition::Terminate,
        _ => Transition::Exit,
    }
}

fn complete_case(ctx: &mut CommandContext, case_instance_id: Uuid) -> Result<(), EngineError> {
    let case_state = ctx.working_set.case().state;
    if !CaseStateMachine::is_valid_transition(case_state, CaseState::Completed) {
        return Err(EngineError::InvalidCaseTransition {
            case_instance_id,
            state: case_state,
            transition: Transition::Complete,
        });
    }
    if let Some(root) = ctx.working_set.root() {
        if !root.state.is_terminal() {
            return Err(EngineError::CaseNotCompletable {
                case_instance_id,
                root_state: root.state,
            });
        }
    }
    ctx.working_set.case_mut().state = CaseState::Completed;
    ctx.record_case_transition(Transition::Complete);
    Ok(())
}

fn terminate_case(ctx: &mut CommandContext, case_instance_id: Uuid) -> Result<(), EngineError> {
    let case_state = ctx.working_set.case().state;
    if !CaseStateMachine::is_valid_transition(case_state, CaseState::Terminated) {
        return Err(EngineError::InvalidCaseTransition {
            case_instance_id,
            state: case_state,
            transition: Transition::Terminate,
        });
    }

    // Exit the live root subtree first: children, then the root, then the
    // case itself.
    let live_root = ctx
        .working_set
        .root()
        .filter(|r| !r.state.is_terminal())
        .map(|r| r.id);
    if let Some(root_id) = live_root {
        delete_plan_item(ctx, root_id, PlanItemState::Terminated, Transition::Exit, true)?;
    }

    ctx.working_set.case_mut().state = CaseState::Terminated;
    ctx.record_case_transition(Transition::Terminate);
    Ok(())
}
