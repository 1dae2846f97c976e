//! Sentry evaluation.
//!
//! Recomputes which entry/exit criteria are satisfied after every batch of
//! state changes and plans the resulting operations. The walk follows
//! model-declared order, so a fixed model and trigger sequence always
//! yields the same operation order.
//!
//! Fixpoint: every state-changing operation plans a trailing evaluation,
//! so the evaluator re-runs until it contributes nothing. Termination is
//! guaranteed because terminal instances are skipped and each instance
//! only ever moves forward; idempotence across consecutive runs is
//! guaranteed by skipping operations that are already queued.

use cayman_store::records::{CaseState, PlanItemState};

use crate::agenda::Operation;
use crate::context::CommandContext;
use crate::error::EngineError;
use crate::model::{Condition, Criterion, PlanItemDefinition, PlanItemType};

/// Evaluate all criteria across the case's live plan items and plan the
/// satisfied transitions.
pub(crate) fn evaluate(ctx: &mut CommandContext) -> Result<(), EngineError> {
    if ctx.working_set.case().state != CaseState::Active {
        return Ok(());
    }

    let model = ctx.model_arc();
    let mut planned = Vec::new();
    collect(&model.plan_model, ctx, &mut planned);

    for op in planned {
        if !ctx.agenda.contains(&op) {
            ctx.agenda.plan(op);
        }
    }
    Ok(())
}

/// Walk a stage's children in declared order, planning operations for
/// satisfied sentries.
fn collect(stage: &PlanItemDefinition, ctx: &CommandContext, ops: &mut Vec<Operation>) {
    for definition in &stage.children {
        let Some(item) = ctx.working_set.find_by_definition(&definition.id) else {
            // The containing stage has not activated yet.
            continue;
        };
        let target = item.id;
        let mut exiting = false;

        match item.state {
            PlanItemState::Available => {
                if satisfied(&definition.entry_criteria, ctx) {
                    if definition.manual_activation {
                        ops.push(Operation::Enable { target });
                    } else {
                        ops.push(Operation::Start { target });
                        // Milestones have no work of their own: they occur
                        // in the same drain that activates them.
                        if definition.item_type == PlanItemType::Milestone {
                            ops.push(Operation::Occur { target });
                        }
                    }
                }
            }
            PlanItemState::Active => {
                if satisfied(&definition.exit_criteria, ctx) {
                    ops.push(Operation::Exit { target });
                    exiting = true;
                }
            }
            _ => {}
        }

        // Do not plan work inside a stage that is about to be exited; the
        // exit cascade owns its children.
        if definition.item_type == PlanItemType::Stage && !exiting {
            collect(definition, ctx, ops);
        }
    }
}

/// Any satisfied criterion fires; within one criterion, all conditions
/// must hold.
fn satisfied(criteria: &[Criterion], ctx: &CommandContext) -> bool {
    criteria
        .iter()
        .any(|c| c.conditions.iter().all(|cond| holds(cond, ctx)))
}

fn holds(condition: &Condition, ctx: &CommandContext) -> bool {
    match condition {
        Condition::ItemInState { item, state } => ctx
            .working_set
            .find_by_definition(item)
            .is_some_and(|i| i.state == *state),
        Condition::VariableEquals { name, value } => ctx
            .working_set
            .case()
            .variables
            .get(name)
            .is_some_and(|v| v == value),
        Condition::VariableSet { name } => {
            ctx.working_set.case().variables.contains_key(name)
        }
    }
}
