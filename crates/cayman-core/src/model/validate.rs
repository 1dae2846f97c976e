//! Case model validation.
//!
//! Runs once at [`super::CaseDefinition::new`] time and rejects:
//! - a plan model root that is not a stage
//! - duplicate plan item ids
//! - children on non-stage items
//! - criteria conditions referencing unknown plan item ids
//! - milestones with manual activation or without any entry criterion

use std::collections::HashSet;

use thiserror::Error;

use super::{CaseDefinition, Condition, PlanItemDefinition, PlanItemType};

/// Errors raised while validating an assembled case model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("plan model root {0:?} must be a stage")]
    RootNotStage(String),

    #[error("duplicate plan item id: {0:?}")]
    DuplicatePlanItemId(String),

    #[error("plan item {0:?} is not a stage but has children")]
    ChildrenOnNonStage(String),

    #[error("criterion {criterion:?} on plan item {item:?} references unknown plan item {target:?}")]
    UnknownCriterionTarget {
        item: String,
        criterion: String,
        target: String,
    },

    #[error("milestone {0:?} cannot require manual activation")]
    MilestoneManualActivation(String),

    #[error("milestone {0:?} must carry at least one entry criterion")]
    MilestoneWithoutEntry(String),
}

pub(super) fn validate(definition: &CaseDefinition) -> Result<(), ModelError> {
    if definition.plan_model.item_type != PlanItemType::Stage {
        return Err(ModelError::RootNotStage(definition.plan_model.id.clone()));
    }

    let mut ids = HashSet::new();
    collect_ids(&definition.plan_model, &mut ids)?;
    check_items(&definition.plan_model, &ids)?;
    Ok(())
}

fn collect_ids<'a>(
    item: &'a PlanItemDefinition,
    ids: &mut HashSet<&'a str>,
) -> Result<(), ModelError> {
    if !ids.insert(item.id.as_str()) {
        return Err(ModelError::DuplicatePlanItemId(item.id.clone()));
    }
    for child in &item.children {
        collect_ids(child, ids)?;
    }
    Ok(())
}

fn check_items(item: &PlanItemDefinition, ids: &HashSet<&str>) -> Result<(), ModelError> {
    if item.item_type != PlanItemType::Stage && !item.children.is_empty() {
        return Err(ModelError::ChildrenOnNonStage(item.id.clone()));
    }

    if item.item_type == PlanItemType::Milestone {
        if item.manual_activation {
            return Err(ModelError::MilestoneManualActivation(item.id.clone()));
        }
        if item.entry_criteria.is_empty() {
            return Err(ModelError::MilestoneWithoutEntry(item.id.clone()));
        }
    }

    for criterion in item.entry_criteria.iter().chain(&item.exit_criteria) {
        for condition in &criterion.conditions {
            if let Condition::ItemInState { item: target, .. } = condition {
                if !ids.contains(target.as_str()) {
                    return Err(ModelError::UnknownCriterionTarget {
                        item: item.id.clone(),
                        criterion: criterion.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }
    }

    for child in &item.children {
        check_items(child, ids)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use cayman_store::records::PlanItemState;

    use super::super::{CaseDefinition, Criterion, PlanItemDefinition};
    use super::*;

    #[test]
    fn accepts_well_formed_model() {
        let result = CaseDefinition::new(
            "claims",
            "Claims handling",
            PlanItemDefinition::stage("root", "Root")
                .child(PlanItemDefinition::task("assess", "Assess claim"))
                .child(
                    PlanItemDefinition::milestone("assessed", "Claim assessed").entry(
                        Criterion::on_item_state("assessed-entry", "assess", PlanItemState::Completed),
                    ),
                ),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_non_stage_root() {
        let err = CaseDefinition::new("c", "C", PlanItemDefinition::task("root", "Root"))
            .expect_err("task root should be rejected");
        assert!(matches!(err, ModelError::RootNotStage(_)));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = CaseDefinition::new(
            "c",
            "C",
            PlanItemDefinition::stage("root", "Root")
                .child(PlanItemDefinition::task("a", "A"))
                .child(PlanItemDefinition::task("a", "A again")),
        )
        .expect_err("duplicate id should be rejected");
        assert!(matches!(err, ModelError::DuplicatePlanItemId(id) if id == "a"));
    }

    #[test]
    fn rejects_children_on_task() {
        let mut task = PlanItemDefinition::task("a", "A");
        task.children.push(PlanItemDefinition::task("b", "B"));
        let err = CaseDefinition::new(
            "c",
            "C",
            PlanItemDefinition::stage("root", "Root").child(task),
        )
        .expect_err("children on a task should be rejected");
        assert!(matches!(err, ModelError::ChildrenOnNonStage(id) if id == "a"));
    }

    #[test]
    fn rejects_unknown_criterion_target() {
        let err = CaseDefinition::new(
            "c",
            "C",
            PlanItemDefinition::stage("root", "Root").child(
                PlanItemDefinition::task("a", "A").entry(Criterion::on_item_state(
                    "a-entry",
                    "ghost",
                    PlanItemState::Completed,
                )),
            ),
        )
        .expect_err("unknown target should be rejected");
        assert!(matches!(err, ModelError::UnknownCriterionTarget { target, .. } if target == "ghost"));
    }

    #[test]
    fn rejects_milestone_without_entry() {
        let err = CaseDefinition::new(
            "c",
            "C",
            PlanItemDefinition::stage("root", "Root")
                .child(PlanItemDefinition::milestone("m", "M")),
        )
        .expect_err("milestone without entry criterion should be rejected");
        assert!(matches!(err, ModelError::MilestoneWithoutEntry(id) if id == "m"));
    }

    #[test]
    fn rejects_manual_milestone() {
        let err = CaseDefinition::new(
            "c",
            "C",
            PlanItemDefinition::stage("root", "Root").child(
                PlanItemDefinition::milestone("m", "M")
                    .manual()
                    .entry(Criterion::always("m-entry")),
            ),
        )
        .expect_err("manual milestone should be rejected");
        assert!(matches!(err, ModelError::MilestoneManualActivation(id) if id == "m"));
    }
}
