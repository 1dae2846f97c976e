//! Integration tests for the trigger API: start, plan item transitions,
//! criteria cascades, variables, and rollback atomicity.

use std::collections::HashMap;

use uuid::Uuid;

use cayman_core::engine::CaseEngine;
use cayman_core::EngineError;
use cayman_store::records::{
    CaseState, PlanItemInstance, PlanItemState, Transition, TransitionEvent,
};
use cayman_store::EntityStore;

use cayman_test_utils as fixtures;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

async fn item(engine: &CaseEngine, case_id: Uuid, definition_id: &str) -> PlanItemInstance {
    engine
        .find_plan_item_instances(case_id)
        .await
        .expect("find_plan_item_instances should succeed")
        .into_iter()
        .find(|i| i.plan_item_definition_id == definition_id)
        .unwrap_or_else(|| panic!("no instance of {definition_id}"))
}

/// Project history onto (definition id, transition, reached state); the
/// case itself projects to "case".
fn labels(history: &[TransitionEvent]) -> Vec<(String, String, String)> {
    history
        .iter()
        .map(|e| {
            (
                e.plan_item_definition_id
                    .clone()
                    .unwrap_or_else(|| "case".to_owned()),
                e.transition.to_string(),
                e.to_state.clone(),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Starting a case
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_creates_stage_and_available_children() {
    fixtures::init_test_logging();
    let (engine, _store) = fixtures::engine_with(vec![fixtures::two_task_case()]);

    let case = engine
        .start_case(cayman_core::StartCaseRequest::new("loan-intake"))
        .await
        .expect("start should succeed");
    assert_eq!(case.state, CaseState::Active);

    let items = engine.find_plan_item_instances(case.id).await.unwrap();
    assert_eq!(items.len(), 3, "root stage plus two tasks");

    let root = item(&engine, case.id, "intake").await;
    assert!(root.is_stage);
    assert_eq!(root.state, PlanItemState::Active);
    assert!(root.stage_instance_id.is_none());

    for definition_id in ["collect-documents", "verify-identity"] {
        let task = item(&engine, case.id, definition_id).await;
        assert_eq!(task.state, PlanItemState::Available);
        assert_eq!(task.stage_instance_id, Some(root.id));
        assert!(!task.is_stage);
    }

    // Children are registered on the stage in model order.
    let collect = item(&engine, case.id, "collect-documents").await;
    let verify = item(&engine, case.id, "verify-identity").await;
    assert_eq!(root.child_ids, vec![collect.id, verify.id]);
}

#[tokio::test]
async fn start_unknown_definition_fails() {
    let (engine, _store) = fixtures::engine_with(vec![]);
    let err = engine
        .start_case(cayman_core::StartCaseRequest::new("ghost"))
        .await
        .expect_err("unknown definition should fail");
    assert!(matches!(err, EngineError::UnknownCaseDefinition(id) if id == "ghost"));
}

// ---------------------------------------------------------------------------
// Completion cascades
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completing_all_tasks_completes_stage_and_case() {
    fixtures::init_test_logging();
    let (engine, store) = fixtures::engine_with(vec![fixtures::two_task_case()]);
    let case = engine
        .start_case(cayman_core::StartCaseRequest::new("loan-intake"))
        .await
        .unwrap();

    for definition_id in ["collect-documents", "verify-identity"] {
        let task = item(&engine, case.id, definition_id).await;
        engine
            .trigger_plan_item(task.id, Transition::Start)
            .await
            .expect("start should succeed");
        engine
            .trigger_plan_item(task.id, Transition::Complete)
            .await
            .expect("complete should succeed");
    }

    let root = item(&engine, case.id, "intake").await;
    assert_eq!(root.state, PlanItemState::Completed);
    assert!(root.ended_time.is_some());

    let committed = engine.get_case_instance(case.id).await.unwrap().unwrap();
    assert_eq!(committed.state, CaseState::Completed);

    // The stage completed before the case did, within the final unit of
    // work.
    let history = engine.transition_history(case.id).await.unwrap();
    let seq = labels(&history);
    let stage_pos = seq
        .iter()
        .position(|(d, t, _)| d == "intake" && t == "complete")
        .expect("stage completion should be in history");
    let case_pos = seq
        .iter()
        .position(|(d, t, _)| d == "case" && t == "complete")
        .expect("case completion should be in history");
    assert!(stage_pos < case_pos);

    // One commit per trigger: start + four task transitions.
    let versioned = store.load_case(case.id).await.unwrap();
    assert_eq!(versioned.version, 5);
}

#[tokio::test]
async fn milestones_fire_in_the_same_unit_of_work() {
    fixtures::init_test_logging();
    let (engine, store) = fixtures::engine_with(vec![fixtures::milestone_chain_case()]);
    let case = engine
        .start_case(cayman_core::StartCaseRequest::new("onboarding"))
        .await
        .unwrap();

    let sign = item(&engine, case.id, "sign-contract").await;
    engine
        .trigger_plan_item(sign.id, Transition::Start)
        .await
        .unwrap();
    engine
        .trigger_plan_item(sign.id, Transition::Complete)
        .await
        .unwrap();

    // Both milestones occurred in the completing trigger's drain, and the
    // case completed behind them.
    assert_eq!(
        item(&engine, case.id, "contract-signed").await.state,
        PlanItemState::Completed
    );
    assert_eq!(
        item(&engine, case.id, "onboarding-done").await.state,
        PlanItemState::Completed
    );
    let committed = engine.get_case_instance(case.id).await.unwrap().unwrap();
    assert_eq!(committed.state, CaseState::Completed);

    let versioned = store.load_case(case.id).await.unwrap();
    assert_eq!(versioned.version, 3, "start + two triggers, no more");

    // Chained milestones occur in model order.
    let history = engine.transition_history(case.id).await.unwrap();
    let seq = labels(&history);
    let first = seq
        .iter()
        .position(|(d, t, _)| d == "contract-signed" && t == "occur")
        .expect("first milestone should occur");
    let second = seq
        .iter()
        .position(|(d, t, _)| d == "onboarding-done" && t == "occur")
        .expect("second milestone should occur");
    assert!(first < second);
}

#[tokio::test]
async fn exit_criterion_terminates_sibling() {
    fixtures::init_test_logging();
    let (engine, _store) = fixtures::engine_with(vec![fixtures::exit_criterion_case()]);
    let case = engine
        .start_case(cayman_core::StartCaseRequest::new("escalation"))
        .await
        .unwrap();

    // Both tasks auto-started.
    let resolve = item(&engine, case.id, "resolve").await;
    let monitor = item(&engine, case.id, "monitor").await;
    assert_eq!(resolve.state, PlanItemState::Active);
    assert_eq!(monitor.state, PlanItemState::Active);

    engine
        .trigger_plan_item(resolve.id, Transition::Complete)
        .await
        .unwrap();

    let monitor = item(&engine, case.id, "monitor").await;
    assert_eq!(monitor.state, PlanItemState::Terminated);

    let history = engine.transition_history(case.id).await.unwrap();
    assert!(
        labels(&history)
            .iter()
            .any(|(d, t, s)| d == "monitor" && t == "exit" && s == "terminated"),
        "monitor should have exited"
    );

    // A stage completes once every child is terminal, completed or not.
    let committed = engine.get_case_instance(case.id).await.unwrap().unwrap();
    assert_eq!(committed.state, CaseState::Completed);
}

// ---------------------------------------------------------------------------
// Manual activation and variables
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manual_activation_stops_at_enabled() {
    fixtures::init_test_logging();
    let (engine, _store) = fixtures::engine_with(vec![fixtures::manual_activation_case()]);
    let case = engine
        .start_case(cayman_core::StartCaseRequest::new("audit"))
        .await
        .unwrap();

    let audit = item(&engine, case.id, "deep-audit").await;
    assert_eq!(
        audit.state,
        PlanItemState::Enabled,
        "satisfied entry criterion should only enable a manual item"
    );

    // Completing an enabled item is not a valid transition.
    let err = engine
        .trigger_plan_item(audit.id, Transition::Complete)
        .await
        .expect_err("complete from enabled should fail");
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    engine
        .trigger_plan_item(audit.id, Transition::Start)
        .await
        .unwrap();
    engine
        .trigger_plan_item(audit.id, Transition::Complete)
        .await
        .unwrap();

    let committed = engine.get_case_instance(case.id).await.unwrap().unwrap();
    assert_eq!(committed.state, CaseState::Completed);
}

#[tokio::test]
async fn variable_write_wakes_gated_sentry() {
    fixtures::init_test_logging();
    let (engine, _store) = fixtures::engine_with(vec![fixtures::variable_gated_case()]);
    let case = engine
        .start_case(cayman_core::StartCaseRequest::new("payout"))
        .await
        .unwrap();

    let transfer = item(&engine, case.id, "transfer-funds").await;
    assert_eq!(transfer.state, PlanItemState::Available);

    engine
        .set_variables(
            case.id,
            HashMap::from([("approved".to_owned(), serde_json::json!(true))]),
        )
        .await
        .expect("set_variables should succeed");

    let transfer = item(&engine, case.id, "transfer-funds").await;
    assert_eq!(
        transfer.state,
        PlanItemState::Active,
        "sentry should fire in the same unit of work as the variable write"
    );

    engine
        .trigger_plan_item(transfer.id, Transition::Complete)
        .await
        .unwrap();
    let committed = engine.get_case_instance(case.id).await.unwrap().unwrap();
    assert_eq!(committed.state, CaseState::Completed);

    // The case is now terminal and immutable.
    let err = engine
        .set_variables(
            case.id,
            HashMap::from([("late".to_owned(), serde_json::json!(1))]),
        )
        .await
        .expect_err("variables on a completed case should fail");
    assert!(matches!(err, EngineError::CaseNotActive { .. }));
}

// ---------------------------------------------------------------------------
// Invalid transitions and atomicity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_transition_rolls_back_the_whole_unit_of_work() {
    fixtures::init_test_logging();
    let (engine, store) = fixtures::engine_with(vec![fixtures::two_task_case()]);
    let case = engine
        .start_case(cayman_core::StartCaseRequest::new("loan-intake"))
        .await
        .unwrap();

    let before = store.load_case(case.id).await.unwrap();
    let history_before = engine.transition_history(case.id).await.unwrap();

    // Complete requires active; the task is still available.
    let task = item(&engine, case.id, "collect-documents").await;
    let err = engine
        .trigger_plan_item(task.id, Transition::Complete)
        .await
        .expect_err("complete from available should fail");
    assert!(
        matches!(
            err,
            EngineError::InvalidTransition {
                state: PlanItemState::Available,
                transition: Transition::Complete,
                ..
            }
        ),
        "unexpected error: {err}"
    );
    assert!(!err.is_retryable());

    // Nothing was committed: same version, same snapshot, same history.
    let after = store.load_case(case.id).await.unwrap();
    assert_eq!(after.version, before.version);
    assert_eq!(after.snapshot, before.snapshot);
    assert_eq!(
        engine.transition_history(case.id).await.unwrap(),
        history_before
    );
}

#[tokio::test]
async fn terminal_items_accept_no_further_transitions() {
    let (engine, _store) = fixtures::engine_with(vec![fixtures::two_task_case()]);
    let case = engine
        .start_case(cayman_core::StartCaseRequest::new("loan-intake"))
        .await
        .unwrap();

    let task = item(&engine, case.id, "collect-documents").await;
    engine
        .trigger_plan_item(task.id, Transition::Start)
        .await
        .unwrap();
    engine
        .trigger_plan_item(task.id, Transition::Complete)
        .await
        .unwrap();

    for transition in [
        Transition::Start,
        Transition::Complete,
        Transition::Terminate,
        Transition::Exit,
    ] {
        let err = engine
            .trigger_plan_item(task.id, transition)
            .await
            .expect_err("completed item must be immutable");
        assert!(
            matches!(
                err,
                EngineError::InvalidTransition {
                    state: PlanItemState::Completed,
                    ..
                }
            ),
            "unexpected error for {transition}: {err}"
        );
    }
}

#[tokio::test]
async fn complete_case_requires_terminal_root() {
    let (engine, _store) = fixtures::engine_with(vec![fixtures::two_task_case()]);
    let case = engine
        .start_case(cayman_core::StartCaseRequest::new("loan-intake"))
        .await
        .unwrap();

    let err = engine
        .complete_case(case.id)
        .await
        .expect_err("completing a case with a live root should fail");
    assert!(matches!(err, EngineError::CaseNotCompletable { .. }));

    let committed = engine.get_case_instance(case.id).await.unwrap().unwrap();
    assert_eq!(committed.state, CaseState::Active, "nothing committed");
}

#[tokio::test]
async fn unknown_ids_give_not_found() {
    let (engine, _store) = fixtures::engine_with(vec![fixtures::two_task_case()]);

    let err = engine
        .trigger_plan_item(Uuid::new_v4(), Transition::Start)
        .await
        .expect_err("unknown plan item should fail");
    assert!(matches!(err, EngineError::PlanItemNotFound(_)));

    let err = engine
        .terminate_case(Uuid::new_v4())
        .await
        .expect_err("unknown case should fail");
    assert!(matches!(err, EngineError::CaseNotFound(_)));
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_trigger_sequences_fire_identical_transitions() {
    fixtures::init_test_logging();

    let mut runs = Vec::new();
    for _ in 0..2 {
        let (engine, _store) = fixtures::engine_with(vec![fixtures::milestone_chain_case()]);
        let case = engine
            .start_case(cayman_core::StartCaseRequest::new("onboarding"))
            .await
            .unwrap();
        let sign = item(&engine, case.id, "sign-contract").await;
        engine
            .trigger_plan_item(sign.id, Transition::Start)
            .await
            .unwrap();
        engine
            .trigger_plan_item(sign.id, Transition::Complete)
            .await
            .unwrap();

        let history = engine.transition_history(case.id).await.unwrap();
        runs.push(labels(&history));

        let committed = engine.get_case_instance(case.id).await.unwrap().unwrap();
        assert_eq!(committed.state, CaseState::Completed);
    }

    assert_eq!(runs[0], runs[1], "transition sequences must be identical");
}
