//! Shared fixtures for cayman integration tests.
//!
//! Canned case definitions covering the lifecycle surface, plus an engine
//! harness wired to a fresh in-memory store.

use std::sync::Arc;

use cayman_core::engine::CaseEngine;
use cayman_core::model::{
    CaseDefinition, Condition, Criterion, PlanItemDefinition, StaticModelProvider,
};
use cayman_store::records::PlanItemState;
use cayman_store::{EntityStore, MemoryStore};

/// Initialise tracing for a test binary. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cayman_core=debug,cayman_store=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// An engine over a fresh [`MemoryStore`] knowing the given definitions.
/// Returns the store too, for direct snapshot/version assertions.
pub fn engine_with(definitions: Vec<CaseDefinition>) -> (CaseEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let models = Arc::new(StaticModelProvider::new(definitions));
    let engine = CaseEngine::new(Arc::clone(&store) as Arc<dyn EntityStore>, models);
    (engine, store)
}

/// A root stage with two tasks and no criteria: both wait for external
/// triggers.
pub fn two_task_case() -> CaseDefinition {
    CaseDefinition::new(
        "loan-intake",
        "Loan intake",
        PlanItemDefinition::stage("intake", "Intake")
            .child(PlanItemDefinition::task("collect-documents", "Collect documents"))
            .child(PlanItemDefinition::task("verify-identity", "Verify identity")),
    )
    .expect("fixture model should validate")
}

/// A nested review stage whose three tasks auto-start when the stage
/// activates; the stage itself auto-starts on case start.
pub fn nested_stage_case() -> CaseDefinition {
    CaseDefinition::new(
        "claim-review",
        "Claim review",
        PlanItemDefinition::stage("root", "Root").child(
            PlanItemDefinition::stage("review", "Review")
                .entry(Criterion::always("review-entry"))
                .child(
                    PlanItemDefinition::task("read-claim", "Read claim")
                        .entry(Criterion::always("read-entry")),
                )
                .child(
                    PlanItemDefinition::task("check-policy", "Check policy")
                        .entry(Criterion::always("check-entry")),
                )
                .child(
                    PlanItemDefinition::task("draft-response", "Draft response")
                        .entry(Criterion::always("draft-entry")),
                ),
        ),
    )
    .expect("fixture model should validate")
}

/// A task followed by two chained milestones: completing the task fires
/// both milestones in the same unit of work.
pub fn milestone_chain_case() -> CaseDefinition {
    CaseDefinition::new(
        "onboarding",
        "Onboarding",
        PlanItemDefinition::stage("root", "Root")
            .child(PlanItemDefinition::task("sign-contract", "Sign contract"))
            .child(
                PlanItemDefinition::milestone("contract-signed", "Contract signed").entry(
                    Criterion::on_item_state(
                        "signed-entry",
                        "sign-contract",
                        PlanItemState::Completed,
                    ),
                ),
            )
            .child(
                PlanItemDefinition::milestone("onboarding-done", "Onboarding done").entry(
                    Criterion::on_item_state(
                        "done-entry",
                        "contract-signed",
                        PlanItemState::Completed,
                    ),
                ),
            ),
    )
    .expect("fixture model should validate")
}

/// A manually activated task: a satisfied entry criterion only enables it.
pub fn manual_activation_case() -> CaseDefinition {
    CaseDefinition::new(
        "audit",
        "Audit",
        PlanItemDefinition::stage("root", "Root").child(
            PlanItemDefinition::task("deep-audit", "Deep audit")
                .manual()
                .entry(Criterion::always("audit-entry")),
        ),
    )
    .expect("fixture model should validate")
}

/// A task gated on a case variable.
pub fn variable_gated_case() -> CaseDefinition {
    CaseDefinition::new(
        "payout",
        "Payout",
        PlanItemDefinition::stage("root", "Root").child(
            PlanItemDefinition::task("transfer-funds", "Transfer funds").entry(Criterion::new(
                "transfer-entry",
                vec![Condition::VariableEquals {
                    name: "approved".to_owned(),
                    value: serde_json::json!(true),
                }],
            )),
        ),
    )
    .expect("fixture model should validate")
}

/// A task whose completion exits a long-running second task through an
/// exit criterion.
pub fn exit_criterion_case() -> CaseDefinition {
    CaseDefinition::new(
        "escalation",
        "Escalation",
        PlanItemDefinition::stage("root", "Root")
            .child(
                PlanItemDefinition::task("resolve", "Resolve")
                    .entry(Criterion::always("resolve-entry")),
            )
            .child(
                PlanItemDefinition::task("monitor", "Monitor")
                    .entry(Criterion::always("monitor-entry"))
                    .exit(Criterion::on_item_state(
                        "monitor-exit",
                        "resolve",
                        PlanItemState::Completed,
                    )),
            ),
    )
    .expect("fixture model should validate")
}
