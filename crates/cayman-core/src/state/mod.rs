//! Lifecycle state machines.
//!
//! Encodes the allowed transition graphs for plan item instances and case
//! instances. Operations validate against these tables before mutating
//! anything; an edge missing here is an invalid transition and aborts the
//! unit of work.

use cayman_store::records::{CaseState, PlanItemState};

/// The plan item instance state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// available -> enabled     (enable, manual activation)
/// available -> active      (start)
/// enabled   -> active      (start)
/// active    -> completed   (complete / occur)
/// any non-terminal -> terminated  (terminate / exit)
/// ```
///
/// Completed and terminated are terminal: no edges leave them. Suspended
/// and failed are never produced by the engine, but external writers can
/// set them, so termination still applies.
pub struct PlanItemStateMachine;

impl PlanItemStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge in
    /// the state graph.
    pub fn is_valid_transition(from: PlanItemState, to: PlanItemState) -> bool {
        match (from, to) {
            (PlanItemState::Available, PlanItemState::Enabled)
            | (PlanItemState::Available, PlanItemState::Active)
            | (PlanItemState::Enabled, PlanItemState::Active)
            | (PlanItemState::Active, PlanItemState::Completed) => true,
            (from, PlanItemState::Terminated) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// The case instance state machine.
///
/// ```text
/// active -> completed   (root plan item completed)
/// active -> terminated  (terminate case)
/// ```
pub struct CaseStateMachine;

impl CaseStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge in
    /// the state graph.
    pub fn is_valid_transition(from: CaseState, to: CaseState) -> bool {
        matches!(
            (from, to),
            (CaseState::Active, CaseState::Completed) | (CaseState::Active, CaseState::Terminated)
        )
    }
}
