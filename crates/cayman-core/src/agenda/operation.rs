//! The closed set of agenda operations.
//!
//! One tag per transition kind; the drain loop dispatches the whole set
//! through a single apply function, so the transition table stays
//! exhaustively enumerable and directly testable.

use std::fmt;

use uuid::Uuid;

use cayman_store::records::Transition;

use crate::error::EngineError;

/// An atomic state-transition command, queued on the agenda and consumed
/// entirely within one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Activate a freshly created stage instance and create its children.
    InitStage { target: Uuid },
    /// available -> enabled (manual activation).
    Enable { target: Uuid },
    /// available|enabled -> active; stages delegate to init semantics.
    Start { target: Uuid },
    /// active -> completed for event-like items (milestones).
    Occur { target: Uuid },
    /// active -> completed; stages require every child terminal.
    Complete { target: Uuid },
    /// any non-terminal -> terminated, cascading depth-first.
    Terminate { target: Uuid },
    /// Like terminate, fired by an exit criterion or case-level cascade.
    Exit { target: Uuid },
    /// Completion check planned when a stage loses its last live child:
    /// completes the stage if it is still active and all children are
    /// terminal, otherwise does nothing.
    CompleteStage { target: Uuid },
    /// Re-run the criteria evaluator over the case's live plan items.
    EvaluateCriteria { case_instance_id: Uuid },
    /// active -> completed on the case; requires the root item terminal.
    CompleteCase { case_instance_id: Uuid },
    /// active -> terminated on the case; exits the live root subtree first.
    TerminateCase { case_instance_id: Uuid },
}

impl Operation {
    /// Map an externally requested transition onto the operation that
    /// performs it. `Create` is internal to stage activation and cannot be
    /// requested.
    pub fn from_trigger(target: Uuid, transition: Transition) -> Result<Self, EngineError> {
        match transition {
            Transition::Enable => Ok(Self::Enable { target }),
            Transition::Start => Ok(Self::Start { target }),
            Transition::Occur => Ok(Self::Occur { target }),
            Transition::Complete => Ok(Self::Complete { target }),
            Transition::Terminate => Ok(Self::Terminate { target }),
            Transition::Exit => Ok(Self::Exit { target }),
            Transition::Create => Err(EngineError::UnsupportedTrigger(transition)),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitStage { target } => write!(f, "[init stage] plan item instance {target}"),
            Self::Enable { target } => write!(f, "[enable] plan item instance {target}"),
            Self::Start { target } => write!(f, "[start] plan item instance {target}"),
            Self::Occur { target } => write!(f, "[occur] plan item instance {target}"),
            Self::Complete { target } => write!(f, "[complete] plan item instance {target}"),
            Self::Terminate { target } => write!(f, "[terminate] plan item instance {target}"),
            Self::Exit { target } => write!(f, "[exit] plan item instance {target}"),
            Self::CompleteStage { target } => {
                write!(f, "[complete stage check] plan item instance {target}")
            }
            Self::EvaluateCriteria { case_instance_id } => {
                write!(f, "[evaluate criteria] case instance {case_instance_id}")
            }
            Self::CompleteCase { case_instance_id } => {
                write!(f, "[complete case] case instance {case_instance_id}")
            }
            Self::TerminateCase { case_instance_id } => {
                write!(f, "[terminate case] case instance {case_instance_id}")
            }
        }
    }
}
