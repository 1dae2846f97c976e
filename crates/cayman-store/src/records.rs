use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// State of a case instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Active,
    Completed,
    Terminated,
    Suspended,
}

impl CaseState {
    /// Completed and terminated case instances are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
            Self::Suspended => "suspended",
        };
        f.write_str(s)
    }
}

impl FromStr for CaseState {
    type Err = CaseStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "terminated" => Ok(Self::Terminated),
            "suspended" => Ok(Self::Suspended),
            other => Err(CaseStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`CaseState`] string.
#[derive(Debug, Clone)]
pub struct CaseStateParseError(pub String);

impl fmt::Display for CaseStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid case state: {:?}", self.0)
    }
}

impl std::error::Error for CaseStateParseError {}

// ---------------------------------------------------------------------------

/// State of a plan item instance.
///
/// `Suspended` and `Failed` are representable for external writers and
/// history imports; no engine operation produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemState {
    Available,
    Enabled,
    Active,
    Completed,
    Terminated,
    Suspended,
    Failed,
}

impl PlanItemState {
    /// Completed and terminated instances leave the live working set and
    /// accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }
}

impl fmt::Display for PlanItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "available",
            Self::Enabled => "enabled",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
            Self::Suspended => "suspended",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanItemState {
    type Err = PlanItemStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "enabled" => Ok(Self::Enabled),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "terminated" => Ok(Self::Terminated),
            "suspended" => Ok(Self::Suspended),
            "failed" => Ok(Self::Failed),
            other => Err(PlanItemStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanItemState`] string.
#[derive(Debug, Clone)]
pub struct PlanItemStateParseError(pub String);

impl fmt::Display for PlanItemStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan item state: {:?}", self.0)
    }
}

impl std::error::Error for PlanItemStateParseError {}

// ---------------------------------------------------------------------------

/// Lifecycle transition label fired when an instance changes state.
///
/// Recorded per applied operation and handed to the store at commit as the
/// audit trail. `Exit` reaches the same state as `Terminate` but marks a
/// removal forced from outside (exit criterion or case-level cascade).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Create,
    Enable,
    Start,
    Occur,
    Complete,
    Terminate,
    Exit,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Enable => "enable",
            Self::Start => "start",
            Self::Occur => "occur",
            Self::Complete => "complete",
            Self::Terminate => "terminate",
            Self::Exit => "exit",
        };
        f.write_str(s)
    }
}

impl FromStr for Transition {
    type Err = TransitionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "enable" => Ok(Self::Enable),
            "start" => Ok(Self::Start),
            "occur" => Ok(Self::Occur),
            "complete" => Ok(Self::Complete),
            "terminate" => Ok(Self::Terminate),
            "exit" => Ok(Self::Exit),
            other => Err(TransitionParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Transition`] string.
#[derive(Debug, Clone)]
pub struct TransitionParseError(pub String);

impl fmt::Display for TransitionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transition: {:?}", self.0)
    }
}

impl std::error::Error for TransitionParseError {}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A live execution of a case definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseInstance {
    pub id: Uuid,
    /// Set when this case was started as a sub-case of another.
    pub parent_case_instance_id: Option<Uuid>,
    pub business_key: Option<String>,
    pub name: Option<String>,
    pub case_definition_id: String,
    pub state: CaseState,
    pub start_time: DateTime<Utc>,
    pub start_user_id: Option<String>,
    /// Correlation handle for the external invoker; opaque to the engine.
    pub callback_id: Option<String>,
    pub callback_type: Option<String>,
    pub tenant_id: String,
    pub variables: HashMap<String, serde_json::Value>,
}

/// The live, stateful execution of one plan item within a case instance.
///
/// Parent/child relations are id references into the case's arena of
/// instances; a stage's `child_ids` preserves model-declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItemInstance {
    pub id: Uuid,
    pub case_definition_id: String,
    pub case_instance_id: Uuid,
    /// Owning stage instance; `None` for the root plan model instance.
    pub stage_instance_id: Option<Uuid>,
    pub plan_item_definition_id: String,
    pub name: String,
    pub state: PlanItemState,
    pub is_stage: bool,
    pub tenant_id: String,
    pub child_ids: Vec<Uuid>,
    pub create_time: DateTime<Utc>,
    pub ended_time: Option<DateTime<Utc>>,
}

/// One fired lifecycle transition, appended to the case's history at commit.
///
/// `plan_item_instance_id` is `None` for case-level transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub case_instance_id: Uuid,
    pub plan_item_instance_id: Option<Uuid>,
    pub plan_item_definition_id: Option<String>,
    pub transition: Transition,
    pub to_state: String,
    pub fired_at: DateTime<Utc>,
}

/// The full working set of one case instance: the case record plus all of
/// its plan item instances in creation order. This is the unit the engine
/// loads at context open and commits back in one optimistic write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSnapshot {
    pub case: CaseInstance,
    pub plan_items: Vec<PlanItemInstance>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
