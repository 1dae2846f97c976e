//! Immutable case model types.
//!
//! A [`CaseDefinition`] is an already-resolved tree of plan item
//! definitions; how it is authored or parsed is out of scope. The engine
//! only reads it. [`CaseDefinition::new`] validates the assembled tree;
//! construction helpers on [`PlanItemDefinition`] and [`Criterion`] keep
//! fixture and embedder code terse.

mod validate;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cayman_store::records::PlanItemState;

pub use validate::ModelError;

/// Kind of a plan item definition.
///
/// Tasks are completed by external trigger. Milestones occur automatically
/// in the drain that satisfies one of their entry criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemType {
    Stage,
    Task,
    Milestone,
}

/// One boolean condition inside a criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// A plan item of the given definition id is currently in `state`.
    ItemInState { item: String, state: PlanItemState },
    /// The named case variable equals `value`.
    VariableEquals {
        name: String,
        value: serde_json::Value,
    },
    /// The named case variable is set to any value.
    VariableSet { name: String },
}

/// An entry or exit sentry: satisfied when all of its conditions hold.
///
/// A criterion with no conditions is always satisfied; a plan item with an
/// empty criteria *list* has no sentry at all and waits for an external
/// trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub conditions: Vec<Condition>,
}

impl Criterion {
    pub fn new(id: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Self {
            id: id.into(),
            conditions,
        }
    }

    /// A criterion that is satisfied unconditionally.
    pub fn always(id: impl Into<String>) -> Self {
        Self::new(id, Vec::new())
    }

    /// Shorthand for a single item-in-state condition.
    pub fn on_item_state(
        id: impl Into<String>,
        item: impl Into<String>,
        state: PlanItemState,
    ) -> Self {
        Self::new(
            id,
            vec![Condition::ItemInState {
                item: item.into(),
                state,
            }],
        )
    }
}

/// A node of the case model tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItemDefinition {
    pub id: String,
    pub name: String,
    pub item_type: PlanItemType,
    /// When set, a satisfied entry criterion enables the item instead of
    /// starting it; activation then requires an explicit start trigger.
    pub manual_activation: bool,
    pub entry_criteria: Vec<Criterion>,
    pub exit_criteria: Vec<Criterion>,
    /// Populated only on stages.
    pub children: Vec<PlanItemDefinition>,
}

impl PlanItemDefinition {
    fn new(id: impl Into<String>, name: impl Into<String>, item_type: PlanItemType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            item_type,
            manual_activation: false,
            entry_criteria: Vec::new(),
            exit_criteria: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn stage(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, PlanItemType::Stage)
    }

    pub fn task(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, PlanItemType::Task)
    }

    pub fn milestone(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, PlanItemType::Milestone)
    }

    pub fn manual(mut self) -> Self {
        self.manual_activation = true;
        self
    }

    pub fn entry(mut self, criterion: Criterion) -> Self {
        self.entry_criteria.push(criterion);
        self
    }

    pub fn exit(mut self, criterion: Criterion) -> Self {
        self.exit_criteria.push(criterion);
        self
    }

    pub fn child(mut self, item: PlanItemDefinition) -> Self {
        self.children.push(item);
        self
    }

    /// Depth-first search for a definition by id, including this node.
    pub fn find(&self, definition_id: &str) -> Option<&PlanItemDefinition> {
        if self.id == definition_id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(definition_id))
    }
}

/// An immutable, validated case model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDefinition {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    /// The root of the tree; always a stage.
    pub plan_model: PlanItemDefinition,
}

impl CaseDefinition {
    /// Assemble and validate a case definition.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        plan_model: PlanItemDefinition,
    ) -> Result<Self, ModelError> {
        let definition = Self {
            id: id.into(),
            name: name.into(),
            tenant_id: String::new(),
            plan_model,
        };
        validate::validate(&definition)?;
        Ok(definition)
    }

    /// Look up a plan item definition anywhere in the tree.
    pub fn find_plan_item(&self, definition_id: &str) -> Option<&PlanItemDefinition> {
        self.plan_model.find(definition_id)
    }
}

/// Resolves case definition ids to immutable model trees.
///
/// Implementations are expected to cache; the engine looks a definition up
/// once per unit of work.
pub trait ModelProvider: Send + Sync {
    fn case_definition(&self, case_definition_id: &str) -> Option<Arc<CaseDefinition>>;
}

/// A fixed map of case definitions, for embedders and tests.
#[derive(Default)]
pub struct StaticModelProvider {
    definitions: HashMap<String, Arc<CaseDefinition>>,
}

impl StaticModelProvider {
    pub fn new(definitions: impl IntoIterator<Item = CaseDefinition>) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|d| (d.id.clone(), Arc::new(d)))
                .collect(),
        }
    }
}

impl ModelProvider for StaticModelProvider {
    fn case_definition(&self, case_definition_id: &str) -> Option<Arc<CaseDefinition>> {
        self.definitions.get(case_definition_id).cloned()
    }
}
