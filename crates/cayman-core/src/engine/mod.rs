//! The programmatic trigger API.
//!
//! Each entry point opens exactly one unit of work: load the case's
//! working set from the store, seed the agenda, drain to exhaustion, and
//! commit the snapshot in one optimistic write. A commit conflict means a
//! concurrent unit of work won the race; the caller re-issues the whole
//! trigger.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use cayman_store::records::{
    CaseInstance, CaseState, PlanItemInstance, Transition, TransitionEvent,
};
use cayman_store::{EntityStore, StoreError};

use crate::agenda::Operation;
use crate::context::{CaseWorkingSet, CommandContext};
use crate::error::EngineError;
use crate::model::ModelProvider;
use crate::operation;

/// Parameters for starting a case instance.
#[derive(Debug, Clone, Default)]
pub struct StartCaseRequest {
    pub case_definition_id: String,
    pub business_key: Option<String>,
    pub name: Option<String>,
    pub start_user_id: Option<String>,
    pub callback_id: Option<String>,
    pub callback_type: Option<String>,
    pub parent_case_instance_id: Option<Uuid>,
    /// Defaults to the definition's tenant when unset.
    pub tenant_id: Option<String>,
    pub variables: HashMap<String, serde_json::Value>,
}

impl StartCaseRequest {
    pub fn new(case_definition_id: impl Into<String>) -> Self {
        Self {
            case_definition_id: case_definition_id.into(),
            ..Self::default()
        }
    }
}

/// The case execution engine.
///
/// A library, not a service: it owns no threads and exposes no wire
/// protocol. Storage and model resolution are injected collaborators.
pub struct CaseEngine {
    store: Arc<dyn EntityStore>,
    models: Arc<dyn ModelProvider>,
}

impl CaseEngine {
    pub fn new(store: Arc<dyn EntityStore>, models: Arc<dyn ModelProvider>) -> Self {
        Self { store, models }
    }

    /// Instantiate a case definition and run its initial cascade.
    ///
    /// Returns the committed case instance record.
    pub async fn start_case(&self, request: StartCaseRequest) -> Result<CaseInstance, EngineError> {
        let definition = self
            .models
            .case_definition(&request.case_definition_id)
            .ok_or_else(|| {
                EngineError::UnknownCaseDefinition(request.case_definition_id.clone())
            })?;

        let case = CaseInstance {
            id: Uuid::new_v4(),
            parent_case_instance_id: request.parent_case_instance_id,
            business_key: request.business_key,
            name: request.name,
            case_definition_id: definition.id.clone(),
            state: CaseState::Active,
            start_time: Utc::now(),
            start_user_id: request.start_user_id,
            callback_id: request.callback_id,
            callback_type: request.callback_type,
            tenant_id: request
                .tenant_id
                .unwrap_or_else(|| definition.tenant_id.clone()),
            variables: request.variables,
        };
        let case_instance_id = case.id;

        tracing::info!(
            case_instance_id = %case_instance_id,
            case_definition_id = %definition.id,
            "starting case instance"
        );

        let mut ctx = CommandContext::new(Arc::clone(&definition), CaseWorkingSet::new(case));
        let root = operation::create_plan_item_instance(&mut ctx, &definition.plan_model, None)?;
        ctx.agenda.plan(Operation::InitStage { target: root });
        ctx.drain()?;

        let (snapshot, fired) = ctx.commit()?;
        let committed = snapshot.case.clone();
        self.store
            .commit_case(case_instance_id, 0, snapshot, fired)
            .await?;
        Ok(committed)
    }

    /// Apply a lifecycle transition to a plan item instance and run the
    /// resulting cascade.
    pub async fn trigger_plan_item(
        &self,
        plan_item_instance_id: Uuid,
        transition: Transition,
    ) -> Result<(), EngineError> {
        let item = self
            .store
            .get_plan_item_instance(plan_item_instance_id)
            .await?
            .ok_or(EngineError::PlanItemNotFound(plan_item_instance_id))?;

        tracing::info!(
            case_instance_id = %item.case_instance_id,
            plan_item_instance_id = %plan_item_instance_id,
            transition = %transition,
            "triggering plan item transition"
        );

        let op = Operation::from_trigger(plan_item_instance_id, transition)?;
        self.run_unit_of_work(item.case_instance_id, |ctx| {
            ctx.agenda.plan(op);
            Ok(())
        })
        .await
    }

    /// Complete a case whose root plan item has ended.
    pub async fn complete_case(&self, case_instance_id: Uuid) -> Result<(), EngineError> {
        tracing::info!(case_instance_id = %case_instance_id, "completing case instance");
        self.run_unit_of_work(case_instance_id, |ctx| {
            ctx.agenda.plan(Operation::CompleteCase { case_instance_id });
            Ok(())
        })
        .await
    }

    /// Terminate a case, exiting its live plan item tree depth-first.
    pub async fn terminate_case(&self, case_instance_id: Uuid) -> Result<(), EngineError> {
        tracing::info!(case_instance_id = %case_instance_id, "terminating case instance");
        self.run_unit_of_work(case_instance_id, |ctx| {
            ctx.agenda.plan(Operation::TerminateCase { case_instance_id });
            Ok(())
        })
        .await
    }

    /// Merge variables into the case and re-evaluate criteria: a variable
    /// write may newly satisfy a sentry.
    pub async fn set_variables(
        &self,
        case_instance_id: Uuid,
        variables: HashMap<String, serde_json::Value>,
    ) -> Result<(), EngineError> {
        tracing::info!(
            case_instance_id = %case_instance_id,
            count = variables.len(),
            "setting case variables"
        );
        self.run_unit_of_work(case_instance_id, move |ctx| {
            let case = ctx.working_set.case_mut();
            if case.state != CaseState::Active {
                return Err(EngineError::CaseNotActive {
                    case_instance_id,
                    state: case.state,
                });
            }
            case.variables.extend(variables);
            ctx.agenda.plan_evaluate_criteria(case_instance_id);
            Ok(())
        })
        .await
    }

    /// Open a unit of work for an existing case: load, seed, drain, commit.
    async fn run_unit_of_work(
        &self,
        case_instance_id: Uuid,
        seed: impl FnOnce(&mut CommandContext) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        let versioned = self
            .store
            .load_case(case_instance_id)
            .await
            .map_err(|e| match e {
                StoreError::CaseNotFound(id) => EngineError::CaseNotFound(id),
                other => EngineError::Store(other),
            })?;
        let definition_id = versioned.snapshot.case.case_definition_id.clone();
        let definition = self
            .models
            .case_definition(&definition_id)
            .ok_or(EngineError::UnknownCaseDefinition(definition_id))?;

        let mut ctx =
            CommandContext::new(definition, CaseWorkingSet::from_snapshot(versioned.snapshot));
        seed(&mut ctx)?;
        ctx.drain()?;

        let (snapshot, fired) = ctx.commit()?;
        self.store
            .commit_case(case_instance_id, versioned.version, snapshot, fired)
            .await?;
        Ok(())
    }

    // -- read side ----------------------------------------------------------

    pub async fn get_case_instance(
        &self,
        case_instance_id: Uuid,
    ) -> Result<Option<CaseInstance>, EngineError> {
        Ok(self.store.get_case_instance(case_instance_id).await?)
    }

    pub async fn get_plan_item_instance(
        &self,
        plan_item_instance_id: Uuid,
    ) -> Result<Option<PlanItemInstance>, EngineError> {
        Ok(self
            .store
            .get_plan_item_instance(plan_item_instance_id)
            .await?)
    }

    /// All plan item instances of a case, in creation order.
    pub async fn find_plan_item_instances(
        &self,
        case_instance_id: Uuid,
    ) -> Result<Vec<PlanItemInstance>, EngineError> {
        Ok(self.store.find_plan_item_instances(case_instance_id).await?)
    }

    /// The fired-transition history of a case, in commit order.
    pub async fn transition_history(
        &self,
        case_instance_id: Uuid,
    ) -> Result<Vec<TransitionEvent>, EngineError> {
        Ok(self.store.history(case_instance_id).await?)
    }
}
