//! Workflow engine: the instance state machine.
//!
//! `WorkflowEngine` advances workflow instances from step to step. An
//! instance is `Running` until it reaches a step without outgoing
//! directions (or a workflow without steps) and becomes `Done`, or until a
//! failure is recorded and it becomes `Failed`. Both terminal states are
//! absorbing: iterating a terminated instance does nothing.
//!
//! One `iterate` call loops over passes. Each pass reloads the instance and
//! looks at its current task:
//! - no task: create a task for the first step, or finish if there are no steps
//! - open task: execute it again (automatic stages are re-run after a crash)
//! - closed task: take the first satisfied outgoing direction, or finish when
//!   the step has none
//!
//! A pass continues to the next one only when an automatic stage completed
//! and closed its task. Everything that reads the current task and writes
//! the next one runs under the instance's lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use stagegate_types::config::EngineConfig;
use stagegate_types::entity::{EntityStatus, WorkflowEntity};
use stagegate_types::error::RepositoryError;
use stagegate_types::workflow::{
    StageType, Step, Workflow, WorkflowInstance, WorkflowInstanceTask,
};
use thiserror::Error;
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::condition::ConditionEvaluator;
use super::context::{ContextError, WorkflowExecutionContext};
use super::definition::{DefinitionError, validate_definition};
use super::expression::{ScriptBindings, ScriptError, ScriptEvaluator};
use super::graph::DefinitionGraph;
use super::lock::{InstanceGuard, InstanceLocks, LockTimeout};
use super::outcome::{OutcomeRecorder, error_chain};
use super::stage::StageExecutor;
use crate::repository::entity::EntityRepository;
use crate::repository::workflow::{Changeset, WorkflowRepository};

/// Error recorded on an instance terminated by `reset_workflow`.
pub const RESET_REASON: &str = "workflow reset";

// ---------------------------------------------------------------------------
// Public result types
// ---------------------------------------------------------------------------

/// What `restart_workflow` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// The failed instance was reopened and iterated.
    Restarted,
    /// Nothing to restart: the instance has not terminated.
    StillRunning,
    /// Nothing to restart: the instance terminated without error.
    FinishedSuccessfully,
}

/// Summary of a `recover_running_instances` sweep.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Instances iterated without error.
    pub resumed: usize,
    /// Instances whose iteration returned an error, with its message.
    pub failed: Vec<(Uuid, String)>,
}

enum Pass {
    Continue,
    Halt,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Drives workflow instances against a store and a script evaluator.
///
/// Generic over the store `R` (both repository ports) and the evaluator `E`
/// so it runs unchanged on SQLite or on in-memory test doubles.
pub struct WorkflowEngine<R, E>
where
    R: WorkflowRepository + EntityRepository,
    E: ScriptEvaluator,
{
    repo: Arc<R>,
    conditions: ConditionEvaluator<E>,
    stages: StageExecutor<E>,
    outcomes: OutcomeRecorder<R>,
    clock: Arc<dyn Clock>,
    locks: InstanceLocks,
    config: EngineConfig,
}

impl<R, E> WorkflowEngine<R, E>
where
    R: WorkflowRepository + EntityRepository,
    E: ScriptEvaluator,
{
    pub fn new(repo: Arc<R>, evaluator: Arc<E>, config: EngineConfig) -> Self {
        let script_timeout = Duration::from_secs(config.script_timeout_secs);
        Self {
            conditions: ConditionEvaluator::new(evaluator.clone(), script_timeout),
            stages: StageExecutor::new(evaluator, script_timeout),
            outcomes: OutcomeRecorder::new(repo.clone()),
            repo,
            clock: Arc::new(SystemClock),
            locks: InstanceLocks::new(),
            config,
        }
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Start `workflow` for `entity` and iterate the new instance.
    ///
    /// Validation failures return before anything is written. When the first
    /// iteration fails the instance stays recorded as failed and the error
    /// carries its ID.
    pub async fn start_workflow(
        &self,
        entity: &WorkflowEntity,
        workflow: &Workflow,
    ) -> Result<Uuid, EngineError> {
        if entity.entity_type.trim().is_empty() {
            return Err(EngineError::EmptyArgument("entity type"));
        }
        if entity.id.trim().is_empty() {
            return Err(EngineError::EmptyArgument("entity id"));
        }
        if !workflow.active {
            return Err(EngineError::IncompatibleWorkflow {
                workflow: workflow.name.clone(),
                reason: "workflow is not active".to_string(),
            });
        }
        if workflow.entity_type != entity.entity_type {
            return Err(EngineError::IncompatibleWorkflow {
                workflow: workflow.name.clone(),
                reason: format!(
                    "workflow drives '{}' entities, got '{}'",
                    workflow.entity_type, entity.entity_type
                ),
            });
        }
        validate_definition(workflow)?;
        if self.repo.get_definition(&workflow.id).await?.is_none() {
            return Err(EngineError::WorkflowNotFound(workflow.id));
        }

        let instance = WorkflowInstance::new(
            workflow.id,
            &entity.entity_type,
            &entity.id,
            self.clock.now(),
        );
        let mut entity = entity.clone();
        entity.status = EntityStatus::InProgress;
        entity.step_name = None;
        self.repo
            .commit(&Changeset::new().instance(&instance).entity(&entity))
            .await?;

        tracing::info!(
            instance_id = %instance.id,
            workflow = %workflow.name,
            entity_type = %entity.entity_type,
            entity_id = %entity.id,
            "started workflow instance"
        );

        let _guard = self.lock(instance.id).await?;
        self.iterate_locked(instance.id).await?;
        Ok(instance.id)
    }

    /// Advance an instance as far as it can go without outside input.
    pub async fn iterate(&self, instance_id: Uuid) -> Result<(), EngineError> {
        let _guard = self.lock(instance_id).await?;
        self.iterate_locked(instance_id).await
    }

    /// Close an open task, merge `params` into the execution context and
    /// iterate the instance.
    pub async fn finish_task(
        &self,
        task_id: Uuid,
        params: Option<BTreeMap<String, String>>,
    ) -> Result<(), EngineError> {
        let task = self.load_task(task_id).await?;
        let _guard = self.lock(task.instance_id).await?;

        // Re-read under the lock: a concurrent call may have closed it.
        let mut task = self.load_task(task_id).await?;
        if !task.is_open() {
            return Err(EngineError::TaskAlreadyFinished {
                task_id,
                instance_id: task.instance_id,
            });
        }

        let mut instance = self.load_instance(task.instance_id).await?;
        let mut context = self.load_context(&instance)?;
        if let Some(params) = params {
            context.merge(params);
        }
        task.ended_at = Some(self.clock.now());
        instance.context = context.to_blob()?;
        self.repo
            .commit(&Changeset::new().instance(&instance).task(&task))
            .await?;

        tracing::info!(
            instance_id = %instance.id,
            task_id = %task.id,
            step_id = %task.step_id,
            "finished task"
        );

        self.iterate_locked(instance.id).await
    }

    /// Reopen a failed instance and iterate it again.
    ///
    /// Instances that are still running or finished successfully are left
    /// untouched; a warning is logged and the outcome says why.
    pub async fn restart_workflow(&self, instance_id: Uuid) -> Result<RestartOutcome, EngineError> {
        let _guard = self.lock(instance_id).await?;
        let mut instance = self.load_instance(instance_id).await?;

        if !instance.is_terminated() {
            tracing::warn!(instance_id = %instance_id, "restart ignored: instance is still running");
            return Ok(RestartOutcome::StillRunning);
        }
        if !instance.has_error() {
            tracing::warn!(instance_id = %instance_id, "restart ignored: instance finished successfully");
            return Ok(RestartOutcome::FinishedSuccessfully);
        }

        let previous_error = instance.error.take();
        let reopen_task = instance.error_in_task;
        instance.ended_at = None;
        instance.error_in_task = false;

        let mut changes = Changeset::new();
        if let Some(mut entity) = self
            .repo
            .get_entity(&instance.entity_type, &instance.entity_id)
            .await?
        {
            entity.status = EntityStatus::InProgress;
            changes = changes.entity(&entity);
        }
        if reopen_task {
            if let Some(task_id) = instance.current_task_id {
                let mut task = self.load_task(task_id).await?;
                task.ended_at = None;
                changes = changes.task(&task);
            }
        }
        changes = changes.instance(&instance);
        self.repo.commit(&changes).await?;

        tracing::info!(
            instance_id = %instance_id,
            reopened_task = reopen_task,
            previous_error = previous_error.as_deref().unwrap_or_default(),
            "restarted workflow instance"
        );

        self.iterate_locked(instance_id).await?;
        Ok(RestartOutcome::Restarted)
    }

    /// Terminate an instance (if still running) and start `workflow` afresh
    /// for the same entity. Returns the new instance ID.
    pub async fn reset_workflow(
        &self,
        instance_id: Uuid,
        workflow: &Workflow,
    ) -> Result<Uuid, EngineError> {
        let entity = {
            let _guard = self.lock(instance_id).await?;
            let mut instance = self.load_instance(instance_id).await?;
            let mut entity = self
                .repo
                .get_entity(&instance.entity_type, &instance.entity_id)
                .await?
                .ok_or_else(|| EngineError::EntityNotFound {
                    instance_id,
                    entity_type: instance.entity_type.clone(),
                    entity_id: instance.entity_id.clone(),
                })?;

            if !instance.is_terminated() {
                self.outcomes
                    .mark_failed(&mut instance, None, Some(&mut entity), RESET_REASON, self.clock.now())
                    .await?;
                tracing::info!(instance_id = %instance_id, "reset workflow instance");
            }
            entity
        };

        self.start_workflow(&entity, workflow).await
    }

    /// Iterate every running instance once.
    ///
    /// Intended for a poller or a process restart. Errors are collected per
    /// instance instead of aborting the sweep.
    pub async fn recover_running_instances(&self) -> Result<RecoveryReport, EngineError> {
        let running = self.repo.list_running_instances().await?;
        let mut report = RecoveryReport::default();

        for instance in running {
            match self.iterate(instance.id).await {
                Ok(()) => report.resumed += 1,
                Err(e) => {
                    tracing::warn!(instance_id = %instance.id, error = %e, "recovery iteration failed");
                    report.failed.push((instance.id, e.to_string()));
                }
            }
        }

        tracing::info!(
            resumed = report.resumed,
            failed = report.failed.len(),
            "recovered running instances"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Execution context
    // -----------------------------------------------------------------------

    pub async fn get_execution_context(
        &self,
        instance_id: Uuid,
    ) -> Result<WorkflowExecutionContext, EngineError> {
        let instance = self.load_instance(instance_id).await?;
        Ok(self.load_context(&instance)?)
    }

    /// Replace the whole execution context of an instance.
    pub async fn set_execution_context(
        &self,
        instance_id: Uuid,
        context: &WorkflowExecutionContext,
    ) -> Result<(), EngineError> {
        let _guard = self.lock(instance_id).await?;
        let mut instance = self.load_instance(instance_id).await?;
        self.save_context(&mut instance, context).await
    }

    pub async fn get_parameter(
        &self,
        instance_id: Uuid,
        key: &str,
    ) -> Result<Option<String>, EngineError> {
        let context = self.get_execution_context(instance_id).await?;
        Ok(context.get(key).map(str::to_string))
    }

    /// Set one parameter; `None` removes it.
    pub async fn set_parameter(
        &self,
        instance_id: Uuid,
        key: &str,
        value: Option<String>,
    ) -> Result<(), EngineError> {
        let _guard = self.lock(instance_id).await?;
        let mut instance = self.load_instance(instance_id).await?;
        let mut context = self.load_context(&instance)?;
        context.put(key, value);
        self.save_context(&mut instance, &context).await
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// The single active workflow for the entity's type.
    pub async fn determine_workflow(&self, entity: &WorkflowEntity) -> Result<Workflow, EngineError> {
        let mut active: Vec<Workflow> = self
            .repo
            .list_definitions(Some(&entity.entity_type))
            .await?
            .into_iter()
            .filter(|w| w.active)
            .collect();

        match active.len() {
            0 => Err(EngineError::NoActiveWorkflow(entity.entity_type.clone())),
            1 => Ok(active.remove(0)),
            count => Err(EngineError::AmbiguousWorkflow {
                entity_type: entity.entity_type.clone(),
                count,
            }),
        }
    }

    /// The most recent running instance bound to `entity`.
    pub async fn load_active_instance(
        &self,
        entity: &WorkflowEntity,
    ) -> Result<Option<WorkflowInstance>, EngineError> {
        Ok(self
            .repo
            .list_instances_for_entity(&entity.entity_type, &entity.id)
            .await?
            .into_iter()
            .find(|i| !i.is_terminated()))
    }

    /// The open current task of the entity's running instance, if its step's
    /// stage is named `stage_name`.
    pub async fn load_last_processing_task(
        &self,
        entity: &WorkflowEntity,
        stage_name: &str,
    ) -> Result<Option<WorkflowInstanceTask>, EngineError> {
        let Some(instance) = self.load_active_instance(entity).await? else {
            return Ok(None);
        };
        let Some(task_id) = instance.current_task_id else {
            return Ok(None);
        };
        let task = self.load_task(task_id).await?;
        if !task.is_open() {
            return Ok(None);
        }

        let graph = self.load_graph(&instance).await?;
        let matches = graph
            .step(&task.step_id)
            .is_some_and(|step| step.stage.name == stage_name);
        Ok(matches.then_some(task))
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    async fn iterate_locked(&self, instance_id: Uuid) -> Result<(), EngineError> {
        let instance = self.load_instance(instance_id).await?;
        if instance.is_terminated() {
            tracing::debug!(instance_id = %instance_id, "instance already terminated");
            return Ok(());
        }
        let graph = self.load_graph(&instance).await?;

        let limit = self.config.max_transitions_per_pass;
        let mut transitions: u32 = 0;
        loop {
            match self.advance(&graph, instance_id).await? {
                Pass::Halt => return Ok(()),
                Pass::Continue => {
                    transitions += 1;
                    if transitions > limit {
                        let err = EngineError::TransitionLimitExceeded { instance_id, limit };
                        return Err(self.fail_current(instance_id, err).await);
                    }
                    tracing::debug!(instance_id = %instance_id, transitions, "continuing iteration");
                }
            }
        }
    }

    async fn advance(&self, graph: &DefinitionGraph, instance_id: Uuid) -> Result<Pass, EngineError> {
        let mut instance = self.load_instance(instance_id).await?;
        if instance.is_terminated() {
            return Ok(Pass::Halt);
        }

        let Some(mut entity) = self
            .repo
            .get_entity(&instance.entity_type, &instance.entity_id)
            .await?
        else {
            let err = EngineError::EntityNotFound {
                instance_id,
                entity_type: instance.entity_type.clone(),
                entity_id: instance.entity_id.clone(),
            };
            tracing::warn!(instance_id = %instance_id, "bound entity not found");
            return Err(self.record_failure(&mut instance, None, None, err).await);
        };

        let current = match instance.current_task_id {
            Some(task_id) => Some(self.load_task(task_id).await?),
            None => None,
        };

        match current {
            None => match graph.first_step() {
                None => {
                    tracing::debug!(instance_id = %instance_id, "workflow has no steps");
                    self.outcomes
                        .mark_done(&mut instance, Some(&mut entity), self.clock.now())
                        .await?;
                    Ok(Pass::Halt)
                }
                Some(step) => self.create_and_execute(&mut instance, &mut entity, step).await,
            },
            Some(mut task) if task.is_open() => {
                let Some(step) = graph.step(&task.step_id) else {
                    let err = EngineError::UnknownStep {
                        instance_id,
                        step_id: task.step_id.clone(),
                    };
                    return Err(self
                        .record_failure(&mut instance, Some(&mut task), Some(&mut entity), err)
                        .await);
                };
                tracing::debug!(
                    instance_id = %instance_id,
                    task_id = %task.id,
                    step_id = %step.id,
                    "executing open task"
                );
                self.execute_task(&mut instance, &mut entity, &mut task, step).await
            }
            Some(mut task) => {
                self.follow_directions(graph, &mut instance, &mut entity, &mut task)
                    .await
            }
        }
    }

    /// Pick the next step after a closed task. First satisfied direction wins.
    async fn follow_directions(
        &self,
        graph: &DefinitionGraph,
        instance: &mut WorkflowInstance,
        entity: &mut WorkflowEntity,
        task: &mut WorkflowInstanceTask,
    ) -> Result<Pass, EngineError> {
        let directions = graph.directions(&task.step_id);
        if directions.is_empty() {
            self.outcomes
                .mark_done(instance, Some(entity), self.clock.now())
                .await?;
            return Ok(Pass::Halt);
        }

        // One context snapshot shared by every direction of this pass.
        let context = self.load_context(instance)?;
        let bindings =
            ScriptBindings::new(entity, &context, instance).map_err(EngineError::Bindings)?;

        for direction in directions {
            match self
                .conditions
                .is_satisfied(direction, &bindings, self.repo.as_ref(), entity)
                .await
            {
                Ok(true) => {
                    tracing::debug!(
                        instance_id = %instance.id,
                        from = %task.step_id,
                        to = %direction.to,
                        "taking direction"
                    );
                    let Some(target) = graph.step(&direction.to) else {
                        let err = EngineError::UnknownStep {
                            instance_id: instance.id,
                            step_id: direction.to.clone(),
                        };
                        return Err(self.record_failure(instance, None, Some(entity), err).await);
                    };
                    return self.create_and_execute(instance, entity, target).await;
                }
                Ok(false) => {
                    tracing::debug!(
                        instance_id = %instance.id,
                        from = %task.step_id,
                        to = %direction.to,
                        "direction not satisfied"
                    );
                }
                Err(e) => {
                    let err = EngineError::ConditionEvaluationFailed {
                        instance_id: instance.id,
                        from: task.step_id.clone(),
                        to: direction.to.clone(),
                        message: error_chain(&e),
                    };
                    tracing::error!(instance_id = %instance.id, error = %err, "condition evaluation failed");
                    return Err(self.record_failure(instance, Some(task), Some(entity), err).await);
                }
            }
        }

        let stage = graph
            .step(&task.step_id)
            .map(|step| step.stage.name.clone())
            .unwrap_or_default();
        let err = EngineError::NoSuitableDirection {
            instance_id: instance.id,
            step_id: task.step_id.clone(),
            stage,
            task_id: task.id,
        };
        tracing::error!(instance_id = %instance.id, error = %err, "no suitable direction");
        // Not attributed to the task: a restart re-evaluates the directions.
        Err(self.record_failure(instance, None, Some(entity), err).await)
    }

    async fn create_and_execute(
        &self,
        instance: &mut WorkflowInstance,
        entity: &mut WorkflowEntity,
        step: &Step,
    ) -> Result<Pass, EngineError> {
        let mut task = WorkflowInstanceTask::new(instance.id, &step.id, self.clock.now());
        instance.current_task_id = Some(task.id);
        entity.status = EntityStatus::InProgress;
        entity.step_name = Some(step.stage.name.clone());
        self.repo
            .commit(&Changeset::new().instance(instance).task(&task).entity(entity))
            .await?;

        tracing::info!(
            instance_id = %instance.id,
            task_id = %task.id,
            step_id = %step.id,
            stage = %step.stage.name,
            "created task"
        );

        self.execute_task(instance, entity, &mut task, step).await
    }

    async fn execute_task(
        &self,
        instance: &mut WorkflowInstance,
        entity: &mut WorkflowEntity,
        task: &mut WorkflowInstanceTask,
        step: &Step,
    ) -> Result<Pass, EngineError> {
        if step.stage.stage_type != StageType::AutomaticExecution {
            tracing::debug!(
                instance_id = %instance.id,
                task_id = %task.id,
                stage = %step.stage.name,
                "waiting for external completion"
            );
            return Ok(Pass::Halt);
        }

        let mut context = self.load_context(instance)?;
        let bindings = ScriptBindings::new(entity, &context, instance)
            .and_then(|b| b.with_task(task))
            .map_err(EngineError::Bindings)?;

        let outcome = match self.stages.execute(&step.stage, &bindings).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = EngineError::StageExecutionFailed {
                    instance_id: instance.id,
                    stage: step.stage.name.clone(),
                    task_id: task.id,
                    message: error_chain(&e),
                };
                tracing::error!(instance_id = %instance.id, error = %err, "stage execution failed");
                return Err(self.record_failure(instance, Some(task), Some(entity), err).await);
            }
        };

        if !outcome.done {
            tracing::debug!(
                instance_id = %instance.id,
                task_id = %task.id,
                stage = %step.stage.name,
                "stage not finished, task stays open"
            );
            return Ok(Pass::Halt);
        }

        task.ended_at = Some(self.clock.now());
        let mut changes = Changeset::new().task(task);
        if outcome.apply_to(&mut context) {
            instance.context = context.to_blob()?;
            changes = changes.instance(instance);
        }
        self.repo.commit(&changes).await?;

        tracing::debug!(
            instance_id = %instance.id,
            task_id = %task.id,
            stage = %step.stage.name,
            "automatic stage finished"
        );
        Ok(Pass::Continue)
    }

    // -----------------------------------------------------------------------
    // Failure recording
    // -----------------------------------------------------------------------

    /// Record `err` on the instance, then hand it back for propagation.
    async fn record_failure(
        &self,
        instance: &mut WorkflowInstance,
        task: Option<&mut WorkflowInstanceTask>,
        entity: Option<&mut WorkflowEntity>,
        err: EngineError,
    ) -> EngineError {
        let message = error_chain(&err);
        if let Err(record_err) = self
            .outcomes
            .mark_failed(instance, task, entity, &message, self.clock.now())
            .await
        {
            tracing::error!(
                instance_id = %instance.id,
                error = %record_err,
                "could not record workflow failure"
            );
        }
        err
    }

    /// Like `record_failure`, reloading the instance, its current task and
    /// its entity first.
    async fn fail_current(&self, instance_id: Uuid, err: EngineError) -> EngineError {
        let loaded = async {
            let instance = self.load_instance(instance_id).await?;
            let task = match instance.current_task_id {
                Some(task_id) => self.repo.get_task(&task_id).await?,
                None => None,
            };
            let entity = self
                .repo
                .get_entity(&instance.entity_type, &instance.entity_id)
                .await?;
            Ok::<_, EngineError>((instance, task, entity))
        }
        .await;

        match loaded {
            Ok((mut instance, mut task, mut entity)) => {
                self.record_failure(&mut instance, task.as_mut(), entity.as_mut(), err)
                    .await
            }
            Err(load_err) => {
                tracing::error!(
                    instance_id = %instance_id,
                    error = %load_err,
                    "could not load instance to record failure"
                );
                err
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn lock(&self, instance_id: Uuid) -> Result<InstanceGuard, EngineError> {
        let limit = Duration::from_secs(self.config.lock_timeout_secs);
        Ok(self.locks.acquire(instance_id, limit).await?)
    }

    async fn load_instance(&self, instance_id: Uuid) -> Result<WorkflowInstance, EngineError> {
        self.repo
            .get_instance(&instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))
    }

    async fn load_task(&self, task_id: Uuid) -> Result<WorkflowInstanceTask, EngineError> {
        self.repo
            .get_task(&task_id)
            .await?
            .ok_or(EngineError::TaskNotFound(task_id))
    }

    async fn load_graph(&self, instance: &WorkflowInstance) -> Result<DefinitionGraph, EngineError> {
        let workflow = self
            .repo
            .get_definition(&instance.workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(instance.workflow_id))?;
        Ok(DefinitionGraph::new(workflow))
    }

    fn load_context(&self, instance: &WorkflowInstance) -> Result<WorkflowExecutionContext, ContextError> {
        WorkflowExecutionContext::from_blob(instance.context.as_deref())
    }

    async fn save_context(
        &self,
        instance: &mut WorkflowInstance,
        context: &WorkflowExecutionContext,
    ) -> Result<(), EngineError> {
        instance.context = context.to_blob()?;
        self.repo.commit(&Changeset::new().instance(instance)).await?;
        tracing::debug!(instance_id = %instance.id, params = context.len(), "saved execution context");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors returned by engine operations.
///
/// Mid-flight variants (`EntityNotFound`, `UnknownStep`,
/// `NoSuitableDirection`, `ConditionEvaluationFailed`,
/// `StageExecutionFailed`, `TransitionLimitExceeded`) are recorded on the
/// instance before they are returned.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("required argument is empty: {0}")]
    EmptyArgument(&'static str),

    #[error("workflow '{workflow}' cannot be started: {reason}")]
    IncompatibleWorkflow { workflow: String, reason: String },

    #[error("no active workflow for entity type '{0}'")]
    NoActiveWorkflow(String),

    #[error("{count} active workflows for entity type '{entity_type}'")]
    AmbiguousWorkflow { entity_type: String, count: usize },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("entity {entity_type}/{entity_id} bound to instance {instance_id} not found")]
    EntityNotFound {
        instance_id: Uuid,
        entity_type: String,
        entity_id: String,
    },

    #[error("step '{step_id}' used by instance {instance_id} is not defined")]
    UnknownStep { instance_id: Uuid, step_id: String },

    #[error(
        "no suitable direction from step '{step_id}' (stage '{stage}', task {task_id}) of instance {instance_id}"
    )]
    NoSuitableDirection {
        instance_id: Uuid,
        step_id: String,
        stage: String,
        task_id: Uuid,
    },

    #[error("condition of direction '{from}' -> '{to}' failed for instance {instance_id}: {message}")]
    ConditionEvaluationFailed {
        instance_id: Uuid,
        from: String,
        to: String,
        message: String,
    },

    #[error("stage '{stage}' failed in task {task_id} of instance {instance_id}: {message}")]
    StageExecutionFailed {
        instance_id: Uuid,
        stage: String,
        task_id: Uuid,
        message: String,
    },

    #[error("task {task_id} of instance {instance_id} is already finished")]
    TaskAlreadyFinished { task_id: Uuid, instance_id: Uuid },

    #[error("instance {instance_id} exceeded {limit} transitions in one iteration")]
    TransitionLimitExceeded { instance_id: Uuid, limit: u32 },

    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),

    #[error("cannot build script bindings: {0}")]
    Bindings(ScriptError),

    #[error("invalid workflow definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("execution context error: {0}")]
    Context(#[from] ContextError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    /// The instance this error concerns, when there is one.
    pub fn instance_id(&self) -> Option<Uuid> {
        match self {
            EngineError::InstanceNotFound(id) => Some(*id),
            EngineError::EntityNotFound { instance_id, .. }
            | EngineError::UnknownStep { instance_id, .. }
            | EngineError::NoSuitableDirection { instance_id, .. }
            | EngineError::ConditionEvaluationFailed { instance_id, .. }
            | EngineError::StageExecutionFailed { instance_id, .. }
            | EngineError::TaskAlreadyFinished { instance_id, .. }
            | EngineError::TransitionLimitExceeded { instance_id, .. } => Some(*instance_id),
            EngineError::LockTimeout(timeout) => Some(timeout.instance_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
