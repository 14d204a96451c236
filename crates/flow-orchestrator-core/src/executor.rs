// Copyright (c) 2025 Flow Orchestrator
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The tree-walking step scheduler: sequence, parallel, conditional,
//! switch, loop, and exit, plus retry/on_error policy and the top-level
//! `execute_flow` contract.
//!
//! Dispatch is a recursive walk over an explicit nested step tree rather
//! than a DAG built from declared dependencies: sequence is just "the next
//! sibling," so there is no dependency graph to build and no implicit
//! wait for upstream steps — a `parallel` block is the only place
//! concurrency happens, and it fans out over its literal children. See
//! DESIGN.md for why no graph crate is pulled in for this.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::connections::ConnectionManager;
use crate::context::{CancellationToken, FlowContext};
use crate::definition::{
    ConditionalStep, ExitStep, FlowDefinition, LoopStep, RetryConfig, Step, SwitchStep, TaskStep,
};
use crate::error::{ErrorInfo, OrchestratorError, Result};
use crate::registry::TaskRegistry;
use crate::resolver::{evaluate_condition, evaluate_expr, resolve_value};
use crate::retry::{run_with_retry, RetryPolicy};
use crate::value::expr_eq;

/// One loop-variable binding, innermost last. Threaded explicitly through
/// step dispatch rather than stored on `FlowContext` — see `context.rs`.
type Scope = Vec<(String, Value)>;

/// Outcome of `execute_flow`: `{success, outputs, error?}`, plus
/// wall-clock start/completion timestamps — an ambient observability
/// field every caller of a long-running flow wants, stamped the same way
/// other emitted events are with `chrono::Utc::now()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FlowResult {
    pub success: bool,
    pub outputs: serde_json::Map<String, Value>,
    pub error: Option<ErrorInfo>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

/// The flow interpreter. Stateless across runs — holds only the task
/// registry, which is expected to be long-lived and shared across many
/// `execute_flow` calls.
pub struct Executor {
    registry: Arc<TaskRegistry>,
    max_concurrency: usize,
}

impl Executor {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self {
            registry,
            max_concurrency: 0,
        }
    }

    /// Bounds how many children of a single `parallel` block are dispatched
    /// concurrently; `0` (the default) is unlimited. There is no implicit
    /// DAG-level parallelism to throttle — only the explicit children of a
    /// `parallel` block ever run concurrently, so that's the unit this
    /// bounds.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Runs `definition` to completion against `inputs`: validate inputs,
    /// build the initial context, walk the step tree, collect declared
    /// outputs. There is no way to cancel a run started this way
    /// from outside it — use [`Executor::execute_flow_with_cancellation`]
    /// when the caller needs a handle to request early termination.
    pub async fn execute_flow(
        &self,
        definition: &FlowDefinition,
        inputs: HashMap<String, Value>,
        connections: Arc<dyn ConnectionManager>,
    ) -> FlowResult {
        self.execute_flow_with_cancellation(definition, inputs, connections, CancellationToken::new())
            .await
    }

    /// Same contract as [`Executor::execute_flow`], but seeded with a
    /// [`CancellationToken`] minted by the caller beforehand. Any holder
    /// of a clone of `cancellation` may call `.cancel()` from
    /// another task while this future is still being polled; the executor
    /// checks it before each step dispatch, before each loop iteration,
    /// and between retry attempts, surfacing a `Cancelled` error on the
    /// result instead of running further steps.
    pub async fn execute_flow_with_cancellation(
        &self,
        definition: &FlowDefinition,
        inputs: HashMap<String, Value>,
        connections: Arc<dyn ConnectionManager>,
        cancellation: CancellationToken,
    ) -> FlowResult {
        let run_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("flow_run", flow = %definition.name, run_id = %run_id);
        let _entered = span.enter();

        let started_at = chrono::Utc::now();
        info!("starting flow execution");

        let validated_inputs = match validate_inputs(definition, inputs) {
            Ok(v) => v,
            Err(err) => return failure(err, started_at),
        };

        if let Err(err) = await_connection_readiness(definition, connections.as_ref()) {
            return failure(err, started_at);
        }

        let ctx = FlowContext::with_cancellation(validated_inputs, connections, cancellation);

        match self.execute_sequence(&definition.steps, &ctx, &Scope::new()).await {
            Ok(()) => {}
            Err(err) if matches!(err, OrchestratorError::ExitRequested) => {
                info!("flow terminated early via exit step");
            }
            Err(err @ OrchestratorError::Cancelled) => {
                warn!("flow run cancelled");
                return failure(err, started_at);
            }
            Err(err) => {
                error!(error = %err, "flow execution failed");
                return failure(err, started_at);
            }
        }

        match collect_outputs(definition, &ctx) {
            Ok(outputs) => {
                info!("flow execution completed successfully");
                FlowResult {
                    success: true,
                    outputs,
                    error: None,
                    started_at,
                    completed_at: chrono::Utc::now(),
                }
            }
            Err(err) => failure(err, started_at),
        }
    }

    /// Walks a sequence of sibling steps in order. A `Cancelled`/`ExitRequested`
    /// signal unwinds this sequence (and, by `?`-propagation, every
    /// enclosing one up to the top) without running the remaining siblings.
    async fn execute_sequence(&self, steps: &[Step], ctx: &FlowContext, scope: &Scope) -> Result<()> {
        for step in steps {
            if ctx.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            self.execute_step(step, ctx, scope).await?;
        }
        Ok(())
    }

    async fn execute_step(&self, step: &Step, ctx: &FlowContext, scope: &Scope) -> Result<()> {
        match step {
            Step::Task(t) => self.execute_task(t, ctx, scope).await,
            Step::Parallel(children) => self.execute_parallel(children, ctx, scope).await,
            Step::Conditional(c) => self.execute_conditional(c, ctx, scope).await,
            Step::Switch(s) => self.execute_switch(s, ctx, scope).await,
            Step::Loop(l) => self.execute_loop(l, ctx, scope).await,
            Step::Exit(e) => execute_exit(e, ctx, scope),
        }
    }

    async fn execute_task(&self, step: &TaskStep, ctx: &FlowContext, scope: &Scope) -> Result<()> {
        debug!(task = %step.task, id = ?step.id, "dispatching task step");

        let resolved_inputs = resolve_value(&step.inputs, ctx, scope)?;
        let connection = match &step.connection {
            Some(name) => Some(ctx.connections().get(name)?),
            None => None,
        };

        let prepared = self
            .registry
            .prepare(&step.task, &resolved_inputs, connection.is_some())?;

        let policy = retry_policy_from(&step.retry);
        let outcome = run_with_retry(policy, || ctx.is_cancelled(), || {
            let prepared = &prepared;
            let connection = connection.clone();
            async move { prepared.invoke(connection).await }
        })
        .await;

        match outcome {
            Ok(value) => {
                if let Some(id) = &step.id {
                    ctx.set_output(id, value);
                }
                Ok(())
            }
            Err(err) if err.is_unwind_signal() => Err(err),
            Err(err) => {
                if let Some(on_error) = &step.on_error {
                    warn!(task = %step.task, error = %err, "task failed after retry exhaustion, running on_error");
                    ctx.set_last_error(err.to_info());
                    self.execute_sequence(on_error, ctx, scope).await?;
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Launches all children concurrently. Sibling ids are guaranteed
    /// unique by load-time validation, so concurrent `set_output` writes
    /// never alias. As soon as the first child resolves to an error (a
    /// handler failure or a nested `exit`), the shared cancellation flag is
    /// flipped immediately — before the rest of the children have finished
    /// running — so any still-running sibling observes it at its own next
    /// suspension point (before its next step dispatch, loop iteration, or
    /// retry attempt, per §5) and unwinds early instead of running to
    /// completion. There is no `JoinHandle::abort` here (no spawned task to
    /// abort), so this is the only way "still-running children are
    /// cancelled cooperatively" can actually happen: `join_all` cannot
    /// signal anything until every child is already done, so fan-out uses
    /// `FuturesUnordered` and reacts to each completion as it arrives
    /// instead. Every child is still polled to completion and its result
    /// discarded past the first error; only the first error is returned.
    /// When `max_concurrency` is set, a shared semaphore bounds how many
    /// children are polled past their first await point at once; children
    /// beyond the limit queue for a permit before dispatching.
    async fn execute_parallel(&self, children: &[Step], ctx: &FlowContext, scope: &Scope) -> Result<()> {
        use futures::stream::{FuturesUnordered, StreamExt};

        let semaphore = (self.max_concurrency > 0)
            .then(|| Arc::new(tokio::sync::Semaphore::new(self.max_concurrency)));

        let mut futures: FuturesUnordered<_> = children
            .iter()
            .map(|child| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = match &semaphore {
                        Some(sem) => Some(sem.acquire().await.expect("semaphore never closed")),
                        None => None,
                    };
                    self.execute_step(child, ctx, scope).await
                }
            })
            .collect();

        let mut first_error: Option<OrchestratorError> = None;
        while let Some(result) = futures.next().await {
            if let Err(err) = result {
                if first_error.is_none() {
                    ctx.cancel();
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn execute_conditional(&self, step: &ConditionalStep, ctx: &FlowContext, scope: &Scope) -> Result<()> {
        if evaluate_condition(&step.if_expr, ctx, scope)? {
            self.execute_sequence(&step.then_steps, ctx, scope).await
        } else if let Some(else_steps) = &step.else_steps {
            self.execute_sequence(else_steps, ctx, scope).await
        } else {
            Ok(())
        }
    }

    async fn execute_switch(&self, step: &SwitchStep, ctx: &FlowContext, scope: &Scope) -> Result<()> {
        let switch_value = evaluate_expr(&step.switch_expr, ctx, scope)?;
        for case in &step.cases {
            if expr_eq(&switch_value, &case.case) {
                return self.execute_sequence(&case.do_steps, ctx, scope).await;
            }
        }
        if let Some(default_steps) = &step.default_steps {
            self.execute_sequence(default_steps, ctx, scope).await
        } else {
            Ok(())
        }
    }

    /// Iterations run sequentially; within one iteration, nested `parallel`
    /// may still fan out. A failing iteration (after its own retry/on_error
    /// budget) fails the loop fast — later iterations do not run.
    async fn execute_loop(&self, step: &LoopStep, ctx: &FlowContext, scope: &Scope) -> Result<()> {
        let sequence = evaluate_expr(&step.for_each_expr, ctx, scope)?;
        let items = match sequence {
            Value::Array(items) => items,
            other => {
                return Err(OrchestratorError::Definition(format!(
                    "for_each must resolve to a sequence, got {}",
                    other
                )))
            }
        };

        for item in items {
            if ctx.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            let mut child_scope = scope.clone();
            child_scope.push((step.loop_var.clone(), item));
            self.execute_sequence(&step.do_steps, ctx, &child_scope).await?;
        }
        Ok(())
    }
}

fn execute_exit(step: &ExitStep, ctx: &FlowContext, scope: &Scope) -> Result<()> {
    let should_exit = match &step.when_expr {
        Some(expr) => evaluate_condition(expr, ctx, scope)?,
        None => true,
    };
    if should_exit {
        Err(OrchestratorError::ExitRequested)
    } else {
        Ok(())
    }
}

fn retry_policy_from(retry: &RetryConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: retry.max_attempts.max(1),
        backoff_secs: retry.backoff,
    }
}

fn failure(err: OrchestratorError, started_at: chrono::DateTime<chrono::Utc>) -> FlowResult {
    FlowResult {
        success: false,
        outputs: serde_json::Map::new(),
        error: Some(err.to_info()),
        started_at,
        completed_at: chrono::Utc::now(),
    }
}

/// Validates `inputs` against `definition.inputs` before any step runs:
/// missing required inputs without a default fail the run; inputs not
/// declared by the flow are accepted and passed through untouched.
fn validate_inputs(
    definition: &FlowDefinition,
    inputs: HashMap<String, Value>,
) -> Result<HashMap<String, Value>> {
    let mut validated = inputs;
    for decl in &definition.inputs {
        if validated.contains_key(&decl.name) {
            continue;
        }
        if let Some(default) = &decl.default {
            validated.insert(decl.name.clone(), default.clone());
        } else if decl.required {
            return Err(OrchestratorError::Input(format!(
                "missing required input `{}`",
                decl.name
            )));
        }
    }
    Ok(validated)
}

/// Step 2 of the top-level contract: every connection named in
/// `definition.connections` must already be resolvable through the
/// supplied `ConnectionManager` before any step runs. The core never
/// constructs connections itself (see `connections.rs`), so "await
/// readiness" here means failing fast on a declared-but-missing
/// connection instead of deferring the error to whichever step first
/// references it.
fn await_connection_readiness(
    definition: &FlowDefinition,
    connections: &dyn ConnectionManager,
) -> Result<()> {
    for name in definition.connections.keys() {
        connections.get(name).map_err(|_| {
            OrchestratorError::Definition(format!(
                "flow declares connection `{}` but it is not registered in the supplied connection manager",
                name
            ))
        })?;
    }
    Ok(())
}

/// Resolves every declared flow output against the final context. A
/// `NullReference` on any output fails the whole run rather than
/// silently producing a null — there's no `default` suppression field.
fn collect_outputs(definition: &FlowDefinition, ctx: &FlowContext) -> Result<serde_json::Map<String, Value>> {
    let mut outputs = serde_json::Map::with_capacity(definition.outputs.len());
    for decl in &definition.outputs {
        let value = resolve_value(&decl.value, ctx, &Scope::new())?;
        outputs.insert(decl.name.clone(), value);
    }
    Ok(outputs)
}
