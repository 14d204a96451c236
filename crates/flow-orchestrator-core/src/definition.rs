// Copyright (c) 2025 Flow Orchestrator
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The parsed flow-definition document: inputs, outputs, connections, and
//! the step tree.
//!
//! `Step` is a tagged variant whose discriminator is *which field is
//! present*, not an internal `type:` tag, so it needs a hand-written
//! `Deserialize` impl (`serde(untagged)` does not express "first match by
//! field presence, in this declared order").

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{OrchestratorError, Result};

/// A single declared flow input.
#[derive(Debug, Clone, Deserialize)]
pub struct InputDecl {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

/// A single declared flow output: `{name, value}` where `value` is
/// typically a `${...}` expression.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    pub value: Value,
}

/// An entry in the `connections` mapping: `{type, ...type-specific options}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionDecl {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(flatten)]
    pub options: HashMap<String, Value>,
}

/// `retry: {max_attempts, backoff}` on a task step.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff: f64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_secs() -> f64 {
    1.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff_secs(),
        }
    }
}

/// `task` step: invokes a registered task handler.
#[derive(Debug, Clone)]
pub struct TaskStep {
    pub task: String,
    pub id: Option<String>,
    pub inputs: Value,
    pub connection: Option<String>,
    pub retry: RetryConfig,
    pub on_error: Option<Vec<Step>>,
}

/// `conditional` step: `if`/`then`/`else`.
#[derive(Debug, Clone)]
pub struct ConditionalStep {
    pub if_expr: String,
    pub then_steps: Vec<Step>,
    pub else_steps: Option<Vec<Step>>,
}

/// One `{case, do}` arm of a `switch` step.
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchCase {
    pub case: Value,
    #[serde(rename = "do")]
    pub do_steps: Vec<Step>,
}

/// `switch` step: deep-equality dispatch over `cases`, falling back to
/// `default`.
#[derive(Debug, Clone)]
pub struct SwitchStep {
    pub switch_expr: String,
    pub cases: Vec<SwitchCase>,
    pub default_steps: Option<Vec<Step>>,
}

/// `loop` step: `for_each` over a resolved sequence.
#[derive(Debug, Clone)]
pub struct LoopStep {
    pub for_each_expr: String,
    pub do_steps: Vec<Step>,
    pub loop_var: String,
}

/// `exit` step: clean early termination, optionally guarded by `when`.
#[derive(Debug, Clone)]
pub struct ExitStep {
    pub when_expr: Option<String>,
}

/// One node in the step tree. Discriminated by field presence, checked in
/// the order: `task`, `parallel`, `conditional` (`if`), `switch`, `loop`
/// (`for_each`), `exit`.
#[derive(Debug, Clone)]
pub enum Step {
    Task(TaskStep),
    Parallel(Vec<Step>),
    Conditional(ConditionalStep),
    Switch(SwitchStep),
    Loop(LoopStep),
    Exit(ExitStep),
}

impl Step {
    /// The sibling-uniqueness key for task steps; `None` for every other
    /// kind (they never write to `context.outputs` directly).
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Step::Task(t) => t.id.as_deref(),
            _ => None,
        }
    }
}

/// Intermediate, fully-optional view of a step used only to disambiguate
/// which variant a document encodes.
#[derive(Debug, Deserialize)]
struct RawStep {
    // task
    task: Option<String>,
    id: Option<String>,
    #[serde(default)]
    inputs: Option<Value>,
    connection: Option<String>,
    retry: Option<RetryConfig>,
    on_error: Option<Vec<Step>>,

    // parallel
    parallel: Option<Vec<Step>>,

    // conditional
    #[serde(rename = "if")]
    if_expr: Option<String>,
    then: Option<Vec<Step>>,
    #[serde(rename = "else")]
    else_steps: Option<Vec<Step>>,

    // switch
    switch: Option<String>,
    cases: Option<Vec<SwitchCase>>,
    default: Option<Vec<Step>>,

    // loop
    for_each: Option<String>,
    #[serde(rename = "do")]
    do_steps: Option<Vec<Step>>,
    #[serde(rename = "as")]
    loop_var: Option<String>,

    // exit
    exit: Option<bool>,
    when: Option<String>,
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as DeError;

        let raw = RawStep::deserialize(deserializer)?;

        if let Some(task) = raw.task {
            return Ok(Step::Task(TaskStep {
                task,
                id: raw.id,
                inputs: raw.inputs.unwrap_or(Value::Object(Default::default())),
                connection: raw.connection,
                retry: raw.retry.unwrap_or_default(),
                on_error: raw.on_error,
            }));
        }

        if let Some(children) = raw.parallel {
            return Ok(Step::Parallel(children));
        }

        if let Some(if_expr) = raw.if_expr {
            let then_steps = raw
                .then
                .ok_or_else(|| DeError::custom("conditional step requires `then`"))?;
            return Ok(Step::Conditional(ConditionalStep {
                if_expr,
                then_steps,
                else_steps: raw.else_steps,
            }));
        }

        if let Some(switch_expr) = raw.switch {
            let cases = raw
                .cases
                .ok_or_else(|| DeError::custom("switch step requires `cases`"))?;
            return Ok(Step::Switch(SwitchStep {
                switch_expr,
                cases,
                default_steps: raw.default,
            }));
        }

        if let Some(for_each_expr) = raw.for_each {
            let do_steps = raw
                .do_steps
                .ok_or_else(|| DeError::custom("loop step requires `do`"))?;
            return Ok(Step::Loop(LoopStep {
                for_each_expr,
                do_steps,
                loop_var: raw.loop_var.unwrap_or_else(|| "item".to_string()),
            }));
        }

        if raw.exit == Some(true) {
            return Ok(Step::Exit(ExitStep { when_expr: raw.when }));
        }

        Err(DeError::custom(
            "step matches no known shape: expected one of task, parallel, if, switch, for_each, exit",
        ))
    }
}

/// The parsed flow document.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowDefinition {
    #[serde(alias = "flow")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputDecl>,
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
    #[serde(default)]
    pub connections: HashMap<String, ConnectionDecl>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl FlowDefinition {
    /// Parses a YAML (or JSON, which is a YAML subset) flow document.
    pub fn from_yaml_str(doc: &str) -> Result<Self> {
        let def: FlowDefinition = serde_yaml::from_str(doc)?;
        def.validate()?;
        Ok(def)
    }

    /// Structural validation performed at load time, before any step runs.
    ///
    /// Checks: unique sibling `task` ids, unique `parallel`-child ids,
    /// every `on_error`/`then`/`else`/`do`/`cases[].do` subtree recursively.
    pub fn validate(&self) -> Result<()> {
        validate_sequence(&self.steps, &mut HashMap::new())?;
        Ok(())
    }
}

/// Walks a sequence of sibling steps, checking id uniqueness among `task`
/// steps at this level and recursing into nested sequences. `seen` tracks
/// ids seen in the *current* sibling group (reset per `parallel` block:
/// duplicate ids within a `parallel` block are a load-time validation
/// error, but the same id may be reused across distinct sibling groups).
fn validate_sequence(steps: &[Step], seen: &mut HashMap<String, ()>) -> Result<()> {
    for step in steps {
        match step {
            Step::Task(t) => {
                if let Some(id) = &t.id {
                    if seen.insert(id.clone(), ()).is_some() {
                        return Err(OrchestratorError::Definition(format!(
                            "duplicate step id `{}` among siblings",
                            id
                        )));
                    }
                }
                if let Some(on_error) = &t.on_error {
                    validate_sequence(on_error, &mut HashMap::new())?;
                }
            }
            Step::Parallel(children) => {
                let mut parallel_seen = HashMap::new();
                validate_sequence(children, &mut parallel_seen)?;
            }
            Step::Conditional(c) => {
                validate_sequence(&c.then_steps, &mut HashMap::new())?;
                if let Some(else_steps) = &c.else_steps {
                    validate_sequence(else_steps, &mut HashMap::new())?;
                }
            }
            Step::Switch(s) => {
                for case in &s.cases {
                    validate_sequence(&case.do_steps, &mut HashMap::new())?;
                }
                if let Some(default_steps) = &s.default_steps {
                    validate_sequence(default_steps, &mut HashMap::new())?;
                }
            }
            Step::Loop(l) => {
                validate_sequence(&l.do_steps, &mut HashMap::new())?;
            }
            Step::Exit(_) => {}
        }
    }
    Ok(())
}
