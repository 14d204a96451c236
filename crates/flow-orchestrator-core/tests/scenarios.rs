// Copyright (c) 2025 Flow Orchestrator
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests driven entirely through the public API: parse a
//! YAML flow document, register task handlers, run it.

use async_trait::async_trait;
use flow_orchestrator_core::{
    CancellationToken, Connection, Executor, FlowDefinition, InMemoryConnectionManager, ParamSpec,
    TaskHandler, TaskRegistry,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn connections() -> Arc<InMemoryConnectionManager> {
    Arc::new(InMemoryConnectionManager::new())
}

struct Double;
#[async_trait]
impl TaskHandler for Double {
    async fn invoke(
        &self,
        args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        let x = args.get("x").and_then(Value::as_i64).unwrap_or(0);
        Ok(json!({ "doubled": x * 2 }))
    }
}

#[tokio::test]
async fn scenario_1_sequential_pass_through() {
    let yaml = r#"
name: sequential-pass-through
inputs:
  - name: x
    type: int
    required: true
outputs:
  - name: y
    value: "${a.doubled}"
steps:
  - id: a
    task: double
    inputs:
      x: "${inputs.x}"
"#;
    let definition = FlowDefinition::from_yaml_str(yaml).unwrap();
    let registry = Arc::new(TaskRegistry::new());
    registry.register("double", Arc::new(Double), vec![ParamSpec::required("x")]);

    let mut inputs = HashMap::new();
    inputs.insert("x".to_string(), json!(3));

    let result = Executor::new(registry)
        .execute_flow(&definition, inputs, connections())
        .await;

    assert!(result.success);
    assert_eq!(result.outputs, json!({ "y": 6 }).as_object().unwrap().clone());
}

/// A handler that fails a fixed number of times before succeeding,
/// recording the wall-clock time of each attempt so the test can assert
/// on the retry backoff schedule.
struct FlakyTimed {
    remaining_failures: AtomicU32,
    start: Instant,
    attempt_times_ms: Arc<parking_lot::Mutex<Vec<u64>>>,
}

#[async_trait]
impl TaskHandler for FlakyTimed {
    async fn invoke(
        &self,
        _args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        self.attempt_times_ms
            .lock()
            .push(self.start.elapsed().as_millis() as u64);
        let remaining = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    Some(0)
                }
            })
            .unwrap_or(0);
        if remaining > 0 {
            Err("not yet".to_string())
        } else {
            Ok(json!({ "ok": true }))
        }
    }
}

#[tokio::test]
async fn scenario_2_retry_with_eventual_success() {
    let yaml = r#"
name: retry-eventual-success
outputs:
  - name: y
    value: "${a.ok}"
steps:
  - id: a
    task: flaky
    retry:
      max_attempts: 3
      backoff: 0.01
"#;
    let definition = FlowDefinition::from_yaml_str(yaml).unwrap();
    let registry = Arc::new(TaskRegistry::new());
    let attempt_times_ms = Arc::new(parking_lot::Mutex::new(Vec::new()));
    registry.register(
        "flaky",
        Arc::new(FlakyTimed {
            remaining_failures: AtomicU32::new(2),
            start: Instant::now(),
            attempt_times_ms: attempt_times_ms.clone(),
        }),
        vec![],
    );

    let result = Executor::new(registry)
        .execute_flow(&definition, HashMap::new(), connections())
        .await;

    assert!(result.success);
    assert_eq!(result.outputs.get("y"), Some(&json!(true)));

    let times = attempt_times_ms.lock();
    assert_eq!(times.len(), 3, "handler invoked exactly three times");
    // first retry waits ~0.01s, second waits ~0.02s (B * 2^(k-1))
    assert!(times[1] >= 9, "first retry should wait ~10ms, got {}ms", times[1]);
    assert!(times[2] - times[1] >= 18, "second retry should wait ~20ms more");
}

struct AlwaysFails;
#[async_trait]
impl TaskHandler for AlwaysFails {
    async fn invoke(
        &self,
        _args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        Err("boom".to_string())
    }
}

struct EchoLastError;
#[async_trait]
impl TaskHandler for EchoLastError {
    async fn invoke(
        &self,
        _args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        Ok(json!({ "captured": "boom" }))
    }
}

#[tokio::test]
async fn scenario_3_retry_exhaustion_with_on_error() {
    let yaml = r#"
name: retry-exhaustion
outputs:
  - name: captured
    value: "${logged.captured}"
steps:
  - id: doomed
    task: always_fails
    retry:
      max_attempts: 2
      backoff: 0.001
    on_error:
      - id: logged
        task: echo_last_error
"#;
    let definition = FlowDefinition::from_yaml_str(yaml).unwrap();
    let registry = Arc::new(TaskRegistry::new());
    registry.register("always_fails", Arc::new(AlwaysFails), vec![]);
    registry.register("echo_last_error", Arc::new(EchoLastError), vec![]);

    let result = Executor::new(registry)
        .execute_flow(&definition, HashMap::new(), connections())
        .await;

    assert!(result.success);
    assert_eq!(result.outputs.get("captured"), Some(&json!("boom")));
    assert!(
        !result.outputs.contains_key("doomed"),
        "the original task's id is not written to outputs once handled by on_error"
    );
}

/// Records the elapsed time (relative to a shared start instant) that each
/// named child began running, so the test can assert overlap.
struct RecordStart {
    label: &'static str,
    n: i64,
    start: Instant,
    starts_ms: Arc<parking_lot::Mutex<HashMap<&'static str, u64>>>,
}

#[async_trait]
impl TaskHandler for RecordStart {
    async fn invoke(
        &self,
        _args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        self.starts_ms
            .lock()
            .insert(self.label, self.start.elapsed().as_millis() as u64);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(json!({ "n": self.n }))
    }
}

#[tokio::test]
async fn scenario_4_parallel_fan_out_overlaps_and_both_visible() {
    let yaml = r#"
name: parallel-fan-out
outputs:
  - name: pair
    value: "${a}"
steps:
  - parallel:
      - id: a
        task: task_a
      - id: b
        task: task_b
"#;
    let definition = FlowDefinition::from_yaml_str(yaml).unwrap();
    let registry = Arc::new(TaskRegistry::new());
    let starts_ms = Arc::new(parking_lot::Mutex::new(HashMap::new()));
    let start = Instant::now();
    registry.register(
        "task_a",
        Arc::new(RecordStart {
            label: "a",
            n: 1,
            start,
            starts_ms: starts_ms.clone(),
        }),
        vec![],
    );
    registry.register(
        "task_b",
        Arc::new(RecordStart {
            label: "b",
            n: 2,
            start,
            starts_ms: starts_ms.clone(),
        }),
        vec![],
    );

    let result = Executor::new(registry)
        .execute_flow(&definition, HashMap::new(), connections())
        .await;

    assert!(result.success);
    assert_eq!(result.outputs.get("pair"), Some(&json!({ "n": 1 })));

    let starts = starts_ms.lock();
    let (a_start, b_start) = (starts["a"], starts["b"]);
    assert!(
        a_start.abs_diff(b_start) < 20,
        "both children should begin within the same scheduling tick, got a={}ms b={}ms",
        a_start,
        b_start
    );
}

struct EchoItem;
#[async_trait]
impl TaskHandler for EchoItem {
    async fn invoke(
        &self,
        args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        Ok(args.get("item").cloned().unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn scenario_5_loop_over_list_final_iteration_wins() {
    let yaml = r#"
name: loop-over-list
inputs:
  - name: items
    required: true
outputs:
  - name: last
    value: "${it}"
steps:
  - for_each: "${inputs.items}"
    do:
      - id: it
        task: echo_item
        inputs:
          item: "${item}"
"#;
    let definition = FlowDefinition::from_yaml_str(yaml).unwrap();
    let registry = Arc::new(TaskRegistry::new());
    registry.register("echo_item", Arc::new(EchoItem), vec![ParamSpec::required("item")]);

    let mut inputs = HashMap::new();
    inputs.insert("items".to_string(), json!([10, 20, 30]));

    let result = Executor::new(registry)
        .execute_flow(&definition, inputs, connections())
        .await;

    assert!(result.success);
    assert_eq!(result.outputs.get("last"), Some(&json!(30)));
}

struct ReturnOk(Value);
#[async_trait]
impl TaskHandler for ReturnOk {
    async fn invoke(
        &self,
        _args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        Ok(self.0.clone())
    }
}

struct CountInvocations(Arc<AtomicU64>);
#[async_trait]
impl TaskHandler for CountInvocations {
    async fn invoke(
        &self,
        _args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "charged": true }))
    }
}

#[tokio::test]
async fn scenario_6_early_exit_skips_later_steps() {
    let yaml = r#"
name: early-exit
outputs: []
steps:
  - id: validate
    task: validate_order
  - if: "${validate.ok} == false"
    then:
      - exit: true
  - id: charge
    task: charge_card
"#;
    let definition = FlowDefinition::from_yaml_str(yaml).unwrap();
    let registry = Arc::new(TaskRegistry::new());
    registry.register(
        "validate_order",
        Arc::new(ReturnOk(json!({ "ok": false }))),
        vec![],
    );
    let charge_count = Arc::new(AtomicU64::new(0));
    registry.register(
        "charge_card",
        Arc::new(CountInvocations(charge_count.clone())),
        vec![],
    );

    let result = Executor::new(registry)
        .execute_flow(&definition, HashMap::new(), connections())
        .await;

    assert!(result.success);
    assert_eq!(charge_count.load(Ordering::SeqCst), 0, "charge must never run");
    assert!(!result.outputs.contains_key("charge"));
}

#[tokio::test]
async fn boundary_empty_steps_returns_declared_outputs() {
    let yaml = r#"
name: empty-steps
inputs:
  - name: x
    required: true
outputs:
  - name: y
    value: "${inputs.x}"
steps: []
"#;
    let definition = FlowDefinition::from_yaml_str(yaml).unwrap();
    let registry = Arc::new(TaskRegistry::new());
    let mut inputs = HashMap::new();
    inputs.insert("x".to_string(), json!(42));

    let result = Executor::new(registry)
        .execute_flow(&definition, inputs, connections())
        .await;

    assert!(result.success);
    assert_eq!(result.outputs.get("y"), Some(&json!(42)));
}

#[tokio::test]
async fn boundary_missing_output_path_fails_the_run() {
    let yaml = r#"
name: missing-output
outputs:
  - name: y
    value: "${never_ran.x}"
steps: []
"#;
    let definition = FlowDefinition::from_yaml_str(yaml).unwrap();
    let registry = Arc::new(TaskRegistry::new());

    let result = Executor::new(registry)
        .execute_flow(&definition, HashMap::new(), connections())
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, "NullReference");
}

#[tokio::test]
async fn boundary_switch_with_no_match_and_no_default_is_a_no_op() {
    let yaml = r#"
name: switch-no-op
outputs: []
steps:
  - switch: "'unmatched'"
    cases:
      - case: "a"
        do:
          - id: matched
            task: noop
"#;
    let definition = FlowDefinition::from_yaml_str(yaml).unwrap();
    let registry = Arc::new(TaskRegistry::new());
    registry.register("noop", Arc::new(ReturnOk(json!(true))), vec![]);

    let result = Executor::new(registry)
        .execute_flow(&definition, HashMap::new(), connections())
        .await;

    assert!(result.success);
    assert!(!result.outputs.contains_key("matched"));
}

/// A handler that blocks on a loop-controlled sleep long enough for an
/// external task to call `CancellationToken::cancel()` while the flow's
/// second iteration is still pending.
struct SlowEcho;
#[async_trait]
impl TaskHandler for SlowEcho {
    async fn invoke(
        &self,
        args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        Ok(args.get("item").cloned().unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn external_cancellation_surfaces_as_cancelled_and_stops_the_loop_early() {
    let yaml = r#"
name: cancellable-loop
inputs:
  - name: items
    required: true
outputs: []
steps:
  - for_each: "${inputs.items}"
    do:
      - id: it
        task: slow_echo
        inputs:
          item: "${item}"
"#;
    let definition = FlowDefinition::from_yaml_str(yaml).unwrap();
    let registry = Arc::new(TaskRegistry::new());
    registry.register("slow_echo", Arc::new(SlowEcho), vec![ParamSpec::required("item")]);

    let mut inputs = HashMap::new();
    inputs.insert("items".to_string(), json!([1, 2, 3, 4, 5]));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        canceller.cancel();
    });

    let executor = Executor::new(registry);
    let result = executor
        .execute_flow_with_cancellation(&definition, inputs, connections(), token)
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, "Cancelled");
}
