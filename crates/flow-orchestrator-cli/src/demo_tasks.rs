// Copyright (c) 2025 Flow Orchestrator
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A small built-in task catalog for the `run` subcommand.
//!
//! Bootstrapping a real task catalog from disk is out of scope for the
//! execution core; this harness registers a handful of generically
//! useful handlers so a flow definition has something to dispatch
//! against without an operator-supplied catalog.

use async_trait::async_trait;
use flow_orchestrator_core::{Connection, ParamSpec, TaskHandler, TaskRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Returns its bound arguments unchanged; useful for wiring up demo
/// flows and for tests that only care about control flow. Only the
/// `message` key is declared, so that is the only key that survives
/// binding — see `bind_args` in the registry for why undeclared keys
/// are rejected rather than passed through.
struct Echo;

#[async_trait]
impl TaskHandler for Echo {
    async fn invoke(
        &self,
        args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        Ok(Value::Object(args.into_iter().collect()))
    }
}

/// Logs its `message` argument at info level and returns it; a stand-in
/// for a real logging/notification task.
struct LogMessage;

#[async_trait]
impl TaskHandler for LogMessage {
    async fn invoke(
        &self,
        args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        tracing::info!(message, "flow log step");
        Ok(Value::Object(args.into_iter().collect()))
    }
}

/// Sleeps for `seconds` and returns `{slept: seconds}`; useful for
/// demonstrating retry backoff and cancellation without real I/O.
struct Sleep;

#[async_trait]
impl TaskHandler for Sleep {
    async fn invoke(
        &self,
        args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        let seconds = args.get("seconds").and_then(Value::as_f64).unwrap_or(0.0);
        tokio::time::sleep(std::time::Duration::from_secs_f64(seconds.max(0.0))).await;
        Ok(serde_json::json!({ "slept": seconds }))
    }
}

/// Always fails with the given `message` (default `"boom"`); useful for
/// exercising retry and `on_error` from a flow definition file instead of
/// from Rust unit tests.
struct AlwaysFail;

#[async_trait]
impl TaskHandler for AlwaysFail {
    async fn invoke(
        &self,
        args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value, String> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("boom");
        Err(message.to_string())
    }
}

/// Registers the demo task set on `registry`.
pub fn register_all(registry: &TaskRegistry) {
    registry.register("echo", Arc::new(Echo), vec![ParamSpec::optional("message")]);
    registry.register(
        "log",
        Arc::new(LogMessage),
        vec![ParamSpec::required("message")],
    );
    registry.register("sleep", Arc::new(Sleep), vec![ParamSpec::required("seconds")]);
    registry.register(
        "always_fail",
        Arc::new(AlwaysFail),
        vec![ParamSpec::optional("message")],
    );
}
