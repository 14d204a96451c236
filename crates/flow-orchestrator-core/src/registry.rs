// Copyright (c) 2025 Flow Orchestrator
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task registry and invocation binding.
//!
//! A `DashMap<String, Arc<dyn TaskHandler>>` registry: one trait for any
//! named task implementation. Handler registration carries an explicit
//! parameter-descriptor list rather than relying on reflection, so
//! argument binding is checked against a statically declared shape
//! instead of inferred from a handler's signature.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::connections::Connection;
use crate::error::{OrchestratorError, Result};

/// Declares one parameter a task handler accepts.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub required: bool,
    /// Marks the special `connection` parameter the executor injects from
    /// `context.connections[step.connection]` instead of reading it out of
    /// the step's declared `inputs`.
    pub is_connection: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            is_connection: false,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            is_connection: false,
        }
    }

    pub fn connection() -> Self {
        Self {
            name: "connection".to_string(),
            required: false,
            is_connection: true,
        }
    }
}

/// A named task implementation. The handler contract is deliberately
/// synchronous-or-asynchronous agnostic at the trait level — `async_trait`
/// gives every handler an async call surface, and a purely synchronous
/// handler simply never awaits, serving as a ready-value adapter for
/// purely synchronous implementations.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn invoke(
        &self,
        args: HashMap<String, Value>,
        connection: Option<Arc<dyn Connection>>,
    ) -> std::result::Result<Value, String>;
}

struct HandlerEntry {
    handler: Arc<dyn TaskHandler>,
    params: Vec<ParamSpec>,
    #[allow(dead_code)]
    description: String,
    implemented: bool,
}

/// Name → handler lookup table. Re-registering a name overwrites the
/// previous entry; the caller decides whether that's a bug (the registry
/// itself only warns).
pub struct TaskRegistry {
    handlers: DashMap<String, HandlerEntry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Registers an implemented handler.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        params: Vec<ParamSpec>,
    ) {
        self.register_with(name, handler, params, String::new(), true);
    }

    /// Registers a handler known to the catalog but not yet implemented;
    /// lookups fail with `TaskNotImplementedError` until it is replaced by
    /// a call to `register`.
    pub fn register_unimplemented(&self, name: impl Into<String>, params: Vec<ParamSpec>) {
        self.register_with(name, Arc::new(UnimplementedHandler), params, String::new(), false);
    }

    fn register_with(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        params: Vec<ParamSpec>,
        description: String,
        implemented: bool,
    ) {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            tracing::warn!(task = %name, "overwriting previously registered task handler");
        }
        self.handlers.insert(
            name,
            HandlerEntry {
                handler,
                params,
                description,
                implemented,
            },
        );
    }

    /// Looks up a handler by name, returning its parameter list alongside
    /// it for argument binding.
    fn lookup(&self, name: &str) -> Result<(Arc<dyn TaskHandler>, Vec<ParamSpec>)> {
        let entry = self
            .handlers
            .get(name)
            .ok_or_else(|| OrchestratorError::TaskNotFound(name.to_string()))?;
        if !entry.implemented {
            return Err(OrchestratorError::TaskNotImplemented(name.to_string()));
        }
        Ok((entry.handler.clone(), entry.params.clone()))
    }

    /// Resolves declared `inputs`, binds them to the handler's parameter
    /// list, injects the connection if requested, and invokes the handler.
    ///
    /// Convenience wrapper over `prepare` + `PreparedCall::invoke` for
    /// callers that don't need to retry just the handler invocation.
    pub async fn invoke(
        &self,
        name: &str,
        resolved_inputs: &Value,
        connection: Option<Arc<dyn Connection>>,
    ) -> Result<Value> {
        self.prepare(name, resolved_inputs, connection.is_some())?
            .invoke(connection)
            .await
    }

    /// Looks up the handler and binds arguments, *without* invoking it.
    /// Lookup/binding failures (`TaskNotFoundError`, `TaskNotImplementedError`,
    /// `InputError`) are structural — they fail identically on every
    /// attempt — so the executor calls this once, outside the retry loop,
    /// and only retries the returned `PreparedCall::invoke`.
    pub fn prepare(
        &self,
        name: &str,
        resolved_inputs: &Value,
        connection_provided: bool,
    ) -> Result<PreparedCall> {
        let (handler, params) = self.lookup(name)?;
        let wants_connection = params.iter().any(|p| p.is_connection);
        if wants_connection && !connection_provided {
            return Err(OrchestratorError::Input(format!(
                "task `{}` declares a `connection` parameter but the step has no `connection` set",
                name
            )));
        }
        let args = bind_args(&params, resolved_inputs)?;
        Ok(PreparedCall { handler, args })
    }
}

/// A handler with its arguments already bound; only the network/IO-bound
/// `invoke` call itself is a candidate for the retry loop.
pub struct PreparedCall {
    handler: Arc<dyn TaskHandler>,
    args: HashMap<String, Value>,
}

impl PreparedCall {
    pub async fn invoke(&self, connection: Option<Arc<dyn Connection>>) -> Result<Value> {
        self.handler
            .invoke(self.args.clone(), connection)
            .await
            .map_err(OrchestratorError::Handler)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds a resolved `inputs` document to a handler's declared parameters:
/// missing required params fail with `InputError`; keys the handler does
/// not declare (other than `connection`, bound separately) also fail with
/// `InputError`.
fn bind_args(params: &[ParamSpec], resolved_inputs: &Value) -> Result<HashMap<String, Value>> {
    let provided = match resolved_inputs {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(OrchestratorError::Input(format!(
                "step `inputs` must be a mapping, got {}",
                other
            )))
        }
    };

    let mut args = HashMap::new();
    for param in params {
        if param.is_connection {
            continue;
        }
        match provided.get(&param.name) {
            Some(value) => {
                args.insert(param.name.clone(), value.clone());
            }
            None if param.required => {
                return Err(OrchestratorError::Input(format!(
                    "missing required input `{}`",
                    param.name
                )))
            }
            None => {}
        }
    }

    let accepted: std::collections::HashSet<&str> =
        params.iter().map(|p| p.name.as_str()).collect();
    for key in provided.keys() {
        if !accepted.contains(key.as_str()) {
            return Err(OrchestratorError::Input(format!(
                "unexpected input `{}` not declared by the task's parameters",
                key
            )));
        }
    }

    Ok(args)
}

struct UnimplementedHandler;

#[async_trait]
impl TaskHandler for UnimplementedHandler {
    async fn invoke(
        &self,
        _args: HashMap<String, Value>,
        _connection: Option<Arc<dyn Connection>>,
    ) -> std::result::Result<Value, String> {
        Err("task registered but not implemented".to_string())
    }
}
