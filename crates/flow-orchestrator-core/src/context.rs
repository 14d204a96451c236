// Copyright (c) 2025 Flow Orchestrator
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-run execution state: inputs, step outputs, last-error metadata,
//! cancellation, and the connection capability.
//!
//! The loop-variable scope stack is deliberately *not* stored here. It is
//! threaded as an explicit parameter
//! through step dispatch instead (see `executor::Scope`), because
//! concurrent `parallel` children must never observe each other's loop
//! frames — storing it on this shared, `Arc`-cloned struct would make that
//! isolation a runtime invariant instead of a compile-time one.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::connections::ConnectionManager;
use crate::error::ErrorInfo;
use crate::resolver::ResolveContext;

/// A cancellation token, accessible on the context: any caller
/// holding a clone may request cooperative termination of a run in
/// progress. Created *before* the run starts so an external caller has
/// something to hold onto while `execute_flow`'s future is being polled —
/// a flag minted only after the run completes would be useless for this.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run mutable state shared by the executor and, read-only, by the
/// resolver.
pub struct FlowContext {
    inputs: HashMap<String, Value>,
    outputs: DashMap<String, Value>,
    last_error: parking_lot::RwLock<Option<ErrorInfo>>,
    cancelled: CancellationToken,
    connections: Arc<dyn ConnectionManager>,
}

impl FlowContext {
    pub fn new(inputs: HashMap<String, Value>, connections: Arc<dyn ConnectionManager>) -> Self {
        Self::with_cancellation(inputs, connections, CancellationToken::new())
    }

    /// Seeds the context with a cancellation token the caller minted
    /// beforehand, so it can request termination of this run from another
    /// task while `execute_flow`'s future is still being polled.
    pub fn with_cancellation(
        inputs: HashMap<String, Value>,
        connections: Arc<dyn ConnectionManager>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            inputs,
            outputs: DashMap::new(),
            last_error: parking_lot::RwLock::new(None),
            cancelled: cancellation,
            connections,
        }
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    /// Step outputs, once written, are not overwritten within a run except
    /// by a repeated `id` from a later loop iteration — the
    /// caller is responsible for only calling this once per logical
    /// completion of a given step id.
    pub fn set_output(&self, id: &str, value: Value) {
        self.outputs.insert(id.to_string(), value);
    }

    pub fn get_output(&self, id: &str) -> Option<Value> {
        self.outputs.get(id).map(|entry| entry.value().clone())
    }

    pub fn set_last_error(&self, info: ErrorInfo) {
        *self.last_error.write() = Some(info);
    }

    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.last_error.read().clone()
    }

    pub fn connections(&self) -> &dyn ConnectionManager {
        self.connections.as_ref()
    }

    /// A cloneable handle to the cancellation token; any caller holding it
    /// may request cooperative termination from outside the run.
    pub fn cancellation_handle(&self) -> CancellationToken {
        self.cancelled.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancelled.cancel();
    }
}

impl ResolveContext for FlowContext {
    fn resolve_input(&self, name: &str) -> Option<Value> {
        self.input(name).cloned()
    }

    fn resolve_step_output(&self, id: &str) -> Option<Value> {
        self.get_output(id)
    }
}
