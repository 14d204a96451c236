// Copyright (c) 2025 Flow Orchestrator
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution core of the declarative flow orchestrator: the flow
//! interpreter/step scheduler, the per-run execution context, the
//! `${...}` variable and condition resolver, and the task registry +
//! invocation protocol.
//!
//! This crate is intentionally silent about where a [`FlowDefinition`]
//! comes from (file, network, in-memory string) and how a
//! [`ConnectionManager`] is backed (database pool, HTTP client pool) —
//! those are the caller's concern. It owns only one dependency chain:
//! resolver → context → registry → validator → executor.

pub mod connections;
pub mod context;
pub mod definition;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod value;

mod executor;

pub use connections::{Connection, ConnectionManager, InMemoryConnectionManager};
pub use context::{CancellationToken, FlowContext};
pub use definition::{
    ConditionalStep, ConnectionDecl, ExitStep, FlowDefinition, InputDecl, LoopStep, OutputDecl,
    RetryConfig, Step, SwitchCase, SwitchStep, TaskStep,
};
pub use error::{ErrorInfo, OrchestratorError, Result};
pub use executor::{Executor, FlowResult};
pub use registry::{ParamSpec, PreparedCall, TaskHandler, TaskRegistry};
