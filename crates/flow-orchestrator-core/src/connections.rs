// Copyright (c) 2025 Flow Orchestrator
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connections as a capability.
//!
//! Connection *pools* (database drivers, HTTP clients, ...) are an
//! external collaborator — the core only sees an opaque handle looked up
//! by name. This module is the thin accessor interface a handler's
//! `connection` parameter receives: a `name -> Arc<dyn Connection>` map,
//! so any named capability can be wired in without the core knowing its
//! concrete type.

use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

use crate::error::{OrchestratorError, Result};

/// An opaque, reentrant resource handle. Connection pool implementations
/// own the concrete type behind this trait; the core never downcasts it
/// except inside a task handler that knows which connection type it asked
/// for.
pub trait Connection: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Named-connection lookup, consumed by the executor when binding a task
/// step's `connection` parameter.
pub trait ConnectionManager: Send + Sync {
    fn get(&self, name: &str) -> Result<Arc<dyn Connection>>;
}

/// A `ConnectionManager` backed by an in-process map, suitable for tests
/// and the CLI harness. Production deployments supply their own
/// `ConnectionManager` backed by real pools; this core never constructs
/// one itself.
pub struct InMemoryConnectionManager {
    connections: DashMap<String, Arc<dyn Connection>>,
}

impl InMemoryConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn register(&self, name: impl Into<String>, connection: Arc<dyn Connection>) {
        self.connections.insert(name.into(), connection);
    }
}

impl Default for InMemoryConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager for InMemoryConnectionManager {
    fn get(&self, name: &str) -> Result<Arc<dyn Connection>> {
        self.connections
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrchestratorError::Input(format!("unknown connection `{}`", name)))
    }
}
