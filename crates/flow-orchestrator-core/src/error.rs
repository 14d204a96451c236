// Copyright (c) 2025 Flow Orchestrator
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error classification for the flow execution core.
//!
//! Every variant corresponds to one of the error kinds the executor
//! surfaces on a run result: `DefinitionError`, `InputError`,
//! `TaskNotFoundError`, `TaskNotImplementedError`, `NullReference`,
//! `HandlerError`, `ExitRequested`, `Cancelled`.

use serde::Serialize;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors produced while validating, resolving, or executing a flow.
///
/// `ExitRequested` and `Cancelled` are not failures in the usual sense —
/// they are control-flow signals threaded through `Result` so the executor
/// can unwind sequences with `?` the same way it propagates real errors.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("definition error: {0}")]
    Definition(String),

    #[error("input error: {0}")]
    Input(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task not implemented: {0}")]
    TaskNotImplemented(String),

    #[error("null reference: {0}")]
    NullReference(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("exit requested")]
    ExitRequested,

    #[error("run cancelled")]
    Cancelled,
}

/// The `{kind, message}` pair surfaced on `metadata.last_error` and on
/// the top-level run result's `error` field.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub kind: &'static str,
    pub message: String,
}

impl OrchestratorError {
    /// Discriminant string used as `ErrorInfo::kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Definition(_) => "DefinitionError",
            Self::Input(_) => "InputError",
            Self::TaskNotFound(_) => "TaskNotFoundError",
            Self::TaskNotImplemented(_) => "TaskNotImplementedError",
            Self::NullReference(_) => "NullReference",
            Self::Handler(_) => "HandlerError",
            Self::ExitRequested => "ExitRequested",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    /// True for the two clean-termination signals (not failures).
    pub fn is_unwind_signal(&self) -> bool {
        matches!(self, Self::ExitRequested | Self::Cancelled)
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Definition(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Definition(err.to_string())
    }
}
