// Copyright (c) 2025 Flow Orchestrator
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry with exponential backoff for task-step handler failures.
//!
//! Plain `max_attempts`/`backoff` with a fixed exponential curve: no
//! backoff-strategy choice and no delay ceiling, since a step's `retry`
//! block only ever declares those two fields (see DESIGN.md for the
//! broader backoff-variant design this was narrowed from).

use std::future::Future;
use std::time::Duration;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_secs: 1.0,
        }
    }
}

/// Runs `attempt` up to `policy.max_attempts` times. Attempt `k+1` waits
/// `backoff × 2^(k-1)` seconds after the k-th failure, so the first retry
/// waits exactly `backoff` seconds. A `Cancelled`/`ExitRequested` signal
/// from the handler is never retried — it propagates immediately, and
/// cancellation is also checked between retry attempts so a cancelled run
/// never sleeps through a backoff window.
pub async fn run_with_retry<F, Fut, T>(policy: RetryPolicy, is_cancelled: impl Fn() -> bool, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt_no: u32 = 1;
    loop {
        if is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_unwind_signal() => return Err(err),
            Err(err) => {
                if attempt_no >= policy.max_attempts {
                    return Err(err);
                }
                let wait_secs = policy.backoff_secs * 2f64.powi((attempt_no - 1) as i32);
                tracing::warn!(
                    attempt = attempt_no,
                    wait_secs,
                    error = %err,
                    "task handler failed, retrying after backoff"
                );
                tokio::time::sleep(Duration::from_secs_f64(wait_secs.max(0.0))).await;
                attempt_no += 1;
            }
        }
    }
}
