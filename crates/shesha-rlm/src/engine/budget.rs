//! Iteration and retry bookkeeping for one query's main loop.

use std::time::{Duration, Instant};

use crate::error::{BudgetExceededError, BudgetType, RlmError};
use crate::types::BudgetConfig;

/// Tracks the counters the main loop checks against `BudgetConfig`: how many
/// iterations have run, how many consecutive driver responses carried no
/// code block, and how many times a dead executor has been replaced.
#[derive(Debug, Clone)]
pub struct IterationBudget {
    config: BudgetConfig,
    started_at: Instant,
    iteration: u32,
    consecutive_no_code: u32,
    dead_executor_retries: u32,
}

impl IterationBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            started_at: Instant::now(),
            iteration: 0,
            consecutive_no_code: 0,
            dead_executor_retries: 0,
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn advance_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn iterations_exhausted(&self) -> bool {
        self.iteration >= self.config.max_iterations
    }

    pub fn record_no_code_response(&mut self) {
        self.consecutive_no_code += 1;
    }

    pub fn reset_no_code_streak(&mut self) {
        self.consecutive_no_code = 0;
    }

    pub fn no_code_tolerance_exhausted(&self) -> bool {
        self.consecutive_no_code > self.config.max_consecutive_no_code
    }

    pub fn record_dead_executor(&mut self) {
        self.dead_executor_retries += 1;
    }

    pub fn dead_executor_retries_exhausted(&self) -> bool {
        self.dead_executor_retries > self.config.max_dead_executor_retries
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Describes why the iteration budget is exhausted. Used internally for
    /// diagnostics at the point the main loop falls through to the
    /// max-iterations fallback; never returned to callers as a `Result`.
    pub fn as_exceeded_error(&self) -> RlmError {
        RlmError::BudgetExceeded(BudgetExceededError {
            budget_type: BudgetType::Iterations,
            limit: self.config.max_iterations as u64,
            actual: self.iteration as u64,
        })
    }
}
