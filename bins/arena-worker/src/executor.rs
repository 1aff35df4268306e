//! Submission Judge - High-Level Orchestration
//!
//! **Responsibility:**
//! Turn one submission into one verdict.
//!
//! **Architecture:**
//! 1. Extract the entry point (extractor.rs); failure ends grading as a compilation error
//! 2. Run every case in order in its own sandbox (runner.rs, engine.rs)
//! 3. Compare and aggregate (evaluator.rs)
//!
//! This module is the glue layer. It owns the two cross-submission concerns:
//! the admission limiter bounding live sandboxes, and cooperative cancellation.

use crate::engine::{ExecutionBudget, ProcessLauncher, SandboxLauncher};
use crate::evaluator::{aggregate_results, cancelled_case, evaluate_case};
use crate::extractor::Extractor;
use crate::interpreter::ScriptLimits;
use crate::runner::CaseRunner;
use anyhow::{Context, Result};
use arena_common::config::JudgeConfig;
use arena_common::types::{Submission, SubmissionResult, TestStatus};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Grades submissions; cheap to clone and share across tasks
#[derive(Clone)]
pub struct Judge {
    launcher: Arc<dyn SandboxLauncher>,
    config: JudgeConfig,
    admission: Arc<Semaphore>,
    extractor: Extractor,
}

impl Judge {
    pub fn new(launcher: Arc<dyn SandboxLauncher>, config: JudgeConfig) -> Self {
        Self {
            launcher,
            admission: Arc::new(Semaphore::new(config.max_concurrent_sandboxes)),
            extractor: Extractor::new(config.max_source_bytes),
            config,
        }
    }

    /// Judge backed by sandbox processes
    ///
    /// Runs `sandbox_program` when configured, otherwise re-enters the current
    /// executable through its sandbox subcommand.
    pub fn from_config(config: &JudgeConfig) -> Result<Self> {
        let program = match &config.sandbox_program {
            Some(program) => program.clone(),
            None => std::env::current_exe().context("Failed to locate the worker executable")?,
        };

        let limits = ScriptLimits {
            recursion: config.recursion_limit,
            stack_size: config.stack_size_limit,
        };
        let launcher = ProcessLauncher::worker(program, limits)
            .with_startup_timeout(config.startup_timeout())
            .with_max_output_bytes(config.max_output_bytes)
            .with_memory_limit(config.memory_limit_bytes());
        info!(
            program = %launcher.program().display(),
            max_memory_mb = config.max_memory_mb,
            "Sandbox launcher configured"
        );

        Ok(Self::new(Arc::new(launcher), config.clone()))
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    pub async fn grade(&self, submission: &Submission) -> SubmissionResult {
        self.grade_with_cancel(submission, CancellationToken::new())
            .await
    }

    /// Grade a submission, stopping early once `cancel` fires
    ///
    /// The verdict always carries one result per test case once extraction
    /// succeeds; cases that never ran are reported as cancelled.
    #[tracing::instrument(
        skip_all,
        fields(
            submission_id = %uuid::Uuid::new_v4(),
            function = %submission.function_name,
            cases = submission.test_cases.len()
        )
    )]
    pub async fn grade_with_cancel(
        &self,
        submission: &Submission,
        cancel: CancellationToken,
    ) -> SubmissionResult {
        let started = Instant::now();

        let function = match self
            .extractor
            .extract(&submission.code, &submission.function_name)
        {
            Ok(function) => function,
            Err(e) => {
                warn!(error = %e, "Extraction failed; no test case executed");
                return SubmissionResult::compilation_error(e);
            }
        };

        let timeout = self.config.case_timeout(submission.timeout_ms);
        info!(
            form = ?function.form,
            timeout_ms = timeout.as_millis() as u64,
            comparison = ?submission.comparison,
            "Grading submission"
        );

        let runner = CaseRunner::new(self.launcher.as_ref(), &function, submission.output_contract);
        let mut results = Vec::with_capacity(submission.test_cases.len());

        for (index, case) in submission.test_cases.iter().enumerate() {
            if cancel.is_cancelled() {
                results.push(cancelled_case(index, case));
                continue;
            }

            // Held for the lifetime of this case's sandbox
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = self.admission.acquire() => permit.ok(),
            };
            let Some(_permit) = permit else {
                results.push(cancelled_case(index, case));
                continue;
            };

            let outcome = runner
                .run(index, case, ExecutionBudget::new(timeout, cancel.clone()))
                .await;
            let result = evaluate_case(index, case, &outcome, submission.comparison);

            match result.status {
                TestStatus::Passed | TestStatus::WrongAnswer | TestStatus::Cancelled => debug!(
                    case = index,
                    status = %result.status,
                    elapsed_ms = result.execution_time_ms,
                    "Case evaluated"
                ),
                TestStatus::RuntimeError | TestStatus::TimeLimitExceeded => warn!(
                    case = index,
                    status = %result.status,
                    elapsed_ms = result.execution_time_ms,
                    error = result.error.as_deref().unwrap_or(""),
                    "Case failed to execute"
                ),
            }
            results.push(result);
        }

        let verdict = aggregate_results(results, started.elapsed());
        info!(
            status = %verdict.status,
            passed = verdict.passed_count(),
            total = verdict.results.len(),
            elapsed_ms = verdict.execution_time_ms.unwrap_or(0),
            "Submission graded"
        );
        verdict
    }
}
