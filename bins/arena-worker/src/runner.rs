// Test case execution
// One fresh sandbox per case: install the entry point, bind the arguments, call, read back

use crate::engine::{ExecutionBudget, Sandbox, SandboxError, SandboxLauncher};
use crate::extractor::ExtractedFunction;
use arena_common::protocol::{argument_name, ScriptValue};
use arena_common::types::{OutputContract, TestCase};
use std::time::{Duration, Instant};
use tracing::debug;

/// Raw result of running one test case
/// Produced by the runner, consumed by the evaluator
#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    pub output: Result<ScriptValue, SandboxError>,
    /// Time spent after the sandbox was ready
    pub elapsed: Duration,
}

pub struct CaseRunner<'a> {
    launcher: &'a dyn SandboxLauncher,
    function: &'a ExtractedFunction,
    contract: OutputContract,
}

impl<'a> CaseRunner<'a> {
    pub fn new(
        launcher: &'a dyn SandboxLauncher,
        function: &'a ExtractedFunction,
        contract: OutputContract,
    ) -> Self {
        Self {
            launcher,
            function,
            contract,
        }
    }

    #[tracing::instrument(skip(self, case, budget), fields(function = %self.function.name))]
    pub async fn run(&self, index: usize, case: &TestCase, budget: ExecutionBudget) -> CaseOutcome {
        let launched = Instant::now();
        let mut sandbox = match self.launcher.launch(budget).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                return CaseOutcome {
                    output: Err(e),
                    elapsed: launched.elapsed(),
                }
            }
        };

        let started = Instant::now();
        let output = self.call(sandbox.as_mut(), &case.input).await;
        let elapsed = started.elapsed();
        debug!(elapsed_ms = elapsed.as_millis() as u64, ok = output.is_ok(), "Case executed");

        CaseOutcome { output, elapsed }
    }

    async fn call(
        &self,
        sandbox: &mut dyn Sandbox,
        arguments: &[serde_json::Value],
    ) -> Result<ScriptValue, SandboxError> {
        sandbox.define(&self.function.install_script()).await?;

        // Arguments are copied across the process boundary, so the fixture is never aliased
        let names: Vec<String> = (0..arguments.len()).map(argument_name).collect();
        for (name, value) in names.iter().zip(arguments) {
            sandbox.bind(name, value).await?;
        }

        let returned = sandbox
            .evaluate(&self.function.call_expression(&names))
            .await?;

        let read_back = match self.contract {
            OutputContract::ReturnValue => false,
            OutputContract::MutatedFirstArgument => true,
            OutputContract::ReturnOrMutated => returned.is_undefined(),
        };
        if read_back && !names.is_empty() {
            sandbox.evaluate(&names[0]).await
        } else if read_back {
            Ok(ScriptValue::Undefined)
        } else {
            Ok(returned)
        }
    }
}
