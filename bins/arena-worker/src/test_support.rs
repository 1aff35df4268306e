// Scripted in-process sandboxes for runner and judge tests

use crate::engine::{ExecutionBudget, Sandbox, SandboxError, SandboxLauncher};
use arena_common::protocol::{ScriptValue, ARGUMENT_PREFIX};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Behaviour = dyn Fn(&mut Vec<Value>) -> Result<ScriptValue, SandboxError> + Send + Sync;

#[derive(Default)]
struct Stats {
    launches: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
    defined: Mutex<Vec<String>>,
    expressions: Mutex<Vec<String>>,
}

/// Launches fake sandboxes whose entry point is a Rust closure over the bound arguments
#[derive(Clone)]
pub struct FakeLauncher {
    behaviour: Arc<Behaviour>,
    launch_error: Option<SandboxError>,
    delay: Duration,
    stats: Arc<Stats>,
}

impl FakeLauncher {
    pub fn new<F>(behaviour: F) -> Self
    where
        F: Fn(&mut Vec<Value>) -> Result<ScriptValue, SandboxError> + Send + Sync + 'static,
    {
        Self {
            behaviour: Arc::new(behaviour),
            launch_error: None,
            delay: Duration::ZERO,
            stats: Arc::new(Stats::default()),
        }
    }

    pub fn failing(error: SandboxError) -> Self {
        let mut launcher = Self::new(|_| Ok(ScriptValue::Undefined));
        launcher.launch_error = Some(error);
        launcher
    }

    /// Every call takes `delay`, honouring the budget's timeout and cancellation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn launches(&self) -> usize {
        self.stats.launches.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    pub fn defined(&self) -> Vec<String> {
        self.stats.defined.lock().unwrap().clone()
    }

    pub fn expressions(&self) -> Vec<String> {
        self.stats.expressions.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxLauncher for FakeLauncher {
    async fn launch(&self, budget: ExecutionBudget) -> Result<Box<dyn Sandbox>, SandboxError> {
        if budget.cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }
        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.launch_error {
            return Err(error.clone());
        }

        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(FakeSandbox {
            behaviour: self.behaviour.clone(),
            stats: self.stats.clone(),
            args: Vec::new(),
            delay: self.delay,
            budget,
        }))
    }
}

struct FakeSandbox {
    behaviour: Arc<Behaviour>,
    stats: Arc<Stats>,
    args: Vec<Value>,
    delay: Duration,
    budget: ExecutionBudget,
}

fn argument_index(name: &str) -> Option<usize> {
    name.strip_prefix(ARGUMENT_PREFIX)?.parse().ok()
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn define(&mut self, source: &str) -> Result<(), SandboxError> {
        self.stats.defined.lock().unwrap().push(source.to_string());
        Ok(())
    }

    async fn bind(&mut self, name: &str, value: &Value) -> Result<(), SandboxError> {
        let index = argument_index(name)
            .ok_or_else(|| SandboxError::Runtime(format!("unexpected binding {}", name)))?;
        if self.args.len() <= index {
            self.args.resize(index + 1, Value::Null);
        }
        self.args[index] = value.clone();
        Ok(())
    }

    async fn evaluate(&mut self, expression: &str) -> Result<ScriptValue, SandboxError> {
        self.stats
            .expressions
            .lock()
            .unwrap()
            .push(expression.to_string());

        if let Some(index) = argument_index(expression) {
            return self
                .args
                .get(index)
                .cloned()
                .map(ScriptValue::Json)
                .ok_or_else(|| {
                    SandboxError::Runtime(format!("ReferenceError: {} is not defined", expression))
                });
        }

        if !self.delay.is_zero() {
            let wait = self.delay.min(self.budget.timeout);
            tokio::select! {
                _ = self.budget.cancel.cancelled() => return Err(SandboxError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
            if self.delay > self.budget.timeout {
                return Err(SandboxError::Timeout {
                    limit_ms: self.budget.limit_ms(),
                });
            }
        }

        (self.behaviour)(&mut self.args)
    }
}

impl Drop for FakeSandbox {
    fn drop(&mut self) {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
    }
}
