//! Sandbox Runtime - Isolated, Time-Bounded Script Execution
//!
//! **Core Responsibility:**
//! Provide a private script namespace per unit of work and enforce its
//! wall-clock budget.
//!
//! **Architectural Boundary:**
//! - The runtime knows HOW to execute (a child process serving the sandbox protocol)
//! - It does NOT know test cases, output contracts or scoring rules
//! - It returns raw script values for the runner and evaluator to interpret
//!
//! Every sandbox is a fresh child process with a cleared environment, the
//! temp dir as working directory and `kill_on_drop` set. On unix its address
//! space is capped with `RLIMIT_AS` and core dumps are disabled before exec.
//! A request that outlives the budget, or a cancelled one, kills the child
//! on the spot.

use crate::interpreter::ScriptLimits;
use arena_common::protocol::{self, SandboxReply, SandboxRequest, ScriptValue};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
const EXIT_STATUS_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    #[error("Time Limit Exceeded: execution exceeded {limit_ms} ms")]
    Timeout { limit_ms: u64 },

    /// The submitted code threw, or the sandbox died under it
    #[error("{0}")]
    Runtime(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Sandbox failed to start: {0}")]
    Launch(String),

    #[error("Sandbox protocol error: {0}")]
    Protocol(String),
}

/// Limits applied to one unit of work
#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    /// Wall-clock budget shared by every request, starting at the ready handshake
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl ExecutionBudget {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    pub fn limit_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

/// A private global namespace that runs untrusted code
#[async_trait]
pub trait Sandbox: Send {
    /// Install declarations at global scope
    async fn define(&mut self, source: &str) -> Result<(), SandboxError>;

    /// Bind a JSON value under a global name
    async fn bind(&mut self, name: &str, value: &Value) -> Result<(), SandboxError>;

    /// Evaluate an expression and read its result back
    async fn evaluate(&mut self, expression: &str) -> Result<ScriptValue, SandboxError>;
}

/// Creates one sandbox per unit of work
#[async_trait]
pub trait SandboxLauncher: Send + Sync {
    async fn launch(&self, budget: ExecutionBudget) -> Result<Box<dyn Sandbox>, SandboxError>;
}

/// Launches sandboxes as child processes speaking the line protocol
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    startup_timeout: Duration,
    max_output_bytes: usize,
    memory_limit_bytes: Option<u64>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            memory_limit_bytes: None,
        }
    }

    /// Launcher for a worker binary, entered through its sandbox subcommand
    pub fn worker(program: impl Into<PathBuf>, limits: ScriptLimits) -> Self {
        Self::new(program).with_args([
            protocol::SANDBOX_SUBCOMMAND.to_string(),
            protocol::RECURSION_LIMIT_FLAG.to_string(),
            limits.recursion.to_string(),
            protocol::STACK_SIZE_LIMIT_FLAG.to_string(),
            limits.stack_size.to_string(),
        ])
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = startup_timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Cap the address space of every sandbox process
    pub fn with_memory_limit(mut self, memory_limit_bytes: Option<u64>) -> Self {
        self.memory_limit_bytes = memory_limit_bytes;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn spawn(&self) -> Result<Child, SandboxError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env_clear()
            .current_dir(std::env::temp_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let memory_limit = self.memory_limit_bytes;
            // SAFETY: the hook only issues setrlimit syscalls, which are async-signal-safe
            unsafe {
                command.pre_exec(move || apply_rlimits(memory_limit));
            }
        }

        command
            .spawn()
            .map_err(|e| SandboxError::Launch(format!("{}: {}", self.program.display(), e)))
    }
}

/// Resource limits applied in the child between fork and exec
#[cfg(unix)]
fn apply_rlimits(memory_limit: Option<u64>) -> std::io::Result<()> {
    use nix::sys::resource::{setrlimit, Resource};

    setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(std::io::Error::from)?;
    if let Some(bytes) = memory_limit {
        setrlimit(Resource::RLIMIT_AS, bytes, bytes).map_err(std::io::Error::from)?;
    }
    Ok(())
}

#[async_trait]
impl SandboxLauncher for ProcessLauncher {
    #[tracing::instrument(skip_all, fields(limit_ms = budget.limit_ms()))]
    async fn launch(&self, budget: ExecutionBudget) -> Result<Box<dyn Sandbox>, SandboxError> {
        if budget.cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        let mut child = self.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Launch("stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Launch("stdout was not captured".to_string()))?;
        debug!(pid = ?child.id(), "Sandbox process spawned");

        let mut sandbox = ProcessSandbox {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            deadline: Instant::now() + self.startup_timeout,
            limit_ms: budget.limit_ms(),
            cancel: budget.cancel,
            max_output_bytes: self.max_output_bytes,
        };

        match sandbox.receive().await {
            Ok(SandboxReply::Ready) => {}
            Ok(other) => {
                sandbox.kill();
                return Err(SandboxError::Protocol(format!(
                    "expected ready handshake, got {:?}",
                    other
                )));
            }
            Err(SandboxError::Timeout { .. }) => {
                return Err(SandboxError::Launch(format!(
                    "not ready within {} ms",
                    self.startup_timeout.as_millis()
                )));
            }
            Err(SandboxError::Runtime(message)) => return Err(SandboxError::Launch(message)),
            Err(e) => return Err(e),
        }

        // The execution budget starts once the interpreter is up
        sandbox.deadline = Instant::now() + budget.timeout;
        Ok(Box::new(sandbox))
    }
}

/// A live sandbox process
pub struct ProcessSandbox {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    deadline: Instant,
    limit_ms: u64,
    cancel: CancellationToken,
    max_output_bytes: usize,
}

enum Interrupt {
    Cancelled,
    Elapsed,
}

/// Run `work` until it finishes, the deadline passes or `cancel` fires
async fn guarded<F, T>(deadline: Instant, cancel: &CancellationToken, work: F) -> Result<T, Interrupt>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        result = timeout_at(deadline, work) => result.map_err(|_| Interrupt::Elapsed),
    }
}

impl ProcessSandbox {
    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to kill sandbox process: {}", e);
        }
    }

    fn interrupted(&mut self, interrupt: Interrupt) -> SandboxError {
        self.kill();
        match interrupt {
            Interrupt::Cancelled => {
                debug!("Sandbox killed after cancellation");
                SandboxError::Cancelled
            }
            Interrupt::Elapsed => {
                warn!(limit_ms = self.limit_ms, "Sandbox exceeded its time limit - killed");
                SandboxError::Timeout {
                    limit_ms: self.limit_ms,
                }
            }
        }
    }

    async fn send(&mut self, request: &SandboxRequest) -> Result<(), SandboxError> {
        let mut frame =
            serde_json::to_vec(request).map_err(|e| SandboxError::Protocol(e.to_string()))?;
        frame.push(b'\n');

        let stdin = &mut self.stdin;
        let written = guarded(self.deadline, &self.cancel, async {
            stdin.write_all(&frame).await?;
            stdin.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SandboxError::Runtime(format!(
                "Sandbox process stopped accepting requests: {}",
                e
            ))),
            Err(interrupt) => Err(self.interrupted(interrupt)),
        }
    }

    async fn receive(&mut self) -> Result<SandboxReply, SandboxError> {
        let limit = self.max_output_bytes as u64 + 1;
        let mut line = String::new();

        let stdout = &mut self.stdout;
        let read = guarded(self.deadline, &self.cancel, async {
            stdout.take(limit).read_line(&mut line).await
        })
        .await;

        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(SandboxError::Protocol(format!("unreadable reply: {}", e))),
            Err(interrupt) => return Err(self.interrupted(interrupt)),
        };

        if n == 0 {
            let status = timeout(EXIT_STATUS_GRACE, self.child.wait()).await;
            return Err(SandboxError::Runtime(match status {
                Ok(Ok(status)) if status.success() => {
                    "Sandbox process exited before replying".to_string()
                }
                Ok(Ok(status)) => format!(
                    "Sandbox process crashed ({}); it may have exceeded its memory or stack limit",
                    status
                ),
                _ => "Sandbox process closed its output".to_string(),
            }));
        }
        if n as u64 >= limit && !line.ends_with('\n') {
            self.kill();
            return Err(SandboxError::Protocol(format!(
                "reply exceeds {} bytes",
                self.max_output_bytes
            )));
        }

        serde_json::from_str(line.trim_end())
            .map_err(|e| SandboxError::Protocol(format!("malformed reply: {}", e)))
    }

    async fn exchange(&mut self, request: SandboxRequest) -> Result<SandboxReply, SandboxError> {
        self.send(&request).await?;
        match self.receive().await? {
            SandboxReply::Error { message } => Err(SandboxError::Runtime(message)),
            reply => Ok(reply),
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn define(&mut self, source: &str) -> Result<(), SandboxError> {
        let request = SandboxRequest::Define {
            source: source.to_string(),
        };
        match self.exchange(request).await? {
            SandboxReply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn bind(&mut self, name: &str, value: &Value) -> Result<(), SandboxError> {
        let request = SandboxRequest::Bind {
            name: name.to_string(),
            value: value.clone(),
        };
        match self.exchange(request).await? {
            SandboxReply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn evaluate(&mut self, expression: &str) -> Result<ScriptValue, SandboxError> {
        let request = SandboxRequest::Evaluate {
            expression: expression.to_string(),
        };
        match self.exchange(request).await? {
            SandboxReply::Value { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(reply: SandboxReply) -> SandboxError {
    SandboxError::Protocol(format!("unexpected reply {:?}", reply))
}
