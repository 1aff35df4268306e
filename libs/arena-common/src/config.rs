// Judge configuration
// Loaded from config/judge.json when present, then overridden from ARENA_* env vars

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/judge.json";

/// Nested calls a sandbox allows before raising a runtime error
pub const DEFAULT_RECURSION_LIMIT: usize = 10_000;

/// Interpreter value stack slots a sandbox allows, sized for the default recursion depth
pub const DEFAULT_STACK_SIZE_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    /// Wall-clock budget for one test case, after the sandbox is ready
    pub timeout_ms: u64,
    /// Upper bound for per-submission timeout overrides
    pub max_timeout_ms: u64,
    /// Budget for spawning a sandbox and receiving its ready handshake
    pub startup_timeout_ms: u64,
    /// Sandboxes allowed to be alive at once across all submissions
    pub max_concurrent_sandboxes: usize,
    pub max_source_bytes: usize,
    /// Largest single reply accepted from a sandbox
    pub max_output_bytes: usize,
    pub recursion_limit: usize,
    pub stack_size_limit: usize,
    /// Address space cap for each sandbox process; 0 disables it
    pub max_memory_mb: u64,
    /// Executable serving the sandbox protocol; the running binary when unset
    pub sandbox_program: Option<PathBuf>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            max_timeout_ms: 10_000,
            startup_timeout_ms: 5000,
            max_concurrent_sandboxes: 4,
            max_source_bytes: 1024 * 1024,
            max_output_bytes: 1024 * 1024,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            stack_size_limit: DEFAULT_STACK_SIZE_LIMIT,
            max_memory_mb: 512,
            sandbox_program: None,
        }
    }
}

impl JudgeConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read judge config {}", path.display()))?;

        let config: JudgeConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse judge config {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise start from defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply ARENA_* overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides resolved through `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("ARENA_TIMEOUT_MS") {
            self.timeout_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid ARENA_TIMEOUT_MS: {}", raw))?;
        }
        if let Some(raw) = lookup("ARENA_MAX_SANDBOXES") {
            self.max_concurrent_sandboxes = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid ARENA_MAX_SANDBOXES: {}", raw))?;
        }
        if let Some(raw) = lookup("ARENA_MAX_MEMORY_MB") {
            self.max_memory_mb = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid ARENA_MAX_MEMORY_MB: {}", raw))?;
        }
        if let Some(raw) = lookup("ARENA_SANDBOX_PROGRAM") {
            if !raw.trim().is_empty() {
                self.sandbox_program = Some(PathBuf::from(raw.trim()));
            }
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.max_timeout_ms < self.timeout_ms {
            bail!(
                "max_timeout_ms ({}) must not be below timeout_ms ({})",
                self.max_timeout_ms,
                self.timeout_ms
            );
        }
        if self.max_concurrent_sandboxes == 0 {
            bail!("max_concurrent_sandboxes must be at least 1");
        }
        if self.recursion_limit == 0 {
            bail!("recursion_limit must be at least 1");
        }
        if self.stack_size_limit == 0 {
            bail!("stack_size_limit must be at least 1");
        }
        Ok(())
    }

    /// Per-case budget, honouring a request override within `max_timeout_ms`
    pub fn case_timeout(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .filter(|ms| *ms > 0)
            .map(|ms| ms.min(self.max_timeout_ms))
            .unwrap_or(self.timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn memory_limit_bytes(&self) -> Option<u64> {
        (self.max_memory_mb > 0).then(|| self.max_memory_mb.saturating_mul(1024 * 1024))
    }
}
