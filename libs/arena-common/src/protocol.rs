//! Sandbox wire semantics - defines only the message shapes, not runtime logic
//! Ensures the judge and the sandbox process never drift: every message is a
//! single JSON object on its own line, requests on the child's stdin and
//! replies on its stdout, strictly one reply per request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subcommand that turns the worker binary into a sandbox process
pub const SANDBOX_SUBCOMMAND: &str = "sandbox";

/// Flag used to pass the interpreter recursion limit to a sandbox process
pub const RECURSION_LIMIT_FLAG: &str = "--recursion-limit";

/// Flag used to pass the interpreter value stack limit to a sandbox process
pub const STACK_SIZE_LIMIT_FLAG: &str = "--stack-size-limit";

/// Prefix reserved for names the judge creates inside a sandbox namespace
pub const RESERVED_PREFIX: &str = "__arena_";

/// Prefix for names bound by the judge into a sandbox namespace
pub const ARGUMENT_PREFIX: &str = "__arena_arg";

/// Generated global name for the positional argument at `index`
pub fn argument_name(index: usize) -> String {
    format!("{}{}", ARGUMENT_PREFIX, index)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SandboxRequest {
    /// Install declarations into the sandbox namespace
    Define { source: String },
    /// Bind a JSON value under a global name
    Bind { name: String, value: Value },
    /// Evaluate an expression against the namespace
    Evaluate { expression: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SandboxReply {
    /// Sent once the interpreter is initialized, before any request is read
    Ready,
    /// Define or bind completed
    Done,
    /// Result of an evaluation
    Value { value: ScriptValue },
    /// The script threw or the request could not be served
    Error { message: String },
}

/// A script result as seen from outside the sandbox
///
/// `undefined` has no JSON encoding, so it is carried as its own variant
/// instead of collapsing into `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ScriptValue {
    Undefined,
    Json(Value),
}

impl ScriptValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, ScriptValue::Undefined)
    }

    /// Display form used in verdicts, mirroring `JSON.stringify`
    pub fn to_display(&self) -> String {
        match self {
            ScriptValue::Undefined => "undefined".to_string(),
            ScriptValue::Json(value) => value.to_string(),
        }
    }
}
