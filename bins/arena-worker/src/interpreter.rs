//! Script Interpreter - The Inside of a Sandbox
//!
//! Hosts one boa_engine context and serves the sandbox wire protocol over a
//! pair of byte streams. It runs inside the sandbox process, never in the
//! judge: the judge only sees replies, and kills the process when a request
//! outlives its budget.
//!
//! boa_engine ships no filesystem, network, timer or process APIs, so the
//! namespace a submission runs in holds nothing but the ECMAScript builtins.

use anyhow::{Context as _, Result};
use arena_common::config::{DEFAULT_RECURSION_LIMIT, DEFAULT_STACK_SIZE_LIMIT};
use arena_common::protocol::{SandboxReply, SandboxRequest, ScriptValue};
use boa_engine::{Context, JsError, JsValue, Source};
use serde_json::Value;
use std::io::{BufRead, Write};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The script threw or hit a language-level error
    #[error("{0}")]
    Thrown(String),

    #[error("'{0}' is not a valid binding name")]
    InvalidBinding(String),

    #[error("Result could not be read back: {0}")]
    Unreadable(String),
}

/// Interpreter limits applied to every sandbox context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    /// Nested calls before a RangeError
    pub recursion: usize,
    /// Value stack slots; deep recursion needs a few per frame
    pub stack_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            recursion: DEFAULT_RECURSION_LIMIT,
            stack_size: DEFAULT_STACK_SIZE_LIMIT,
        }
    }
}

/// A private global namespace
pub struct ScriptContext {
    context: Context,
}

impl ScriptContext {
    pub fn new(limits: ScriptLimits) -> Self {
        let mut context = Context::default();
        let runtime_limits = context.runtime_limits_mut();
        runtime_limits.set_recursion_limit(limits.recursion);
        runtime_limits.set_stack_size_limit(limits.stack_size);
        Self { context }
    }

    /// Run declarations at global scope
    pub fn define(&mut self, source: &str) -> Result<(), ScriptError> {
        self.run(source).map(|_| ())
    }

    /// Bind a JSON value to a global `var`
    pub fn bind(&mut self, name: &str, value: &Value) -> Result<(), ScriptError> {
        if !is_binding_name(name) {
            return Err(ScriptError::InvalidBinding(name.to_string()));
        }
        // A JSON string literal is also a valid JS string literal
        let literal = serde_json::to_string(&value.to_string())
            .map_err(|e| ScriptError::Unreadable(e.to_string()))?;
        self.run(&format!("var {} = JSON.parse({});", name, literal))
            .map(|_| ())
    }

    /// Evaluate an expression and read its result back as JSON
    pub fn evaluate(&mut self, expression: &str) -> Result<ScriptValue, ScriptError> {
        let script = format!(
            "(function () {{\n\
             var __arena_value = ({});\n\
             if (__arena_value === undefined) {{ return undefined; }}\n\
             var __arena_text = JSON.stringify(__arena_value);\n\
             return __arena_text === undefined ? 'null' : __arena_text;\n\
             }})()",
            expression
        );
        let result = self.run(&script)?;
        if result.is_undefined() {
            return Ok(ScriptValue::Undefined);
        }

        let text = result
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .ok_or_else(|| ScriptError::Unreadable("expected serialized text".to_string()))?;
        let value = serde_json::from_str(&text).map_err(|e| ScriptError::Unreadable(e.to_string()))?;
        Ok(ScriptValue::Json(value))
    }

    /// Serve one protocol request
    pub fn handle(&mut self, request: SandboxRequest) -> SandboxReply {
        let outcome = match request {
            SandboxRequest::Define { source } => self.define(&source).map(|_| SandboxReply::Done),
            SandboxRequest::Bind { name, value } => {
                self.bind(&name, &value).map(|_| SandboxReply::Done)
            }
            SandboxRequest::Evaluate { expression } => self
                .evaluate(&expression)
                .map(|value| SandboxReply::Value { value }),
        };
        outcome.unwrap_or_else(|e| SandboxReply::Error {
            message: e.to_string(),
        })
    }

    fn run(&mut self, script: &str) -> Result<JsValue, ScriptError> {
        match self.context.eval(Source::from_bytes(script)) {
            Ok(value) => Ok(value),
            Err(err) => Err(ScriptError::Thrown(describe(err, &mut self.context))),
        }
    }
}

fn describe(err: JsError, context: &mut Context) -> String {
    match err.try_native(context) {
        Ok(native) => native.to_string(),
        Err(_) => err.to_string(),
    }
}

fn is_binding_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Serve the sandbox protocol until `input` is exhausted
///
/// Writes the ready handshake first, then exactly one reply line per
/// non-empty request line.
pub fn serve<R: BufRead, W: Write>(input: R, mut output: W, limits: ScriptLimits) -> Result<()> {
    let mut script = ScriptContext::new(limits);
    write_reply(&mut output, &SandboxReply::Ready)?;

    for line in input.lines() {
        let line = line.context("Failed to read sandbox request")?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<SandboxRequest>(&line) {
            Ok(request) => script.handle(request),
            Err(e) => SandboxReply::Error {
                message: format!("Malformed sandbox request: {}", e),
            },
        };
        write_reply(&mut output, &reply)?;
    }
    Ok(())
}

fn write_reply<W: Write>(output: &mut W, reply: &SandboxReply) -> Result<()> {
    serde_json::to_writer(&mut *output, reply).context("Failed to encode sandbox reply")?;
    output.write_all(b"\n")?;
    output.flush().context("Failed to flush sandbox reply")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ScriptContext {
        ScriptContext::new(ScriptLimits::default())
    }

    /// Sandbox processes run the interpreter on a large dedicated stack
    fn on_sandbox_stack<T: Send + 'static>(work: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(work)
            .unwrap()
            .join()
            .unwrap()
    }

    const DEPTH: &str = "function depth(n) { return n === 0 ? 0 : 1 + depth(n - 1); }";

    #[test]
    fn test_define_and_call() {
        let mut script = context();
        script
            .define("var twoSum = function(nums, target) { var m = {}; for (var i = 0; i < nums.length; i++) { if (m[target - nums[i]] !== undefined) { return [m[target - nums[i]], i]; } m[nums[i]] = i; } };")
            .unwrap();
        script.bind("arg0", &json!([2, 7, 11, 15])).unwrap();
        script.bind("arg1", &json!(9)).unwrap();

        let result = script.evaluate("twoSum(arg0, arg1)").unwrap();
        assert_eq!(result, ScriptValue::Json(json!([0, 1])));
    }

    #[test]
    fn test_lexical_declaration_published_on_global() {
        let mut script = context();
        script
            .define("const square = (x) => x * x;\nglobalThis.square = square;\n")
            .unwrap();
        assert_eq!(
            script.evaluate("square(7)").unwrap(),
            ScriptValue::Json(json!(49))
        );
    }

    #[test]
    fn test_in_place_mutation_is_visible() {
        let mut script = context();
        script
            .define("function reverseString(s) { s.reverse(); }")
            .unwrap();
        script.bind("arg0", &json!(["h", "e", "l", "l", "o"])).unwrap();

        assert_eq!(
            script.evaluate("reverseString(arg0)").unwrap(),
            ScriptValue::Undefined
        );
        assert_eq!(
            script.evaluate("arg0").unwrap(),
            ScriptValue::Json(json!(["o", "l", "l", "e", "h"]))
        );
    }

    #[test]
    fn test_null_is_not_undefined() {
        let mut script = context();
        assert_eq!(script.evaluate("null").unwrap(), ScriptValue::Json(Value::Null));
        assert_eq!(script.evaluate("void 0").unwrap(), ScriptValue::Undefined);
        assert_eq!(
            script.evaluate("function () {}").unwrap(),
            ScriptValue::Json(Value::Null)
        );
    }

    #[test]
    fn test_bound_strings_are_not_code() {
        let mut script = context();
        let payload = json!({ "text": "'); throw new Error('escaped'); ('", "line": "a\u{2028}b" });
        script.bind("arg0", &payload).unwrap();
        assert_eq!(script.evaluate("arg0").unwrap(), ScriptValue::Json(payload));
    }

    #[test]
    fn test_thrown_error_is_reported() {
        let mut script = context();
        script
            .define("function explode() { throw new Error('boom'); }")
            .unwrap();
        let err = script.evaluate("explode()").unwrap_err();
        assert!(matches!(err, ScriptError::Thrown(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_missing_helper_is_a_reference_error() {
        let mut script = context();
        script.define("function solve(x) { return helper(x); }").unwrap();
        let err = script.evaluate("solve(1)").unwrap_err();
        assert!(err.to_string().contains("helper"));
    }

    #[test]
    fn test_syntax_error_on_define() {
        let mut script = context();
        assert!(matches!(
            script.define("function broken( {"),
            Err(ScriptError::Thrown(_))
        ));
    }

    #[test]
    fn test_invalid_binding_name() {
        let mut script = context();
        let err = script.bind("arg0; evil()", &json!(1)).unwrap_err();
        assert_eq!(err, ScriptError::InvalidBinding("arg0; evil()".to_string()));
    }

    #[test]
    fn test_recursion_limit() {
        let mut script = ScriptContext::new(ScriptLimits {
            recursion: 64,
            ..ScriptLimits::default()
        });
        script.define("function down(n) { return down(n + 1); }").unwrap();
        assert!(script.evaluate("down(0)").is_err());
    }

    #[test]
    fn test_deep_recursion_within_default_limits() {
        let results = on_sandbox_stack(|| {
            let mut script = context();
            script.define(DEPTH).unwrap();
            ["depth(600)", "depth(2000)", "depth(5000)"].map(|call| script.evaluate(call))
        });

        assert_eq!(results[0], Ok(ScriptValue::Json(json!(600))));
        assert_eq!(results[1], Ok(ScriptValue::Json(json!(2000))));
        assert_eq!(results[2], Ok(ScriptValue::Json(json!(5000))));
    }

    #[test]
    fn test_stack_size_limit() {
        let result = on_sandbox_stack(|| {
            let mut script = ScriptContext::new(ScriptLimits {
                recursion: 100_000,
                stack_size: 1024,
            });
            script.define(DEPTH).unwrap();
            script.evaluate("depth(2000)")
        });

        assert!(matches!(result, Err(ScriptError::Thrown(_))));
    }

    #[test]
    fn test_unbounded_recursion_is_an_error() {
        let result = on_sandbox_stack(|| {
            let mut script = context();
            script.define("function down(n) { return down(n + 1); }").unwrap();
            script.evaluate("down(0)")
        });

        assert!(matches!(result, Err(ScriptError::Thrown(_))));
    }

    #[test]
    fn test_no_host_capabilities() {
        let mut script = context();
        for global in ["require", "process", "fetch", "setTimeout", "Deno"] {
            assert_eq!(
                script.evaluate(&format!("typeof {}", global)).unwrap(),
                ScriptValue::Json(json!("undefined")),
                "{} must not be reachable",
                global
            );
        }
    }

    #[test]
    fn test_contexts_do_not_share_globals() {
        let mut first = context();
        let mut second = context();
        first.define("var leaked = 42;").unwrap();

        assert_eq!(first.evaluate("leaked").unwrap(), ScriptValue::Json(json!(42)));
        assert!(second.evaluate("leaked").is_err());
    }

    #[test]
    fn test_serve_protocol() {
        let input = [
            r#"{"op":"define","source":"function add(a, b) { return a + b; }"}"#,
            "",
            r#"{"op":"bind","name":"arg0","value":2}"#,
            r#"{"op":"evaluate","expression":"add(arg0, 3)"}"#,
            r#"{"op":"launch"}"#,
            r#"{"op":"evaluate","expression":"add(missing, 1)"}"#,
        ]
        .join("\n");
        let mut output = Vec::new();

        serve(input.as_bytes(), &mut output, ScriptLimits::default()).unwrap();

        let replies: Vec<SandboxReply> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(replies.len(), 6);
        assert_eq!(replies[0], SandboxReply::Ready);
        assert_eq!(replies[1], SandboxReply::Done);
        assert_eq!(replies[2], SandboxReply::Done);
        assert_eq!(
            replies[3],
            SandboxReply::Value {
                value: ScriptValue::Json(json!(5))
            }
        );
        assert!(matches!(&replies[4], SandboxReply::Error { message } if message.starts_with("Malformed")));
        assert!(matches!(&replies[5], SandboxReply::Error { .. }));
    }
}
