//! Result Evaluator - Strategy-Aware Output Comparison
//!
//! **Core Responsibility:**
//! Compare actual outputs against expected outputs and build per-case and
//! per-submission verdicts.
//!
//! **Critical Properties:**
//! - Knows nothing about sandbox processes
//! - Knows nothing about the interpreter
//! - Pure function: (case outcome, fixture, strategy) → verdict
//!
//! **Normalization Rules:**
//! - Integral floats equal integers (`1.0 == 1`), as `JSON.stringify` renders them
//! - Object key order: ignored
//! - Array order: significant under `exact`, ignored under `sorted` and `set`
//! - `undefined` never equals anything, including `null`

use crate::engine::SandboxError;
use crate::runner::CaseOutcome;
use arena_common::protocol::ScriptValue;
use arena_common::types::{
    ComparisonStrategy, SubmissionResult, SubmissionStatus, TestCase, TestCaseResult, TestStatus,
};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::time::Duration;

/// Largest magnitude at which every integral f64 is exactly representable
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

pub const RUNTIME_ERROR_ACTUAL: &str = "Runtime Error";
pub const NOT_EXECUTED_ACTUAL: &str = "Not executed";

/// Canonical form of a JSON value
///
/// Integral floating-point numbers become integers, recursively.
pub fn canonical(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(canonical_number(n)),
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonical(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn canonical_number(n: &Number) -> Number {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER {
                return Number::from(f as i64);
            }
        }
    }
    n.clone()
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over canonical JSON values
///
/// null < booleans < numbers < strings < arrays < objects; numbers compare
/// numerically, containers element-wise.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(l, r)| compare_values(l, r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => {
            let mut left: Vec<_> = x.iter().collect();
            let mut right: Vec<_> = y.iter().collect();
            left.sort_by(|l, r| l.0.cmp(r.0));
            right.sort_by(|l, r| l.0.cmp(r.0));
            left.iter()
                .zip(&right)
                .map(|((lk, lv), (rk, rv))| lk.cmp(rk).then_with(|| compare_values(lv, rv)))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| left.len().cmp(&right.len()))
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    if let (Some(l), Some(r)) = (x.as_i64(), y.as_i64()) {
        return l.cmp(&r);
    }
    if let (Some(l), Some(r)) = (x.as_u64(), y.as_u64()) {
        return l.cmp(&r);
    }
    let l = x.as_f64().unwrap_or(f64::NAN);
    let r = y.as_f64().unwrap_or(f64::NAN);
    l.total_cmp(&r)
}

fn sorted(items: &[Value]) -> Vec<Value> {
    let mut items: Vec<Value> = items.iter().map(canonical).collect();
    items.sort_by(compare_values);
    items
}

/// Decide whether an actual output matches the expected one
pub fn outputs_match(actual: &ScriptValue, expected: &Value, strategy: ComparisonStrategy) -> bool {
    let actual = match actual {
        ScriptValue::Undefined => return false,
        ScriptValue::Json(value) => value,
    };

    match (strategy, actual, expected) {
        (ComparisonStrategy::Sorted, Value::Array(a), Value::Array(e)) => sorted(a) == sorted(e),
        (ComparisonStrategy::Set, Value::Array(a), Value::Array(e)) => {
            let mut a = sorted(a);
            let mut e = sorted(e);
            a.dedup();
            e.dedup();
            a == e
        }
        _ => canonical(actual) == canonical(expected),
    }
}

fn display_input(case: &TestCase) -> String {
    Value::Array(case.input.clone()).to_string()
}

/// Evaluate a single test case outcome
///
/// Execution failures take priority over comparison: a case that threw, timed
/// out or never started records `actual = "Runtime Error"` plus the error.
///
/// ## Arguments
/// * `index` - Position of the case in the submission
/// * `case` - Pristine fixture, used for the serialized input and expected output
/// * `outcome` - Raw outcome from the runner
/// * `strategy` - Declared comparison strategy
pub fn evaluate_case(
    index: usize,
    case: &TestCase,
    outcome: &CaseOutcome,
    strategy: ComparisonStrategy,
) -> TestCaseResult {
    let execution_time_ms = outcome.elapsed.as_millis() as u64;

    match &outcome.output {
        Ok(actual) => {
            let passed = outputs_match(actual, &case.expected_output, strategy);
            TestCaseResult {
                test_case_index: index,
                input: display_input(case),
                expected: case.expected_output.to_string(),
                actual: actual.to_display(),
                passed,
                error: None,
                status: if passed {
                    TestStatus::Passed
                } else {
                    TestStatus::WrongAnswer
                },
                execution_time_ms,
            }
        }
        Err(SandboxError::Cancelled) => cancelled_case(index, case),
        Err(err) => TestCaseResult {
            test_case_index: index,
            input: display_input(case),
            expected: case.expected_output.to_string(),
            actual: RUNTIME_ERROR_ACTUAL.to_string(),
            passed: false,
            error: Some(err.to_string()),
            status: match err {
                SandboxError::Timeout { .. } => TestStatus::TimeLimitExceeded,
                _ => TestStatus::RuntimeError,
            },
            execution_time_ms,
        },
    }
}

/// Result for a case that was not run to completion because grading was cancelled
pub fn cancelled_case(index: usize, case: &TestCase) -> TestCaseResult {
    TestCaseResult {
        test_case_index: index,
        input: display_input(case),
        expected: case.expected_output.to_string(),
        actual: NOT_EXECUTED_ACTUAL.to_string(),
        passed: false,
        error: Some(SandboxError::Cancelled.to_string()),
        status: TestStatus::Cancelled,
        execution_time_ms: 0,
    }
}

/// Aggregate per-case results into the final verdict
///
/// - success: every case passed and nothing was cancelled (vacuously true for no cases)
/// - status: Cancelled if any case was cancelled, else Accepted or Rejected
pub fn aggregate_results(results: Vec<TestCaseResult>, elapsed: Duration) -> SubmissionResult {
    let total = results.len();
    let passed = results.iter().filter(|r| r.passed).count();
    let cancelled = results.iter().any(|r| r.status == TestStatus::Cancelled);

    let (success, status, message) = if cancelled {
        (
            false,
            SubmissionStatus::Cancelled,
            format!(
                "Execution cancelled: {}/{} test cases passed before cancellation",
                passed, total
            ),
        )
    } else {
        let success = passed == total;
        (
            success,
            if success {
                SubmissionStatus::Accepted
            } else {
                SubmissionStatus::Rejected
            },
            format!("Execution completed: {}/{} test cases passed", passed, total),
        )
    };

    SubmissionResult {
        success,
        status,
        message,
        results,
        execution_time_ms: Some(elapsed.as_millis() as u64),
    }
}
