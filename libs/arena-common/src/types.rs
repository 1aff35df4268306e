use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "Easy"),
            Difficulty::Medium => write!(f, "Medium"),
            Difficulty::Hard => write!(f, "Hard"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Example {
    pub input: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Positional arguments for one call plus the value it should produce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: Vec<Value>,
    #[serde(default)]
    pub expected_output: Value,
}

/// How an actual output is matched against the expected one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonStrategy {
    /// Canonical structural equality, array order matters
    #[default]
    Exact,
    /// Both arrays are sorted before comparing
    Sorted,
    /// Both arrays are sorted and deduplicated before comparing
    Set,
}

/// Where the effective output of a call comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputContract {
    /// The call's return value, even when it is `undefined`
    ReturnValue,
    /// The first argument as left by the call ("modify in place, return nothing")
    MutatedFirstArgument,
    /// The return value, falling back to the first argument when nothing is returned
    #[default]
    ReturnOrMutated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub description: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    pub starter_code: String,
    #[serde(default)]
    pub examples: Vec<Example>,
    pub test_cases: Vec<TestCase>,
    pub solution_function_name: String,
    #[serde(default)]
    pub comparison: ComparisonStrategy,
    #[serde(default)]
    pub output_contract: OutputContract,
}

impl Problem {
    /// Build a grading request for `code` against this problem's fixtures
    pub fn submission(&self, code: impl Into<String>) -> Submission {
        Submission {
            code: code.into(),
            test_cases: self.test_cases.clone(),
            function_name: self.solution_function_name.clone(),
            comparison: self.comparison,
            output_contract: self.output_contract,
            timeout_ms: None,
        }
    }
}

/// A grading request as it arrives from the transport layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub code: String,
    pub test_cases: Vec<TestCase>,
    pub function_name: String,
    #[serde(default)]
    pub comparison: ComparisonStrategy,
    #[serde(default)]
    pub output_contract: OutputContract,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    WrongAnswer,
    RuntimeError,
    TimeLimitExceeded,
    Cancelled,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::WrongAnswer => write!(f, "wrong_answer"),
            TestStatus::RuntimeError => write!(f, "runtime_error"),
            TestStatus::TimeLimitExceeded => write!(f, "time_limit_exceeded"),
            TestStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub test_case_index: usize,
    pub input: String,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: TestStatus,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Accepted,
    Rejected,
    CompilationError,
    Cancelled,
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionStatus::Accepted => write!(f, "accepted"),
            SubmissionStatus::Rejected => write!(f, "rejected"),
            SubmissionStatus::CompilationError => write!(f, "compilation_error"),
            SubmissionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Final verdict for one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub success: bool,
    pub status: SubmissionStatus,
    pub message: String,
    pub results: Vec<TestCaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl SubmissionResult {
    /// Verdict for a submission rejected before any test case ran
    pub fn compilation_error(details: impl fmt::Display) -> Self {
        Self {
            success: false,
            status: SubmissionStatus::CompilationError,
            message: format!("Compilation Error: {}", details),
            results: Vec::new(),
            execution_time_ms: None,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submission_request_defaults() {
        let submission: Submission = serde_json::from_value(json!({
            "code": "function twoSum(nums, target) { return [0, 1]; }",
            "testCases": [{ "input": [[2, 7, 11, 15], 9], "expectedOutput": [0, 1] }],
            "functionName": "twoSum"
        }))
        .unwrap();

        assert_eq!(submission.function_name, "twoSum");
        assert_eq!(submission.test_cases.len(), 1);
        assert_eq!(submission.test_cases[0].input[1], json!(9));
        assert_eq!(submission.comparison, ComparisonStrategy::Exact);
        assert_eq!(submission.output_contract, OutputContract::ReturnOrMutated);
        assert_eq!(submission.timeout_ms, None);
    }

    #[test]
    fn test_submission_declared_strategies() {
        let submission: Submission = serde_json::from_value(json!({
            "code": "",
            "testCases": [],
            "functionName": "reverseString",
            "comparison": "sorted",
            "outputContract": "mutatedFirstArgument",
            "timeoutMs": 500
        }))
        .unwrap();

        assert_eq!(submission.comparison, ComparisonStrategy::Sorted);
        assert_eq!(submission.output_contract, OutputContract::MutatedFirstArgument);
        assert_eq!(submission.timeout_ms, Some(500));
    }

    #[test]
    fn test_missing_expected_output_is_null() {
        let case: TestCase = serde_json::from_value(json!({ "input": [1] })).unwrap();
        assert_eq!(case.expected_output, Value::Null);
    }

    #[test]
    fn test_compilation_error_shape() {
        let result = SubmissionResult::compilation_error("Function 'twoSum' not found in your code.");
        let wire = serde_json::to_value(&result).unwrap();

        assert_eq!(wire["success"], json!(false));
        assert_eq!(wire["status"], json!("compilation_error"));
        assert_eq!(
            wire["message"],
            json!("Compilation Error: Function 'twoSum' not found in your code.")
        );
        assert_eq!(wire["results"], json!([]));
        assert!(wire.get("executionTimeMs").is_none());
    }

    #[test]
    fn test_case_result_wire_format() {
        let result = TestCaseResult {
            test_case_index: 2,
            input: "[[3,3],6]".to_string(),
            expected: "[0,1]".to_string(),
            actual: "[0,1]".to_string(),
            passed: true,
            error: None,
            status: TestStatus::Passed,
            execution_time_ms: 12,
        };
        let wire = serde_json::to_value(&result).unwrap();

        assert_eq!(wire["testCaseIndex"], json!(2));
        assert_eq!(wire["status"], json!("passed"));
        assert_eq!(wire["executionTimeMs"], json!(12));
        assert!(wire.get("error").is_none());
    }

    #[test]
    fn test_problem_submission_carries_contract() {
        let problem: Problem = serde_json::from_value(json!({
            "id": "reverse-string",
            "title": "Reverse a String",
            "difficulty": "Easy",
            "description": "Reverse in place.",
            "starterCode": "var reverseString = function(s) {};",
            "testCases": [{ "input": [["a", "b"]], "expectedOutput": ["b", "a"] }],
            "solutionFunctionName": "reverseString",
            "outputContract": "mutatedFirstArgument"
        }))
        .unwrap();

        let submission = problem.submission("var reverseString = function(s) { s.reverse(); };");
        assert_eq!(submission.function_name, "reverseString");
        assert_eq!(submission.output_contract, OutputContract::MutatedFirstArgument);
        assert_eq!(submission.comparison, ComparisonStrategy::Exact);
        assert_eq!(submission.test_cases, problem.test_cases);
    }
}
