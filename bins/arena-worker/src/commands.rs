// CLI commands for grading submissions and inspecting fixtures
use crate::config::ProblemCatalog;
use crate::extractor::{ExtractedFunction, Extractor};
use anyhow::{Context, Result};
use arena_common::types::Submission;
use std::fs;
use std::io;
use std::path::Path;

/// Read a grading request from a file, or from stdin when `source` is `-`
pub fn read_request(source: &str) -> Result<Submission> {
    let content = if source == "-" {
        io::read_to_string(io::stdin()).context("Failed to read request from stdin")?
    } else {
        fs::read_to_string(source).with_context(|| format!("Failed to read request {}", source))?
    };

    serde_json::from_str(&content).with_context(|| format!("Failed to parse request {}", source))
}

/// Build a grading request for a catalog problem from a source file
pub fn problem_submission(catalog_path: &Path, problem_id: &str, code_path: &Path) -> Result<Submission> {
    let catalog = ProblemCatalog::load(catalog_path)?;
    let problem = catalog.get(problem_id)?;
    let code = fs::read_to_string(code_path)
        .with_context(|| format!("Failed to read source {}", code_path.display()))?;

    Ok(problem.submission(code))
}

/// Extract the named entry point from a source file
pub fn extract(code_path: &Path, function_name: &str, max_source_bytes: usize) -> Result<ExtractedFunction> {
    let code = fs::read_to_string(code_path)
        .with_context(|| format!("Failed to read source {}", code_path.display()))?;

    Extractor::new(max_source_bytes)
        .extract(&code, function_name)
        .with_context(|| format!("Failed to extract '{}' from {}", function_name, code_path.display()))
}

/// One summary line per catalog problem
pub fn list_problems(catalog_path: &Path) -> Result<Vec<String>> {
    let catalog = ProblemCatalog::load(catalog_path)?;

    Ok(catalog
        .list()
        .iter()
        .map(|p| {
            format!(
                "{:<16} {:<20} {:<6} {} test cases, entry point {}",
                p.id,
                p.title,
                p.difficulty.to_string(),
                p.test_cases.len(),
                p.solution_function_name
            )
        })
        .collect())
}
