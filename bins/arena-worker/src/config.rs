// Problem catalog fixtures for the Arena worker
use anyhow::{anyhow, bail, Context, Result};
use arena_common::types::Problem;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CATALOG_PATH: &str = "config/problems.json";

#[derive(Debug, Serialize, Deserialize)]
struct ProblemsJson {
    problems: Vec<Problem>,
}

/// Read-only problem catalog, in file order
#[derive(Debug, Clone)]
pub struct ProblemCatalog {
    problems: Vec<Problem>,
}

impl ProblemCatalog {
    /// Load problems from problems.json
    pub fn load(catalog_path: &Path) -> Result<Self> {
        if !catalog_path.exists() {
            bail!("Problem catalog not found: {}", catalog_path.display());
        }

        let content = fs::read_to_string(catalog_path)
            .with_context(|| format!("Failed to read {}", catalog_path.display()))?;

        let catalog: ProblemsJson = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", catalog_path.display()))?;

        for (i, problem) in catalog.problems.iter().enumerate() {
            if catalog.problems[..i].iter().any(|p| p.id == problem.id) {
                bail!("Duplicate problem id in catalog: {}", problem.id);
            }
        }

        Ok(Self {
            problems: catalog.problems,
        })
    }

    pub fn get(&self, id: &str) -> Result<&Problem> {
        self.problems
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| anyhow!("No problem found with id: {}", id))
    }

    pub fn list(&self) -> &[Problem] {
        &self.problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_common::types::{ComparisonStrategy, Difficulty, OutputContract};
    use std::io::Write;
    use std::path::PathBuf;

    fn shipped_catalog() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/problems.json")
    }

    #[test]
    fn test_load_shipped_catalog() {
        let catalog = ProblemCatalog::load(&shipped_catalog()).unwrap();

        let two_sum = catalog.get("two-sum").unwrap();
        assert_eq!(two_sum.solution_function_name, "twoSum");
        assert_eq!(two_sum.difficulty, Difficulty::Easy);
        assert_eq!(two_sum.comparison, ComparisonStrategy::Sorted);
        assert_eq!(two_sum.test_cases.len(), 4);

        let reverse = catalog.get("reverse-string").unwrap();
        assert_eq!(reverse.output_contract, OutputContract::MutatedFirstArgument);

        let ids: Vec<&str> = catalog.list().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["two-sum", "reverse-string"]);
    }

    #[test]
    fn test_unknown_problem() {
        let catalog = ProblemCatalog::load(&shipped_catalog()).unwrap();
        let err = catalog.get("three-sum").unwrap_err();
        assert!(err.to_string().contains("three-sum"));
    }

    #[test]
    fn test_missing_catalog() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ProblemCatalog::load(&dir.path().join("problems.json")).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let problem = r#"{ "id": "p", "title": "P", "difficulty": "Easy", "description": "",
            "starterCode": "", "testCases": [], "solutionFunctionName": "p" }"#;
        write!(file, r#"{{ "problems": [{}, {}] }}"#, problem, problem).unwrap();

        let err = ProblemCatalog::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }
}
