//! Scenario and property validation for the autonomy core: each published
//! scenario asserts a claim against a measured outcome, independent of the
//! per-module unit tests carried alongside the core crate's own source.

pub mod invariants;
pub mod scenarios;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub claim: String,
    pub target: String,
    pub measured: String,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub fn overall_pass(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn pass_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }
}

pub fn run_all() -> ValidationReport {
    let mut results = scenarios::run_all();
    results.extend(invariants::run_all());
    ValidationReport { results }
}
