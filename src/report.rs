use std::fmt;
use std::fmt::Write as _;

use serde::Serialize;

use crate::status::BuildStatus;

pub const MAX_BUILD_SCORE: u32 = 100;

/// Why a single test case did not pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseFailure {
    /// Hit the CPU, wall-clock or output ceiling, or failed to allocate under the address-space one
    LimitExceeded(String),
    /// Non-zero exit or fatal signal not attributable to a limit
    RuntimeError(String),
    LaunchFailed(String),
    WrongAnswer { actual: String, expected: String },
}

impl fmt::Display for CaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitExceeded(info) => write!(f, "resource limit exceeded: {info}"),
            Self::RuntimeError(info) => write!(f, "run failed: {info}"),
            Self::LaunchFailed(info) => write!(f, "cannot launch solution: {info}"),
            Self::WrongAnswer { actual, expected } => write!(
                f,
                "output does not match expected:\n--OUTPUT--\n{actual}\n--EXPECTED--\n{expected}"
            ),
        }
    }
}

/// Raw result of one pass through the execution engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Engine fault during setup, nothing was compiled or run
    Exception(String),
    /// Compiler failed to launch or exited non-zero
    CompileFailed(String),
    Tested {
        build_log: String,
        cases: Vec<Result<(), CaseFailure>>,
    },
}

/// The persisted, immutable record of a finished build
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub key: String,
    pub status: BuildStatus,
    pub exception: String,
    pub build_log: String,
    pub tests_log: String,
    pub tests_passed: u32,
    pub tests_total: u32,
    /// Notification target registered with the job, not persisted with the report
    #[serde(skip)]
    pub web_hook_url: Option<String>,
}

impl BuildReport {
    pub fn from_outcome(key: String, web_hook_url: Option<String>, outcome: BuildOutcome) -> Self {
        let mut report = BuildReport {
            key,
            status: BuildStatus::Exception,
            exception: String::new(),
            build_log: String::new(),
            tests_log: String::new(),
            tests_passed: 0,
            tests_total: 0,
            web_hook_url,
        };

        match outcome {
            BuildOutcome::Exception(text) => {
                report.exception = text;
            }
            BuildOutcome::CompileFailed(log) => {
                report.status = BuildStatus::Failed;
                report.build_log = log;
            }
            BuildOutcome::Tested { build_log, cases } => {
                report.status = BuildStatus::Succeed;
                report.build_log = build_log;
                report.tests_total = cases.len() as u32;
                for (idx, case) in cases.iter().enumerate() {
                    match case {
                        Ok(()) => report.tests_passed += 1,
                        Err(failure) => {
                            let _ = writeln!(
                                report.tests_log,
                                "--- FAILURE IN TEST {} ---\n{failure}",
                                idx + 1
                            );
                        }
                    }
                }
            }
        }

        report
    }

    pub fn exception(key: String, web_hook_url: Option<String>, text: String) -> Self {
        Self::from_outcome(key, web_hook_url, BuildOutcome::Exception(text))
    }

    pub fn score(&self) -> u32 {
        score(self.tests_passed, self.tests_total)
    }
}

/// Integer percentage of passed cases; zero when there is nothing to pass
pub fn score(tests_passed: u32, tests_total: u32) -> u32 {
    if tests_total == 0 {
        return 0;
    }
    MAX_BUILD_SCORE * tests_passed / tests_total
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn wrong(actual: &str, expected: &str) -> Result<(), CaseFailure> {
        Err(CaseFailure::WrongAnswer {
            actual: actual.to_string(),
            expected: expected.to_string(),
        })
    }

    #[test]
    fn test_score_rounds_down_and_handles_empty() {
        assert_eq!(score(0, 0), 0);
        assert_eq!(score(1, 3), 33);
        assert_eq!(score(2, 3), 66);
        assert_eq!(score(3, 3), 100);
    }

    #[test]
    fn test_partial_pass_still_succeeds() {
        let outcome = BuildOutcome::Tested {
            build_log: String::new(),
            cases: vec![Ok(()), wrong("4\n", "5\n"), Ok(())],
        };
        let report = BuildReport::from_outcome("k".into(), None, outcome);

        assert_eq!(report.status, BuildStatus::Succeed);
        assert_eq!(report.tests_total, 3);
        assert_eq!(report.tests_passed, 2);
        assert_eq!(report.score(), 66);
        assert_eq!(
            report.tests_log,
            "--- FAILURE IN TEST 2 ---\noutput does not match expected:\n--OUTPUT--\n4\n\n--EXPECTED--\n5\n\n"
        );
    }

    #[test]
    fn test_compile_failure_runs_nothing() {
        let report = BuildReport::from_outcome(
            "k".into(),
            None,
            BuildOutcome::CompileFailed("error: expected ';'".into()),
        );
        assert_eq!(report.status, BuildStatus::Failed);
        assert_eq!(report.tests_total, 0);
        assert_eq!(report.tests_passed, 0);
        assert_eq!(report.build_log, "error: expected ';'");
        assert_eq!(report.score(), 0);
    }

    #[test]
    fn test_exception_keeps_diagnostic() {
        let report = BuildReport::exception("k".into(), None, "disk full".into());
        assert_eq!(report.status, BuildStatus::Exception);
        assert_eq!(report.exception, "disk full");
        assert!(report.build_log.is_empty());
    }

    #[test]
    fn test_no_cases_scores_zero() {
        let outcome = BuildOutcome::Tested {
            build_log: String::new(),
            cases: vec![],
        };
        let report = BuildReport::from_outcome("k".into(), None, outcome);
        assert_eq!(report.status, BuildStatus::Succeed);
        assert_eq!(report.score(), 0);
    }

    #[test]
    fn test_limit_failure_is_labelled() {
        let failure = CaseFailure::LimitExceeded("CPU time limit exceeded".into());
        assert!(failure.to_string().starts_with("resource limit exceeded"));
    }
}
