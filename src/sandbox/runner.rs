use crate::database::TestCase;
use crate::report::BuildOutcome;
use crate::status::Language;

/// Trait for the execution engine behind a build worker
///
/// A runner compiles one submission and runs it against every test case of
/// its assignment. Submission faults (compile errors, crashes, limit
/// violations, wrong answers) are returned as data in the outcome; only setup
/// faults become [`BuildOutcome::Exception`]. Implementations block and are
/// driven from the blocking thread pool.
pub trait SandboxRunner: Send + Sync {
    fn run(&self, language: Language, source: &str, cases: &[TestCase]) -> BuildOutcome;
}
