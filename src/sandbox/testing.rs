use std::os::unix::process::ExitStatusExt;

use super::*;

impl LimitedRunner {
    /// Runs the executable once per test case, in order
    pub(super) async fn run_test_cases(
        &self,
        executable: &Path,
        run_dir: &Path,
        cases: &[TestCase],
    ) -> Vec<std::result::Result<(), CaseFailure>> {
        let mut results = Vec::with_capacity(cases.len());
        for (idx, case) in cases.iter().enumerate() {
            let result = self.run_single_test_case(executable, run_dir, case).await;
            if let Err(failure) = &result {
                log::debug!("Runner {} test {} failed: {failure}", self.id, idx + 1);
            }
            results.push(result);
        }
        results
    }

    async fn run_single_test_case(
        &self,
        executable: &Path,
        run_dir: &Path,
        case: &TestCase,
    ) -> std::result::Result<(), CaseFailure> {
        let options = RunOptions {
            cwd: run_dir,
            stdin: case.input.as_bytes(),
            limits: ChildLimits::for_solution(&self.limits),
            wall_time: Duration::from_secs(self.limits.wall_seconds),
            output_cap: self.limits.output_bytes as usize,
        };

        let output = run_limited_process(executable, &[], &options)
            .await
            .map_err(|e| CaseFailure::LaunchFailed(e.to_string()))?;

        classify_exit(&output, &self.limits)?;

        if output.stdout == case.expected.as_bytes() {
            Ok(())
        } else {
            Err(CaseFailure::WrongAnswer {
                actual: String::from_utf8_lossy(&output.stdout).into_owned(),
                expected: case.expected.clone(),
            })
        }
    }
}

/// Allocation failure messages of the C++ and Pascal runtimes and libc
const ALLOCATION_FAILURE_MARKERS: [&str; 4] = [
    "std::bad_alloc",
    "Cannot allocate memory",
    "out of memory",
    "Runtime error 203",
];

/// Maps the way a solution ended onto a failure, if it did not exit cleanly
fn classify_exit(output: &ProcessOutput, limits: &ProcessLimits) -> std::result::Result<(), CaseFailure> {
    if output.timed_out {
        return Err(CaseFailure::LimitExceeded(format!(
            "wall time limit of {}s exceeded",
            limits.wall_seconds
        )));
    }
    if output.output_truncated {
        return Err(CaseFailure::LimitExceeded(format!(
            "output limit of {} bytes exceeded",
            limits.output_bytes
        )));
    }
    if !output.status.success() && allocation_failed(output) {
        return Err(CaseFailure::LimitExceeded(append_output(
            format!("address space limit of {} MB exceeded", limits.address_space_mb),
            output,
        )));
    }

    if let Some(signal) = output.status.signal() {
        return Err(match signal {
            libc::SIGXCPU => CaseFailure::LimitExceeded(format!(
                "CPU time limit of {}s exceeded",
                limits.cpu_seconds
            )),
            libc::SIGKILL => CaseFailure::LimitExceeded("killed by SIGKILL".to_string()),
            _ => CaseFailure::RuntimeError(append_output(
                format!("terminated by signal {signal}"),
                output,
            )),
        });
    }

    match output.status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(CaseFailure::RuntimeError(append_output(
            format!("exit code {code}"),
            output,
        ))),
        None => Err(CaseFailure::RuntimeError("unknown exit status".to_string())),
    }
}

fn allocation_failed(output: &ProcessOutput) -> bool {
    let stderr = String::from_utf8_lossy(&output.stderr);
    ALLOCATION_FAILURE_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
}
