mod compile;
mod limits;
mod process;
mod runner;
mod testing;

pub use runner::SandboxRunner;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::config::{ProcessLimits, ToolchainConfig};
use crate::database::TestCase;
use crate::report::{BuildOutcome, CaseFailure};
use crate::status::Language;

use limits::ChildLimits;
use process::{ProcessOutput, RunOptions, run_limited_process};

// Sandbox working directory permissions
const WORK_DIR_PERMISSIONS: u32 = 0o700;

const EXECUTABLE_NAME: &str = "solution";
const RUN_DIR_NAME: &str = "run";

/// Everything a runner needs to know, shared by all workers
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub work_dir: PathBuf,
    pub limits: ProcessLimits,
    pub toolchains: Vec<ToolchainConfig>,
}

impl SandboxConfig {
    pub fn new(
        work_dir: Option<PathBuf>,
        limits: ProcessLimits,
        toolchains: Vec<ToolchainConfig>,
    ) -> Result<Self> {
        let work_dir = match work_dir {
            Some(dir) => dir,
            None => default_work_dir()?,
        };
        Ok(Self {
            work_dir,
            limits,
            toolchains,
        })
    }
}

fn default_work_dir() -> Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "judge")
        .ok_or_else(|| anyhow!("Unable to find user directory"))?;
    Ok(proj_dirs.cache_dir().join("builds"))
}

/// Creates the sandbox runner owned by worker `id`
pub fn create_sandbox_runner(id: u8, config: &SandboxConfig) -> Result<Box<dyn SandboxRunner>> {
    let runner = LimitedRunner::build(id, config)?;
    Ok(Box::new(runner))
}

/// Compiles and runs submissions as plain child processes under rlimit ceilings.
///
/// Every build starts from an empty per-worker directory; the solution runs
/// inside its `run/` subdirectory.
pub struct LimitedRunner {
    id: u8,
    work_dir: PathBuf,
    limits: ProcessLimits,
    toolchains: Vec<ToolchainConfig>,
}

impl SandboxRunner for LimitedRunner {
    fn run(&self, language: Language, source: &str, cases: &[TestCase]) -> BuildOutcome {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(self.compile_and_test(language, source, cases)),
            Err(e) => BuildOutcome::Exception(format!("sandbox started outside a runtime: {e}")),
        }
    }
}

impl LimitedRunner {
    async fn compile_and_test(&self, language: Language, source: &str, cases: &[TestCase]) -> BuildOutcome {
        let Some(toolchain) = self.toolchains.iter().find(|t| t.language == language) else {
            return BuildOutcome::Exception(format!("no toolchain configured for language {language}"));
        };

        // Step 1: Fresh working directory and source file
        let run_dir = match self.prepare_work_dir() {
            Ok(dir) => dir,
            Err(e) => {
                return BuildOutcome::Exception(format!(
                    "cannot prepare working directory {}: {e}",
                    self.work_dir.display()
                ));
            }
        };
        let source_path = self.work_dir.join(&toolchain.file_name);
        if let Err(e) = fs::write(&source_path, source) {
            return BuildOutcome::Exception(format!(
                "cannot write source file {}: {e}",
                source_path.display()
            ));
        }

        // Step 2: Compile
        let executable_path = self.work_dir.join(EXECUTABLE_NAME);
        let build_log = match self
            .compile_source_code(toolchain, &source_path, &executable_path)
            .await
        {
            Ok(log) => log,
            Err(diagnostic) => {
                log::debug!("Runner {} compilation failed", self.id);
                return BuildOutcome::CompileFailed(diagnostic);
            }
        };

        // Step 3: Run test cases
        let cases = self.run_test_cases(&executable_path, &run_dir, cases).await;

        BuildOutcome::Tested { build_log, cases }
    }

    pub fn build(id: u8, config: &SandboxConfig) -> Result<Self> {
        let work_dir = config.work_dir.join(format!("builder_{id}"));
        fs::create_dir_all(&work_dir)?;
        fs::set_permissions(&work_dir, fs::Permissions::from_mode(WORK_DIR_PERMISSIONS))?;
        let work_dir = fs::canonicalize(&work_dir)?;

        log::info!("LimitedRunner {id} initialized at {}", work_dir.display());
        Ok(Self {
            id,
            work_dir,
            limits: config.limits,
            toolchains: config.toolchains.clone(),
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Empties the working directory and returns the solution's run directory
    fn prepare_work_dir(&self) -> std::io::Result<PathBuf> {
        if self.work_dir.exists() {
            fs::remove_dir_all(&self.work_dir)?;
        }
        fs::create_dir_all(&self.work_dir)?;
        fs::set_permissions(&self.work_dir, fs::Permissions::from_mode(WORK_DIR_PERMISSIONS))?;
        let run_dir = self.work_dir.join(RUN_DIR_NAME);
        fs::create_dir_all(&run_dir)?;
        Ok(run_dir)
    }
}

/// Appends non-empty stderr and stdout of a process to a diagnostic line
fn append_output(mut reason: String, output: &ProcessOutput) -> String {
    for stream in [&output.stderr, &output.stdout] {
        if !stream.is_empty() {
            reason.push('\n');
            reason.push_str(&String::from_utf8_lossy(stream));
        }
    }
    reason
}
