use std::collections::HashMap;

use super::*;

impl LimitedRunner {
    /// Compiles the source file into `executable`.
    ///
    /// Returns the compiler's output on success and a diagnostic starting
    /// with "compilation failed" otherwise.
    pub(super) async fn compile_source_code(
        &self,
        toolchain: &ToolchainConfig,
        source_path: &Path,
        executable_path: &Path,
    ) -> std::result::Result<String, String> {
        let source = source_path.to_string_lossy();
        let executable = executable_path.to_string_lossy();
        let mut mapping = HashMap::<&str, &str>::new();
        mapping.insert("%INPUT%", &source);
        mapping.insert("%OUTPUT%", &executable);

        let command = apply_template(&toolchain.command, &mapping);
        let Some((program, args)) = command.split_first() else {
            return Err(format!(
                "compilation failed: empty compile command for {}",
                toolchain.language
            ));
        };

        let options = RunOptions {
            cwd: &self.work_dir,
            stdin: &[],
            limits: ChildLimits::for_compiler(&self.limits),
            wall_time: Duration::from_secs(self.limits.compile_cpu_seconds.saturating_mul(2)),
            output_cap: self.limits.output_bytes as usize,
        };
        log::debug!("Runner {} compiling with `{}`", self.id, command.join(" "));

        let output = match run_limited_process(program, args, &options).await {
            Ok(output) => output,
            Err(e) => return Err(format!("compilation failed: cannot start {program}: {e}")),
        };

        if output.timed_out {
            return Err(append_output(
                "compilation failed: compiler timed out".to_string(),
                &output,
            ));
        }
        if !output.status.success() {
            let reason = match output.status.code() {
                Some(code) => format!("compilation failed: compiler exited with code {code}"),
                None => "compilation failed: compiler was terminated by a signal".to_string(),
            };
            return Err(append_output(reason, &output));
        }
        if !executable_path.exists() {
            return Err(append_output(
                "compilation failed: compiler produced no executable".to_string(),
                &output,
            ));
        }

        Ok(append_output(String::new(), &output).trim_start().to_string())
    }
}

/// Applies placeholder substitutions to every argument of a command template
fn apply_template(cmd_template: &[String], mapping: &HashMap<&str, &str>) -> Vec<String> {
    cmd_template
        .iter()
        .map(|s| {
            let mut t = s.clone();
            for (k, v) in mapping.iter() {
                t = t.replace(k, v);
            }
            t
        })
        .collect()
}
