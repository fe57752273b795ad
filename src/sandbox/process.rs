use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::time::timeout;

use super::limits::ChildLimits;

pub(super) struct RunOptions<'a> {
    pub cwd: &'a Path,
    pub stdin: &'a [u8],
    pub limits: ChildLimits,
    /// Wall-clock ceiling for the whole run, output included
    pub wall_time: Duration,
    /// Bytes kept from each of stdout and stderr
    pub output_cap: usize,
}

#[derive(Debug)]
pub(super) struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    pub output_truncated: bool,
}

/// Runs `program` to completion under the given limits, feeding `stdin` and capturing output.
///
/// The child leads its own process group. Once it exits, whatever it left
/// behind in that group is killed, so the output pipes close with it.
///
/// # Errors
///
/// Returns an error only when the process cannot be started or waited for;
/// any way the program itself ends is reported through [`ProcessOutput`].
pub(super) async fn run_limited_process(
    program: impl AsRef<OsStr>,
    args: &[String],
    options: &RunOptions<'_>,
) -> io::Result<ProcessOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(options.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let limits = options.limits;
    // SAFETY: `apply` only calls setrlimit, which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || limits.apply());
    }

    let mut child = cmd.spawn()?;
    let pid = child.id();
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let cap = options.output_cap;
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let run = timeout(options.wall_time, async {
        let (status, (), stdout_truncated, stderr_truncated) = tokio::join!(
            async {
                let status = child.wait().await;
                kill_process_group(pid);
                status
            },
            feed_stdin(stdin, options.stdin),
            read_capped(stdout, cap, &mut stdout_buf),
            read_capped(stderr, cap, &mut stderr_buf),
        );
        Ok::<_, io::Error>((status?, stdout_truncated? || stderr_truncated?))
    })
    .await;

    let (status, timed_out, output_truncated) = match run {
        Ok(result) => {
            let (status, truncated) = result?;
            (status, false, truncated)
        }
        Err(_) => {
            kill_process_group(pid);
            let _ = child.start_kill();
            (child.wait().await?, true, false)
        }
    };

    Ok(ProcessOutput {
        status,
        stdout: stdout_buf,
        stderr: stderr_buf,
        timed_out,
        output_truncated,
    })
}

/// Kills every process in the group led by `pid`
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    // SAFETY: plain syscall, an empty group only yields ESRCH.
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

async fn feed_stdin(stdin: Option<ChildStdin>, input: &[u8]) {
    if let Some(mut stdin) = stdin {
        // A program that exits without reading its input closes the pipe early
        let _ = stdin.write_all(input).await;
    }
}

/// Reads at most `cap` bytes into `buf` and reports whether the stream had more.
///
/// On overflow the pipe is dropped, so the writer dies of SIGPIPE.
async fn read_capped<R: AsyncRead + Unpin>(
    reader: Option<R>,
    cap: usize,
    buf: &mut Vec<u8>,
) -> io::Result<bool> {
    let Some(mut reader) = reader else {
        return Ok(false);
    };

    (&mut reader).take(cap as u64 + 1).read_to_end(buf).await?;

    let truncated = buf.len() > cap;
    buf.truncate(cap);
    Ok(truncated)
}
