use std::io;

use crate::config::ProcessLimits;

/// Resource ceilings installed in a child between fork and exec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct ChildLimits {
    pub open_files: Option<u64>,
    pub processes: Option<u64>,
    pub file_locks: Option<u64>,
    pub cpu_seconds: Option<u64>,
    pub address_space_bytes: Option<u64>,
}

macro_rules! set_rlimit {
    ($resource:expr, $soft:expr, $hard:expr) => {{
        let limit = libc::rlimit {
            rlim_cur: $soft as libc::rlim_t,
            rlim_max: $hard as libc::rlim_t,
        };
        if unsafe { libc::setrlimit($resource, &limit) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }};
}

impl ChildLimits {
    pub fn for_solution(limits: &ProcessLimits) -> Self {
        Self {
            open_files: Some(limits.open_files),
            processes: Some(limits.processes),
            file_locks: Some(limits.file_locks),
            cpu_seconds: Some(limits.cpu_seconds),
            address_space_bytes: Some(limits.address_space_mb.saturating_mul(1024 * 1024)),
        }
    }

    /// Compilers spawn helper processes, so only CPU time is capped
    pub fn for_compiler(limits: &ProcessLimits) -> Self {
        Self {
            cpu_seconds: Some(limits.compile_cpu_seconds),
            ..Self::default()
        }
    }

    /// Installs the limits on the calling process.
    ///
    /// Runs in the forked child, so it only calls async-signal-safe functions.
    /// The CPU hard limit sits one second above the soft one: SIGXCPU first,
    /// SIGKILL if the program ignores it.
    pub fn apply(&self) -> io::Result<()> {
        set_rlimit!(libc::RLIMIT_CORE, 0, 0);
        if let Some(n) = self.open_files {
            set_rlimit!(libc::RLIMIT_NOFILE, n, n);
        }
        if let Some(n) = self.processes {
            set_rlimit!(libc::RLIMIT_NPROC, n, n);
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        if let Some(n) = self.file_locks {
            set_rlimit!(libc::RLIMIT_LOCKS, n, n);
        }
        if let Some(secs) = self.cpu_seconds {
            set_rlimit!(libc::RLIMIT_CPU, secs, secs.saturating_add(1));
        }
        if let Some(bytes) = self.address_space_bytes {
            set_rlimit!(libc::RLIMIT_AS, bytes, bytes);
        }
        Ok(())
    }
}
