use std::fmt;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// `SIGABRT`: what the worker dies of when it hits its address-space limit.
pub const SIGABRT: i32 = 6;

impl WorkerExit {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }

    pub fn is_memory_limit_abort(&self) -> bool {
        self.signal == Some(SIGABRT)
    }

    pub fn signal_name(&self) -> Option<String> {
        self.signal.map(signal_name)
    }

    /// What the user can do about this exit, if anything.
    pub fn remediation(&self, memory_limit_mb: u64) -> Option<String> {
        self.is_memory_limit_abort().then(|| {
            format!(
                "The type-checking worker ran out of memory (memoryLimit is {memory_limit_mb} MB). \
                 Raise `memoryLimit` in the worker configuration or `memory-limit` in typecheck-worker.toml."
            )
        })
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    match nix::sys::signal::Signal::try_from(signal) {
        Ok(named) => named.as_str().to_string(),
        Err(_) => signal.to_string(),
    }
}

#[cfg(not(unix))]
fn signal_name(signal: i32) -> String {
    signal.to_string()
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.signal_name(), self.code) {
            (Some(signal), _) => write!(f, "worker terminated by signal {signal}"),
            (None, Some(code)) => write!(f, "worker exited with code {code}"),
            (None, None) => f.write_str("worker exited"),
        }
    }
}

/// A queued task was cancelled before it started, or its result was
/// superseded by a newer iteration. Not a failure: ignore the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("aborted: superseded, ignore")]
pub struct Aborted;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("{0}")]
    WorkerExited(WorkerExit),
    #[error(transparent)]
    Aborted(#[from] Aborted),
    #[error("channel unavailable: {0}")]
    Channel(String),
    #[error("{0}")]
    Remote(String),
}

impl CallError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, CallError::Aborted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigabrt_is_memory_limit_abort() {
        let exit = WorkerExit {
            code: None,
            signal: Some(SIGABRT),
        };
        assert!(exit.is_memory_limit_abort());
        assert!(exit.remediation(2048).unwrap().contains("2048 MB"));
        #[cfg(unix)]
        assert_eq!(exit.to_string(), "worker terminated by signal SIGABRT");
    }

    #[test]
    fn test_plain_exit_has_no_remediation() {
        let exit = WorkerExit {
            code: Some(1),
            signal: None,
        };
        assert_eq!(exit.to_string(), "worker exited with code 1");
        assert!(exit.remediation(2048).is_none());
    }

    #[test]
    fn test_aborted_converts_into_call_error() {
        let err: CallError = Aborted.into();
        assert!(err.is_aborted());
        assert_eq!(err.to_string(), "aborted: superseded, ignore");
    }
}
