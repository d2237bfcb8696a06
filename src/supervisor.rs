//! Proxy process supervision
//!
//! The manager owns at most one live proxy process. It is started with a
//! `run`-style subcommand pointing at the same configuration document the
//! resolver read, with stdout/stderr inherited so the proxy's logs appear
//! inline with the manager's own.
//!
//! On Linux the child is armed with `PR_SET_PDEATHSIG(SIGTERM)`: if the
//! manager dies abruptly, the kernel delivers SIGTERM to the proxy, so a
//! crashed manager never leaves an unsupervised proxy holding the
//! intercepted ports while its firewall state has already vanished.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::core::error::{Error, Result};

/// How to invoke the proxy executable.
#[derive(Debug, Clone)]
pub struct ProxyCommand {
    pub executable: PathBuf,
    pub config_path: PathBuf,
}

/// Why and how the proxy stopped. `code` is `None` when a signal killed the
/// child instead of a normal exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyExit {
    pub code: Option<i32>,
}

impl ProxyExit {
    /// The manager's exit code when this termination is authoritative.
    pub fn manager_exit_code(self) -> u8 {
        self.code
            .map_or(1, |code| u8::try_from(code).unwrap_or(1))
    }
}

impl fmt::Display for ProxyExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "killed by signal"),
        }
    }
}

/// A running proxy child process, owned exclusively by the supervisor.
#[derive(Debug)]
pub struct ProxyProcess {
    child: Child,
    executable: PathBuf,
}

impl ProxyProcess {
    /// Starts the proxy process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProcessStart`] when the executable is missing or
    /// unrunnable.
    pub fn start(command: &ProxyCommand) -> Result<Self> {
        let mut cmd = Command::new(&command.executable);
        cmd.arg("run")
            .arg("-c")
            .arg(&command.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        #[cfg(target_os = "linux")]
        // SAFETY: set_pdeathsig is a single async-signal-safe prctl call
        unsafe {
            cmd.pre_exec(|| {
                nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGTERM)
                    .map_err(std::io::Error::from)
            });
        }

        let child = cmd.spawn().map_err(|source| Error::ProcessStart {
            executable: command.executable.display().to_string(),
            source,
        })?;

        info!(
            executable = %command.executable.display(),
            config = %command.config_path.display(),
            pid = child.id(),
            "proxy started"
        );

        Ok(Self {
            child,
            executable: command.executable.clone(),
        })
    }

    /// OS process id, when the child is still running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Blocks until the child exits for any reason.
    ///
    /// Never fails: a broken wait is reported as an abnormal exit so the
    /// caller's cleanup path still runs.
    pub async fn wait(mut self) -> ProxyExit {
        match self.child.wait().await {
            Ok(status) => {
                let exit = ProxyExit {
                    code: status.code(),
                };
                info!(executable = %self.executable.display(), %exit, "proxy exited");
                exit
            }
            Err(e) => {
                warn!(error = %e, "failed to await proxy process; assuming abnormal exit");
                ProxyExit { code: Some(1) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(executable: &str) -> ProxyCommand {
        ProxyCommand {
            executable: PathBuf::from(executable),
            config_path: PathBuf::from("/tmp/config.json"),
        }
    }

    #[tokio::test]
    async fn test_start_missing_executable() {
        let err = ProxyProcess::start(&command("/nonexistent/tpgate-proxy")).unwrap_err();
        match err {
            Error::ProcessStart { executable, source } => {
                assert!(executable.contains("tpgate-proxy"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_wait_reports_clean_exit() {
        // `true` ignores the run/-c arguments and exits 0
        let process = ProxyProcess::start(&command("true")).unwrap();
        assert!(process.pid().is_some());

        let exit = process.wait().await;
        assert_eq!(exit.code, Some(0));
        assert_eq!(exit.manager_exit_code(), 0);
    }

    #[tokio::test]
    async fn test_wait_reports_nonzero_exit() {
        let process = ProxyProcess::start(&command("false")).unwrap();
        let exit = process.wait().await;
        assert_eq!(exit.code, Some(1));
        assert_eq!(exit.manager_exit_code(), 1);
    }

    #[test]
    fn test_signal_exit_maps_to_one() {
        let exit = ProxyExit { code: None };
        assert_eq!(exit.manager_exit_code(), 1);
        assert_eq!(exit.to_string(), "killed by signal");
    }
}
