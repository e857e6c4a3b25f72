//! Subprocess lifecycle for one session.
//!
//! The supervisor is the only owner of the child handle. It starts the
//! program with three piped stdio streams, hands the pipe ends to the pumps,
//! and later drives termination:
//!
//! 1. send an interrupt,
//! 2. wait for either output pump to finish, at most the kill grace,
//! 3. otherwise send a kill (at most once) and wait for stdout to close,
//! 4. reap the exit status.

use crate::error::{ProxyError, Result};
use crate::signal::CompletionSignal;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Lifecycle of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Interrupted,
    Exited,
    Killed,
    Reaped,
}

/// What to run.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// The three pipe ends the pumps own.
#[derive(Debug)]
pub struct ProcessPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// How termination went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationOutcome {
    /// The interrupt signal was delivered.
    pub interrupted: bool,
    /// A kill was sent because the process outlived the grace window.
    pub killed: bool,
    /// Exit status, when the process could be reaped.
    pub exit: Option<ExitStatus>,
}

/// Owner of one running program.
#[derive(Debug)]
pub struct ProcessSupervisor {
    child: Child,
    program: PathBuf,
    pid: Option<u32>,
    state: ProcessState,
    kills_sent: u32,
}

impl ProcessSupervisor {
    /// Start the program with piped stdio.
    pub fn start(spec: &LaunchSpec) -> Result<(Self, ProcessPipes)> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| start_failed(&spec.program, e))?;

        let pipes = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => ProcessPipes {
                stdin,
                stdout,
                stderr,
            },
            _ => {
                return Err(ProxyError::StartFailed {
                    program: spec.program.clone(),
                    message: "stdio pipes were not created".to_string(),
                })
            }
        };

        let pid = child.id();
        info!(
            "Started {} (PID {})",
            spec.program.display(),
            pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into())
        );

        Ok((
            Self {
                child,
                program: spec.program.clone(),
                pid,
                state: ProcessState::Running,
                kills_sent: 0,
            },
            pipes,
        ))
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Number of kill signals sent so far.
    pub fn kills_sent(&self) -> u32 {
        self.kills_sent
    }

    /// Ask the process to stop (SIGINT on Unix).
    pub fn interrupt(&mut self) -> Result<()> {
        if self.state != ProcessState::Running {
            return Err(ProxyError::ProcessNotRunning);
        }
        let pid = self.pid.ok_or(ProxyError::ProcessNotRunning)?;

        send_interrupt(pid)?;
        debug!("Sent interrupt to PID {}", pid);
        self.state = ProcessState::Interrupted;
        Ok(())
    }

    /// Kill the process. Only the first call sends anything.
    pub fn kill(&mut self) -> Result<()> {
        if self.kills_sent > 0 {
            return Ok(());
        }
        if matches!(self.state, ProcessState::Reaped | ProcessState::NotStarted) {
            return Err(ProxyError::ProcessNotRunning);
        }

        self.kills_sent += 1;
        self.child.start_kill()?;
        debug!("Sent kill to PID {:?}", self.pid);
        self.state = ProcessState::Killed;
        Ok(())
    }

    /// Interrupt, wait up to `grace` for an output pump to finish, kill if
    /// needed, then reap.
    ///
    /// After a kill the wait for stdout to close is unbounded.
    pub async fn escalate(
        &mut self,
        stdout_done: &CompletionSignal,
        stderr_done: &CompletionSignal,
        grace: Duration,
    ) -> EscalationOutcome {
        let interrupted = match self.interrupt() {
            Ok(()) => true,
            Err(e) => {
                info!("inter: {}", e);
                false
            }
        };

        let exited_in_grace = tokio::select! {
            _ = stdout_done.wait() => true,
            _ = stderr_done.wait() => true,
            _ = tokio::time::sleep(grace) => false,
        };

        let mut killed = false;
        if exited_in_grace {
            if self.state == ProcessState::Interrupted || self.state == ProcessState::Running {
                self.state = ProcessState::Exited;
            }
        } else {
            match self.kill() {
                Ok(()) => killed = true,
                Err(e) => warn!("term: {}", e),
            }
            info!("Waiting for stdout of PID {:?} to close", self.pid);
            stdout_done.wait().await;
        }

        let exit = self.reap().await;
        EscalationOutcome {
            interrupted,
            killed,
            exit,
        }
    }

    /// Wait for the process to exit and collect its status.
    pub async fn reap(&mut self) -> Option<ExitStatus> {
        match self.child.wait().await {
            Ok(status) => {
                if status.success() {
                    debug!("{} exited successfully", self.program.display());
                } else {
                    info!("{} exited with {}", self.program.display(), status);
                }
                self.state = ProcessState::Reaped;
                Some(status)
            }
            Err(e) => {
                warn!("wait: {}", e);
                None
            }
        }
    }
}

fn start_failed(program: &Path, err: std::io::Error) -> ProxyError {
    ProxyError::StartFailed {
        program: program.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| ProxyError::ProcessNotRunning)?;
    kill(Pid::from_raw(raw), Signal::SIGINT).map_err(|e| {
        if e == nix::errno::Errno::ESRCH {
            ProxyError::ProcessNotRunning
        } else {
            ProxyError::Io {
                message: format!("failed to interrupt PID {}: {}", pid, e),
                path: None,
                source: None,
            }
        }
    })
}

#[cfg(not(unix))]
fn send_interrupt(_pid: u32) -> Result<()> {
    Err(ProxyError::Io {
        message: "interrupt is not supported on this platform".to_string(),
        path: None,
        source: None,
    })
}
