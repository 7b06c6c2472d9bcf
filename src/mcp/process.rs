// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Server process management with Zombie Process Protection.
//!
//! Spawns the server under test with its stdin/stdout wired as a duplex
//! stream and guarantees the child is killed and reaped when the owning
//! [`ServerProcess`] goes away, whatever path the caller took to get there.

use crate::core::errors::SessionError;
use crate::mcp::pipeline::spawn_stderr_drain;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

#[cfg(windows)]
use win32job::Job;

/// What happens to the server's stderr. It is never parsed for contract data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StderrMode {
    /// Pass through to the harness's own stderr
    #[default]
    Inherit,
    /// Forward each line to the log at debug level
    Capture,
    Discard,
}

/// How to launch the server under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerParameters {
    command: String,
    args: Vec<String>,
    /// `None` inherits the harness environment
    env: Option<BTreeMap<String, String>>,
    stderr: StderrMode,
}

impl ServerParameters {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: None,
            stderr: StderrMode::default(),
        }
    }

    /// Build from a full argument vector, `argv[0]` being the command.
    pub fn from_argv(argv: Vec<String>) -> Result<Self, SessionError> {
        let mut iter = argv.into_iter();
        let command = iter.next().ok_or_else(|| {
            SessionError::Configuration("argument vector is empty".to_string())
        })?;
        let params = Self::new(command, iter.collect());
        params.validate()?;
        Ok(params)
    }

    /// Build from a shell-style command line such as `"biomcp serve"`.
    pub fn from_command_line(line: &str) -> Result<Self, SessionError> {
        let argv = shlex::split(line).ok_or_else(|| {
            SessionError::Configuration(format!("unbalanced quoting in command: {line}"))
        })?;
        Self::from_argv(argv)
    }

    /// Replace the inherited environment with an explicit mapping.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Set one variable; the first call snapshots the harness environment.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(|| std::env::vars().collect())
            .insert(key.into(), value.into());
        self
    }

    pub fn with_stderr(mut self, mode: StderrMode) -> Self {
        self.stderr = mode;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> Option<&BTreeMap<String, String>> {
        self.env.as_ref()
    }

    pub fn stderr(&self) -> StderrMode {
        self.stderr
    }

    /// Reject parameters the OS would refuse, before anything is spawned.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.command.trim().is_empty() {
            return Err(SessionError::Configuration("command is empty".to_string()));
        }
        if self.command.contains('\0') {
            return Err(SessionError::Configuration(
                "command contains a NUL byte".to_string(),
            ));
        }
        if let Some(pos) = self.args.iter().position(|a| a.contains('\0')) {
            return Err(SessionError::Configuration(format!(
                "argument {} contains a NUL byte",
                pos + 1
            )));
        }
        if let Some(env) = &self.env {
            for (key, value) in env {
                if key.is_empty() || key.contains('=') || key.contains('\0') {
                    return Err(SessionError::Configuration(format!(
                        "invalid environment variable name {key:?}"
                    )));
                }
                if value.contains('\0') {
                    return Err(SessionError::Configuration(format!(
                        "environment variable {key} contains a NUL byte"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Final state of the child once reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when killed by a signal
    pub code: Option<i32>,
}

pub struct ServerProcess {
    // Channel to trigger manual kill
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    pid: Option<u32>,
    command: String,
    // Keep job object alive (Windows only)
    #[cfg(windows)]
    _job: Option<Job>,
}

/// The duplex byte stream wired to the child's stdio.
pub struct ServerStreams {
    pub stdin: Box<dyn AsyncWrite + Unpin + Send>,
    pub stdout: Box<dyn AsyncRead + Unpin + Send>,
}

impl ServerProcess {
    /// Spawn the server. Must be called from within a tokio runtime.
    pub fn spawn(params: &ServerParameters) -> Result<(Self, ServerStreams), SessionError> {
        params.validate()?;
        debug!(
            "ServerProcess: spawning '{}' with args {:?}",
            params.command, params.args
        );

        let mut command = Command::new(&params.command);
        command.args(&params.args);

        if let Some(env) = &params.env {
            command.env_clear().envs(env);
        }

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(match params.stderr {
                StderrMode::Inherit => Stdio::inherit(),
                StderrMode::Capture => Stdio::piped(),
                StderrMode::Discard => Stdio::null(),
            })
            .kill_on_drop(true);

        // ------------------------------------------------------------------
        // LINUX: PR_SET_PDEATHSIG
        // ------------------------------------------------------------------
        #[cfg(target_os = "linux")]
        // SAFETY: prctl is async-signal-safe and touches no memory shared with
        // the parent. PR_SET_PDEATHSIG with SIGKILL makes the kernel kill the
        // server if the harness dies before it can reap it.
        unsafe {
            command.pre_exec(|| {
                let ret = libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);
                if ret != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        // ------------------------------------------------------------------
        // WINDOWS: Job Objects (Part 1 - Creation)
        // ------------------------------------------------------------------
        #[cfg(windows)]
        let job = {
            let job_error = |e: win32job::JobError| {
                SessionError::Launch {
                    command: params.command.clone(),
                    source: std::io::Error::other(e.to_string()),
                }
            };
            let job = Job::create().map_err(job_error)?;
            let mut info = job.query_extended_limit_info().map_err(job_error)?;
            info.limit_kill_on_job_close();
            job.set_extended_limit_info(&info).map_err(job_error)?;
            Some(job)
        };

        let mut child = command.spawn().map_err(|source| SessionError::Launch {
            command: params.command.clone(),
            source,
        })?;

        // ------------------------------------------------------------------
        // WINDOWS: Job Objects (Part 2 - Assignment)
        // ------------------------------------------------------------------
        #[cfg(windows)]
        if let Some(ref job) = job {
            if let Some(handle) = child.raw_handle() {
                if let Err(e) = job.assign_process(handle as isize) {
                    warn!("Failed to assign server to Job Object: {}", e);
                }
            }
        }

        let pid = child.id();
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                return Err(SessionError::Launch {
                    command: params.command.clone(),
                    source: std::io::Error::other("child stdio was not captured"),
                })
            }
        };
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_drain(stderr, params.command.clone());
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);
        let label = params.command.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = kill_rx => {
                    let _ = child.kill().await;
                    let code = child.wait().await.ok().and_then(|s| s.code());
                    debug!("Server '{}' killed and reaped", label);
                    let _ = exit_tx.send(Some(ProcessExit { code }));
                }
                status = child.wait() => {
                    let code = status.ok().and_then(|s| s.code());
                    debug!("Server '{}' exited with {:?}", label, code);
                    let _ = exit_tx.send(Some(ProcessExit { code }));
                }
            }
        });

        info!(pid = ?pid, "Started server '{}'", params.command);

        Ok((
            Self {
                kill_tx: Some(kill_tx),
                exit_rx,
                pid,
                command: params.command.clone(),
                #[cfg(windows)]
                _job: job,
            },
            ServerStreams {
                stdin: Box::new(stdin),
                stdout: Box::new(stdout),
            },
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Request an immediate kill. Reaping happens in the background.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait up to `grace` for a voluntary exit, then kill and reap.
    ///
    /// Callers close the child's stdin first so a well-behaved server can
    /// exit on EOF.
    pub async fn shutdown(mut self, grace: Duration) -> Option<ProcessExit> {
        let mut exit_rx = self.exit_rx.clone();

        if tokio::time::timeout(grace, exit_rx.wait_for(Option::is_some))
            .await
            .is_err()
        {
            warn!(
                "Server '{}' still running after {:?}, killing",
                self.command, grace
            );
            self.kill();
        }

        let status = match exit_rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        };
        info!("Server '{}' stopped: {:?}", self.command, status);
        status
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        self.kill();
        // On Windows, _job is dropped here, which triggers LIMIT_KILL_ON_JOB_CLOSE
        // if the process is still running.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command_line_splits_quotes() {
        let params = ServerParameters::from_command_line("biomcp serve --name 'a b'").unwrap();
        assert_eq!(params.command(), "biomcp");
        assert_eq!(params.args(), &["serve", "--name", "a b"]);
        assert!(params.env().is_none());
    }

    #[test]
    fn test_empty_argv_is_configuration_error() {
        assert!(matches!(
            ServerParameters::from_argv(vec![]),
            Err(SessionError::Configuration(_))
        ));
        assert!(matches!(
            ServerParameters::from_command_line("   "),
            Err(SessionError::Configuration(_))
        ));
        assert!(matches!(
            ServerParameters::from_command_line("biomcp 'unterminated"),
            Err(SessionError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_nul_and_bad_env() {
        let params = ServerParameters::new("server", vec!["a\0b".to_string()]);
        assert!(matches!(params.validate(), Err(SessionError::Configuration(_))));

        let mut env = BTreeMap::new();
        env.insert("BAD=KEY".to_string(), "1".to_string());
        let params = ServerParameters::new("server", vec![]).with_env(env);
        assert!(matches!(params.validate(), Err(SessionError::Configuration(_))));
    }

    #[test]
    fn test_with_var_snapshots_environment() {
        let params = ServerParameters::new("server", vec![]).with_var("FIXTURE_MODE", "slow");
        let env = params.env().unwrap();
        assert_eq!(env.get("FIXTURE_MODE").map(String::as_str), Some("slow"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let params = ServerParameters::new("/definitely/not/a/real/mcp-server", vec![]);
        assert!(matches!(
            ServerProcess::spawn(&params),
            Err(SessionError::Launch { .. })
        ));
    }
}
