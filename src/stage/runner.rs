use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Result, SubpipeError};
use super::{StageExit, StageInput, StageRequest, StageRunnerTrait};

/// Runs each stage as `<program> worker ...` in its own process. The child's
/// memory, model weights included, is released by the OS when it exits.
pub struct SubprocessRunner {
    program: PathBuf,
    base_args: Vec<OsString>,
    config_path: Option<PathBuf>,
    verbose: bool,
    cancel: Option<watch::Receiver<bool>>,
}

impl SubprocessRunner {
    /// Re-invoke the running executable.
    pub fn current_exe(config_path: Option<PathBuf>) -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self {
            program,
            base_args: Vec::new(),
            config_path,
            verbose: false,
            cancel: None,
        })
    }

    /// Use an arbitrary program; `base_args` go before the `worker` subcommand.
    pub fn with_program<P: Into<PathBuf>>(program: P, base_args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            base_args,
            config_path: None,
            verbose: false,
            cancel: None,
        }
    }

    /// Start workers with `--verbose`.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Kill the running worker once `cancel` turns true.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn build_command(&self, request: &StageRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("worker")
            .arg("--stage")
            .arg(request.kind.as_str())
            .arg("--store")
            .arg(request.store.root());

        if let StageInput::Audio(audio) = &request.input {
            cmd.arg("--audio").arg(audio);
        }
        if let Some(config) = &self.config_path {
            cmd.arg("--config").arg(config);
        }
        if self.verbose {
            cmd.arg("--verbose");
        }

        cmd.args(request.params.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl StageRunnerTrait for SubprocessRunner {
    async fn run_stage(&self, request: &StageRequest) -> Result<StageExit> {
        let mut cmd = self.build_command(request);
        debug!("Starting worker: {:?}", cmd.as_std());

        let mut child = cmd.spawn().map_err(|e| {
            request.kind.failure(format!(
                "failed to start {} worker {}: {}",
                request.kind,
                self.program.display(),
                e
            ))
        })?;
        info!("Started {} worker (pid {:?})", request.kind, child.id());

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancellation(self.cancel.clone()) => {
                warn!("Cancellation requested, stopping {} worker", request.kind);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {} worker: {}", request.kind, e);
                }
                return Err(SubpipeError::Cancelled);
            }
        };

        let exit = exit_of(status);
        match exit {
            StageExit::Success => info!("{} worker finished", request.kind),
            other => warn!("{} worker ended with {:?}", request.kind, other),
        }
        Ok(exit)
    }
}

/// Resolves once cancellation is requested. Never resolves without a
/// receiver or after the sender is dropped.
async fn cancellation(cancel: Option<watch::Receiver<bool>>) {
    if let Some(mut cancel) = cancel {
        if cancel.wait_for(|requested| *requested).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

fn exit_of(status: ExitStatus) -> StageExit {
    match status.code() {
        Some(0) => StageExit::Success,
        Some(code) => StageExit::Failed(code),
        None => StageExit::Signalled(signal_of(&status)),
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> Option<i32> {
    None
}
