use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ToolCommand;
use crate::error::{PipelineError, Step, StepError, StepErrorKind};

/// One out-of-process call to an external tool.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn from_tool(tool: &ToolCommand) -> Self {
        Self {
            program: tool.program.clone(),
            args: tool.args.iter().map(OsString::from).collect(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ToolOutput {
    /// Turns a non-zero exit into an invocation error carrying stderr.
    pub fn check(&self, step: Step) -> Result<(), StepError> {
        if self.status.success() {
            return Ok(());
        }
        warn!(%step, status = ?self.status.code(), stderr = %self.stderr.trim(), "tool failed");
        Err(StepError::new(
            step,
            StepErrorKind::Invocation {
                code: self.status.code(),
            },
            self.stderr.clone(),
        ))
    }
}

/// Fixed-size pool for blocking tool invocations. Each call holds a permit
/// for the lifetime of the child process, so a pool of one serialises every
/// step of every run sharing it.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs the invocation to completion on a blocking thread. No timeout.
    pub async fn run(
        &self,
        step: Step,
        invocation: Invocation,
    ) -> Result<ToolOutput, PipelineError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PipelineError::PoolClosed)?;

        info!("Running {}: {}", step, invocation.command_line());
        let output = tokio::task::spawn_blocking(move || run_blocking(&invocation)).await?;
        let output = output.map_err(|e| StepError::new(step, StepErrorKind::Spawn, e.to_string()))?;
        debug!(
            %step,
            status = ?output.status.code(),
            elapsed = ?output.elapsed,
            "tool exited"
        );
        Ok(output)
    }
}

fn run_blocking(invocation: &Invocation) -> std::io::Result<ToolOutput> {
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &invocation.cwd {
        debug!("Working directory: {}", dir.display());
        command.current_dir(dir);
    }

    let started = Instant::now();
    let output = command.output()?;
    Ok(ToolOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        elapsed: started.elapsed(),
    })
}
