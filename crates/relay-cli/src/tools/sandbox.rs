//! Execution sandbox for generated code
//!
//! Two strategies:
//! - `direct`: the system interpreter runs each script in a fresh scratch
//!   directory. Shares the interpreter's packages and the filesystem.
//! - `venv`: one virtual environment per coder instance, created up front
//!   and removed when the executor is dropped.
//!
//! Neither strategy lets a failure escape as an `Err`: spawn failures,
//! non-zero exits and timeouts all come back as [`ExecutionOutcome::Error`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::{Builder, TempDir};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Sentinel reported when a script prints nothing
pub const NO_OUTPUT: &str = "no output was produced!";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStrategy {
    /// System interpreter, fresh scratch directory per run
    Direct,
    /// Isolated virtual environment per coder instance
    #[default]
    Venv,
}

impl std::fmt::Display for SandboxStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Venv => write!(f, "venv"),
        }
    }
}

/// `[sandbox]` configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub strategy: SandboxStrategy,
    /// Interpreter used directly, or to bootstrap the venv
    pub python: String,
    /// Installed once when the venv is created
    pub packages: Vec<String>,
    /// Per-execution limit
    pub timeout_secs: u64,
    /// Limit for venv creation and each pip install
    pub install_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            strategy: SandboxStrategy::default(),
            python: "python3".to_string(),
            packages: Vec::new(),
            timeout_secs: 60,
            install_timeout_secs: 300,
        }
    }
}

impl SandboxConfig {
    #[cfg(test)]
    pub fn with_strategy(mut self, strategy: SandboxStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    #[cfg(test)]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Code handed to the sandbox by `execute_code`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub code: String,
    /// Extra packages to make available before running
    pub packages: Vec<String>,
}

#[cfg(test)]
impl Script {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            packages: Vec::new(),
        }
    }

    pub fn with_packages(mut self, packages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.packages = packages.into_iter().map(Into::into).collect();
        self
    }
}

/// What came back from one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Captured stdout, verbatim
    Output(String),
    /// Error text built from stderr, the exit code, or the spawn failure
    Error(String),
}

impl ExecutionOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Message fed back to the model
    pub fn to_message(&self) -> String {
        match self {
            Self::Output(out) if out.trim().is_empty() => format!("Output of the code was: {}", NO_OUTPUT),
            Self::Output(out) => format!("Output of the code was: {}", out),
            Self::Error(e) => format!("Output of the code was: Error: {}", e),
        }
    }
}

/// Runs scripts for the coder
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    fn strategy(&self) -> SandboxStrategy;

    async fn execute(&self, script: &Script) -> ExecutionOutcome;
}

/// Build the executor selected by `config.strategy`
pub async fn create_executor(config: &SandboxConfig) -> Result<Box<dyn CodeExecutor>> {
    let interpreter = which::which(&config.python)
        .with_context(|| format!("Interpreter '{}' not found on PATH", config.python))?;

    match config.strategy {
        SandboxStrategy::Direct => Ok(Box::new(DirectExecutor::new(interpreter, config.timeout()))),
        SandboxStrategy::Venv => {
            let config = config.clone().with_python(interpreter.to_string_lossy());
            Ok(Box::new(VenvExecutor::create(&config).await?))
        }
    }
}

/// System interpreter in a throwaway directory
#[derive(Debug, Clone)]
pub struct DirectExecutor {
    interpreter: PathBuf,
    timeout: Duration,
}

impl DirectExecutor {
    pub fn new(interpreter: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }
}

#[async_trait]
impl CodeExecutor for DirectExecutor {
    fn strategy(&self) -> SandboxStrategy {
        SandboxStrategy::Direct
    }

    async fn execute(&self, script: &Script) -> ExecutionOutcome {
        if !script.packages.is_empty() {
            warn!(packages = ?script.packages, "Direct strategy cannot install packages; ignoring");
        }

        let scratch = match Builder::new().prefix("relay-run-").tempdir() {
            Ok(dir) => dir,
            Err(e) => return ExecutionOutcome::Error(format!("Failed to create scratch directory: {}", e)),
        };

        run_script(&self.interpreter, scratch.path(), &script.code, self.timeout).await
    }
}

/// Interpreter inside a per-instance virtual environment
pub struct VenvExecutor {
    // Dropping the TempDir removes the environment
    dir: TempDir,
    python: PathBuf,
    timeout: Duration,
    install_timeout: Duration,
    installed: Mutex<HashSet<String>>,
}

impl VenvExecutor {
    /// Create the environment and install the configured packages
    pub async fn create(config: &SandboxConfig) -> Result<Self> {
        let dir = Builder::new()
            .prefix("relay-sandbox-")
            .tempdir()
            .context("Failed to create sandbox directory")?;
        let venv = dir.path().join("venv");
        let install_timeout = Duration::from_secs(config.install_timeout_secs);

        info!(path = %venv.display(), python = %config.python, "Creating sandbox environment");

        let mut cmd = Command::new(&config.python);
        cmd.arg("-m").arg("venv").arg(&venv);
        run_setup(cmd, install_timeout)
            .await
            .with_context(|| format!("Failed to create virtual environment with {}", config.python))?;

        let executor = Self {
            python: venv_python(&venv),
            dir,
            timeout: config.timeout(),
            install_timeout,
            installed: Mutex::new(HashSet::new()),
        };

        executor.install(&config.packages).await?;
        Ok(executor)
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// pip-install whatever is not already present
    async fn install(&self, packages: &[String]) -> Result<()> {
        let missing: Vec<String> = {
            let installed = self.installed.lock();
            packages
                .iter()
                .filter(|p| !installed.contains(p.as_str()))
                .cloned()
                .collect()
        };

        if missing.is_empty() {
            return Ok(());
        }

        info!(packages = ?missing, "Installing sandbox packages");

        let mut cmd = Command::new(&self.python);
        cmd.args(["-m", "pip", "install", "--quiet", "--disable-pip-version-check"])
            .args(&missing);
        run_setup(cmd, self.install_timeout)
            .await
            .with_context(|| format!("Failed to install {}", missing.join(", ")))?;

        self.installed.lock().extend(missing);
        Ok(())
    }
}

impl std::fmt::Debug for VenvExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenvExecutor")
            .field("dir", &self.dir.path())
            .field("python", &self.python)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl CodeExecutor for VenvExecutor {
    fn strategy(&self) -> SandboxStrategy {
        SandboxStrategy::Venv
    }

    async fn execute(&self, script: &Script) -> ExecutionOutcome {
        if let Err(e) = self.install(&script.packages).await {
            return ExecutionOutcome::Error(format!("{:#}", e));
        }
        run_script(&self.python, self.dir.path(), &script.code, self.timeout).await
    }
}

fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

/// Write `code` to a temp file in `workdir` and run `interpreter` on it
async fn run_script(interpreter: &Path, workdir: &Path, code: &str, limit: Duration) -> ExecutionOutcome {
    let mut file = match Builder::new().prefix("script-").suffix(".py").tempfile_in(workdir) {
        Ok(file) => file,
        Err(e) => return ExecutionOutcome::Error(format!("Failed to create script file: {}", e)),
    };
    if let Err(e) = file.write_all(code.as_bytes()).and_then(|_| file.flush()) {
        return ExecutionOutcome::Error(format!("Failed to write script file: {}", e));
    }

    debug!(interpreter = %interpreter.display(), script = %file.path().display(), "Running script");

    let child = Command::new(interpreter)
        .arg(file.path())
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            return ExecutionOutcome::Error(format!(
                "Failed to start {}: {}",
                interpreter.display(),
                e
            ))
        }
    };

    // On timeout the future is dropped, which kills the child
    match timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if output.status.success() {
                ExecutionOutcome::Output(String::from_utf8_lossy(&output.stdout).into_owned())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.trim().is_empty() {
                    let code = output
                        .status
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    ExecutionOutcome::Error(format!("Script exited with code {}", code))
                } else {
                    ExecutionOutcome::Error(stderr.into_owned())
                }
            }
        }
        Ok(Err(e)) => ExecutionOutcome::Error(format!("Failed to run script: {}", e)),
        Err(_) => {
            warn!(timeout_secs = limit.as_secs_f64(), "Script timed out");
            ExecutionOutcome::Error(format!("Script timed out after {:.1} seconds", limit.as_secs_f64()))
        }
    }
}

/// Run a setup command, failing on non-zero exit
async fn run_setup(mut cmd: Command, limit: Duration) -> Result<()> {
    let output = timeout(
        limit,
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Timed out after {} seconds", limit.as_secs()))??;

    if !output.status.success() {
        anyhow::bail!("{}", String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(())
}
