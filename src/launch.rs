//! Launching external tools.
//!
//! `Launcher` is the seam every subprocess goes through. `ShellLauncher`
//! spawns `sh -c` in the run directory; `MockLauncher` records commands and
//! answers through a handler so tests can stand in for the solvers.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::artifacts;
use crate::error::Fatal;

pub trait Launcher: Sync {
    /// Run `cmd` in `cwd`, streaming its output. Returns the exit code
    /// (-1 when terminated by a signal).
    fn run(&self, cmd: &str, cwd: &Path) -> Result<i32>;

    /// Run `cmd` in `cwd` and collect stdout and stderr.
    fn capture(&self, cmd: &str, cwd: &Path) -> Result<(i32, String)>;
}

pub struct ShellLauncher;

impl Launcher for ShellLauncher {
    fn run(&self, cmd: &str, cwd: &Path) -> Result<i32> {
        info!("running command: {}", cmd);
        let status = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .status()
            .with_context(|| format!("failed to execute: {}", cmd))?;
        Ok(status.code().unwrap_or(-1))
    }

    fn capture(&self, cmd: &str, cwd: &Path) -> Result<(i32, String)> {
        debug!("capturing command: {}", cmd);
        let out = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to execute: {}", cmd))?;
        let mut text = String::from_utf8_lossy(&out.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&out.stderr));
        Ok((out.status.code().unwrap_or(-1), text))
    }
}

#[cfg(test)]
type Handler = Box<dyn Fn(&str, &Path, usize) -> i32 + Send + Sync>;

/// Test double: records every command and lets a handler play the tool.
///
/// The handler receives the command, the working directory and the call
/// index, and returns the exit code. It may write files to simulate outputs.
#[cfg(test)]
pub struct MockLauncher {
    handler: Handler,
    output: String,
    calls: std::sync::Mutex<Vec<(String, PathBuf)>>,
}

#[cfg(test)]
impl MockLauncher {
    pub fn new() -> Self {
        Self::with_handler(|_, _, _| 0)
    }

    pub fn with_handler(handler: impl Fn(&str, &Path, usize) -> i32 + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            output: String::new(),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Text returned by `capture`.
    pub fn with_output(mut self, output: &str) -> Self {
        self.output = output.to_string();
        self
    }

    pub fn executed_commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|c| c.iter().map(|(cmd, _)| cmd.clone()).collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<(String, PathBuf)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, cmd: &str, cwd: &Path) -> usize {
        let mut calls = match self.calls.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        calls.push((cmd.to_string(), cwd.to_path_buf()));
        calls.len() - 1
    }
}

#[cfg(test)]
impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Launcher for MockLauncher {
    fn run(&self, cmd: &str, cwd: &Path) -> Result<i32> {
        let idx = self.record(cmd, cwd);
        Ok((self.handler)(cmd, cwd, idx))
    }

    fn capture(&self, cmd: &str, cwd: &Path) -> Result<(i32, String)> {
        let idx = self.record(cmd, cwd);
        Ok(((self.handler)(cmd, cwd, idx), self.output.clone()))
    }
}

/// Locate an executable on PATH.
pub fn which(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// MPI wrapper template with `{n}`, `{cmd}` and optional `{time}` slots.
///
/// An explicit override wins; otherwise the batch environment and the
/// launchers on PATH decide.
pub fn detect_mpi_template(explicit: Option<&str>) -> Option<String> {
    if let Some(t) = explicit {
        return Some(t.to_string());
    }
    if env::var_os("SLURM_JOBID").is_some() {
        if env::var_os("TACC_PUBLIC_MACHINE").is_some() {
            return Some("ibrun -o 0 -n {n} {cmd}".to_string());
        }
        return Some(
            "salloc --ntasks={n} --time={time} mpirun --mca mpi_cuda_support 0 --max-restarts 2 --enable-recovery {cmd}"
                .to_string(),
        );
    }
    if which("mpirun").is_some() {
        return Some("mpirun -n {n} {cmd}".to_string());
    }
    if which("mpiexec").is_some() {
        return Some("mpiexec -n {n} {cmd}".to_string());
    }
    None
}

/// Wall-time budget for a batch allocation, by tool.
pub fn time_budget(cmd: &str) -> &'static str {
    if cmd.contains("SU2_DEF") {
        "0-00:05"
    } else if cmd.contains("SU2_CFD_AD") {
        "0-01:15"
    } else if cmd.contains("SU2_CFD") {
        "0-00:30"
    } else if cmd.contains("SU2_DOT") {
        "0-00:15"
    } else {
        "0-00:30"
    }
}

/// Join the tool directory and wrap in MPI when more than one process is asked.
pub fn build_command(tool_cmd: &str, processes: u32, base: &str, mpi: Option<&str>) -> Result<String> {
    let base = base.trim_end_matches('/');
    let cmd = if base.is_empty() {
        tool_cmd.to_string()
    } else {
        format!("{}/{}", base, tool_cmd)
    };
    if processes <= 1 {
        return Ok(cmd);
    }
    let template = mpi.ok_or(Fatal::NoMpi)?;
    Ok(template
        .replace("{n}", &processes.to_string())
        .replace("{time}", time_budget(&cmd))
        .replace("{cmd}", &cmd))
}

/// Run once and, on a non-zero exit, move `outputs` aside and run the same
/// command one more time. Returns the final exit code.
pub fn run_with_retry(
    launcher: &dyn Launcher,
    cmd: &str,
    cwd: &Path,
    outputs: &[PathBuf],
) -> Result<i32> {
    let code = launcher.run(cmd, cwd)?;
    if code == 0 {
        return Ok(0);
    }
    warn!("command exited with status {}: {}", code, cmd);
    for (from, to) in artifacts::archive_all(outputs)? {
        debug!("archived {} -> {}", from.display(), to.display());
    }
    info!("rerunning command: {}", cmd);
    let code = launcher.run(cmd, cwd)?;
    if code != 0 {
        warn!("command failed again with status {}: {}", code, cmd);
    }
    Ok(code)
}
