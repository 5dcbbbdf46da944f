//! The SU2 suite tools, each consuming a Run Configuration written to
//! `config_<TOOL>.cfg` in the run directory.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use crate::launch::{self, Launcher};
use crate::runcfg::RunConfig;

/// Option consumed here to size the launch; never written for the tool.
pub const PARTITIONS_KEY: &str = "NUMBER_PART";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Cfd,
    CfdAd,
    CfdDirectDiff,
    Def,
    Dot,
    DotAd,
}

impl Tool {
    pub fn binary(&self) -> &'static str {
        match self {
            Tool::Cfd => "SU2_CFD",
            Tool::CfdAd => "SU2_CFD_AD",
            Tool::CfdDirectDiff => "SU2_CFD_DIRECTDIFF",
            Tool::Def => "SU2_DEF",
            Tool::Dot => "SU2_DOT",
            Tool::DotAd => "SU2_DOT_AD",
        }
    }

    pub fn config_name(&self) -> &'static str {
        match self {
            Tool::Cfd => "config_CFD.cfg",
            Tool::CfdAd => "config_CFD_AD.cfg",
            Tool::CfdDirectDiff => "config_CFD_DIRECTDIFF.cfg",
            Tool::Def => "config_DEF.cfg",
            Tool::Dot => "config_DOT.cfg",
            Tool::DotAd => "config_DOT_AD.cfg",
        }
    }

    /// Flow solver build matching the configuration's differentiation mode.
    pub fn flow_solver(rc: &RunConfig) -> Tool {
        let direct_diff = rc
            .get("DIRECT_DIFF")
            .map(|v| !matches!(v.trim(), "" | "NONE"))
            .unwrap_or(false);
        if direct_diff {
            Tool::CfdDirectDiff
        } else if rc.get("MATH_PROBLEM") == Some("DISCRETE_ADJOINT") {
            Tool::CfdAd
        } else {
            Tool::Cfd
        }
    }

    /// Gradient projection build matching the configuration.
    pub fn projection(rc: &RunConfig) -> Tool {
        if rc.get("MATH_PROBLEM") == Some("DISCRETE_ADJOINT") || rc.is_yes("AUTO_DIFF") {
            Tool::DotAd
        } else {
            Tool::Dot
        }
    }
}

/// Result of probing the installed `SU2_CFD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Su2Version {
    /// Build with local relaxation support
    Extended,
    Stock,
}

/// Where and how SU2 tools are launched.
pub struct Suite<'a> {
    launcher: &'a dyn Launcher,
    pub dir: PathBuf,
    base: String,
    mpi: Option<String>,
}

impl<'a> Suite<'a> {
    pub fn new(launcher: &'a dyn Launcher, dir: &Path, base: &str, mpi: Option<String>) -> Self {
        Self {
            launcher,
            dir: dir.to_path_buf(),
            base: base.to_string(),
            mpi,
        }
    }

    /// Same installation, different run directory.
    pub fn in_dir(&self, dir: &Path) -> Suite<'a> {
        Suite {
            launcher: self.launcher,
            dir: dir.to_path_buf(),
            base: self.base.clone(),
            mpi: self.mpi.clone(),
        }
    }

    /// Write the tool's configuration and launch it, retrying once on a
    /// non-zero exit after moving `outputs` aside.
    pub fn run(&self, tool: Tool, rc: &RunConfig, outputs: &[PathBuf]) -> Result<i32> {
        let mut written = rc.clone();
        let processes = written
            .remove(PARTITIONS_KEY)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(1);
        written.write(&self.dir.join(tool.config_name()))?;

        let tool_cmd = format!("{} {}", tool.binary(), tool.config_name());
        let cmd = launch::build_command(&tool_cmd, processes, &self.base, self.mpi.as_deref())?;
        launch::run_with_retry(self.launcher, &cmd, &self.dir, outputs)
    }

    /// Run `SU2_CFD` without arguments and look for the extended build banner.
    pub fn probe_version(&self) -> Result<Su2Version> {
        let cmd = launch::build_command(Tool::Cfd.binary(), 1, &self.base, None)?;
        let (_, output) = self.launcher.capture(&cmd, &self.dir)?;
        if output.contains("DARPA") {
            info!("SU2 version check: OK");
            Ok(Su2Version::Extended)
        } else {
            warn!("SU2 build lacks local relaxation support; this may cause robustness issues");
            Ok(Su2Version::Stock)
        }
    }
}
