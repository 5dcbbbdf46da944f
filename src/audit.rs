use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const AUDIT_FILE: &str = "about.txt";

/// Append-only journal of what the solver controller did in a run directory.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Start a fresh journal, truncating any previous one.
    pub fn create(dir: &Path) -> Result<Self> {
        let path = dir.join(AUDIT_FILE);
        fs::write(&path, "").with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn write(&self, line: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(f, "{}", line)?;
        Ok(())
    }

    pub fn residuals(&self, final_residual: f64, reduction: f64) -> Result<()> {
        self.write(&format!("Final residual: {:.16}", final_residual))?;
        self.write(&format!("Residual reduction: {:.16}", reduction))
    }

    #[cfg(test)]
    pub fn read(&self) -> Result<String> {
        fs::read_to_string(&self.path).with_context(|| format!("failed to read {}", self.path.display()))
    }
}
