//! AEROS structural stage.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{self, QoiName};
use crate::error::Fatal;
use crate::launch::{self, Launcher};
use crate::qoi::{QoiSet, QoiValue};

/// `KEY value` pairs, one per line. Blank lines and `#` comments are skipped.
pub fn read_results(path: &Path) -> Result<BTreeMap<String, f64>> {
    if !path.is_file() {
        return Err(Fatal::MissingArtifact { path: path.to_path_buf() }.into());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read structural results: {}", path.display()))?;
    let mut out = BTreeMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let v: f64 = value
            .parse()
            .with_context(|| format!("{}:{}: bad value {:?}", path.display(), lineno + 1, value))?;
        out.insert(key.to_uppercase(), v);
    }
    Ok(out)
}

/// Run AEROS on the configured input and record MASS/VOLUME when requested.
pub fn run(cfg: &config::Root, st: &config::Structural, launcher: &dyn Launcher, dir: &Path, qois: &mut QoiSet) -> Result<()> {
    let results = dir.join(&st.results_file);
    let cmd = format!("{} {}", st.command, st.input);
    info!("running structural analysis: {}", cmd);
    launch::run_with_retry(launcher, &cmd, dir, &[results.clone()])?;

    let values = read_results(&results)?;
    for name in [QoiName::Mass, QoiName::Volume] {
        if !cfg.wants(name) {
            continue;
        }
        let v = values
            .get(name.as_str())
            .copied()
            .ok_or_else(|| Fatal::MissingQoi { name: name.as_str().to_string() })?;
        info!("{}: {:.6}", name.as_str(), v);
        qois.set(name, QoiValue::Scalar(v));
    }
    Ok(())
}
