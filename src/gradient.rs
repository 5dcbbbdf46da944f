//! Thrust gradients: discrete adjoint when it converges, forward differences
//! otherwise.

use std::fs;
use std::path::Path;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::artifacts;
use crate::audit::AuditLog;
use crate::config::{self, GradientMethod};
use crate::controller::Controller;
use crate::error::Fatal;
use crate::history::{self, HistoryKind, ResidualHistory, ADJOINT_RESIDUAL};
use crate::postprocess;
use crate::runcfg::{self, RunConfig};
use crate::su2::{Suite, Tool};

pub const ADJOINT_HISTORY: &str = "history_adj";
pub const GRADIENT_FILE: &str = "of_grad.dat";

/// Forward difference `(perturbed(i) - baseline) / step` for `i in 0..n`.
///
/// `baseline` runs once, before any perturbation. With `jobs > 1` the
/// perturbations run on scoped worker threads in contiguous chunks; results
/// keep index order either way.
pub fn forward_difference<B, P>(n: usize, baseline: B, perturbed: P, jobs: usize, step: f64) -> Result<Vec<f64>>
where
    B: FnOnce() -> Result<f64>,
    P: Fn(usize) -> Result<f64> + Sync,
{
    let base = baseline()?;

    let values: Vec<Result<f64>> = if jobs <= 1 || n <= 1 {
        (0..n).map(&perturbed).collect()
    } else {
        let chunk = n.div_ceil(jobs);
        let perturbed = &perturbed;
        thread::scope(|s| {
            let handles: Vec<_> = (0..n)
                .step_by(chunk)
                .map(|start| {
                    let end = (start + chunk).min(n);
                    s.spawn(move || (start..end).map(perturbed).collect::<Vec<_>>())
                })
                .collect();
            let mut out = Vec::with_capacity(n);
            for h in handles {
                match h.join() {
                    Ok(chunk) => out.extend(chunk),
                    Err(_) => out.push(Err(anyhow!("finite-difference worker panicked"))),
                }
            }
            out
        })
    };

    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.with_context(|| format!("finite difference for design variable {}", i))
                .map(|q| (q - base) / step)
        })
        .collect()
}

/// Place wall-coefficient sensitivities into the full design vector.
fn spread(grad: &config::Gradients, wall: &[f64]) -> Vec<f64> {
    let mut full = vec![0.0; grad.total_dv];
    for (i, g) in wall.iter().enumerate() {
        full[grad.wall_dv_head + i] = *g;
    }
    full
}

/// Read `of_grad.dat`: one header line, then one sensitivity per wall
/// coefficient in the last column.
pub fn read_adjoint_gradients(path: &Path, grad: &config::Gradients) -> Result<Vec<f64>> {
    if !path.is_file() {
        return Err(Fatal::MissingArtifact { path: path.to_path_buf() }.into());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read gradients: {}", path.display()))?;
    let mut wall = Vec::new();
    for (lineno, line) in text.lines().enumerate().skip(1) {
        let Some(cell) = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .last()
        else {
            continue;
        };
        let v: f64 = cell
            .parse()
            .with_context(|| format!("{}:{}: bad gradient {:?}", path.display(), lineno + 1, cell))?;
        wall.push(v);
    }
    if wall.len() < grad.wall_dv_count {
        bail!(
            "{}: {} gradients for {} wall design variables",
            path.display(),
            wall.len(),
            grad.wall_dv_count
        );
    }
    wall.truncate(grad.wall_dv_count);
    Ok(spread(grad, &wall))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Adjoint,
    FiniteDifference,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThrustGradient {
    pub source: Source,
    /// Full design vector, zero outside the wall coefficients
    pub values: Vec<f64>,
}

/// Solve the discrete adjoint and project it onto the wall coefficients.
///
/// `None` when the adjoint cannot stand in for the gradient: the solver or the
/// projection left no usable output, or the adjoint residual grew.
pub fn adjoint(cfg: &config::Root, suite: &Suite, flow: &RunConfig) -> Result<Option<Vec<f64>>> {
    let ad = runcfg::adjoint_config(flow);
    let mut outputs: Vec<_> = HistoryKind::SEARCH_ORDER
        .iter()
        .map(|k| suite.dir.join(format!("{}.{}", ADJOINT_HISTORY, k.extension())))
        .collect();
    outputs.push(suite.dir.join("nozzle_adj.dat"));
    let grad_file = suite.dir.join(GRADIENT_FILE);

    // results of an earlier invocation must not pass for this one
    artifacts::archive_all(&outputs)?;
    artifacts::archive(&grad_file)?;

    let tool = Tool::flow_solver(&ad);
    info!("running discrete adjoint");
    let code = suite.run(tool, &ad, &outputs)?;
    if code != 0 {
        warn!("{} returned {}", tool.binary(), code);
    }

    let preferred = ad.get("OUTPUT_FORMAT").and_then(HistoryKind::for_output_format);
    let read = match history::find(&suite.dir, ADJOINT_HISTORY, preferred) {
        Some((path, kind)) => ResidualHistory::read(&path, kind, ADJOINT_RESIDUAL),
        None => Err(Fatal::NoHistoryFile { dir: suite.dir.clone() }.into()),
    };
    let h = match read {
        Ok(h) => h,
        Err(e) => {
            warn!("discrete adjoint unavailable: {:#}", e);
            return Ok(None);
        }
    };
    if h.initial() < h.last() {
        warn!(
            "discrete adjoint is not converged (initial {:.4}, final {:.4})",
            h.initial(),
            h.last()
        );
        return Ok(None);
    }
    info!("discrete adjoint converged");

    let dot = runcfg::projection_config(&ad, &cfg.gradients, &cfg.cfd.markers.wall);
    suite.run(Tool::projection(&dot), &dot, &[grad_file.clone()])?;
    match read_adjoint_gradients(&grad_file, &cfg.gradients) {
        Ok(values) => Ok(Some(values)),
        Err(e) => {
            warn!("adjoint gradient projection unavailable: {:#}", e);
            Ok(None)
        }
    }
}

/// Deform the mesh with `wall_{i}.dat` and solve the flow on it, all inside
/// `fd_{i}/` so evaluations never share files.
pub fn perturbed_thrust(cfg: &config::Root, suite: &Suite, flow: &RunConfig, i: usize) -> Result<f64> {
    let dir = suite.dir.join(format!("fd_{}", i));
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let motion = format!("wall_{}.dat", i);
    let mesh_out = format!("nozzle_{}.su2", i);
    for name in [motion.as_str(), cfg.cfd.mesh_name.as_str()] {
        let src = suite.dir.join(name);
        if !src.is_file() {
            return Err(Fatal::MissingArtifact { path: src }.into());
        }
        fs::copy(&src, dir.join(name))
            .with_context(|| format!("failed to copy {} into {}", src.display(), dir.display()))?;
    }

    let sub = suite.in_dir(&dir);
    let mesh_path = dir.join(&mesh_out);
    if mesh_path.exists() {
        fs::remove_file(&mesh_path)?;
    }
    let def = runcfg::deform_config(cfg, &motion, &mesh_out);
    for attempt in 1..=3 {
        info!("design variable {}: deforming mesh (attempt {})", i, attempt);
        sub.run(Tool::Def, &def, &[])?;
        if mesh_path.is_file() {
            break;
        }
    }
    if !mesh_path.is_file() {
        return Err(Fatal::MissingArtifact { path: mesh_path }.into());
    }

    let mut rc = flow.clone();
    rc.set("MESH_FILENAME", &mesh_out);
    rc.set("RESTART_FLOW_FILENAME", format!("nozzle_{}.dat", i));
    rc.set("RESTART_SOL", "NO");

    // outputs of an earlier invocation must not stand in for this solve
    let stem = rc.get("CONV_FILENAME").unwrap_or("history").trim().to_string();
    let stale = HistoryKind::SEARCH_ORDER
        .iter()
        .map(|k| dir.join(format!("{}.{}", stem, k.extension())))
        .chain([dir.join(&cfg.cfd.thrust_filename)]);
    for path in stale {
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
        }
    }

    let audit = AuditLog::create(&dir)?;
    Controller::new(&sub, audit, cfg.cfd.convergence_check).solve(&mut rc)?;

    postprocess::read_thrust(&dir.join(&cfg.cfd.thrust_filename))
}

/// Thrust gradient over the full design vector for `baseline` thrust.
pub fn thrust_gradient(cfg: &config::Root, suite: &Suite, flow: &RunConfig, baseline: f64) -> Result<ThrustGradient> {
    let grad = &cfg.gradients;
    if grad.method == GradientMethod::Adjoint {
        if let Some(values) = adjoint(cfg, suite, flow)? {
            return Ok(ThrustGradient {
                source: Source::Adjoint,
                values,
            });
        }
        warn!("falling back to finite differences");
    }

    info!(
        "finite differences over {} wall design variables ({} job(s))",
        grad.wall_dv_count, grad.jobs
    );
    let wall = forward_difference(
        grad.wall_dv_count,
        || Ok(baseline),
        |i| perturbed_thrust(cfg, suite, flow, i),
        grad.jobs,
        grad.step,
    )?;
    Ok(ThrustGradient {
        source: Source::FiniteDifference,
        values: spread(grad, &wall),
    })
}
