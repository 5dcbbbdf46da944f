//! End-to-end nozzle analysis: mesh, flow solve, gradients, structure,
//! post-processing.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::config::{self, QoiName};
use crate::controller::{Controller, Outcome};
use crate::error::Fatal;
use crate::gradient::{self, ThrustGradient};
use crate::launch::{self, Launcher};
use crate::mesh;
use crate::postprocess;
use crate::qoi::{QoiSet, QoiValue};
use crate::runcfg::{self, RunConfig};
use crate::structural;
use crate::su2::{Su2Version, Suite};

#[derive(Debug)]
pub struct Results {
    pub qois: QoiSet,
    pub flow: Outcome,
    pub thrust_gradient: Option<ThrustGradient>,
    pub su2_version: Option<Su2Version>,
    pub wall_time_ms: f64,
}

pub fn work_dir(cfg: &config::Root) -> Result<PathBuf> {
    let dir = PathBuf::from(&cfg.run.work_dir);
    fs::create_dir_all(&dir).with_context(|| format!("failed to create work dir {}", dir.display()))?;
    Ok(dir)
}

/// Flow configuration for `cfg`, checked against the mesh in `dir`.
pub fn prepare(cfg: &config::Root, dir: &Path) -> Result<RunConfig> {
    let rc = runcfg::flow_config(cfg);
    rc.governing_mode()?;
    let tags = mesh::read_marker_tags(&dir.join(&cfg.cfd.mesh_name))?;
    rc.check_marker_partition(&tags)?;
    Ok(rc)
}

fn open_suite<'a>(cfg: &config::Root, launcher: &'a dyn Launcher, dir: &Path) -> Suite<'a> {
    let mpi = launch::detect_mpi_template(cfg.run.mpi_template.as_deref());
    Suite::new(launcher, dir, &cfg.cfd.su2_run, mpi)
}

fn wants_thrust_gradient(cfg: &config::Root) -> bool {
    cfg.gradients.enabled() && cfg.output(QoiName::Thrust).map(|o| o.gradient).unwrap_or(false)
}

pub fn run(cfg: &config::Root, launcher: &dyn Launcher) -> Result<Results> {
    let start = Instant::now();
    let dir = work_dir(cfg)?;
    let suite = open_suite(cfg, launcher, &dir);

    // local relaxation needs the extended SU2 build
    let mut cfg = cfg.clone();
    let su2_version = if cfg.cfd.local_relax {
        let v = suite.probe_version()?;
        if v == Su2Version::Stock {
            cfg.cfd.local_relax = false;
        }
        Some(v)
    } else {
        None
    };

    if let Some(cmd) = &cfg.cfd.mesh_command {
        info!("generating mesh: {}", cmd);
        let mesh_path = dir.join(&cfg.cfd.mesh_name);
        launch::run_with_retry(launcher, cmd, &dir, &[mesh_path.clone()])?;
        if !mesh_path.is_file() {
            return Err(Fatal::MissingArtifact { path: mesh_path }.into());
        }
    }

    let base = prepare(&cfg, &dir)?;
    let mut flow = base.clone();
    let audit = AuditLog::create(&dir)?;
    info!(
        "flow solve: {} at Mach {}, {} process(es)",
        cfg.cfd.method.as_str(),
        cfg.mission.mach,
        cfg.run.cpus
    );
    let outcome = Controller::new(&suite, audit, cfg.cfd.convergence_check).solve(&mut flow)?;
    if !outcome.converged {
        warn!("continuing with an unconverged flow solution");
    }

    let mut qois = QoiSet::new();
    postprocess::collect(&cfg, launcher, &dir, &mut qois)?;

    let thrust_gradient = if wants_thrust_gradient(&cfg) {
        let baseline = match qois.get(QoiName::Thrust).and_then(QoiValue::as_scalar) {
            Some(t) => t,
            None => postprocess::read_thrust(&dir.join(&cfg.cfd.thrust_filename))?,
        };
        let g = gradient::thrust_gradient(&cfg, &suite, &base, baseline)?;
        qois.set_gradient(QoiName::Thrust, g.values.clone());
        Some(g)
    } else {
        None
    };

    if let Some(st) = cfg.structural.as_ref().filter(|s| s.enabled) {
        structural::run(&cfg, st, launcher, &dir, &mut qois)?;
    }

    qois.require(&cfg.outputs)?;

    Ok(Results {
        qois,
        flow: outcome,
        thrust_gradient,
        su2_version,
        wall_time_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}

/// Gradient stage alone, against the baseline thrust already in the work dir.
pub fn run_gradients(cfg: &config::Root, launcher: &dyn Launcher) -> Result<ThrustGradient> {
    let dir = work_dir(cfg)?;
    let suite = open_suite(cfg, launcher, &dir);
    let base = prepare(cfg, &dir)?;
    let baseline = postprocess::read_thrust(&dir.join(&cfg.cfd.thrust_filename))?;
    gradient::thrust_gradient(cfg, &suite, &base, baseline)
}
