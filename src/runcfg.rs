//! Run Configuration: the flat option map handed to an SU2 tool.
//!
//! Options keep insertion order so the written file reads top to bottom the
//! way it was assembled. Builders below translate a nozzle description into
//! the flow, deformation, adjoint and projection configurations.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::{self, GradientMethod, Method};
use crate::error::Fatal;
use crate::flow::{Freestream, MU_REF, T_REF};

/// Local relaxation schedule used on the first attempt.
pub const CFL_LOCAL_DEFAULT: &str = "( 0.1, 1.5, 1e-12, 20.0 )";
/// More conservative schedule used when escalating.
pub const CFL_LOCAL_CONSERVATIVE: &str = "( 0.1, 1.5, 1e-12, 10.0 )";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfig {
    entries: Vec<(String, String)>,
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an option, keeping its original position on replace.
    pub fn set(&mut self, key: &str, value: impl Display) {
        let value = value.to_string();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_yes(&self, key: &str) -> bool {
        self.get(key).map(|v| v.trim() == "YES").unwrap_or(false)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse `KEY= value` lines. `%` starts a comment.
    #[cfg(test)]
    pub fn parse(text: &str) -> Self {
        let mut cfg = Self::new();
        for line in text.lines() {
            let line = match line.find('%') {
                Some(i) => &line[..i],
                None => line,
            };
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if !key.is_empty() {
                    cfg.set(key, value.trim());
                }
            }
        }
        cfg
    }

    #[cfg(test)]
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read run config: {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_string())
            .with_context(|| format!("failed to write run config: {}", path.display()))
    }

    /// Resolve the governing-equation mode.
    ///
    /// `PHYSICAL_PROBLEM` must be `EULER` or `NAVIER_STOKES` with a turbulence
    /// model; wall markers of the other mode make the selection conflicting.
    pub fn governing_mode(&self) -> Result<Method, Fatal> {
        let problem = self.get("PHYSICAL_PROBLEM").ok_or_else(|| Fatal::GoverningMode {
            detail: "PHYSICAL_PROBLEM is not set".to_string(),
        })?;
        let turb = self
            .get("KIND_TURB_MODEL")
            .map(str::trim)
            .filter(|m| *m != "NONE");

        match problem.trim() {
            "EULER" => {
                if let Some(model) = turb {
                    return Err(Fatal::GoverningMode {
                        detail: format!("EULER selected together with turbulence model {}", model),
                    });
                }
                if self.contains("MARKER_HEATFLUX") {
                    return Err(Fatal::GoverningMode {
                        detail: "EULER selected together with viscous wall markers".to_string(),
                    });
                }
                Ok(Method::Euler)
            }
            "NAVIER_STOKES" => {
                if turb.is_none() {
                    return Err(Fatal::GoverningMode {
                        detail: "NAVIER_STOKES selected without a turbulence model".to_string(),
                    });
                }
                if self.contains("MARKER_EULER") {
                    return Err(Fatal::GoverningMode {
                        detail: "RANS selected together with inviscid wall markers".to_string(),
                    });
                }
                Ok(Method::Rans)
            }
            other => Err(Fatal::GoverningMode {
                detail: format!("unknown PHYSICAL_PROBLEM {}", other),
            }),
        }
    }

    /// Boundary tags per marker option, as written.
    pub fn marker_groups(&self) -> BTreeMap<&'static str, Vec<String>> {
        let mut groups = BTreeMap::new();
        for key in ["MARKER_EULER", "MARKER_FAR", "MARKER_SYM", "MARKER_INTERNAL"] {
            if let Some(v) = self.get(key) {
                groups.insert(key, list_items(v));
            }
        }
        // (tag, flux, tag, flux, ...)
        if let Some(v) = self.get("MARKER_HEATFLUX") {
            groups.insert("MARKER_HEATFLUX", list_items(v).into_iter().step_by(2).collect());
        }
        // (tag, Tt, Pt, nx, ny, nz) per inlet
        if let Some(v) = self.get("MARKER_INLET") {
            groups.insert("MARKER_INLET", list_items(v).into_iter().step_by(6).collect());
        }
        groups
    }

    /// Check that the marker options partition `mesh_tags`: every tag is
    /// assigned exactly once and no marker names a tag the mesh lacks.
    pub fn check_marker_partition(&self, mesh_tags: &[String]) -> Result<(), Fatal> {
        let mut owner: BTreeMap<String, &'static str> = BTreeMap::new();
        for (group, tags) in self.marker_groups() {
            for tag in tags {
                if let Some(prev) = owner.insert(tag.clone(), group) {
                    return Err(Fatal::MarkerPartition {
                        detail: format!("tag {} assigned to both {} and {}", tag, prev, group),
                    });
                }
            }
        }

        for tag in owner.keys() {
            if !mesh_tags.iter().any(|t| t == tag) {
                return Err(Fatal::MarkerPartition {
                    detail: format!("tag {} is not a boundary of the mesh", tag),
                });
            }
        }
        let missing: Vec<&str> = mesh_tags
            .iter()
            .filter(|t| !owner.contains_key(t.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(Fatal::MarkerPartition {
                detail: format!("mesh tags without a marker: {}", missing.join(", ")),
            });
        }
        Ok(())
    }
}

impl Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.entries {
            writeln!(f, "{}= {}", k, v)?;
        }
        Ok(())
    }
}

fn list_items(value: &str) -> Vec<String> {
    value
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn tag_list(tags: &[u32]) -> String {
    let items: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    format!("( {} )", items.join(", "))
}

/// Wall tags with a zero heat flux after each.
fn heatflux_list(tags: &[u32]) -> String {
    let items: Vec<String> = tags.iter().map(|t| format!("{}, 0.0", t)).collect();
    format!("( {} )", items.join(", "))
}

pub fn freestream(cfg: &config::Root) -> Freestream {
    Freestream::new(
        cfg.mission.mach,
        cfg.environment.pressure,
        cfg.environment.temperature,
        cfg.geometry.exit_radius,
    )
}

/// Flow configuration for `SU2_CFD`.
pub fn flow_config(cfg: &config::Root) -> RunConfig {
    let fs = freestream(cfg);
    let cfd = &cfg.cfd;
    let mut rc = RunConfig::new();

    rc.set("NUMBER_PART", cfg.run.cpus);

    match cfd.method {
        Method::Euler => {
            rc.set("PHYSICAL_PROBLEM", "EULER");
            rc.set("NUM_METHOD_GRAD", "WEIGHTED_LEAST_SQUARES");
            rc.set("CFL_NUMBER", "5");
            rc.set("CFL_ADAPT", "NO");
            rc.set("MAX_DELTA_TIME", "1E6");
            rc.set("LINEAR_SOLVER", "FGMRES");
            rc.set("LINEAR_SOLVER_ERROR", "1E-6");
            rc.set("LINEAR_SOLVER_ITER", "3");
            rc.set("LIMITER_ITER", "500");
        }
        Method::Rans => {
            rc.set("PHYSICAL_PROBLEM", "NAVIER_STOKES");
            rc.set("KIND_TURB_MODEL", "SST");
            rc.set("REYNOLDS_NUMBER", format!("{:.6}", fs.reynolds));
            rc.set("REYNOLDS_LENGTH", format!("{:.6}", fs.reynolds_length));
            rc.set("VISCOSITY_MODEL", "SUTHERLAND");
            rc.set("MU_CONSTANT", MU_REF);
            rc.set("MU_REF", MU_REF);
            rc.set("MU_T_REF", T_REF);
            rc.set("NUM_METHOD_GRAD", "GREEN_GAUSS");
            rc.set("CFL_NUMBER", "5");
            rc.set("CFL_ADAPT", "NO");
            rc.set("LINEAR_SOLVER", "FGMRES");
            rc.set("LINEAR_SOLVER_PREC", "LU_SGS");
            rc.set("LINEAR_SOLVER_ERROR", "1E-4");
            rc.set("LINEAR_SOLVER_ITER", "3");
        }
    }

    rc.set("MATH_PROBLEM", "DIRECT");
    rc.set("RESTART_SOL", "NO");
    rc.set("SYSTEM_MEASUREMENTS", "SI");
    rc.set("REGIME_TYPE", "COMPRESSIBLE");
    rc.set("EXT_ITER", cfd.max_iterations);
    rc.set("RK_ALPHA_COEFF", "( 0.66667, 0.66667, 1.000000 )");

    rc.set("MACH_NUMBER", format!("{:.6}", fs.mach));
    rc.set("FREESTREAM_PRESSURE", format!("{:.6}", fs.pressure));
    rc.set("FREESTREAM_TEMPERATURE", format!("{:.6}", fs.temperature));
    rc.set("REF_DIMENSIONALIZATION", "DIMENSIONAL");

    let m = &cfd.markers;
    match cfd.method {
        Method::Euler => rc.set("MARKER_EULER", tag_list(&m.wall)),
        Method::Rans => rc.set("MARKER_HEATFLUX", heatflux_list(&m.wall)),
    }
    if let Some(inlet) = m.inlet.first() {
        rc.set(
            "MARKER_INLET",
            format!("( {}, {:.6}, {:.6}, 1.0, 0.0, 0.0 )", inlet, cfg.inlet.tstag, cfg.inlet.pstag),
        );
    }
    rc.set("MARKER_FAR", tag_list(&m.farfield));
    if !m.symmetry.is_empty() {
        rc.set("MARKER_SYM", tag_list(&m.symmetry));
    }
    if !m.internal.is_empty() {
        rc.set("MARKER_INTERNAL", tag_list(&m.internal));
    }

    rc.set("REF_SHARP_EDGES", "3.0");
    rc.set("SENS_REMOVE_SHARP", "NO");

    rc.set("MGLEVEL", "3");
    rc.set("MGCYCLE", "V_CYCLE");
    rc.set("MG_PRE_SMOOTH", "( 1, 2, 3, 3 )");
    rc.set("MG_POST_SMOOTH", "( 0, 0, 0, 0 )");
    rc.set("MG_CORRECTION_SMOOTH", "( 0, 0, 0, 0 )");
    rc.set("MG_DAMP_RESTRICTION", "0.75");
    rc.set("MG_DAMP_PROLONGATION", "0.75");

    rc.set("MUSCL_FLOW", "YES");
    rc.set("VENKAT_LIMITER_COEFF", "0.05");
    rc.set("JST_SENSOR_COEFF", "( 0.5, 0.03 )");
    rc.set("CONV_NUM_METHOD_FLOW", "JST");
    rc.set("SLOPE_LIMITER_FLOW", "VENKATAKRISHNAN");
    rc.set("TIME_DISCRE_FLOW", "EULER_IMPLICIT");
    if cfd.method == Method::Rans {
        rc.set("ENTROPY_FIX_COEFF", "0.0");
        rc.set("CONV_NUM_METHOD_TURB", "SCALAR_UPWIND");
        rc.set("SLOPE_LIMITER_TURB", "VENKATAKRISHNAN");
        rc.set("TIME_DISCRE_TURB", "EULER_IMPLICIT");
        rc.set("CFL_REDUCTION_TURB", "0.6");
        rc.set("RELAXATION_FACTOR_TURB", "0.5");
    }

    // the adjoint needs a tightly converged primal
    let order = if cfg.gradients.method == GradientMethod::Adjoint {
        cfd.convergence_order.max(8.0)
    } else {
        cfd.convergence_order
    };
    rc.set("CONV_CRITERIA", "RESIDUAL");
    rc.set("RESIDUAL_REDUCTION", order);
    rc.set("RESIDUAL_MINVAL", "-12");
    rc.set("STARTCONV_ITER", "25");

    rc.set("WRT_BINARY_RESTART", "NO");
    rc.set("READ_BINARY_RESTART", "NO");
    rc.set("MESH_FILENAME", &cfd.mesh_name);
    rc.set("OUTPUT_FORMAT", cfd.output_format.as_str());
    rc.set("CONV_FILENAME", &cfd.conv_filename);
    rc.set("RESTART_FLOW_FILENAME", &cfd.restart_name);
    rc.set("WRT_SOL_FREQ", "500");
    rc.set("WRT_CON_FREQ", "1");

    if cfd.local_relax && cfd.method == Method::Euler {
        rc.set("RELAXATION_LOCAL", "YES");
        rc.set("CFL_ADAPT_LOCAL", "YES");
        rc.set("HARD_LIMITING_PARAM", "( 0.15, 1e-5 )");
        rc.set("CFL_ADAPT_LOCAL_PARAM", CFL_LOCAL_DEFAULT);
        rc.set("RESIDUAL_MAXVAL", "2");
    }

    rc.set("OBJECTIVE_FUNCTION", "THRUST_NOZZLE");

    if let Some(sst) = cfd.sst_perturbation {
        rc.set("RESTART_SOL", "NO");
        rc.set("USING_UQ", "YES");
        rc.set("BETA_DELTA", "1");
        rc.set("URLX", "0.1");
        rc.set("COMPONENTALITY", sst.componentality());
        rc.set("PERMUTE", if sst.permute() { "YES" } else { "NO" });
    }

    rc
}

/// Discrete adjoint of the flow configuration, for `SU2_CFD_AD`.
pub fn adjoint_config(flow: &RunConfig) -> RunConfig {
    let mut rc = flow.clone();
    rc.set("MATH_PROBLEM", "DISCRETE_ADJOINT");
    rc.set("RESTART_SOL", "NO");
    rc.set("RESIDUAL_REDUCTION", "10");
    rc.set("RESIDUAL_MINVAL", "-200");
    rc.set("CONV_FILENAME", "history_adj");
    rc.set("RESTART_ADJ_FILENAME", "nozzle_adj.dat");
    let restart = flow.get("RESTART_FLOW_FILENAME").unwrap_or("nozzle.dat").to_string();
    rc.set("SOLUTION_FLOW_FILENAME", restart);
    rc.set("WRT_SOL_FREQ", "100");
    rc
}

/// Projection of the adjoint sensitivities onto wall coefficients, for `SU2_DOT_AD`.
pub fn projection_config(adjoint: &RunConfig, grad: &config::Gradients, wall: &[u32]) -> RunConfig {
    let mut rc = adjoint.clone();
    rc.set("NUMBER_PART", 1);
    rc.set("SOLUTION_ADJ_FILENAME", "nozzle_adj.dat");
    rc.set("GEO_MODE", "FUNCTION");
    rc.set("DV_MARKER", tag_list(wall));

    let n = grad.wall_dv_count;
    let kinds = vec!["BSPLINECOEF"; n].join(", ");
    let params: Vec<String> = (0..n).map(|i| format!("( {} )", i + 1)).collect();
    let values = vec!["0.001"; n].join(", ");
    rc.set("DV_KIND", kinds);
    rc.set("DV_PARAM", params.join("; "));
    rc.set("DV_VALUE", values);

    rc.set("DEFORM_LINEAR_ITER", "100");
    rc.set("DEFORM_NONLINEAR_ITER", "50");
    rc.set("DEFORM_CONSOLE_OUTPUT", "YES");
    rc.set("DEFORM_TOL_FACTOR", "0.0001");
    rc.set("DEFORM_STIFFNESS_TYPE", "WALL_DISTANCE");
    rc.set("SAVE_DEF_FILE", "YES");
    rc
}

/// Mesh deformation for `SU2_DEF` driven by a wall motion file.
pub fn deform_config(cfg: &config::Root, motion_file: &str, mesh_out: &str) -> RunConfig {
    let m = &cfg.cfd.markers;
    let mut rc = RunConfig::new();
    rc.set("NUMBER_PART", cfg.run.cpus);
    rc.set("MESH_FILENAME", &cfg.cfd.mesh_name);
    rc.set("MESH_OUT_FILENAME", mesh_out);
    rc.set("DV_KIND", "SURFACE_FILE");
    rc.set("DV_MARKER", tag_list(&m.wall));
    rc.set("MOTION_FILENAME", motion_file);
    rc.set("DEFORM_LINEAR_SOLVER", "FGMRES");
    rc.set("DEFORM_LINEAR_ITER", "500");
    rc.set("DEFORM_NONLINEAR_ITER", "5");
    rc.set("DEFORM_CONSOLE_OUTPUT", "YES");
    rc.set("DEFORM_TOL_FACTOR", "1e-6");
    rc.set("DEFORM_STIFFNESS_TYPE", "WALL_DISTANCE");
    rc.set("HOLD_GRID_FIXED", "NO");
    rc.set("HOLD_GRID_FIXED_COORD", "( -1e6, -1e6, -1e6, 1e6, 1e6, 1e6 )");
    rc.set("VISUALIZE_DEFORMATION", "YES");
    rc.set("MARKER_MOVING", tag_list(&m.wall));
    rc
}
