//! Turning solver output files into quantities of interest.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::{self, QoiName};
use crate::error::Fatal;
use crate::launch::{self, Launcher};
use crate::mesh::ExtractionGrid;
use crate::qoi::{QoiSet, QoiValue};

pub const EXTRACT_MESH: &str = "nozzle_extract.mesh";
pub const EXTRACT_OUTPUT: &str = "nozzle_extract.csv";

/// Thrust written by the modified SU2 build.
pub fn read_thrust(path: &Path) -> Result<f64> {
    if !path.is_file() {
        return Err(Fatal::MissingArtifact { path: path.to_path_buf() }.into());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read thrust: {}", path.display()))?;
    let token = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .find(|t| !t.is_empty())
        .with_context(|| format!("thrust file is empty: {}", path.display()))?;
    token
        .parse()
        .with_context(|| format!("bad thrust value {:?} in {}", token, path.display()))
}

fn split_row(line: &str) -> Vec<String> {
    line.split(',')
        .map(|s| s.trim().trim_matches('"').trim().to_string())
        .collect()
}

/// Header-indexed numeric table from a comma separated file.
#[derive(Debug, Clone)]
pub struct Table {
    pub path: PathBuf,
    pub header: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl Table {
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Fatal::MissingArtifact { path: path.to_path_buf() }.into());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().map(split_row).unwrap_or_default();
        let mut rows = Vec::new();
        for (i, line) in lines.enumerate() {
            let row = split_row(line)
                .iter()
                .map(|c| c.parse::<f64>())
                .collect::<Result<Vec<f64>, _>>()
                .with_context(|| format!("{}: bad number on data row {}", path.display(), i + 1))?;
            if row.len() < header.len() {
                bail!("{}: data row {} has {} columns, header has {}", path.display(), i + 1, row.len(), header.len());
            }
            rows.push(row);
        }
        Ok(Self {
            path: path.to_path_buf(),
            header,
            rows,
        })
    }

    pub fn column_index(&self, field: &str) -> Option<usize> {
        self.header.iter().position(|h| h == field)
    }

    pub fn column(&self, field: &str) -> Result<Vec<f64>> {
        let idx = self.column_index(field).ok_or_else(|| Fatal::MissingField {
            field: field.to_string(),
            path: self.path.clone(),
        })?;
        Ok(self.rows.iter().map(|r| r[idx]).collect())
    }
}

/// Flow fields along the nozzle wall, ordered by x.
#[derive(Debug, Clone)]
pub struct WallSurface {
    pub x: Vec<f64>,
    fields: BTreeMap<String, Vec<f64>>,
}

impl WallSurface {
    pub fn read(path: &Path) -> Result<Self> {
        let table = Table::read(path)?;
        let x = table.column("x")?;
        let mut order: Vec<usize> = (0..x.len()).collect();
        order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));

        let mut fields = BTreeMap::new();
        for (i, name) in table.header.iter().enumerate() {
            let col: Vec<f64> = order.iter().map(|&r| table.rows[r][i]).collect();
            fields.insert(name.clone(), col);
        }
        Ok(Self {
            x: order.iter().map(|&r| x[r]).collect(),
            fields,
        })
    }

    /// Linear interpolation of `field` at each station.
    pub fn sample(&self, field: &str, stations: &[f64]) -> Result<Vec<f64>> {
        let values = self.fields.get(field).ok_or_else(|| Fatal::Unsupported {
            detail: format!("wall field {} is not available from the flow solution", field),
        })?;
        stations.iter().map(|&s| interpolate(&self.x, values, s)).collect()
    }
}

/// Piecewise linear interpolation; `xs` ascending. No extrapolation.
pub fn interpolate(xs: &[f64], ys: &[f64], at: f64) -> Result<f64> {
    let (Some(&lo), Some(&hi)) = (xs.first(), xs.last()) else {
        bail!("cannot interpolate on an empty table");
    };
    if at < lo || at > hi {
        return Err(Fatal::Unsupported {
            detail: format!("station {} lies outside the wall range [{}, {}]", at, lo, hi),
        }
        .into());
    }
    let k = xs.partition_point(|&x| x < at);
    if k == 0 {
        return Ok(ys[0]);
    }
    let (x0, x1) = (xs[k - 1], xs[k]);
    if x1 == x0 {
        return Ok(ys[k]);
    }
    let t = (at - x0) / (x1 - x0);
    Ok(ys[k - 1] + t * (ys[k] - ys[k - 1]))
}

/// Momentum over density; the solution is planar.
pub fn velocity(rho: f64, rho_u: f64, rho_v: f64) -> [f64; 3] {
    [rho_u / rho, rho_v / rho, 0.0]
}

/// Samples the flow solution at arbitrary points through the external
/// interpolation tool.
pub struct PointExtractor<'a> {
    pub launcher: &'a dyn Launcher,
    pub dir: PathBuf,
    pub command: String,
    pub mesh_name: String,
    pub restart_name: String,
}

impl PointExtractor<'_> {
    /// Values of `fields` at each point, one row per point.
    pub fn extract(&self, points: &[[f64; 2]], fields: &[&str]) -> Result<Vec<Vec<f64>>> {
        let grid = ExtractionGrid::new(points);
        grid.write_gmf(&self.dir.join(EXTRACT_MESH))?;

        let output = self.dir.join(EXTRACT_OUTPUT);
        let cmd = format!(
            "{} {} {} {} {}",
            self.command, EXTRACT_MESH, self.mesh_name, self.restart_name, EXTRACT_OUTPUT
        );
        launch::run_with_retry(self.launcher, &cmd, &self.dir, &[output.clone()])?;

        let table = Table::read(&output)?;
        if table.rows.len() < grid.vertex_count() {
            bail!(
                "{}: {} rows for {} grid vertices",
                output.display(),
                table.rows.len(),
                grid.vertex_count()
            );
        }
        let columns = fields
            .iter()
            .map(|f| {
                table.column_index(f).ok_or_else(|| Fatal::MissingField {
                    field: f.to_string(),
                    path: output.clone(),
                })
            })
            .collect::<Result<Vec<usize>, Fatal>>()?;

        Ok(grid
            .point_vertex
            .iter()
            .map(|&v| columns.iter().map(|&c| table.rows[v][c]).collect())
            .collect())
    }
}

/// Fill `qois` with every flow-side output the configuration asks for.
pub fn collect(cfg: &config::Root, launcher: &dyn Launcher, dir: &Path, qois: &mut QoiSet) -> Result<()> {
    let cfd = &cfg.cfd;

    if cfg.wants(QoiName::Thrust) {
        let thrust = read_thrust(&dir.join(&cfd.thrust_filename))?;
        info!("thrust: {:.6}", thrust);
        qois.set(QoiName::Thrust, QoiValue::Scalar(thrust));
    }

    let wall_outputs: Vec<&config::Output> = cfg.outputs.iter().filter(|o| o.name.is_wall()).collect();
    if !wall_outputs.is_empty() {
        let surface = WallSurface::read(&dir.join(&cfd.surface_filename))?;
        for out in wall_outputs {
            let field = match out.name {
                QoiName::WallTemperature => "Temperature",
                _ => "Pressure",
            };
            qois.set(out.name, QoiValue::Vector(surface.sample(field, &out.x)?));
        }
    }

    let extractor = PointExtractor {
        launcher,
        dir: dir.to_path_buf(),
        command: cfd.interpolation_command.clone(),
        mesh_name: cfd.mesh_name.clone(),
        restart_name: cfd.restart_name.clone(),
    };
    for out in cfg.outputs.iter().filter(|o| o.name.is_field()) {
        let value = match out.name {
            QoiName::Velocity => {
                let cons = extractor.extract(&out.points, &["Conservative_1", "Conservative_2", "Conservative_3"])?;
                QoiValue::Vector3(cons.iter().map(|c| velocity(c[0], c[1], c[2])).collect())
            }
            QoiName::Temperature => {
                QoiValue::Vector(extractor.extract(&out.points, &["Temperature"])?.into_iter().map(|r| r[0]).collect())
            }
            _ => QoiValue::Vector(extractor.extract(&out.points, &["Pressure"])?.into_iter().map(|r| r[0]).collect()),
        };
        qois.set(out.name, value);
    }
    Ok(())
}
