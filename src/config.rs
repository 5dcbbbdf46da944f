use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Root {
    pub project: Project,
    pub mission: Mission,
    pub environment: Environment,
    pub inlet: Inlet,
    pub geometry: Geometry,
    pub cfd: Cfd,
    #[serde(default)]
    pub run: Run,
    #[serde(default)]
    pub gradients: Gradients,
    #[serde(default)]
    pub outputs: Vec<Output>,
    pub structural: Option<Structural>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Mission {
    pub mach: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Environment {
    /// Freestream static pressure, Pa
    pub pressure: f64,
    /// Freestream static temperature, K
    pub temperature: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Inlet {
    pub pstag: f64,
    pub tstag: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Geometry {
    /// Nozzle exit radius, used as the Reynolds length
    pub exit_radius: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Euler,
    Rans,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Euler => "EULER",
            Method::Rans => "RANS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputFormat {
    Csv,
    Tecplot,
    Paraview,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Csv, OutputFormat::Tecplot, OutputFormat::Paraview];

    /// Inverse of `as_str`.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == value.trim())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "CSV",
            OutputFormat::Tecplot => "TECPLOT",
            OutputFormat::Paraview => "PARAVIEW",
        }
    }

    /// Extension SU2 appends to the convergence history file.
    pub fn history_extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Tecplot => "dat",
            OutputFormat::Paraview => "vtk",
        }
    }
}

/// Eddy-viscosity perturbations for RANS uncertainty runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SstPerturbation {
    #[serde(rename = "SSTC1")]
    C1,
    #[serde(rename = "SSTC2")]
    C2,
    #[serde(rename = "SSTC3")]
    C3,
    #[serde(rename = "SSTP1C1")]
    P1C1,
    #[serde(rename = "SSTP1C2")]
    P1C2,
}

impl SstPerturbation {
    pub fn componentality(&self) -> u8 {
        match self {
            SstPerturbation::C1 | SstPerturbation::P1C1 => 1,
            SstPerturbation::C2 | SstPerturbation::P1C2 => 2,
            SstPerturbation::C3 => 3,
        }
    }

    pub fn permute(&self) -> bool {
        matches!(self, SstPerturbation::P1C1 | SstPerturbation::P1C2)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Cfd {
    pub method: Method,
    /// Directory holding the SU2 binaries; empty means PATH lookup
    #[serde(default)]
    pub su2_run: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_convergence_order")]
    pub convergence_order: f64,
    #[serde(default = "default_mesh_name")]
    pub mesh_name: String,
    #[serde(default = "default_restart_name")]
    pub restart_name: String,
    #[serde(default = "default_output_format")]
    pub output_format: OutputFormat,
    #[serde(default = "default_conv_filename")]
    pub conv_filename: String,
    #[serde(default)]
    pub local_relax: bool,
    #[serde(default = "default_true")]
    pub convergence_check: bool,
    #[serde(default = "default_thrust_filename")]
    pub thrust_filename: String,
    #[serde(default = "default_surface_filename")]
    pub surface_filename: String,
    pub sst_perturbation: Option<SstPerturbation>,
    /// External mesh generator, run in the work dir before the flow solve
    pub mesh_command: Option<String>,
    /// Solution interpolation tool used for point extraction
    #[serde(default = "default_interpolation_command")]
    pub interpolation_command: String,
    pub markers: Markers,
}

fn default_max_iterations() -> u32 { 1000 }
fn default_convergence_order() -> f64 { 6.0 }
fn default_mesh_name() -> String { "nozzle.su2".to_string() }
fn default_restart_name() -> String { "nozzle.dat".to_string() }
fn default_output_format() -> OutputFormat { OutputFormat::Csv }
fn default_conv_filename() -> String { "history".to_string() }
fn default_thrust_filename() -> String { "thrust_nodef.dat".to_string() }
fn default_surface_filename() -> String { "surface_flow.csv".to_string() }
fn default_interpolation_command() -> String { "mshint".to_string() }
fn default_true() -> bool { true }

/// Boundary tags grouped by role.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Markers {
    pub wall: Vec<u32>,
    pub inlet: Vec<u32>,
    pub farfield: Vec<u32>,
    #[serde(default)]
    pub symmetry: Vec<u32>,
    /// Internal surface the thrust is integrated over
    #[serde(default)]
    pub internal: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Run {
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    /// MPI wrapper with `{n}` and `{cmd}` placeholders (and optionally `{time}`)
    pub mpi_template: Option<String>,
}

fn default_cpus() -> u32 { 1 }
fn default_work_dir() -> String { ".".to_string() }

impl Default for Run {
    fn default() -> Self {
        Self {
            cpus: 1,
            work_dir: ".".to_string(),
            mpi_template: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GradientMethod {
    None,
    Adjoint,
    FiniteDiff,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Gradients {
    #[serde(default = "default_gradient_method")]
    pub method: GradientMethod,
    /// Index of the first wall coefficient in the full design vector
    #[serde(default)]
    pub wall_dv_head: usize,
    #[serde(default)]
    pub wall_dv_count: usize,
    /// Length of the full design vector
    #[serde(default)]
    pub total_dv: usize,
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    #[serde(default = "default_step")]
    pub step: f64,
}

fn default_gradient_method() -> GradientMethod { GradientMethod::None }
fn default_jobs() -> usize { 1 }
fn default_step() -> f64 { 1.0 }

impl Default for Gradients {
    fn default() -> Self {
        Self {
            method: GradientMethod::None,
            wall_dv_head: 0,
            wall_dv_count: 0,
            total_dv: 0,
            jobs: 1,
            step: 1.0,
        }
    }
}

impl Gradients {
    pub fn enabled(&self) -> bool {
        self.method != GradientMethod::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QoiName {
    Thrust,
    WallPressure,
    WallTemperature,
    Pressure,
    Temperature,
    Velocity,
    Mass,
    Volume,
}

impl QoiName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QoiName::Thrust => "THRUST",
            QoiName::WallPressure => "WALL_PRESSURE",
            QoiName::WallTemperature => "WALL_TEMPERATURE",
            QoiName::Pressure => "PRESSURE",
            QoiName::Temperature => "TEMPERATURE",
            QoiName::Velocity => "VELOCITY",
            QoiName::Mass => "MASS",
            QoiName::Volume => "VOLUME",
        }
    }

    /// Sampled along the wall at x-stations.
    pub fn is_wall(&self) -> bool {
        matches!(self, QoiName::WallPressure | QoiName::WallTemperature)
    }

    /// Sampled at (x, y) points in the flow field.
    pub fn is_field(&self) -> bool {
        matches!(self, QoiName::Pressure | QoiName::Temperature | QoiName::Velocity)
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, QoiName::Mass | QoiName::Volume)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Output {
    pub name: QoiName,
    #[serde(default)]
    pub x: Vec<f64>,
    #[serde(default)]
    pub points: Vec<[f64; 2]>,
    #[serde(default)]
    pub gradient: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Structural {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_aeros_command")]
    pub command: String,
    #[serde(default = "default_aeros_input")]
    pub input: String,
    #[serde(default = "default_aeros_results")]
    pub results_file: String,
}

fn default_aeros_command() -> String { "aeros".to_string() }
fn default_aeros_input() -> String { "nozzle.aeros".to_string() }
fn default_aeros_results() -> String { "aeros_results.txt".to_string() }

impl Root {
    pub fn output(&self, name: QoiName) -> Option<&Output> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn wants(&self, name: QoiName) -> bool {
        self.output(name).is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            bail!("project.name must not be empty");
        }
        if !(self.mission.mach > 0.0) {
            bail!("mission.mach must be positive");
        }
        if !(self.environment.pressure > 0.0) {
            bail!("environment.pressure must be positive");
        }
        if !(self.environment.temperature > 0.0) {
            bail!("environment.temperature must be positive");
        }
        if !(self.inlet.pstag > 0.0 && self.inlet.tstag > 0.0) {
            bail!("inlet.pstag and inlet.tstag must be positive");
        }
        if !(self.geometry.exit_radius > 0.0) {
            bail!("geometry.exit_radius must be positive");
        }
        if self.cfd.max_iterations == 0 {
            bail!("cfd.max_iterations must be >= 1");
        }
        if !(self.cfd.convergence_order > 0.0) {
            bail!("cfd.convergence_order must be positive");
        }
        if self.cfd.markers.wall.is_empty() {
            bail!("cfd.markers.wall must list at least one tag");
        }
        if self.cfd.markers.inlet.len() != 1 {
            bail!("cfd.markers.inlet must list exactly one tag");
        }
        if self.cfd.markers.farfield.is_empty() {
            bail!("cfd.markers.farfield must list at least one tag");
        }
        if self.cfd.sst_perturbation.is_some() && self.cfd.method != Method::Rans {
            bail!("cfd.sst_perturbation requires cfd.method = RANS");
        }
        if self.run.cpus == 0 {
            bail!("run.cpus must be >= 1");
        }
        if let Some(ref tpl) = self.run.mpi_template {
            if !tpl.contains("{n}") || !tpl.contains("{cmd}") {
                bail!("run.mpi_template must contain {{n}} and {{cmd}}");
            }
        }

        if self.gradients.enabled() {
            if self.gradients.wall_dv_count == 0 {
                bail!("gradients.wall_dv_count must be >= 1 when gradients are requested");
            }
            if self.gradients.wall_dv_head + self.gradients.wall_dv_count > self.gradients.total_dv {
                bail!("gradients.wall_dv_head + wall_dv_count exceeds gradients.total_dv");
            }
            if self.gradients.jobs == 0 {
                bail!("gradients.jobs must be >= 1");
            }
            if self.gradients.step == 0.0 {
                bail!("gradients.step must be non-zero");
            }
        }

        let mut seen = Vec::new();
        for out in &self.outputs {
            if seen.contains(&out.name) {
                bail!("output {} listed more than once", out.name.as_str());
            }
            seen.push(out.name);

            if out.name.is_wall() && out.x.is_empty() {
                bail!("output {} requires x stations", out.name.as_str());
            }
            if out.name.is_field() && out.points.is_empty() {
                bail!("output {} requires points", out.name.as_str());
            }
            if out.gradient {
                if out.name != QoiName::Thrust {
                    bail!("gradients are only available for THRUST, not {}", out.name.as_str());
                }
                if !self.gradients.enabled() {
                    bail!("THRUST gradient requested but gradients.method = NONE");
                }
            }
            if out.name.is_structural() {
                let enabled = self.structural.as_ref().map(|s| s.enabled).unwrap_or(false);
                if !enabled {
                    bail!("output {} requires an enabled [structural] section", out.name.as_str());
                }
            }
        }

        Ok(())
    }
}
