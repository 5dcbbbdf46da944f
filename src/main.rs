mod artifacts;
mod audit;
mod config;
mod controller;
mod error;
mod flow;
mod gradient;
mod history;
mod io;
mod launch;
mod mesh;
mod pipeline;
mod postprocess;
mod qoi;
mod runcfg;
mod structural;
mod su2;

#[cfg(test)]
mod tests;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::controller::Outcome;
use crate::gradient::ThrustGradient;
use crate::history::{HistoryKind, ResidualHistory, FLOW_RESIDUAL};
use crate::launch::ShellLauncher;
use crate::qoi::QoiSet;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Parser, Debug)]
#[command(name = "nozzle")]
#[command(version)]
#[command(about = "Multi-fidelity nozzle analysis: SU2 flow, adjoint/FD gradients, AEROS structure")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to TOML nozzle description
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Output path for results
    #[arg(short, long, global = true)]
    out: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ToolArg {
    Cfd,
    Def,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full analysis
    Run {
        /// Also write a JSON result bundle
        #[arg(long)]
        json: bool,
    },
    /// Validate a nozzle description
    Validate,
    /// Write the SU2 configuration a run would use
    WriteConfig {
        #[arg(long, value_enum, default_value = "cfd")]
        tool: ToolArg,
        /// Design variable whose wall motion drives the deformation
        #[arg(long, default_value = "0")]
        dv: usize,
    },
    /// Summarize a residual history file
    Residual {
        #[arg(long)]
        history: String,
    },
    /// Run only the thrust gradient stage against an existing baseline
    Gradients {
        #[arg(long)]
        json: bool,
    },
    /// Print version information
    Version,
}

// ============================================================================
// JSON Output Structures
// ============================================================================

#[derive(Serialize)]
struct Manifest {
    schema_version: String,
    tool_version: String,
    timestamp_utc: String,
    platform: String,
    config_hash: String,
    config_snapshot: config::Root,
}

#[derive(Serialize)]
struct Summary {
    converged: bool,
    attempts: u32,
    restarted: bool,
    su2_version: Option<String>,
    wall_time_ms: f64,
}

#[derive(Serialize)]
struct ResultBundle<'a> {
    manifest: Manifest,
    summary: Summary,
    flow: &'a Outcome,
    qois: &'a QoiSet,
    thrust_gradient: Option<&'a ThrustGradient>,
}

#[derive(Serialize)]
struct GradientBundle<'a> {
    manifest: Manifest,
    thrust_gradient: &'a ThrustGradient,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn compute_hash(data: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn get_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = now / 86400;
    let secs_today = now % 86400;

    // civil date from days since 1970-01-01
    let z = days as i64 + 719468;
    let era = z.div_euclid(146097);
    let doe = z.rem_euclid(146097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        day,
        secs_today / 3600,
        (secs_today % 3600) / 60,
        secs_today % 60
    )
}

fn create_manifest(cfg: &config::Root, cfg_text: &str) -> Manifest {
    Manifest {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: VERSION.to_string(),
        timestamp_utc: get_timestamp(),
        platform: std::env::consts::OS.to_string(),
        config_hash: compute_hash(cfg_text),
        config_snapshot: cfg.clone(),
    }
}

fn load_config(cfg_path: &str) -> Result<(config::Root, String)> {
    let cfg_text = fs::read_to_string(cfg_path)
        .with_context(|| format!("failed to read config: {}", cfg_path))?;
    let cfg: config::Root = toml::from_str(&cfg_text)
        .with_context(|| format!("failed to parse config: {}", cfg_path))?;
    cfg.validate()?;
    Ok((cfg, cfg_text))
}

fn json_path(out_path: &str) -> String {
    if out_path.ends_with(".csv") {
        out_path.replace(".csv", ".json")
    } else {
        format!("{}.json", out_path)
    }
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    let _ = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// ============================================================================
// Run Modes
// ============================================================================

fn run_full(cfg: &config::Root, cfg_text: &str, out_path: &str, json_output: bool) -> Result<()> {
    let results = pipeline::run(cfg, &ShellLauncher)?;

    let mut w = io::CsvWriter::create(out_path)?;
    w.write_header()?;
    w.write_qois(&results.qois)?;
    w.flush()?;

    eprintln!(
        "[nozzle] converged={} attempts={} residual={:.4} reduction={:.4} qois={}",
        results.flow.converged,
        results.flow.attempts,
        results.flow.final_residual,
        results.flow.reduction,
        results.qois.len()
    );
    eprintln!("[nozzle] CSV: {}", out_path);

    if json_output {
        let json_path = json_path(out_path);
        let bundle = ResultBundle {
            manifest: create_manifest(cfg, cfg_text),
            summary: Summary {
                converged: results.flow.converged,
                attempts: results.flow.attempts,
                restarted: results.flow.restarted,
                su2_version: results.su2_version.map(|v| format!("{:?}", v)),
                wall_time_ms: results.wall_time_ms,
            },
            flow: &results.flow,
            qois: &results.qois,
            thrust_gradient: results.thrust_gradient.as_ref(),
        };
        let json = serde_json::to_string_pretty(&bundle)?;
        fs::write(&json_path, json)?;
        eprintln!("[nozzle] JSON bundle: {}", json_path);
    }

    if !results.flow.converged {
        eprintln!("[nozzle] WARNING: flow solution did not reach the requested residual reduction");
    }
    Ok(())
}

fn run_gradients(cfg: &config::Root, cfg_text: &str, out_path: &str, json_output: bool) -> Result<()> {
    if !cfg.gradients.enabled() {
        bail!("gradients.method = NONE; nothing to compute");
    }
    let g = pipeline::run_gradients(cfg, &ShellLauncher)?;

    let mut w = io::CsvWriter::create(out_path)?;
    w.write_header()?;
    for (i, v) in g.values.iter().enumerate() {
        w.write_row("THRUST_GRADIENT", i, *v)?;
    }
    w.flush()?;

    eprintln!("[nozzle] thrust gradient via {:?} over {} design variables", g.source, g.values.len());
    eprintln!("[nozzle] CSV: {}", out_path);

    if json_output {
        let json_path = json_path(out_path);
        let bundle = GradientBundle {
            manifest: create_manifest(cfg, cfg_text),
            thrust_gradient: &g,
        };
        fs::write(&json_path, serde_json::to_string_pretty(&bundle)?)?;
        eprintln!("[nozzle] JSON: {}", json_path);
    }
    Ok(())
}

fn write_config(cfg: &config::Root, tool: ToolArg, dv: usize, out: Option<String>) -> Result<()> {
    let (rc, default_name) = match tool {
        ToolArg::Cfd => (runcfg::flow_config(cfg), su2::Tool::Cfd.config_name()),
        ToolArg::Def => (
            runcfg::deform_config(cfg, &format!("wall_{}.dat", dv), &format!("nozzle_{}.su2", dv)),
            su2::Tool::Def.config_name(),
        ),
    };
    if let ToolArg::Cfd = tool {
        rc.governing_mode()?;
    }
    let out_path = out.unwrap_or_else(|| default_name.to_string());
    rc.write(Path::new(&out_path))?;
    eprintln!("[nozzle] {} options written to {}", rc.len(), out_path);
    Ok(())
}

fn summarize_history(path: &str) -> Result<()> {
    let p = Path::new(path);
    let kind = match p.extension().and_then(|e| e.to_str()) {
        Some("csv") => HistoryKind::Csv,
        Some("dat") => HistoryKind::Tecplot,
        Some("vtk") => HistoryKind::Vtk,
        _ => bail!("unrecognized history file extension: {}", path),
    };
    let h = ResidualHistory::read(p, kind, FLOW_RESIDUAL)?;
    eprintln!("[nozzle] history: {} ({} iterations)", path, h.len());
    eprintln!("  initial residual:   {:.6}", h.initial());
    eprintln!("  final residual:     {:.6}", h.last());
    eprintln!("  residual reduction: {:.6}", h.reduction());
    if h.last() > 0.0 {
        eprintln!("  WARNING: final residual is positive; the solution diverged");
    }
    Ok(())
}

fn validate_config(cfg_path: &str) -> Result<()> {
    let (cfg, _) = load_config(cfg_path)?;

    eprintln!("[nozzle] config valid: {}", cfg_path);
    eprintln!("  project: {} {}", cfg.project.name, cfg.project.version);
    eprintln!(
        "  flow: {} mach={} p={} T={}",
        cfg.cfd.method.as_str(),
        cfg.mission.mach,
        cfg.environment.pressure,
        cfg.environment.temperature
    );
    eprintln!(
        "  cfd: mesh={} max_iter={} order={} format={} local_relax={}",
        cfg.cfd.mesh_name,
        cfg.cfd.max_iterations,
        cfg.cfd.convergence_order,
        cfg.cfd.output_format.as_str(),
        cfg.cfd.local_relax
    );
    eprintln!("  run: cpus={} work_dir={}", cfg.run.cpus, cfg.run.work_dir);
    if cfg.gradients.enabled() {
        eprintln!(
            "  gradients: {:?} wall_dv={}..{} of {} jobs={}",
            cfg.gradients.method,
            cfg.gradients.wall_dv_head,
            cfg.gradients.wall_dv_head + cfg.gradients.wall_dv_count,
            cfg.gradients.total_dv,
            cfg.gradients.jobs
        );
    }
    let names: Vec<&str> = cfg.outputs.iter().map(|o| o.name.as_str()).collect();
    eprintln!("  outputs: {}", names.join(", "));
    if let Some(st) = &cfg.structural {
        eprintln!("  structural: enabled={} command={} input={}", st.enabled, st.command, st.input);
    }
    Ok(())
}

fn print_version() {
    eprintln!("nozzle - multi-fidelity nozzle analysis pipeline");
    eprintln!();
    eprintln!("  Version:           {}", VERSION);
    eprintln!("  Schema Version:    {}", SCHEMA_VERSION);
    eprintln!("  Platform:          {}", std::env::consts::OS);
    eprintln!("  Architecture:      {}", std::env::consts::ARCH);
    eprintln!();
    eprintln!("External tools:");
    eprintln!("  - SU2_CFD, SU2_CFD_AD, SU2_DEF, SU2_DOT_AD (flow, adjoint, deformation, projection)");
    eprintln!("  - interpolation tool for point extraction (default mshint)");
    eprintln!("  - AEROS for mass and volume");
    eprintln!();
    eprintln!("MPI launch: [run].mpi_template, SLURM salloc, TACC ibrun, mpirun or mpiexec");
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    match args.command {
        Commands::Version => {
            print_version();
            Ok(())
        }
        Commands::Residual { history } => summarize_history(&history),
        Commands::Validate => {
            let cfg_path = args.config.context("--config required for validate")?;
            validate_config(&cfg_path)
        }
        Commands::WriteConfig { tool, dv } => {
            let cfg_path = args.config.context("--config required")?;
            let (cfg, _) = load_config(&cfg_path)?;
            write_config(&cfg, tool, dv, args.out)
        }
        Commands::Run { json } => {
            let cfg_path = args.config.context("--config required")?;
            let out_path = args.out.unwrap_or_else(|| "results/qoi.csv".to_string());
            let (cfg, cfg_text) = load_config(&cfg_path)?;

            eprintln!("[nozzle] {} {}", cfg.project.name, cfg.project.version);
            run_full(&cfg, &cfg_text, &out_path, json)
        }
        Commands::Gradients { json } => {
            let cfg_path = args.config.context("--config required")?;
            let out_path = args.out.unwrap_or_else(|| "results/thrust_gradient.csv".to_string());
            let (cfg, cfg_text) = load_config(&cfg_path)?;

            eprintln!("[nozzle] {} {}", cfg.project.name, cfg.project.version);
            run_gradients(&cfg, &cfg_text, &out_path, json)
        }
    }
}
