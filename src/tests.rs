//! Cross-module scenarios for the nozzle pipeline
//!
//! Includes:
//! - Nozzle description parsing and validation
//! - Retry/escalation controller against scripted solver runs
//! - End-to-end pipeline with finite-difference and adjoint gradients
//! - Fatal paths (marker partition, missing quantities of interest)
//!
//! External binaries are played by `MockLauncher` handlers that write the
//! files SU2 and AEROS would.

use std::fs;
use std::path::{Path, PathBuf};

use crate::audit::AuditLog;
use crate::config::{self, GradientMethod, QoiName};
use crate::controller::{Controller, RESTART_INPUT};
use crate::error::Fatal;
use crate::gradient::Source;
use crate::history::tests::csv_history;
use crate::launch::MockLauncher;
use crate::pipeline;
use crate::qoi::QoiValue;
use crate::runcfg::{RunConfig, CFL_LOCAL_CONSERVATIVE};
use crate::su2::Suite;

/// Fresh, empty directory unique to this test process and `name`.
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("nozzle-pipeline-{}-{}", std::process::id(), name));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

const NOZZLE_TOML: &str = r#"
[project]
name = "baseline nozzle"
version = "1"

[mission]
mach = 0.5

[environment]
pressure = 18754.0
temperature = 216.65

[inlet]
pstag = 97585.0
tstag = 955.0

[geometry]
exit_radius = 0.5

[cfd]
method = "EULER"
max_iterations = 1000
convergence_order = 6.0

[cfd.markers]
wall = [1]
inlet = [2]
farfield = [3, 4]
symmetry = [5]

[gradients]
method = "FINITE_DIFF"
wall_dv_head = 1
wall_dv_count = 2
total_dv = 4

[[outputs]]
name = "THRUST"
gradient = true

[[outputs]]
name = "WALL_PRESSURE"
x = [0.25, 0.75]
"#;

fn nozzle_config(dir: &Path) -> config::Root {
    let mut cfg: config::Root = toml::from_str(NOZZLE_TOML).unwrap();
    cfg.run.work_dir = dir.to_string_lossy().to_string();
    cfg
}

fn write_mesh(dir: &Path, tags: &[u32]) {
    let mut s = String::from("NDIME= 2\nNELEM= 0\nNPOIN= 0\n");
    s.push_str(&format!("NMARK= {}\n", tags.len()));
    for t in tags {
        s.push_str(&format!("MARKER_TAG= {}\nMARKER_ELEMS= 0\n", t));
    }
    fs::write(dir.join("nozzle.su2"), s).unwrap();
}

/// Index of a finite-difference run directory (`fd_{i}`), if `cwd` is one.
fn fd_index(cwd: &Path) -> Option<usize> {
    cwd.file_name()?.to_str()?.strip_prefix("fd_")?.parse().ok()
}

/// Scripted SU2 suite: converged primal with thrust 1000 (plus 10 per
/// perturbed variable), a deformation that always succeeds, and an adjoint
/// whose residual follows `adjoint`.
fn scripted_su2(adjoint: Vec<f64>) -> impl Fn(&str, &Path, usize) -> i32 + Send + Sync + 'static {
    move |cmd, cwd, _| {
        if cmd.contains("SU2_CFD_AD") {
            let mut s = String::from("\"Iteration\",\"Res_AdjFlow[0]\"\n");
            for (i, r) in adjoint.iter().enumerate() {
                s.push_str(&format!("{},{}\n", i, r));
            }
            fs::write(cwd.join("history_adj.csv"), s).unwrap();
            fs::write(cwd.join("nozzle_adj.dat"), "adjoint").unwrap();
        } else if cmd.contains("SU2_DOT_AD") {
            fs::write(cwd.join("of_grad.dat"), "VARIABLE , GRADIENT\n0, 0.5\n1, -0.25\n").unwrap();
        } else if cmd.contains("SU2_DEF") {
            let i = fd_index(cwd).unwrap();
            fs::write(cwd.join(format!("nozzle_{}.su2", i)), "deformed").unwrap();
        } else if cmd.contains("SU2_CFD") {
            fs::write(cwd.join("history.csv"), csv_history(&[0.0, -4.0, -9.0])).unwrap();
            fs::write(cwd.join("nozzle.dat"), "solution").unwrap();
            let thrust = match fd_index(cwd) {
                Some(i) => 1000.0 + 10.0 * (i + 1) as f64,
                None => 1000.0,
            };
            fs::write(cwd.join("thrust_nodef.dat"), format!("{}\n", thrust)).unwrap();
            fs::write(
                cwd.join("surface_flow.csv"),
                "\"Global_Index\",\"x\",\"y\",\"Pressure\"\n0,0.0,0.5,100000.0\n1,1.0,0.4,50000.0\n",
            )
            .unwrap();
        }
        0
    }
}

fn prepare_work_dir(name: &str) -> (PathBuf, config::Root) {
    let dir = scratch_dir(name);
    write_mesh(&dir, &[1, 2, 3, 4, 5]);
    fs::write(dir.join("wall_0.dat"), "motion 0").unwrap();
    fs::write(dir.join("wall_1.dat"), "motion 1").unwrap();
    let cfg = nozzle_config(&dir);
    (dir, cfg)
}

// =============================================================================
// Nozzle description
// =============================================================================

#[test]
fn test_sample_config_is_valid() {
    let cfg: config::Root = toml::from_str(NOZZLE_TOML).unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.cfd.mesh_name, "nozzle.su2");
    assert_eq!(cfg.cfd.conv_filename, "history");
    assert!(cfg.cfd.convergence_check);
    assert_eq!(cfg.run.cpus, 1);
    assert_eq!(cfg.gradients.jobs, 1);
    assert_eq!(cfg.gradients.step, 1.0);
}

#[test]
fn test_unknown_method_fails_to_parse() {
    let text = NOZZLE_TOML.replace("method = \"EULER\"", "method = \"POTENTIAL\"");
    assert!(toml::from_str::<config::Root>(&text).is_err());
}

#[test]
fn test_sst_perturbation_requires_rans() {
    let text = NOZZLE_TOML.replace("convergence_order = 6.0", "convergence_order = 6.0\nsst_perturbation = \"SSTC1\"");
    let cfg: config::Root = toml::from_str(&text).unwrap();
    assert!(cfg.validate().is_err());

    let rans = text.replace("method = \"EULER\"", "method = \"RANS\"");
    let cfg: config::Root = toml::from_str(&rans).unwrap();
    cfg.validate().unwrap();
}

#[test]
fn test_gradient_only_for_thrust() {
    let text = NOZZLE_TOML.replace("x = [0.25, 0.75]", "x = [0.25, 0.75]\ngradient = true");
    let cfg: config::Root = toml::from_str(&text).unwrap();
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("WALL_PRESSURE"));
}

#[test]
fn test_field_outputs_need_points() {
    let text = format!("{}\n[[outputs]]\nname = \"VELOCITY\"\n", NOZZLE_TOML);
    let cfg: config::Root = toml::from_str(&text).unwrap();
    assert!(cfg.validate().is_err());
}

#[test]
fn test_structural_outputs_need_structural_section() {
    let text = format!("{}\n[[outputs]]\nname = \"MASS\"\n", NOZZLE_TOML);
    let cfg: config::Root = toml::from_str(&text).unwrap();
    assert!(cfg.validate().is_err());

    let with = format!("{}\n[structural]\ncommand = \"aeros\"\n", text);
    let cfg: config::Root = toml::from_str(&with).unwrap();
    cfg.validate().unwrap();
}

#[test]
fn test_flow_config_resolves_governing_mode() {
    let cfg: config::Root = toml::from_str(NOZZLE_TOML).unwrap();
    let rc = crate::runcfg::flow_config(&cfg);
    assert_eq!(rc.governing_mode().unwrap(), config::Method::Euler);
    assert_eq!(rc.get("MARKER_EULER"), Some("( 1 )"));
    assert_eq!(rc.get("MARKER_FAR"), Some("( 3, 4 )"));
    assert!(rc.check_marker_partition(&["1", "2", "3", "4", "5"].map(String::from)).is_ok());

    let rans = NOZZLE_TOML.replace("method = \"EULER\"", "method = \"RANS\"");
    let cfg: config::Root = toml::from_str(&rans).unwrap();
    let rc = crate::runcfg::flow_config(&cfg);
    assert_eq!(rc.governing_mode().unwrap(), config::Method::Rans);
    assert!(rc.get("MARKER_HEATFLUX").unwrap().contains("1, 0.0"));
}

#[test]
fn test_adjoint_raises_convergence_order() {
    let mut cfg: config::Root = toml::from_str(NOZZLE_TOML).unwrap();
    cfg.gradients.method = GradientMethod::Adjoint;
    let rc = crate::runcfg::flow_config(&cfg);
    assert_eq!(rc.get_f64("RESIDUAL_REDUCTION"), Some(8.0));
}

// =============================================================================
// Retry/escalation controller
// =============================================================================

fn euler_rc(local_relax: bool) -> RunConfig {
    let mut rc = RunConfig::new();
    rc.set("PHYSICAL_PROBLEM", "EULER");
    rc.set("EXT_ITER", 1000);
    rc.set("RESIDUAL_REDUCTION", 6.0);
    rc.set("CONV_FILENAME", "history");
    rc.set("RESTART_FLOW_FILENAME", "nozzle.dat");
    if local_relax {
        rc.set("RELAXATION_LOCAL", "YES");
    }
    rc
}

#[test]
fn test_shortfall_restarts_from_previous_solution() {
    let dir = scratch_dir("scenario_restart");
    let launcher = MockLauncher::with_handler(|_, cwd, idx| {
        let h = if idx == 0 { csv_history(&[0.0, -2.0, -3.0]) } else { csv_history(&[-3.0, -5.0, -7.0]) };
        fs::write(cwd.join("history.csv"), h).unwrap();
        fs::write(cwd.join("nozzle.dat"), format!("solution {}", idx)).unwrap();
        0
    });
    let suite = Suite::new(&launcher, &dir, "", None);
    let ctl = Controller::new(&suite, AuditLog::create(&dir).unwrap(), true);

    let mut rc = euler_rc(false);
    let out = ctl.solve(&mut rc).unwrap();

    assert_eq!(launcher.executed_commands().len(), 2, "exactly one restart");
    assert!(out.converged);
    assert!(out.restarted);
    assert_eq!(out.attempts, 2);
    assert_eq!(out.reduction, 7.0);
    assert_eq!(out.initial_residual, 0.0);

    assert_eq!(rc.get("RESTART_SOL"), Some("YES"));
    assert_eq!(rc.get_f64("RESIDUAL_REDUCTION"), Some(3.0));
    assert_eq!(rc.get_u32("EXT_ITER"), Some(1000), "no escalation without local relaxation");

    let written = RunConfig::load(&dir.join("config_CFD.cfg")).unwrap();
    assert_eq!(written.get("RESTART_SOL"), Some("YES"));
    assert_eq!(written.get("SOLUTION_FLOW_FILENAME"), Some(RESTART_INPUT));

    // prior outputs kept under new names
    assert_eq!(fs::read_to_string(dir.join(RESTART_INPUT)).unwrap(), "solution 0");
    assert!(dir.join("history0.csv").is_file());
    assert!(dir.join("history.csv").is_file());

    let audit = ctl.audit().read().unwrap();
    assert!(audit.contains("Restarting since solution did not reach required accuracy"));
    assert_eq!(audit.matches("Final residual:").count(), 2);
}

#[test]
fn test_stalled_euler_restart_tightens_relaxation() {
    let dir = scratch_dir("scenario_stalled");
    let launcher = MockLauncher::with_handler(|_, cwd, idx| {
        let h = if idx == 0 {
            let mut v = vec![0.0];
            v.extend(std::iter::repeat(-3.0).take(399));
            csv_history(&v)
        } else {
            csv_history(&[-3.0, -6.5])
        };
        fs::write(cwd.join("history.csv"), h).unwrap();
        fs::write(cwd.join("nozzle.dat"), "solution").unwrap();
        0
    });
    let suite = Suite::new(&launcher, &dir, "", None);
    let ctl = Controller::new(&suite, AuditLog::create(&dir).unwrap(), true);

    let mut rc = euler_rc(true);
    let out = ctl.solve(&mut rc).unwrap();
    assert!(out.converged);
    assert_eq!(rc.get_u32("EXT_ITER"), Some(2000));
    assert_eq!(rc.get("CFL_ADAPT_LOCAL_PARAM"), Some(CFL_LOCAL_CONSERVATIVE));
    assert_eq!(rc.get("LIMITER_ITER"), Some("400"));
}

#[test]
fn test_missing_restart_file_escalates_iterations() {
    let dir = scratch_dir("scenario_no_restart");
    let launcher = MockLauncher::with_handler(|_, cwd, idx| {
        let h = if idx == 0 { csv_history(&[0.0, -1.0]) } else { csv_history(&[0.0, -6.0]) };
        fs::write(cwd.join("history.csv"), h).unwrap();
        0
    });
    let suite = Suite::new(&launcher, &dir, "", None);
    let ctl = Controller::new(&suite, AuditLog::create(&dir).unwrap(), true);

    let mut rc = euler_rc(true);
    let out = ctl.solve(&mut rc).unwrap();
    assert!(out.converged);
    assert_eq!(rc.get_u32("EXT_ITER"), Some(3000));
    assert_eq!(rc.get("RESTART_SOL"), None);
    assert!(!dir.join(RESTART_INPUT).exists());
}

#[test]
fn test_divergence_escalates_once_for_local_relaxation() {
    let dir = scratch_dir("scenario_diverged");
    let launcher = MockLauncher::with_handler(|_, cwd, idx| {
        let h = if idx == 0 { csv_history(&[-1.0, 0.5, 2.0]) } else { csv_history(&[0.0, -3.0, -7.0]) };
        fs::write(cwd.join("history.csv"), h).unwrap();
        fs::write(cwd.join("nozzle.dat"), format!("solution {}", idx)).unwrap();
        0
    });
    let suite = Suite::new(&launcher, &dir, "", None);
    let ctl = Controller::new(&suite, AuditLog::create(&dir).unwrap(), true);

    let mut rc = euler_rc(true);
    let out = ctl.solve(&mut rc).unwrap();
    assert!(out.converged);
    assert_eq!(out.attempts, 2);
    assert_eq!(rc.get_u32("EXT_ITER"), Some(3000));
    assert_eq!(rc.get("CFL_ADAPT_LOCAL_PARAM"), Some(CFL_LOCAL_CONSERVATIVE));
    assert_eq!(rc.get("RESTART_SOL"), None, "diverged solution is not restarted from");

    // the diverged attempt's outputs survive under archived names
    assert!(dir.join("history0.csv").is_file());
    assert_eq!(fs::read_to_string(dir.join("nozzle0.dat")).unwrap(), "solution 0");
    assert_eq!(fs::read_to_string(dir.join("nozzle.dat")).unwrap(), "solution 1");
    let audit = ctl.audit().read().unwrap();
    assert!(audit.contains("nozzle0.dat"));
}

#[test]
fn test_repeated_divergence_is_fatal() {
    let dir = scratch_dir("scenario_diverged_twice");
    let launcher = MockLauncher::with_handler(|_, cwd, _| {
        fs::write(cwd.join("history.csv"), csv_history(&[-1.0, 3.0])).unwrap();
        0
    });
    let suite = Suite::new(&launcher, &dir, "", None);
    let ctl = Controller::new(&suite, AuditLog::create(&dir).unwrap(), true);
    let err = ctl.solve(&mut euler_rc(true)).unwrap_err();
    assert!(matches!(err.downcast_ref::<Fatal>(), Some(Fatal::Diverged { .. })));
    assert_eq!(launcher.executed_commands().len(), 2);
}

#[test]
fn test_second_shortfall_warns_and_continues() {
    let dir = scratch_dir("scenario_still_short");
    let launcher = MockLauncher::with_handler(|_, cwd, _| {
        fs::write(cwd.join("history.csv"), csv_history(&[0.0, -1.0])).unwrap();
        fs::write(cwd.join("nozzle.dat"), "solution").unwrap();
        0
    });
    let suite = Suite::new(&launcher, &dir, "", None);
    let ctl = Controller::new(&suite, AuditLog::create(&dir).unwrap(), true);
    let out = ctl.solve(&mut euler_rc(false)).unwrap();
    assert!(!out.converged);
    assert_eq!(out.attempts, 2);
    assert_eq!(launcher.executed_commands().len(), 2);
    assert!(ctl.audit().read().unwrap().contains("did not reach requested accuracy"));
}

#[test]
fn test_failed_solver_exit_is_retried_blindly() {
    let dir = scratch_dir("scenario_exit_code");
    let launcher = MockLauncher::with_handler(|_, cwd, idx| {
        fs::write(cwd.join("history.csv"), csv_history(&[0.0, -7.0])).unwrap();
        if idx == 0 { 139 } else { 0 }
    });
    let suite = Suite::new(&launcher, &dir, "", None);
    let ctl = Controller::new(&suite, AuditLog::create(&dir).unwrap(), true);
    let out = ctl.solve(&mut euler_rc(false)).unwrap();
    assert!(out.converged);
    assert_eq!(out.attempts, 1);
    assert_eq!(launcher.executed_commands().len(), 2);
    assert!(dir.join("history0.csv").is_file(), "first attempt's history kept");
}

// =============================================================================
// End-to-end pipeline
// =============================================================================

#[test]
fn test_pipeline_with_finite_differences() {
    let (dir, cfg) = prepare_work_dir("pipeline_fd");
    let launcher = MockLauncher::with_handler(scripted_su2(Vec::new()));

    let results = pipeline::run(&cfg, &launcher).unwrap();
    assert!(results.flow.converged);
    assert_eq!(results.qois.get(QoiName::Thrust), Some(&QoiValue::Scalar(1000.0)));
    assert_eq!(
        results.qois.get(QoiName::WallPressure),
        Some(&QoiValue::Vector(vec![87500.0, 62500.0]))
    );

    let g = results.thrust_gradient.unwrap();
    assert_eq!(g.source, Source::FiniteDifference);
    assert_eq!(g.values, vec![0.0, 10.0, 20.0, 0.0]);
    assert_eq!(results.qois.gradient(QoiName::Thrust), Some(&g.values[..]));

    // one deformation and one flow solve per design variable, in its own directory
    let calls = launcher.calls();
    for i in 0..2 {
        let fd = dir.join(format!("fd_{}", i));
        let here: Vec<&String> = calls.iter().filter(|(_, cwd)| *cwd == fd).map(|(c, _)| c).collect();
        assert_eq!(here.len(), 2, "{:?}", here);
        assert!(here[0].contains("SU2_DEF"));
        assert!(here[1].contains("SU2_CFD"));
    }
    let baseline_runs = calls.iter().filter(|(c, cwd)| *cwd == dir && c.contains("SU2_CFD")).count();
    assert_eq!(baseline_runs, 1, "baseline solved once");
    assert!(dir.join("about.txt").is_file());
}

#[test]
fn test_parallel_fd_matches_serial() {
    let (_, mut cfg) = prepare_work_dir("pipeline_fd_parallel");
    cfg.gradients.jobs = 2;
    let launcher = MockLauncher::with_handler(scripted_su2(Vec::new()));
    let results = pipeline::run(&cfg, &launcher).unwrap();
    assert_eq!(results.thrust_gradient.unwrap().values, vec![0.0, 10.0, 20.0, 0.0]);
}

#[test]
fn test_pipeline_with_converged_adjoint() {
    let (_, mut cfg) = prepare_work_dir("pipeline_adjoint");
    cfg.gradients.method = GradientMethod::Adjoint;
    let launcher = MockLauncher::with_handler(scripted_su2(vec![-1.0, -4.0, -8.0]));

    let results = pipeline::run(&cfg, &launcher).unwrap();
    let g = results.thrust_gradient.unwrap();
    assert_eq!(g.source, Source::Adjoint);
    assert_eq!(g.values, vec![0.0, 0.5, -0.25, 0.0]);
    assert!(!launcher.executed_commands().iter().any(|c| c.contains("SU2_DEF")));
}

#[test]
fn test_unconverged_adjoint_falls_back_to_finite_differences() {
    let (_, mut cfg) = prepare_work_dir("pipeline_adjoint_fallback");
    cfg.gradients.method = GradientMethod::Adjoint;
    let launcher = MockLauncher::with_handler(scripted_su2(vec![-3.0, -2.0, -1.0]));

    let results = pipeline::run(&cfg, &launcher).unwrap();
    let g = results.thrust_gradient.unwrap();
    assert_eq!(g.source, Source::FiniteDifference);
    assert_eq!(g.values, vec![0.0, 10.0, 20.0, 0.0]);
    assert!(!launcher.executed_commands().iter().any(|c| c.contains("SU2_DOT_AD")));
}

#[test]
fn test_unavailable_adjoint_falls_back_to_finite_differences() {
    let (_, mut cfg) = prepare_work_dir("pipeline_adjoint_missing_solver");
    cfg.gradients.method = GradientMethod::Adjoint;
    let su2 = scripted_su2(vec![-1.0, -4.0, -8.0]);
    let launcher = MockLauncher::with_handler(move |cmd, cwd, idx| {
        if cmd.contains("SU2_CFD_AD") {
            127
        } else {
            su2(cmd, cwd, idx)
        }
    });

    let results = pipeline::run(&cfg, &launcher).unwrap();
    let g = results.thrust_gradient.unwrap();
    assert_eq!(g.source, Source::FiniteDifference);
    assert_eq!(g.values, vec![0.0, 10.0, 20.0, 0.0]);
}

#[test]
fn test_missing_projection_output_falls_back_to_finite_differences() {
    let (dir, mut cfg) = prepare_work_dir("pipeline_adjoint_no_projection");
    cfg.gradients.method = GradientMethod::Adjoint;
    // left over from an earlier run, must not be read as this run's projection
    fs::write(dir.join("of_grad.dat"), "VARIABLE , GRADIENT\n0, 7.0\n1, 7.0\n").unwrap();
    let su2 = scripted_su2(vec![-1.0, -4.0, -8.0]);
    let launcher = MockLauncher::with_handler(move |cmd, cwd, idx| {
        if cmd.contains("SU2_DOT_AD") {
            1
        } else {
            su2(cmd, cwd, idx)
        }
    });

    let results = pipeline::run(&cfg, &launcher).unwrap();
    let g = results.thrust_gradient.unwrap();
    assert_eq!(g.source, Source::FiniteDifference);
    assert_eq!(g.values, vec![0.0, 10.0, 20.0, 0.0]);
}

#[test]
fn test_stale_perturbed_thrust_is_not_reused() {
    let (dir, cfg) = prepare_work_dir("pipeline_fd_stale_thrust");
    fs::write(dir.join("thrust_nodef.dat"), "1000.0\n").unwrap();
    fs::create_dir_all(dir.join("fd_0")).unwrap();
    fs::write(dir.join("fd_0").join("thrust_nodef.dat"), "5000.0\n").unwrap();

    // the perturbed solve converges but never writes its thrust
    let su2 = scripted_su2(Vec::new());
    let launcher = MockLauncher::with_handler(move |cmd, cwd, idx| {
        let code = su2(cmd, cwd, idx);
        if fd_index(cwd) == Some(0) && cmd.contains("SU2_CFD") {
            fs::remove_file(cwd.join("thrust_nodef.dat")).unwrap();
        }
        code
    });

    let err = pipeline::run_gradients(&cfg, &launcher).unwrap_err();
    assert!(err.chain().any(|e| matches!(e.downcast_ref::<Fatal>(), Some(Fatal::MissingArtifact { .. }))));
}

#[test]
fn test_missing_motion_file_is_fatal() {
    let (dir, cfg) = prepare_work_dir("pipeline_no_motion");
    fs::remove_file(dir.join("wall_1.dat")).unwrap();
    let launcher = MockLauncher::with_handler(scripted_su2(Vec::new()));
    let err = pipeline::run(&cfg, &launcher).unwrap_err();
    assert!(err.chain().any(|e| matches!(e.downcast_ref::<Fatal>(), Some(Fatal::MissingArtifact { .. }))));
}

#[test]
fn test_marker_partition_checked_before_launch() {
    let (dir, cfg) = prepare_work_dir("pipeline_partition");
    write_mesh(&dir, &[1, 2, 3, 4, 5, 6]);
    let launcher = MockLauncher::with_handler(scripted_su2(Vec::new()));
    let err = pipeline::run(&cfg, &launcher).unwrap_err();
    assert!(matches!(err.downcast_ref::<Fatal>(), Some(Fatal::MarkerPartition { .. })));
    assert!(launcher.executed_commands().is_empty());
}

#[test]
fn test_missing_mesh_is_fatal() {
    let (dir, cfg) = prepare_work_dir("pipeline_no_mesh");
    fs::remove_file(dir.join("nozzle.su2")).unwrap();
    let launcher = MockLauncher::new();
    let err = pipeline::run(&cfg, &launcher).unwrap_err();
    assert!(matches!(err.downcast_ref::<Fatal>(), Some(Fatal::MissingArtifact { .. })));
}

#[test]
fn test_structural_stage_reports_mass() {
    let (_, mut cfg) = prepare_work_dir("pipeline_structural");
    cfg.gradients.method = GradientMethod::None;
    cfg.outputs = vec![
        config::Output { name: QoiName::Thrust, x: Vec::new(), points: Vec::new(), gradient: false },
        config::Output { name: QoiName::Mass, x: Vec::new(), points: Vec::new(), gradient: false },
    ];
    cfg.structural = Some(config::Structural {
        enabled: true,
        command: "aeros".into(),
        input: "nozzle.aeros".into(),
        results_file: "aeros_results.txt".into(),
    });
    cfg.validate().unwrap();

    let su2 = scripted_su2(Vec::new());
    let launcher = MockLauncher::with_handler(move |cmd, cwd, idx| {
        if cmd.starts_with("aeros") {
            fs::write(cwd.join("aeros_results.txt"), "MASS 152.5\nVOLUME 0.02\n").unwrap();
            0
        } else {
            su2(cmd, cwd, idx)
        }
    });
    let results = pipeline::run(&cfg, &launcher).unwrap();
    assert_eq!(results.qois.get(QoiName::Mass), Some(&QoiValue::Scalar(152.5)));
    assert!(results.qois.get(QoiName::Volume).is_none(), "only requested outputs are recorded");
    assert!(results.thrust_gradient.is_none());
}

#[test]
fn test_structural_missing_key_is_fatal() {
    let (_, mut cfg) = prepare_work_dir("pipeline_structural_missing");
    cfg.gradients.method = GradientMethod::None;
    cfg.outputs = vec![config::Output { name: QoiName::Volume, x: Vec::new(), points: Vec::new(), gradient: false }];
    cfg.structural = Some(config::Structural {
        enabled: true,
        command: "aeros".into(),
        input: "nozzle.aeros".into(),
        results_file: "aeros_results.txt".into(),
    });

    let su2 = scripted_su2(Vec::new());
    let launcher = MockLauncher::with_handler(move |cmd, cwd, idx| {
        if cmd.starts_with("aeros") {
            fs::write(cwd.join("aeros_results.txt"), "MASS 152.5\n").unwrap();
            0
        } else {
            su2(cmd, cwd, idx)
        }
    });
    let err = pipeline::run(&cfg, &launcher).unwrap_err();
    assert!(matches!(err.downcast_ref::<Fatal>(), Some(Fatal::MissingQoi { .. })));
}

#[test]
fn test_stock_su2_disables_local_relaxation() {
    let (dir, mut cfg) = prepare_work_dir("pipeline_stock_su2");
    cfg.cfd.local_relax = true;
    cfg.gradients.method = GradientMethod::None;
    cfg.outputs.retain(|o| o.name != QoiName::Thrust);

    let launcher = MockLauncher::with_handler(scripted_su2(Vec::new())).with_output("SU2 v7.0 stock\n");
    let results = pipeline::run(&cfg, &launcher).unwrap();
    assert_eq!(results.su2_version, Some(crate::su2::Su2Version::Stock));

    let written = RunConfig::load(&dir.join("config_CFD.cfg")).unwrap();
    assert!(!written.contains("RELAXATION_LOCAL"));
}

#[test]
fn test_gradient_stage_alone_uses_existing_baseline() {
    let (dir, cfg) = prepare_work_dir("pipeline_gradients_only");
    fs::write(dir.join("thrust_nodef.dat"), "995.0\n").unwrap();
    let launcher = MockLauncher::with_handler(scripted_su2(Vec::new()));

    let g = pipeline::run_gradients(&cfg, &launcher).unwrap();
    assert_eq!(g.values, vec![0.0, 15.0, 25.0, 0.0]);
    assert!(launcher.calls().iter().all(|(_, cwd)| *cwd != dir), "no baseline solve");
}
