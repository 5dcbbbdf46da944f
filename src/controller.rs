//! Retry/Escalation Controller for the flow solve.
//!
//! One solve is at most two solver launches. After the first, the residual
//! history decides: converged runs return, diverged runs escalate (Euler with
//! local relaxation only, otherwise fatal), short runs restart from their own
//! solution with the remaining reduction as the new target.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::artifacts;
use crate::audit::AuditLog;
use crate::config::Method;
use crate::error::Fatal;
use crate::history::{HistoryKind, ResidualHistory};
use crate::runcfg::{RunConfig, CFL_LOCAL_CONSERVATIVE};
use crate::su2::{Suite, Tool};

pub const MAX_ATTEMPTS: u32 = 2;
/// SU2 reads a restart from this name.
pub const RESTART_INPUT: &str = "solution_flow.dat";
const STALL_WINDOW: usize = 300;
const STALL_VARIATION: f64 = 0.2;
const DEFAULT_REDUCTION: f64 = 6.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub attempts: u32,
    pub initial_residual: f64,
    pub final_residual: f64,
    /// Orders of magnitude gained across all attempts
    pub reduction: f64,
    pub converged: bool,
    pub restarted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Converged,
    Diverged,
    Short,
}

pub struct Controller<'s, 'a> {
    suite: &'s Suite<'a>,
    audit: AuditLog,
    /// When false, the first attempt is accepted as is.
    check: bool,
}

impl<'s, 'a> Controller<'s, 'a> {
    pub fn new(suite: &'s Suite<'a>, audit: AuditLog, check: bool) -> Self {
        Self { suite, audit, check }
    }

    #[cfg(test)]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn history_stem(rc: &RunConfig) -> String {
        rc.get("CONV_FILENAME").unwrap_or("history").trim().to_string()
    }

    /// History layout matching the configured `OUTPUT_FORMAT`, read first.
    fn history_kind(rc: &RunConfig) -> Option<HistoryKind> {
        rc.get("OUTPUT_FORMAT").and_then(HistoryKind::for_output_format)
    }

    fn restart_file(&self, rc: &RunConfig) -> PathBuf {
        self.suite
            .dir
            .join(rc.get("RESTART_FLOW_FILENAME").unwrap_or("nozzle.dat").trim())
    }

    /// Outputs that a blind rerun must not clobber.
    fn outputs(&self, rc: &RunConfig) -> Vec<PathBuf> {
        let stem = Self::history_stem(rc);
        let mut paths: Vec<PathBuf> = HistoryKind::SEARCH_ORDER
            .iter()
            .map(|k| self.suite.dir.join(format!("{}.{}", stem, k.extension())))
            .collect();
        paths.push(self.restart_file(rc));
        paths
    }

    fn escalatable(rc: &RunConfig) -> bool {
        matches!(rc.governing_mode(), Ok(Method::Euler)) && rc.is_yes("RELAXATION_LOCAL")
    }

    /// Run the flow solver on `rc` until it converges or the attempts run out.
    /// `rc` is left holding the options of the last attempt.
    pub fn solve(&self, rc: &mut RunConfig) -> Result<Outcome> {
        let tool = Tool::flow_solver(rc);
        let stem = Self::history_stem(rc);
        let mut carried = 0.0;
        let mut initial = None;
        let mut restarted = false;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let code = self.suite.run(tool, rc, &self.outputs(rc))?;
            if code != 0 {
                warn!("{} returned {} on attempt {}", tool.binary(), code, attempt);
            }

            let history = ResidualHistory::locate(&self.suite.dir, &stem, Self::history_kind(rc))?;
            let target = rc.get_f64("RESIDUAL_REDUCTION").unwrap_or(DEFAULT_REDUCTION);
            let reduction = history.reduction();
            self.audit.residuals(history.last(), reduction)?;
            let initial_residual = *initial.get_or_insert(history.initial());

            let verdict = if history.last() > 0.0 {
                Verdict::Diverged
            } else if reduction < target {
                Verdict::Short
            } else {
                Verdict::Converged
            };
            let outcome = Outcome {
                attempts: attempt,
                initial_residual,
                final_residual: history.last(),
                reduction: carried + reduction,
                converged: verdict == Verdict::Converged,
                restarted,
            };

            if verdict == Verdict::Converged || !self.check {
                info!(
                    "flow solve finished after {} attempt(s): final residual {:.4}, reduction {:.4}",
                    attempt,
                    outcome.final_residual,
                    outcome.reduction
                );
                return Ok(outcome);
            }

            if verdict == Verdict::Diverged {
                self.audit.write("Solution diverged.")?;
                if attempt >= MAX_ATTEMPTS || !Self::escalatable(rc) {
                    return Err(Fatal::Diverged {
                        detail: format!(
                            "final residual {:.4} after {} attempt(s)",
                            history.last(),
                            attempt
                        ),
                    }
                    .into());
                }
                warn!("flow solution diverged; restarting with more conservative parameters");
                for (from, to) in artifacts::archive_all(&self.outputs(rc))? {
                    self.audit
                        .write(&format!("{} renamed to {}", from.display(), to.display()))?;
                }
                self.escalate(rc, 3)?;
                self.audit
                    .write("Restarting with more conservative parameters since the solution diverged")?;
                restarted = true;
                continue;
            }

            if attempt >= MAX_ATTEMPTS {
                warn!(
                    "solver did not reach requested accuracy; residual decreased by only {:.2} orders of magnitude",
                    outcome.reduction
                );
                self.audit.write(&format!("Decrease in residual: {:.16}", outcome.reduction))?;
                self.audit.write("Solver did not reach requested accuracy. Continuing...")?;
                return Ok(outcome);
            }

            warn!(
                "residual reduction {:.2} below target {:.2}; restarting",
                reduction, target
            );
            let archived = artifacts::archive(&history.path)?;
            let restart = self.restart_file(rc);
            if restart.is_file() {
                let input = self.suite.dir.join(RESTART_INPUT);
                artifacts::promote(&restart, &input)?;
                rc.set("RESTART_SOL", "YES");
                rc.set("SOLUTION_FLOW_FILENAME", RESTART_INPUT);
                rc.set("RESIDUAL_REDUCTION", target - reduction);
                carried += reduction;

                self.audit
                    .write("Restarting since solution did not reach required accuracy:")?;
                self.audit.write(&format!(
                    "{} renamed to {}, {} renamed to {}",
                    restart.display(),
                    RESTART_INPUT,
                    history.path.display(),
                    archived.map(|p| p.display().to_string()).unwrap_or_default()
                ))?;

                let variation = history.recent_variation(STALL_WINDOW);
                self.audit.write(&format!("Recent residual variation: {:.16}", variation))?;
                if variation <= STALL_VARIATION && Self::escalatable(rc) {
                    self.escalate(rc, 2)?;
                }
                self.audit
                    .write(&format!("RESIDUAL_REDUCTION: {}", target - reduction))?;
            } else {
                self.audit.write(&format!(
                    "Restarting ({} not found, so a different residual likely diverged)",
                    restart.display()
                ))?;
                if Self::escalatable(rc) {
                    self.escalate(rc, 3)?;
                }
            }
            restarted = true;
        }
    }

    /// Tighten local relaxation and scale the iteration budget.
    fn escalate(&self, rc: &mut RunConfig, factor: u32) -> Result<()> {
        let iterations = rc.get_u32("EXT_ITER").unwrap_or(1000).saturating_mul(factor);
        rc.set("CFL_ADAPT_LOCAL_PARAM", CFL_LOCAL_CONSERVATIVE);
        rc.set("EXT_ITER", iterations);
        rc.set("LIMITER_ITER", "400");
        self.audit
            .write(&format!("CFL_ADAPT_LOCAL_PARAM: {}", CFL_LOCAL_CONSERVATIVE))?;
        self.audit.write(&format!("EXT_ITER: {}", iterations))?;
        self.audit.write("LIMITER_ITER: 400")
    }
}
