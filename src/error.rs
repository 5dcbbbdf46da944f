use std::path::PathBuf;

use thiserror::Error;

/// Conditions that stop the pipeline.
///
/// Recoverable cases (a solver exiting non-zero, a residual shortfall) are
/// handled by return codes and never surface as one of these.
#[derive(Debug, Error)]
pub enum Fatal {
    /// An output the pipeline depends on was not written.
    #[error("expected artifact not found: {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("no history file found in {}", dir.display())]
    NoHistoryFile { dir: PathBuf },

    #[error("residual history is empty: {}", path.display())]
    EmptyHistory { path: PathBuf },

    /// The column the residual is read from is absent from the history file.
    #[error("field {field} not found in {}", path.display())]
    MissingField { field: String, path: PathBuf },

    /// The run configuration does not resolve to exactly one of EULER or RANS.
    #[error("governing equations: {detail}")]
    GoverningMode { detail: String },

    /// Boundary markers do not cover the mesh tags exactly once.
    #[error("boundary markers: {detail}")]
    MarkerPartition { detail: String },

    /// The requested combination cannot be produced by the solvers.
    #[error("unsupported: {detail}")]
    Unsupported { detail: String },

    #[error("required quantity of interest {name} was not produced")]
    MissingQoi { name: String },

    #[error("flow solution diverged: {detail}")]
    Diverged { detail: String },

    #[error("more than one process requested but no MPI launcher is available")]
    NoMpi,
}
