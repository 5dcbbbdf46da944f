//! Residual History read back from the solver's convergence file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::config::OutputFormat;
use crate::error::Fatal;

pub const FLOW_RESIDUAL: &str = "Res_Flow[0]";
pub const ADJOINT_RESIDUAL: &str = "Res_AdjFlow[0]";

/// Layout of a history file, keyed by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    /// `history.csv`: one header row
    Csv,
    /// `history.dat`: TITLE, VARIABLES, ZONE rows
    Tecplot,
    /// `history.vtk`: one header row
    Vtk,
}

impl HistoryKind {
    pub const SEARCH_ORDER: [HistoryKind; 3] = [HistoryKind::Csv, HistoryKind::Tecplot, HistoryKind::Vtk];

    pub fn extension(&self) -> &'static str {
        match self {
            HistoryKind::Csv => "csv",
            HistoryKind::Tecplot => "dat",
            HistoryKind::Vtk => "vtk",
        }
    }

    /// History layout SU2 writes for an `OUTPUT_FORMAT` value.
    pub fn for_output_format(value: &str) -> Option<Self> {
        let ext = OutputFormat::parse(value)?.history_extension();
        Self::SEARCH_ORDER.into_iter().find(|k| k.extension() == ext)
    }

    fn header_rows(&self) -> usize {
        match self {
            HistoryKind::Tecplot => 3,
            _ => 1,
        }
    }

    /// Column of the density residual when the header does not name it.
    fn fallback_column(&self) -> usize {
        match self {
            HistoryKind::Vtk => 13,
            _ => 11,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResidualHistory {
    pub path: PathBuf,
    /// log10 residual per iteration
    pub values: Vec<f64>,
}

impl ResidualHistory {
    /// Find `<stem>.csv`, `<stem>.dat` or `<stem>.vtk` in `dir` and read the
    /// density residual from the first one present, `preferred` first.
    pub fn locate(dir: &Path, stem: &str, preferred: Option<HistoryKind>) -> Result<Self> {
        match find(dir, stem, preferred) {
            Some((path, kind)) => Self::read(&path, kind, FLOW_RESIDUAL),
            None => Err(Fatal::NoHistoryFile { dir: dir.to_path_buf() }.into()),
        }
    }

    pub fn read(path: &Path, kind: HistoryKind, field: &str) -> Result<Self> {
        if !path.is_file() {
            return Err(Fatal::MissingArtifact { path: path.to_path_buf() }.into());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read history: {}", path.display()))?;
        let values = parse_column(&text, kind, field, path)?;
        if values.is_empty() {
            return Err(Fatal::EmptyHistory { path: path.to_path_buf() }.into());
        }
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn initial(&self) -> f64 {
        self.values[0]
    }

    pub fn last(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Orders of magnitude gained from the peak residual to the last one.
    pub fn reduction(&self) -> f64 {
        self.max() - self.last()
    }

    /// Mean absolute deviation of the last `window` residuals, excluding the
    /// final one. Small values mean the run has stalled.
    pub fn recent_variation(&self, window: usize) -> f64 {
        let n = window.min(self.values.len());
        if n < 2 {
            return 0.0;
        }
        let tail = &self.values[self.values.len() - n..self.values.len() - 1];
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;
        tail.iter().map(|v| (v - mean).abs()).sum::<f64>() / tail.len() as f64
    }
}

pub fn find(dir: &Path, stem: &str, preferred: Option<HistoryKind>) -> Option<(PathBuf, HistoryKind)> {
    preferred
        .into_iter()
        .chain(HistoryKind::SEARCH_ORDER)
        .find_map(|kind| {
            let path = dir.join(format!("{}.{}", stem, kind.extension()));
            path.is_file().then_some((path, kind))
        })
}

fn split_row(line: &str) -> Vec<&str> {
    if line.contains(',') {
        line.split(',').map(str::trim).collect()
    } else {
        line.split_whitespace().collect()
    }
}

fn header_names(text: &str, kind: HistoryKind) -> Vec<String> {
    let line = match kind {
        HistoryKind::Tecplot => text
            .lines()
            .find(|l| l.trim_start().starts_with("VARIABLES"))
            .and_then(|l| l.split_once('=').map(|(_, rest)| rest)),
        _ => text.lines().next(),
    };
    line.map(|l| {
        split_row(l)
            .into_iter()
            .map(|s| s.trim_matches('"').trim().to_string())
            .collect()
    })
    .unwrap_or_default()
}

fn parse_column(text: &str, kind: HistoryKind, field: &str, path: &Path) -> Result<Vec<f64>> {
    let names = header_names(text, kind);
    let column = match names.iter().position(|n| n.contains(field)) {
        Some(i) => i,
        None if field == FLOW_RESIDUAL && names.len() > kind.fallback_column() => kind.fallback_column(),
        None => {
            return Err(Fatal::MissingField {
                field: field.to_string(),
                path: path.to_path_buf(),
            }
            .into())
        }
    };

    let mut values = Vec::new();
    for (lineno, line) in text.lines().enumerate().skip(kind.header_rows()) {
        if line.trim().is_empty() {
            continue;
        }
        let cols = split_row(line);
        let Some(cell) = cols.get(column) else {
            bail!("{}:{}: missing column {}", path.display(), lineno + 1, column);
        };
        let v: f64 = cell
            .parse()
            .with_context(|| format!("{}:{}: bad residual {:?}", path.display(), lineno + 1, cell))?;
        values.push(v);
    }
    Ok(values)
}
