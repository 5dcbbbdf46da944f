//! Mesh-side helpers: boundary tags of an SU2 mesh and the structured grid
//! used to sample the flow solution at requested points.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::Fatal;

/// Boundary marker tags declared in an SU2 native mesh, in file order.
pub fn read_marker_tags(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Err(Fatal::MissingArtifact { path: path.to_path_buf() }.into());
    }
    let f = File::open(path).with_context(|| format!("failed to open mesh: {}", path.display()))?;
    let mut tags = Vec::new();
    for line in BufReader::new(f).lines() {
        let line = line?;
        if let Some(rest) = line.trim_start().strip_prefix("MARKER_TAG") {
            let tag = rest.trim_start_matches(|c: char| c == '=' || c.is_whitespace()).trim();
            if !tag.is_empty() {
                tags.push(tag.to_string());
            }
        }
    }
    Ok(tags)
}

/// Tensor-product grid through the distinct coordinates of the requested
/// points. Each point maps to one grid vertex.
#[derive(Debug, Clone)]
pub struct ExtractionGrid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    /// Vertex index of each requested point
    pub point_vertex: Vec<usize>,
}

impl ExtractionGrid {
    pub fn new(points: &[[f64; 2]]) -> Self {
        let round = |v: f64| (v * 1e4).round() / 1e4;
        let mut xs: Vec<f64> = points.iter().map(|p| round(p[0])).collect();
        let mut ys: Vec<f64> = points.iter().map(|p| round(p[1])).collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        xs.dedup();
        ys.sort_by(|a, b| a.total_cmp(b));
        ys.dedup();

        let index = |axis: &[f64], v: f64| axis.iter().position(|a| *a == v).unwrap_or(0);
        let nj = ys.len().max(2);
        let point_vertex = points
            .iter()
            .map(|p| index(&xs, round(p[0])) * nj + index(&ys, round(p[1])))
            .collect();

        // a single line of points still needs cells around it
        if let Some(&x0) = xs.first() {
            if xs.len() == 1 {
                xs.push(x0 + 0.1);
            }
        }
        if let Some(&y0) = ys.first() {
            if ys.len() == 1 {
                ys.push(y0 + 0.1);
            }
        }

        Self { xs, ys, point_vertex }
    }

    pub fn vertex_count(&self) -> usize {
        self.xs.len() * self.ys.len()
    }

    pub fn vertices(&self) -> Vec<[f64; 2]> {
        let mut out = Vec::with_capacity(self.vertex_count());
        for &x in &self.xs {
            for &y in &self.ys {
                out.push([x, y]);
            }
        }
        out
    }

    /// Two triangles per cell, 1-based vertex indices.
    pub fn triangles(&self) -> Vec<[usize; 3]> {
        let (ni, nj) = (self.xs.len(), self.ys.len());
        let mut out = Vec::new();
        for i in 0..ni.saturating_sub(1) {
            for j in 0..nj.saturating_sub(1) {
                let v = i * nj + j + 1;
                out.push([v, v + nj, v + nj + 1]);
                out.push([v, v + nj + 1, v + 1]);
            }
        }
        out
    }

    /// Write the grid as a 2-D GMF (`.mesh`) file.
    pub fn write_gmf(&self, path: &Path) -> Result<()> {
        let f = File::create(path)
            .with_context(|| format!("failed to create mesh: {}", path.display()))?;
        let mut w = BufWriter::new(f);
        writeln!(w, "MeshVersionFormatted\n2\nDimension\n2\n")?;

        let verts = self.vertices();
        writeln!(w, "Vertices\n{}", verts.len())?;
        for v in &verts {
            writeln!(w, "{:.6} {:.6} 0", v[0], v[1])?;
        }

        let tris = self.triangles();
        writeln!(w, "\nTriangles\n{}", tris.len())?;
        for t in &tris {
            writeln!(w, "{} {} {} 1", t[0], t[1], t[2])?;
        }
        writeln!(w, "\nEnd")?;
        w.flush()?;
        Ok(())
    }
}
