use crate::qoi::QoiSet;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct CsvWriter {
    w: BufWriter<File>,
}

impl CsvWriter {
    pub fn create(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let f = File::create(path).with_context(|| format!("failed to create {}", path))?;
        Ok(Self { w: BufWriter::new(f) })
    }

    pub fn write_header(&mut self) -> Result<()> {
        writeln!(self.w, "qoi,component,value")?;
        Ok(())
    }

    pub fn write_row(&mut self, qoi: &str, component: usize, value: f64) -> Result<()> {
        writeln!(self.w, "{},{},{:.10e}", qoi, component, value)?;
        Ok(())
    }

    /// One row per component of every value, then one per gradient entry.
    pub fn write_qois(&mut self, qois: &QoiSet) -> Result<()> {
        for (name, value) in qois.iter() {
            for (i, v) in value.components().into_iter().enumerate() {
                self.write_row(name.as_str(), i, v)?;
            }
        }
        for (name, grad) in qois.gradients() {
            let label = format!("{}_GRADIENT", name.as_str());
            for (i, v) in grad.iter().enumerate() {
                self.write_row(&label, i, *v)?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.w.flush()?;
        Ok(())
    }
}
