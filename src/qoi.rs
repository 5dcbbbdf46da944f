//! Quantities of interest populated after a run.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::config::{Output, QoiName};
use crate::error::Fatal;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QoiValue {
    Scalar(f64),
    /// One value per wall station or extraction point
    Vector(Vec<f64>),
    /// One (u, v, w) per extraction point
    Vector3(Vec<[f64; 3]>),
}

impl QoiValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            QoiValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// Flattened components, row-major for `Vector3`.
    pub fn components(&self) -> Vec<f64> {
        match self {
            QoiValue::Scalar(v) => vec![*v],
            QoiValue::Vector(v) => v.clone(),
            QoiValue::Vector3(v) => v.iter().flat_map(|p| p.iter().copied()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QoiSet {
    values: BTreeMap<QoiName, QoiValue>,
    gradients: BTreeMap<QoiName, Vec<f64>>,
}

impl QoiSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: QoiName, value: QoiValue) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: QoiName) -> Option<&QoiValue> {
        self.values.get(&name)
    }

    pub fn set_gradient(&mut self, name: QoiName, gradient: Vec<f64>) {
        self.gradients.insert(name, gradient);
    }

    #[cfg(test)]
    pub fn gradient(&self, name: QoiName) -> Option<&[f64]> {
        self.gradients.get(&name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (QoiName, &QoiValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn gradients(&self) -> impl Iterator<Item = (QoiName, &[f64])> {
        self.gradients.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Every requested output must have a value, and a gradient when asked.
    pub fn require(&self, outputs: &[Output]) -> Result<()> {
        for out in outputs {
            if !self.values.contains_key(&out.name) {
                return Err(Fatal::MissingQoi { name: out.name.as_str().to_string() }.into());
            }
            if out.gradient && !self.gradients.contains_key(&out.name) {
                return Err(Fatal::MissingQoi {
                    name: format!("{} gradient", out.name.as_str()),
                }
                .into());
            }
        }
        Ok(())
    }
}
