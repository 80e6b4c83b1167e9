//! Compute resources requested for a single analysis run.
//!
//! Each resource is either a constant or a polynomial of the recording duration (seconds)
//! or size (bytes), so that long recordings can ask for more walltime or memory.
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::common::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingProperty {
    Duration,
    Size,
}

impl Display for ScalingProperty {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalingProperty::Duration => f.write_str("duration"),
            ScalingProperty::Size => f.write_str("size"),
        }
    }
}

/// `coefficients` are ordered from the highest exponent down to the constant term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polynomial {
    pub coefficients: Vec<f64>,
    pub property: ScalingProperty,
}

impl Polynomial {
    pub fn new(coefficients: Vec<f64>, property: ScalingProperty) -> Self {
        Self {
            coefficients,
            property,
        }
    }

    pub fn evaluate(&self, input: f64) -> f64 {
        // Horner's scheme, equivalent to sum(c[i] * input^(n - i - 1))
        self.coefficients
            .iter()
            .fold(0.0, |acc, coefficient| acc * input + coefficient)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceValue {
    Scalar(i64),
    Polynomial(Polynomial),
}

impl ResourceValue {
    /// Evaluates the request for a recording with the given `duration` (seconds) and
    /// `size` (bytes). The result is rounded to the nearest integer and never negative.
    pub fn evaluate(&self, duration: f64, size: u64) -> u64 {
        match self {
            ResourceValue::Scalar(value) => (*value).max(0) as u64,
            ResourceValue::Polynomial(polynomial) => {
                let input = match polynomial.property {
                    ScalingProperty::Duration => duration,
                    ScalingProperty::Size => size as f64,
                };
                let value = polynomial.evaluate(input).round();
                if value.is_finite() && value > 0.0 {
                    value as u64
                } else {
                    0
                }
            }
        }
    }
}

/// Evaluates an optional resource request, using `minimum` as a floor.
///
/// A missing request evaluates to `minimum`.
pub fn calculate(
    request: Option<&ResourceValue>,
    duration: f64,
    size: u64,
    minimum: Option<u64>,
) -> Option<u64> {
    let value = request.map(|request| request.evaluate(duration, size));
    match (value, minimum) {
        (Some(value), Some(minimum)) => Some(value.max(minimum)),
        (value, minimum) => value.or(minimum),
    }
}

/// Adds two resource requests together.
pub fn combine(
    a: Option<&ResourceValue>,
    b: Option<&ResourceValue>,
) -> Result<Option<ResourceValue>, ValidationError> {
    let value = match (a, b) {
        (None, None) => None,
        (Some(value), None) | (None, Some(value)) => Some(value.clone()),
        (Some(ResourceValue::Scalar(a)), Some(ResourceValue::Scalar(b))) => {
            Some(ResourceValue::Scalar(a.saturating_add(*b)))
        }
        (Some(ResourceValue::Polynomial(a)), Some(ResourceValue::Polynomial(b))) => {
            if a.property != b.property {
                return Err(ValidationError::IncompatibleResources {
                    left: a.property,
                    right: b.property,
                });
            }
            Some(ResourceValue::Polynomial(Polynomial::new(
                add_right_aligned(&a.coefficients, &b.coefficients),
                a.property,
            )))
        }
        (Some(ResourceValue::Scalar(scalar)), Some(ResourceValue::Polynomial(polynomial)))
        | (Some(ResourceValue::Polynomial(polynomial)), Some(ResourceValue::Scalar(scalar))) => {
            Some(ResourceValue::Polynomial(Polynomial::new(
                add_right_aligned(&polynomial.coefficients, &[*scalar as f64]),
                polynomial.property,
            )))
        }
    };
    Ok(value)
}

/// Sums coefficient lists aligned on their last (constant) term.
fn add_right_aligned(a: &[f64], b: &[f64]) -> Vec<f64> {
    let length = a.len().max(b.len());
    let mut result = vec![0.0; length];
    for (target, value) in result.iter_mut().rev().zip(a.iter().rev()) {
        *target += value;
    }
    for (target, value) in result.iter_mut().rev().zip(b.iter().rev()) {
        *target += value;
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Ncpus,
    Walltime,
    Mem,
    Ngpus,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Ncpus,
        ResourceKind::Walltime,
        ResourceKind::Mem,
        ResourceKind::Ngpus,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Ncpus => "ncpus",
            ResourceKind::Walltime => "walltime",
            ResourceKind::Mem => "mem",
            ResourceKind::Ngpus => "ngpus",
        }
    }
}

/// Resource requests of a script (or configured defaults), one optional entry per kind.
/// `walltime` is in seconds and `mem` in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ncpus: Option<ResourceValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub walltime: Option<ResourceValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem: Option<ResourceValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ngpus: Option<ResourceValue>,
}

impl ResourceSet {
    pub fn get(&self, kind: ResourceKind) -> Option<&ResourceValue> {
        match kind {
            ResourceKind::Ncpus => self.ncpus.as_ref(),
            ResourceKind::Walltime => self.walltime.as_ref(),
            ResourceKind::Mem => self.mem.as_ref(),
            ResourceKind::Ngpus => self.ngpus.as_ref(),
        }
    }

    fn get_mut(&mut self, kind: ResourceKind) -> &mut Option<ResourceValue> {
        match kind {
            ResourceKind::Ncpus => &mut self.ncpus,
            ResourceKind::Walltime => &mut self.walltime,
            ResourceKind::Mem => &mut self.mem,
            ResourceKind::Ngpus => &mut self.ngpus,
        }
    }

    pub fn combine(&self, other: &ResourceSet) -> Result<ResourceSet, ValidationError> {
        let mut result = ResourceSet::default();
        for kind in ResourceKind::ALL {
            *result.get_mut(kind) = combine(self.get(kind), other.get(kind))?;
        }
        Ok(result)
    }

    pub fn calculate(&self, duration: f64, size: u64, minimum: &ResourceMap) -> ResourceMap {
        let mut result = ResourceMap::default();
        for kind in ResourceKind::ALL {
            *result.get_mut(kind) = calculate(self.get(kind), duration, size, minimum.get(kind));
        }
        result
    }
}

/// Concrete amounts of resources that are sent to the batch system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceMap {
    pub ncpus: Option<u64>,
    pub walltime: Option<u64>,
    pub mem: Option<u64>,
    pub ngpus: Option<u64>,
}

impl ResourceMap {
    pub fn get(&self, kind: ResourceKind) -> Option<u64> {
        match kind {
            ResourceKind::Ncpus => self.ncpus,
            ResourceKind::Walltime => self.walltime,
            ResourceKind::Mem => self.mem,
            ResourceKind::Ngpus => self.ngpus,
        }
    }

    fn get_mut(&mut self, kind: ResourceKind) -> &mut Option<u64> {
        match kind {
            ResourceKind::Ncpus => &mut self.ncpus,
            ResourceKind::Walltime => &mut self.walltime,
            ResourceKind::Mem => &mut self.mem,
            ResourceKind::Ngpus => &mut self.ngpus,
        }
    }

    pub fn walltime(&self) -> Option<std::time::Duration> {
        self.walltime.map(std::time::Duration::from_secs)
    }
}

impl Display for ResourceMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let items: Vec<String> = ResourceKind::ALL
            .iter()
            .filter_map(|kind| self.get(*kind).map(|value| format!("{}={value}", kind.name())))
            .collect();
        f.write_str(&items.join(", "))
    }
}
