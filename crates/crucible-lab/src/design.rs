//! Experimental designs: pure functions from parameter ranges to ordered
//! lists of parameter points.

use std::collections::BTreeMap;

use crucible_core::{CrucibleError, ErrorInfo, Params, Value};

/// Parameter ranges: each name maps to an ordered finite sequence of values.
/// A singleton range contributes one factor of size one.
pub type ParameterRanges = BTreeMap<String, Vec<Value>>;

/// A rule mapping parameter ranges to an ordered list of parameter points.
/// Designs are pure: they never observe execution state.
pub trait Design: Send {
    /// Enumerates the parameter points for the given ranges.
    fn space(&self, ranges: &ParameterRanges) -> Result<Vec<Params>, CrucibleError>;
}

/// The cartesian product of every range.
///
/// Ordering is deterministic: lexicographic over parameter names, then index
/// within each range, so the first name varies slowest. An empty range (or no
/// ranges at all) produces zero points.
#[derive(Debug, Clone, Copy, Default)]
pub struct FactorialDesign;

impl Design for FactorialDesign {
    fn space(&self, ranges: &ParameterRanges) -> Result<Vec<Params>, CrucibleError> {
        if ranges.is_empty() || ranges.values().any(Vec::is_empty) {
            return Ok(Vec::new());
        }
        let mut points = vec![Params::new()];
        for (name, values) in ranges {
            let mut extended = Vec::with_capacity(points.len() * values.len());
            for point in &points {
                for value in values {
                    let mut next = point.clone();
                    next.insert(name.clone(), value.clone());
                    extended.push(next);
                }
            }
            points = extended;
        }
        Ok(points)
    }
}

/// Zips corresponding positions across all ranges.
///
/// Every non-singleton range must share the same length; singletons are
/// broadcast across that length.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointwiseDesign;

impl Design for PointwiseDesign {
    fn space(&self, ranges: &ParameterRanges) -> Result<Vec<Params>, CrucibleError> {
        if ranges.is_empty() {
            return Ok(Vec::new());
        }
        let mut length = 1usize;
        for (name, values) in ranges {
            if values.len() <= 1 {
                continue;
            }
            if length > 1 && values.len() != length {
                return Err(CrucibleError::Design(
                    ErrorInfo::new(
                        "pointwise-length",
                        format!(
                            "parameter range lengths don't match ({length} vs {})",
                            values.len()
                        ),
                    )
                    .at_field(name.clone()),
                ));
            }
            length = values.len();
        }
        if ranges.values().any(Vec::is_empty) {
            return Ok(Vec::new());
        }
        let mut points = Vec::with_capacity(length);
        for index in 0..length {
            let mut point = Params::new();
            for (name, values) in ranges {
                let value = if values.len() == 1 {
                    values[0].clone()
                } else {
                    values[index].clone()
                };
                point.insert(name.clone(), value);
            }
            points.push(point);
        }
        Ok(points)
    }
}

/// Returns `count` evenly spaced float values from `start` to `stop`
/// inclusive, a convenience for building parameter ranges.
pub fn linspace(start: f64, stop: f64, count: usize) -> Vec<Value> {
    match count {
        0 => Vec::new(),
        1 => vec![Value::Float(start)],
        _ => (0..count)
            .map(|idx| {
                let frac = idx as f64 / (count - 1) as f64;
                Value::Float(start + frac * (stop - start))
            })
            .collect(),
    }
}
