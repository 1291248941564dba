//! A minimal scan descriptor.
//!
//! A [`CompoundGenerator`] is a list of dimensions, outermost first. Each
//! dimension moves one or more axes along a line in `size` points. Points are
//! numbered with the innermost dimension varying fastest.

use indexmap::IndexMap;

use crate::meta::string_list;
use crate::{Error, Result, Value};

/// One dimension of a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub axes: Vec<String>,
    pub size: usize,
    pub start: f64,
    pub stop: f64,
}

impl Dimension {
    /// A dimension whose positions are its point indices.
    pub fn new<I, S>(axes: I, size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Dimension {
            axes: axes.into_iter().map(Into::into).collect(),
            size,
            start: 0.0,
            stop: size.saturating_sub(1) as f64,
        }
    }

    #[must_use]
    pub fn line(mut self, start: f64, stop: f64) -> Self {
        self.start = start;
        self.stop = stop;
        self
    }

    fn position(&self, index: usize) -> f64 {
        if self.size <= 1 {
            self.start
        } else {
            self.start + (self.stop - self.start) * index as f64 / (self.size - 1) as f64
        }
    }
}

/// Scan descriptor: dimensions (outer to inner) and a per-point duration.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundGenerator {
    pub dimensions: Vec<Dimension>,
    /// Seconds per point.
    pub duration: f64,
}

impl CompoundGenerator {
    pub const TYPEID: &'static str = "scanpointgenerator:generator/CompoundGenerator:1.0";

    pub fn new(dimensions: Vec<Dimension>, duration: f64) -> Self {
        CompoundGenerator {
            dimensions,
            duration,
        }
    }

    /// Total number of points.
    pub fn size(&self) -> usize {
        self.dimensions.iter().map(|d| d.size).product()
    }

    /// Every axis in the scan, outermost first.
    pub fn axes(&self) -> Vec<String> {
        self.dimensions
            .iter()
            .flat_map(|d| d.axes.iter().cloned())
            .collect()
    }

    /// Points in one run: the product of the inner dimension sizes whose
    /// axes are all in `axes_to_move`.
    pub fn steps_per_run(&self, axes_to_move: &[String]) -> usize {
        let mut steps = 1;
        for dim in self.dimensions.iter().rev() {
            if dim.axes.iter().all(|a| axes_to_move.contains(a)) {
                steps *= dim.size;
            } else {
                break;
            }
        }
        steps
    }

    /// Axis positions at a point.
    pub fn positions(&self, point: usize) -> IndexMap<String, f64> {
        let mut remainder = point;
        let mut indices = vec![0; self.dimensions.len()];
        for (i, dim) in self.dimensions.iter().enumerate().rev() {
            let size = dim.size.max(1);
            indices[i] = remainder % size;
            remainder /= size;
        }
        let mut out = IndexMap::new();
        for (dim, index) in self.dimensions.iter().zip(indices) {
            for axis in &dim.axes {
                out.insert(axis.clone(), dim.position(index));
            }
        }
        out
    }

    pub fn to_value(&self) -> Value {
        let dimensions = self
            .dimensions
            .iter()
            .map(|d| {
                Value::from([
                    (
                        "axes",
                        Value::Array(d.axes.iter().map(Value::from).collect()),
                    ),
                    ("size", Value::from(d.size)),
                    ("start", Value::from(d.start)),
                    ("stop", Value::from(d.stop)),
                ])
            })
            .collect();
        Value::from([
            ("typeid", Value::from(Self::TYPEID)),
            ("dimensions", Value::Array(dimensions)),
            ("duration", Value::from(self.duration)),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        if let Some(typeid) = value.typeid() {
            if typeid != Self::TYPEID {
                return Err(Error::Validation(format!(
                    "expected a CompoundGenerator, got {}",
                    typeid
                )));
            }
        }
        let dims = value
            .field("dimensions")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Validation(format!("generator without dimensions: {}", value)))?;
        let mut dimensions = Vec::with_capacity(dims.len());
        for dim in dims {
            let axes = string_list(dim.field("axes"));
            if axes.is_empty() {
                return Err(Error::Validation("dimension without axes".to_string()));
            }
            let size = dim
                .field("size")
                .and_then(Value::as_i64)
                .and_then(|s| usize::try_from(s).ok())
                .filter(|s| *s > 0)
                .ok_or_else(|| Error::Validation(format!("bad dimension size in {}", dim)))?;
            let mut d = Dimension::new(axes, size);
            if let Some(start) = dim.field("start").and_then(Value::as_f64) {
                d.start = start;
            }
            if let Some(stop) = dim.field("stop").and_then(Value::as_f64) {
                d.stop = stop;
            }
            dimensions.push(d);
        }
        let duration = value
            .field("duration")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        if duration < 0.0 {
            return Err(Error::Validation(format!(
                "negative duration {}",
                duration
            )));
        }
        Ok(CompoundGenerator {
            dimensions,
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> CompoundGenerator {
        CompoundGenerator::new(
            vec![Dimension::new(["y"], 3), Dimension::new(["x"], 2).line(0.0, 1.0)],
            0.1,
        )
    }

    #[test]
    fn size_and_steps_per_run() {
        let g = grid();
        assert_eq!(g.size(), 6);
        assert_eq!(g.steps_per_run(&["x".to_string()]), 2);
        assert_eq!(g.steps_per_run(&["x".to_string(), "y".to_string()]), 6);
        assert_eq!(g.steps_per_run(&["y".to_string()]), 1);
        assert_eq!(g.steps_per_run(&[]), 1);
    }

    #[test]
    fn positions_vary_inner_fastest() {
        let g = grid();
        assert_eq!(g.positions(0)["x"], 0.0);
        assert_eq!(g.positions(1)["x"], 1.0);
        assert_eq!(g.positions(1)["y"], 0.0);
        assert_eq!(g.positions(3)["y"], 1.0);
        assert_eq!(g.axes(), vec!["y", "x"]);
    }

    #[test]
    fn value_roundtrip_and_rejects() {
        let g = grid();
        let v = g.to_value();
        assert_eq!(v.typeid(), Some(CompoundGenerator::TYPEID));
        assert_eq!(CompoundGenerator::from_value(&v).unwrap(), g);
        assert!(CompoundGenerator::from_value(&Value::from([("duration", 1)])).is_err());
        let zero = Value::from([(
            "dimensions",
            Value::Array(vec![Value::from([("axes", Value::from(vec!["x"])), ("size", Value::from(0))])]),
        )]);
        assert!(CompoundGenerator::from_value(&zero).is_err());
    }
}
