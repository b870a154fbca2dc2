//! Core statistical operations and traits
//!
//! This module defines the reductions used when averaging over time bins.

use crate::errors::{ClimNormError, Result};
use ndarray::{ArrayD, Axis};

/// Supported statistical operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatOperation {
    /// Arithmetic mean
    #[default]
    Mean,
    /// Sum of values
    Sum,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
}

impl StatOperation {
    /// Get the string representation of the operation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Min => "minimum",
            Self::Max => "maximum",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            "min" | "minimum" => Ok(Self::Min),
            "max" | "maximum" => Ok(Self::Max),
            other => Err(ClimNormError::Config(format!("unknown statistic '{other}'"))),
        }
    }

    /// Reduce a sequence, skipping NaN and infinite values.
    ///
    /// The sum of nothing is zero; every other statistic of nothing is NaN.
    pub fn apply<I: IntoIterator<Item = f64>>(self, values: I) -> f64 {
        let mut count = 0_u32;
        let mut acc = match self {
            Self::Mean | Self::Sum => 0.0,
            Self::Min => f64::INFINITY,
            Self::Max => f64::NEG_INFINITY,
        };
        for v in values.into_iter().filter(|v| v.is_finite()) {
            count += 1;
            acc = match self {
                Self::Mean | Self::Sum => acc + v,
                Self::Min => acc.min(v),
                Self::Max => acc.max(v),
            };
        }
        match (self, count) {
            (Self::Sum, _) => acc,
            (_, 0) => f64::NAN,
            (Self::Mean, n) => acc / f64::from(n),
            _ => acc,
        }
    }
}

/// Trait for types that can perform statistical reductions along an axis
pub trait StatisticalReduction<T> {
    /// Perform a statistical reduction along the specified axis
    ///
    /// # Errors
    ///
    /// Returns an error if the axis is out of bounds for the array.
    fn reduce_along_axis(&self, axis: usize, operation: StatOperation) -> Result<ArrayD<T>>;
}

impl StatisticalReduction<f64> for ArrayD<f64> {
    fn reduce_along_axis(&self, axis: usize, operation: StatOperation) -> Result<ArrayD<f64>> {
        if axis >= self.ndim() {
            return Err(ClimNormError::Config(format!(
                "Axis {axis} is out of bounds for array with {} dimensions",
                self.ndim()
            )));
        }
        Ok(self.map_axis(Axis(axis), |lane| operation.apply(lane.iter().copied())))
    }
}
