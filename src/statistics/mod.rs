//! Statistical reductions and time resampling
//!
//! # Organization
//!
//! - [`operations`]: NaN-skipping reductions along an axis
//! - [`resample`]: frequency-based time averaging with completeness checks

pub mod operations;
pub mod resample;

pub use operations::{StatOperation, StatisticalReduction};
pub use resample::{build_bins, resample, ResampleBin, ResampleOptions};
