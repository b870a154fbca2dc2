//! climnorm: climate-model data access and normalization
//!
//! Raw model output comes with heterogeneous variable names, units, coordinate
//! conventions and accumulation semantics. climnorm turns it into a uniform
//! representation, driven by declarative YAML fix rules.
//!
//! ## Key Features
//!
//! - **Layered Fix Rules**: family rules with parent inheritance, combined with
//!   model / experiment / source rules
//! - **Variable Normalization**: renaming, derived-variable formulas, GRIB
//!   metadata and attribute overrides
//! - **Unit Conversion**: factor and offset between physical units, including
//!   the density and accumulation-period heuristics for precipitation
//! - **Decumulation**: cumulative fields turned into per-step increments, with
//!   memory carried across streamed chunks
//! - **Streaming**: fixed-step or calendar-aligned time chunks
//! - **Time Averaging**: frequency-based resampling with completeness checks
//!
//! ## Module Organization
//!
//! - [`reader`]: retrieval front end tying everything together
//! - [`fixer`]: fix-rule configuration, resolution and application
//! - [`units`]: unit parsing and conversion
//! - [`decumulate`]: cumulative-to-increment conversion
//! - [`streaming`]: time chunking
//! - [`statistics`]: reductions and resampling
//! - [`catalog`]: dataset lookup by (model, experiment, source)
//! - [`dataset`]: in-memory labelled arrays
//! - [`calendar`]: calendar periods and frequencies
//! - [`config`]: reader configuration files
//! - [`errors`]: centralized error handling
//!
//! ## Usage
//!
//! ```rust,no_run
//! use climnorm::prelude::*;
//!
//! let fixes = FixConfig::from_path(std::path::Path::new("fixes/ifs.yaml")).unwrap();
//! let catalog = InMemoryCatalog::default();
//! let mut reader = Reader::new(&catalog, &fixes, ReaderOptions::new("IFS", "hist", "hourly")).unwrap();
//! let data = reader.retrieve(Some(&["2t".to_string()])).unwrap().into_dataset().unwrap();
//! println!("{:?}", data.variable_names());
//! ```

// Core modules
pub mod calendar;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod decumulate;
pub mod errors;
pub mod fixer;
pub mod logging;
#[cfg(feature = "netcdf")]
pub mod netcdf_io;
pub mod reader;
pub mod statistics;
pub mod streaming;
pub mod units;

pub use errors::{ClimNormError, Result};

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::catalog::{Catalog, CatalogEntry, DatasetHandle, InMemoryCatalog, InMemoryHandle};
    pub use crate::config::ReaderConfig;
    pub use crate::dataset::{Coordinate, Dataset, Field};
    pub use crate::decumulate::Decumulator;
    pub use crate::errors::{ClimNormError, Result};
    pub use crate::fixer::{EffectiveFixRule, FixConfig, FixRuleResolver, VariableNormalizer};
    #[cfg(feature = "netcdf")]
    pub use crate::netcdf_io::NetcdfHandle;
    pub use crate::reader::{ChunkStream, Reader, ReaderOptions, Retrieved};
    pub use crate::statistics::{resample, ResampleOptions, StatOperation};
    pub use crate::streaming::{StreamSpec, StreamUnit, StreamingCursor};
    pub use crate::units::UnitSystem;
}
