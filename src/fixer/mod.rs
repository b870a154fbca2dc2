//! Fix rules: configuration, resolution and application
//!
//! - [`rules`]: configuration model and layer merging
//! - [`resolver`]: family / model / experiment / source layering
//! - [`normalize`]: applying an effective rule to a dataset
//! - [`formula`]: derived-variable expressions
//! - [`grib`]: GRIB paramId lookup
//! - [`datamodel`]: coordinate convention translation

pub mod datamodel;
pub mod formula;
pub mod grib;
pub mod normalize;
pub mod resolver;
pub mod rules;

pub use datamodel::DataModel;
pub use formula::Formula;
pub use grib::{GribLookup, GribParam, StaticGribTable};
pub use normalize::VariableNormalizer;
pub use resolver::{FixRuleResolver, LayerKind, RuleLayer};
pub use rules::{merge, EffectiveFixRule, FixConfig, MergeMethod, RuleBlock, SourceRef, VarRule};
