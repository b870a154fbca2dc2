//! Fix-rule configuration model and layer merging
//!
//! The YAML configuration has three namespaces:
//!
//! ```yaml
//! fixer_name:            # family rules, optionally inheriting from a parent
//!   ifs-destine-v1:
//!     parent: ifs-default
//!     vars: { ... }
//! models:                # model -> experiment -> source (or "default")
//!   IFS:
//!     historical:
//!       hourly:
//!         method: merge
//!         vars: { ... }
//! defaults:              # unit aliases, data models, default coordinate renames
//!   units: { ... }
//! ```

use crate::calendar::{parse_datetime, CalendarUnit};
use crate::errors::{ClimNormError, Result};
use crate::fixer::formula::Formula;
use crate::fixer::grib::GribLookup;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// How a more specific layer combines with its base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// The specific layer wins wholesale
    #[default]
    Replace,
    /// Key union, the specific layer wins per key
    Merge,
    /// Ignore the specific layer and keep the base
    Default,
}

/// Source of a fixed variable: a dataset variable name or a GRIB paramId
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SourceRef {
    Code(u32),
    Name(String),
}

impl SourceRef {
    /// The GRIB paramId, if this reference is numeric
    pub fn param_id(&self) -> Option<u32> {
        match self {
            Self::Code(c) => Some(*c),
            Self::Name(n) => n.parse().ok(),
        }
    }
}

/// Rule for one canonical variable
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VarRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_units: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, JsonValue>,
    pub decumulate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_first: Option<bool>,
    pub nanfirst: bool,
    pub grib: bool,
}

/// Coordinate rename: the map key is the target name
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CoordRule {
    pub source: String,
}

/// One layer of fix rules, as written in the configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuleBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<MergeMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_model: Option<String>,
    /// Accumulation period of accumulated fields, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deltat: Option<f64>,
    /// Calendar unit at which accumulations reset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jump: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nanfirst_startdate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nanfirst_enddate: Option<String>,
    pub vars: BTreeMap<String, VarRule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub coords: BTreeMap<String, CoordRule>,
}

/// Combine two layers. `base` is the general layer, `overlay` the specific one.
///
/// With [`MergeMethod::Merge`] no key present in either layer is lost:
/// scalar settings come from `overlay` when it sets them, `vars` and
/// `coords` are unions with `overlay` winning per key, and `delete`
/// lists are concatenated without duplicates.
pub fn merge(base: &RuleBlock, overlay: &RuleBlock, method: MergeMethod) -> RuleBlock {
    match method {
        MergeMethod::Replace => overlay.clone(),
        MergeMethod::Default => base.clone(),
        MergeMethod::Merge => {
            let mut vars = base.vars.clone();
            vars.extend(overlay.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            let mut coords = base.coords.clone();
            coords.extend(overlay.coords.iter().map(|(k, v)| (k.clone(), v.clone())));
            let mut delete = base.delete.clone();
            for d in &overlay.delete {
                if !delete.contains(d) {
                    delete.push(d.clone());
                }
            }
            RuleBlock {
                parent: overlay.parent.clone().or_else(|| base.parent.clone()),
                method: overlay.method.or(base.method),
                data_model: overlay.data_model.clone().or_else(|| base.data_model.clone()),
                deltat: overlay.deltat.or(base.deltat),
                jump: overlay.jump.clone().or_else(|| base.jump.clone()),
                nanfirst_startdate: overlay
                    .nanfirst_startdate
                    .clone()
                    .or_else(|| base.nanfirst_startdate.clone()),
                nanfirst_enddate: overlay
                    .nanfirst_enddate
                    .clone()
                    .or_else(|| base.nanfirst_enddate.clone()),
                vars,
                delete,
                coords,
            }
        }
    }
}

/// Configuration-wide defaults
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FixDefaults {
    /// Unit aliases used to resolve `{name}` placeholders
    pub units: HashMap<String, String>,
    /// Source data model assumed when neither catalog nor rules declare one
    pub data_model: Option<String>,
    /// Target data model for coordinate translation
    pub dst_data_model: Option<String>,
    /// Coordinate renames applied beneath rule-declared ones
    pub coords: BTreeMap<String, CoordRule>,
}

/// Complete fix-rule configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FixConfig {
    pub fixer_name: HashMap<String, RuleBlock>,
    pub models: HashMap<String, HashMap<String, HashMap<String, RuleBlock>>>,
    pub defaults: FixDefaults,
}

impl FixConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Fold another configuration file into this one; later entries win.
    pub fn extend(&mut self, other: FixConfig) {
        self.fixer_name.extend(other.fixer_name);
        for (model, exps) in other.models {
            let target = self.models.entry(model).or_default();
            for (exp, sources) in exps {
                target.entry(exp).or_default().extend(sources);
            }
        }
        self.defaults.units.extend(other.defaults.units);
        self.defaults.coords.extend(other.defaults.coords);
        if other.defaults.data_model.is_some() {
            self.defaults.data_model = other.defaults.data_model;
        }
        if other.defaults.dst_data_model.is_some() {
            self.defaults.dst_data_model = other.defaults.dst_data_model;
        }
    }
}

/// Window in which first-of-month timesteps are masked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NanFirstWindow {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl NanFirstWindow {
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start.map_or(true, |s| t >= s) && self.end.map_or(true, |e| t <= e)
    }
}

/// The fully resolved rule set for one (model, experiment, source)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveFixRule {
    /// Human-readable description of the layers that produced this rule
    pub name: String,
    pub vars: BTreeMap<String, VarRule>,
    pub delete: Vec<String>,
    pub coords: BTreeMap<String, CoordRule>,
    pub data_model: Option<String>,
    pub accumulation_seconds: f64,
    pub jump: Option<CalendarUnit>,
    pub nanfirst_window: NanFirstWindow,
}

impl EffectiveFixRule {
    /// Validate and freeze a merged rule block.
    pub fn from_block(name: &str, block: RuleBlock) -> Result<Self> {
        let jump = block.jump.as_deref().map(CalendarUnit::parse).transpose()?;
        let accumulation_seconds = block.deltat.unwrap_or(1.0);
        if accumulation_seconds <= 0.0 {
            return Err(ClimNormError::Config(format!(
                "{name}: deltat must be positive, got {accumulation_seconds}"
            )));
        }
        let nanfirst_window = NanFirstWindow {
            start: block.nanfirst_startdate.as_deref().map(parse_datetime).transpose()?,
            end: block.nanfirst_enddate.as_deref().map(parse_datetime).transpose()?,
        };
        for (var, rule) in &block.vars {
            if rule.source.is_some() && rule.derived.is_some() {
                return Err(ClimNormError::Config(format!(
                    "{name}: variable '{var}' declares both 'source' and 'derived'"
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            vars: block.vars,
            delete: block.delete,
            coords: block.coords,
            data_model: block.data_model,
            accumulation_seconds,
            jump,
            nanfirst_window,
        })
    }

    /// Reject derived formulas that reference variables this rule set itself
    /// produces. Such references would only resolve after retrieval-time
    /// variable selection, which is too late.
    pub fn check_derived(&self, var: &str) -> Result<Option<Formula>> {
        let Some(text) = self.vars.get(var).and_then(|r| r.derived.as_deref()) else {
            return Ok(None);
        };
        let formula = Formula::parse(text)?;
        for operand in formula.operands() {
            if let Some(other) = self.vars.get(operand) {
                if other.source.is_some() || other.derived.is_some() {
                    return Err(ClimNormError::RecursiveDerivation {
                        var: var.to_string(),
                        operand: operand.to_string(),
                    });
                }
            }
        }
        Ok(Some(formula))
    }

    /// Dataset variables needed to produce the requested canonical variables.
    ///
    /// Names without a rule are passed through. GRIB paramIds are translated
    /// to short names; derived variables contribute their formula operands.
    pub fn source_variables(&self, requested: &[String], grib: &dyn GribLookup) -> Result<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |name: String| {
            if !out.contains(&name) {
                out.push(name);
            }
        };
        for var in requested {
            let Some(rule) = self.vars.get(var) else {
                push(var.clone());
                continue;
            };
            if let Some(formula) = self.check_derived(var)? {
                formula.operands().into_iter().map(str::to_string).for_each(&mut push);
                continue;
            }
            match &rule.source {
                Some(src) => match src.param_id() {
                    Some(code) => match grib.by_param_id(code) {
                        Some(param) => push(param.short_name),
                        None => log::warn!("{var}: unknown GRIB paramId {code}"),
                    },
                    None => {
                        if let SourceRef::Name(n) = src {
                            push(n.clone());
                        }
                    }
                },
                None => push(var.clone()),
            }
        }
        Ok(out)
    }
}
