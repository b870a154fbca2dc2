//! Application of an effective fix rule to a dataset
//!
//! The pipeline for one call is:
//!
//! 1. pick the rule variables to process (optionally filtered by request);
//! 2. resolve each variable's source: a dataset variable, a GRIB paramId or
//!    a derived formula;
//! 3. collect renames and apply them together, so no variable is renamed
//!    while another one still reads it by its old name;
//! 4. per renamed field: attributes, unit state, decumulation, first-of-month
//!    masking, and finally the unit conversion itself when requested;
//! 5. deletions, data-model translation and coordinate renames.

use super::datamodel::DataModel;
use super::grib::{GribLookup, GribParam, StaticGribTable};
use super::rules::{CoordRule, EffectiveFixRule, SourceRef, VarRule};
use crate::dataset::{Attributes, Dataset, Field, UnitFixState};
use crate::decumulate::{decumulate, nanfirst, Decumulator};
use crate::errors::{ClimNormError, Result};
use crate::units::UnitSystem;
use chrono::NaiveDateTime;
use log::{debug, info, warn};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Where a renamed field comes from
#[derive(Debug, Clone, PartialEq, Eq)]
enum SourceKey {
    /// A variable of the input dataset
    Variable(String),
    /// A field computed from a formula during this call
    Derived,
}

/// Everything decided about one rule variable before renaming
struct Plan<'r> {
    target: String,
    source: SourceKey,
    rule: &'r VarRule,
    grib: Option<GribParam>,
    target_units: Option<String>,
}

/// Applies fix rules; carries the decumulation memory used for chunked input
pub struct VariableNormalizer {
    rule: Option<Arc<EffectiveFixRule>>,
    units: UnitSystem,
    grib: Arc<dyn GribLookup>,
    data_model: Option<DataModel>,
    default_coords: BTreeMap<String, CoordRule>,
    decumulator: Decumulator,
}

impl std::fmt::Debug for VariableNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableNormalizer")
            .field("rule", &self.rule.as_ref().map(|r| r.name.as_str()))
            .field("data_model", &self.data_model.as_ref().map(|d| d.name.as_str()))
            .field("decumulator", &self.decumulator)
            .finish_non_exhaustive()
    }
}

fn is_flagged(attrs: &Attributes, key: &str) -> bool {
    match attrs.get(key) {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    }
}

impl VariableNormalizer {
    pub fn new(rule: Option<EffectiveFixRule>) -> Self {
        Self {
            rule: rule.map(Arc::new),
            units: UnitSystem::new(),
            grib: Arc::new(StaticGribTable),
            data_model: None,
            default_coords: BTreeMap::new(),
            decumulator: Decumulator::new(),
        }
    }

    /// Share an already resolved rule between normalizers
    pub fn from_shared(rule: Option<Arc<EffectiveFixRule>>) -> Self {
        Self {
            rule,
            ..Self::new(None)
        }
    }

    #[must_use]
    pub fn with_units(mut self, units: UnitSystem) -> Self {
        self.units = units;
        self
    }

    #[must_use]
    pub fn with_grib(mut self, grib: Arc<dyn GribLookup>) -> Self {
        self.grib = grib;
        self
    }

    #[must_use]
    pub fn with_data_model(mut self, data_model: Option<DataModel>) -> Self {
        self.data_model = data_model;
        self
    }

    #[must_use]
    pub fn with_default_coords(mut self, coords: BTreeMap<String, CoordRule>) -> Self {
        self.default_coords = coords;
        self
    }

    pub fn rule(&self) -> Option<&EffectiveFixRule> {
        self.rule.as_deref()
    }

    pub fn grib(&self) -> &dyn GribLookup {
        self.grib.as_ref()
    }

    pub fn decumulator(&self) -> &Decumulator {
        &self.decumulator
    }

    /// Forget the decumulation memory
    pub fn reset(&mut self) {
        self.decumulator.reset();
    }

    /// Normalize a complete dataset. Decumulation starts from scratch.
    pub fn normalize(&self, ds: Dataset, requested: Option<&[String]>, apply_unit_fix: bool) -> Result<Dataset> {
        self.run(ds, requested, apply_unit_fix, None)
    }

    /// Normalize the next chunk of a time-ordered sequence.
    ///
    /// Decumulated variables continue from the last step of the previous
    /// chunk. Chunks must be passed in time order.
    pub fn normalize_chunk(
        &mut self,
        ds: Dataset,
        requested: Option<&[String]>,
        apply_unit_fix: bool,
    ) -> Result<Dataset> {
        let mut memory = std::mem::take(&mut self.decumulator);
        let out = self.normalize_chunk_with(ds, requested, apply_unit_fix, &mut memory);
        self.decumulator = memory;
        out
    }

    /// Like [`normalize_chunk`](Self::normalize_chunk), with caller-owned memory.
    ///
    /// `memory` is updated only when the whole chunk succeeds.
    pub fn normalize_chunk_with(
        &self,
        ds: Dataset,
        requested: Option<&[String]>,
        apply_unit_fix: bool,
        memory: &mut Decumulator,
    ) -> Result<Dataset> {
        let mut scratch = memory.clone();
        let out = self.run(ds, requested, apply_unit_fix, Some(&mut scratch))?;
        *memory = scratch;
        Ok(out)
    }

    fn run(
        &self,
        mut ds: Dataset,
        requested: Option<&[String]>,
        apply_unit_fix: bool,
        mut memory: Option<&mut Decumulator>,
    ) -> Result<Dataset> {
        let Some(rule) = self.rule.as_deref() else {
            debug!("no fix rule, data passed through unchanged");
            return Ok(ds);
        };
        let explicit = |name: &str| requested.is_some_and(|r| r.iter().any(|v| v == name));
        let time: Vec<NaiveDateTime> = ds.time().map(<[NaiveDateTime]>::to_vec).unwrap_or_default();
        // Step before this chunk, for first-of-month masking
        let previous = memory.as_deref().and_then(Decumulator::last_step);
        let dataset_fixed = is_flagged(&ds.attrs, "units_fixed");

        let mut names: Vec<&String> = rule.vars.keys().collect();
        if let Some(req) = requested {
            let filtered: Vec<&String> = names.iter().copied().filter(|n| req.contains(n)).collect();
            if filtered.is_empty() {
                info!("no requested variable has a fix rule, processing all {} rule variables", names.len());
            } else {
                names = filtered;
            }
        }

        // Resolve sources; derived fields are evaluated against the unrenamed input
        let mut staging: HashMap<String, Field> = HashMap::new();
        let mut plans: Vec<Plan<'_>> = Vec::new();
        for name in names {
            let vr = &rule.vars[name];
            let mut grib = None;
            let source = if vr.derived.is_some() {
                if ds.field(name).is_some_and(Field::is_units_fixed) {
                    debug!("{name}: already derived and fixed, skipping");
                    continue;
                }
                let Some(formula) = rule.check_derived(name)? else {
                    continue;
                };
                match formula.evaluate(&ds) {
                    Ok(field) => {
                        debug!("{name}: derived from '{}'", formula.as_str());
                        staging.insert(name.clone(), field);
                        SourceKey::Derived
                    }
                    Err(e) if explicit(name) => {
                        return Err(ClimNormError::VariableUnavailable {
                            var: name.clone(),
                            reason: e.to_string(),
                        })
                    }
                    Err(e) => {
                        warn!("{name}: cannot evaluate '{}': {e}", formula.as_str());
                        continue;
                    }
                }
            } else {
                let src_name = match vr.source.as_ref().map(|s| (s, s.param_id())) {
                    Some((_, Some(code))) => match self.grib.by_param_id(code) {
                        Some(param) => {
                            let short = if ds.contains(&param.short_name) {
                                param.short_name.clone()
                            } else {
                                code.to_string()
                            };
                            grib = Some(param);
                            short
                        }
                        None => code.to_string(),
                    },
                    Some((SourceRef::Name(n), None)) => n.clone(),
                    Some((SourceRef::Code(c), None)) => c.to_string(),
                    None => name.clone(),
                };
                if !ds.contains(&src_name) {
                    if explicit(name) {
                        warn!("{name}: requested but source variable '{src_name}' is not in the dataset, skipping");
                    } else {
                        debug!("{name}: source variable '{src_name}' not in the dataset, skipping");
                    }
                    continue;
                }
                if vr.grib && grib.is_none() {
                    grib = self.grib.lookup(&src_name).or_else(|| self.grib.lookup(name));
                }
                SourceKey::Variable(src_name)
            };
            let target_units = vr
                .units
                .clone()
                .or_else(|| grib.as_ref().filter(|_| vr.grib).map(|p| p.units.clone()));
            plans.push(Plan {
                target: name.clone(),
                source,
                rule: vr,
                grib,
                target_units,
            });
        }

        // Batch rename: take every source out first, then insert every target
        let mut claims: HashMap<String, usize> = HashMap::new();
        for plan in &plans {
            if let SourceKey::Variable(src) = &plan.source {
                *claims.entry(src.clone()).or_default() += 1;
            }
        }
        let mut taken: Vec<(Plan<'_>, Field)> = Vec::with_capacity(plans.len());
        for plan in plans {
            let field = match &plan.source {
                SourceKey::Derived => staging.remove(&plan.target),
                SourceKey::Variable(src) => {
                    let left = claims.get_mut(src).map(|c| {
                        *c -= 1;
                        *c
                    });
                    match left {
                        Some(0) => ds.fields.remove(src),
                        _ => ds.field(src).cloned(),
                    }
                }
            };
            if let Some(field) = field {
                if let SourceKey::Variable(src) = &plan.source {
                    if *src != plan.target {
                        debug!("renaming {src} -> {}", plan.target);
                    }
                }
                taken.push((plan, field));
            }
        }

        for (plan, mut field) in taken {
            let target = plan.target.as_str();
            let vr = plan.rule;

            if let Some(param) = &plan.grib {
                for (k, v) in param.attributes() {
                    if k != "units" {
                        field.attrs.insert(k, v);
                    }
                }
            }
            for (k, v) in &vr.attributes {
                if k != "units" {
                    field.attrs.insert(k.clone(), v.clone());
                }
            }
            if let Some(src_units) = &vr.src_units {
                field.set_units(src_units);
            }

            if let Some(tgt) = &plan.target_units {
                if dataset_fixed || field.is_units_fixed() {
                    debug!("{target}: units already fixed");
                } else {
                    self.plan_unit_fix(target, &mut field, tgt, rule.accumulation_seconds);
                }
            }

            if vr.decumulate || vr.nanfirst {
                if field.time_axis().is_none() || time.is_empty() {
                    warn!("{target}: no time axis, skipping decumulation and masking");
                } else {
                    if vr.decumulate {
                        let keep_first = vr.keep_first.unwrap_or(true);
                        field = match memory.as_deref_mut() {
                            Some(dec) => dec.decumulate_chunk(target, &field, &time, rule.jump, keep_first)?,
                            None => decumulate(&field, &time, rule.jump, keep_first, None)?,
                        };
                    }
                    if vr.nanfirst {
                        nanfirst(&mut field, &time, &rule.nanfirst_window, previous)?;
                    }
                }
            }

            if apply_unit_fix && field.apply_unit_fix() {
                debug!("{target}: unit fix applied");
            }
            ds.insert_field(target, field);
        }
        if let (Some(dec), Some(&last)) = (memory.as_deref_mut(), time.last()) {
            dec.mark_step(last);
        }

        for name in &rule.delete {
            if ds.fields.remove(name).is_some() {
                debug!("deleted {name}");
            }
        }

        if let Some(dm) = &self.data_model {
            dm.apply(&mut ds, &self.units);
        }
        let mut coords = self.default_coords.clone();
        coords.extend(rule.coords.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (target, cr) in &coords {
            if ds.rename_coord(&cr.source, target) {
                debug!("coordinate {} -> {target}", cr.source);
            }
        }

        ds.attrs
            .insert("fixer_name".to_string(), JsonValue::from(rule.name.as_str()));
        Ok(ds)
    }

    /// Decide the unit conversion of one field and store it as pending state.
    fn plan_unit_fix(&self, target: &str, field: &mut Field, tgt: &str, accumulation_seconds: f64) {
        let tgt = match self.units.resolve_placeholders(tgt) {
            Ok(t) => t,
            Err(key) => {
                warn!("{target}: unit placeholder '{{{key}}}' is not defined, units left as they are");
                return;
            }
        };
        let Some(current) = field.units().map(str::to_string) else {
            info!("{target}: no source units, setting {tgt}");
            field.set_units(&tgt);
            return;
        };
        if current == tgt {
            return;
        }
        if self.units.same_unit(&current, &tgt) {
            field.set_units(&tgt);
            return;
        }
        match self.units.convert(&current, &tgt, accumulation_seconds) {
            Ok((factor, offset)) => {
                debug!("{target}: {current} -> {tgt}, factor {factor} offset {offset}");
                field.unit_fix = Some(UnitFixState {
                    factor,
                    offset,
                    target_unit: tgt,
                });
            }
            Err(e) => warn!("{target}: {e}, units left as they are"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixer::rules::RuleBlock;
    use ndarray::ArrayD;

    fn rule(vars: &[(&str, VarRule)]) -> EffectiveFixRule {
        let block = RuleBlock {
            vars: vars.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            ..RuleBlock::default()
        };
        EffectiveFixRule::from_block("test", block).unwrap()
    }

    fn field(v: f64, units: &str) -> Field {
        Field::new(&["x"], ArrayD::from_elem(vec![2], v)).unwrap().with_units(units)
    }

    #[test]
    fn swap_names_without_aliasing() {
        let r = rule(&[
            ("a", VarRule { source: Some(SourceRef::Name("b".into())), ..VarRule::default() }),
            ("b", VarRule { source: Some(SourceRef::Name("a".into())), ..VarRule::default() }),
        ]);
        let mut ds = Dataset::new();
        ds.insert_field("a", field(1.0, "m"));
        ds.insert_field("b", field(2.0, "m"));
        let out = VariableNormalizer::new(Some(r)).normalize(ds, None, true).unwrap();
        assert_eq!(out.field("a").unwrap().data[[0]], 2.0);
        assert_eq!(out.field("b").unwrap().data[[0]], 1.0);
    }

    #[test]
    fn one_source_two_targets() {
        let src = || VarRule { source: Some(SourceRef::Name("t".into())), ..VarRule::default() };
        let r = rule(&[("ta", src()), ("tb", src())]);
        let mut ds = Dataset::new();
        ds.insert_field("t", field(1.0, "K"));
        let out = VariableNormalizer::new(Some(r)).normalize(ds, None, true).unwrap();
        assert!(out.contains("ta") && out.contains("tb") && !out.contains("t"));
    }

    #[test]
    fn undefined_placeholder_leaves_units() {
        let r = rule(&[("x", VarRule { units: Some("{nope}".into()), ..VarRule::default() })]);
        let mut ds = Dataset::new();
        ds.insert_field("x", field(1.0, "K"));
        let out = VariableNormalizer::new(Some(r)).normalize(ds, None, true).unwrap();
        assert_eq!(out.field("x").unwrap().units(), Some("K"));
    }

    #[test]
    fn grib_code_source_and_attributes() {
        let r = rule(&[(
            "tas",
            VarRule {
                source: Some(SourceRef::Code(167)),
                grib: true,
                ..VarRule::default()
            },
        )]);
        let mut ds = Dataset::new();
        ds.insert_field("2t", field(280.0, "K"));
        let out = VariableNormalizer::new(Some(r)).normalize(ds, None, true).unwrap();
        let tas = out.field("tas").unwrap();
        assert_eq!(tas.attrs["paramId"], 167);
        assert_eq!(tas.units(), Some("K"));
        assert_eq!(out.attrs["fixer_name"], "test");
    }

    fn hourly_chunk(start: usize, vars: &[&str]) -> Dataset {
        let t0 = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let times = (start..start + 3).map(|i| t0 + chrono::TimeDelta::hours(i as i64)).collect();
        let mut ds = Dataset::with_time(times);
        for name in vars {
            let data = ArrayD::from_shape_vec(vec![3], (start..start + 3).map(|i| i as f64).collect()).unwrap();
            ds.insert_field(name, Field::new(&["time"], data).unwrap().with_units("m"));
        }
        ds
    }

    #[test]
    fn failed_chunk_leaves_memory_untouched() {
        let acc = || VarRule { decumulate: true, ..VarRule::default() };
        let mut normalizer = VariableNormalizer::new(Some(rule(&[("a", acc()), ("b", acc())])));
        normalizer.normalize_chunk(hourly_chunk(0, &["a", "b"]), None, true).unwrap();
        normalizer.normalize_chunk(hourly_chunk(3, &["b"]), None, true).unwrap();
        let before = normalizer.decumulator().clone();
        let first_end = hourly_chunk(0, &[]).time().unwrap()[2];
        assert_eq!(before.previous_time("a"), Some(first_end));

        // "a" could continue, but "b" has already seen these steps
        let err = normalizer
            .normalize_chunk(hourly_chunk(3, &["a", "b"]), None, true)
            .unwrap_err();
        assert!(matches!(err, ClimNormError::OutOfOrderChunk { ref var, .. } if var == "b"));
        assert_eq!(normalizer.decumulator().memory(), before.memory());
        assert_eq!(normalizer.decumulator().last_step(), before.last_step());
    }

    #[test]
    fn no_rule_passes_through() {
        let mut ds = Dataset::new();
        ds.insert_field("x", field(1.0, "K"));
        let out = VariableNormalizer::new(None).normalize(ds, None, true).unwrap();
        assert!(out.attrs.get("fixer_name").is_none());
        assert_eq!(out.field("x").unwrap().data[[0]], 1.0);
    }
}
