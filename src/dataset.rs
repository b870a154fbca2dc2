//! In-memory gridded dataset model
//!
//! A [`Dataset`] is a set of named [`Field`]s (n-dimensional arrays keyed by
//! dimension names) sharing a set of 1-D [`Coordinate`]s. The time coordinate is
//! the coordinate named [`TIME`]; every time-aware operation in the crate goes
//! through the helpers defined here.

use crate::errors::{ClimNormError, Result};
use chrono::NaiveDateTime;
use ndarray::{Array1, ArrayD, Axis, Slice};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

/// Name of the time dimension and coordinate
pub const TIME: &str = "time";

/// Attribute bag attached to fields, coordinates and datasets
pub type Attributes = HashMap<String, JsonValue>;

/// Pending unit conversion for a field: `value * factor + offset`
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFixState {
    pub factor: f64,
    pub offset: f64,
    pub target_unit: String,
}

/// A named physical field
#[derive(Debug, Clone)]
pub struct Field {
    pub dims: Vec<String>,
    pub data: ArrayD<f64>,
    pub attrs: Attributes,
    /// Set by the fixer, consumed by [`Field::apply_unit_fix`]
    pub unit_fix: Option<UnitFixState>,
}

impl Field {
    /// Create a field, checking that every array axis has a dimension name.
    pub fn new<S: AsRef<str>>(dims: &[S], data: ArrayD<f64>) -> Result<Self> {
        if dims.len() != data.ndim() {
            return Err(ClimNormError::Config(format!(
                "field has {} dimensions but {} dimension names were given",
                data.ndim(),
                dims.len()
            )));
        }
        Ok(Self {
            dims: dims.iter().map(|d| d.as_ref().to_string()).collect(),
            data,
            attrs: Attributes::new(),
            unit_fix: None,
        })
    }

    /// Builder-style attribute setter
    #[must_use]
    pub fn with_attr(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    /// Builder-style units setter
    #[must_use]
    pub fn with_units(self, units: &str) -> Self {
        self.with_attr("units", units)
    }

    pub fn units(&self) -> Option<&str> {
        self.attrs.get("units").and_then(JsonValue::as_str)
    }

    pub fn set_units(&mut self, units: &str) {
        self.attrs
            .insert("units".to_string(), JsonValue::from(units));
    }

    /// Position of a named dimension in this field
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn time_axis(&self) -> Option<usize> {
        self.axis_of(TIME)
    }

    fn flag(&self, key: &str) -> bool {
        match self.attrs.get(key) {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            _ => false,
        }
    }

    /// True once a unit fix has been applied to this field
    pub fn is_units_fixed(&self) -> bool {
        self.flag("units_fixed")
    }

    /// True once the field has been decumulated
    pub fn is_decumulated(&self) -> bool {
        self.flag("decumulated")
    }

    /// Apply and clear the pending unit fix.
    ///
    /// Returns `true` if values were changed. A field already tagged
    /// `units_fixed`, or whose units already equal the target, is left alone
    /// so that applying twice never changes values twice.
    pub fn apply_unit_fix(&mut self) -> bool {
        let Some(state) = self.unit_fix.take() else {
            return false;
        };
        if self.is_units_fixed() || self.units() == Some(state.target_unit.as_str()) {
            return false;
        }
        if state.factor != 1.0 {
            self.data.mapv_inplace(|v| v * state.factor);
        }
        if state.offset != 0.0 {
            self.data.mapv_inplace(|v| v + state.offset);
        }
        self.set_units(&state.target_unit);
        self.attrs
            .insert("units_fixed".to_string(), JsonValue::from(1));
        true
    }

    /// Same dimensions and metadata, new values
    pub fn with_data(&self, data: ArrayD<f64>) -> Self {
        Self {
            dims: self.dims.clone(),
            data,
            attrs: self.attrs.clone(),
            unit_fix: self.unit_fix.clone(),
        }
    }

    fn slice_time(&self, range: Range<usize>) -> Self {
        match self.time_axis() {
            Some(ax) => self.with_data(
                self.data
                    .slice_axis(Axis(ax), Slice::from(range))
                    .to_owned(),
            ),
            None => self.clone(),
        }
    }

    fn select_time(&self, indices: &[usize]) -> Self {
        match self.time_axis() {
            Some(ax) => self.with_data(self.data.select(Axis(ax), indices)),
            None => self.clone(),
        }
    }
}

/// Values of a 1-D coordinate
#[derive(Debug, Clone, PartialEq)]
pub enum CoordValues {
    Numeric(Array1<f64>),
    Time(Vec<NaiveDateTime>),
}

impl CoordValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Time(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slice(&self, range: Range<usize>) -> Self {
        match self {
            Self::Numeric(v) => Self::Numeric(v.slice_axis(Axis(0), Slice::from(range)).to_owned()),
            Self::Time(v) => Self::Time(v[range].to_vec()),
        }
    }

    fn select(&self, indices: &[usize]) -> Self {
        match self {
            Self::Numeric(v) => Self::Numeric(v.select(Axis(0), indices)),
            Self::Time(v) => Self::Time(indices.iter().map(|&i| v[i]).collect()),
        }
    }

    fn reversed(&self) -> Self {
        match self {
            Self::Numeric(v) => Self::Numeric(v.iter().rev().copied().collect()),
            Self::Time(v) => Self::Time(v.iter().rev().copied().collect()),
        }
    }
}

/// A 1-D coordinate variable bound to one dimension
#[derive(Debug, Clone)]
pub struct Coordinate {
    pub dim: String,
    pub values: CoordValues,
    pub attrs: Attributes,
}

impl Coordinate {
    pub fn numeric(dim: &str, values: Vec<f64>) -> Self {
        Self {
            dim: dim.to_string(),
            values: CoordValues::Numeric(Array1::from(values)),
            attrs: Attributes::new(),
        }
    }

    pub fn time(values: Vec<NaiveDateTime>) -> Self {
        Self {
            dim: TIME.to_string(),
            values: CoordValues::Time(values),
            attrs: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_attr(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }

    pub fn units(&self) -> Option<&str> {
        self.attrs.get("units").and_then(JsonValue::as_str)
    }
}

/// A collection of fields sharing coordinates
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub fields: BTreeMap<String, Field>,
    pub coords: BTreeMap<String, Coordinate>,
    pub attrs: Attributes,
    /// Auxiliary `time_bnds` (first and last contributing input step per output step)
    pub time_bnds: Option<Vec<[NaiveDateTime; 2]>>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty dataset with a time coordinate
    pub fn with_time(times: Vec<NaiveDateTime>) -> Self {
        let mut ds = Self::default();
        ds.coords.insert(TIME.to_string(), Coordinate::time(times));
        ds
    }

    pub fn insert_field(&mut self, name: &str, field: Field) -> Option<Field> {
        self.fields.insert(name.to_string(), field)
    }

    pub fn insert_coord(&mut self, name: &str, coord: Coordinate) -> Option<Coordinate> {
        self.coords.insert(name.to_string(), coord)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Values of the time coordinate, if any
    pub fn time(&self) -> Option<&[NaiveDateTime]> {
        match self.coords.get(TIME).map(|c| &c.values) {
            Some(CoordValues::Time(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Number of timesteps (0 without a time axis)
    pub fn time_len(&self) -> usize {
        self.time().map_or(0, <[NaiveDateTime]>::len)
    }

    fn map_time<F, C>(&self, field_op: F, coord_op: C, bnds: Option<Vec<[NaiveDateTime; 2]>>) -> Self
    where
        F: Fn(&Field) -> Field,
        C: Fn(&CoordValues) -> CoordValues,
    {
        let fields = self
            .fields
            .iter()
            .map(|(name, f)| (name.clone(), field_op(f)))
            .collect();
        let coords = self
            .coords
            .iter()
            .map(|(name, c)| {
                let coord = if c.dim == TIME {
                    Coordinate {
                        values: coord_op(&c.values),
                        ..c.clone()
                    }
                } else {
                    c.clone()
                };
                (name.clone(), coord)
            })
            .collect();
        Self {
            fields,
            coords,
            attrs: self.attrs.clone(),
            time_bnds: bnds,
        }
    }

    /// Positional slice along time (half-open range)
    pub fn isel_time(&self, range: Range<usize>) -> Self {
        let len = self.time_len();
        let range = range.start.min(len)..range.end.min(len);
        let bnds = self
            .time_bnds
            .as_ref()
            .map(|b| b[range.start.min(b.len())..range.end.min(b.len())].to_vec());
        self.map_time(
            |f| f.slice_time(range.clone()),
            |c| c.slice(range.clone()),
            bnds,
        )
    }

    /// Select an arbitrary, ordered set of timesteps
    pub fn select_time(&self, indices: &[usize]) -> Self {
        let bnds = self
            .time_bnds
            .as_ref()
            .map(|b| indices.iter().filter_map(|&i| b.get(i).copied()).collect());
        self.map_time(|f| f.select_time(indices), |c| c.select(indices), bnds)
    }

    /// Label-based selection, both ends inclusive
    pub fn sel_time(&self, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        let Some(times) = self.time() else {
            return self.clone();
        };
        let indices: Vec<usize> = times
            .iter()
            .enumerate()
            .filter(|(_, t)| start.map_or(true, |s| **t >= s) && end.map_or(true, |e| **t <= e))
            .map(|(i, _)| i)
            .collect();
        self.select_time(&indices)
    }

    /// Concatenate datasets along time. Time-independent fields and
    /// coordinates are taken from the first dataset.
    pub fn concat_time(chunks: &[Dataset]) -> Result<Dataset> {
        let Some(first) = chunks.first() else {
            return Ok(Dataset::default());
        };
        let mut out = first.clone();
        for (name, field) in out.fields.iter_mut() {
            let Some(ax) = field.time_axis() else {
                continue;
            };
            let views = chunks
                .iter()
                .map(|c| {
                    c.field(name)
                        .map(|f| f.data.view())
                        .ok_or_else(|| ClimNormError::VariableNotFound { var: name.clone() })
                })
                .collect::<Result<Vec<_>>>()?;
            field.data = ndarray::concatenate(Axis(ax), &views)?;
        }
        for (name, coord) in out.coords.iter_mut() {
            if coord.dim != TIME {
                continue;
            }
            coord.values = match &coord.values {
                CoordValues::Time(_) => CoordValues::Time(
                    chunks
                        .iter()
                        .filter_map(|c| match c.coords.get(name).map(|c| &c.values) {
                            Some(CoordValues::Time(v)) => Some(v.clone()),
                            _ => None,
                        })
                        .flatten()
                        .collect(),
                ),
                CoordValues::Numeric(_) => CoordValues::Numeric(
                    chunks
                        .iter()
                        .filter_map(|c| match c.coords.get(name).map(|c| &c.values) {
                            Some(CoordValues::Numeric(v)) => Some(v.to_vec()),
                            _ => None,
                        })
                        .flatten()
                        .collect(),
                ),
            };
        }
        if chunks.iter().all(|c| c.time_bnds.is_some()) {
            out.time_bnds = Some(
                chunks
                    .iter()
                    .filter_map(|c| c.time_bnds.clone())
                    .flatten()
                    .collect(),
            );
        }
        Ok(out)
    }

    /// Rename a dimension in every field and coordinate that uses it
    pub fn rename_dim(&mut self, old: &str, new: &str) {
        for field in self.fields.values_mut() {
            for d in field.dims.iter_mut().filter(|d| d.as_str() == old) {
                *d = new.to_string();
            }
        }
        for coord in self.coords.values_mut().filter(|c| c.dim == old) {
            coord.dim = new.to_string();
        }
    }

    /// Rename a coordinate; its dimension follows when both share the name.
    ///
    /// Returns `false` if the coordinate does not exist.
    pub fn rename_coord(&mut self, old: &str, new: &str) -> bool {
        let Some(coord) = self.coords.remove(old) else {
            return false;
        };
        let same_dim = coord.dim == old;
        self.coords.insert(new.to_string(), coord);
        if same_dim {
            self.rename_dim(old, new);
        }
        true
    }

    /// Reverse the storage order along a dimension
    pub fn reverse_dim(&mut self, dim: &str) {
        for field in self.fields.values_mut() {
            if let Some(ax) = field.axis_of(dim) {
                field.data.invert_axis(Axis(ax));
            }
        }
        for coord in self.coords.values_mut().filter(|c| c.dim == dim) {
            coord.values = coord.values.reversed();
        }
        if dim == TIME {
            if let Some(b) = self.time_bnds.as_mut() {
                b.reverse();
            }
        }
    }
}
