//! NetCDF-backed dataset handles
//!
//! Reads variables, their attributes and their coordinate variables from a
//! NetCDF file into a [`Dataset`]. CF time coordinates are decoded to
//! timestamps and `_FillValue` entries become NaN.

use crate::calendar::decode_cf_time;
use crate::catalog::DatasetHandle;
use crate::dataset::{Attributes, Coordinate, CoordValues, Dataset, Field, TIME};
use crate::errors::{ClimNormError, Result};
use log::{debug, warn};
use ndarray::{Array1, ArrayD, IxDyn};
use netcdf::{AttributeValue, File, Variable};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Handle over a NetCDF file on disk
#[derive(Debug, Clone)]
pub struct NetcdfHandle {
    path: PathBuf,
}

impl NetcdfHandle {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn open(&self) -> Result<File> {
        Ok(netcdf::open(&self.path)?)
    }
}

fn attribute_to_json(value: AttributeValue) -> Option<JsonValue> {
    let json = match value {
        AttributeValue::Str(v) => JsonValue::from(v),
        AttributeValue::Strs(v) => JsonValue::from(v),
        AttributeValue::Float(v) => JsonValue::from(v),
        AttributeValue::Floats(v) => JsonValue::from(v),
        AttributeValue::Double(v) => JsonValue::from(v),
        AttributeValue::Doubles(v) => JsonValue::from(v),
        AttributeValue::Int(v) => JsonValue::from(v),
        AttributeValue::Ints(v) => JsonValue::from(v),
        AttributeValue::Short(v) => JsonValue::from(v),
        AttributeValue::Shorts(v) => JsonValue::from(v),
        AttributeValue::Longlong(v) => JsonValue::from(v),
        AttributeValue::Uchar(v) => JsonValue::from(v),
        _ => return None,
    };
    Some(json)
}

fn read_attributes(var: &Variable) -> Attributes {
    let mut attrs = Attributes::new();
    for attr in var.attributes() {
        match attr.value().ok().and_then(attribute_to_json) {
            Some(v) => {
                attrs.insert(attr.name().to_string(), v);
            }
            None => debug!("skipped unsupported attribute type for '{}'", attr.name()),
        }
    }
    attrs
}

fn dimension_names(var: &Variable) -> Vec<String> {
    var.dimensions().iter().map(|d| d.name().to_string()).collect()
}

fn read_field(var: &Variable) -> Result<Field> {
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let mut values: Vec<f64> = var.get_values::<f64, _>(..)?;
    let mut attrs = read_attributes(var);
    if let Some(fill) = attrs.remove("_FillValue").and_then(|v| v.as_f64()) {
        values.iter_mut().filter(|v| **v == fill).for_each(|v| *v = f64::NAN);
    }
    let data = ArrayD::from_shape_vec(IxDyn(&shape), values)?;
    let mut field = Field::new(&dimension_names(var), data)?;
    field.attrs = attrs;
    Ok(field)
}

fn read_coordinate(var: &Variable, dim: &str) -> Result<Coordinate> {
    let values: Vec<f64> = var.get_values::<f64, _>(..)?;
    let attrs = read_attributes(var);
    let units = attrs.get("units").and_then(JsonValue::as_str).unwrap_or_default();
    let values = if dim == TIME && units.contains(" since ") {
        CoordValues::Time(decode_cf_time(units, &values)?)
    } else {
        CoordValues::Numeric(Array1::from(values))
    };
    Ok(Coordinate {
        dim: dim.to_string(),
        values,
        attrs,
    })
}

impl DatasetHandle for NetcdfHandle {
    fn variables(&self) -> Result<Vec<String>> {
        let file = self.open()?;
        let dims: BTreeSet<String> = file.dimensions().map(|d| d.name().to_string()).collect();
        Ok(file
            .variables()
            .map(|v| v.name().to_string())
            .filter(|name| !dims.contains(name))
            .collect())
    }

    fn load(&self, variables: Option<&[String]>) -> Result<Dataset> {
        let file = self.open()?;
        let names = match variables {
            Some(v) => v.to_vec(),
            None => self.variables()?,
        };
        let mut ds = Dataset::new();
        let mut used_dims = BTreeSet::new();
        for name in &names {
            let Some(var) = file.variable(name) else {
                debug!("{} has no variable '{name}'", self.path.display());
                continue;
            };
            let field = read_field(&var)?;
            used_dims.extend(field.dims.iter().cloned());
            ds.insert_field(name, field);
        }
        for dim in used_dims {
            match file.variable(&dim) {
                Some(var) => {
                    ds.insert_coord(&dim, read_coordinate(&var, &dim)?);
                }
                None if dim == TIME => {
                    return Err(ClimNormError::Catalog(format!(
                        "{}: time dimension without coordinate variable",
                        self.path.display()
                    )))
                }
                None => warn!("{}: dimension '{dim}' has no coordinate variable", self.path.display()),
            }
        }
        Ok(ds)
    }
}
