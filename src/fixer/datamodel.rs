//! Coordinate data-model translation
//!
//! A data model file `{src}2{dst}.json` maps source coordinate names (or CF
//! `standard_name`s) to the target convention:
//!
//! ```json
//! {
//!   "lat": {"out_name": "latitude", "units": "degrees_north", "stored_direction": "increasing"},
//!   "plev": {"out_name": "isobaricInhPa", "units": "hPa", "stored_direction": "decreasing"}
//! }
//! ```

use crate::dataset::{CoordValues, Dataset};
use crate::errors::Result;
use crate::units::UnitSystem;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredDirection {
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoordTranslation {
    pub out_name: String,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub stored_direction: Option<StoredDirection>,
}

/// A loaded coordinate convention mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataModel {
    pub name: String,
    pub coords: BTreeMap<String, CoordTranslation>,
}

impl DataModel {
    pub fn from_json_str(name: &str, text: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            coords: serde_json::from_str(text)?,
        })
    }

    /// Load `{dir}/{src}2{dst}.json`. A missing file is logged and yields `None`.
    pub fn load(dir: &Path, src: &str, dst: &str) -> Result<Option<Self>> {
        let name = format!("{src}2{dst}");
        let path = dir.join(format!("{name}.json"));
        if !path.exists() {
            warn!("data model file {} not found, coordinates left unchanged", path.display());
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        Self::from_json_str(&name, &text).map(Some)
    }

    fn find_source(&self, ds: &Dataset, key: &str) -> Option<String> {
        if ds.coords.contains_key(key) {
            return Some(key.to_string());
        }
        ds.coords
            .iter()
            .find(|(_, c)| c.attrs.get("standard_name").and_then(JsonValue::as_str) == Some(key))
            .map(|(name, _)| name.clone())
    }

    /// Rename coordinates, convert their units and fix their storage order.
    pub fn apply(&self, ds: &mut Dataset, units: &UnitSystem) {
        for (key, tr) in &self.coords {
            let Some(src) = self.find_source(ds, key) else {
                continue;
            };
            if src != tr.out_name {
                debug!("data model {}: renaming coordinate {src} -> {}", self.name, tr.out_name);
                ds.rename_coord(&src, &tr.out_name);
            }
            let Some(coord) = ds.coords.get_mut(&tr.out_name) else {
                continue;
            };
            if let (Some(target), Some(current)) = (tr.units.as_deref(), coord.units().map(str::to_string)) {
                if !units.same_unit(&current, target) {
                    match units.convert(&current, target, 1.0) {
                        Ok((factor, offset)) => {
                            if let CoordValues::Numeric(v) = &mut coord.values {
                                v.mapv_inplace(|x| x * factor + offset);
                            }
                            info!("data model {}: {} converted from {current} to {target}", self.name, tr.out_name);
                        }
                        Err(e) => warn!("data model {}: cannot convert {}: {e}", self.name, tr.out_name),
                    }
                }
                coord.attrs.insert("units".to_string(), JsonValue::from(target));
            }
            let dim = coord.dim.clone();
            let reverse = match (&coord.values, tr.stored_direction) {
                (CoordValues::Numeric(v), Some(dir)) if v.len() > 1 => {
                    let increasing = v[v.len() - 1] > v[0];
                    increasing != (dir == StoredDirection::Increasing)
                }
                _ => false,
            };
            if reverse {
                debug!("data model {}: reversing {dim}", self.name);
                ds.reverse_dim(&dim);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Coordinate, Field};
    use ndarray::ArrayD;

    const CDS: &str = r#"{
        "latitude": {"out_name": "lat", "stored_direction": "increasing"},
        "air_pressure": {"out_name": "plev", "units": "Pa"}
    }"#;

    #[test]
    fn renames_reverses_and_converts() {
        let mut ds = Dataset::new();
        ds.insert_coord("latitude", Coordinate::numeric("latitude", vec![10.0, 0.0, -10.0]));
        ds.insert_coord(
            "level",
            Coordinate::numeric("level", vec![1000.0, 500.0])
                .with_attr("standard_name", "air_pressure")
                .with_attr("units", "hPa"),
        );
        let data = ArrayD::from_shape_vec(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        ds.insert_field("t", Field::new(&["level", "latitude"], data).unwrap());

        let dm = DataModel::from_json_str("era52cf", CDS).unwrap();
        dm.apply(&mut ds, &UnitSystem::new());

        assert_eq!(ds.field("t").unwrap().dims, vec!["plev", "lat"]);
        assert_eq!(ds.coords["lat"].values, CoordValues::Numeric(vec![-10.0, 0.0, 10.0].into()));
        assert_eq!(ds.field("t").unwrap().data[[0, 0]], 3.0);
        match &ds.coords["plev"].values {
            CoordValues::Numeric(v) => assert!((v[0] - 100_000.0).abs() < 1e-6),
            CoordValues::Time(_) => panic!("numeric expected"),
        }
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DataModel::load(dir.path(), "ifs", "cf").unwrap().is_none());
    }
}
