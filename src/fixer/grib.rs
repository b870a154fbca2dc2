//! GRIB parameter lookup
//!
//! Fix rules may name their source by GRIB paramId. The lookup translates the
//! code to the short name under which the variable appears in a decoded
//! dataset, and provides the parameter's descriptive attributes.

use crate::dataset::Attributes;
use serde_json::Value as JsonValue;

/// Descriptive record for one GRIB parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GribParam {
    pub param_id: u32,
    pub short_name: String,
    pub long_name: String,
    pub units: String,
}

impl GribParam {
    /// Attributes to merge onto a field. `units` is included; callers that
    /// defer unit handling remove it.
    pub fn attributes(&self) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("paramId".to_string(), JsonValue::from(self.param_id));
        attrs.insert("shortName".to_string(), JsonValue::from(self.short_name.as_str()));
        attrs.insert("long_name".to_string(), JsonValue::from(self.long_name.as_str()));
        attrs.insert("units".to_string(), JsonValue::from(self.units.as_str()));
        attrs
    }
}

/// Parameter-table lookup service
pub trait GribLookup: Send + Sync {
    fn by_param_id(&self, code: u32) -> Option<GribParam>;

    fn by_short_name(&self, name: &str) -> Option<GribParam>;

    /// Look up by numeric code or by short name
    fn lookup(&self, key: &str) -> Option<GribParam> {
        match key.parse::<u32>() {
            Ok(code) => self.by_param_id(code),
            Err(_) => self.by_short_name(key),
        }
    }
}

/// Built-in subset of the ECMWF parameter table
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticGribTable;

const ECMWF_PARAMS: &[(u32, &str, &str, &str)] = &[
    (31, "ci", "Sea ice area fraction", "(0 - 1)"),
    (34, "sst", "Sea surface temperature", "K"),
    (129, "z", "Geopotential", "m**2 s**-2"),
    (130, "t", "Temperature", "K"),
    (131, "u", "U component of wind", "m s**-1"),
    (132, "v", "V component of wind", "m s**-1"),
    (133, "q", "Specific humidity", "kg kg**-1"),
    (134, "sp", "Surface pressure", "Pa"),
    (135, "w", "Vertical velocity", "Pa s**-1"),
    (141, "sd", "Snow depth", "m of water equivalent"),
    (144, "sf", "Snowfall", "m of water equivalent"),
    (146, "sshf", "Surface sensible heat flux", "J m**-2"),
    (147, "slhf", "Surface latent heat flux", "J m**-2"),
    (151, "msl", "Mean sea level pressure", "Pa"),
    (157, "r", "Relative humidity", "%"),
    (164, "tcc", "Total cloud cover", "(0 - 1)"),
    (165, "10u", "10 metre U wind component", "m s**-1"),
    (166, "10v", "10 metre V wind component", "m s**-1"),
    (167, "2t", "2 metre temperature", "K"),
    (168, "2d", "2 metre dewpoint temperature", "K"),
    (169, "ssrd", "Surface short-wave (solar) radiation downwards", "J m**-2"),
    (172, "lsm", "Land-sea mask", "(0 - 1)"),
    (175, "strd", "Surface long-wave (thermal) radiation downwards", "J m**-2"),
    (176, "ssr", "Surface net short-wave (solar) radiation", "J m**-2"),
    (177, "str", "Surface net long-wave (thermal) radiation", "J m**-2"),
    (182, "e", "Evaporation", "m of water equivalent"),
    (228, "tp", "Total precipitation", "m"),
    (235, "skt", "Skin temperature", "K"),
    (260048, "tprate", "Total precipitation rate", "kg m**-2 s**-1"),
];

fn to_param(entry: &(u32, &str, &str, &str)) -> GribParam {
    GribParam {
        param_id: entry.0,
        short_name: entry.1.to_string(),
        long_name: entry.2.to_string(),
        units: entry.3.to_string(),
    }
}

impl GribLookup for StaticGribTable {
    fn by_param_id(&self, code: u32) -> Option<GribParam> {
        ECMWF_PARAMS.iter().find(|p| p.0 == code).map(to_param)
    }

    fn by_short_name(&self, name: &str) -> Option<GribParam> {
        ECMWF_PARAMS.iter().find(|p| p.1 == name).map(to_param)
    }
}
