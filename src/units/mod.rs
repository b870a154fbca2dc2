//! Physical-unit conversion with climate-specific heuristics
//!
//! [`UnitSystem::convert`] returns the `(factor, offset)` pair that turns values
//! expressed in a source unit into a target unit. When the two units are not
//! dimensionally compatible, the residual dimension is inspected for the usual
//! suspects in model output: a missing density of water (precipitation given
//! as a water column instead of a mass flux) and a missing accumulation time
//! (accumulated fields stored instead of rates).

pub mod parse;

pub use parse::{parse_unit, Dimension, Quantity};

use crate::errors::{ClimNormError, Result};
use log::{debug, error, info};
use std::collections::HashMap;

/// Density of liquid water, kg m-3
pub const WATER_DENSITY: f64 = 1000.0;

/// Non-standard unit spellings and their replacements
const UNIT_SYNONYMS: &[(&str, &str)] = &[
    ("PSU", "g/kg"),
    ("psu", "g/kg"),
    ("PSS-78", "g/kg"),
    ("pss-78", "g/kg"),
    ("(0 - 1)", "1"),
    ("0-1", "1"),
    ("fraction", "1"),
    ("Fraction", "1"),
    ("~", "1"),
    ("-", "1"),
    ("deg C", "degC"),
    ("degrees_C", "degC"),
    ("degrees C", "degC"),
    ("Celsius", "degC"),
    ("C", "degC"),
    ("m of water equivalent", "m"),
    ("W/m2", "W m-2"),
];

/// Substitute known non-standard unit spellings before parsing.
///
/// Whole-string synonyms are replaced first; salinity spellings are also
/// replaced when they appear as one term of a compound unit.
pub fn normalize_unit(unit: &str) -> String {
    let trimmed = unit.trim();
    if let Some((_, to)) = UNIT_SYNONYMS.iter().find(|(from, _)| *from == trimmed) {
        return (*to).to_string();
    }
    trimmed
        .split(' ')
        .map(|term| match term {
            "PSU" | "psu" | "PSS-78" | "pss-78" => "g/kg",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Unit conversion service
///
/// Holds the alias table used to resolve `{name}` placeholders in
/// configured target units. The table is read-only once built.
#[derive(Debug, Clone, Default)]
pub struct UnitSystem {
    aliases: HashMap<String, String>,
}

impl UnitSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aliases(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }

    /// Replace `{name}` tokens with entries from the alias table.
    ///
    /// Returns the name of the first token that could not be resolved.
    pub fn resolve_placeholders(&self, unit: &str) -> std::result::Result<String, String> {
        let mut out = String::with_capacity(unit.len());
        let mut rest = unit;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| after.to_string())?;
            let key = &after[..close];
            let value = self.aliases.get(key).ok_or_else(|| key.to_string())?;
            out.push_str(value);
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Compute `(factor, offset)` converting `src` values to `dst`.
    ///
    /// `accumulation_seconds` is the accumulation period of the source field,
    /// used when the residual dimension shows a missing time divisor. Exactly
    /// one of the returned pair is non-trivial: a non-zero offset comes with a
    /// factor of one. Callers apply the factor before the offset.
    ///
    /// # Errors
    ///
    /// Returns [`ClimNormError::Unit`] if either unit string cannot be parsed.
    /// Incommensurable units are not an error: the uncorrected factor is
    /// returned and the mismatch is logged.
    pub fn convert(&self, src: &str, dst: &str, accumulation_seconds: f64) -> Result<(f64, f64)> {
        let src_norm = normalize_unit(src);
        let dst_norm = normalize_unit(dst);
        let s = parse_unit(&src_norm)?;
        let d = parse_unit(&dst_norm)?;

        let mut factor = s.scale / d.scale;
        let residual = s.dim / d.dim;

        let offset = if residual.is_dimensionless() {
            (s.offset - d.offset) / d.scale
        } else {
            let density = Dimension([3, -1, 0, 0, 0]);
            let density_and_time = Dimension([3, -1, 1, 0, 0]);
            let inverse_density = Dimension([-3, 1, 0, 0, 0]);
            if accumulation_seconds <= 0.0 && (residual == Dimension::TIME || residual == density_and_time) {
                return Err(ClimNormError::Unit {
                    unit: src.to_string(),
                    message: format!("accumulation time must be positive, got {accumulation_seconds}"),
                });
            }
            if residual == density {
                info!("{src} -> {dst}: correcting by water density {} kg m-3", WATER_DENSITY);
                factor *= WATER_DENSITY;
            } else if residual == density_and_time {
                info!(
                    "{src} -> {dst}: correcting by water density and accumulation time {accumulation_seconds} s"
                );
                factor *= WATER_DENSITY / accumulation_seconds;
            } else if residual == Dimension::TIME {
                info!("{src} -> {dst}: dividing by accumulation time {accumulation_seconds} s");
                factor /= accumulation_seconds;
            } else if residual == inverse_density {
                info!("{src} -> {dst}: removing water density {} kg m-3", WATER_DENSITY);
                factor /= WATER_DENSITY;
            } else {
                error!("incommensurate units converting {src} to {dst}: residual {residual}");
            }
            0.0
        };

        let pair = if offset != 0.0 { (1.0, offset) } else { (factor, 0.0) };
        debug!("unit conversion {src} -> {dst}: factor {} offset {}", pair.0, pair.1);
        Ok(pair)
    }

    /// Whether two unit strings describe the same unit after normalization
    pub fn same_unit(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        match (parse_unit(&normalize_unit(a)), parse_unit(&normalize_unit(b))) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn kelvin_to_celsius_is_pure_offset() {
        let (f, o) = UnitSystem::new().convert("K", "degC", 1.0).unwrap();
        assert_eq!(f, 1.0);
        assert_abs_diff_eq!(o, -273.15, epsilon = 1e-12);
    }

    #[test]
    fn precipitation_flux_round_trip() {
        let us = UnitSystem::new();
        let (f1, o1) = us.convert("kg m**-2 s**-1", "m s**-1", 1.0).unwrap();
        let (f2, o2) = us.convert("m s**-1", "kg m**-2 s**-1", 1.0).unwrap();
        assert_eq!((o1, o2), (0.0, 0.0));
        assert_abs_diff_eq!(f1, 1e-3, epsilon = 1e-15);
        assert_abs_diff_eq!(f1 * f2, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn accumulated_water_column_to_flux() {
        let (f, _) = UnitSystem::new().convert("m", "kg m-2 s-1", 3600.0).unwrap();
        assert_abs_diff_eq!(f, 1000.0 / 3600.0, epsilon = 1e-12);
    }

    #[test]
    fn accumulated_energy_to_power() {
        let (f, _) = UnitSystem::new().convert("J m**-2", "W m**-2", 21600.0).unwrap();
        assert_abs_diff_eq!(f, 1.0 / 21600.0, epsilon = 1e-15);
    }

    #[test]
    fn incommensurate_is_passed_through() {
        let (f, o) = UnitSystem::new().convert("K", "m", 1.0).unwrap();
        assert_eq!((f, o), (1.0, 0.0));
    }

    #[test]
    fn pressure_prefix() {
        let (f, o) = UnitSystem::new().convert("Pa", "hPa", 1.0).unwrap();
        assert_abs_diff_eq!(f, 0.01, epsilon = 1e-15);
        assert_eq!(o, 0.0);
    }

    #[test]
    fn normalize_salinity() {
        assert_eq!(normalize_unit("psu"), "g/kg");
        assert_eq!(normalize_unit("PSU m s-1"), "g/kg m s-1");
        let (f, _) = UnitSystem::new().convert("PSU", "g kg-1", 1.0).unwrap();
        assert_abs_diff_eq!(f, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn placeholders() {
        let mut aliases = HashMap::new();
        aliases.insert("flux".to_string(), "kg m-2 s-1".to_string());
        let us = UnitSystem::with_aliases(aliases);
        assert_eq!(us.resolve_placeholders("{flux}").unwrap(), "kg m-2 s-1");
        assert_eq!(us.resolve_placeholders("{nope} m").unwrap_err(), "nope");
        assert_eq!(us.resolve_placeholders("K").unwrap(), "K");
    }
}
