//! Unit string parser and dimensional algebra
//!
//! Accepts the spellings found in climate-model metadata: `kg m**-2 s**-1`,
//! `kg m-2 s-1`, `kg/m^2/s`, `hPa`, `degC`, `J m**-2`, `%`, `1`.

use crate::errors::{ClimNormError, Result};
use std::fmt;
use std::ops::{Div, Mul};

const BASE_NAMES: [&str; 5] = ["meter", "kilogram", "second", "kelvin", "mole"];

/// Exponents of length, mass, time, temperature and amount of substance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dimension(pub [i32; 5]);

impl Dimension {
    pub const DIMENSIONLESS: Self = Self([0; 5]);
    pub const LENGTH: Self = Self([1, 0, 0, 0, 0]);
    pub const MASS: Self = Self([0, 1, 0, 0, 0]);
    pub const TIME: Self = Self([0, 0, 1, 0, 0]);
    pub const TEMPERATURE: Self = Self([0, 0, 0, 1, 0]);
    pub const AMOUNT: Self = Self([0, 0, 0, 0, 1]);

    #[must_use]
    pub fn powi(self, e: i32) -> Self {
        Self(self.0.map(|x| x * e))
    }

    pub fn is_dimensionless(self) -> bool {
        self == Self::DIMENSIONLESS
    }
}

impl Mul for Dimension {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        let mut out = self.0;
        for (o, r) in out.iter_mut().zip(rhs.0) {
            *o += r;
        }
        Self(out)
    }
}

impl Div for Dimension {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        self * rhs.powi(-1)
    }
}

impl fmt::Display for Dimension {
    /// Pint-like rendering, e.g. `meter ** 3 / kilogram`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |positive: bool| -> Vec<String> {
            BASE_NAMES
                .iter()
                .zip(self.0)
                .filter(|(_, e)| if positive { *e > 0 } else { *e < 0 })
                .map(|(name, e)| match e.abs() {
                    1 => (*name).to_string(),
                    n => format!("{name} ** {n}"),
                })
                .collect()
        };
        let num = render(true);
        let den = render(false);
        match (num.is_empty(), den.is_empty()) {
            (true, true) => f.write_str("dimensionless"),
            (false, true) => f.write_str(&num.join(" * ")),
            (true, false) => write!(f, "1 / {}", den.join(" / ")),
            (false, false) => write!(f, "{} / {}", num.join(" * "), den.join(" / ")),
        }
    }
}

/// A parsed unit: `value_in_base = value * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub scale: f64,
    pub offset: f64,
    pub dim: Dimension,
}

impl Quantity {
    const ONE: Self = Self {
        scale: 1.0,
        offset: 0.0,
        dim: Dimension::DIMENSIONLESS,
    };

    const fn unit(scale: f64, dim: Dimension) -> Self {
        Self {
            scale,
            offset: 0.0,
            dim,
        }
    }

    fn powi(self, e: i32) -> Self {
        Self::unit(self.scale.powi(e), self.dim.powi(e))
    }

    fn mul(self, rhs: Self) -> Self {
        Self::unit(self.scale * rhs.scale, self.dim * rhs.dim)
    }
}

fn derived(l: i32, m: i32, t: i32) -> Dimension {
    Dimension([l, m, t, 0, 0])
}

/// Symbols that may carry an SI prefix
fn prefixable(symbol: &str) -> Option<Quantity> {
    let q = match symbol {
        "m" => Quantity::unit(1.0, Dimension::LENGTH),
        "g" => Quantity::unit(1e-3, Dimension::MASS),
        "s" => Quantity::unit(1.0, Dimension::TIME),
        "Pa" => Quantity::unit(1.0, derived(-1, 1, -2)),
        "bar" => Quantity::unit(1e5, derived(-1, 1, -2)),
        "N" => Quantity::unit(1.0, derived(1, 1, -2)),
        "J" => Quantity::unit(1.0, derived(2, 1, -2)),
        "W" => Quantity::unit(1.0, derived(2, 1, -3)),
        "l" | "L" => Quantity::unit(1e-3, derived(3, 0, 0)),
        "mol" => Quantity::unit(1.0, Dimension::AMOUNT),
        _ => return None,
    };
    Some(q)
}

/// Symbols matched as a whole before prefixes are tried
fn named(symbol: &str) -> Option<Quantity> {
    let q = match symbol {
        "K" | "kelvin" => Quantity::unit(1.0, Dimension::TEMPERATURE),
        "degC" | "°C" | "celsius" | "degree_Celsius" => Quantity {
            scale: 1.0,
            offset: 273.15,
            dim: Dimension::TEMPERATURE,
        },
        "degF" | "°F" | "fahrenheit" => Quantity {
            scale: 5.0 / 9.0,
            offset: 459.67 * 5.0 / 9.0,
            dim: Dimension::TEMPERATURE,
        },
        "min" | "minute" | "minutes" => Quantity::unit(60.0, Dimension::TIME),
        "h" | "hr" | "hour" | "hours" => Quantity::unit(3600.0, Dimension::TIME),
        "d" | "day" | "days" => Quantity::unit(86400.0, Dimension::TIME),
        "meter" | "meters" | "metre" | "metres" => Quantity::unit(1.0, Dimension::LENGTH),
        "second" | "seconds" | "sec" => Quantity::unit(1.0, Dimension::TIME),
        "kilogram" | "kilograms" => Quantity::unit(1.0, Dimension::MASS),
        "%" | "percent" => Quantity::unit(0.01, Dimension::DIMENSIONLESS),
        "deg" | "degree" | "degrees" | "degrees_north" | "degrees_east" | "degree_north"
        | "degree_east" | "degrees_N" | "degrees_E" => {
            Quantity::unit(std::f64::consts::PI / 180.0, Dimension::DIMENSIONLESS)
        }
        "rad" | "radian" | "radians" => Quantity::ONE,
        "dimensionless" => Quantity::ONE,
        _ => return None,
    };
    Some(q)
}

fn prefix_scale(prefix: &str) -> Option<f64> {
    let scale = match prefix {
        "G" => 1e9,
        "M" => 1e6,
        "k" => 1e3,
        "h" => 1e2,
        "da" => 1e1,
        "d" => 1e-1,
        "c" => 1e-2,
        "m" => 1e-3,
        "u" | "µ" | "μ" => 1e-6,
        "n" => 1e-9,
        _ => return None,
    };
    Some(scale)
}

fn symbol(sym: &str, full: &str) -> Result<Quantity> {
    if let Ok(v) = sym.parse::<f64>() {
        return Ok(Quantity::unit(v, Dimension::DIMENSIONLESS));
    }
    if let Some(q) = named(sym).or_else(|| prefixable(sym)) {
        return Ok(q);
    }
    for (idx, _) in sym.char_indices().skip(1) {
        let (pre, rest) = sym.split_at(idx);
        if let (Some(scale), Some(q)) = (prefix_scale(pre), prefixable(rest)) {
            return Ok(Quantity::unit(q.scale * scale, q.dim));
        }
    }
    Err(ClimNormError::Unit {
        unit: full.to_string(),
        message: format!("unknown symbol '{sym}'"),
    })
}

/// Split `m^-2`, `m-2`, `s2` into symbol and exponent
fn split_exponent(term: &str) -> (&str, i32) {
    if term.parse::<f64>().is_ok() {
        return (term, 1);
    }
    let bytes = term.as_bytes();
    let mut start = bytes.len();
    while start > 0 && bytes[start - 1].is_ascii_digit() {
        start -= 1;
    }
    if start == bytes.len() || start == 0 {
        return (term, 1);
    }
    if bytes[start - 1] == b'-' || bytes[start - 1] == b'+' {
        start -= 1;
    }
    let mut sym_end = start;
    if sym_end > 0 && bytes[sym_end - 1] == b'^' {
        sym_end -= 1;
    }
    if sym_end == 0 {
        return (term, 1);
    }
    match term[start..].parse::<i32>() {
        Ok(e) => (&term[..sym_end], e),
        Err(_) => (term, 1),
    }
}

/// Parse a unit expression into scale, offset and dimension.
///
/// Offset units (`degC`, `degF`) keep their offset only when they appear
/// alone with exponent one; inside a compound they act as temperature
/// differences.
pub fn parse_unit(unit: &str) -> Result<Quantity> {
    let text = unit.trim();
    if text.is_empty() {
        return Ok(Quantity::ONE);
    }
    if text.contains('(') || text.contains(')') {
        return Err(ClimNormError::Unit {
            unit: unit.to_string(),
            message: "parentheses are not supported".to_string(),
        });
    }
    let spaced = text.replace("**", "^").replace('/', " / ").replace(['*', '·'], " ");
    let mut terms = Vec::new();
    let mut invert_next = false;
    for token in spaced.split_whitespace() {
        if token == "/" {
            invert_next = true;
            continue;
        }
        let (sym, exp) = split_exponent(token);
        let q = symbol(sym, unit)?;
        let exp = if invert_next { -exp } else { exp };
        invert_next = false;
        terms.push((q, exp));
    }
    if invert_next {
        return Err(ClimNormError::Unit {
            unit: unit.to_string(),
            message: "dangling '/'".to_string(),
        });
    }
    if let [(q, 1)] = terms.as_slice() {
        return Ok(*q);
    }
    Ok(terms
        .into_iter()
        .fold(Quantity::ONE, |acc, (q, e)| acc.mul(q.powi(e))))
}
