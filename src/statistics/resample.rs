//! Frequency-based time averaging
//!
//! Timesteps are grouped into bins of a [`Frequency`] aligned on the first
//! timestamp of the data, every field with a time axis is reduced over each
//! bin, and the bins are stacked back along time.

use super::operations::{StatOperation, StatisticalReduction};
use crate::calendar::{advance, days_in_month, month_index, CalendarUnit, Frequency};
use crate::dataset::{Coordinate, Dataset, Field, TIME};
use crate::errors::{ClimNormError, Result};
use chrono::{Datelike, NaiveDateTime, TimeDelta};
use log::{debug, info, warn};
use ndarray::{ArrayD, Axis};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Options for [`resample`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResampleOptions {
    /// Drop bins backed by fewer input steps than the frequency implies
    pub exclude_incomplete: bool,
    /// Attach `time_bnds` with the first and last input step of each bin
    pub time_bounds: bool,
    /// Stamp each output step at the middle of its bin
    pub center_time: bool,
    pub stat: StatOperation,
}

/// One output step under construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResampleBin {
    pub start: NaiveDateTime,
    /// Start of the following bin
    pub end: NaiveDateTime,
    /// Indices of the contributing input steps
    pub members: Vec<usize>,
}

impl ResampleBin {
    pub fn count(&self) -> usize {
        self.members.len()
    }
}

/// Sampling interval of the input, as far as it can be told from the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputStep {
    Fixed(TimeDelta),
    Monthly,
    Yearly,
}

fn infer_step(times: &[NaiveDateTime]) -> Option<InputStep> {
    let step = times
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > TimeDelta::zero())
        .min()?;
    let whole_days = step.num_seconds() % 86_400 == 0;
    Some(match step.num_days() {
        28..=31 if whole_days => InputStep::Monthly,
        365..=366 if whole_days => InputStep::Yearly,
        _ => InputStep::Fixed(step),
    })
}

/// Number of input steps a complete bin holds
fn expected_count(bin: &ResampleBin, freq: &Frequency, step: InputStep) -> usize {
    let months = month_index(bin.end) - month_index(bin.start);
    let n = match step {
        InputStep::Fixed(d) => (bin.end - bin.start).num_seconds() / d.num_seconds().max(1),
        InputStep::Monthly if freq.unit.is_calendar() => months,
        InputStep::Yearly if freq.unit.is_calendar() => months / 12,
        InputStep::Monthly | InputStep::Yearly => 1,
    };
    usize::try_from(n).unwrap_or(0).max(1)
}

/// Group timesteps into consecutive bins, including empty bins inside the range.
pub fn build_bins(times: &[NaiveDateTime], freq: &Frequency) -> Result<Vec<ResampleBin>> {
    let Some(&origin) = times.first() else {
        return Ok(Vec::new());
    };
    let null = || ClimNormError::NullTimestamp {
        freq: freq.as_str().to_string(),
    };
    let mut groups: BTreeMap<NaiveDateTime, Vec<usize>> = BTreeMap::new();
    for (i, t) in times.iter().enumerate() {
        let start = freq.bin_start(*t, origin).ok_or_else(null)?;
        groups.entry(start).or_default().push(i);
    }
    let (Some(&first), Some(&last)) = (groups.keys().next(), groups.keys().next_back()) else {
        return Ok(Vec::new());
    };
    let mut bins = Vec::new();
    let mut start = first;
    while start <= last {
        let end = freq.next_bin(start).ok_or_else(null)?;
        bins.push(ResampleBin {
            start,
            end,
            members: groups.remove(&start).unwrap_or_default(),
        });
        start = end;
    }
    Ok(bins)
}

/// Midpoint label for a bin starting at `start`
fn centered(start: NaiveDateTime, freq: &Frequency) -> Option<NaiveDateTime> {
    match freq.unit {
        CalendarUnit::Month | CalendarUnit::Year => {
            let months = i64::from(freq.count) * if freq.unit == CalendarUnit::Year { 12 } else { 1 };
            let shifted = advance(start, months / 2, CalendarUnit::Month)?;
            if months % 2 == 0 {
                return Some(shifted);
            }
            let days = days_in_month(shifted.year(), shifted.month())?;
            shifted.checked_add_signed(TimeDelta::try_hours(i64::from(days) * 12)?)
        }
        unit => {
            let width = unit.fixed_duration(i64::from(freq.count))?;
            start.checked_add_signed(width / 2)
        }
    }
}

/// Resample `data` to `freq`, reducing every time-dependent field with `opts.stat`.
///
/// # Errors
///
/// - [`ClimNormError::NoTimeDimension`] if `data` has no time coordinate
/// - [`ClimNormError::EmptyResample`] if no output step remains
/// - [`ClimNormError::NullTimestamp`] / [`ClimNormError::NullTimeBounds`] if an
///   output timestamp or bound cannot be represented
pub fn resample(data: &Dataset, freq: &str, opts: ResampleOptions) -> Result<Dataset> {
    let freq = Frequency::parse(freq)?;
    let times = data.time().ok_or(ClimNormError::NoTimeDimension)?;
    let empty = || ClimNormError::EmptyResample {
        freq: freq.as_str().to_string(),
    };

    let mut bins = build_bins(times, &freq)?;
    if opts.exclude_incomplete {
        match infer_step(times) {
            Some(step) => {
                let before = bins.len();
                bins.retain(|b| b.count() >= expected_count(b, &freq, step));
                if bins.len() < before {
                    info!("dropped {} incomplete {} bins", before - bins.len(), freq);
                }
            }
            None => warn!("cannot infer the input time step, keeping all bins"),
        }
    }
    if bins.is_empty() {
        return Err(empty());
    }

    let labels = bins
        .iter()
        .map(|b| {
            let label = if opts.center_time {
                centered(b.start, &freq)
            } else {
                freq.label_for(b.start)
            };
            label.ok_or_else(|| ClimNormError::NullTimestamp {
                freq: freq.as_str().to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut out = Dataset {
        fields: BTreeMap::new(),
        coords: data.coords.clone(),
        attrs: data.attrs.clone(),
        time_bnds: None,
    };
    let time_attrs = data.coords.get(TIME).map(|c| c.attrs.clone()).unwrap_or_default();
    let mut time_coord = Coordinate::time(labels);
    time_coord.attrs = time_attrs;
    out.insert_coord(TIME, time_coord);

    for (name, field) in &data.fields {
        let Some(ax) = field.time_axis() else {
            out.insert_field(name, field.clone());
            continue;
        };
        let reduced = bins
            .iter()
            .map(|b| field.data.select(Axis(ax), &b.members).reduce_along_axis(ax, opts.stat))
            .collect::<Result<Vec<ArrayD<f64>>>>()?;
        let views: Vec<_> = reduced.iter().map(|a| a.view()).collect();
        let stacked = ndarray::stack(Axis(ax), &views)?;
        let mut f: Field = field.with_data(stacked);
        f.attrs.insert(
            "cell_methods".to_string(),
            JsonValue::from(format!("time: {}", opts.stat.as_str())),
        );
        out.insert_field(name, f);
    }

    if opts.time_bounds {
        let bnds = bins
            .iter()
            .enumerate()
            .map(|(index, b)| {
                let member_times = b.members.iter().map(|&i| times[i]);
                match (member_times.clone().min(), member_times.max()) {
                    (Some(lo), Some(hi)) => Ok([lo, hi]),
                    _ => Err(ClimNormError::NullTimeBounds { index }),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        out.time_bnds = Some(bnds);
    }

    debug!("resampled {} steps into {} {} bins", times.len(), out.time_len(), freq);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn hourly(n: usize) -> Dataset {
        let t0 = dt(2020, 1, 1, 0);
        let mut ds = Dataset::with_time((0..n).map(|i| t0 + TimeDelta::hours(i as i64)).collect());
        let data = ArrayD::from_shape_vec(vec![n], (0..n).map(|i| i as f64).collect()).unwrap();
        ds.insert_field("x", Field::new(&["time"], data).unwrap());
        ds
    }

    #[test]
    fn six_hourly_mean() {
        let out = resample(&hourly(12), "6h", ResampleOptions::default()).unwrap();
        assert_eq!(out.field("x").unwrap().data.as_slice().unwrap(), &[2.5, 8.5]);
        assert_eq!(out.time().unwrap(), &[dt(2020, 1, 1, 0), dt(2020, 1, 1, 6)]);
    }

    #[test]
    fn centering_and_bounds() {
        let opts = ResampleOptions {
            center_time: true,
            time_bounds: true,
            ..ResampleOptions::default()
        };
        let out = resample(&hourly(48), "D", opts).unwrap();
        assert_eq!(out.time().unwrap()[0], dt(2020, 1, 1, 12));
        assert_eq!(out.time_bnds.as_ref().unwrap()[1], [dt(2020, 1, 2, 0), dt(2020, 1, 2, 23)]);
    }

    #[test]
    fn monthly_centering_is_calendar_aware() {
        let f = Frequency::parse("MS").unwrap();
        assert_eq!(centered(dt(2021, 2, 1, 0), &f), Some(dt(2021, 2, 15, 0)));
        let f = Frequency::parse("YS").unwrap();
        assert_eq!(centered(dt(2021, 1, 1, 0), &f), Some(dt(2021, 7, 1, 0)));
    }

    #[test]
    fn missing_time() {
        let err = resample(&Dataset::new(), "D", ResampleOptions::default()).unwrap_err();
        assert!(matches!(err, ClimNormError::NoTimeDimension));
        let empty = Dataset::with_time(Vec::new());
        let err = resample(&empty, "D", ResampleOptions::default()).unwrap_err();
        assert!(matches!(err, ClimNormError::EmptyResample { .. }));
    }

    #[test]
    fn empty_bins_fail_bounds() {
        let mut ds = hourly(3);
        let mut times = ds.time().unwrap().to_vec();
        times[2] = dt(2020, 1, 3, 0);
        ds.insert_coord(TIME, Coordinate::time(times));
        let opts = ResampleOptions {
            time_bounds: true,
            ..ResampleOptions::default()
        };
        let err = resample(&ds, "D", opts).unwrap_err();
        assert!(matches!(err, ClimNormError::NullTimeBounds { index: 1 }));
    }
}
