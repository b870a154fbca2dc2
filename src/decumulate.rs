//! Decumulation of accumulated fields
//!
//! Models often store fluxes as running totals since the start of the run or
//! of the current calendar period. [`decumulate`] turns them back into
//! per-step increments. [`Decumulator`] adds the carry-over memory needed to
//! continue exactly across streaming chunk boundaries.

use crate::calendar::CalendarUnit;
use crate::dataset::Field;
use crate::errors::{ClimNormError, Result};
use crate::fixer::rules::NanFirstWindow;
use chrono::{Datelike, NaiveDateTime, TimeDelta};
use log::{debug, warn};
use ndarray::{ArrayD, Axis, ErrorKind, ShapeError, Slice};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Last raw timestep of a variable from the previous chunk
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    pub time: NaiveDateTime,
    /// Field values at `time`, without the time axis
    pub values: ArrayD<f64>,
}

/// Step between consecutive samples, from the data or from the remembered step
fn time_step(time: &[NaiveDateTime], memory: Option<&MemoryEntry>) -> Option<TimeDelta> {
    match (time, memory) {
        ([t0, t1, ..], _) => Some(*t1 - *t0),
        ([t0], Some(m)) => Some(*t0 - m.time),
        _ => None,
    }
}

/// True where the accumulation counter reset just before `t`.
///
/// The comparison is between `t - dt` and `t - 2 dt` rather than `t` and
/// `t - dt`: the value stamped at a period boundary still closes the old
/// period, and the first increment of the new period is the step after it.
fn reset_before(t: NaiveDateTime, dt: TimeDelta, unit: CalendarUnit) -> bool {
    let one = t.checked_sub_signed(dt);
    let two = dt.checked_mul(2).and_then(|d| t.checked_sub_signed(d));
    match (one, two) {
        (Some(a), Some(b)) => unit.period_key(a) != unit.period_key(b),
        _ => false,
    }
}

/// Convert a running total into per-step increments along time.
///
/// The first output step is `first - memory` when `memory` is given, the raw
/// first value when `keep_first` is set, and zero otherwise. With `jump`, steps
/// right after a reset of the counter keep their raw value. Already
/// decumulated fields are returned unchanged.
pub fn decumulate(
    field: &Field,
    time: &[NaiveDateTime],
    jump: Option<CalendarUnit>,
    keep_first: bool,
    memory: Option<&MemoryEntry>,
) -> Result<Field> {
    if field.is_decumulated() {
        debug!("field already decumulated, skipping");
        return Ok(field.clone());
    }
    let ax = Axis(field.time_axis().ok_or(ClimNormError::NoTimeDimension)?);
    let n = field.data.len_of(ax);
    if n != time.len() {
        return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
    }
    let data = &field.data;
    let mut out = data.clone();
    if n > 1 {
        let diff = &data.slice_axis(ax, Slice::from(1..n)) - &data.slice_axis(ax, Slice::from(0..n - 1));
        out.slice_axis_mut(ax, Slice::from(1..n)).assign(&diff);
    }
    if n > 0 {
        let mut first = out.index_axis_mut(ax, 0);
        match memory {
            Some(m) => {
                if m.values.shape() != first.shape() {
                    return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
                }
                first -= &m.values;
            }
            None if keep_first => {}
            None => first.fill(0.0),
        }
    }

    if let (Some(unit), Some(dt)) = (jump, time_step(time, memory)) {
        for (i, t) in time.iter().enumerate() {
            if reset_before(*t, dt, unit) {
                debug!("accumulation reset at {t}, keeping raw value");
                out.index_axis_mut(ax, i).assign(&data.index_axis(ax, i));
            }
        }
    }

    let mut result = field.with_data(out);
    result
        .attrs
        .insert("decumulated".to_string(), JsonValue::from(1));
    Ok(result)
}

/// Mask with NaN the first step of every month inside `window`.
///
/// `previous` is the timestep preceding `time[0]` when known (streaming);
/// otherwise the first step is judged against `time[0] - dt`.
pub fn nanfirst(
    field: &mut Field,
    time: &[NaiveDateTime],
    window: &NanFirstWindow,
    previous: Option<NaiveDateTime>,
) -> Result<()> {
    let ax = Axis(field.time_axis().ok_or(ClimNormError::NoTimeDimension)?);
    let fallback = match time {
        [t0, t1, ..] => t0.checked_sub_signed(*t1 - *t0),
        _ => None,
    };
    let mut prev = previous.or(fallback);
    for (i, t) in time.iter().enumerate() {
        let new_month = prev.is_some_and(|p| (p.year(), p.month()) != (t.year(), t.month()));
        if new_month && window.contains(*t) {
            debug!("masking first step of month at {t}");
            field.data.index_axis_mut(ax, i).fill(f64::NAN);
        }
        prev = Some(*t);
    }
    Ok(())
}

/// Decumulation with memory across consecutive chunks
///
/// Chunks of a variable must arrive strictly in time order. A chunk that does
/// not start after the remembered step is rejected with
/// [`ClimNormError::OutOfOrderChunk`].
#[derive(Debug, Clone, Default)]
pub struct Decumulator {
    memory: HashMap<String, MemoryEntry>,
    /// Last timestep of the previous chunk, whatever its variables
    last_step: Option<NaiveDateTime>,
}

impl Decumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decumulate one chunk of variable `name`, then remember its last raw step.
    pub fn decumulate_chunk(
        &mut self,
        name: &str,
        field: &Field,
        time: &[NaiveDateTime],
        jump: Option<CalendarUnit>,
        keep_first: bool,
    ) -> Result<Field> {
        let remembered = self.memory.get(name);
        if let (Some(m), Some(first)) = (remembered, time.first()) {
            if *first <= m.time {
                return Err(ClimNormError::OutOfOrderChunk {
                    var: name.to_string(),
                    first: *first,
                    remembered: m.time,
                });
            }
        }
        let out = decumulate(field, time, jump, keep_first, remembered)?;
        if field.is_decumulated() {
            warn!("{name}: chunk already decumulated, memory not updated");
            return Ok(out);
        }
        if let (Some(&last), Some(ax)) = (time.last(), field.time_axis()) {
            let values = field.data.index_axis(Axis(ax), time.len() - 1).to_owned();
            self.memory.insert(name.to_string(), MemoryEntry { time: last, values });
        }
        Ok(out)
    }

    /// Timestamp of the last step seen for `name`
    pub fn previous_time(&self, name: &str) -> Option<NaiveDateTime> {
        self.memory.get(name).map(|m| m.time)
    }

    /// Last timestep of the most recent chunk
    pub fn last_step(&self) -> Option<NaiveDateTime> {
        self.last_step
    }

    /// Record the last timestep of a processed chunk.
    pub fn mark_step(&mut self, t: NaiveDateTime) {
        self.last_step = Some(t);
    }

    pub fn memory(&self) -> &HashMap<String, MemoryEntry> {
        &self.memory
    }

    pub fn reset(&mut self) {
        self.memory.clear();
        self.last_step = None;
    }
}
