//! Resumable time-chunked access to a dataset
//!
//! [`StreamingCursor::stream`] hands out consecutive time slices of a dataset,
//! one per call, either a fixed number of steps or a calendar interval at a
//! time. [`generator`] produces the same slices as an iterator with its own,
//! independent position.

use crate::calendar::{advance, CalendarUnit};
use crate::dataset::Dataset;
use crate::errors::{ClimNormError, Result};
use chrono::NaiveDateTime;
use log::debug;

/// How the stream step is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamUnit {
    /// A fixed number of timesteps
    #[default]
    Steps,
    /// A calendar interval, e.g. `step` months
    Calendar(CalendarUnit),
}

impl StreamUnit {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "steps" | "step" => Ok(Self::Steps),
            other => CalendarUnit::parse(other).map(Self::Calendar),
        }
    }
}

/// Chunking parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub step: usize,
    pub unit: StreamUnit,
    /// First timestamp to deliver; defaults to the first timestamp of the data
    pub startdate: Option<NaiveDateTime>,
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self {
            step: 1,
            unit: StreamUnit::Steps,
            startdate: None,
        }
    }
}

impl StreamSpec {
    pub fn steps(step: usize) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    pub fn calendar(step: usize, unit: CalendarUnit) -> Self {
        Self {
            step,
            unit: StreamUnit::Calendar(unit),
            startdate: None,
        }
    }

    #[must_use]
    pub fn starting_at(mut self, startdate: NaiveDateTime) -> Self {
        self.startdate = Some(startdate);
        self
    }
}

/// Position of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorState {
    #[default]
    Fresh,
    /// Next step index to deliver (step mode)
    AtIndex(usize),
    /// Start of the next interval to deliver (calendar mode)
    AtDate(NaiveDateTime),
}

/// Stateful cursor over the time axis of a dataset
#[derive(Debug, Clone, Default)]
pub struct StreamingCursor {
    state: CursorState,
}

impl StreamingCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = CursorState::Fresh;
    }

    /// Return the next chunk and advance, or `None` once the data is exhausted.
    ///
    /// Calendar chunks cover the half-open interval `[current, current + step)`;
    /// a chunk may be empty when the data has a gap longer than the interval.
    pub fn stream(&mut self, data: &Dataset, spec: &StreamSpec) -> Result<Option<Dataset>> {
        if spec.step == 0 {
            return Err(ClimNormError::Config("stream step must be positive".to_string()));
        }
        let times = data.time().ok_or(ClimNormError::NoTimeDimension)?;
        match spec.unit {
            StreamUnit::Steps => {
                let start = match self.state {
                    CursorState::Fresh => spec
                        .startdate
                        .map_or(0, |d| times.partition_point(|t| *t < d)),
                    CursorState::AtIndex(i) => i,
                    CursorState::AtDate(_) => return Err(mode_mismatch()),
                };
                if start >= times.len() {
                    self.state = CursorState::AtIndex(start);
                    return Ok(None);
                }
                let stop = (start + spec.step).min(times.len());
                debug!("streaming steps [{start}, {stop})");
                self.state = CursorState::AtIndex(stop);
                Ok(Some(data.isel_time(start..stop)))
            }
            StreamUnit::Calendar(unit) => {
                let (Some(&first), Some(&last)) = (times.first(), times.last()) else {
                    return Ok(None);
                };
                let current = match self.state {
                    CursorState::Fresh => spec.startdate.unwrap_or(first),
                    CursorState::AtDate(d) => d,
                    CursorState::AtIndex(_) => return Err(mode_mismatch()),
                };
                if current > last {
                    self.state = CursorState::AtDate(current);
                    return Ok(None);
                }
                let step = i64::try_from(spec.step)
                    .map_err(|_| ClimNormError::Config(format!("stream step {} too large", spec.step)))?;
                let stop = advance(current, step, unit).ok_or_else(|| {
                    ClimNormError::Config(format!("cannot advance {current} by {step} {unit}"))
                })?;
                let indices: Vec<usize> = times
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| **t >= current && **t < stop)
                    .map(|(i, _)| i)
                    .collect();
                debug!("streaming [{current}, {stop}): {} steps", indices.len());
                self.state = CursorState::AtDate(stop);
                Ok(Some(data.select_time(&indices)))
            }
        }
    }
}

fn mode_mismatch() -> ClimNormError {
    ClimNormError::Config("stream unit changed mid-stream; call reset() first".to_string())
}

/// Finite, non-restartable iterator over the chunks of an owned dataset
#[derive(Debug)]
pub struct ChunkGenerator {
    data: Dataset,
    spec: StreamSpec,
    cursor: StreamingCursor,
    done: bool,
}

impl ChunkGenerator {
    pub fn new(data: Dataset, spec: StreamSpec) -> Self {
        Self {
            data,
            spec,
            cursor: StreamingCursor::new(),
            done: false,
        }
    }
}

impl Iterator for ChunkGenerator {
    type Item = Result<Dataset>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cursor.stream(&self.data, &self.spec) {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Lazily slice `data` into chunks.
pub fn generator(data: Dataset, spec: StreamSpec) -> ChunkGenerator {
    ChunkGenerator::new(data, spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeDelta};

    fn days(n: usize) -> Dataset {
        let t0 = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        Dataset::with_time((0..n).map(|i| t0 + TimeDelta::days(i as i64)).collect())
    }

    #[test]
    fn calendar_chunks_exclude_boundary() {
        let ds = days(60);
        let mut cursor = StreamingCursor::new();
        let spec = StreamSpec::calendar(1, CalendarUnit::Month);
        let jan = cursor.stream(&ds, &spec).unwrap().unwrap();
        assert_eq!(jan.time_len(), 31);
        let feb = cursor.stream(&ds, &spec).unwrap().unwrap();
        assert_eq!(feb.time_len(), 29);
        assert!(cursor.stream(&ds, &spec).unwrap().is_none());
    }

    #[test]
    fn startdate_and_reset() {
        let ds = days(10);
        let start = ds.time().unwrap()[4];
        let spec = StreamSpec::steps(3).starting_at(start);
        let mut cursor = StreamingCursor::new();
        let first = cursor.stream(&ds, &spec).unwrap().unwrap();
        assert_eq!(first.time().unwrap()[0], start);
        cursor.reset();
        assert_eq!(cursor.state(), CursorState::Fresh);
        let again = cursor.stream(&ds, &spec).unwrap().unwrap();
        assert_eq!(again.time(), first.time());
    }

    #[test]
    fn generator_is_independent() {
        let ds = days(10);
        let spec = StreamSpec::steps(4);
        let mut cursor = StreamingCursor::new();
        cursor.stream(&ds, &spec).unwrap();
        let lens: Vec<usize> = generator(ds.clone(), spec).map(|c| c.unwrap().time_len()).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert_eq!(cursor.state(), CursorState::AtIndex(4));
    }

    #[test]
    fn invalid_use() {
        let ds = days(3);
        let mut cursor = StreamingCursor::new();
        assert!(cursor.stream(&ds, &StreamSpec::steps(0)).is_err());
        assert!(cursor.stream(&Dataset::new(), &StreamSpec::steps(1)).is_err());
        cursor.stream(&ds, &StreamSpec::steps(1)).unwrap();
        assert!(cursor
            .stream(&ds, &StreamSpec::calendar(1, CalendarUnit::Day))
            .is_err());
    }
}
