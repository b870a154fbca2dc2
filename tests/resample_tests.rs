//! Time averaging and unit conversion tests

use approx::assert_abs_diff_eq;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use climnorm::calendar::CalendarUnit;
use climnorm::catalog::InMemoryCatalog;
use climnorm::dataset::{Dataset, Field};
use climnorm::errors::ClimNormError;
use climnorm::fixer::FixConfig;
use climnorm::reader::{Reader, ReaderOptions, Retrieved};
use climnorm::statistics::{resample, ResampleOptions, StatOperation};
use climnorm::streaming::StreamSpec;
use climnorm::units::UnitSystem;
use ndarray::ArrayD;

fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

/// Daily values equal to the day of year, from 2020-01-01 to 2020-03-10
fn daily() -> Dataset {
    let t0 = date(2020, 1, 1);
    let n = 31 + 29 + 10;
    let mut ds = Dataset::with_time((0..n).map(|i| t0 + TimeDelta::days(i as i64)).collect());
    let data = ArrayD::from_shape_vec(vec![n], (1..=n).map(|i| i as f64).collect()).unwrap();
    ds.insert_field("2t", Field::new(&["time"], data).unwrap().with_units("K"));
    ds
}

#[test]
fn test_monthly_mean_drops_incomplete_month() {
    let kept = resample(&daily(), "MS", ResampleOptions::default()).unwrap();
    assert_eq!(kept.time().unwrap(), &[date(2020, 1, 1), date(2020, 2, 1), date(2020, 3, 1)]);

    let opts = ResampleOptions {
        exclude_incomplete: true,
        ..ResampleOptions::default()
    };
    let complete = resample(&daily(), "MS", opts).unwrap();
    assert_eq!(complete.time().unwrap(), &[date(2020, 1, 1), date(2020, 2, 1)]);
    let means: Vec<f64> = complete.field("2t").unwrap().data.iter().copied().collect();
    assert_abs_diff_eq!(means[0], 16.0, epsilon = 1e-12);
    assert_abs_diff_eq!(means[1], 46.0, epsilon = 1e-12);
    assert_eq!(complete.field("2t").unwrap().attrs["cell_methods"], "time: mean");
}

#[test]
fn test_month_end_labels_and_statistics() {
    let opts = ResampleOptions {
        stat: StatOperation::Max,
        time_bounds: true,
        ..ResampleOptions::default()
    };
    let out = resample(&daily(), "M", opts).unwrap();
    assert_eq!(out.time().unwrap()[0], date(2020, 1, 31));
    assert_eq!(out.time().unwrap()[1], date(2020, 2, 29));
    assert_eq!(out.field("2t").unwrap().data[[1]], 60.0);
    assert_eq!(out.time_bnds.as_ref().unwrap()[2], [date(2020, 3, 1), date(2020, 3, 10)]);
}

#[test]
fn test_all_bins_incomplete_is_an_error() {
    let short = daily().isel_time(0..10);
    let opts = ResampleOptions {
        exclude_incomplete: true,
        ..ResampleOptions::default()
    };
    let err = resample(&short, "MS", opts).unwrap_err();
    assert!(matches!(err, ClimNormError::EmptyResample { .. }));
    assert!(matches!(
        resample(&short, "fortnightly", ResampleOptions::default()),
        Err(ClimNormError::InvalidFrequency(_))
    ));
}

#[test]
fn test_unit_conversions_round_trip() {
    let units = UnitSystem::new();
    let pairs = [
        ("K", "degC"),
        ("Pa", "hPa"),
        ("kg m-2 s-1", "mm day-1"),
        ("m s**-1", "km h-1"),
        ("J m**-2", "MJ m-2"),
    ];
    for (src, dst) in pairs {
        let (f1, o1) = units.convert(src, dst, 1.0).unwrap();
        let (f2, o2) = units.convert(dst, src, 1.0).unwrap();
        for x in [-40.0, 0.0, 1.5, 300.0] {
            let there = x * f1 + o1;
            let back = there * f2 + o2;
            assert_abs_diff_eq!(back, x, epsilon = 1e-9);
        }
    }
}

#[test]
fn test_streamed_timmean_per_chunk() {
    let fixes = FixConfig::from_yaml_str("fixer_name:\n  ifs-default:\n    vars:\n      2t: {source: 2t, units: degC}\n")
        .unwrap();
    let mut catalog = InMemoryCatalog::new();
    catalog.insert("IFS", "hist", "daily", daily(), None, None);
    let options = ReaderOptions::new("IFS", "hist", "daily").streaming(StreamSpec::calendar(1, CalendarUnit::Month));
    let mut reader = Reader::new(&catalog, &fixes, options).unwrap();

    let vars = vec!["2t".to_string()];
    let averaged = reader
        .retrieve(Some(&vars))
        .unwrap()
        .timmean("MS", ResampleOptions::default())
        .unwrap();
    assert!(matches!(averaged, Retrieved::Stream(_)));
    let out = averaged.into_dataset().unwrap();
    assert_eq!(out.time_len(), 3);
    let jan = out.field("2t").unwrap().data[[0]];
    assert_abs_diff_eq!(jan, 16.0 - 273.15, epsilon = 1e-9);
    assert_eq!(out.field("2t").unwrap().units(), Some("degC"));
}

#[test]
fn test_streamed_timmean_skips_calendar_gaps() {
    let times = vec![date(2020, 1, 1), date(2020, 1, 2), date(2020, 3, 1), date(2020, 3, 2)];
    let mut ds = Dataset::with_time(times);
    let data = ArrayD::from_shape_vec(vec![4], vec![1.0, 3.0, 5.0, 7.0]).unwrap();
    ds.insert_field("2t", Field::new(&["time"], data).unwrap().with_units("K"));
    let fixes = FixConfig::from_yaml_str("fixer_name:\n  ifs-default:\n    vars:\n      2t: {source: 2t}\n").unwrap();
    let mut catalog = InMemoryCatalog::new();
    catalog.insert("IFS", "hist", "daily", ds, None, None);

    let single = Reader::new(&catalog, &fixes, ReaderOptions::new("IFS", "hist", "daily"))
        .unwrap()
        .retrieve(None)
        .unwrap()
        .timmean("MS", ResampleOptions::default())
        .unwrap()
        .into_dataset()
        .unwrap();

    let options = ReaderOptions::new("IFS", "hist", "daily").streaming(StreamSpec::calendar(1, CalendarUnit::Month));
    let mut reader = Reader::new(&catalog, &fixes, options).unwrap();
    let streamed = reader
        .retrieve(None)
        .unwrap()
        .timmean("MS", ResampleOptions::default())
        .unwrap()
        .into_dataset()
        .unwrap();

    assert_eq!(streamed.time().unwrap(), &[date(2020, 1, 1), date(2020, 3, 1)]);
    let means: Vec<f64> = streamed.field("2t").unwrap().data.iter().copied().collect();
    assert_eq!(means, vec![2.0, 6.0]);
    // Single retrieval keeps the empty February bin
    assert_eq!(single.time_len(), 3);
}
