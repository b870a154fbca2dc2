//! End-to-end tests for fix-rule resolution and variable normalization

use approx::assert_abs_diff_eq;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use climnorm::catalog::InMemoryCatalog;
use climnorm::dataset::{Coordinate, Dataset, Field};
use climnorm::errors::ClimNormError;
use climnorm::fixer::{merge, FixConfig, FixRuleResolver, MergeMethod, RuleBlock, VariableNormalizer};
use climnorm::reader::{Reader, ReaderOptions};
use ndarray::ArrayD;
use std::io::Write;
use tempfile::tempdir;

const FIXES: &str = r"
fixer_name:
  ifs-default:
    deltat: 3600
    vars:
      2t:
        source: 167
        units: degC
        grib: true
      tprate:
        source: 228
        units: '{flux}'
        decumulate: true
      msl:
        source: msl
        attributes: {long_name: Mean sea level pressure, units: ignored}
  ifs-derived:
    parent: ifs-default
    vars:
      tnr:
        derived: ssr+str
        units: W m-2
  ifs-loop:
    parent: ifs-default
    vars:
      loop:
        derived: tprate*2
models:
  IFS:
    hist:
      hourly:
        method: merge
        vars:
          2d: {source: 168}
        delete: [lsm]
defaults:
  units:
    flux: kg m-2 s-1
";

fn dt(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
}

fn hourly(n: usize) -> Vec<NaiveDateTime> {
    let t0 = dt(2020, 1, 1, 0);
    (0..n).map(|i| t0 + TimeDelta::hours(i as i64)).collect()
}

fn series(values: &[f64], units: &str) -> Field {
    let data = ArrayD::from_shape_vec(vec![values.len()], values.to_vec()).unwrap();
    Field::new(&["time"], data).unwrap().with_units(units)
}

/// Four hourly steps of raw IFS-like output
fn raw_dataset() -> Dataset {
    let mut ds = Dataset::with_time(hourly(4));
    ds.insert_field("2t", series(&[273.15, 283.15, 293.15, 300.0], "K"));
    ds.insert_field("tp", series(&[0.0, 0.001, 0.003, 0.006], "m"));
    ds.insert_field("msl", series(&[101_325.0; 4], "Pa"));
    ds.insert_field("2d", series(&[270.0; 4], "K"));
    ds.insert_field("ssr", series(&[100.0, 200.0, 300.0, 400.0], "W m-2"));
    ds.insert_field("str", series(&[-50.0, -60.0, -70.0, -80.0], "W m-2"));
    ds.insert_field("lsm", series(&[1.0; 4], "1"));
    ds
}

fn config() -> FixConfig {
    FixConfig::from_yaml_str(FIXES).expect("fixture parses")
}

fn reader(fixer_name: Option<&str>, apply_unit_fix: bool) -> Reader {
    let mut catalog = InMemoryCatalog::new();
    catalog.insert("IFS", "hist", "hourly", raw_dataset(), fixer_name, None);
    let options = ReaderOptions {
        apply_unit_fix,
        ..ReaderOptions::new("IFS", "hist", "hourly")
    };
    Reader::new(&catalog, &config(), options).expect("reader opens")
}

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_temperature_kelvin_to_celsius() {
    let r = reader(None, false);
    let ds = r.fixer(raw_dataset(), Some(&names(&["2t"]))).unwrap();

    let t = ds.field("2t").unwrap();
    let fix = t.unit_fix.as_ref().expect("pending unit fix");
    assert_eq!(fix.factor, 1.0);
    assert_abs_diff_eq!(fix.offset, -273.15, epsilon = 1e-12);
    assert_eq!(fix.target_unit, "degC");
    // Not applied yet
    assert_eq!(t.units(), Some("K"));
    assert_eq!(t.data[[0]], 273.15);

    let mut applied = t.clone();
    assert!(applied.apply_unit_fix());
    assert_eq!(applied.units(), Some("degC"));
    for (raw, fixed) in [273.15, 283.15, 293.15, 300.0].iter().zip(applied.data.iter()) {
        assert_abs_diff_eq!(*fixed, raw - 273.15, epsilon = 1e-9);
    }
    assert_eq!(applied.attrs["long_name"], "2 metre temperature");
    assert!(!applied.apply_unit_fix());
}

#[test]
fn test_normalization_is_idempotent() {
    let r = reader(None, true);
    let once = r.fixer(raw_dataset(), None).unwrap();
    let twice = r.fixer(once.clone(), None).unwrap();

    assert_eq!(once.variable_names(), twice.variable_names());
    for name in once.variable_names() {
        let (a, b) = (once.field(&name).unwrap(), twice.field(&name).unwrap());
        assert_eq!(a.units(), b.units(), "{name}");
        assert_eq!(a.attrs, b.attrs, "{name}");
        for (x, y) in a.data.iter().zip(b.data.iter()) {
            assert!(x == y || (x.is_nan() && y.is_nan()), "{name}: {x} != {y}");
        }
    }
}

#[test]
fn test_accumulated_precipitation_becomes_flux() {
    let r = reader(None, true);
    let ds = r.fixer(raw_dataset(), Some(&names(&["tprate"]))).unwrap();
    let tp = ds.field("tprate").unwrap();
    assert_eq!(tp.units(), Some("kg m-2 s-1"));
    assert!(tp.is_decumulated());
    assert!(tp.is_units_fixed());
    let expected = [0.0, 0.001, 0.002, 0.003].map(|m| m * 1000.0 / 3600.0);
    for (e, v) in expected.iter().zip(tp.data.iter()) {
        assert_abs_diff_eq!(*v, *e, epsilon = 1e-12);
    }
    assert!(!ds.contains("tp"));
}

#[test]
fn test_merge_layers_and_delete() {
    let r = reader(None, true);
    let rule = r.fix_rule().expect("rule resolved");
    assert_eq!(rule.name, "ifs-default+IFS.hist.hourly");
    assert!(rule.vars.contains_key("2d") && rule.vars.contains_key("2t"));

    let ds = r.fixer(raw_dataset(), None).unwrap();
    assert!(!ds.contains("lsm"));
    assert_eq!(ds.attrs["fixer_name"], "ifs-default+IFS.hist.hourly");
    // Rule attributes never override units
    let msl = ds.field("msl").unwrap();
    assert_eq!(msl.units(), Some("Pa"));
    assert_eq!(msl.attrs["long_name"], "Mean sea level pressure");
}

#[test]
fn test_disjoint_merge_is_commutative() {
    let mut a = RuleBlock::default();
    a.vars.insert("x".to_string(), Default::default());
    a.delete.push("d1".to_string());
    let mut b = RuleBlock::default();
    b.vars.insert("y".to_string(), Default::default());
    b.delete.push("d2".to_string());

    let ab = merge(&a, &b, MergeMethod::Merge);
    let ba = merge(&b, &a, MergeMethod::Merge);
    assert_eq!(ab.vars, ba.vars);
    let mut d1 = ab.delete.clone();
    let mut d2 = ba.delete.clone();
    d1.sort();
    d2.sort();
    assert_eq!(d1, d2);
}

#[test]
fn test_derived_variable_from_catalog_fixer() {
    let r = reader(Some("ifs-derived"), true);
    let ds = r.fixer(raw_dataset(), Some(&names(&["tnr"]))).unwrap();
    let tnr = ds.field("tnr").unwrap();
    assert_eq!(tnr.data.as_slice().unwrap(), &[50.0, 140.0, 230.0, 320.0]);
    assert_eq!(tnr.units(), Some("W m-2"));
}

#[test]
fn test_recursive_derivation_is_rejected() {
    let r = reader(Some("ifs-loop"), true);
    let err = r.fixer(raw_dataset(), Some(&names(&["loop"]))).unwrap_err();
    assert!(matches!(
        err,
        ClimNormError::RecursiveDerivation { ref var, ref operand } if var == "loop" && operand == "tprate"
    ));
}

#[test]
fn test_requested_derived_with_missing_operand() {
    let r = reader(Some("ifs-derived"), true);
    let mut ds = raw_dataset();
    ds.fields.remove("str");
    let err = r.fixer(ds.clone(), Some(&names(&["tnr"]))).unwrap_err();
    assert!(matches!(err, ClimNormError::VariableUnavailable { ref var, .. } if var == "tnr"));

    // Not requested: skipped silently
    let out = r.fixer(ds, None).unwrap();
    assert!(!out.contains("tnr"));
}

#[test]
fn test_resolver_without_any_layer() {
    let cfg = config();
    let resolver = FixRuleResolver::new(&cfg);
    assert!(resolver.resolve("ICON", "hist", "hourly", None).unwrap().is_none());

    let mut catalog = InMemoryCatalog::new();
    catalog.insert("ICON", "hist", "hourly", raw_dataset(), None, None);
    let r = Reader::new(&catalog, &cfg, ReaderOptions::new("ICON", "hist", "hourly")).unwrap();
    assert!(r.fix_rule().is_none());
    let ds = r.fixer(raw_dataset(), None).unwrap();
    assert!(ds.contains("2t") && ds.contains("lsm"));
    assert_eq!(ds.field("2t").unwrap().units(), Some("K"));
}

#[test]
fn test_unfixed_reader_passes_through() {
    let mut catalog = InMemoryCatalog::new();
    catalog.insert("IFS", "hist", "hourly", raw_dataset(), None, None);
    let options = ReaderOptions {
        fix: false,
        ..ReaderOptions::new("IFS", "hist", "hourly")
    };
    let mut r = Reader::new(&catalog, &config(), options).unwrap();
    assert!(r.fix_rule().is_none());
    let ds = r.retrieve(Some(&names(&["2t"]))).unwrap().into_dataset().unwrap();
    assert_eq!(ds.variable_names(), names(&["2t"]));
    assert_eq!(ds.field("2t").unwrap().units(), Some("K"));
}

#[test]
fn test_retrieve_loads_only_needed_sources() {
    let mut r = reader(None, true);
    let ds = r.retrieve(Some(&names(&["2t", "tprate"]))).unwrap().into_dataset().unwrap();
    assert_eq!(ds.variable_names(), names(&["2t", "tprate"]));
    assert_eq!(ds.field("2t").unwrap().units(), Some("degC"));
}

#[test]
fn test_data_model_translation_from_file() {
    let dir = tempdir().unwrap();
    let mut f = std::fs::File::create(dir.path().join("ifs2cf.json")).unwrap();
    write!(
        f,
        r#"{{"lat": {{"out_name": "latitude", "units": "degrees_north", "stored_direction": "increasing"}}}}"#
    )
    .unwrap();

    let mut ds = Dataset::with_time(hourly(1));
    ds.insert_coord("lat", Coordinate::numeric("lat", vec![10.0, 0.0, -10.0]).with_attr("units", "degrees_north"));
    let data = ArrayD::from_shape_vec(vec![1, 3], vec![1.0, 2.0, 3.0]).unwrap();
    ds.insert_field("2t", Field::new(&["time", "lat"], data).unwrap().with_units("K"));

    let mut catalog = InMemoryCatalog::new();
    catalog.insert("IFS", "hist", "hourly", ds, None, Some("ifs"));
    let options = ReaderOptions {
        data_model_dir: Some(dir.path().to_path_buf()),
        dst_data_model: Some("cf".to_string()),
        ..ReaderOptions::new("IFS", "hist", "hourly")
    };
    let mut r = Reader::new(&catalog, &config(), options).unwrap();
    let out = r.retrieve(None).unwrap().into_dataset().unwrap();

    assert!(out.coords.contains_key("latitude") && !out.coords.contains_key("lat"));
    let t = out.field("2t").unwrap();
    assert_eq!(t.dims, vec!["time".to_string(), "latitude".to_string()]);
    let values: Vec<f64> = t.data.iter().copied().collect();
    for (v, raw) in values.iter().zip([3.0, 2.0, 1.0]) {
        assert_abs_diff_eq!(*v, raw - 273.15, epsilon = 1e-9);
    }
}

#[test]
fn test_fixer_without_reader() {
    let cfg = config();
    let rule = FixRuleResolver::new(&cfg).resolve("IFS", "ssp", "daily", None).unwrap();
    let normalizer = VariableNormalizer::new(rule);
    let out = normalizer.normalize(raw_dataset(), Some(&names(&["2t"])), true).unwrap();
    assert_eq!(out.field("2t").unwrap().units(), Some("degC"));
    assert_eq!(out.attrs["fixer_name"], "ifs-default");
}
