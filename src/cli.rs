//! Defines command-line interface options using `clap` for the climnorm diagnostic tool.

use clap::Parser;
use std::path::PathBuf;

/// Inspect fix-rule resolution and unit conversions
#[derive(Parser, Debug)]
#[command(
    version,
    name = "climnorm",
    about = "Resolve climate-model fix rules and check unit conversions"
)]
pub struct Args {
    /// Reader configuration file listing fix files and data models
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Fix-rule YAML file; may be repeated, later files extend earlier ones
    #[arg(short, long = "fixes")]
    pub fixes: Vec<PathBuf>,

    /// Model name, e.g. IFS
    #[arg(long)]
    pub model: Option<String>,

    /// Experiment name
    #[arg(long, default_value = "default")]
    pub exp: String,

    /// Source name
    #[arg(long, default_value = "default")]
    pub source: String,

    /// Fixer family to use instead of `<model>-default`
    #[arg(long)]
    pub fixer_name: Option<String>,

    /// Print the factor and offset converting between two units, formatted as <src>:<dst>
    #[arg(long, value_parser = parse_convert_arg)]
    pub convert: Option<(String, String)>,

    /// Accumulation period in seconds used by --convert
    #[arg(long, default_value_t = 1.0)]
    pub deltat: f64,

    /// NetCDF file to normalize with the resolved rule
    #[cfg(feature = "netcdf")]
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Variables to read from --file; all variables when omitted
    #[cfg(feature = "netcdf")]
    #[arg(long, value_delimiter = ',')]
    pub vars: Vec<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn parse_convert_arg(s: &str) -> Result<(String, String), String> {
    match s.split_once(':') {
        Some((src, dst)) if !src.trim().is_empty() && !dst.trim().is_empty() => {
            Ok((src.trim().to_string(), dst.trim().to_string()))
        }
        _ => Err("Invalid format: Expected '<source unit>:<target unit>'.".to_string()),
    }
}
