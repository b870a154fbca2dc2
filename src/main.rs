//! Entry point for the climnorm diagnostic tool.
//! Loads fix rules, resolves the effective rule for a source and checks unit conversions.

use clap::Parser;
use climnorm::config::ReaderConfig;
use climnorm::fixer::{FixConfig, FixRuleResolver};
use climnorm::logging;
use climnorm::units::UnitSystem;
use log::info;
mod cli;

use cli::Args;

fn load_fixes(args: &Args) -> Result<FixConfig, Box<dyn std::error::Error>> {
    let mut fixes = match &args.config {
        Some(path) => {
            let cfg = ReaderConfig::from_path(path)?;
            cfg.validate()?;
            cfg.load_fixes()?
        }
        None => FixConfig::default(),
    };
    for path in &args.fixes {
        info!("loading fix rules from {}", path.display());
        fixes.extend(FixConfig::from_path(path)?);
    }
    Ok(fixes)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let args = Args::parse();
    logging::init(args.verbose);

    let fixes = load_fixes(&args)?;
    let units = UnitSystem::with_aliases(fixes.defaults.units.clone());

    if let Some((src, dst)) = &args.convert {
        let (factor, offset) = units.convert(src, dst, args.deltat)?;
        println!("{src} -> {dst}: value * {factor} + {offset}");
    }

    let Some(model) = args.model.as_deref() else {
        if args.convert.is_none() {
            println!("Nothing to do: pass --model to resolve a fix rule or --convert to check units");
        }
        return Ok(());
    };

    let rule = FixRuleResolver::new(&fixes).resolve(model, &args.exp, &args.source, args.fixer_name.as_deref())?;
    match &rule {
        Some(rule) => println!("{}", serde_json::to_string_pretty(rule)?),
        None => println!("No fix rule for {model}/{}/{}", args.exp, args.source),
    }

    #[cfg(feature = "netcdf")]
    if let Some(path) = &args.file {
        use climnorm::catalog::DatasetHandle;
        use climnorm::fixer::VariableNormalizer;
        use climnorm::netcdf_io::NetcdfHandle;

        let handle = NetcdfHandle::new(path);
        let requested = (!args.vars.is_empty()).then_some(args.vars.as_slice());
        let normalizer = VariableNormalizer::new(rule)
            .with_units(units)
            .with_default_coords(fixes.defaults.coords.clone());
        let wanted = match (requested, normalizer.rule()) {
            (Some(vars), Some(rule)) => Some(rule.source_variables(vars, normalizer.grib())?),
            (vars, _) => vars.map(<[String]>::to_vec),
        };
        let raw = handle.load(wanted.as_deref())?;
        let fixed = normalizer.normalize(raw, requested, true)?;
        println!("Successfully normalized {}", path.display());
        for name in fixed.variable_names() {
            if let Some(field) = fixed.field(&name) {
                println!(
                    "  {name}: dims={:?} shape={:?} units={}",
                    field.dims,
                    field.data.shape(),
                    field.units().unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}
