use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use splice_engine::{inspect_tags, restore_backup, PatchConfig, PatchEngine, PatchOutcome};
use splice_intercept::InterceptionInstaller;
use splice_rules::RuleRegistry;
use splice_unit::UnitName;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Exit code when the container was already current
const EXIT_NOTHING_TO_DO: u8 = 0;
/// Exit code when anything failed
const EXIT_FAILURE: u8 = 1;
/// Exit code when the host must restart to load the patched container
const EXIT_RESTART_REQUIRED: u8 = 3;

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Path to the patch configuration (TOML)")
}

fn cli() -> Command {
    Command::new("splice")
        .version(splice_engine::VERSION)
        .about("Patch a container's bytecode with versioned, idempotent rules")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("patch")
                .about("Apply the configured rules and swap in the patched container")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("restore")
                .about("Replace the container with its backup")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("tags")
                .about("Print the version tags of a unit inside the container")
                .arg(config_arg())
                .arg(
                    Arg::new("unit")
                        .required(true)
                        .value_parser(value_parser!(UnitName))
                        .help("Unit name, slashed or dotted (host/net/Server)"),
                ),
        )
}

fn load_config(args: &ArgMatches) -> Result<PatchConfig> {
    let path = args
        .get_one::<PathBuf>("config")
        .context("missing --config")?;
    PatchConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn patch(config: PatchConfig) -> Result<u8> {
    let mut registry = RuleRegistry::new();
    let mut prefixes = Vec::new();
    if let Some(intercept) = &config.intercept {
        let installer = InterceptionInstaller::new(intercept.clone(), &config.tag_carrier);
        registry.register_all(installer.rules()?)?;
        prefixes = installer.companion_prefixes();
        if config.companion.is_none() {
            tracing::warn!("Interception configured without a companion package; hooks will not resolve");
        }
    }

    let mut engine = PatchEngine::open(config, registry.freeze(), &prefixes)?;
    let outcome = engine.run()?;
    match &outcome {
        PatchOutcome::NothingToDo => {
            println!("nothing to do");
            Ok(EXIT_NOTHING_TO_DO)
        }
        PatchOutcome::Patched(report) => {
            println!(
                "patched {} ({} -> {})",
                report.container.display(),
                report.original_hash.short(),
                report.new_hash.short()
            );
            println!("  rewritten:   {}", report.patched.len());
            println!("  synthesized: {}", report.synthesized.len());
            println!("  companion:   {}", report.companion.len());
            println!("  dropped:     {}", report.excluded);
            println!("  backup:      {}", report.backup.display());
            for failure in report.failed.iter().chain(&report.inapplicable) {
                println!("  skipped rule {failure}");
            }
            Ok(EXIT_RESTART_REQUIRED)
        }
    }
}

fn restore(config: &PatchConfig) -> Result<u8> {
    let backup = restore_backup(&config.container, &config.backup_suffix)?;
    println!("restored {} from {}", config.container.display(), backup.display());
    Ok(EXIT_RESTART_REQUIRED)
}

fn tags(container: &Path, unit: &UnitName) -> Result<u8> {
    let Some(tags) = inspect_tags(container, unit)? else {
        bail!("{} has no unit {}", container.display(), unit);
    };
    if tags.is_empty() {
        println!("{unit}: no version tags");
    } else {
        print!("{tags}");
    }
    Ok(EXIT_NOTHING_TO_DO)
}

fn run(matches: &ArgMatches) -> Result<u8> {
    match matches.subcommand() {
        Some(("patch", args)) => patch(load_config(args)?),
        Some(("restore", args)) => restore(&load_config(args)?),
        Some(("tags", args)) => {
            let config = load_config(args)?;
            let unit = args.get_one::<UnitName>("unit").context("missing unit")?;
            tags(&config.container, unit)
        }
        _ => bail!("unknown command"),
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let matches = cli().get_matches();
    match run(&matches) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
