//! `rollcheck` command-line entry point

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use rollcheck_core::{EtcdBackend, Harness, HarnessConfig, ScenarioKind, ScenarioReport};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn scenario_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("Harness configuration file (TOML)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print reports as JSON"),
        )
}

fn cli() -> Command {
    Command::new("rollcheck")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Release upgrade verification for replicated key-value clusters")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(scenario_command(
            "rolling",
            "Upgrade one member at a time, verifying records after each restart",
        ))
        .subcommand(scenario_command(
            "restart",
            "Restart every member at once onto the new binary, then verify",
        ))
        .subcommand(scenario_command("all", "Run every scenario in order"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(name: &str, args: &ArgMatches) -> anyhow::Result<Vec<ScenarioReport>> {
    let config_path = args.get_one::<PathBuf>("config");
    let config = HarnessConfig::load(config_path.map(PathBuf::as_path))
        .context("loading harness configuration")?;
    let backend = Arc::new(EtcdBackend::from_config(&config));
    let harness = Harness::new(config, backend);

    let reports = match name {
        "all" => harness.run_all().await,
        other => {
            let kind: ScenarioKind = other.parse().map_err(anyhow::Error::msg)?;
            vec![harness.run(kind).await]
        }
    };
    Ok(reports)
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let Some((name, args)) = matches.subcommand() else {
        process::exit(2);
    };

    let reports = match run(name, args).await {
        Ok(reports) => reports,
        Err(err) => {
            eprintln!("rollcheck: {err:#}");
            process::exit(1);
        }
    };

    if args.get_flag("json") {
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("rollcheck: {err}");
                process::exit(1);
            }
        }
    } else {
        for report in &reports {
            println!("{}", report.generate_text());
        }
    }

    process::exit(if reports.iter().any(ScenarioReport::failed) { 1 } else { 0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn scenario_subcommands_take_config() {
        let matches = cli()
            .try_get_matches_from(["rollcheck", "--log-json", "rolling", "--config", "h.toml"])
            .unwrap();
        assert!(matches.get_flag("log-json"));
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "rolling");
        assert_eq!(args.get_one::<PathBuf>("config"), Some(&PathBuf::from("h.toml")));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(cli().try_get_matches_from(["rollcheck"]).is_err());
    }
}
