use bench_core::config::settings::{Setting, Settings, parse_pair, settings_from_pairs};
use bench_core::config::ConfigError;
use bench_core::config::quickstart::ROOT_DIRECTORY;
use bench_core::config::workspace::WorkspaceConfig;
use bench_core::logging::{self, DEFAULT_OTLP_ENDPOINT, LoggingConfig};
use bench_core::workspace::WorkspaceClient;
use bench_core::{provision, run};
use clap::{Arg, ArgMatches, Command};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::level_filters::LevelFilter;

fn cli() -> Command {
    Command::new("serverless_bench")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Provision and run SQL warehouse benchmarks on Databricks")
        .subcommand_required(true)
        .arg(
            Arg::new("host")
                .long("host")
                .global(true)
                .help("Workspace URL (defaults to $DATABRICKS_HOST)")
                .value_name("URL"),
        )
        .arg(
            Arg::new("token")
                .long("token")
                .global(true)
                .help("Personal access token (defaults to $DATABRICKS_TOKEN)")
                .value_name("TOKEN"),
        )
        .arg(
            Arg::new("cloud")
                .long("cloud")
                .global(true)
                .help("Cloud provider when it cannot be told from the host (defaults to $DATABRICKS_CLOUD)")
                .value_name("CLOUD")
                .value_parser(["aws", "azure", "gcp"]),
        )
        .arg(
            Arg::new("param")
                .long("param")
                .short('p')
                .global(true)
                .help("Benchmark parameter (format: key=value)")
                .value_name("KEY=VALUE")
                .action(clap::ArgAction::Append),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .help("Enable verbose logging")
                .action(clap::ArgAction::Count),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .global(true)
                .help("Also write debug logs to this file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("otlp-endpoint")
                .long("otlp-endpoint")
                .global(true)
                .help("Export traces over OTLP/HTTP")
                .value_name("URL")
                .num_args(0..=1)
                .default_missing_value(DEFAULT_OTLP_ENDPOINT),
        )
        .subcommand(
            Command::new("setup")
                .about("Upload the init script and benchmark package to DBFS")
                .arg(
                    Arg::new("include-kit-jar")
                        .long("include-kit-jar")
                        .help("Also upload the benchmark kit jar")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("launch")
                .about("Create the warehouses and benchmark job, then start a run")
                .arg(
                    Arg::new("skip-upload")
                        .long("skip-upload")
                        .help("Assume the setup files are already uploaded")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("run").about("Run the benchmark against its warehouses and record metrics"),
        )
}

fn settings_from_matches(matches: &ArgMatches) -> Result<HashMap<String, Setting>, ConfigError> {
    let pairs = matches
        .get_many::<String>("param")
        .into_iter()
        .flatten()
        .map(|raw| parse_pair(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let mut settings = settings_from_pairs(pairs);

    for (key, env) in [
        ("host", "DATABRICKS_HOST"),
        ("token", "DATABRICKS_TOKEN"),
        ("cloud", "DATABRICKS_CLOUD"),
    ] {
        let value = matches
            .get_one::<String>(key)
            .cloned()
            .or_else(|| std::env::var(env).ok());
        if let Some(value) = value {
            settings.set_string(key, value);
        }
    }
    Ok(settings)
}

async fn execute(matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let settings = settings_from_matches(matches)?;
    let client = WorkspaceClient::new(WorkspaceConfig::from_settings(&settings)?);

    match matches.subcommand() {
        Some(("setup", sub)) => {
            let quickstart = provision::quickstart_config(&settings, &client).await?;
            provision::upload_setup_files(&client, &quickstart, sub.get_flag("include-kit-jar"))
                .await?;
            println!("Setup files uploaded under {ROOT_DIRECTORY}");
        }
        Some(("launch", sub)) => {
            provision::launch(&settings, &client, !sub.get_flag("skip-upload")).await?;
        }
        Some(("run", _)) => {
            run::run_from_settings(&settings, &client).await?;
        }
        _ => unreachable!("clap enforces a subcommand"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();

    let level = match matches.get_count("verbose") {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let logging_config = LoggingConfig::new(
        matches.get_one::<String>("log-file").map(PathBuf::from),
        true,
        matches.get_one::<String>("otlp-endpoint").cloned(),
    )
    .with_level(level);
    if let Err(e) = logging::init(logging_config) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let result = execute(&matches).await;
    logging::shutdown_tracer();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "serverless_bench failed");
            eprintln!("Error: {e}");
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
