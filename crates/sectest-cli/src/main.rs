//! sectest command-line front end
//!
//! Renders execution documents for a test described in a file, and prints
//! live-log stream URLs. Rendering runs against an empty capability bus, so
//! integration fragments are left out and the fixed entries remain.

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use sectest_bus::CapabilityBus;
use sectest_core::config::load_toml;
use sectest_core::logs::log_stream_url;
use sectest_core::{
    ExecutionAssembler, ExecutionDocument, JobKind, OutputMode, ProjectId, SecurityTest,
    ServiceConfig, StaticSecrets, Thresholds,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Config file: service settings plus a `[secrets]` table
#[derive(Debug, Default, Deserialize)]
struct CliConfig {
    #[serde(flatten)]
    service: ServiceConfig,
    #[serde(default)]
    secrets: BTreeMap<String, String>,
}

impl CliConfig {
    fn load(path: Option<&String>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        load_toml(path).with_context(|| format!("cannot load config {path}"))
    }
}

fn cli() -> Command {
    Command::new("sectest")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Security test execution documents")
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("render")
                .about("Render the execution document of a test")
                .arg(
                    Arg::new("test")
                        .long("test")
                        .required(true)
                        .help("Test record file (.json, .yaml or .yml)"),
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .default_value("pipeline")
                        .value_parser(["pipeline", "container", "docker"])
                        .help("Document shape"),
                )
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .default_value("sast")
                        .value_parser(["sast", "dast"])
                        .help("Job kind"),
                )
                .arg(
                    Arg::new("thresholds")
                        .long("thresholds")
                        .help("Thresholds file (.json, .yaml or .yml)"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .help("TOML config file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print pipeline manifests as JSON instead of YAML"),
                ),
        )
        .subcommand(
            Command::new("log-url")
                .about("Print the live-log websocket URL of a task run")
                .arg(
                    Arg::new("project")
                        .long("project")
                        .required(true)
                        .value_parser(value_parser!(i64))
                        .help("Project id"),
                )
                .arg(
                    Arg::new("task")
                        .long("task")
                        .required(true)
                        .help("Task id"),
                )
                .arg(
                    Arg::new("result-test")
                        .long("result-test")
                        .required(true)
                        .help("Results test id"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .help("TOML config file"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

/// Read a JSON or YAML file, picked by extension
fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    if is_yaml {
        serde_yaml::from_str(&source).with_context(|| format!("invalid YAML in {}", path.display()))
    } else {
        serde_json::from_str(&source).with_context(|| format!("invalid JSON in {}", path.display()))
    }
}

fn format_document(document: &ExecutionDocument, json: bool) -> Result<String> {
    Ok(match document {
        ExecutionDocument::Pipeline(manifest) if !json => serde_yaml::to_string(manifest)?,
        ExecutionDocument::Docker(command) => command.clone(),
        other => serde_json::to_string_pretty(other)?,
    })
}

async fn render(args: &ArgMatches) -> Result<()> {
    let config = CliConfig::load(args.get_one::<String>("config"))?;
    let test_path = args
        .get_one::<String>("test")
        .context("--test is required")?;
    let test: SecurityTest = read_document(Path::new(test_path))?;

    let mode: OutputMode = args
        .get_one::<String>("mode")
        .map_or(Ok(OutputMode::Pipeline), |m| m.parse())
        .map_err(anyhow::Error::msg)?;
    let kind: JobKind = args
        .get_one::<String>("kind")
        .map_or(Ok(JobKind::Sast), |k| k.parse())
        .map_err(anyhow::Error::msg)?;
    let thresholds: Thresholds = match args.get_one::<String>("thresholds") {
        Some(path) => read_document(Path::new(path))?,
        None => Thresholds::unset(),
    };

    tracing::debug!(
        mode = %mode,
        kind = %kind,
        secrets = config.secrets.len(),
        test_uid = %test.test_uid,
        "rendering without integration providers"
    );
    let secrets: StaticSecrets = config.secrets.into_iter().collect();
    let assembler = ExecutionAssembler::new(CapabilityBus::new(), Arc::new(secrets), config.service);

    let document = test
        .execution_config(&assembler, mode, kind, &thresholds)
        .await
        .with_context(|| format!("cannot build {mode} document for test {}", test.test_uid))?;

    println!("{}", format_document(&document, args.get_flag("json"))?);
    Ok(())
}

fn log_url(args: &ArgMatches) -> Result<()> {
    let config = CliConfig::load(args.get_one::<String>("config"))?;
    let project = *args
        .get_one::<i64>("project")
        .context("--project is required")?;
    let task = args.get_one::<String>("task").context("--task is required")?;
    let result_test = args
        .get_one::<String>("result-test")
        .context("--result-test is required")?;

    println!(
        "{}",
        log_stream_url(&config.service.loki_url, ProjectId(project), task, result_test)
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("render", args)) => render(args).await,
        Some(("log-url", args)) => log_url(args),
        _ => Ok(()),
    }
}
