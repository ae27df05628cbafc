//! Cache HA Verifier - CLI entry point.
//!
//! Runs disruption scenarios against a live cluster and reports the verdict.
//! Reports go to stdout; logs go to stderr.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use chv_common::engine::run_all;
use chv_common::kubectl::{KubectlCluster, check_script_dir};
use chv_common::{LogConfig, ScenarioEngine, ScenarioReport, VerifierConfig, catalog, init_logging};

#[derive(Parser)]
#[command(name = "chv")]
#[command(author, version, about = "Cache HA Verifier - cluster disruption scenarios")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the scenario catalog
    List,

    /// Run scenarios against the configured cluster
    Run {
        /// Run only this scenario (default: the whole catalog)
        #[arg(short, long)]
        scenario: Option<String>,

        /// Config file (TOML); CHV_* environment variables override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Isolation scope for every orchestrator command
        #[arg(short, long, env = "CHV_NAMESPACE")]
        namespace: Option<String>,

        /// Emit the reports as JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    init_logging(&log_config)?;

    match cli.command {
        Commands::List => {
            for scenario in catalog::all() {
                println!("{:<28} {}", scenario.name, scenario.description);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            scenario,
            config,
            namespace,
            json,
        } => run(scenario, config, namespace, json),
    }
}

fn run(
    scenario: Option<String>,
    config_path: Option<PathBuf>,
    namespace: Option<String>,
    json: bool,
) -> Result<ExitCode> {
    let mut config = VerifierConfig::resolve(config_path.as_deref())?;
    if let Some(namespace) = namespace {
        config.namespace = namespace;
    }
    check_script_dir(&config.script_dir)?;

    let scenarios = match scenario {
        Some(name) => {
            let scenario = catalog::by_name(&name)
                .ok_or_else(|| anyhow::anyhow!("unknown scenario `{name}`; see `chv list`"))?;
            vec![scenario]
        }
        None => catalog::all(),
    };

    let topology = config.topology();
    info!(
        namespace = %topology.namespace,
        servers = topology.server_replicas,
        coordinators = topology.coordinator_replicas,
        scenarios = scenarios.len(),
        "starting verification run"
    );

    let cluster = KubectlCluster::new(&config);
    let engine = ScenarioEngine::new(&cluster, config.engine.clone());
    let reports = run_all(&engine, &scenarios, &topology);

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_reports(&reports);
    }

    let all_passed = reports.iter().all(|report| report.passed);
    Ok(if all_passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_reports(reports: &[ScenarioReport]) {
    for report in reports {
        let verdict = if report.passed { "PASS" } else { "FAIL" };
        println!(
            "{verdict}  {:<28} {}",
            report.scenario,
            humantime::format_duration(std::time::Duration::from_millis(report.duration_ms))
        );
        for failure in &report.failures {
            println!(
                "      step `{}`: {} - expected `{}`, got `{}`",
                failure.step, failure.assertion, failure.expected, failure.actual
            );
        }
        if let Some(error) = &report.infra_error {
            println!("      infrastructure error: {error}");
        }
    }
    let passed = reports.iter().filter(|r| r.passed).count();
    println!("\n{passed}/{} scenarios passed", reports.len());
}
