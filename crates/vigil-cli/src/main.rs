//! vigil: failover verification for sentinel-supervised clusters.
//!
//! Runs fault scenarios (or a single-shot health suite) against a live
//! cluster, prints a summary, and exits 0 only when everything passed.

mod connection;
mod docker;
mod format;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use colored::Colorize;
use tokio::sync::watch;
use tracing::{info, warn};
use vigil_core::{
    health, scenarios, Clock, ClusterConfig, Observer, Orchestrator, Report, StoreClient,
    SystemClock,
};

use crate::connection::RespClient;
use crate::docker::DockerControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScenarioArg {
    /// Replication of a write from master to every replica.
    Monitor,
    /// Master stop and automatic failover.
    Failover,
    /// One monitor down; quorum must hold.
    Partition,
    /// One monitor down; monitoring must continue.
    Sentinel,
    /// Restart everything that is stopped and wait for the cluster.
    Recovery,
    /// Burst of writes read back from replicas.
    Stress,
    /// monitor, failover, partition, recovery, stress.
    All,
    /// Single-shot health suite, no faults.
    Check,
}

impl ScenarioArg {
    fn scenario_names(self) -> Vec<&'static str> {
        match self {
            ScenarioArg::All => scenarios::ALL.to_vec(),
            ScenarioArg::Monitor => vec!["monitor"],
            ScenarioArg::Failover => vec!["failover"],
            ScenarioArg::Partition => vec!["partition"],
            ScenarioArg::Sentinel => vec!["sentinel"],
            ScenarioArg::Recovery => vec!["recovery"],
            ScenarioArg::Stress => vec!["stress"],
            ScenarioArg::Check => Vec::new(),
        }
    }
}

#[derive(Parser)]
#[command(name = "vigil", version, about = "sentinel failover verification")]
struct Args {
    /// Scenario to run.
    #[arg(value_enum)]
    scenario: Option<ScenarioArg>,

    /// path to TOML configuration file
    #[arg(short = 'c', long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// print the default configuration as TOML and exit
    #[arg(long)]
    config_template: bool,

    /// name the monitors watch the master under
    #[arg(long, env = "VIGIL_MASTER_NAME")]
    master_name: Option<String>,

    /// quorum to assume when the monitors do not report one
    #[arg(long, env = "VIGIL_QUORUM")]
    quorum: Option<u32>,

    #[arg(long, env = "VIGIL_EXPECTED_REPLICAS")]
    expected_replicas: Option<usize>,

    #[arg(long, env = "VIGIL_EXPECTED_MONITORS")]
    expected_monitors: Option<usize>,

    /// milliseconds between polls
    #[arg(long, env = "VIGIL_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// polls allowed in one failover state before giving up
    #[arg(long, env = "VIGIL_MAX_POLLS")]
    max_polls: Option<u32>,

    /// per-scenario deadline in seconds
    #[arg(long, env = "VIGIL_SCENARIO_TIMEOUT_SECS")]
    scenario_timeout_secs: Option<u64>,

    /// per-command network timeout in milliseconds
    #[arg(long, env = "VIGIL_COMMAND_TIMEOUT_MS")]
    command_timeout_ms: Option<u64>,

    /// pause between scenarios in an `all` run, in seconds
    #[arg(long, env = "VIGIL_SCENARIO_GAP_SECS")]
    scenario_gap_secs: Option<u64>,

    /// docker binary used for fault injection
    #[arg(long, default_value = "docker", env = "VIGIL_DOCKER")]
    docker: String,
}

fn apply_args(cfg: &mut ClusterConfig, args: &Args) {
    if let Some(ref name) = args.master_name {
        cfg.master_name = name.clone();
    }
    if let Some(q) = args.quorum {
        cfg.quorum = q;
    }
    if let Some(n) = args.expected_replicas {
        cfg.expected_replicas = n;
    }
    if let Some(n) = args.expected_monitors {
        cfg.expected_monitors = n;
    }
    if let Some(ms) = args.poll_interval_ms {
        cfg.timing.poll_interval_ms = ms;
    }
    if let Some(n) = args.max_polls {
        cfg.timing.max_polls_per_state = n;
    }
    if let Some(secs) = args.scenario_timeout_secs {
        cfg.timing.scenario_timeout_secs = secs;
    }
    if let Some(ms) = args.command_timeout_ms {
        cfg.timing.command_timeout_ms = ms;
    }
    if let Some(secs) = args.scenario_gap_secs {
        cfg.timing.scenario_gap_secs = secs;
    }
}

/// Prints an error message and exits with status 1.
fn exit_err(msg: impl std::fmt::Display) -> ! {
    eprintln!("{}", msg.to_string().red());
    std::process::exit(1);
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info".into()),
        )
        .init();

    let args = Args::parse();

    // --config-template: dump defaults and exit
    if args.config_template {
        match ClusterConfig::default().to_toml() {
            Ok(toml) => {
                println!("{toml}");
                return ExitCode::SUCCESS;
            }
            Err(e) => exit_err(format!("failed to generate config template: {e}")),
        }
    }

    let Some(scenario) = args.scenario else {
        exit_err("a scenario is required (see --help)");
    };

    // defaults → TOML file → CLI/env overrides
    let mut cfg = match &args.config {
        Some(path) => ClusterConfig::from_file(path).unwrap_or_else(|e| exit_err(e)),
        None => ClusterConfig::default(),
    };
    apply_args(&mut cfg, &args);
    if let Err(e) = cfg.validate() {
        exit_err(e);
    }

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => exit_err(format!("failed to create runtime: {e}")),
    };

    let report = rt.block_on(run(cfg, scenario, &args.docker));
    println!("{}", format::format_report(&report));
    ExitCode::from(report.exit_code())
}

async fn run(cfg: ClusterConfig, scenario: ScenarioArg, docker: &str) -> Report {
    let timeout = cfg.timing.command_timeout();
    let gap = cfg.timing.scenario_gap();
    let mut observer = Observer::new(cfg, |spec, password| {
        Box::new(RespClient::new(
            spec.addr.clone(),
            password.map(String::from),
            timeout,
        )) as Box<dyn StoreClient>
    });
    let clock = SystemClock::new();
    let mut report = Report::new();

    if scenario == ScenarioArg::Check {
        info!("running health suite");
        for result in health::run(&mut observer, &clock).await {
            report.add_check(result);
        }
        return report;
    }

    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, restoring before exit");
            let _ = interrupt_tx.send(true);
        }
    });

    let control = DockerControl::new(docker);
    let mut orchestrator = Orchestrator::new(&mut observer, &control, &clock, interrupt_rx);

    for (i, name) in scenario.scenario_names().into_iter().enumerate() {
        if orchestrator.interrupted() {
            warn!(scenario = name, "interrupted, not starting");
            break;
        }
        if i > 0 && !gap.is_zero() {
            orchestrator.clock().sleep(gap).await;
        }
        let Some(mut s) = scenarios::by_name(name) else {
            continue;
        };
        let result = orchestrator.run(s.as_mut()).await;
        report.add_scenario(result);
    }
    report
}
