//! Hextech CLI
//!
//! Command-line front end for the indicator completion aggregator:
//! - `consume`: feed JSON-lines event envelopes through the in-process broker
//!   and run the handlers until the input is drained or a signal arrives
//! - `emit`: print the indicator events of one scenario as JSON lines
//! - `config`: print the effective configuration

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hextech_aggregator::{
    AggregatorConfig, BrokerPublisher, BrokerService, Collaborators, CompletionMode, DomainEvent,
    EventPublisher, HextechApiClient, IndicatorKind, MemoryBroker, ProjectCreated,
    RegionalScenarioCreated, RegionalScenarioIndicatorsUpdated, ScenarioIndicatorsUpdated,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hextech")]
#[command(author, version, about = "Hextech indicator completion aggregator")]
struct Cli {
    /// Emit logs as JSON (also `HEXTECH_LOG_JSON=1`).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume JSON-lines envelopes and run the aggregator over them.
    Consume {
        /// Input file, or `-` for stdin.
        #[arg(long, short, default_value = "-")]
        input: String,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print the indicator events of one scenario as JSON lines.
    Emit {
        #[arg(long, value_enum, default_value_t = Scope::Project)]
        scope: Scope,

        #[arg(long)]
        scenario_id: i64,

        /// Project of the scenario (project scope).
        #[arg(long, default_value_t = 0)]
        project_id: i64,

        /// Territory of the scenario (regional scope).
        #[arg(long, default_value_t = 0)]
        territory_id: i64,

        /// Prepend the creation event of the project or regional scenario.
        #[arg(long)]
        with_created: bool,
    },

    /// Print the effective configuration as JSON.
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Args, Debug, Default)]
struct Overrides {
    /// Base URL of the hextech API (`HEXTECH_API_URL`).
    #[arg(long)]
    api_url: Option<String>,

    /// evict_on_fire | latch | retrigger (`HEXTECH_COMPLETION_MODE`).
    #[arg(long)]
    completion_mode: Option<CompletionMode>,

    /// Partitions per topic (`HEXTECH_PARTITIONS`).
    #[arg(long)]
    partitions: Option<u32>,

    /// Live records per registry (`HEXTECH_MAX_RECORDS`).
    #[arg(long)]
    max_records: Option<usize>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Project,
    Regional,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json || env_bool("HEXTECH_LOG_JSON", false));

    match cli.command {
        Commands::Consume { input, overrides } => consume(&input, load_config(overrides)?).await,
        Commands::Emit {
            scope,
            scenario_id,
            project_id,
            territory_id,
            with_created,
        } => {
            for event in scenario_events(scope, scenario_id, project_id, territory_id, with_created)
            {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
        Commands::Config { overrides } => {
            let config = load_config(overrides)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(overrides: Overrides) -> Result<AggregatorConfig> {
    config_from(overrides, |name| env::var(name).ok())
}

/// Layer flag overrides over `env`, then parse and validate once.
fn config_from<F>(overrides: Overrides, env: F) -> Result<AggregatorConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let flag = |name: &str| match name {
        "HEXTECH_API_URL" => overrides.api_url.clone(),
        "HEXTECH_COMPLETION_MODE" => overrides.completion_mode.map(|m| m.as_str().to_string()),
        "HEXTECH_PARTITIONS" => overrides.partitions.map(|n| n.to_string()),
        "HEXTECH_MAX_RECORDS" => overrides.max_records.map(|n| n.to_string()),
        _ => None,
    };
    AggregatorConfig::from_lookup(|name| flag(name).or_else(|| env(name)))
        .context("invalid configuration")
}

// ============================================================================
// consume
// ============================================================================

async fn consume(input: &str, config: AggregatorConfig) -> Result<()> {
    let broker = Arc::new(MemoryBroker::new(config.topics.all(), config.partitions));
    let client = Arc::new(HextechApiClient::new(config.api.clone())?);
    let publisher = BrokerPublisher::new(broker.clone(), config.topics.clone());

    let mut service = BrokerService::new(
        config,
        Collaborators::from_api_client(client),
        broker.clone(),
    )?;
    service.register_and_start(broker.clone()).await?;

    let reader = open_input(input).await?;
    let fed = tokio::select! {
        fed = async {
            let fed = feed(reader, &publisher).await?;
            broker.wait_idle().await;
            Ok::<_, anyhow::Error>(fed)
        } => Some(fed),
        _ = wait_for_shutdown_signal() => None,
    };

    service.stop().await;
    broker.close();

    match fed {
        Some(fed) => {
            let fed = fed?;
            tracing::info!(
                published = fed.published,
                skipped = fed.skipped,
                "input drained"
            );
        }
        None => tracing::info!("interrupted, stopped before input was drained"),
    }
    println!("{}", serde_json::to_string(&service.stats().snapshot())?);
    Ok(())
}

async fn open_input(input: &str) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let path = PathBuf::from(input);
    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

#[derive(Debug, Default)]
struct Fed {
    published: u64,
    skipped: u64,
}

/// Publish every envelope of `reader`. Malformed lines are logged and skipped.
async fn feed(
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    publisher: &BrokerPublisher,
) -> Result<Fed> {
    let mut fed = Fed::default();
    let mut lines = reader.lines();
    let mut line_no = 0_u64;
    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = match DomainEvent::decode(line.as_bytes()) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(line = line_no, error = %err, "skipping malformed envelope");
                fed.skipped += 1;
                continue;
            }
        };
        publisher
            .publish(event)
            .await
            .map_err(|e| anyhow!("line {line_no}: {e}"))?;
        fed.published += 1;
    }
    Ok(fed)
}

// ============================================================================
// emit
// ============================================================================

fn scenario_events(
    scope: Scope,
    scenario_id: i64,
    project_id: i64,
    territory_id: i64,
    with_created: bool,
) -> Vec<DomainEvent> {
    let mut events = Vec::new();
    match scope {
        Scope::Project => {
            if with_created {
                events.push(
                    ProjectCreated {
                        project_id,
                        base_scenario_id: scenario_id,
                        territory_id,
                    }
                    .into(),
                );
            }
            events.extend(IndicatorKind::ALL.iter().enumerate().map(|(i, kind)| {
                ScenarioIndicatorsUpdated {
                    scenario_id,
                    indicator_id: kind.id(),
                    project_id,
                    indicator_value_id: i as i64 + 1,
                }
                .into()
            }));
        }
        Scope::Regional => {
            if with_created {
                events.push(
                    RegionalScenarioCreated {
                        scenario_id,
                        territory_id,
                    }
                    .into(),
                );
            }
            events.extend(IndicatorKind::ALL.iter().map(|kind| {
                RegionalScenarioIndicatorsUpdated {
                    scenario_id,
                    territory_id,
                    indicator_id: kind.id(),
                }
                .into()
            }));
        }
    }
    events
}

// ============================================================================
// process plumbing
// ============================================================================

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    // Logs go to stderr; stdout carries command output.
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                tracing::warn!("signal handlers unavailable, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
