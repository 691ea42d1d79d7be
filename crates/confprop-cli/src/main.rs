use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use confprop_core::{
    ChangeOperation, ChangeRecord, ConfigError, ConfigKey, ConfigLoader, ErrorReport,
    ErrorReporter, LoggingConfig, MemoryConfigStore, Notifier, NotifyError, PropagationConfig,
    ScheduleRefresher, SpokeAccountStore,
};
use confprop_gateway::{InboundEvent, SpokeRegistrationHandler, TrustedChannel};
use confprop_stream::{
    ChangeStreamDispatcher, DispatchStats, DispatcherConfig, ScheduleResolvingNotifier,
    TopicReporter,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const ISSUES_TOPIC: &str = "confprop-issues";

#[derive(Parser)]
#[command(name = "confprop")]
#[command(about = "Configuration change propagation - dispatcher replay and spoke registration", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "CONFPROP_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the configuration, then print the effective values
    CheckConfig,

    /// Feed JSON-lines change records through the dispatcher
    Replay {
        /// File with one change record per line
        #[arg(short, long)]
        records: PathBuf,

        /// Apply the records to an in-memory store and report affected schedules instead of keys
        #[arg(long)]
        resolve_schedules: bool,
    },

    /// Pass JSON-lines inbound bus events through the trusted channel
    Register {
        /// File with one inbound event per line
        #[arg(short, long)]
        events: PathBuf,
    },
}

// Output structures
#[derive(Serialize)]
struct ReplayResult {
    records: usize,
    filtered_out: u64,
    batches_dispatched: u64,
    batches_failed: u64,
    batches: Vec<Vec<String>>,
}

#[derive(Serialize)]
struct VerdictResult {
    event_id: String,
    account: String,
    verdict: String,
    accepted: bool,
}

#[derive(Serialize)]
struct RegisterResult {
    verdicts: Vec<VerdictResult>,
    spoke_accounts: BTreeSet<String>,
}

enum Output {
    Config(PropagationConfig),
    Replay(ReplayResult),
    Register(RegisterResult),
}

/// Downstream stand-in that logs and keeps what it was asked to refresh.
#[derive(Default)]
struct CollectingNotifier {
    batches: Mutex<Vec<Vec<String>>>,
}

impl CollectingNotifier {
    fn record(&self, items: Vec<String>) {
        info!(items = ?items, "downstream notified");
        self.batches.lock().push(items);
    }

    fn take(&self) -> Vec<Vec<String>> {
        std::mem::take(&mut *self.batches.lock())
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, keys: &[ConfigKey]) -> std::result::Result<(), NotifyError> {
        self.record(keys.iter().map(|k| k.to_string()).collect());
        Ok(())
    }
}

#[async_trait]
impl ScheduleRefresher for CollectingNotifier {
    async fn refresh(&self, schedule_names: &BTreeSet<String>) -> std::result::Result<(), NotifyError> {
        self.record(schedule_names.iter().cloned().collect());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match run(&cli).await {
        Ok(output) => {
            print_output(&cli.output, &output)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<Output> {
    let config = match load_config(cli.config.as_deref(), std::env::vars().collect()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            init_tracing(&LoggingConfig::default(), cli.verbose);
            let reporter = TopicReporter::new(ISSUES_TOPIC);
            return Err(report_configuration_fault(&reporter, e).await);
        }
    };
    init_tracing(&config.logging, cli.verbose);

    match &cli.command {
        Commands::CheckConfig => Ok(Output::Config(config.as_ref().clone())),
        Commands::Replay {
            records,
            resolve_schedules,
        } => execute_replay(&config, records, *resolve_schedules)
            .await
            .map(Output::Replay),
        Commands::Register { events } => execute_register(&config, events)
            .await
            .map(Output::Register),
    }
}

fn load_config(
    path: Option<&Path>,
    env: HashMap<String, String>,
) -> std::result::Result<PropagationConfig, ConfigError> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_file(path);
    }
    loader.load_with_env(env)
}

async fn report_configuration_fault(reporter: &dyn ErrorReporter, err: ConfigError) -> anyhow::Error {
    reporter.publish(ErrorReport::configuration_fault(&err)).await;
    anyhow::Error::new(err).context("Failed to load configuration")
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json = logging.format == "json";

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn execute_replay(
    config: &PropagationConfig,
    path: &Path,
    resolve_schedules: bool,
) -> Result<ReplayResult> {
    let records: Vec<ChangeRecord> = read_json_lines(path)?;
    let count = records.len();
    let collector = Arc::new(CollectingNotifier::default());

    let notifier: Arc<dyn Notifier> = if resolve_schedules {
        let store = Arc::new(MemoryConfigStore::new());
        for record in &records {
            apply_to_store(&store, record);
        }
        Arc::new(ScheduleResolvingNotifier::new(store, collector.clone()))
    } else {
        collector.clone()
    };

    let dispatcher = ChangeStreamDispatcher::new(
        DispatcherConfig::from_config(&config.stream),
        notifier,
        Arc::new(TopicReporter::new(ISSUES_TOPIC)),
    );

    let shutdown = CancellationToken::new();
    let guard = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            guard.cancel();
        }
    });

    let stats: DispatchStats = dispatcher
        .run(futures::stream::iter(records), shutdown)
        .await;

    Ok(ReplayResult {
        records: count,
        filtered_out: stats.filtered_out,
        batches_dispatched: stats.batches_dispatched,
        batches_failed: stats.batches_failed,
        batches: collector.take(),
    })
}

fn apply_to_store(store: &MemoryConfigStore, record: &ChangeRecord) {
    let key = record.partition_key();
    match record.operation {
        ChangeOperation::Insert | ChangeOperation::Modify => {
            store.put(key, record.payload.clone());
        }
        ChangeOperation::Delete => {
            store.delete(&key);
        }
    }
}

async fn execute_register(config: &PropagationConfig, path: &Path) -> Result<RegisterResult> {
    let events: Vec<InboundEvent> = read_json_lines(path)?;
    let store = Arc::new(MemoryConfigStore::new());
    let handler = Arc::new(SpokeRegistrationHandler::new(
        store.clone(),
        Arc::new(TopicReporter::new(ISSUES_TOPIC)),
    ));
    let channel = TrustedChannel::from_config(config, handler)
        .context("Failed to initialize trust gateway")?;

    let mut verdicts = Vec::with_capacity(events.len());
    for inbound in &events {
        let verdict = channel.deliver(inbound).await;
        verdicts.push(VerdictResult {
            event_id: inbound.event.id.clone(),
            account: inbound.event.account.clone(),
            verdict: verdict.to_string(),
            accepted: verdict.is_accepted(),
        });
    }

    let spoke_accounts = store
        .spoke_accounts()
        .await
        .context("Failed to read spoke accounts")?;
    Ok(RegisterResult {
        verdicts,
        spoke_accounts,
    })
}

fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut items = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid entry", path.display(), index + 1))?;
        items.push(item);
    }
    Ok(items)
}

fn print_output(format: &OutputFormat, output: &Output) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = match output {
                Output::Config(config) => serde_json::to_string_pretty(config)?,
                Output::Replay(result) => serde_json::to_string_pretty(result)?,
                Output::Register(result) => serde_json::to_string_pretty(result)?,
            };
            println!("{}", json);
        }
        OutputFormat::Pretty => match output {
            Output::Config(config) => {
                println!("{}", "Configuration is valid".green().bold());
                println!();
                print!("{}", config.to_toml()?);
            }
            Output::Replay(result) => {
                for (i, batch) in result.batches.iter().enumerate() {
                    println!("{} {}", format!("batch {}:", i + 1).cyan(), batch.join(", "));
                }
                println!(
                    "{} {} records, {} filtered, {} batches dispatched, {} failed",
                    "Replay:".bold(),
                    result.records,
                    result.filtered_out,
                    result.batches_dispatched,
                    result.batches_failed
                );
            }
            Output::Register(result) => {
                for v in &result.verdicts {
                    let verdict = if v.accepted {
                        v.verdict.green()
                    } else {
                        v.verdict.yellow()
                    };
                    println!("{} {} {}", v.event_id, v.account, verdict);
                }
                let accounts: Vec<&str> = result.spoke_accounts.iter().map(|s| s.as_str()).collect();
                println!("{} {}", "Spoke accounts:".bold(), accounts.join(", "));
            }
        },
    }
    Ok(())
}
