use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::SecondsFormat;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use tokio_util::sync::CancellationToken;

use bqprobe::client::ClientHandle;
use bqprobe::config::{self, BackendKind, Config};
use bqprobe::metadata;
use bqprobe::query::QueryService;
use bqprobe::scenarios::{self, ScenarioReport, ScenarioTimings};

const FALLBACK_PROJECT_ID: &str = "projectId";
const FALLBACK_CREDENTIALS: &str = "creds/creds.json";

/// Concurrent BigQuery job runner
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Run, stream and cancel BigQuery jobs concurrently over one shared client"
)]
struct Args {
    /// Project that runs the jobs
    #[arg(long, env = "PROJECT_ID")]
    project_id: Option<String>,

    /// Service-account key file
    #[arg(long, env = "SERVICE_ACCOUNT_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Authenticate with GOOGLE_APPLICATION_CREDENTIALS instead of a key file
    #[arg(long)]
    ambient: bool,

    /// Use the in-process simulated backend with the demo catalog
    #[arg(long)]
    simulated: bool,

    /// Job location
    #[arg(long)]
    location: Option<String>,

    /// Seconds the cancel scenarios let the long query run
    #[arg(long, default_value_t = 20)]
    cancel_after_secs: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Campaigns query, table listing, column listing, then the cancel test
    Demo,
    /// Run one query and log its rows
    Query {
        sql: String,
        /// Pause between rows, in milliseconds
        #[arg(long)]
        fetch_delay_ms: Option<u64>,
    },
    /// List datasets of a project (the configured one by default)
    Datasets { project: Option<String> },
    /// List tables of a dataset
    Tables { dataset: String },
    /// List columns of a table
    Columns { dataset: String, table: String },
    /// Start the long query and cancel it
    TestCancel,
    /// Short queries alongside a long one that is cancelled
    ThreadSafetyLong,
    /// Throttled many-row query alongside a burst of short ones
    ThreadSafetyShort,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_logging();

    let args = Args::parse();
    let config_result = config::load_config();
    if let Some(warning) = &config_result.warning {
        log::warn!("{}", warning);
    }
    let config = resolve_config(&args, config_result.config);
    let timings = ScenarioTimings {
        cancel_after: Duration::from_secs(args.cancel_after_secs),
        ..ScenarioTimings::default()
    };
    let command = args.command.unwrap_or(Command::Demo);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name_fn(worker_thread_name)
        .build()?;
    runtime.block_on(run(command, config, timings))
}

/// `bqprobe-worker-N`, numbered from 1 in spawn order
fn worker_thread_name() -> String {
    static NEXT_WORKER: AtomicUsize = AtomicUsize::new(1);
    format!("bqprobe-worker-{}", NEXT_WORKER.fetch_add(1, Ordering::Relaxed))
}

/// Timestamped, thread-tagged log lines on stderr; `RUST_LOG` overrides the level
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let thread = std::thread::current();
            writeln!(
                buf,
                "{} [{}] {} {}",
                chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                thread.name().unwrap_or("unnamed"),
                record.level(),
                record.args()
            )
        })
        .init();
}

/// Command line and environment win over the config file, then fallbacks
fn resolve_config(args: &Args, mut config: Config) -> Config {
    if args.simulated {
        config.client.backend = BackendKind::Simulated;
    }
    if let Some(location) = &args.location {
        config.client.location = location.clone();
    }

    config.client.project_id = args
        .project_id
        .clone()
        .or(config.client.project_id)
        .or_else(|| Some(FALLBACK_PROJECT_ID.to_string()));

    config.client.credentials = if args.ambient {
        None
    } else {
        args.credentials
            .clone()
            .or(config.client.credentials)
            .or_else(|| Some(PathBuf::from(FALLBACK_CREDENTIALS)))
    };
    config
}

async fn run(command: Command, config: Config, timings: ScenarioTimings) -> Result<()> {
    let client = ClientHandle::connect(&config.client, &config.query)
        .wrap_err("Failed to create BigQuery client")?;
    if let Some(sim) = client.as_simulated() {
        scenarios::seed_demo(sim, client.project_id());
    }
    let client = Arc::new(client);
    log::info!(
        "Using {} backend for project {}",
        client.backend().name(),
        client.project_id()
    );

    let interrupt = CancellationToken::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupt received, abandoning running waits");
                interrupt.cancel();
            }
        });
    }

    let service = QueryService::new(Arc::clone(&client), &config.query, config.client.location.clone())
        .with_interrupt(interrupt);
    let page_size = config.listing.page_size;

    let report: Option<ScenarioReport> = match command {
        Command::Demo => Some(scenarios::demo(&service, page_size, &timings).await),
        Command::Query { sql, fetch_delay_ms } => {
            let job_id = service.new_job_id();
            service
                .executor()
                .run(&sql, job_id, fetch_delay_ms.map(Duration::from_millis))
                .await;
            None
        }
        Command::Datasets { project } => {
            metadata::list_datasets(&client, project.as_deref(), page_size).await;
            None
        }
        Command::Tables { dataset } => {
            metadata::list_tables(&client, &dataset, page_size).await;
            None
        }
        Command::Columns { dataset, table } => {
            metadata::list_table_columns(&client, &dataset, &table).await;
            None
        }
        Command::TestCancel => Some(scenarios::test_cancel(&service, &timings).await),
        Command::ThreadSafetyLong => Some(scenarios::thread_safety_long(&service, &timings).await),
        Command::ThreadSafetyShort => Some(scenarios::thread_safety_short(&service, &timings).await),
    };

    if let Some(report) = report {
        report.log_summary();
    }
    Ok(())
}
