use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use spindle_core::app::QueueCounts;
use spindle_core::impls::SqliteTaskStore;
use spindle_core::{App, AppBuilder, QueueConfig, StopOutcome, Task, WorkerHandle};

mod functions;

#[derive(Parser, Debug)]
#[command(name = "spindle")]
#[command(version)]
#[command(about = "A minimal durable task queue backed by SQLite")]
#[command(propagate_version = true)]
struct Args {
    /// SQLite database file, locked by one spindle process at a time
    #[arg(long, global = true, env = "SPINDLE_DB", default_value = "tasks.db")]
    db: PathBuf,

    /// JSON file with queue configuration (missing fields keep defaults)
    #[arg(long, global = true, env = "SPINDLE_CONFIG")]
    config: Option<PathBuf>,

    /// Idle wait between polls, overrides the config file
    #[arg(long, global = true, env = "SPINDLE_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the worker, enqueue the sample tasks and print the final states
    Demo {
        /// Give up waiting for the sample tasks after this many seconds
        #[arg(long, default_value = "10")]
        wait_secs: u64,
    },

    /// Enqueue one task
    Submit {
        /// Registered function name
        function: String,

        /// Arguments as a JSON object, e.g. '{"a": 2, "b": 5}'
        #[arg(default_value = "{}")]
        arguments: String,
    },

    /// Run the worker until Ctrl-C
    Run,

    /// Print every task in submission order
    List {
        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref(), args.poll_interval_ms)?;
    let app = build_app(&args.db, config).await?;

    match args.command {
        Commands::Demo { wait_secs } => demo(&app, Duration::from_secs(wait_secs)).await,
        Commands::Submit {
            function,
            arguments,
        } => {
            let arguments: Value =
                serde_json::from_str(&arguments).context("arguments must be valid JSON")?;
            let id = app.queue().submit_value(&function, arguments).await?;
            println!("{id}");
            Ok(())
        }
        Commands::Run => run(&app).await,
        Commands::List { output } => {
            let tasks = app.queue().list_all().await?;
            match output {
                OutputFormat::Table => print_tasks(&tasks),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tasks)?),
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>, poll_interval_ms: Option<u64>) -> anyhow::Result<QueueConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            QueueConfig::from_json(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => QueueConfig::default(),
    };
    if let Some(ms) = poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    Ok(config)
}

async fn build_app(db: &Path, config: QueueConfig) -> anyhow::Result<App> {
    let store = SqliteTaskStore::open(db)
        .await
        .with_context(|| format!("failed to open task store {}", db.display()))?;
    let app = functions::register_all(AppBuilder::new())
        .with_store(store)
        .with_config(config)
        .build()?;
    Ok(app)
}

async fn demo(app: &App, wait: Duration) -> anyhow::Result<()> {
    let worker = app.start_worker()?;

    let mut submitted = Vec::new();
    for (function, arguments) in [
        ("add_numbers", json!({"a": 2, "b": 5})),
        ("say_hello", json!({"name": "Satti"})),
        ("add_numbers", json!({"a": 10, "b": 90})),
    ] {
        submitted.push(app.queue().submit_value(function, arguments).await?);
    }

    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let mut done = true;
        for id in &submitted {
            let finished = app
                .queue()
                .get(*id)
                .await?
                .is_some_and(|task| task.status.is_terminal());
            done &= finished;
        }
        if done {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(wait_secs = wait.as_secs(), "sample tasks did not finish in time");
            break;
        }
        tokio::time::sleep(app.config().poll_interval()).await;
    }

    println!("\nFINAL TASK STATES:");
    print_tasks(&app.queue().list_all().await?);

    stop_worker(app, worker).await?;
    println!("Done.");
    Ok(())
}

async fn run(app: &App) -> anyhow::Result<()> {
    let worker = app.start_worker()?;
    tracing::info!("worker running, press Ctrl-C to stop");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            tracing::info!("stop requested");
        }
        _ = wait_until_finished(&worker) => {}
    }

    stop_worker(app, worker).await
}

async fn wait_until_finished(worker: &WorkerHandle) {
    while !worker.is_finished() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

async fn stop_worker(app: &App, worker: WorkerHandle) -> anyhow::Result<()> {
    let timeout = app.config().stop_timeout();
    match worker.stop(timeout).await? {
        StopOutcome::Stopped => Ok(()),
        StopOutcome::TimedOut => bail!(
            "worker still busy after {} ms; its task will be marked FAILED on the next start",
            timeout.as_millis()
        ),
    }
}

fn print_tasks(tasks: &[Task]) {
    println!(
        "{:<26}  {:<14}  {:<8}  {}",
        "ID", "FUNCTION", "STATUS", "RESULT / ERROR"
    );
    for task in tasks {
        let detail = match (&task.result, &task.error) {
            (Some(result), _) => result.to_string(),
            (None, Some(error)) => format!("error: {error}"),
            (None, None) => String::new(),
        };
        println!(
            "{:<26}  {:<14}  {:<8}  {}",
            task.id.to_string(),
            task.function,
            task.status.as_str(),
            detail
        );
    }

    let counts = QueueCounts::from_tasks(tasks);
    println!(
        "\n{} tasks: {} pending, {} running, {} success, {} failed",
        counts.total(),
        counts.pending,
        counts.running,
        counts.success,
        counts.failed
    );
}
