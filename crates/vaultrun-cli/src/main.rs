//! Vaultrun CLI
//!
//! A command-line tool for running queued computations against encrypted
//! datasets, backed by a JSON store snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;
use vaultrun::codec::{self, KeyMaterial};
use vaultrun::media;
use vaultrun::{
    Config, Dispatcher, EXAMPLE_CONFIG, IntervalTicker, MemoryStore, RunSource, RunStore,
    Scheduler,
};

#[derive(Parser)]
#[command(name = "vaultrun")]
#[command(about = "A tool for running analysis scripts against encrypted datasets")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: vaultrun.toml)
        #[arg(short, long, default_value = "vaultrun.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    ShowConfig,

    /// Generate key material for a new dataset owner
    Keygen,

    /// Encrypt a dataset file
    Encrypt {
        #[command(flatten)]
        key: KeyArgs,

        /// Plaintext input
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Ciphertext output (default: encrypt in place)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decrypt a dataset file
    Decrypt {
        #[command(flatten)]
        key: KeyArgs,

        /// Ciphertext input
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Plaintext output
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Queue a computation run
    Queue {
        #[command(flatten)]
        store: StoreArgs,

        /// Computation to run
        #[arg(long)]
        computation: u64,

        /// Run directly against this dataset
        #[arg(long, conflicts_with = "request", required_unless_present = "request")]
        dataset: Option<u64>,

        /// Run through this access request
        #[arg(long)]
        request: Option<u64>,

        /// User queueing the run
        #[arg(long)]
        runner: Option<u64>,

        /// Comma-separated column names
        #[arg(long, default_value = "")]
        variables: String,
    },

    /// Show a run as JSON
    Status {
        #[command(flatten)]
        store: StoreArgs,

        /// Run ID
        #[arg(long)]
        run: u64,
    },

    /// Process all pending runs once
    RunOnce {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Process pending runs on every scheduler tick until interrupted
    Serve {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Write a run's result image to a file
    ResultImage {
        #[command(flatten)]
        store: StoreArgs,

        /// Run ID
        #[arg(long)]
        run: u64,

        /// Output path
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(clap::Args)]
struct KeyArgs {
    /// Owner salt (16 bytes, hex)
    #[arg(long)]
    salt: String,

    /// Owner secure token (32 bytes, hex)
    #[arg(long)]
    token: String,
}

impl KeyArgs {
    fn key_material(&self) -> Result<KeyMaterial> {
        KeyMaterial::from_hex(&self.salt, &self.token).context("invalid key material")
    }
}

#[derive(clap::Args)]
struct StoreArgs {
    /// JSON store snapshot
    #[arg(short, long)]
    store: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
        Commands::Keygen => keygen(),
        Commands::Encrypt { key, input, output } => {
            let key = key.key_material()?;
            let output = output.unwrap_or_else(|| input.clone());
            codec::encrypt_file(&input, &output, &key)
                .await
                .context("failed to encrypt file")?;
            println!("Encrypted '{}' to '{}'", input.display(), output.display());
            Ok(())
        }
        Commands::Decrypt { key, input, output } => {
            let key = key.key_material()?;
            codec::decrypt_file(&input, &output, &key)
                .await
                .context("failed to decrypt file")?;
            println!("Decrypted '{}' to '{}'", input.display(), output.display());
            Ok(())
        }
        Commands::Queue {
            store,
            computation,
            dataset,
            request,
            runner,
            variables,
        } => {
            let source = match (request, dataset) {
                (Some(request), _) => RunSource::ViaRequest(request),
                (None, Some(dataset)) => RunSource::ViaDataset(dataset),
                (None, None) => anyhow::bail!("either --dataset or --request is required"),
            };
            queue_run(&config, &store.store, source, computation, runner, &variables).await
        }
        Commands::Status { store, run } => show_run(&config, &store.store, run).await,
        Commands::RunOnce { store } => run_once(config, &store.store).await,
        Commands::Serve { store } => serve(config, &store.store).await,
        Commands::ResultImage { store, run, output } => {
            write_result_image(&config, &store.store, run, &output).await
        }
    }
}

async fn load_store(config: &Config, path: &Path) -> Result<Arc<MemoryStore>> {
    let store = MemoryStore::load(path, config.data_dir.clone())
        .await
        .with_context(|| format!("failed to load store from '{}'", path.display()))?;
    Ok(Arc::new(store))
}

async fn save_store(store: &MemoryStore, path: &Path) -> Result<()> {
    store
        .save(path)
        .await
        .with_context(|| format!("failed to save store to '{}'", path.display()))
}

fn dispatcher(config: Config, store: &Arc<MemoryStore>) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(store.clone(), store.clone(), config))
}

async fn prepare_work_dir(config: &Config) -> Result<()> {
    tokio::fs::create_dir_all(config.working_copy_dir())
        .await
        .context("failed to create working copy directory")
}

async fn queue_run(
    config: &Config,
    path: &Path,
    source: RunSource,
    computation: u64,
    runner: Option<u64>,
    variables: &str,
) -> Result<()> {
    let store = load_store(config, path).await?;
    let run = store
        .create_run(source, computation, runner, variables)
        .await
        .context("run was not queued")?;
    save_store(&store, path).await?;

    println!("Queued run {}", run.id);
    Ok(())
}

async fn show_run(config: &Config, path: &Path, run_id: u64) -> Result<()> {
    let store = load_store(config, path).await?;
    let run = store.get(run_id).await.context("unknown run")?;
    let json = serde_json::to_string_pretty(&run).context("failed to serialize run")?;
    println!("{json}");
    Ok(())
}

async fn run_once(config: Config, path: &Path) -> Result<()> {
    prepare_work_dir(&config).await?;
    let store = load_store(&config, path).await?;

    let summary = dispatcher(config, &store)
        .dispatch_round()
        .await
        .context("dispatch round failed")?;
    save_store(&store, path).await?;

    println!(
        "Processed {} runs: {} succeeded, {} failed, {} requeued",
        summary.total(),
        summary.succeeded,
        summary.failed,
        summary.requeued
    );
    Ok(())
}

async fn serve(config: Config, path: &Path) -> Result<()> {
    prepare_work_dir(&config).await?;
    let store = load_store(&config, path).await?;

    let period = config.scheduler.tick_duration();
    info!(?period, "serving");
    let handle = Scheduler::new(dispatcher(config, &store)).start(IntervalTicker::new(period));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down, waiting for in-flight runs");

    let stats = handle.stop().await.context("scheduler task failed")?;
    save_store(&store, path).await?;

    info!(
        ticks = stats.ticks,
        rounds = stats.rounds,
        succeeded = stats.runs.succeeded,
        failed = stats.runs.failed,
        requeued = stats.runs.requeued,
        "scheduler stopped"
    );
    Ok(())
}

async fn write_result_image(config: &Config, path: &Path, run_id: u64, output: &Path) -> Result<()> {
    let store = load_store(config, path).await?;
    let run = store.get(run_id).await.context("unknown run")?;

    let image = media::load_result_image(&config.plot_dir, run.result_image.as_deref())
        .await
        .context("failed to load result image")?;
    tokio::fs::write(output, &image.bytes)
        .await
        .context("failed to write image")?;

    println!("{}", image.content_type);
    Ok(())
}

fn keygen() -> Result<()> {
    let (salt, secure_token) = KeyMaterial::generate().to_hex();
    let json = serde_json::json!({ "salt": salt, "secure_token": secure_token });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn show_config(config: &Config) {
    println!("Data directory: {}", config.data_dir.display());
    println!("Working copies: {}", config.working_copy_dir().display());
    println!("Plot directory: {}", config.plot_dir.display());
    println!();
    println!("Scheduler tick: {}s", config.scheduler.tick_interval);
    println!("Max concurrency: {}", config.dispatch.max_concurrency);
    println!("Max attempts: {}", config.dispatch.max_attempts);
    println!();
    println!("Default execution limits:");
    println!("  Timeout: {:?} s", config.execution.limits.timeout);
    println!("  Max output: {:?} KB", config.execution.limits.max_output);
    if let Some(ref dir) = config.execution.working_dir {
        println!("Script working directory: {}", dir.display());
    }
    if !config.execution.env.is_empty() {
        let mut keys: Vec<_> = config.execution.env.keys().collect();
        keys.sort();
        println!("Script environment: {}", keys.into_iter().cloned().collect::<Vec<_>>().join(", "));
    }
}

async fn init_config(output: &PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
