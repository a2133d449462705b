mod cli;
mod ui;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use blockvoice::config::BlockvoiceConfig;
use blockvoice::dispatch;
use blockvoice::executor::{UnitExecutor, WorkerPool};
use blockvoice::job::UnitInput;
use blockvoice::lifecycle::LifecycleManager;
use blockvoice::runtime::Runtime;
use blockvoice::{Coordinator, logging};
use cli::{Cli, Command};
use ui::JobProgress;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Either a bare list of blocks or `{"blocks": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum BlocksFile {
    List(Vec<UnitInput>),
    Wrapped { blocks: Vec<UnitInput> },
}

fn read_blocks(path: &Path) -> Result<Vec<UnitInput>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let blocks = match serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?
    {
        BlocksFile::List(blocks) | BlocksFile::Wrapped { blocks } => blocks,
    };
    Ok(blocks)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = BlockvoiceConfig::load(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    let runtime = Runtime::from_config(&config)?;

    match cli.command {
        Command::Submit { file, output } => submit(runtime, &config, &file, output.as_deref()).await,
        Command::Status { job_id } => {
            let (coordinator, _rx) = offline(runtime, &config);
            ui::print_json(&coordinator.get_status(&job_id).await?);
            Ok(())
        }
        Command::Result { job_id } => {
            let (coordinator, _rx) = offline(runtime, &config);
            ui::print_json(&coordinator.get_result(&job_id).await?);
            Ok(())
        }
        Command::Audio {
            job_id,
            block,
            output,
        } => {
            let (coordinator, _rx) = offline(runtime, &config);
            let bytes = match block {
                Some(index) => coordinator.unit_audio(&job_id, index).await?,
                None => coordinator.composite_audio(&job_id).await?,
            };
            tokio::fs::write(&output, bytes)
                .await
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("{}", output.display());
            Ok(())
        }
        Command::Worker => worker(runtime, &config).await,
        Command::Sweep => {
            let report = LifecycleManager::new(runtime.clone()).sweep().await?;
            runtime.store.flush().await?;
            ui::print_json(&report);
            Ok(())
        }
        Command::Providers => {
            let (coordinator, _rx) = offline(runtime, &config);
            for provider in coordinator.list_providers() {
                println!("{provider}");
            }
            Ok(())
        }
        Command::Voices { provider } => {
            let (coordinator, _rx) = offline(runtime, &config);
            ui::print_json(&coordinator.list_voices(&provider)?);
            Ok(())
        }
    }
}

/// A coordinator for read-only commands; nothing is ever dispatched.
fn offline(runtime: Runtime, config: &BlockvoiceConfig) -> (Coordinator, dispatch::QueueReceiver) {
    let (tx, rx) = dispatch::channel(config.max_deliveries);
    (Coordinator::new(runtime, Arc::new(tx)), rx)
}

/// The in-process pipeline: a worker pool and the periodic sweep, both fed
/// by one coordinator.
struct Pipeline {
    coordinator: Coordinator,
    pool_tx: oneshot::Sender<()>,
    sweep_tx: oneshot::Sender<()>,
    pool: JoinHandle<blockvoice::Result<()>>,
    sweep: JoinHandle<()>,
}

impl Pipeline {
    fn start(runtime: Runtime, config: &BlockvoiceConfig) -> Self {
        let (tx, rx) = dispatch::channel(config.max_deliveries);
        let (pool_tx, pool_rx) = oneshot::channel();
        let (sweep_tx, sweep_rx) = oneshot::channel();

        let pool = WorkerPool::new(Arc::new(UnitExecutor::new(runtime.clone())), config.workers);
        let pool = tokio::spawn(pool.run(rx, pool_rx));
        let sweep = tokio::spawn(LifecycleManager::new(runtime.clone()).run(config.sweep_interval(), sweep_rx));

        Self {
            coordinator: Coordinator::new(runtime, Arc::new(tx)),
            pool_tx,
            sweep_tx,
            pool,
            sweep,
        }
    }

    /// Stop both tasks and wait for in-flight units.
    async fn stop(self) -> Result<Coordinator> {
        let _ = self.pool_tx.send(());
        let _ = self.sweep_tx.send(());
        self.pool.await??;
        self.sweep.await?;
        Ok(self.coordinator)
    }
}

async fn worker(runtime: Runtime, config: &BlockvoiceConfig) -> Result<()> {
    let pipeline = Pipeline::start(runtime, config);
    let report = pipeline.coordinator.resume().await?;
    info!(
        jobs = report.jobs.len(),
        redispatched = report.redispatched,
        assembled = report.assembled.len(),
        "resumed interrupted jobs"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    pipeline.stop().await?;
    Ok(())
}

async fn submit(
    runtime: Runtime,
    config: &BlockvoiceConfig,
    file: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let blocks = read_blocks(file)?;
    if runtime.synthesizer.providers().is_empty() {
        bail!("no TTS providers are configured");
    }

    let pipeline = Pipeline::start(runtime, config);
    let coordinator = &pipeline.coordinator;
    let job_id = coordinator.submit(blocks).await?;
    info!(job_id = %job_id, "job submitted");

    let initial = coordinator.get_status(&job_id).await?;
    let progress = JobProgress::start(&job_id, initial.unit_count);

    let finished = tokio::select! {
        report = coordinator.wait(&job_id, POLL_INTERVAL, |r| progress.update(r)) => Some(report?),
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %job_id, "interrupted, stopping workers");
            None
        }
    };
    let coordinator = pipeline.stop().await?;

    let Some(report) = finished else {
        println!("job {job_id} left unfinished; `blockvoice worker` resumes it");
        return Ok(());
    };
    progress.finish(&report);

    let result = coordinator.get_result(&job_id).await?;
    if let Some(path) = output {
        let bytes = coordinator.composite_audio(&job_id).await?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("{}", path.display());
    }
    ui::print_json(&result);
    Ok(())
}
