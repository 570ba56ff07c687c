//! Pipeline orchestrator: wires stages together over bounded queues and
//! turns the shared run state into a verdict.
//!
//! The extract stage, and in table mode the transform stage, each run on
//! their own blocking-pool thread with a private current-thread runtime. The
//! load loop runs on the caller's task. Stages talk only through the queues
//! and the [`RunState`]; a failing stage records its first error, ends
//! itself, and leaves the siblings to notice through flags or closed queues.

use std::future::Future;
use std::time::Instant;

use blockline_connectors::registry::{build_extractor, build_loader, file_codec};
use blockline_connectors::{Extractor, FileCodec, Loader, RenderContext};
use blockline_types::{ConnectorError, DataBlock, InitMetadata, Payload, PipelineConfig, TransferMode};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::config::validator::{validate_pipeline, validate_stages};
use crate::error::{PipelineError, StageFailure};
use crate::queue::{self, BlockReceiver, BlockSender, Polled};
use crate::result::{CheckReport, RunReport};
use crate::state::{RunState, Stage};
use crate::transform::Transformer;

/// Failure inside a stage body. Connector errors belong to the stage; state
/// errors are host-side and abort the run.
#[derive(Debug)]
enum WorkerError {
    Connector(ConnectorError),
    State(PipelineError),
}

impl From<ConnectorError> for WorkerError {
    fn from(e: ConnectorError) -> Self {
        Self::Connector(e)
    }
}

impl From<PipelineError> for WorkerError {
    fn from(e: PipelineError) -> Self {
        Self::State(e)
    }
}

/// Ends a stage however its worker leaves. Unless disarmed, the exit is
/// recorded as that stage's failure.
struct StageGuard {
    stage: Stage,
    state: RunState,
    armed: bool,
}

impl StageGuard {
    fn new(stage: Stage, state: RunState) -> Self {
        Self {
            stage,
            state,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let outcome = if self.armed {
            self.state
                .record_failure(self.stage, "stage worker exited abnormally")
                .map(|_| ())
        } else {
            self.state.mark_end(self.stage)
        };
        if let Err(e) = outcome {
            tracing::error!(stage = %self.stage, "Failed to end stage: {}", e);
        }
    }
}

/// A pipeline ready to run: configuration plus the stages built from it.
pub struct Pipeline {
    config: PipelineConfig,
    run_name: String,
    extractor: Box<dyn Extractor>,
    loader: Box<dyn Loader>,
    codec: Option<FileCodec>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("run_name", &self.run_name)
            .field("transfer_mode", &self.config.transfer_mode)
            .field("extractor", &self.extractor.type_tag())
            .field("loader", &self.loader.type_tag())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Validate `config` and build its stages through the registry. No
    /// external system is contacted.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if validation or stage construction
    /// fails, including an extractor or loader that cannot run in copy-file
    /// mode.
    pub fn new(
        config: PipelineConfig,
        run_name: impl Into<String>,
        execution_time: Option<DateTime<Utc>>,
    ) -> Result<Self, PipelineError> {
        validate_pipeline(&config).map_err(PipelineError::Config)?;
        Self::build(config, run_name.into(), execution_time)
    }

    /// Pipeline over stages built by the caller.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if `config` is invalid or the stages
    /// cannot run in its transfer mode.
    pub fn with_stages(
        config: PipelineConfig,
        run_name: impl Into<String>,
        extractor: Box<dyn Extractor>,
        loader: Box<dyn Loader>,
        codec: Option<FileCodec>,
    ) -> Result<Self, PipelineError> {
        validate_pipeline(&config).map_err(PipelineError::Config)?;
        Self::assemble(config, run_name.into(), extractor, loader, codec)
    }

    /// Build the registry stages for an already validated `config`.
    fn build(
        config: PipelineConfig,
        run_name: String,
        execution_time: Option<DateTime<Utc>>,
    ) -> Result<Self, PipelineError> {
        let ctx = execution_time.map_or_else(RenderContext::default, RenderContext::at);
        let extractor = build_extractor(&config.ext_config, &ctx).map_err(PipelineError::Config)?;
        let loader = build_loader(&config.loader_config, &ctx).map_err(PipelineError::Config)?;
        let codec = file_codec(&config.ext_config);
        Self::assemble(config, run_name, extractor, loader, codec)
    }

    fn assemble(
        config: PipelineConfig,
        run_name: String,
        extractor: Box<dyn Extractor>,
        loader: Box<dyn Loader>,
        codec: Option<FileCodec>,
    ) -> Result<Self, PipelineError> {
        validate_stages(&config, extractor.as_ref(), loader.as_ref()).map_err(PipelineError::Config)?;
        Ok(Self {
            config,
            run_name,
            extractor,
            loader,
            codec,
        })
    }

    /// Whether blocks pass through a transform worker on their way to the
    /// loader.
    #[must_use]
    pub fn has_transform_stage(&self) -> bool {
        self.config.transfer_mode == TransferMode::Table
            && (self.config.has_table_operations() || self.codec.is_some())
    }

    /// Stages this pipeline runs, in order.
    #[must_use]
    pub fn stages(&self) -> Vec<Stage> {
        if self.has_transform_stage() {
            vec![Stage::Extract, Stage::Transform, Stage::Load]
        } else {
            vec![Stage::Extract, Stage::Load]
        }
    }

    /// Run every stage to completion.
    ///
    /// # Errors
    ///
    /// Returns `StageFailed` naming each stage that recorded an error, or
    /// `Infrastructure` if a worker could not be run or joined.
    pub async fn run(self) -> Result<RunReport, PipelineError> {
        let start = Instant::now();
        let transform_stage = self.has_transform_stage();
        let Self {
            config,
            run_name,
            extractor,
            loader,
            codec,
        } = self;

        let capacity = config.resources.queue_capacity;
        let poll_interval = config.resources.poll_interval();
        let init = config.init_metadata(&run_name);
        let state = RunState::new();

        tracing::info!(
            pipeline = %run_name,
            transfer_mode = %config.transfer_mode,
            extractor = extractor.type_tag(),
            loader = loader.type_tag(),
            transform = transform_stage,
            queue_capacity = capacity,
            "Starting pipeline run"
        );

        let (ext_tx, ext_rx) = queue::channel(capacity, poll_interval);
        let extract_task = spawn_stage(Stage::Extract, state.clone(), &run_name, {
            let state = state.clone();
            move || extract_stage(extractor, init, ext_tx, state)
        });

        let (transform_task, load_rx, upstream) = if transform_stage {
            let (load_tx, load_rx) = queue::channel(capacity, poll_interval);
            let transformer = Transformer::new(&config, codec);
            let task = spawn_stage(Stage::Transform, state.clone(), &run_name, {
                let state = state.clone();
                move || transform_stage_body(transformer, ext_rx, load_tx, state)
            });
            (Some(task), load_rx, vec![Stage::Extract, Stage::Transform])
        } else {
            (None, ext_rx, vec![Stage::Extract])
        };

        let loaded = load_stage(loader, load_rx, &state, &upstream, &run_name).await;

        let mut exits = vec![(Stage::Extract, extract_task.await)];
        if let Some(task) = transform_task {
            exits.push((Stage::Transform, task.await));
        }

        let mut blocks_extracted = 0;
        let mut blocks_transformed = 0;
        let mut infrastructure: Option<PipelineError> = None;
        for (stage, exit) in exits {
            match exit {
                Ok(Ok(count)) => match stage {
                    Stage::Extract => blocks_extracted = count,
                    Stage::Transform => blocks_transformed = count,
                    Stage::Load => {}
                },
                // The message is already in the run state.
                Ok(Err(PipelineError::StageFailed { .. })) => {}
                Ok(Err(e)) => {
                    tracing::error!(stage = %stage, "Stage worker failed: {}", e);
                    infrastructure.get_or_insert(e);
                }
                Err(join_err) => {
                    tracing::error!(stage = %stage, "Stage worker panicked: {}", join_err);
                    infrastructure.get_or_insert(PipelineError::Infrastructure(anyhow::anyhow!(
                        "{stage} worker task panicked: {join_err}"
                    )));
                }
            }
        }
        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(e) => return Err(infrastructure.unwrap_or(e)),
        };

        let snapshot = state.snapshot()?;
        let failures: Vec<StageFailure> = [Stage::Extract, Stage::Transform, Stage::Load]
            .into_iter()
            .filter_map(|stage| {
                snapshot.error_message(stage).map(|message| StageFailure {
                    stage,
                    message: message.to_string(),
                })
            })
            .collect();
        let duration_secs = start.elapsed().as_secs_f64();

        if !failures.is_empty() {
            let err = PipelineError::StageFailed { failures };
            tracing::error!(pipeline = %run_name, duration_secs, "Pipeline failed: {}", err);
            return Err(err);
        }
        if let Some(err) = infrastructure {
            return Err(err);
        }

        let report = RunReport {
            run_name,
            transfer_mode: config.transfer_mode,
            blocks_extracted,
            blocks_transformed,
            blocks_loaded: loaded.blocks,
            rows_loaded: loaded.rows,
            bytes_loaded: loaded.bytes,
            duration_secs,
        };
        tracing::info!(
            pipeline = %report.run_name,
            blocks = report.blocks_loaded,
            rows = report.rows_loaded,
            bytes = report.bytes_loaded,
            duration_secs,
            "Pipeline run completed"
        );
        Ok(report)
    }
}

/// Build, validate and run a pipeline.
///
/// Without `execution_time`, templates render their wildcard.
///
/// # Errors
///
/// See [`Pipeline::new`] and [`Pipeline::run`].
pub async fn run_pipeline(
    config: &PipelineConfig,
    run_name: &str,
    execution_time: Option<DateTime<Utc>>,
) -> Result<RunReport, PipelineError> {
    Pipeline::new(config.clone(), run_name, execution_time)?.run().await
}

/// Validate a pipeline and describe the run it would perform.
///
/// # Errors
///
/// Returns `PipelineError::Config` for anything [`Pipeline::new`] rejects.
pub fn check_pipeline(config: &PipelineConfig, run_name: &str) -> Result<CheckReport, PipelineError> {
    let warnings = validate_pipeline(config).map_err(PipelineError::Config)?;
    let pipeline = Pipeline::build(config.clone(), run_name.to_string(), None)?;
    Ok(CheckReport {
        run_name: pipeline.run_name.clone(),
        transfer_mode: pipeline.config.transfer_mode,
        extractor: pipeline.extractor.type_tag(),
        loader: pipeline.loader.type_tag(),
        stages: pipeline.stages(),
        warnings,
    })
}

/// Run `body` on a blocking-pool thread with its own runtime.
///
/// The join result plays the part of an exit code: `Ok(Ok(n))` is a clean
/// exit after forwarding `n` blocks, anything else is a non-zero exit.
fn spawn_stage<F, Fut>(
    stage: Stage,
    state: RunState,
    run_name: &str,
    body: F,
) -> JoinHandle<Result<u64, PipelineError>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<u64, WorkerError>>,
{
    let run_name = run_name.to_string();
    tokio::task::spawn_blocking(move || {
        let mut guard = StageGuard::new(stage, state.clone());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                PipelineError::Infrastructure(anyhow::anyhow!("failed to build {stage} runtime: {e}"))
            })?;

        tracing::info!(pipeline = %run_name, stage = %stage, "Stage worker started");
        match runtime.block_on(body()) {
            Ok(blocks) => {
                guard.disarm();
                tracing::info!(pipeline = %run_name, stage = %stage, blocks, "Stage worker finished");
                Ok(blocks)
            }
            Err(WorkerError::Connector(e)) => {
                let message = e.to_string();
                tracing::error!(pipeline = %run_name, stage = %stage, "Stage failed: {}", message);
                state.record_failure(stage, message.clone())?;
                guard.disarm();
                Err(PipelineError::StageFailed {
                    failures: vec![StageFailure { stage, message }],
                })
            }
            Err(WorkerError::State(e)) => Err(e),
        }
    })
}

/// Pull batches until the extractor emits its terminal block or the load
/// stage has ended.
async fn extract_stage(
    mut extractor: Box<dyn Extractor>,
    init: InitMetadata,
    tx: BlockSender,
    state: RunState,
) -> Result<u64, WorkerError> {
    let mut forwarded = 0u64;
    while !state.is_end(Stage::Load)? {
        let blocks = extractor.extract(&init).await?;
        if let Some(pos) = blocks.iter().position(|b| b.is_end) {
            if pos + 1 != blocks.len() {
                return Err(ConnectorError::extract(format!(
                    "{} extractor returned {} block(s) after its terminal block",
                    extractor.type_tag(),
                    blocks.len() - pos - 1
                ))
                .into());
            }
        }

        for block in blocks {
            let is_end = block.is_end;
            if tx.send(block).await.is_err() {
                tracing::info!(stage = %Stage::Extract, "Downstream queue closed, stopping");
                return Ok(forwarded);
            }
            forwarded += 1;
            tracing::debug!(
                stage = %Stage::Extract,
                blocks = forwarded,
                queued = tx.occupancy(),
                "Block forwarded"
            );
            if is_end {
                return Ok(forwarded);
            }
        }
    }
    Ok(forwarded)
}

/// Transform blocks until the terminal block is forwarded or there is
/// nothing left to wait for.
async fn transform_stage_body(
    transformer: Transformer,
    mut rx: BlockReceiver,
    tx: BlockSender,
    state: RunState,
) -> Result<u64, WorkerError> {
    let mut forwarded = 0u64;
    loop {
        let block = match rx.poll().await {
            Polled::Block(block) => block,
            Polled::Closed => break,
            Polled::Empty => {
                if state.is_end(Stage::Load)? {
                    break;
                }
                if !state.is_end(Stage::Extract)? {
                    tracing::debug!(stage = %Stage::Transform, "Waiting on empty queue");
                    continue;
                }
                match rx.try_take() {
                    Some(block) => block,
                    None => break,
                }
            }
        };

        let is_end = block.is_end;
        let out = transformer.transform(block).await?;
        if tx.send(out).await.is_err() {
            tracing::info!(stage = %Stage::Transform, "Downstream queue closed, stopping");
            break;
        }
        forwarded += 1;
        if is_end {
            break;
        }
    }
    Ok(forwarded)
}

#[derive(Debug, Default)]
struct Loaded {
    blocks: u64,
    rows: u64,
    bytes: u64,
}

/// Push blocks to the loader on the caller's task. A push failure is
/// recorded as the load stage's error; only state failures are returned.
async fn load_stage(
    mut loader: Box<dyn Loader>,
    mut rx: BlockReceiver,
    state: &RunState,
    upstream: &[Stage],
    run_name: &str,
) -> Result<Loaded, PipelineError> {
    let mut loaded = Loaded::default();
    tracing::info!(pipeline = %run_name, stage = %Stage::Load, "Load loop started");
    loop {
        let block = match rx.poll().await {
            Polled::Block(block) => block,
            Polled::Closed => break,
            Polled::Empty => {
                if !state.all_ended(upstream)? {
                    tracing::debug!(stage = %Stage::Load, "Waiting on empty queue");
                    continue;
                }
                match rx.try_take() {
                    Some(block) => block,
                    None => break,
                }
            }
        };

        if let Err(e) = loader.push(&block).await {
            let message = e.to_string();
            tracing::error!(pipeline = %run_name, stage = %Stage::Load, "Stage failed: {}", message);
            state.record_failure(Stage::Load, message)?;
            return Ok(loaded);
        }
        loaded.blocks += 1;
        tally(&mut loaded, &block);
        if block.is_end {
            break;
        }
    }
    state.mark_end(Stage::Load)?;
    tracing::info!(
        pipeline = %run_name,
        stage = %Stage::Load,
        blocks = loaded.blocks,
        rows = loaded.rows,
        "Load loop finished"
    );
    Ok(loaded)
}

fn tally(loaded: &mut Loaded, block: &DataBlock) {
    match &block.data {
        Payload::Table(batch) => loaded.rows += batch.num_rows() as u64,
        Payload::Files(_) => loaded.bytes += block.data.byte_len() as u64,
    }
}
