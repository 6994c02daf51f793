// THEORY:
// The streaming front end of the engine. A single tokio task owns the
// `BackgroundPipeline` and consumes commands from a bounded channel, so the
// per-pixel ordering of the intake stream is exactly the channel order and no
// pipeline state is ever shared between tasks.
//
// Backpressure is end to end: when the accumulator store stalls, the worker
// stops draining commands, the bounded command queue fills, and `submit` awaits
// until there is room again. Nothing is dropped. Reports flow back through a
// second bounded channel exposed as a `futures::Stream`; rejected ticks travel
// the same stream as errors, so every failure reaches the consumer.
//
// The report channel only exists once the stream is taken. Until then the worker
// discards reports, so a stream nobody takes never stalls the command queue. A
// taken stream that is left unread does apply backpressure.
//
// Model snapshots of the whole grid are read in order by the worker and then
// derived in parallel, one `spawn_blocking` slice per CPU.

use crate::core_modules::accumulator::PixelAccumulator;
use crate::core_modules::model::{PixelModel, derive};
use crate::core_modules::sqrt_unit::SqrtStrategy;
use crate::error::{EngineError, EngineResult};
use crate::pipeline::{BackgroundPipeline, PixelReport, PixelTick};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const DEFAULT_QUEUE_DEPTH: usize = 64;

enum Command {
    Tick(PixelTick),
    Reset,
    Snapshot(oneshot::Sender<EngineResult<Vec<PixelModel>>>),
}

/// Stream of classified pixels (or rejected ticks) in intake order.
pub type ReportStream = BoxStream<'static, EngineResult<PixelReport>>;

type ReportSender = mpsc::Sender<EngineResult<PixelReport>>;

/// Cloneable producer side of a running `StreamingPipeline`.
#[derive(Clone)]
pub struct PipelineHandle {
    commands: mpsc::Sender<Command>,
}

impl PipelineHandle {
    /// Queues a tick, waiting while the pipeline is saturated.
    pub async fn submit(&self, tick: PixelTick) -> EngineResult<()> {
        self.send(Command::Tick(tick)).await
    }

    /// Queues a reset pulse behind every tick already submitted.
    pub async fn reset(&self) -> EngineResult<()> {
        self.send(Command::Reset).await
    }

    /// Models of every pixel, in raster order, as of all ticks submitted so far.
    pub async fn snapshot_models(&self) -> EngineResult<Vec<PixelModel>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        response.await.map_err(|_| EngineError::PipelineClosed)?
    }

    async fn send(&self, command: Command) -> EngineResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::PipelineClosed)
    }
}

/// A `BackgroundPipeline` running on its own task.
pub struct StreamingPipeline {
    handle: PipelineHandle,
    subscription: Option<oneshot::Sender<ReportSender>>,
    depth: usize,
    worker: JoinHandle<BackgroundPipeline>,
}

impl StreamingPipeline {
    pub fn spawn(pipeline: BackgroundPipeline) -> Self {
        Self::with_queue_depth(pipeline, DEFAULT_QUEUE_DEPTH)
    }

    /// Spawns the worker with bounded command and report queues of `depth` entries.
    pub fn with_queue_depth(pipeline: BackgroundPipeline, depth: usize) -> Self {
        let depth = depth.max(1);
        let (command_sender, command_receiver) = mpsc::channel(depth);
        let (subscription, subscriber) = oneshot::channel();
        let worker = tokio::spawn(Self::run(pipeline, command_receiver, subscriber));
        Self {
            handle: PipelineHandle {
                commands: command_sender,
            },
            subscription: Some(subscription),
            depth,
            worker,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Takes the report stream. It can be taken once, and carries the reports of
    /// every tick the worker processes after this call.
    pub fn take_reports(&mut self) -> EngineResult<ReportStream> {
        let subscription = self.subscription.take().ok_or(EngineError::PipelineClosed)?;
        let (sender, receiver) = mpsc::channel(self.depth);
        subscription
            .send(sender)
            .map_err(|_| EngineError::PipelineClosed)?;
        Ok(stream::unfold(receiver, |mut receiver| async move {
            let report = receiver.recv().await?;
            Some((report, receiver))
        })
        .boxed())
    }

    /// Stops accepting commands and returns the pipeline once every queued
    /// command is processed. Waits for outstanding `PipelineHandle` clones to drop.
    pub async fn finish(self) -> EngineResult<BackgroundPipeline> {
        drop(self.handle);
        self.worker.await.map_err(|_| EngineError::PipelineClosed)
    }

    async fn run(
        mut pipeline: BackgroundPipeline,
        mut commands: mpsc::Receiver<Command>,
        mut subscriber: oneshot::Receiver<ReportSender>,
    ) -> BackgroundPipeline {
        let mut reports: Option<ReportSender> = None;
        while let Some(command) = commands.recv().await {
            match command {
                Command::Tick(tick) => {
                    let outcome = match pipeline.process_tick_when_ready(&tick).await {
                        Ok(Some(report)) => Ok(report),
                        Ok(None) => continue,
                        Err(err) => {
                            tracing::warn!(row = tick.row, col = tick.col, error = %err, "tick rejected");
                            Err(err)
                        }
                    };
                    if reports.is_none() {
                        reports = subscriber.try_recv().ok();
                    }
                    match &reports {
                        Some(sender) => {
                            if sender.send(outcome).await.is_err() {
                                tracing::debug!("report stream dropped; discarding report");
                            }
                        }
                        None => tracing::trace!("report stream not taken; discarding report"),
                    }
                }
                Command::Reset => pipeline.reset(),
                Command::Snapshot(reply) => {
                    let snapshot = Self::snapshot(&mut pipeline).await;
                    if reply.send(snapshot).is_err() {
                        tracing::debug!("snapshot requester dropped; discarding models");
                    }
                }
            }
        }
        pipeline
    }

    async fn snapshot(pipeline: &mut BackgroundPipeline) -> EngineResult<Vec<PixelModel>> {
        let frame_count = pipeline.accumulator().model_frame_count()?;
        let records = pipeline.accumulator().read_all().await?;
        derive_models_parallel(records, frame_count, pipeline.sqrt()).await
    }
}

/// Derives a model per record, splitting the work across one blocking task per CPU.
pub async fn derive_models_parallel(
    records: Vec<PixelAccumulator>,
    frame_count: u32,
    sqrt: Arc<dyn SqrtStrategy>,
) -> EngineResult<Vec<PixelModel>> {
    let total = records.len();
    let workers = num_cpus::get().max(1);
    let slice_len = total.div_ceil(workers).max(1);
    tracing::debug!(pixels = total, workers, "deriving model snapshot");

    let tasks: Vec<JoinHandle<EngineResult<Vec<PixelModel>>>> = records
        .chunks(slice_len)
        .map(|slice| {
            let slice = slice.to_vec();
            let sqrt = Arc::clone(&sqrt);
            tokio::task::spawn_blocking(move || {
                slice
                    .iter()
                    .map(|record| derive(record, frame_count, sqrt.as_ref()))
                    .collect()
            })
        })
        .collect();

    let mut models = Vec::with_capacity(total);
    for result in futures::future::join_all(tasks).await {
        models.extend(result.map_err(|_| EngineError::PipelineClosed)??);
    }
    Ok(models)
}
