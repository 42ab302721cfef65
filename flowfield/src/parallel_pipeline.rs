// THEORY:
// The parallel pipeline produces exactly the same reports as `FlowPipeline`, but
// fans the per-zone estimation out over a pool of Tokio worker tasks.
//
// Zone estimates are independent of each other within a tick: every worker only
// reads the two frames and its own slice of the zone list. So a tick is split
// into contiguous zone ranges, one `ZoneTask` per range. A dispatcher hands the
// tasks to the workers round-robin, every task answers on its own oneshot channel,
// and the answers are stitched back together in range order. Rendering and the
// frame swap stay on the caller's side, after every range has come back, which is
// what keeps the output identical to the sequential path.

use crate::core_modules::flow_estimator::{FlowVector, OutlierRule, estimate_zones};
use crate::core_modules::frame::FrameBuffer;
use crate::core_modules::zone_grid::SampleZone;
use crate::error::{ConfigError, FlowError};
use crate::pipeline::{FlowConfig, Report, TickState};
use futures::future::try_join_all;
use image::RgbaImage;
use log::debug;
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// One contiguous run of zones to estimate for a single tick.
pub struct ZoneTask {
    pub previous: Arc<FrameBuffer>,
    pub current: Arc<FrameBuffer>,
    pub zones: Arc<[SampleZone]>,
    pub range: Range<usize>,
    pub quality: u32,
    pub rule: OutlierRule,
    pub result_sender: oneshot::Sender<Vec<FlowVector>>,
}

impl ZoneTask {
    fn run(self) {
        let vectors = estimate_zones(
            &self.previous,
            &self.current,
            &self.zones[self.range],
            self.quality,
            self.rule,
        );
        // The receiver is gone only if the tick was abandoned.
        let _ = self.result_sender.send(vectors);
    }
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<ZoneTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers plus a dispatcher. Must be called from within a Tokio runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<ZoneTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel::<ZoneTask>()).unzip();

        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % size;
            }
        });

        let workers = worker_receivers
            .into_iter()
            .map(|mut worker_receiver| {
                tokio::spawn(async move {
                    while let Some(task) = worker_receiver.recv().await {
                        task.run();
                    }
                })
            })
            .collect();

        debug!("worker pool started with {size} workers");
        Self { task_sender, workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queues a task for the next worker in line. The result arrives on the task's own sender.
    pub fn submit(&self, task: ZoneTask) -> Result<(), FlowError> {
        self.task_sender.send(task).map_err(|_| FlowError::WorkerUnavailable)
    }

    /// Estimates `zones` between two frames, split into one range per worker.
    /// Output slot `i` belongs to `zones[i]`, as with `estimate_zones`.
    pub async fn estimate(
        &self,
        previous: Arc<FrameBuffer>,
        current: Arc<FrameBuffer>,
        zones: Arc<[SampleZone]>,
        quality: u32,
        rule: OutlierRule,
    ) -> Result<Vec<FlowVector>, FlowError> {
        let chunk = zones.len().div_ceil(self.size()).max(1);
        let mut pending = Vec::with_capacity(self.size());

        for start in (0..zones.len()).step_by(chunk) {
            let (result_sender, result_receiver) = oneshot::channel();
            self.submit(ZoneTask {
                previous: Arc::clone(&previous),
                current: Arc::clone(&current),
                zones: Arc::clone(&zones),
                range: start..(start + chunk).min(zones.len()),
                quality,
                rule,
                result_sender,
            })?;
            pending.push(async move { result_receiver.await.map_err(|_| FlowError::WorkerDropped) });
        }

        let parts = try_join_all(pending).await?;
        Ok(parts.into_iter().flatten().collect())
    }
}

/// A `FlowPipeline` whose zone estimation runs on a `WorkerPool`.
pub struct ParallelPipeline {
    state: TickState,
    worker_pool: WorkerPool,
    zones: Option<Arc<[SampleZone]>>,
}

impl ParallelPipeline {
    /// Builds the pipeline and its pool. Must be called from within a Tokio runtime.
    pub fn new(config: FlowConfig, workers: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            state: TickState::new(config)?,
            worker_pool: WorkerPool::new(workers),
            zones: None,
        })
    }

    /// One worker per logical CPU.
    pub fn with_default_workers(config: FlowConfig) -> Result<Self, ConfigError> {
        Self::new(config, num_cpus::get())
    }

    pub fn set_config(&mut self, config: FlowConfig) -> Result<(), ConfigError> {
        self.state.set_config(config)
    }

    /// Same contract as `FlowPipeline::process_frame`. A worker failure abandons the tick,
    /// but the frame is still kept as the next previous frame.
    pub async fn process_frame(&mut self, frame: FrameBuffer) -> Result<Report, FlowError> {
        let current = Arc::new(frame);
        let Some(plan) = self.state.begin(&current) else {
            return Ok(self.state.warm_up(current));
        };

        let zones: Arc<[SampleZone]> = match self.zones.take() {
            Some(zones) if !plan.grid_regenerated => zones,
            _ => Arc::from(self.state.zones()),
        };
        self.zones = Some(Arc::clone(&zones));

        let estimated = self
            .worker_pool
            .estimate(
                Arc::clone(&plan.previous),
                Arc::clone(&current),
                zones,
                plan.config.quality,
                plan.config.outlier_rule,
            )
            .await;

        match estimated {
            Ok(vectors) => Ok(self.state.finish(current, plan, vectors)),
            Err(e) => {
                self.state.store(current);
                Err(e)
            }
        }
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }

    pub fn config(&self) -> &FlowConfig {
        self.state.config()
    }

    pub fn canvas(&self) -> &RgbaImage {
        self.state.canvas()
    }

    pub fn zone_count(&self) -> usize {
        self.state.zone_count()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_pool.size()
    }
}
