//! Render graph executor
//!
//! One [`FrameExecutor`] drives a single `execute` call:
//!
//! ```text
//! Begin: reclaim command lists, record prologue barriers
//! Level i:  record every pass in parallel
//!           async queues: wait(graphics sync) -> submit -> signal
//!           graphics queue: submit
//! Sync i:   graphics waits on async fences (per wait flags)
//!           -> barrier command list -> signal = new graphics sync
//! End:      the last graphics signal is the completion fence
//! Failure:  lists already submitted retire under a fresh graphics signal
//! ```

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{RenderGraphError, RenderGraphResult};
use crate::render_graph::compiled::{CompiledGraph, GraphCompletion};
use crate::render_graph::pass::{PassContext, PassId};
use crate::render_graph::resolver::DependencyLevel;
use crate::render_graph::sync::{LayoutTransition, SyncPoint};

pub(crate) struct FrameExecutor<'g> {
    graph: &'g CompiledGraph,
    frame_index: u64,
    /// Every list submitted this frame, retired under the completion fence.
    submitted: Vec<Box<dyn CommandList>>,
    /// Latest graphics fence; async submissions wait on it.
    graphics_sync: Option<FenceValue>,
    /// Async signals the graphics queue has not waited on yet.
    pending_async: [Option<FenceValue>; QueueType::COUNT],
}

impl<'g> FrameExecutor<'g> {
    pub(crate) fn new(graph: &'g CompiledGraph, frame_index: u64) -> Self {
        Self {
            graph,
            frame_index,
            submitted: Vec::new(),
            graphics_sync: None,
            pending_async: [None; QueueType::COUNT],
        }
    }

    pub(crate) fn run(mut self) -> RenderGraphResult<GraphCompletion> {
        let graph = self.graph;
        let graphics = graph.device.queue(QueueType::Graphics);
        graph.pool.reclaim(graphics.completed_value());

        log::trace!(
            "Render graph '{}': executing frame {} ({} levels)",
            graph.config.label,
            self.frame_index,
            graph.levels().len()
        );

        match self.run_levels() {
            Ok(fence) => {
                self.retire(fence);
                log::trace!(
                    "Render graph '{}': frame {} completes at {:?}",
                    graph.config.label,
                    self.frame_index,
                    fence
                );
                Ok(GraphCompletion::new(fence, graph.device.clone()))
            }
            Err(err) => {
                self.abandon();
                Err(err)
            }
        }
    }

    /// Submit the prologue and every level. Returns the completion fence.
    fn run_levels(&mut self) -> RenderGraphResult<FenceValue> {
        let graph = self.graph;
        let graphics = graph.device.queue(QueueType::Graphics);

        if !graph.sync.prologue.is_empty() {
            self.submit_barriers(&graph.sync.prologue)?;
            self.graphics_sync = Some(graphics.signal()?);
        }

        for (index, level) in graph.levels().iter().enumerate() {
            self.dispatch_level(level)?;
            let point = graph.sync.between.get(index).unwrap_or(&graph.sync.terminal);
            self.synchronize(point)?;
        }

        match self.graphics_sync {
            Some(fence) => Ok(fence),
            None => Ok(graphics.signal()?),
        }
    }

    /// Hand every submitted list back to the pool under `fence` and make
    /// `fence` the one the graph waits on before releasing resources.
    fn retire(&mut self, fence: FenceValue) {
        let graph = self.graph;
        graph
            .pool
            .retire(fence.value, std::mem::take(&mut self.submitted));
        *graph.last_completion.lock() = Some(fence);
    }

    /// Fence the lists a failed frame already submitted, so they are neither
    /// reused nor released while the GPU may still read them.
    fn abandon(&mut self) {
        if self.submitted.is_empty() {
            return;
        }

        let graph = self.graph;
        let graphics = graph.device.queue(QueueType::Graphics);
        let fenced = self
            .pending_async
            .iter()
            .flatten()
            .try_for_each(|&fence| graphics.wait(fence))
            .and_then(|()| graphics.signal());

        match fenced {
            Ok(fence) => {
                log::debug!(
                    "Render graph '{}': frame {} failed, {} submitted command lists retire at {:?}",
                    graph.config.label,
                    self.frame_index,
                    self.submitted.len(),
                    fence
                );
                self.retire(fence);
            }
            Err(err) => log::error!(
                "Render graph '{}': cannot fence command lists of failed frame {}: {err}",
                graph.config.label,
                self.frame_index
            ),
        }
    }

    /// Record all passes of `level` and submit one batch per queue.
    fn dispatch_level(&mut self, level: &DependencyLevel) -> RenderGraphResult<()> {
        let graph = self.graph;
        let frame_index = self.frame_index;

        let recorded = graph
            .threads
            .map(level.all_passes(), |&pass| record_pass(graph, frame_index, pass));

        let mut batches: [Vec<Box<dyn CommandList>>; QueueType::COUNT] = Default::default();
        for (&pass, lists) in level.all_passes().iter().zip(recorded) {
            batches[graph.nodes[pass.index()].queue.index()].extend(lists?);
        }

        for queue in QueueType::ALL {
            let batch = std::mem::take(&mut batches[queue.index()]);
            if batch.is_empty() {
                continue;
            }

            let gpu_queue = graph.device.queue(queue);
            if queue.is_async() {
                if let Some(fence) = self.graphics_sync {
                    gpu_queue.wait(fence)?;
                }
            }

            log::trace!(
                "Render graph: level {} submits {} command lists to {:?}",
                level.level(),
                batch.len(),
                queue
            );
            gpu_queue.submit(&batch)?;
            self.submitted.extend(batch);
            if queue.is_async() {
                self.pending_async[queue.index()] = Some(gpu_queue.signal()?);
            }
        }

        Ok(())
    }

    fn synchronize(&mut self, point: &SyncPoint) -> RenderGraphResult<()> {
        let graphics = self.graph.device.queue(QueueType::Graphics);

        for queue in [QueueType::AsyncCompute, QueueType::AsyncCopy] {
            if !point.waits_on(queue) {
                continue;
            }
            if let Some(fence) = self.pending_async[queue.index()].take() {
                graphics.wait(fence)?;
            }
        }

        if !point.layout_transitions.is_empty() {
            self.submit_barriers(&point.layout_transitions)?;
        }
        self.graphics_sync = Some(graphics.signal()?);
        Ok(())
    }

    /// Record `transitions` into a dedicated list and submit it on the graphics queue.
    fn submit_barriers(&mut self, transitions: &[LayoutTransition]) -> RenderGraphResult<()> {
        let graph = self.graph;
        let barriers: Vec<TextureBarrier> = transitions
            .iter()
            .map(|transition| TextureBarrier {
                texture: graph
                    .resources
                    .texture_at(transition.resource, self.frame_index),
                subresource: transition.subresource,
                before: transition.before,
                after: transition.after,
            })
            .collect();

        let mut list = graph
            .pool
            .acquire(graph.device.as_ref(), QueueType::Graphics)?;
        list.record_barriers(&barriers);
        list.close();

        let batch = vec![list];
        graph.device.queue(QueueType::Graphics).submit(&batch)?;
        self.submitted.extend(batch);
        Ok(())
    }
}

/// Run one pass's `execute` and return its closed command lists.
fn record_pass(
    graph: &CompiledGraph,
    frame_index: u64,
    pass: PassId,
) -> RenderGraphResult<Vec<Box<dyn CommandList>>> {
    let node = &graph.nodes[pass.index()];
    let ctx = PassContext {
        frame_index,
        queue: node.queue,
        resources: &graph.resources,
        device: graph.device.as_ref(),
        pool: &graph.pool,
        threads: &graph.threads,
    };

    let failed = |source| RenderGraphError::PassFailed {
        pass: node.name.clone(),
        source,
    };

    let mut lists = Vec::new();
    graph.passes[pass.index()]
        .execute(&ctx, &mut lists)
        .map_err(failed)?;

    for list in &mut lists {
        if list.queue_type() != node.queue {
            return Err(failed(BackendError::InvalidHandle(format!(
                "{:?} command list produced for a {:?} pass",
                list.queue_type(),
                node.queue
            ))));
        }
        if list.is_open() {
            list.close();
        }
    }
    Ok(lists)
}
