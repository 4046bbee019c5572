//! Common utilities for render graph integration tests.
//!
//! Provides a configurable [`TestPass`] that records labelled markers into
//! dummy command lists, plus helpers to pick apart the dummy device's event log.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use render_graph::backend::dummy::{DummyCommand, DummyCommandList, DummyDevice, DummyEvent};
use render_graph::{
    BackendError, BackendResult, CommandList, GraphBuilder, PassBuilder, PassContext, PassId,
    QueueType, RenderGraphConfig, RenderPass, ResourceHandle, TextureBarrier, TextureDescriptor,
    TextureLayout,
};

/// Initialize test logging once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn device() -> Arc<DummyDevice> {
    init_logging();
    Arc::new(DummyDevice::new())
}

pub fn builder(device: &Arc<DummyDevice>) -> GraphBuilder {
    GraphBuilder::with_config(
        device.clone(),
        RenderGraphConfig::default()
            .with_label("test")
            .with_worker_threads(4)
            .with_plan_logging(true),
    )
}

pub fn texture_desc(layout: TextureLayout) -> TextureDescriptor {
    TextureDescriptor::default().with_initial_layout(layout)
}

// ============================================================================
// Test Pass
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Access {
    ReadTexture(ResourceHandle, TextureLayout),
    WriteTexture(ResourceHandle, TextureLayout),
    ReadBuffer(ResourceHandle),
    WriteBuffer(ResourceHandle),
}

/// A pass whose setup replays a list of accesses and whose execute records
/// its own name as a marker.
pub struct TestPass {
    name: String,
    queue: QueueType,
    accesses: Vec<Access>,
    written: Arc<Mutex<Vec<ResourceHandle>>>,
    subtasks: usize,
    fail: bool,
}

impl TestPass {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            queue: QueueType::Graphics,
            accesses: Vec::new(),
            written: Arc::new(Mutex::new(Vec::new())),
            subtasks: 0,
            fail: false,
        }
    }

    pub fn on(mut self, queue: QueueType) -> Self {
        self.queue = queue;
        self
    }

    pub fn read(mut self, handle: ResourceHandle, layout: TextureLayout) -> Self {
        self.accesses.push(Access::ReadTexture(handle, layout));
        self
    }

    pub fn write(mut self, handle: ResourceHandle, layout: TextureLayout) -> Self {
        self.accesses.push(Access::WriteTexture(handle, layout));
        self
    }

    pub fn read_buffer(mut self, handle: ResourceHandle) -> Self {
        self.accesses.push(Access::ReadBuffer(handle));
        self
    }

    pub fn write_buffer(mut self, handle: ResourceHandle) -> Self {
        self.accesses.push(Access::WriteBuffer(handle));
        self
    }

    /// Record through `count` parallel subtasks instead of a single list.
    pub fn with_subtasks(mut self, count: usize) -> Self {
        self.subtasks = count;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Register the pass and return its id plus the handles its writes produced.
    pub fn add_to(self, builder: &mut GraphBuilder) -> (PassId, Vec<ResourceHandle>) {
        let written = Arc::clone(&self.written);
        let id = builder.add_pass(self);
        let handles = written.lock().clone();
        (id, handles)
    }
}

fn dummy<'a>(
    list: &'a mut (dyn CommandList + 'static),
) -> BackendResult<&'a mut DummyCommandList> {
    list.downcast_mut::<DummyCommandList>()
        .ok_or_else(|| BackendError::InvalidHandle("not a dummy command list".into()))
}

impl RenderPass for TestPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue(&self) -> QueueType {
        self.queue
    }

    fn setup(&mut self, builder: &mut PassBuilder) {
        let mut written = self.written.lock();
        for access in &self.accesses {
            match *access {
                Access::ReadTexture(handle, layout) => builder.read_texture(handle, layout, &[]),
                Access::WriteTexture(handle, layout) => {
                    written.push(builder.write_texture(handle, layout, &[]))
                }
                Access::ReadBuffer(handle) => builder.read_buffer(handle),
                Access::WriteBuffer(handle) => written.push(builder.write_buffer(handle)),
            }
        }
    }

    fn execute(
        &self,
        ctx: &PassContext,
        command_lists: &mut Vec<Box<dyn CommandList>>,
    ) -> BackendResult<()> {
        if self.fail {
            return Err(BackendError::DeviceLost);
        }

        if self.subtasks > 0 {
            let lists = ctx.parallel_record(self.subtasks, |index, list| {
                dummy(list)?.record(format!("{}/{}", self.name, index));
                Ok(())
            })?;
            command_lists.extend(lists);
        } else {
            let mut list = ctx.request_command_list()?;
            dummy(list.as_mut())?.record(self.name.clone());
            command_lists.push(list);
        }
        Ok(())
    }
}

// ============================================================================
// Event Log Helpers
// ============================================================================

/// Marker labels of every submission to `queue`, one inner vec per submit.
pub fn submitted_markers(events: &[DummyEvent], queue: QueueType) -> Vec<Vec<String>> {
    events
        .iter()
        .filter_map(|event| match event {
            DummyEvent::Submit {
                queue: q,
                command_lists,
            } if *q == queue => Some(
                command_lists
                    .iter()
                    .flatten()
                    .filter_map(|command| match command {
                        DummyCommand::Marker(label) => Some(label.clone()),
                        DummyCommand::Barriers(_) => None,
                    })
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        })
        .filter(|markers| !markers.is_empty())
        .collect()
}

/// Every barrier batch recorded, in submission order.
pub fn barrier_batches(events: &[DummyEvent]) -> Vec<Vec<TextureBarrier>> {
    events
        .iter()
        .filter_map(|event| match event {
            DummyEvent::Submit { command_lists, .. } => Some(command_lists),
            _ => None,
        })
        .flatten()
        .flatten()
        .filter_map(|command| match command {
            DummyCommand::Barriers(barriers) => Some(barriers.clone()),
            DummyCommand::Marker(_) => None,
        })
        .collect()
}
