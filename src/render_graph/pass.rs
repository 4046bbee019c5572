//! Render pass definitions for the render graph

use std::fmt;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::builder::PassBuilder;
use crate::render_graph::command_pool::CommandListPool;
use crate::render_graph::compiled::CompiledResources;
use crate::render_graph::resource::ResourceHandle;
use crate::thread_pool::ThreadPool;

/// Unique identifier for a render pass. Ids follow registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

impl PassId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pass{}", self.0)
    }
}

/// Whether an access consumes or produces a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Resource access declared by a pass during setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceAccess {
    /// Version read, or the new version produced by a write.
    pub handle: ResourceHandle,
    /// Required texture layout, `None` for buffers.
    pub layout: Option<TextureLayout>,
    pub kind: AccessKind,
}

impl ResourceAccess {
    pub fn is_read(&self) -> bool {
        self.kind == AccessKind::Read
    }

    pub fn is_write(&self) -> bool {
        self.kind == AccessKind::Write
    }
}

/// Trait for render passes
///
/// `setup` runs once, inside [`GraphBuilder::add_pass`], and is the only place
/// a pass can declare reads and writes: the [`PassBuilder`] is not reachable
/// anywhere else. `execute` runs every frame and may be called from a worker
/// thread.
///
/// [`GraphBuilder::add_pass`]: crate::render_graph::GraphBuilder::add_pass
pub trait RenderPass: Send + Sync {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    /// Queue the pass is submitted to.
    fn queue(&self) -> QueueType {
        QueueType::Graphics
    }

    /// Declare every resource the pass touches, in program order.
    fn setup(&mut self, builder: &mut PassBuilder);

    /// Called once after compilation with the materialized resources, e.g. to
    /// pre-create views.
    fn post_compile(&mut self, _resources: &CompiledResources) {}

    /// Record commands into one or more command lists and append them to
    /// `command_lists` in submission order.
    fn execute(
        &self,
        ctx: &PassContext,
        command_lists: &mut Vec<Box<dyn CommandList>>,
    ) -> BackendResult<()>;
}

/// Metadata about a pass in the graph
#[derive(Debug, Clone)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub queue: QueueType,
    pub accesses: Vec<ResourceAccess>,
}

impl PassNode {
    pub fn reads_resource(&self, index: u16) -> bool {
        self.accesses
            .iter()
            .any(|a| a.is_read() && a.handle.index() == index)
    }

    pub fn writes_resource(&self, index: u16) -> bool {
        self.accesses
            .iter()
            .any(|a| a.is_write() && a.handle.index() == index)
    }
}

/// Context handed to [`RenderPass::execute`].
pub struct PassContext<'a> {
    pub(crate) frame_index: u64,
    pub(crate) queue: QueueType,
    pub(crate) resources: &'a CompiledResources,
    pub(crate) device: &'a dyn GpuDevice,
    pub(crate) pool: &'a CommandListPool,
    pub(crate) threads: &'a ThreadPool,
}

impl<'a> PassContext<'a> {
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Concrete texture behind `handle` for the current frame.
    pub fn texture(&self, handle: ResourceHandle) -> TextureHandle {
        self.resources.texture(handle, self.frame_index)
    }

    /// Concrete buffer behind `handle` for the current frame.
    pub fn buffer(&self, handle: ResourceHandle) -> BufferHandle {
        self.resources.buffer(handle, self.frame_index)
    }

    /// An open command list for this pass's queue.
    pub fn request_command_list(&self) -> BackendResult<Box<dyn CommandList>> {
        self.pool.acquire(self.device, self.queue)
    }

    /// Fork `count` recording subtasks over the worker pool, each with its own
    /// command list. The closed lists come back in subtask index order.
    pub fn parallel_record<F>(
        &self,
        count: usize,
        record: F,
    ) -> BackendResult<Vec<Box<dyn CommandList>>>
    where
        F: Fn(usize, &mut (dyn CommandList + 'static)) -> BackendResult<()> + Sync,
    {
        let indices: Vec<usize> = (0..count).collect();
        self.threads
            .map(&indices, |&index| {
                let mut list = self.request_command_list()?;
                record(index, list.as_mut())?;
                list.close();
                Ok(list)
            })
            .into_iter()
            .collect()
    }

    /// Worker pool the graph records on.
    pub fn thread_pool(&self) -> &ThreadPool {
        self.threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::resource::ALL_SUBRESOURCES;

    #[test]
    fn test_pass_node_queries() {
        let node = PassNode {
            id: PassId(0),
            name: "blur".into(),
            queue: QueueType::AsyncCompute,
            accesses: vec![
                ResourceAccess {
                    handle: ResourceHandle::new(0, 1, ALL_SUBRESOURCES),
                    layout: Some(TextureLayout::ShaderResource),
                    kind: AccessKind::Read,
                },
                ResourceAccess {
                    handle: ResourceHandle::new(1, 1, ALL_SUBRESOURCES),
                    layout: Some(TextureLayout::UnorderedAccess),
                    kind: AccessKind::Write,
                },
            ],
        };

        assert!(node.reads_resource(0));
        assert!(!node.writes_resource(0));
        assert!(node.writes_resource(1));
        assert!(!node.reads_resource(2));
    }
}
