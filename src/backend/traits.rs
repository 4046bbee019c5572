//! Collaborator interfaces consumed by the render graph
//!
//! The graph never talks to a GPU API directly. It allocates resources through a
//! [`ResourceProvider`], records into [`CommandList`]s and submits them through
//! the per-queue [`GpuQueue`]s exposed by a [`QueueProvider`].

use std::any::Any;

use thiserror::Error;

use crate::backend::types::*;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to create resource: {0}")]
    ResourceCreationFailed(String),
    #[error("Failed to create command list: {0}")]
    CommandListCreationFailed(String),
    #[error("Queue submission failed: {0}")]
    SubmissionFailed(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Allocation and lookup of GPU resources.
pub trait ResourceProvider: Send + Sync {
    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    fn destroy_buffer(&self, handle: BufferHandle);

    fn destroy_texture(&self, handle: TextureHandle);

    /// Returns the descriptor of a live buffer, `None` for stale or unknown handles.
    fn lookup_buffer(&self, handle: BufferHandle) -> Option<BufferDescriptor>;

    /// Returns the descriptor of a live texture, `None` for stale or unknown handles.
    fn lookup_texture(&self, handle: TextureHandle) -> Option<TextureDescriptor>;
}

/// A hardware command queue with a monotonically increasing fence.
pub trait GpuQueue: Send + Sync {
    fn queue_type(&self) -> QueueType;

    /// Submit closed command lists as one ordered batch.
    fn submit(&self, command_lists: &[Box<dyn CommandList>]) -> BackendResult<()>;

    /// Signal this queue's fence after all previously submitted work.
    fn signal(&self) -> BackendResult<FenceValue>;

    /// Make subsequent work on this queue wait (GPU-side) until `fence` is reached.
    fn wait(&self, fence: FenceValue) -> BackendResult<()>;

    /// Latest fence value the GPU has completed on this queue.
    fn completed_value(&self) -> u64;

    /// Block the calling thread until this queue's fence reaches `value`.
    ///
    /// No timeout: a hung GPU blocks forever.
    fn wait_for_value(&self, value: u64) -> BackendResult<()>;
}

/// Access to the three queue kinds and to fresh command lists for them.
pub trait QueueProvider: Send + Sync {
    fn queue(&self, queue: QueueType) -> &dyn GpuQueue;

    fn create_command_list(&self, queue: QueueType) -> BackendResult<Box<dyn CommandList>>;
}

/// A recordable command buffer.
///
/// Pass-specific recording (draws, dispatches, copies) is opaque to the graph;
/// passes reach the concrete backend type through [`CommandList::as_any_mut`].
pub trait CommandList: Send {
    fn queue_type(&self) -> QueueType;

    /// Begin recording. Discards anything recorded before.
    fn open(&mut self);

    /// Finish recording. The list is ready for submission afterwards.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn record_barriers(&mut self, barriers: &[TextureBarrier]);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Everything the render graph needs from a device.
pub trait GpuDevice: ResourceProvider + QueueProvider {
    fn name(&self) -> &str {
        "gpu"
    }
}

impl dyn CommandList {
    /// Downcast to the concrete backend command list.
    pub fn downcast_mut<T: CommandList + 'static>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    pub fn downcast_ref<T: CommandList + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}
