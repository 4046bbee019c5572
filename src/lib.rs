//! Render Graph - a multi-queue render graph compiler and scheduler
//!
//! Passes declare which textures and buffers they read and write. The graph
//! derives read-after-write and write-after-read hazards from versioned
//! resource handles, assigns every pass a dependency level, and plans the
//! cross-queue waits and layout transitions between levels.
//!
//! # Features
//! - Versioned resource handles with stale-handle detection
//! - Longest-path level assignment with cycle detection
//! - Graphics, async compute and async copy queues with fence handshakes
//! - Minimal layout transitions, restored to the declared layout every frame
//! - Parallel command recording with pooled command lists
//!
//! The GPU itself sits behind the traits in [`backend`]; the `dummy` feature
//! provides an in-process implementation for tests and headless use.

pub mod backend;
pub mod error;
pub mod render_graph;
pub mod thread_pool;

pub use backend::{
    BackendError, BackendResult, BufferDescriptor, BufferHandle, BufferUsage, CommandList,
    FenceValue, GpuDevice, GpuQueue, QueueProvider, QueueType, ResourceProvider,
    TextureBarrier, TextureDescriptor, TextureFormat, TextureHandle, TextureLayout, TextureUsage,
};
pub use error::{RenderGraphError, RenderGraphResult};
pub use render_graph::{
    CompiledGraph, CompiledResources, DependencyLevel, GraphBuilder, GraphCompletion,
    LayoutTransition, PassBuilder, PassContext, PassId, RenderPass, ResourceHandle, SyncPoint,
    ALL_SUBRESOURCES,
};
pub use thread_pool::ThreadPool;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for a render graph
#[derive(Debug, Clone)]
pub struct RenderGraphConfig {
    /// Name used in log output
    pub label: String,
    /// Worker threads used to record passes
    pub worker_threads: usize,
    /// Log the compiled plan at debug level
    pub log_compiled_plan: bool,
}

impl Default for RenderGraphConfig {
    fn default() -> Self {
        Self {
            label: "render-graph".to_string(),
            worker_threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            log_compiled_plan: false,
        }
    }
}

impl RenderGraphConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    pub fn with_plan_logging(mut self, enabled: bool) -> Self {
        self.log_compiled_plan = enabled;
        self
    }
}
