//! Compiled graph: frozen plan plus materialized resources

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{RenderGraphError, RenderGraphResult};
use crate::render_graph::command_pool::CommandListPool;
use crate::render_graph::executor::FrameExecutor;
use crate::render_graph::pass::{PassId, PassNode, RenderPass};
use crate::render_graph::resolver::{DependencyLevel, ResolvedGraph};
use crate::render_graph::resource::*;
use crate::render_graph::sync::{LayoutTransition, SyncPlan, SyncPoint};
use crate::thread_pool::ThreadPool;
use crate::RenderGraphConfig;

/// Concrete handle(s) behind one logical resource.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Binding<H> {
    Owned(H),
    PerFrame(Vec<H>),
}

impl<H: Copy> Binding<H> {
    fn get(&self, frame_index: u64) -> H {
        match self {
            Binding::Owned(handle) => *handle,
            Binding::PerFrame(handles) => handles[(frame_index % handles.len() as u64) as usize],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Materialized {
    Texture(Binding<TextureHandle>),
    Buffer(Binding<BufferHandle>),
}

/// GPU resources bound to the logical resources of a compiled graph.
#[derive(Debug, Default)]
pub struct CompiledResources {
    names: Vec<String>,
    entries: Vec<Materialized>,
}

impl CompiledResources {
    /// Create owned resources and validate external ones.
    ///
    /// On failure everything created so far is destroyed again.
    pub(crate) fn materialize(
        device: &dyn GpuDevice,
        table: &ResourceTable,
    ) -> RenderGraphResult<Self> {
        let mut resources = Self::default();
        for resource in table.resources() {
            match Self::bind(device, resource) {
                Ok(entry) => {
                    resources.names.push(resource.name().to_string());
                    resources.entries.push(entry);
                }
                Err(err) => {
                    log::error!("Render graph: {err}; releasing partially created resources");
                    resources.release(device);
                    return Err(err);
                }
            }
        }
        Ok(resources)
    }

    fn bind(device: &dyn GpuDevice, resource: &Resource) -> RenderGraphResult<Materialized> {
        let name = resource.name();
        let creation_error = |source| RenderGraphError::ResourceCreation {
            name: name.to_string(),
            source,
        };

        match resource {
            Resource::Texture(texture) => match &texture.origin {
                ResourceOrigin::Owned(desc) => {
                    let handle = device.create_texture(desc).map_err(creation_error)?;
                    Ok(Materialized::Texture(Binding::Owned(handle)))
                }
                ResourceOrigin::External(handles) => {
                    validate_external(name, handles, |h| device.lookup_texture(*h).is_some())?;
                    Ok(Materialized::Texture(Binding::PerFrame(handles.clone())))
                }
            },
            Resource::Buffer(buffer) => match &buffer.origin {
                ResourceOrigin::Owned(desc) => {
                    let handle = device.create_buffer(desc).map_err(creation_error)?;
                    Ok(Materialized::Buffer(Binding::Owned(handle)))
                }
                ResourceOrigin::External(handles) => {
                    validate_external(name, handles, |h| device.lookup_buffer(*h).is_some())?;
                    Ok(Materialized::Buffer(Binding::PerFrame(handles.clone())))
                }
            },
        }
    }

    /// Destroy every graph-owned resource. External ones are left alone.
    pub(crate) fn release(&mut self, device: &dyn GpuDevice) {
        for entry in self.entries.drain(..) {
            match entry {
                Materialized::Texture(Binding::Owned(handle)) => device.destroy_texture(handle),
                Materialized::Buffer(Binding::Owned(handle)) => device.destroy_buffer(handle),
                _ => {}
            }
        }
        self.names.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn name(&self, handle: ResourceHandle) -> &str {
        &self.names[handle.index() as usize]
    }

    /// Whether the graph allocated (and will destroy) this resource.
    pub fn is_owned(&self, handle: ResourceHandle) -> bool {
        matches!(
            self.entry(handle.index()),
            Materialized::Texture(Binding::Owned(_)) | Materialized::Buffer(Binding::Owned(_))
        )
    }

    /// Texture bound to `handle` for `frame_index`. Panics for buffers.
    pub fn texture(&self, handle: ResourceHandle, frame_index: u64) -> TextureHandle {
        self.texture_at(handle.index(), frame_index)
    }

    /// Buffer bound to `handle` for `frame_index`. Panics for textures.
    pub fn buffer(&self, handle: ResourceHandle, frame_index: u64) -> BufferHandle {
        match self.entry(handle.index()) {
            Materialized::Buffer(binding) => binding.get(frame_index),
            Materialized::Texture(_) => panic!("'{}' is a texture, not a buffer", self.name(handle)),
        }
    }

    pub(crate) fn texture_at(&self, index: u16, frame_index: u64) -> TextureHandle {
        match self.entry(index) {
            Materialized::Texture(binding) => binding.get(frame_index),
            Materialized::Buffer(_) => {
                panic!("'{}' is a buffer, not a texture", self.names[index as usize])
            }
        }
    }

    fn entry(&self, index: u16) -> &Materialized {
        self.entries
            .get(index as usize)
            .unwrap_or_else(|| panic!("resource #{index} does not belong to this graph"))
    }
}

fn validate_external<H>(
    name: &str,
    handles: &[H],
    is_alive: impl Fn(&H) -> bool,
) -> RenderGraphResult<()> {
    if handles.is_empty() {
        return Err(RenderGraphError::ExternalResourceEmpty {
            name: name.to_string(),
        });
    }
    match handles.iter().position(|handle| !is_alive(handle)) {
        Some(frame) => Err(RenderGraphError::ExternalResourceMissing {
            name: name.to_string(),
            frame,
        }),
        None => Ok(()),
    }
}

/// Completion token of one [`CompiledGraph::execute`] call.
///
/// Wraps the graphics fence value signaled after the terminal sync point.
#[derive(Clone)]
pub struct GraphCompletion {
    fence: FenceValue,
    device: Arc<dyn GpuDevice>,
}

impl GraphCompletion {
    pub(crate) fn new(fence: FenceValue, device: Arc<dyn GpuDevice>) -> Self {
        Self { fence, device }
    }

    pub fn fence(&self) -> FenceValue {
        self.fence
    }

    /// Poll without blocking.
    pub fn is_complete(&self) -> bool {
        self.device.queue(self.fence.queue).completed_value() >= self.fence.value
    }

    /// Block until the GPU has finished the frame. There is no timeout.
    pub fn wait(&self) -> RenderGraphResult<()> {
        self.device
            .queue(self.fence.queue)
            .wait_for_value(self.fence.value)?;
        Ok(())
    }
}

impl fmt::Debug for GraphCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphCompletion")
            .field("fence", &self.fence)
            .finish_non_exhaustive()
    }
}

/// Executable render graph.
///
/// Produced by [`GraphBuilder::compile`](crate::render_graph::GraphBuilder::compile).
/// The plan is immutable; [`execute`](Self::execute) only reads it.
pub struct CompiledGraph {
    pub(crate) device: Arc<dyn GpuDevice>,
    pub(crate) config: RenderGraphConfig,
    pub(crate) table: ResourceTable,
    pub(crate) passes: Vec<Box<dyn RenderPass>>,
    pub(crate) nodes: Vec<PassNode>,
    pub(crate) resolved: ResolvedGraph,
    pub(crate) sync: SyncPlan,
    pub(crate) resources: CompiledResources,
    pub(crate) pool: CommandListPool,
    pub(crate) threads: ThreadPool,
    pub(crate) last_completion: Mutex<Option<FenceValue>>,
}

impl CompiledGraph {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        device: Arc<dyn GpuDevice>,
        config: RenderGraphConfig,
        table: ResourceTable,
        mut passes: Vec<Box<dyn RenderPass>>,
        nodes: Vec<PassNode>,
        resolved: ResolvedGraph,
        sync: SyncPlan,
        resources: CompiledResources,
    ) -> Self {
        for pass in &mut passes {
            pass.post_compile(&resources);
        }

        let threads = ThreadPool::new(config.worker_threads);
        let graph = Self {
            device,
            config,
            table,
            passes,
            nodes,
            resolved,
            sync,
            resources,
            pool: CommandListPool::new(),
            threads,
            last_completion: Mutex::new(None),
        };

        if graph.config.log_compiled_plan {
            log::debug!("{graph}");
        }
        graph
    }

    /// Run every level for `frame_index` and return the completion token.
    ///
    /// External resources use the handle registered for
    /// `frame_index % per_frame_handles.len()`.
    pub fn execute(&self, frame_index: u64) -> RenderGraphResult<GraphCompletion> {
        FrameExecutor::new(self, frame_index).run()
    }

    pub fn config(&self) -> &RenderGraphConfig {
        &self.config
    }

    pub fn levels(&self) -> &[DependencyLevel] {
        self.resolved.levels()
    }

    /// Sync points between consecutive levels.
    pub fn sync_points(&self) -> &[SyncPoint] {
        &self.sync.between
    }

    pub fn terminal_sync_point(&self) -> &SyncPoint {
        &self.sync.terminal
    }

    /// Transitions recorded before level 0.
    pub fn prologue(&self) -> &[LayoutTransition] {
        &self.sync.prologue
    }

    pub fn pass_level(&self, pass: PassId) -> u16 {
        self.resolved.pass_level(pass)
    }

    pub fn pass_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn pass_name(&self, pass: PassId) -> &str {
        &self.nodes[pass.index()].name
    }

    pub fn resources(&self) -> &CompiledResources {
        &self.resources
    }

    /// Declared resources, indexable by [`LayoutTransition::resource`].
    pub fn resource_declarations(&self) -> &[Resource] {
        self.table.resources()
    }

    fn write_pass_list(&self, f: &mut fmt::Formatter<'_>, passes: &[PassId]) -> fmt::Result {
        write!(f, "[")?;
        for (i, pass) in passes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.pass_name(*pass))?;
        }
        write!(f, "]")
    }

    fn write_transitions(
        &self,
        f: &mut fmt::Formatter<'_>,
        transitions: &[LayoutTransition],
    ) -> fmt::Result {
        for transition in transitions {
            write!(
                f,
                "    {}",
                self.table.resources()[transition.resource as usize].name()
            )?;
            if transition.subresource != ALL_SUBRESOURCES {
                write!(f, "[{}]", transition.subresource)?;
            }
            writeln!(f, " {:?} -> {:?}", transition.before, transition.after)?;
        }
        Ok(())
    }
}

impl fmt::Display for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "render graph '{}': {} passes, {} resources, {} levels",
            self.config.label,
            self.nodes.len(),
            self.table.len(),
            self.levels().len()
        )?;

        if !self.sync.prologue.is_empty() {
            writeln!(f, "  prologue:")?;
            self.write_transitions(f, &self.sync.prologue)?;
        }

        for (index, level) in self.levels().iter().enumerate() {
            write!(f, "  level {}:", level.level())?;
            for queue in QueueType::ALL {
                if level.uses_queue(queue) {
                    write!(f, " {:?} ", queue)?;
                    self.write_pass_list(f, level.passes(queue))?;
                }
            }
            writeln!(f)?;

            let (label, point) = match self.sync.between.get(index) {
                Some(point) => ("sync", point),
                None => ("terminal", &self.sync.terminal),
            };
            writeln!(
                f,
                "  {label}: wait compute={} copy={}",
                point.wait_on_async_compute, point.wait_on_async_copy
            )?;
            self.write_transitions(f, &point.layout_transitions)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("label", &self.config.label)
            .field("passes", &self.nodes.len())
            .field("levels", &self.levels().len())
            .finish_non_exhaustive()
    }
}

impl Drop for CompiledGraph {
    fn drop(&mut self) {
        // The GPU may still be reading owned resources from the last frame.
        if let Some(fence) = self.last_completion.lock().take() {
            if let Err(err) = self.device.queue(fence.queue).wait_for_value(fence.value) {
                log::error!(
                    "Render graph '{}': failed to wait for frame completion: {err}",
                    self.config.label
                );
            }
        }
        self.resources.release(self.device.as_ref());
    }
}
