//! Graph construction: resource declaration and pass registration

use std::sync::Arc;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::RenderGraphResult;
use crate::render_graph::compiled::{CompiledGraph, CompiledResources};
use crate::render_graph::pass::*;
use crate::render_graph::resolver::{DependencyGraph, DependencyResolver};
use crate::render_graph::resource::*;
use crate::render_graph::sync::SyncPlanner;
use crate::RenderGraphConfig;

/// One-shot builder collecting resources and passes for a single graph.
///
/// ```
/// use std::sync::Arc;
/// use render_graph::backend::dummy::DummyDevice;
/// use render_graph::{GraphBuilder, TextureDescriptor, TextureLayout};
///
/// let device = Arc::new(DummyDevice::new());
/// let mut builder = GraphBuilder::new(device);
/// let color = builder.create_texture(
///     "color",
///     TextureDescriptor::default().with_initial_layout(TextureLayout::RenderTarget),
/// );
/// assert_eq!(color.version(), 0);
/// let graph = builder.compile().unwrap();
/// assert!(graph.levels().is_empty());
/// ```
pub struct GraphBuilder {
    device: Arc<dyn GpuDevice>,
    config: RenderGraphConfig,
    table: ResourceTable,
    passes: Vec<Box<dyn RenderPass>>,
    nodes: Vec<PassNode>,
}

impl GraphBuilder {
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        Self::with_config(device, RenderGraphConfig::default())
    }

    pub fn with_config(device: Arc<dyn GpuDevice>, config: RenderGraphConfig) -> Self {
        Self {
            device,
            config,
            table: ResourceTable::new(),
            passes: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Declare a graph-owned texture, allocated at compile time.
    ///
    /// Panics if `desc.initial_layout` is `Undefined`.
    pub fn create_texture(&mut self, name: &str, desc: TextureDescriptor) -> ResourceHandle {
        declare_texture(&mut self.table, name, desc)
    }

    /// Declare a graph-owned buffer, allocated at compile time.
    pub fn create_buffer(&mut self, name: &str, desc: BufferDescriptor) -> ResourceHandle {
        declare_buffer(&mut self.table, name, desc)
    }

    /// Adopt caller-owned textures, one per frame slot, currently in `current_layout`.
    ///
    /// The graph never destroys them and returns them to `current_layout`
    /// at the end of every execution.
    pub fn register_external_texture(
        &mut self,
        name: &str,
        per_frame: Vec<TextureHandle>,
        current_layout: TextureLayout,
    ) -> ResourceHandle {
        self.table.add(Resource::Texture(TextureResource {
            name: name.to_string(),
            origin: ResourceOrigin::External(per_frame),
            initial_layout: current_layout,
        }))
    }

    /// Adopt caller-owned buffers, one per frame slot.
    pub fn register_external_buffer(
        &mut self,
        name: &str,
        per_frame: Vec<BufferHandle>,
    ) -> ResourceHandle {
        self.table.add(Resource::Buffer(BufferResource {
            name: name.to_string(),
            origin: ResourceOrigin::External(per_frame),
        }))
    }

    /// Register a pass and run its setup immediately.
    pub fn add_pass<P: RenderPass + 'static>(&mut self, pass: P) -> PassId {
        let id = PassId(
            u32::try_from(self.nodes.len()).unwrap_or_else(|_| panic!("too many passes")),
        );
        let mut pass: Box<dyn RenderPass> = Box::new(pass);
        let queue = pass.queue();

        let mut accesses = Vec::new();
        {
            let mut builder = PassBuilder {
                pass: id,
                queue,
                table: &mut self.table,
                accesses: &mut accesses,
            };
            pass.setup(&mut builder);
        }

        if accesses.is_empty() {
            log::warn!(
                "Render graph: pass '{}' declares no resource accesses",
                pass.name()
            );
        }
        log::trace!(
            "Render graph: added {} '{}' on {:?} with {} accesses",
            id,
            pass.name(),
            queue,
            accesses.len()
        );

        self.nodes.push(PassNode {
            id,
            name: pass.name().to_string(),
            queue,
            accesses,
        });
        self.passes.push(pass);
        id
    }

    pub fn pass_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn resource_count(&self) -> usize {
        self.table.len()
    }

    /// Resolve dependencies, plan synchronization and materialize resources.
    ///
    /// Malformed graphs panic. Allocation failures release everything created
    /// so far and return an error.
    pub fn compile(self) -> RenderGraphResult<CompiledGraph> {
        let GraphBuilder {
            device,
            config,
            table,
            passes,
            nodes,
        } = self;

        let dependencies = DependencyGraph::from_table(nodes.len(), &table);
        let resolved = DependencyResolver::new(&dependencies, &nodes).resolve();
        let sync = SyncPlanner::new(&table, &nodes).plan(resolved.levels());

        log::debug!(
            "Render graph '{}': {} passes, {} resources, {} edges, {} levels",
            config.label,
            nodes.len(),
            table.len(),
            dependencies.edge_count(),
            resolved.levels().len()
        );

        let resources = CompiledResources::materialize(device.as_ref(), &table)?;
        Ok(CompiledGraph::new(
            device, config, table, passes, nodes, resolved, sync, resources,
        ))
    }
}

fn declare_texture(
    table: &mut ResourceTable,
    name: &str,
    desc: TextureDescriptor,
) -> ResourceHandle {
    assert!(
        desc.initial_layout.is_defined(),
        "texture '{name}' must be created with a defined initial layout"
    );
    let initial_layout = desc.initial_layout;
    table.add(Resource::Texture(TextureResource {
        name: name.to_string(),
        origin: ResourceOrigin::Owned(desc),
        initial_layout,
    }))
}

fn declare_buffer(
    table: &mut ResourceTable,
    name: &str,
    desc: BufferDescriptor,
) -> ResourceHandle {
    table.add(Resource::Buffer(BufferResource {
        name: name.to_string(),
        origin: ResourceOrigin::Owned(desc),
    }))
}

/// Declaration surface handed to [`RenderPass::setup`].
pub struct PassBuilder<'a> {
    pass: PassId,
    queue: QueueType,
    table: &'a mut ResourceTable,
    accesses: &'a mut Vec<ResourceAccess>,
}

impl<'a> PassBuilder<'a> {
    /// Id of the pass being set up.
    pub fn pass_id(&self) -> PassId {
        self.pass
    }

    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Declare a graph-owned texture from inside setup.
    pub fn create_texture(&mut self, name: &str, desc: TextureDescriptor) -> ResourceHandle {
        declare_texture(self.table, name, desc)
    }

    /// Declare a graph-owned buffer from inside setup.
    pub fn create_buffer(&mut self, name: &str, desc: BufferDescriptor) -> ResourceHandle {
        declare_buffer(self.table, name, desc)
    }

    /// Read `handle` in `layout`.
    ///
    /// `subresources` lists mip/layer indices; an empty slice uses the
    /// subresource carried by the handle.
    pub fn read_texture(
        &mut self,
        handle: ResourceHandle,
        layout: TextureLayout,
        subresources: &[u32],
    ) {
        self.expect_texture(handle, layout);
        for target in self.targets(handle, subresources) {
            self.table.record_read(target, self.pass);
            self.accesses.push(ResourceAccess {
                handle: target,
                layout: Some(layout),
                kind: AccessKind::Read,
            });
        }
    }

    /// Write `handle`, leaving it in `layout`, and return the new version.
    ///
    /// A version-0 write must use the texture's declared initial layout.
    pub fn write_texture(
        &mut self,
        handle: ResourceHandle,
        layout: TextureLayout,
        subresources: &[u32],
    ) -> ResourceHandle {
        self.expect_texture(handle, layout);
        if handle.version() == 0 {
            let initial = self.table.resource(handle).initial_layout();
            assert_eq!(
                initial,
                Some(layout),
                "pass {} writes version 0 of '{}' in {:?}, which differs from its initial layout",
                self.pass,
                self.table.resource(handle).name(),
                layout
            );
        }

        let targets = self.targets(handle, subresources);
        let mut written = Vec::with_capacity(targets.len());
        for target in targets {
            let new_handle = self.table.record_write(target, self.pass, Some(layout));
            self.accesses.push(ResourceAccess {
                handle: new_handle,
                layout: Some(layout),
                kind: AccessKind::Write,
            });
            written.push(new_handle);
        }

        match written.as_slice() {
            [single] => *single,
            _ => ResourceHandle::new(handle.index(), handle.version() + 1, ALL_SUBRESOURCES),
        }
    }

    pub fn read_buffer(&mut self, handle: ResourceHandle) {
        self.expect_buffer(handle);
        self.table.record_read(handle, self.pass);
        self.accesses.push(ResourceAccess {
            handle,
            layout: None,
            kind: AccessKind::Read,
        });
    }

    /// Write `handle` and return the new version.
    pub fn write_buffer(&mut self, handle: ResourceHandle) -> ResourceHandle {
        self.expect_buffer(handle);
        let new_handle = self.table.record_write(handle, self.pass, None);
        self.accesses.push(ResourceAccess {
            handle: new_handle,
            layout: None,
            kind: AccessKind::Write,
        });
        new_handle
    }

    fn expect_texture(&self, handle: ResourceHandle, layout: TextureLayout) {
        let resource = self.table.resource(handle);
        assert!(
            resource.is_texture(),
            "pass {} accesses buffer '{}' as a texture",
            self.pass,
            resource.name()
        );
        assert!(
            layout.is_defined(),
            "pass {} requests texture '{}' in the undefined layout",
            self.pass,
            resource.name()
        );
    }

    fn expect_buffer(&self, handle: ResourceHandle) {
        let resource = self.table.resource(handle);
        assert!(
            !resource.is_texture(),
            "pass {} accesses texture '{}' as a buffer",
            self.pass,
            resource.name()
        );
    }

    fn targets(&self, handle: ResourceHandle, subresources: &[u32]) -> Vec<ResourceHandle> {
        if subresources.is_empty() {
            return vec![handle];
        }

        let resource = self.table.resource(handle);
        subresources
            .iter()
            .map(|&subresource| {
                if let Some(count) = resource.subresource_count() {
                    assert!(
                        subresource == ALL_SUBRESOURCES || subresource < count,
                        "subresource {subresource} is out of range for '{}' ({count} subresources)",
                        resource.name()
                    );
                }
                handle.with_subresource(subresource)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;
    use parking_lot::Mutex;

    struct Declare<F>(F);

    fn declare<F>(f: F) -> Declare<F>
    where
        F: FnMut(&mut PassBuilder) + Send + Sync + 'static,
    {
        Declare(f)
    }

    impl<F: FnMut(&mut PassBuilder) + Send + Sync> RenderPass for Declare<F> {
        fn name(&self) -> &str {
            "declare"
        }

        fn setup(&mut self, builder: &mut PassBuilder) {
            (self.0)(builder)
        }

        fn execute(
            &self,
            _ctx: &PassContext,
            _command_lists: &mut Vec<Box<dyn CommandList>>,
        ) -> BackendResult<()> {
            Ok(())
        }
    }

    fn builder() -> GraphBuilder {
        GraphBuilder::new(Arc::new(DummyDevice::new()))
    }

    fn rt_texture() -> TextureDescriptor {
        TextureDescriptor::default()
            .with_mip_levels(2)
            .with_initial_layout(TextureLayout::RenderTarget)
    }

    #[test]
    fn test_write_returns_fresh_version() {
        let mut graph = builder();
        let t = graph.create_texture("t", rt_texture());
        let b = graph.create_buffer("b", BufferDescriptor::new(64, BufferUsage::STORAGE));

        let outputs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outputs);
        graph.add_pass(declare(move |p| {
            let t1 = p.write_texture(t, TextureLayout::RenderTarget, &[]);
            let b1 = p.write_buffer(b);
            let b2 = p.write_buffer(b1);
            sink.lock().extend([t1, b1, b2]);
        }));

        let outputs = outputs.lock();
        assert_eq!((outputs[0].index(), outputs[0].version()), (t.index(), 1));
        assert_eq!(outputs[1].version(), 1);
        assert_eq!(outputs[2].version(), 2);
    }

    #[test]
    fn test_subresource_write_returns_that_subresource() {
        let mut graph = builder();
        let t = graph.create_texture("t", rt_texture());

        let outputs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outputs);
        graph.add_pass(declare(move |p| {
            let mip1 = p.write_texture(t, TextureLayout::RenderTarget, &[1]);
            let mip0 = p.write_texture(t, TextureLayout::RenderTarget, &[0]);
            let whole = mip0.with_subresource(ALL_SUBRESOURCES);
            let both = p.write_texture(whole, TextureLayout::RenderTarget, &[]);
            sink.lock().extend([mip1, mip0, both]);
        }));

        let outputs = outputs.lock();
        assert_eq!(outputs[0].subresource(), 1);
        assert_eq!(outputs[0].version(), 1);
        assert_eq!(outputs[1].subresource(), 0);
        assert!(outputs[2].is_whole_resource());
        assert_eq!(outputs[2].version(), 2);
    }

    fn mipped_texture(mips: u32) -> TextureDescriptor {
        rt_texture().with_mip_levels(mips)
    }

    #[test]
    fn test_multi_subresource_write_orders_later_readers() {
        let mut graph = builder();
        let t = graph.create_texture("pyramid", mipped_texture(4));

        let written = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&written);
        let writer = graph.add_pass(declare(move |p| {
            *sink.lock() = Some(p.write_texture(t, TextureLayout::RenderTarget, &[0, 1]));
        }));
        let both = written.lock().take().unwrap();
        assert_eq!((both.index(), both.version()), (t.index(), 1));
        assert!(both.is_whole_resource());

        let reader = graph.add_pass(declare(move |p| {
            p.read_texture(both, TextureLayout::ShaderResource, &[]);
        }));
        let untouched = graph.add_pass(declare(move |p| {
            p.read_texture(t.with_subresource(2), TextureLayout::ShaderResource, &[]);
        }));

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_level(writer), 0);
        assert_eq!(compiled.pass_level(reader), 1);
        assert_eq!(compiled.pass_level(untouched), 0);
    }

    #[test]
    fn test_separate_mip_writers_both_precede_whole_reader() {
        let mut graph = builder();
        let t = graph.create_texture("bloom", mipped_texture(2));

        let outputs = Arc::new(Mutex::new(Vec::new()));
        let passes: Vec<PassId> = (0..2)
            .map(|mip| {
                let sink = Arc::clone(&outputs);
                graph.add_pass(declare(move |p| {
                    let handle = t.with_subresource(mip);
                    sink.lock()
                        .push(p.write_texture(handle, TextureLayout::RenderTarget, &[]));
                }))
            })
            .collect();
        let mip0 = outputs.lock()[0];
        let combine = graph.add_pass(declare(move |p| {
            p.read_texture(
                mip0.with_subresource(ALL_SUBRESOURCES),
                TextureLayout::ShaderResource,
                &[],
            );
        }));

        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.pass_level(passes[0]), 0);
        assert_eq!(compiled.pass_level(passes[1]), 0);
        assert_eq!(compiled.pass_level(combine), 1);
    }

    #[test]
    #[should_panic(expected = "stale handle")]
    fn test_whole_read_before_multi_subresource_write_is_stale() {
        let mut graph = builder();
        let t = graph.create_texture("pyramid", mipped_texture(4));
        graph.add_pass(declare(move |p| {
            p.write_texture(t, TextureLayout::RenderTarget, &[0, 1]);
        }));
        graph.add_pass(declare(move |p| {
            p.read_texture(t, TextureLayout::ShaderResource, &[]);
        }));
    }

    #[test]
    #[should_panic(expected = "defined initial layout")]
    fn test_create_texture_requires_initial_layout() {
        builder().create_texture("t", TextureDescriptor::default());
    }

    #[test]
    #[should_panic(expected = "differs from its initial layout")]
    fn test_version_zero_write_must_match_initial_layout() {
        let mut graph = builder();
        let t = graph.create_texture(
            "t",
            TextureDescriptor::default().with_initial_layout(TextureLayout::ShaderResource),
        );
        graph.add_pass(declare(move |p| {
            p.write_texture(t, TextureLayout::RenderTarget, &[]);
        }));
    }

    #[test]
    #[should_panic(expected = "as a texture")]
    fn test_buffer_read_as_texture_panics() {
        let mut graph = builder();
        let b = graph.create_buffer("b", BufferDescriptor::new(64, BufferUsage::UNIFORM));
        graph.add_pass(declare(move |p| {
            p.read_texture(b, TextureLayout::ShaderResource, &[]);
        }));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_subresource_out_of_range_panics() {
        let mut graph = builder();
        let t = graph.create_texture("t", rt_texture());
        graph.add_pass(declare(move |p| {
            p.read_texture(t, TextureLayout::ShaderResource, &[2]);
        }));
    }

    #[test]
    fn test_setup_runs_on_add() {
        let mut graph = builder();
        let b = graph.create_buffer("b", BufferDescriptor::new(64, BufferUsage::STORAGE));
        let first = graph.add_pass(declare(move |p| {
            p.write_buffer(b);
        }));
        let second = graph.add_pass(declare(|_| {}));

        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
        assert_eq!(graph.pass_count(), 2);
        assert_eq!(graph.resource_count(), 1);
    }
}
