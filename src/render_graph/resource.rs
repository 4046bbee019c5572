//! Logical resources and their versioned handles

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::backend::types::*;
use crate::render_graph::pass::PassId;

pub use crate::backend::types::ALL_SUBRESOURCES;

/// Versioned reference to a logical graph resource.
///
/// `index` names the resource slot, `version` counts the writes that produced
/// the state being referred to. Every write hands back a fresh handle with the
/// next version; later accesses must use that handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle {
    index: u16,
    version: u16,
    subresource: u32,
}

impl ResourceHandle {
    pub(crate) fn new(index: u16, version: u16, subresource: u32) -> Self {
        Self {
            index,
            version,
            subresource,
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn subresource(&self) -> u32 {
        self.subresource
    }

    /// Same resource and version, narrowed (or widened) to `subresource`.
    pub fn with_subresource(self, subresource: u32) -> Self {
        Self {
            subresource,
            ..self
        }
    }

    pub fn is_whole_resource(&self) -> bool {
        self.subresource == ALL_SUBRESOURCES
    }

    /// Whether both handles name the same resource and overlapping subresources.
    /// Versions are ignored.
    pub fn overlaps(&self, other: &ResourceHandle) -> bool {
        self.index == other.index && subresources_overlap(self.subresource, other.subresource)
    }

    fn next_version(self) -> Self {
        let version = self.version.checked_add(1).unwrap_or_else(|| {
            panic!("resource {} ran out of versions", self.index)
        });
        Self { version, ..self }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_whole_resource() {
            write!(f, "#{}v{}", self.index, self.version)
        } else {
            write!(f, "#{}v{}[{}]", self.index, self.version, self.subresource)
        }
    }
}

fn subresources_overlap(a: u32, b: u32) -> bool {
    a == b || a == ALL_SUBRESOURCES || b == ALL_SUBRESOURCES
}

/// Where the backing memory of a resource comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOrigin<D, H> {
    /// Allocated by the graph at compile time from this descriptor.
    Owned(D),
    /// Caller-owned, one handle per frame slot.
    External(Vec<H>),
}

impl<D, H> ResourceOrigin<D, H> {
    pub fn is_external(&self) -> bool {
        matches!(self, ResourceOrigin::External(_))
    }
}

#[derive(Debug, Clone)]
pub struct TextureResource {
    pub name: String,
    pub origin: ResourceOrigin<TextureDescriptor, TextureHandle>,
    /// Layout the texture is in before the graph runs and is returned to afterwards.
    pub initial_layout: TextureLayout,
}

#[derive(Debug, Clone)]
pub struct BufferResource {
    pub name: String,
    pub origin: ResourceOrigin<BufferDescriptor, BufferHandle>,
}

/// A logical resource known to the graph.
#[derive(Debug, Clone)]
pub enum Resource {
    Buffer(BufferResource),
    Texture(TextureResource),
}

impl Resource {
    pub fn name(&self) -> &str {
        match self {
            Resource::Buffer(b) => &b.name,
            Resource::Texture(t) => &t.name,
        }
    }

    pub fn is_external(&self) -> bool {
        match self {
            Resource::Buffer(b) => b.origin.is_external(),
            Resource::Texture(t) => t.origin.is_external(),
        }
    }

    pub fn is_texture(&self) -> bool {
        matches!(self, Resource::Texture(_))
    }

    /// Declared initial layout, `None` for buffers.
    pub fn initial_layout(&self) -> Option<TextureLayout> {
        match self {
            Resource::Buffer(_) => None,
            Resource::Texture(t) => Some(t.initial_layout),
        }
    }

    /// Subresource count of graph-owned textures. External textures are only
    /// known at execution time.
    pub fn subresource_count(&self) -> Option<u32> {
        match self {
            Resource::Texture(TextureResource {
                origin: ResourceOrigin::Owned(desc),
                ..
            }) => Some(desc.subresource_count()),
            _ => None,
        }
    }
}

/// Ownership record of one exact (index, version, subresource) handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDependency {
    pub readers: BTreeSet<PassId>,
    pub writer: Option<PassId>,
    /// Layout the writer leaves the resource in. `None` for buffers and unwritten versions.
    pub target_layout: Option<TextureLayout>,
}

/// Declared resources plus per-version reader/writer bookkeeping.
///
/// Only mutated while the graph is being built.
#[derive(Debug, Default)]
pub struct ResourceTable {
    resources: Vec<Resource>,
    dependencies: BTreeMap<ResourceHandle, ResourceDependency>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt a resource and return its version-0 whole-resource handle.
    pub fn add(&mut self, resource: Resource) -> ResourceHandle {
        let index = u16::try_from(self.resources.len())
            .unwrap_or_else(|_| panic!("too many resources in one graph"));
        if let Resource::Texture(t) = &resource {
            assert!(
                t.initial_layout.is_defined(),
                "texture '{}' must declare a defined initial layout",
                t.name
            );
        }
        self.resources.push(resource);
        ResourceHandle::new(index, 0, ALL_SUBRESOURCES)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Resource behind `handle`. Panics on handles from another graph.
    pub fn resource(&self, handle: ResourceHandle) -> &Resource {
        self.resources
            .get(handle.index as usize)
            .unwrap_or_else(|| panic!("resource handle {handle} does not belong to this graph"))
    }

    pub fn dependency(&self, handle: ResourceHandle) -> Option<&ResourceDependency> {
        self.dependencies.get(&handle)
    }

    pub fn dependencies(&self) -> impl Iterator<Item = (&ResourceHandle, &ResourceDependency)> {
        self.dependencies.iter()
    }

    /// Records of every subresource key of `index` at exactly `version`.
    pub fn version_entries(
        &self,
        index: u16,
        version: u16,
    ) -> impl Iterator<Item = (&ResourceHandle, &ResourceDependency)> {
        self.dependencies.range(
            ResourceHandle::new(index, version, 0)..=ResourceHandle::new(index, version, u32::MAX),
        )
    }

    fn overlapping_writer(&self, handle: ResourceHandle) -> Option<PassId> {
        self.version_entries(handle.index, handle.version)
            .filter(|(key, _)| key.overlaps(&handle))
            .find_map(|(_, dep)| dep.writer)
    }

    /// Register `pass` as a reader of the exact versioned handle.
    pub fn record_read(&mut self, handle: ResourceHandle, pass: PassId) {
        let name = self.resource(handle).name().to_owned();

        if handle.version > 0 {
            assert!(
                self.overlapping_writer(handle).is_some(),
                "pass {pass:?} reads {handle} of '{name}', a version no pass has written"
            );
        }

        // Versions share one physical resource; anything older than the newest write is gone.
        let newer = handle.version.checked_add(1).and_then(|next| {
            self.dependencies
                .range(ResourceHandle::new(handle.index, next, 0)..)
                .take_while(|(key, _)| key.index == handle.index)
                .find(|(key, dep)| dep.writer.is_some() && key.overlaps(&handle))
        });
        if let Some((newer, _)) = newer {
            panic!(
                "pass {pass:?} reads stale handle {handle} of '{name}': {newer} was already written"
            );
        }

        self.dependencies
            .entry(handle)
            .or_default()
            .readers
            .insert(pass);
    }

    /// Register `pass` as the writer of the version following `handle` and
    /// return the new handle. The pass also becomes a reader of the old version.
    pub fn record_write(
        &mut self,
        handle: ResourceHandle,
        pass: PassId,
        layout: Option<TextureLayout>,
    ) -> ResourceHandle {
        let new_handle = handle.next_version();

        if let Some(previous) = self.overlapping_writer(new_handle) {
            panic!(
                "pass {pass:?} writes {handle} of '{}' again; version {} was already written by {previous:?} (stale handle?)",
                self.resource(handle).name(),
                new_handle.version
            );
        }

        self.dependencies
            .entry(handle)
            .or_default()
            .readers
            .insert(pass);

        let dependency = self.dependencies.entry(new_handle).or_default();
        dependency.writer = Some(pass);
        dependency.target_layout = layout;

        new_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(name: &str, layout: TextureLayout) -> Resource {
        Resource::Texture(TextureResource {
            name: name.into(),
            origin: ResourceOrigin::Owned(
                TextureDescriptor::default()
                    .with_mip_levels(4)
                    .with_initial_layout(layout),
            ),
            initial_layout: layout,
        })
    }

    fn buffer(name: &str) -> Resource {
        Resource::Buffer(BufferResource {
            name: name.into(),
            origin: ResourceOrigin::External(vec![BufferHandle::new(0, 0)]),
        })
    }

    #[test]
    fn test_handle_equality_covers_all_fields() {
        let a = ResourceHandle::new(1, 2, 3);
        assert_eq!(a, ResourceHandle::new(1, 2, 3));
        assert_ne!(a, ResourceHandle::new(1, 3, 3));
        assert_ne!(a, a.with_subresource(ALL_SUBRESOURCES));
        assert!(a.overlaps(&a.with_subresource(ALL_SUBRESOURCES)));
        assert!(!a.overlaps(&a.with_subresource(4)));
        assert!(!a.overlaps(&ResourceHandle::new(2, 2, 3)));
    }

    #[test]
    fn test_write_creates_next_version() {
        let mut table = ResourceTable::new();
        let h0 = table.add(texture("color", TextureLayout::RenderTarget));
        let h1 = table.record_write(h0, PassId(0), Some(TextureLayout::RenderTarget));

        assert_eq!(h1.index(), h0.index());
        assert_eq!(h1.version(), 1);

        let dep = table.dependency(h1).unwrap();
        assert_eq!(dep.writer, Some(PassId(0)));
        assert_eq!(dep.target_layout, Some(TextureLayout::RenderTarget));
        assert!(table.dependency(h0).unwrap().readers.contains(&PassId(0)));
    }

    #[test]
    fn test_multiple_readers_share_a_version() {
        let mut table = ResourceTable::new();
        let h0 = table.add(buffer("params"));
        let h1 = table.record_write(h0, PassId(0), None);
        table.record_read(h1, PassId(1));
        table.record_read(h1, PassId(2));

        let readers: Vec<_> = table.dependency(h1).unwrap().readers.iter().copied().collect();
        assert_eq!(readers, vec![PassId(1), PassId(2)]);
    }

    #[test]
    #[should_panic(expected = "already written")]
    fn test_double_write_panics() {
        let mut table = ResourceTable::new();
        let h0 = table.add(buffer("params"));
        table.record_write(h0, PassId(0), None);
        table.record_write(h0, PassId(1), None);
    }

    #[test]
    #[should_panic(expected = "stale handle")]
    fn test_stale_read_panics() {
        let mut table = ResourceTable::new();
        let h0 = table.add(buffer("params"));
        table.record_write(h0, PassId(0), None);
        table.record_read(h0, PassId(1));
    }

    #[test]
    #[should_panic(expected = "no pass has written")]
    fn test_read_of_unwritten_version_panics() {
        let mut table = ResourceTable::new();
        let h0 = table.add(buffer("params"));
        table.record_read(ResourceHandle::new(h0.index(), 3, ALL_SUBRESOURCES), PassId(0));
    }

    #[test]
    fn test_disjoint_subresources_written_independently() {
        let mut table = ResourceTable::new();
        let h0 = table.add(texture("mips", TextureLayout::ShaderResource));
        let rt = Some(TextureLayout::RenderTarget);
        let mip0 = table.record_write(h0.with_subresource(0), PassId(0), rt);
        let mip1 = table.record_write(h0.with_subresource(1), PassId(1), rt);

        assert_eq!(mip0.version(), 1);
        assert_eq!(mip1.version(), 1);
        assert_eq!(table.version_entries(h0.index(), 1).count(), 2);

        // Mip 2 was never rewritten, so version 0 is still current for it.
        table.record_read(h0.with_subresource(2), PassId(2));
    }

    #[test]
    #[should_panic(expected = "defined initial layout")]
    fn test_undefined_initial_layout_panics() {
        let mut table = ResourceTable::new();
        table.add(texture("bad", TextureLayout::Undefined));
    }
}
