//! Common types shared between the render graph and GPU backends

use bitflags::bitflags;

/// Hardware command queue a pass is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum QueueType {
    /// General purpose queue. Drives every sync point.
    #[default]
    Graphics,
    /// Asynchronous compute queue.
    AsyncCompute,
    /// Asynchronous copy/transfer queue.
    AsyncCopy,
}

impl QueueType {
    /// Number of queue kinds.
    pub const COUNT: usize = 3;

    /// All queue kinds in submission order.
    pub const ALL: [QueueType; Self::COUNT] = [
        QueueType::Graphics,
        QueueType::AsyncCompute,
        QueueType::AsyncCopy,
    ];

    /// Dense index of this queue kind, usable for per-queue arrays.
    pub fn index(self) -> usize {
        match self {
            QueueType::Graphics => 0,
            QueueType::AsyncCompute => 1,
            QueueType::AsyncCopy => 2,
        }
    }

    pub fn is_async(self) -> bool {
        !matches!(self, QueueType::Graphics)
    }
}

/// Layout (state) a texture must be in for a given kind of access.
///
/// Buffers have no layout in this model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureLayout {
    /// Contents undefined. Never a valid declared or requested layout.
    #[default]
    Undefined,
    /// Common layout, usable by any queue.
    Common,
    /// Color attachment writes.
    RenderTarget,
    /// Depth/stencil attachment writes.
    DepthWrite,
    /// Read-only depth/stencil (depth test + sampling).
    DepthRead,
    /// Sampled in a shader.
    ShaderResource,
    /// Read/write storage access.
    UnorderedAccess,
    /// Source of a copy operation.
    CopySource,
    /// Destination of a copy operation.
    CopyDest,
    /// Ready for presentation to a swapchain.
    Present,
}

impl TextureLayout {
    pub fn is_defined(self) -> bool {
        self != TextureLayout::Undefined
    }
}

/// Value of a queue's monotonically increasing fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceValue {
    /// Queue that owns the fence.
    pub queue: QueueType,
    /// Counter value signaled on that queue.
    pub value: u64,
}

impl FenceValue {
    pub fn new(queue: QueueType, value: u64) -> Self {
        Self { queue, value }
    }
}

/// Handle to a GPU texture owned by the resource provider.
///
/// Slot index plus generation, so a stale handle never aliases a newer texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    index: u32,
    generation: u32,
}

impl TextureHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Handle to a GPU buffer owned by the resource provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    index: u32,
    generation: u32,
}

impl BufferHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Rg32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be copied from.
        const COPY_SRC = 1 << 0;
        /// Texture can be copied to.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in a shader.
        const TEXTURE_BINDING = 1 << 2;
        /// Texture can be used as a storage texture.
        const STORAGE_BINDING = 1 << 3;
        /// Texture can be used as a render attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be used as a uniform buffer.
        const UNIFORM = 1 << 2;
        /// Buffer can be used as a storage buffer.
        const STORAGE = 1 << 3;
        /// Buffer can be used as an indirect argument buffer.
        const INDIRECT = 1 << 4;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 5;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 6;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a texture.
///
/// `initial_layout` is the layout the graph assumes the texture is in before
/// the first pass touches it, and the layout it is returned to at the end of
/// every execution. It defaults to `Undefined`, which the graph rejects, so
/// every texture has to state it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub initial_layout: TextureLayout,
}

impl TextureDescriptor {
    /// Create a new 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            ..Self::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_levels = count;
        self
    }

    /// Set the array layer count.
    pub fn with_array_layers(mut self, count: u32) -> Self {
        self.array_layers = count;
        self
    }

    /// Set the layout the texture starts (and ends) every execution in.
    pub fn with_initial_layout(mut self, layout: TextureLayout) -> Self {
        self.initial_layout = layout;
        self
    }

    /// Number of addressable subresources (mip levels times array layers).
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels.max(1) * self.array_layers.max(1)
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            format: TextureFormat::default(),
            usage: TextureUsage::empty(),
            initial_layout: TextureLayout::Undefined,
        }
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Subresource value selecting every mip level and array layer of a resource.
pub const ALL_SUBRESOURCES: u32 = u32::MAX;

/// A layout transition on a concrete GPU texture, as recorded into a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBarrier {
    pub texture: TextureHandle,
    /// Flattened mip/layer index, or [`ALL_SUBRESOURCES`].
    pub subresource: u32,
    pub before: TextureLayout,
    pub after: TextureLayout,
}
