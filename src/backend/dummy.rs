//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations but provides
//! a valid implementation of every collaborator trait. Fences complete as
//! soon as they are signaled, and every submission, wait, signal and barrier
//! is appended to an event log that tests can inspect.

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::traits::*;
use super::types::*;

/// A command recorded into a [`DummyCommandList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DummyCommand {
    /// Opaque pass work, identified by a label.
    Marker(String),
    /// Layout transitions.
    Barriers(Vec<TextureBarrier>),
}

/// Something that happened on a dummy queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DummyEvent {
    Submit {
        queue: QueueType,
        command_lists: Vec<Vec<DummyCommand>>,
    },
    Signal(FenceValue),
    Wait {
        queue: QueueType,
        fence: FenceValue,
    },
}

/// Command list of the dummy backend.
#[derive(Debug)]
pub struct DummyCommandList {
    queue: QueueType,
    commands: Vec<DummyCommand>,
    open: bool,
}

impl DummyCommandList {
    fn new(queue: QueueType) -> Self {
        Self {
            queue,
            commands: Vec::new(),
            open: false,
        }
    }

    /// Record an opaque marker command.
    pub fn record(&mut self, label: impl Into<String>) {
        assert!(self.open, "recording into a closed command list");
        self.commands.push(DummyCommand::Marker(label.into()));
    }

    pub fn commands(&self) -> &[DummyCommand] {
        &self.commands
    }
}

impl CommandList for DummyCommandList {
    fn queue_type(&self) -> QueueType {
        self.queue
    }

    fn open(&mut self) {
        self.commands.clear();
        self.open = true;
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn record_barriers(&mut self, barriers: &[TextureBarrier]) {
        assert!(self.open, "recording into a closed command list");
        self.commands.push(DummyCommand::Barriers(barriers.to_vec()));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct DummyQueue {
    queue: QueueType,
    fence: AtomicU64,
    events: Arc<Mutex<Vec<DummyEvent>>>,
}

impl DummyQueue {
    fn new(queue: QueueType, events: Arc<Mutex<Vec<DummyEvent>>>) -> Self {
        Self {
            queue,
            fence: AtomicU64::new(0),
            events,
        }
    }
}

impl GpuQueue for DummyQueue {
    fn queue_type(&self) -> QueueType {
        self.queue
    }

    fn submit(&self, command_lists: &[Box<dyn CommandList>]) -> BackendResult<()> {
        let mut recorded = Vec::with_capacity(command_lists.len());
        for list in command_lists {
            if list.is_open() {
                return Err(BackendError::SubmissionFailed(
                    "command list is still open".into(),
                ));
            }
            let Some(list) = list.downcast_ref::<DummyCommandList>() else {
                return Err(BackendError::InvalidHandle(
                    "foreign command list submitted to dummy queue".into(),
                ));
            };
            recorded.push(list.commands.clone());
        }

        log::trace!(
            "DummyBackend: submitting {} command lists to {:?}",
            recorded.len(),
            self.queue
        );
        self.events.lock().push(DummyEvent::Submit {
            queue: self.queue,
            command_lists: recorded,
        });
        Ok(())
    }

    fn signal(&self) -> BackendResult<FenceValue> {
        let value = self.fence.fetch_add(1, Ordering::AcqRel) + 1;
        let fence = FenceValue::new(self.queue, value);
        self.events.lock().push(DummyEvent::Signal(fence));
        Ok(fence)
    }

    fn wait(&self, fence: FenceValue) -> BackendResult<()> {
        self.events.lock().push(DummyEvent::Wait {
            queue: self.queue,
            fence,
        });
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.fence.load(Ordering::Acquire)
    }

    fn wait_for_value(&self, value: u64) -> BackendResult<()> {
        // Work completes at signal time, so anything unsignaled would hang forever.
        if self.completed_value() < value {
            return Err(BackendError::SubmissionFailed(format!(
                "{:?} fence value {} was never signaled",
                self.queue, value
            )));
        }
        Ok(())
    }
}

/// Generational slot storage for fake GPU resources.
struct Slots<D> {
    entries: Vec<(u32, Option<D>)>,
    free: Vec<u32>,
}

impl<D: Clone> Slots<D> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, desc: D) -> (u32, u32) {
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.0 += 1;
            entry.1 = Some(desc);
            (index, entry.0)
        } else {
            self.entries.push((0, Some(desc)));
            (self.entries.len() as u32 - 1, 0)
        }
    }

    fn remove(&mut self, index: u32, generation: u32) -> bool {
        match self.entries.get_mut(index as usize) {
            Some((gen, slot)) if *gen == generation && slot.is_some() => {
                *slot = None;
                self.free.push(index);
                true
            }
            _ => false,
        }
    }

    fn get(&self, index: u32, generation: u32) -> Option<D> {
        match self.entries.get(index as usize) {
            Some((gen, Some(desc))) if *gen == generation => Some(desc.clone()),
            _ => None,
        }
    }

    fn live_count(&self) -> usize {
        self.entries.iter().filter(|(_, slot)| slot.is_some()).count()
    }
}

/// Dummy GPU device.
pub struct DummyDevice {
    textures: Mutex<Slots<TextureDescriptor>>,
    buffers: Mutex<Slots<BufferDescriptor>>,
    queues: [DummyQueue; QueueType::COUNT],
    events: Arc<Mutex<Vec<DummyEvent>>>,
    /// Remaining successful allocations before creation starts failing.
    allocation_budget: Mutex<Option<usize>>,
    command_lists_created: AtomicUsize,
}

impl DummyDevice {
    /// Create a new dummy device.
    pub fn new() -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        Self {
            textures: Mutex::new(Slots::new()),
            buffers: Mutex::new(Slots::new()),
            queues: QueueType::ALL.map(|queue| DummyQueue::new(queue, Arc::clone(&events))),
            events,
            allocation_budget: Mutex::new(None),
            command_lists_created: AtomicUsize::new(0),
        }
    }

    /// Let the next `count` resource creations succeed and fail every one after.
    pub fn fail_allocations_after(&self, count: usize) {
        *self.allocation_budget.lock() = Some(count);
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<DummyEvent> {
        self.events.lock().clone()
    }

    /// Drain the event log.
    pub fn take_events(&self) -> Vec<DummyEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn live_textures(&self) -> usize {
        self.textures.lock().live_count()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.lock().live_count()
    }

    /// Total number of command lists ever created (pool misses).
    pub fn command_lists_created(&self) -> usize {
        self.command_lists_created.load(Ordering::Relaxed)
    }

    fn consume_budget(&self, what: &str) -> BackendResult<()> {
        let mut budget = self.allocation_budget.lock();
        match budget.as_mut() {
            Some(0) => Err(BackendError::ResourceCreationFailed(format!(
                "dummy allocation budget exhausted while creating {what}"
            ))),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyDevice")
            .field("live_textures", &self.live_textures())
            .field("live_buffers", &self.live_buffers())
            .finish_non_exhaustive()
    }
}

impl ResourceProvider for DummyDevice {
    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        self.consume_budget("buffer")?;
        let (index, generation) = self.buffers.lock().insert(desc.clone());
        Ok(BufferHandle::new(index, generation))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{})",
            desc.label,
            desc.width,
            desc.height,
            desc.depth
        );
        self.consume_budget("texture")?;
        let (index, generation) = self.textures.lock().insert(desc.clone());
        Ok(TextureHandle::new(index, generation))
    }

    fn destroy_buffer(&self, handle: BufferHandle) {
        if !self.buffers.lock().remove(handle.index(), handle.generation()) {
            log::warn!("DummyBackend: destroying unknown buffer {:?}", handle);
        }
    }

    fn destroy_texture(&self, handle: TextureHandle) {
        if !self.textures.lock().remove(handle.index(), handle.generation()) {
            log::warn!("DummyBackend: destroying unknown texture {:?}", handle);
        }
    }

    fn lookup_buffer(&self, handle: BufferHandle) -> Option<BufferDescriptor> {
        self.buffers.lock().get(handle.index(), handle.generation())
    }

    fn lookup_texture(&self, handle: TextureHandle) -> Option<TextureDescriptor> {
        self.textures.lock().get(handle.index(), handle.generation())
    }
}

impl QueueProvider for DummyDevice {
    fn queue(&self, queue: QueueType) -> &dyn GpuQueue {
        &self.queues[queue.index()]
    }

    fn create_command_list(&self, queue: QueueType) -> BackendResult<Box<dyn CommandList>> {
        self.command_lists_created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(DummyCommandList::new(queue)))
    }
}

impl GpuDevice for DummyDevice {
    fn name(&self) -> &str {
        "Dummy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_texture_handle_is_not_found() {
        let device = DummyDevice::new();
        let desc = TextureDescriptor::default().with_initial_layout(TextureLayout::Common);
        let first = device.create_texture(&desc).unwrap();
        device.destroy_texture(first);
        let second = device.create_texture(&desc).unwrap();

        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert!(device.lookup_texture(first).is_none());
        assert!(device.lookup_texture(second).is_some());
        assert_eq!(device.live_textures(), 1);
    }

    #[test]
    fn test_allocation_budget() {
        let device = DummyDevice::new();
        device.fail_allocations_after(1);
        let desc = BufferDescriptor::new(256, BufferUsage::STORAGE);
        assert!(device.create_buffer(&desc).is_ok());
        assert!(matches!(
            device.create_buffer(&desc),
            Err(BackendError::ResourceCreationFailed(_))
        ));
    }

    #[test]
    fn test_fences_complete_on_signal() {
        let device = DummyDevice::new();
        let queue = device.queue(QueueType::AsyncCompute);
        assert_eq!(queue.completed_value(), 0);
        assert!(queue.wait_for_value(1).is_err());

        let fence = queue.signal().unwrap();
        assert_eq!(fence, FenceValue::new(QueueType::AsyncCompute, 1));
        assert_eq!(queue.completed_value(), 1);
        assert!(queue.wait_for_value(1).is_ok());
    }

    #[test]
    fn test_submit_rejects_open_list() {
        let device = DummyDevice::new();
        let mut list = device.create_command_list(QueueType::Graphics).unwrap();
        list.open();
        let lists = vec![list];
        let result = device.queue(QueueType::Graphics).submit(&lists);
        assert!(matches!(result, Err(BackendError::SubmissionFailed(_))));
    }

    #[test]
    fn test_submit_logs_recorded_commands() {
        let device = DummyDevice::new();
        let mut list = device.create_command_list(QueueType::AsyncCopy).unwrap();
        list.open();
        list.downcast_mut::<DummyCommandList>()
            .unwrap()
            .record("upload");
        list.close();

        device.queue(QueueType::AsyncCopy).submit(&[list]).unwrap();
        assert_eq!(
            device.events(),
            vec![DummyEvent::Submit {
                queue: QueueType::AsyncCopy,
                command_lists: vec![vec![DummyCommand::Marker("upload".into())]],
            }]
        );
    }
}
