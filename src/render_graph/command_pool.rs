//! Command list recycling keyed by completion fences.
//!
//! Command lists handed to the GPU cannot be reset until the GPU is done with
//! them. Each execution retires its lists under the graphics fence value that
//! marks the end of the frame; they only become available again once the
//! graphics queue reports that value as completed.
//!
//! ```text
//!  acquire ──► recording ──► submit ──► retire(fence) ──► in flight
//!     ▲                                                      │
//!     └──────────── free list ◄── reclaim(completed ≥ fence) ┘
//! ```

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::backend::types::QueueType;

struct RetiredLists {
    fence: u64,
    lists: Vec<Box<dyn CommandList>>,
}

#[derive(Default)]
struct PoolState {
    free: [Vec<Box<dyn CommandList>>; QueueType::COUNT],
    in_flight: VecDeque<RetiredLists>,
}

/// Thread-safe pool of reusable command lists for all three queues.
#[derive(Default)]
pub struct CommandListPool {
    state: Mutex<PoolState>,
}

impl CommandListPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// An open command list for `queue`, reused if one is free.
    pub fn acquire<D>(&self, device: &D, queue: QueueType) -> BackendResult<Box<dyn CommandList>>
    where
        D: QueueProvider + ?Sized,
    {
        let recycled = self.state.lock().free[queue.index()].pop();
        let mut list = match recycled {
            Some(list) => list,
            None => {
                log::trace!("Render graph: creating command list for {:?}", queue);
                device.create_command_list(queue)?
            }
        };
        list.open();
        Ok(list)
    }

    /// Hand submitted lists back; they stay in flight until `fence` completes.
    pub fn retire(&self, fence: u64, lists: Vec<Box<dyn CommandList>>) {
        if lists.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        debug_assert!(state.in_flight.back().map_or(true, |last| last.fence <= fence));
        state.in_flight.push_back(RetiredLists { fence, lists });
    }

    /// Make every list retired at or below `completed` available again.
    /// Returns the number of lists reclaimed.
    pub fn reclaim(&self, completed: u64) -> usize {
        let mut state = self.state.lock();
        let mut reclaimed = 0;
        while state
            .in_flight
            .front()
            .is_some_and(|retired| retired.fence <= completed)
        {
            let Some(retired) = state.in_flight.pop_front() else {
                break;
            };
            for list in retired.lists {
                state.free[list.queue_type().index()].push(list);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            log::trace!(
                "Render graph: reclaimed {} command lists (fence {})",
                reclaimed,
                completed
            );
        }
        reclaimed
    }

    pub fn free_count(&self, queue: QueueType) -> usize {
        self.state.lock().free[queue.index()].len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state
            .lock()
            .in_flight
            .iter()
            .map(|retired| retired.lists.len())
            .sum()
    }
}
