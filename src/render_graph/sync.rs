//! Synchronization planning between dependency levels
//!
//! A [`SyncPoint`] sits between level `i` and `i + 1`. It tells the graphics
//! queue which async queues to wait on and which layout transitions to record
//! before level `i + 1` starts. Each texture starts in its declared initial
//! layout; accesses naming a single subresource move only that subresource.
//! The terminal sync point returns every texture to its initial layout.

use std::collections::BTreeMap;
use std::fmt;

use crate::backend::types::*;
use crate::render_graph::pass::PassNode;
use crate::render_graph::resolver::DependencyLevel;
use crate::render_graph::resource::{ResourceHandle, ResourceTable};

/// Layout change of one resource, or of one of its subresources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutTransition {
    /// Resource index.
    pub resource: u16,
    /// Subresource index, or [`ALL_SUBRESOURCES`].
    pub subresource: u32,
    pub before: TextureLayout,
    pub after: TextureLayout,
}

impl LayoutTransition {
    /// Transition of every subresource of `resource`.
    pub fn whole(resource: u16, before: TextureLayout, after: TextureLayout) -> Self {
        Self {
            resource,
            subresource: ALL_SUBRESOURCES,
            before,
            after,
        }
    }
}

impl fmt::Display for LayoutTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.resource)?;
        if self.subresource != ALL_SUBRESOURCES {
            write!(f, "[{}]", self.subresource)?;
        }
        write!(f, ": {:?} -> {:?}", self.before, self.after)
    }
}

/// Queue handshake and barriers between two dependency levels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPoint {
    pub wait_on_async_compute: bool,
    pub wait_on_async_copy: bool,
    pub layout_transitions: Vec<LayoutTransition>,
}

impl SyncPoint {
    /// Whether the graphics queue has to wait on `queue` at this point.
    pub fn waits_on(&self, queue: QueueType) -> bool {
        match queue {
            QueueType::Graphics => false,
            QueueType::AsyncCompute => self.wait_on_async_compute,
            QueueType::AsyncCopy => self.wait_on_async_copy,
        }
    }
}

/// Complete synchronization schedule of a compiled graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Transitions recorded before level 0, for first accesses that differ
    /// from the declared layout.
    pub prologue: Vec<LayoutTransition>,
    /// `between[i]` separates level `i` from level `i + 1`.
    pub between: Vec<SyncPoint>,
    /// Runs after the last level and restores every initial layout.
    pub terminal: SyncPoint,
}

/// Current layout of one texture: a base layout plus the subresources that
/// differ from it. An override never equals the base.
#[derive(Debug, Clone)]
struct LayoutState {
    base: TextureLayout,
    overrides: BTreeMap<u32, TextureLayout>,
}

impl LayoutState {
    fn new(base: TextureLayout) -> Self {
        Self {
            base,
            overrides: BTreeMap::new(),
        }
    }

    fn get(&self, subresource: u32) -> TextureLayout {
        self.overrides
            .get(&subresource)
            .copied()
            .unwrap_or(self.base)
    }

    /// Move `subresource` (possibly all of them) to `after` and append the
    /// transitions that takes. `count` is the subresource count when known.
    fn transition(
        &mut self,
        resource: u16,
        subresource: u32,
        after: TextureLayout,
        count: Option<u32>,
        out: &mut Vec<LayoutTransition>,
    ) {
        if subresource != ALL_SUBRESOURCES {
            let before = self.get(subresource);
            if before != after {
                out.push(LayoutTransition {
                    resource,
                    subresource,
                    before,
                    after,
                });
                if after == self.base {
                    self.overrides.remove(&subresource);
                } else {
                    self.overrides.insert(subresource, after);
                }
            }
            return;
        }

        if !self.overrides.is_empty() {
            match count {
                Some(count) => {
                    for subresource in 0..count {
                        let before = self.get(subresource);
                        if before != after {
                            out.push(LayoutTransition {
                                resource,
                                subresource,
                                before,
                                after,
                            });
                        }
                    }
                    self.base = after;
                    self.overrides.clear();
                    return;
                }
                // Unknown extent: fold the overrides back into the base first.
                None => {
                    let base = self.base;
                    out.extend(std::mem::take(&mut self.overrides).into_iter().map(
                        |(subresource, before)| LayoutTransition {
                            resource,
                            subresource,
                            before,
                            after: base,
                        },
                    ));
                }
            }
        }

        if self.base != after {
            out.push(LayoutTransition::whole(resource, self.base, after));
            self.base = after;
        }
    }
}

pub struct SyncPlanner<'a> {
    table: &'a ResourceTable,
    nodes: &'a [PassNode],
}

impl<'a> SyncPlanner<'a> {
    pub fn new(table: &'a ResourceTable, nodes: &'a [PassNode]) -> Self {
        Self { table, nodes }
    }

    pub fn plan(&self, levels: &[DependencyLevel]) -> SyncPlan {
        let mut current: Vec<Option<LayoutState>> = self
            .table
            .resources()
            .iter()
            .map(|resource| resource.initial_layout().map(LayoutState::new))
            .collect();

        let prologue = levels
            .first()
            .map(|first| self.transitions_into(first, &mut current))
            .unwrap_or_default();

        let between = levels
            .windows(2)
            .map(|pair| SyncPoint {
                wait_on_async_compute: pair[0].uses_queue(QueueType::AsyncCompute),
                wait_on_async_copy: pair[0].uses_queue(QueueType::AsyncCopy),
                layout_transitions: self.transitions_into(&pair[1], &mut current),
            })
            .collect();

        let mut restore = Vec::new();
        for (index, (state, resource)) in current
            .iter_mut()
            .zip(self.table.resources())
            .enumerate()
        {
            if let (Some(state), Some(initial)) = (state.as_mut(), resource.initial_layout()) {
                state.transition(
                    index as u16,
                    ALL_SUBRESOURCES,
                    initial,
                    resource.subresource_count(),
                    &mut restore,
                );
            }
        }

        let terminal = SyncPoint {
            wait_on_async_compute: levels
                .last()
                .is_some_and(|last| last.uses_queue(QueueType::AsyncCompute)),
            wait_on_async_copy: levels
                .last()
                .is_some_and(|last| last.uses_queue(QueueType::AsyncCopy)),
            layout_transitions: restore,
        };

        SyncPlan {
            prologue,
            between,
            terminal,
        }
    }

    /// Transitions bringing every texture used by `level` into its required
    /// layout, in registration then declaration order.
    ///
    /// Panics if two accesses in the level need overlapping subresources of
    /// one texture in different layouts.
    fn transitions_into(
        &self,
        level: &DependencyLevel,
        current: &mut [Option<LayoutState>],
    ) -> Vec<LayoutTransition> {
        let mut required: BTreeMap<u16, Vec<(ResourceHandle, TextureLayout, &str)>> =
            BTreeMap::new();
        let mut transitions = Vec::new();

        for &pass in level.all_passes() {
            let node = &self.nodes[pass.index()];
            for access in &node.accesses {
                let Some(layout) = access.layout else {
                    continue;
                };
                let handle = access.handle;
                let resource = handle.index();

                let uses = required.entry(resource).or_default();
                let conflict = uses
                    .iter()
                    .find(|(other, expected, _)| other.overlaps(&handle) && *expected != layout);
                if let Some(&(_, expected, first_user)) = conflict {
                    panic!(
                        "'{}' is needed as {:?} by '{}' and as {:?} by '{}' in dependency level {}",
                        self.table.resources()[resource as usize].name(),
                        expected,
                        first_user,
                        layout,
                        node.name,
                        level.level()
                    );
                }
                uses.push((handle, layout, node.name.as_str()));

                if let Some(state) = current[resource as usize].as_mut() {
                    state.transition(
                        resource,
                        handle.subresource(),
                        layout,
                        self.table.resources()[resource as usize].subresource_count(),
                        &mut transitions,
                    );
                }
            }
        }

        transitions
    }
}
