//! Dependency resolution: hazard edges, cycle detection and level assignment

use std::collections::BTreeSet;

use crate::backend::types::QueueType;
use crate::render_graph::pass::{PassId, PassNode};
use crate::render_graph::resource::ResourceTable;

/// Directed pass-to-pass edges. `a -> b` means `b` must run in a later level than `a`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    successors: Vec<BTreeSet<PassId>>,
    has_predecessor: Vec<bool>,
}

impl DependencyGraph {
    /// Graph with `pass_count` passes and no edges.
    pub fn new(pass_count: usize) -> Self {
        Self {
            successors: vec![BTreeSet::new(); pass_count],
            has_predecessor: vec![false; pass_count],
        }
    }

    /// Derive edges from the reader/writer records of `table`.
    ///
    /// Read-after-write: the writer of a version precedes every reader of an
    /// overlapping subresource of that version. Write-after-read: readers of a
    /// version precede the writer of the next overlapping version.
    pub fn from_table(pass_count: usize, table: &ResourceTable) -> Self {
        let mut graph = Self::new(pass_count);

        for (key, dependency) in table.dependencies() {
            let Some(writer) = dependency.writer else {
                continue;
            };

            for (other, entry) in table.version_entries(key.index(), key.version()) {
                if other.overlaps(key) {
                    for &reader in entry.readers.iter().filter(|&&r| r != writer) {
                        graph.add_edge(writer, reader);
                    }
                }
            }

            let Some(previous) = key.version().checked_sub(1) else {
                continue;
            };
            for (other, entry) in table.version_entries(key.index(), previous) {
                if other.overlaps(key) {
                    for &reader in entry.readers.iter().filter(|&&r| r != writer) {
                        graph.add_edge(reader, writer);
                    }
                }
            }
        }

        graph
    }

    pub fn add_edge(&mut self, from: PassId, to: PassId) {
        self.successors[from.index()].insert(to);
        self.has_predecessor[to.index()] = true;
    }

    pub fn pass_count(&self) -> usize {
        self.successors.len()
    }

    pub fn edge_count(&self) -> usize {
        self.successors.iter().map(BTreeSet::len).sum()
    }

    pub fn successors(&self, pass: PassId) -> impl Iterator<Item = PassId> + '_ {
        self.successors[pass.index()].iter().copied()
    }

    pub fn has_edge(&self, from: PassId, to: PassId) -> bool {
        self.successors[from.index()].contains(&to)
    }

    /// Passes without incoming edges, in registration order.
    pub fn roots(&self) -> impl Iterator<Item = PassId> + '_ {
        self.has_predecessor
            .iter()
            .enumerate()
            .filter(|&(_, &has)| !has)
            .map(|(index, _)| PassId(index as u32))
    }
}

/// Passes that may run concurrently, bucketed by queue in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyLevel {
    level: u16,
    graphics: Vec<PassId>,
    async_compute: Vec<PassId>,
    async_copy: Vec<PassId>,
    all_passes: Vec<PassId>,
}

impl DependencyLevel {
    fn new(level: u16) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    fn push(&mut self, pass: PassId, queue: QueueType) {
        match queue {
            QueueType::Graphics => self.graphics.push(pass),
            QueueType::AsyncCompute => self.async_compute.push(pass),
            QueueType::AsyncCopy => self.async_copy.push(pass),
        }
        self.all_passes.push(pass);
    }

    pub fn level(&self) -> u16 {
        self.level
    }

    /// Passes of this level targeting `queue`.
    pub fn passes(&self, queue: QueueType) -> &[PassId] {
        match queue {
            QueueType::Graphics => &self.graphics,
            QueueType::AsyncCompute => &self.async_compute,
            QueueType::AsyncCopy => &self.async_copy,
        }
    }

    pub fn all_passes(&self) -> &[PassId] {
        &self.all_passes
    }

    pub fn uses_queue(&self, queue: QueueType) -> bool {
        !self.passes(queue).is_empty()
    }
}

/// Level assignment for every pass.
#[derive(Debug, Clone, Default)]
pub struct ResolvedGraph {
    pass_levels: Vec<u16>,
    levels: Vec<DependencyLevel>,
}

impl ResolvedGraph {
    pub fn levels(&self) -> &[DependencyLevel] {
        &self.levels
    }

    pub fn pass_level(&self, pass: PassId) -> u16 {
        self.pass_levels[pass.index()]
    }
}

/// Assigns dependency levels by longest path from the root passes.
pub struct DependencyResolver<'a> {
    graph: &'a DependencyGraph,
    nodes: &'a [PassNode],
}

impl<'a> DependencyResolver<'a> {
    pub fn new(graph: &'a DependencyGraph, nodes: &'a [PassNode]) -> Self {
        assert_eq!(graph.pass_count(), nodes.len());
        Self { graph, nodes }
    }

    /// Panics if the edges contain a cycle.
    pub fn resolve(&self) -> ResolvedGraph {
        let order = self.topological_order();

        let mut pass_levels = vec![0u16; self.nodes.len()];
        for &pass in &order {
            let next = pass_levels[pass.index()] + 1;
            for successor in self.graph.successors(pass) {
                let level = &mut pass_levels[successor.index()];
                *level = (*level).max(next);
            }
        }

        let level_count = pass_levels.iter().max().map_or(0, |&max| max as usize + 1);
        let mut levels: Vec<DependencyLevel> = (0..level_count)
            .map(|level| DependencyLevel::new(level as u16))
            .collect();
        for node in self.nodes {
            levels[pass_levels[node.id.index()] as usize].push(node.id, node.queue);
        }

        for level in &levels {
            log::trace!(
                "Render graph: level {} -> graphics {:?}, compute {:?}, copy {:?}",
                level.level,
                level.graphics,
                level.async_compute,
                level.async_copy
            );
        }

        ResolvedGraph {
            pass_levels,
            levels,
        }
    }

    /// Depth-first search from every root; reversed post-order.
    fn topological_order(&self) -> Vec<PassId> {
        const VISITED: u8 = 1 << 0;
        const ON_STACK: u8 = 1 << 1;

        let mut state = vec![0u8; self.nodes.len()];
        let mut post_order = Vec::with_capacity(self.nodes.len());

        for root in self.graph.roots() {
            state[root.index()] = ON_STACK;
            let mut stack = vec![(root, self.graph.successors(root))];

            while let Some((node, successors)) = stack.last_mut() {
                let node = *node;
                match successors.next() {
                    Some(next) => match state[next.index()] {
                        VISITED => {}
                        ON_STACK => panic!(
                            "render graph contains a dependency cycle through pass '{}'",
                            self.nodes[next.index()].name
                        ),
                        _ => {
                            state[next.index()] = ON_STACK;
                            stack.push((next, self.graph.successors(next)));
                        }
                    },
                    None => {
                        state[node.index()] = VISITED;
                        post_order.push(node);
                        stack.pop();
                    }
                }
            }
        }

        // Passes on a cycle have a predecessor on that cycle, so no root reaches them.
        if let Some(index) = state.iter().position(|&s| s != VISITED) {
            panic!(
                "render graph contains a dependency cycle: pass '{}' is unreachable from any root pass",
                self.nodes[index].name
            );
        }

        post_order.reverse();
        post_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(queues: &[QueueType]) -> Vec<PassNode> {
        queues
            .iter()
            .enumerate()
            .map(|(i, &queue)| PassNode {
                id: PassId(i as u32),
                name: format!("pass{i}"),
                queue,
                accesses: Vec::new(),
            })
            .collect()
    }

    fn graph(pass_count: usize, edges: &[(u32, u32)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new(pass_count);
        for &(from, to) in edges {
            graph.add_edge(PassId(from), PassId(to));
        }
        graph
    }

    #[test]
    fn test_independent_passes_share_level_zero() {
        let nodes = nodes(&[QueueType::Graphics; 3]);
        let graph = graph(3, &[]);
        let resolved = DependencyResolver::new(&graph, &nodes).resolve();

        assert_eq!(resolved.levels().len(), 1);
        assert_eq!(
            resolved.levels()[0].passes(QueueType::Graphics),
            &[PassId(0), PassId(1), PassId(2)]
        );
    }

    #[test]
    fn test_diamond_uses_longest_path() {
        // 0 -> 1 -> 3, 0 -> 2 -> 4 -> 3
        let nodes = nodes(&[QueueType::Graphics; 5]);
        let graph = graph(5, &[(0, 1), (1, 3), (0, 2), (2, 4), (4, 3)]);
        let resolved = DependencyResolver::new(&graph, &nodes).resolve();

        assert_eq!(resolved.pass_level(PassId(0)), 0);
        assert_eq!(resolved.pass_level(PassId(1)), 1);
        assert_eq!(resolved.pass_level(PassId(2)), 1);
        assert_eq!(resolved.pass_level(PassId(4)), 2);
        assert_eq!(resolved.pass_level(PassId(3)), 3);
        assert_eq!(resolved.levels().len(), 4);
    }

    #[test]
    fn test_every_edge_increases_level() {
        let nodes = nodes(&[QueueType::Graphics; 6]);
        let edges = [(0, 2), (1, 2), (2, 5), (0, 3), (3, 4), (4, 5), (1, 5)];
        let graph = graph(6, &edges);
        let resolved = DependencyResolver::new(&graph, &nodes).resolve();

        for (from, to) in edges {
            assert!(resolved.pass_level(PassId(from)) < resolved.pass_level(PassId(to)));
        }
    }

    #[test]
    fn test_queue_buckets_keep_registration_order() {
        let nodes = nodes(&[
            QueueType::AsyncCompute,
            QueueType::Graphics,
            QueueType::AsyncCompute,
            QueueType::AsyncCopy,
        ]);
        let graph = graph(4, &[]);
        let resolved = DependencyResolver::new(&graph, &nodes).resolve();
        let level = &resolved.levels()[0];

        assert_eq!(level.passes(QueueType::AsyncCompute), &[PassId(0), PassId(2)]);
        assert_eq!(level.passes(QueueType::Graphics), &[PassId(1)]);
        assert_eq!(level.passes(QueueType::AsyncCopy), &[PassId(3)]);
        assert_eq!(level.all_passes(), &[PassId(0), PassId(1), PassId(2), PassId(3)]);
    }

    #[test]
    #[should_panic(expected = "dependency cycle")]
    fn test_cycle_reachable_from_root_panics() {
        let nodes = nodes(&[QueueType::Graphics; 3]);
        let graph = graph(3, &[(0, 1), (1, 2), (2, 1)]);
        DependencyResolver::new(&graph, &nodes).resolve();
    }

    #[test]
    #[should_panic(expected = "unreachable from any root")]
    fn test_cycle_without_root_panics() {
        let nodes = nodes(&[QueueType::Graphics; 2]);
        let graph = graph(2, &[(0, 1), (1, 0)]);
        DependencyResolver::new(&graph, &nodes).resolve();
    }

    #[test]
    fn test_empty_graph() {
        let graph = graph(0, &[]);
        let resolved = DependencyResolver::new(&graph, &[]).resolve();
        assert!(resolved.levels().is_empty());
    }
}
