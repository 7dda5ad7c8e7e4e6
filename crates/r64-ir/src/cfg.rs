//! Control-flow graph analysis.
//!
//! `Cfg::analyze` computes, in order: a BFS spanning tree rooted at node
//! 0 (each reached node gets a monotone BFS number equal to its enqueue
//! index), a post-order traversal of that tree, predecessor lists
//! (edges from reachable nodes only), immediate dominators by the
//! Cooper–Harvey–Kennedy iterative dataflow, and dominator-tree depths.

use alloc::{vec, vec::Vec};

use log::debug;

/// BFS number of nodes the spanning tree never reached.
pub const UNREACHABLE: u32 = u32::MAX;

/// The successor bundle of a node: zero, one, or two edges.
///
/// Blocks never have more than two successors; the bundle keeps that
/// invariant at the type level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Successors {
    #[default]
    None,
    One(u32),
    Two(u32, u32),
}

impl Successors {
    /// Iterate over the successor indices.
    pub fn iter(&self) -> impl Iterator<Item = u32> {
        let (first, second) = match *self {
            Successors::None => (None, None),
            Successors::One(a) => (Some(a), None),
            Successors::Two(a, b) => (Some(a), Some(b)),
        };
        first.into_iter().chain(second)
    }
}

/// A control-flow graph over `n` nodes, rooted at node 0.
#[derive(Debug, Clone)]
pub struct Cfg {
    succs: Vec<Successors>,
    /// BFS number per node; `UNREACHABLE` for nodes the tree missed.
    bfs_number: Vec<u32>,
    /// Reachable nodes in BFS enqueue order.
    bfs_order: Vec<u32>,
    /// Reachable nodes in post-order of the BFS spanning tree.
    postorder: Vec<u32>,
    /// Predecessor lists, populated from reachable nodes only.
    preds: Vec<Vec<u32>>,
    /// Immediate dominator per node; `idom[0] == 0` is the root sentinel.
    idom: Vec<u32>,
    /// Number of strict dominators above each reachable node.
    depth: Vec<u32>,
}

impl Cfg {
    /// Create a CFG from per-node successor bundles and analyze it.
    pub fn analyze(succs: Vec<Successors>) -> Self {
        let n = succs.len();
        let mut cfg = Self {
            succs,
            bfs_number: vec![UNREACHABLE; n],
            bfs_order: Vec::with_capacity(n),
            postorder: Vec::with_capacity(n),
            preds: vec![Vec::new(); n],
            idom: vec![UNREACHABLE; n],
            depth: vec![0; n],
        };
        if n == 0 {
            return cfg;
        }
        cfg.compute_bfs();
        cfg.compute_postorder();
        cfg.compute_predecessors();
        cfg.find_immediate_dominators();
        cfg.compute_depths();
        debug!(
            "cfg analyzed: {} nodes, {} reachable",
            n,
            cfg.bfs_order.len()
        );
        cfg
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.succs.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.succs.is_empty()
    }

    /// The BFS number of `node`, or `UNREACHABLE`.
    pub fn bfs_number(&self, node: u32) -> u32 {
        self.bfs_number[node as usize]
    }

    /// Whether `node` is reachable from the root.
    pub fn is_reachable(&self, node: u32) -> bool {
        self.bfs_number[node as usize] != UNREACHABLE
    }

    /// Reachable nodes in post-order of the BFS spanning tree.
    pub fn postorder(&self) -> &[u32] {
        &self.postorder
    }

    /// The predecessors of `node`.
    pub fn predecessors(&self, node: u32) -> &[u32] {
        &self.preds[node as usize]
    }

    /// The immediate dominator of `node`; `idom(0) == 0`.
    pub fn get_immediate_dominator(&self, node: u32) -> u32 {
        self.idom[node as usize]
    }

    /// The number of strict dominators above `node`.
    pub fn get_dominator_tree_depth(&self, node: u32) -> u32 {
        self.depth[node as usize]
    }

    /// Iterate over `node`, idom(node), idom(idom(node)), ..., producing
    /// the root exactly once. Empty for unreachable nodes.
    pub fn dominator_iter(&self, node: u32) -> DominatorIter<'_> {
        let start = if self.is_reachable(node) {
            Some(node)
        } else {
            None
        };
        DominatorIter { cfg: self, next: start }
    }

    /// BFS spanning tree from node 0: assigns BFS numbers in enqueue
    /// order and records the reachable sequence.
    fn compute_bfs(&mut self) {
        let mut queue = alloc::collections::VecDeque::new();
        self.bfs_number[0] = 0;
        self.bfs_order.push(0);
        queue.push_back(0u32);
        while let Some(node) = queue.pop_front() {
            for succ in self.succs[node as usize].iter() {
                if self.bfs_number[succ as usize] == UNREACHABLE {
                    self.bfs_number[succ as usize] = self.bfs_order.len() as u32;
                    self.bfs_order.push(succ);
                    queue.push_back(succ);
                }
            }
        }
    }

    /// Post-order of the BFS spanning tree (tree edges are the edges
    /// that first discovered each node).
    fn compute_postorder(&mut self) {
        // Rebuild the tree children from the BFS numbering: an edge
        // (u, v) is a tree edge iff u is the first reachable node that
        // discovered v, which the BFS numbering identifies uniquely.
        let mut parent = vec![UNREACHABLE; self.succs.len()];
        let mut children: Vec<Vec<u32>> = vec![Vec::new(); self.succs.len()];
        for &node in &self.bfs_order {
            for succ in self.succs[node as usize].iter() {
                if succ != 0
                    && parent[succ as usize] == UNREACHABLE
                    && self.bfs_number[succ as usize] > self.bfs_number[node as usize]
                {
                    parent[succ as usize] = node;
                    children[node as usize].push(succ);
                }
            }
        }

        // Iterative DFS over the tree, emitting nodes after their
        // children.
        let mut stack: Vec<(u32, usize)> = vec![(0, 0)];
        while let Some(top) = stack.last_mut() {
            let node = top.0;
            let child = top.1;
            if child < children[node as usize].len() {
                top.1 += 1;
                stack.push((children[node as usize][child], 0));
            } else {
                self.postorder.push(node);
                stack.pop();
            }
        }
    }

    /// Predecessor lists, considering edges from reachable nodes only.
    fn compute_predecessors(&mut self) {
        for &node in &self.bfs_order {
            for succ in self.succs[node as usize].iter() {
                self.preds[succ as usize].push(node);
            }
        }
    }

    /// Iterative Cooper–Harvey–Kennedy dataflow over the BFS numbering.
    fn find_immediate_dominators(&mut self) {
        self.idom[0] = 0;
        let mut changed = true;
        while changed {
            changed = false;
            for &node in &self.bfs_order[1..] {
                let mut new_idom = UNREACHABLE;
                for &pred in &self.preds[node as usize] {
                    if self.idom[pred as usize] == UNREACHABLE {
                        continue;
                    }
                    new_idom = if new_idom == UNREACHABLE {
                        pred
                    } else {
                        self.intersect(pred, new_idom)
                    };
                }
                if new_idom != UNREACHABLE && self.idom[node as usize] != new_idom {
                    self.idom[node as usize] = new_idom;
                    changed = true;
                }
            }
        }
    }

    /// Walk two fingers up the idom chain until they meet. The deeper
    /// finger (larger BFS number; farther from the root) advances.
    fn intersect(&self, mut a: u32, mut b: u32) -> u32 {
        while a != b {
            while self.bfs_number[a as usize] > self.bfs_number[b as usize] {
                a = self.idom[a as usize];
            }
            while self.bfs_number[b as usize] > self.bfs_number[a as usize] {
                b = self.idom[b as usize];
            }
        }
        a
    }

    /// Dominator-tree depths, in BFS order so each idom is done first.
    fn compute_depths(&mut self) {
        for &node in &self.bfs_order {
            if node == 0 {
                self.depth[0] = 0;
            } else {
                let idom = self.idom[node as usize];
                self.depth[node as usize] = self.depth[idom as usize] + 1;
            }
        }
    }
}

/// Lazy walk up the dominator chain, ending after the root.
pub struct DominatorIter<'a> {
    cfg: &'a Cfg,
    next: Option<u32>,
}

impl Iterator for DominatorIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let current = self.next?;
        let idom = self.cfg.idom[current as usize];
        self.next = if idom == current { None } else { Some(idom) };
        Some(current)
    }
}
