//! Reference dominator computation.
//!
//! The Allen–Cocke set-based dataflow: `dom(v) = {v} ∪ ⋂ dom(p)` over
//! the predecessors of `v`, iterated to a fixpoint. Quadratic and
//! allocation-heavy, it exists to certify the iterative
//! immediate-dominator computation in [`crate::Cfg`]; the tests are its
//! only consumer.

use alloc::{vec, vec::Vec};

use crate::{cfg::Successors, intset::IntSet};

/// A CFG with full dominator sets per node.
#[derive(Debug, Clone)]
pub struct SimpleCfg {
    succs: Vec<Successors>,
    preds: Vec<Vec<u32>>,
    reachable: Vec<bool>,
    doms: Vec<Option<IntSet>>,
}

impl SimpleCfg {
    /// Create a CFG from per-node successor bundles and compute the
    /// dominator set of every reachable node.
    pub fn analyze(succs: Vec<Successors>) -> Self {
        let n = succs.len();
        let mut cfg = Self {
            succs,
            preds: vec![Vec::new(); n],
            reachable: vec![false; n],
            doms: vec![None; n],
        };
        if n == 0 {
            return cfg;
        }
        cfg.compute_reachability();
        cfg.compute_predecessors();
        cfg.compute_dominators();
        cfg
    }

    /// The dominator set of `node`, or `None` if unreachable.
    pub fn dominators(&self, node: u32) -> Option<&IntSet> {
        self.doms[node as usize].as_ref()
    }

    /// Whether `a` dominates `b`.
    pub fn dominates(&self, a: u32, b: u32) -> bool {
        self.dominators(b).is_some_and(|doms| doms.contains(a))
    }

    fn compute_reachability(&mut self) {
        let mut stack = vec![0u32];
        self.reachable[0] = true;
        while let Some(node) = stack.pop() {
            for succ in self.succs[node as usize].iter() {
                if !self.reachable[succ as usize] {
                    self.reachable[succ as usize] = true;
                    stack.push(succ);
                }
            }
        }
    }

    fn compute_predecessors(&mut self) {
        for node in 0..self.succs.len() as u32 {
            if !self.reachable[node as usize] {
                continue;
            }
            for succ in self.succs[node as usize].iter() {
                self.preds[succ as usize].push(node);
            }
        }
    }

    /// Iterate `dom(v) = {v} ∪ ⋂ dom(p)` until nothing changes.
    fn compute_dominators(&mut self) {
        self.doms[0] = Some(IntSet::from_slice(&[0]));
        let mut changed = true;
        while changed {
            changed = false;
            for node in 1..self.succs.len() as u32 {
                if !self.reachable[node as usize] {
                    continue;
                }
                // Incrementally intersect the predecessors' sets.
                let mut new_doms: Option<IntSet> = None;
                for &pred in &self.preds[node as usize] {
                    let Some(pred_doms) = &self.doms[pred as usize] else {
                        continue;
                    };
                    match &mut new_doms {
                        None => new_doms = Some(pred_doms.clone()),
                        Some(set) => set.intersect_with(pred_doms),
                    }
                }
                let Some(mut new_doms) = new_doms else {
                    continue;
                };
                new_doms.insert(node);
                if self.doms[node as usize].as_ref() != Some(&new_doms) {
                    self.doms[node as usize] = Some(new_doms);
                    changed = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_dominators() {
        let cfg = SimpleCfg::analyze(vec![
            Successors::One(1),
            Successors::One(2),
            Successors::None,
        ]);
        let doms = cfg.dominators(2).unwrap();
        assert_eq!(doms.iter().collect::<Vec<_>>(), [0, 1, 2]);
    }

    #[test]
    fn test_diamond_dominators() {
        let cfg = SimpleCfg::analyze(vec![
            Successors::Two(1, 2),
            Successors::One(3),
            Successors::One(3),
            Successors::None,
        ]);
        let doms = cfg.dominators(3).unwrap();
        assert_eq!(doms.iter().collect::<Vec<_>>(), [0, 3]);
        assert!(cfg.dominates(0, 1));
        assert!(!cfg.dominates(1, 3));
    }

    #[test]
    fn test_unreachable_has_no_dominators() {
        let cfg = SimpleCfg::analyze(vec![Successors::None, Successors::One(0)]);
        assert!(cfg.dominators(1).is_none());
    }
}
