//! Incremental cycle detection over the theory graph.
//!
//! Pearce-Kelly-style topological maintenance: every vertex carries a level;
//! inserting `from -> to` with `level(from) >= level(to)` triggers a bounded
//! backward search over same-level in-edges followed by a forward search
//! that raises levels. Level labels are restored lazily on removal -- stale
//! levels are tolerated, correctness relies only on the reachability test at
//! insertion time.
//!
//! Edges are multi-edges: the per-vertex stores are keyed by
//! `(neighbour, Reason)` with a count, so removing one reason-tagged
//! instance preserves the edge while an alternate reason remains.

use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};
use polycheck_core::graph::Vertex;

use crate::lit::Var;

/// The conjunction of solver variables implying an edge (at most two), plus
/// the middle vertex when the edge is the composition of a dependency and an
/// anti-dependency. Known-graph edges carry no variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reason {
    /// Variable gating the dependency half, if any.
    pub dep: Option<Var>,
    /// Variable gating the anti-dependency half, if any.
    pub anti: Option<Var>,
    /// Middle vertex of a composed edge.
    pub via: Option<Vertex>,
}

impl Reason {
    pub const KNOWN: Self = Self {
        dep: None,
        anti: None,
        via: None,
    };

    #[must_use]
    pub const fn dep(var: Option<Var>) -> Self {
        Self {
            dep: var,
            anti: None,
            via: None,
        }
    }

    #[must_use]
    pub const fn anti(var: Option<Var>) -> Self {
        Self {
            dep: None,
            anti: var,
            via: None,
        }
    }

    #[must_use]
    pub const fn composite(dep: Option<Var>, anti: Option<Var>, via: Vertex) -> Self {
        Self {
            dep,
            anti,
            via: Some(via),
        }
    }

    /// Variables this reason conjoins.
    pub fn vars(&self) -> impl Iterator<Item = Var> {
        self.dep.into_iter().chain(self.anti)
    }
}

/// A directed cycle found at insertion time. Edge `i` runs from
/// `vertices[i]` to `vertices[(i + 1) % vertices.len()]` and carries
/// `reasons[i]`.
#[derive(Debug, Clone)]
pub struct Cycle {
    pub vertices: Vec<Vertex>,
    pub reasons: Vec<Reason>,
}

impl Cycle {
    /// De-duplicated, sorted variables of the cycle's reason sets; negating
    /// their conjunction is the learned clause.
    #[must_use]
    pub fn vars(&self) -> Vec<Var> {
        let mut vars: Vec<Var> = self.reasons.iter().flat_map(Reason::vars).collect();
        vars.sort_unstable();
        vars.dedup();
        vars
    }
}

type EdgeRec = (Vertex, Reason);

#[derive(Debug)]
pub struct IcdGraph {
    level: Vec<u32>,
    /// All outgoing edges.
    out: Vec<HashMap<EdgeRec, u32>>,
    /// Same-level incoming edges, rebuilt lazily during level raises.
    incoming: Vec<HashMap<EdgeRec, u32>>,
    m: usize,
    max_m: usize,
}

fn bump(store: &mut HashMap<EdgeRec, u32>, rec: EdgeRec) {
    *store.entry(rec).or_insert(0) += 1;
}

fn unbump(store: &mut HashMap<EdgeRec, u32>, rec: &EdgeRec) -> bool {
    match store.get_mut(rec) {
        Some(count) if *count > 1 => {
            *count -= 1;
            true
        }
        Some(_) => {
            store.remove(rec);
            true
        }
        None => false,
    }
}

impl IcdGraph {
    #[must_use]
    pub fn new(n_vertices: usize) -> Self {
        Self {
            level: vec![1; n_vertices],
            out: vec![HashMap::new(); n_vertices],
            incoming: vec![HashMap::new(); n_vertices],
            m: 0,
            max_m: 0,
        }
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.m
    }

    fn store(&mut self, from: Vertex, to: Vertex, reason: Reason) {
        bump(&mut self.out[from as usize], (to, reason));
        if self.level[from as usize] == self.level[to as usize] {
            bump(&mut self.incoming[to as usize], (from, reason));
        }
        self.m += 1;
        self.max_m = self.max_m.max(self.m);
    }

    /// Insert `from -> to`; on a directed cycle the edge is *not* inserted
    /// and the cycle is returned for conflict-clause construction.
    pub fn add_edge(&mut self, from: Vertex, to: Vertex, reason: Reason) -> Result<(), Cycle> {
        if self.level[from as usize] < self.level[to as usize] {
            self.store(from, to, reason);
            return Ok(());
        }

        // Backward search over same-level in-edges, bounded by delta.
        let delta = ((self.max_m as f64).sqrt() as usize) / 8 + 1;
        let mut backward_pred: HashMap<Vertex, (Vertex, Reason)> = HashMap::new();
        let mut backward_visited: HashSet<Vertex> = HashSet::new();
        let mut queue: VecDeque<Vertex> = VecDeque::new();
        queue.push_back(from);
        backward_visited.insert(from);
        let mut visited = 0_usize;
        let mut budget_hit = false;

        while let Some(x) = queue.pop_front() {
            if x == to {
                return Err(self.backward_cycle(&backward_pred, from, to, reason));
            }
            visited += 1;
            if visited >= delta {
                budget_hit = true;
                break;
            }
            for &(y, r) in self.incoming[x as usize].keys() {
                if backward_visited.insert(y) {
                    backward_pred.insert(y, (x, r));
                    queue.push_back(y);
                }
            }
        }

        if budget_hit {
            // Traversed at least delta arcs: jump the target one level up
            // and restart the membership set from the source alone.
            self.level[to as usize] = self.level[from as usize] + 1;
            backward_visited.clear();
            backward_visited.insert(from);
        } else {
            if self.level[from as usize] == self.level[to as usize] {
                self.store(from, to, reason);
                return Ok(());
            }
            self.level[to as usize] = self.level[from as usize];
        }
        self.incoming[to as usize].clear();

        // Forward search from the target, raising levels and rebuilding
        // in-sets as it goes.
        let mut forward_pred: HashMap<Vertex, (Vertex, Reason)> = HashMap::new();
        let mut forward_visited: HashSet<Vertex> = HashSet::new();
        let mut queue: VecDeque<Vertex> = VecDeque::new();
        queue.push_back(to);

        while let Some(x) = queue.pop_front() {
            if !forward_visited.insert(x) {
                continue;
            }
            let out_edges: Vec<EdgeRec> = self.out[x as usize].keys().copied().collect();
            for (y, r) in out_edges {
                if backward_visited.contains(&y) {
                    forward_pred.insert(y, (x, r));
                    return Err(self.forward_cycle(
                        &backward_pred,
                        &forward_pred,
                        from,
                        to,
                        reason,
                        y,
                    ));
                }
                if self.level[x as usize] == self.level[y as usize] {
                    bump(&mut self.incoming[y as usize], (x, r));
                } else if self.level[y as usize] < self.level[x as usize] {
                    self.level[y as usize] = self.level[x as usize];
                    self.incoming[y as usize].clear();
                    bump(&mut self.incoming[y as usize], (x, r));
                    forward_pred.insert(y, (x, r));
                    queue.push_back(y);
                }
            }
        }

        self.store(from, to, reason);
        Ok(())
    }

    /// Remove one reason-tagged instance of `from -> to`. Returns false when
    /// the instance is not present, which indicates a bookkeeping bug.
    #[must_use]
    pub fn remove_edge(&mut self, from: Vertex, to: Vertex, reason: Reason) -> bool {
        if !unbump(&mut self.out[from as usize], &(to, reason)) {
            return false;
        }
        // The in-set is a lazily maintained subset; absence is fine.
        let _ = unbump(&mut self.incoming[to as usize], &(from, reason));
        self.m -= 1;
        true
    }

    fn backward_cycle(
        &self,
        backward_pred: &HashMap<Vertex, (Vertex, Reason)>,
        from: Vertex,
        to: Vertex,
        reason: Reason,
    ) -> Cycle {
        // New edge from -> to, then the discovered in-edge path to ~> from.
        let mut vertices = vec![from];
        if to != from {
            vertices.push(to);
        }
        let mut reasons = vec![reason];
        let mut x = to;
        while x != from {
            let (px, r) = backward_pred[&x];
            reasons.push(r);
            if px != from {
                vertices.push(px);
            }
            x = px;
        }
        Cycle { vertices, reasons }
    }

    fn forward_cycle(
        &self,
        backward_pred: &HashMap<Vertex, (Vertex, Reason)>,
        forward_pred: &HashMap<Vertex, (Vertex, Reason)>,
        from: Vertex,
        to: Vertex,
        reason: Reason,
        middle: Vertex,
    ) -> Cycle {
        // from -> to (new), to ~> middle (forward edges), middle ~> from
        // (backward edges).
        let mut chain = vec![(from, to, reason)];

        let mut forward_chain = Vec::new();
        let mut x = middle;
        while x != to {
            let (px, r) = forward_pred[&x];
            forward_chain.push((px, x, r));
            x = px;
        }
        forward_chain.reverse();
        chain.extend(forward_chain);

        let mut x = middle;
        while x != from {
            let (px, r) = backward_pred[&x];
            chain.push((x, px, r));
            x = px;
        }

        let vertices = chain.iter().map(|&(f, _, _)| f).collect();
        let reasons = chain.iter().map(|&(_, _, r)| r).collect();
        Cycle { vertices, reasons }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(g: &mut IcdGraph, from: Vertex, to: Vertex, var: Var) -> Result<(), Cycle> {
        g.add_edge(from, to, Reason::dep(Some(var)))
    }

    #[test]
    fn chain_stays_acyclic() {
        let mut g = IcdGraph::new(4);
        add(&mut g, 0, 1, 0).unwrap();
        add(&mut g, 1, 2, 1).unwrap();
        add(&mut g, 2, 3, 2).unwrap();
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn two_cycle_is_detected_with_both_reasons() {
        let mut g = IcdGraph::new(2);
        add(&mut g, 0, 1, 7).unwrap();
        let cycle = add(&mut g, 1, 0, 9).unwrap_err();
        assert_eq!(cycle.vars(), vec![7, 9]);
        // the rejected edge was not inserted
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn long_cycle_is_detected() {
        let mut g = IcdGraph::new(5);
        for i in 0..4 {
            add(&mut g, i, i + 1, i).unwrap();
        }
        let cycle = g.add_edge(4, 0, Reason::dep(Some(4))).unwrap_err();
        assert_eq!(cycle.vars(), vec![0, 1, 2, 3, 4]);
        assert_eq!(cycle.vertices.len(), cycle.reasons.len());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut g = IcdGraph::new(2);
        let cycle = g.add_edge(1, 1, Reason::dep(Some(3))).unwrap_err();
        assert_eq!(cycle.vars(), vec![3]);
        assert_eq!(cycle.vertices, vec![1]);
        assert_eq!(cycle.reasons.len(), 1);
    }

    #[test]
    fn remove_then_close_the_gap() {
        let mut g = IcdGraph::new(3);
        add(&mut g, 0, 1, 0).unwrap();
        add(&mut g, 1, 2, 1).unwrap();
        // 2 -> 0 closes a cycle
        assert!(g.add_edge(2, 0, Reason::dep(Some(2))).is_err());
        // after removing 1 -> 2 it no longer does
        assert!(g.remove_edge(1, 2, Reason::dep(Some(1))));
        g.add_edge(2, 0, Reason::dep(Some(2))).unwrap();
        // and re-adding 1 -> 2 now closes it again
        assert!(g.add_edge(1, 2, Reason::dep(Some(1))).is_err());
    }

    #[test]
    fn parallel_reasons_are_a_multiset() {
        let mut g = IcdGraph::new(2);
        g.add_edge(0, 1, Reason::dep(Some(0))).unwrap();
        g.add_edge(0, 1, Reason::dep(Some(2))).unwrap();
        assert_eq!(g.edge_count(), 2);

        assert!(g.remove_edge(0, 1, Reason::dep(Some(0))));
        // the same instance cannot be removed twice
        assert!(!g.remove_edge(0, 1, Reason::dep(Some(0))));
        // the alternate reason still holds the edge
        assert!(g.add_edge(1, 0, Reason::dep(Some(5))).is_err());
    }

    #[test]
    fn known_edges_have_no_vars() {
        let mut g = IcdGraph::new(2);
        g.add_edge(0, 1, Reason::KNOWN).unwrap();
        let cycle = g.add_edge(1, 0, Reason::anti(Some(4))).unwrap_err();
        assert_eq!(cycle.vars(), vec![4]);
    }

    #[test]
    fn dense_random_insertions_match_reachability() {
        // insert a fixed pseudo-random edge set; every accepted edge keeps
        // the graph a DAG, every rejection corresponds to an actual path
        let n = 32_u32;
        let mut g = IcdGraph::new(n as usize);
        let mut naive: Vec<Vec<bool>> = vec![vec![false; n as usize]; n as usize];

        let reachable = |adj: &Vec<Vec<bool>>, from: u32, to: u32| -> bool {
            let mut stack = vec![from];
            let mut seen = vec![false; adj.len()];
            while let Some(x) = stack.pop() {
                if x == to {
                    return true;
                }
                if seen[x as usize] {
                    continue;
                }
                seen[x as usize] = true;
                for (y, &e) in adj[x as usize].iter().enumerate() {
                    if e {
                        stack.push(y as u32);
                    }
                }
            }
            false
        };

        // simple LCG so the test is deterministic
        let mut state = 0x2545_f491_u64;
        let mut next = || {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            (state >> 33) as u32
        };

        for var in 0..600 {
            let from = next() % n;
            let to = next() % n;
            if from == to {
                continue;
            }
            let would_cycle = reachable(&naive, to, from);
            match g.add_edge(from, to, Reason::dep(Some(var))) {
                Ok(()) => {
                    assert!(!would_cycle, "accepted a cycle-closing edge {from}->{to}");
                    naive[from as usize][to as usize] = true;
                }
                Err(cycle) => {
                    assert!(would_cycle, "rejected acyclic edge {from}->{to}");
                    assert!(!cycle.vars().is_empty());
                }
            }
        }
    }
}
