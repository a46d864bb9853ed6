//! The acyclicity theory: per-variable edge bundles over an incremental
//! cycle detector, with the induced-closure bookkeeping for snapshot
//! isolation.
//!
//! Under serializability every bundle edge is inserted into the detector
//! directly. Under snapshot isolation the theory maintains two per-vertex
//! stores -- incoming dependency edges and outgoing anti-dependency
//! edges -- and the detector only ever sees dependency edges and
//! dependency-then-anti-dependency compositions. Anti-dependency-only
//! cycles therefore never materialize, which is exactly the relaxation
//! snapshot isolation permits.
//!
//! Every insertion is recorded as an undo entry on the owning variable, so
//! retraction restores the detector to its prior edge set exactly.

use hashbrown::HashSet;
use polycheck_core::graph::{DependencyGraph, Vertex};
use polycheck_core::polygraph::{EdgeSpec, WriteOrderConstraint};
use polycheck_core::verdict::Isolation;

use crate::icd::{Cycle, IcdGraph, Reason};
use crate::lit::Var;

type Reg = (Vertex, Option<Var>);

#[derive(Debug, Clone, Copy)]
enum Undo {
    Icd {
        from: Vertex,
        to: Vertex,
        reason: Reason,
    },
    DepReg {
        from: Vertex,
        to: Vertex,
        var: Option<Var>,
    },
    AntiReg {
        from: Vertex,
        to: Vertex,
        var: Option<Var>,
    },
}

#[derive(Debug)]
pub struct AcyclicityTheory {
    isolation: Isolation,
    icd: IcdGraph,
    /// Edges gated by each variable; variable `2i` carries constraint `i`'s
    /// forward bundle, `2i + 1` its reverse bundle.
    bundles: Vec<Vec<EdgeSpec>>,
    /// Incoming dependency edges per vertex, with their gating variable.
    dep_in: Vec<HashSet<Reg>>,
    /// Outgoing anti-dependency edges per vertex, with their gating variable.
    anti_out: Vec<HashSet<Reg>>,
    /// Undo log per variable; empty while the variable's edges are not live.
    undo: Vec<Vec<Undo>>,
}

impl AcyclicityTheory {
    #[must_use]
    pub fn new(
        n_vertices: u32,
        isolation: Isolation,
        constraints: &[WriteOrderConstraint],
    ) -> Self {
        let mut bundles = Vec::with_capacity(constraints.len() * 2);
        for constraint in constraints {
            bundles.push(constraint.forward.edges.clone());
            bundles.push(constraint.reverse.edges.clone());
        }
        let n = n_vertices as usize;
        let n_vars = bundles.len();
        Self {
            isolation,
            icd: IcdGraph::new(n),
            bundles,
            dep_in: vec![HashSet::new(); n],
            anti_out: vec![HashSet::new(); n],
            undo: vec![Vec::new(); n_vars],
        }
    }

    #[must_use]
    pub fn n_vars(&self) -> usize {
        self.bundles.len()
    }

    #[must_use]
    pub fn bundle(&self, var: Var) -> &[EdgeSpec] {
        &self.bundles[var as usize]
    }

    /// The other variable of `var`'s exactly-one group.
    #[must_use]
    pub const fn sibling(var: Var) -> Var {
        var ^ 1
    }

    /// Insert the unconditional known-graph edges. A cycle here means the
    /// known graph (or its induced closure) is already inconsistent.
    pub fn preprocess(&mut self, known: &DependencyGraph) -> Result<(), Cycle> {
        let mut sink = Vec::new();
        let dep_edges: Vec<(Vertex, Vertex)> = known.dep_edges().map(|(f, t, _, _)| (f, t)).collect();
        for (from, to) in dep_edges {
            self.insert_dep(None, from, to, &mut sink)?;
        }
        let anti_edges: Vec<(Vertex, Vertex)> = known.anti_dep_edges().map(|(f, t, _, _)| (f, t)).collect();
        for (from, to) in anti_edges {
            self.insert_anti(None, from, to, &mut sink)?;
        }
        tracing::debug!(
            edges = self.icd.edge_count(),
            "known graph loaded into cycle detector"
        );
        Ok(())
    }

    /// Materialize the edges gated by `var`. On a cycle, everything inserted
    /// by this call is rolled back and the cycle is returned.
    pub fn assert_var(&mut self, var: Var) -> Result<(), Cycle> {
        debug_assert!(self.undo[var as usize].is_empty());
        let specs = self.bundles[var as usize].clone();
        let mut undo = Vec::new();
        for spec in &specs {
            let result = if spec.kind.is_dep() {
                self.insert_dep(Some(var), spec.from, spec.to, &mut undo)
            } else {
                self.insert_anti(Some(var), spec.from, spec.to, &mut undo)
            };
            if let Err(cycle) = result {
                self.rollback(&undo);
                return Err(cycle);
            }
        }
        self.undo[var as usize] = undo;
        Ok(())
    }

    /// Retract the edges gated by `var`, restoring the detector exactly.
    ///
    /// # Errors
    ///
    /// Returns a description of the violated invariant when an edge to be
    /// removed is not present; this indicates a bug, not a bad history.
    pub fn retract_var(&mut self, var: Var) -> Result<(), &'static str> {
        let undo = std::mem::take(&mut self.undo[var as usize]);
        for entry in undo.iter().rev() {
            if !self.undo_one(entry) {
                return Err("retracted edge missing from cycle detector");
            }
        }
        Ok(())
    }

    fn rollback(&mut self, undo: &[Undo]) {
        for entry in undo.iter().rev() {
            // mid-assert rollback removes edges this call just inserted
            let present = self.undo_one(entry);
            debug_assert!(present, "rollback of an edge that was never inserted");
        }
    }

    fn undo_one(&mut self, entry: &Undo) -> bool {
        match *entry {
            Undo::Icd { from, to, reason } => self.icd.remove_edge(from, to, reason),
            Undo::DepReg { from, to, var } => self.dep_in[to as usize].remove(&(from, var)),
            Undo::AntiReg { from, to, var } => self.anti_out[from as usize].remove(&(to, var)),
        }
    }

    fn add_icd(
        &mut self,
        from: Vertex,
        to: Vertex,
        reason: Reason,
        undo: &mut Vec<Undo>,
    ) -> Result<(), Cycle> {
        self.icd.add_edge(from, to, reason)?;
        undo.push(Undo::Icd { from, to, reason });
        Ok(())
    }

    /// Insert a dependency edge (SO/WR/WW) and, under snapshot isolation,
    /// the compositions with every anti-dependency leaving its target.
    fn insert_dep(
        &mut self,
        var: Option<Var>,
        from: Vertex,
        to: Vertex,
        undo: &mut Vec<Undo>,
    ) -> Result<(), Cycle> {
        self.add_icd(from, to, Reason::dep(var), undo)?;

        if self.isolation == Isolation::SnapshotIsolation {
            let outgoing: Vec<Reg> = self.anti_out[to as usize].iter().copied().collect();
            for (rw_to, anti_var) in outgoing {
                self.add_icd(
                    from,
                    rw_to,
                    Reason::composite(var, anti_var, to),
                    undo,
                )?;
            }
            if self.dep_in[to as usize].insert((from, var)) {
                undo.push(Undo::DepReg { from, to, var });
            }
        }
        Ok(())
    }

    /// Insert an anti-dependency edge (RW). Under serializability it enters
    /// the detector directly; under snapshot isolation only its compositions
    /// with the dependency edges entering its source do.
    fn insert_anti(
        &mut self,
        var: Option<Var>,
        from: Vertex,
        to: Vertex,
        undo: &mut Vec<Undo>,
    ) -> Result<(), Cycle> {
        match self.isolation {
            Isolation::Serializability => {
                self.add_icd(from, to, Reason::anti(var), undo)?;
            }
            Isolation::SnapshotIsolation => {
                let incoming: Vec<Reg> = self.dep_in[from as usize].iter().copied().collect();
                for (dep_from, dep_var) in incoming {
                    self.add_icd(
                        dep_from,
                        to,
                        Reason::composite(dep_var, var, from),
                        undo,
                    )?;
                }
                if self.anti_out[from as usize].insert((to, var)) {
                    undo.push(Undo::AntiReg { from, to, var });
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.icd.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use polycheck_core::graph::EdgeKind;
    use polycheck_core::polygraph::EdgeBundle;

    use super::*;

    fn spec(from: Vertex, to: Vertex, kind: EdgeKind) -> EdgeSpec {
        EdgeSpec {
            from,
            to,
            kind,
            keys: BTreeSet::from([1]),
        }
    }

    fn constraint(
        forward: Vec<EdgeSpec>,
        reverse: Vec<EdgeSpec>,
        p: Vertex,
        q: Vertex,
    ) -> WriteOrderConstraint {
        WriteOrderConstraint {
            forward: EdgeBundle {
                first: p,
                second: q,
                edges: forward,
            },
            reverse: EdgeBundle {
                first: q,
                second: p,
                edges: reverse,
            },
        }
    }

    #[test]
    fn assert_then_retract_restores_the_detector() {
        // constraint 0: WW 0->1 with induced RW 2->1, or WW 1->0
        let constraints = vec![constraint(
            vec![spec(0, 1, EdgeKind::Ww), spec(2, 1, EdgeKind::Rw)],
            vec![spec(1, 0, EdgeKind::Ww)],
            0,
            1,
        )];
        let mut theory = AcyclicityTheory::new(3, Isolation::Serializability, &constraints);
        assert_eq!(theory.n_vars(), 2);

        let before = theory.edge_count();
        theory.assert_var(0).unwrap();
        assert_eq!(theory.edge_count(), before + 2);
        theory.retract_var(0).unwrap();
        assert_eq!(theory.edge_count(), before);

        // the opposite bundle is insertable after retraction
        theory.assert_var(1).unwrap();
        assert_eq!(theory.edge_count(), before + 1);
        theory.retract_var(1).unwrap();
    }

    #[test]
    fn conflicting_bundles_produce_a_cycle() {
        let constraints = vec![
            constraint(vec![spec(0, 1, EdgeKind::Ww)], vec![spec(1, 0, EdgeKind::Ww)], 0, 1),
        ];
        let mut theory = AcyclicityTheory::new(2, Isolation::Serializability, &constraints);
        theory.assert_var(0).unwrap();
        // simulate the sibling being asserted anyway at theory level
        let mut known = DependencyGraph::new(2);
        known.add_edge(EdgeKind::So, 1, 0, []);
        let cycle = theory.preprocess(&known).unwrap_err();
        assert_eq!(cycle.vars(), vec![0]);
    }

    #[test]
    fn failed_assert_rolls_back_partial_insertions() {
        // known SO 1 -> 0; asserting WW 0->1 + RW 2->1 must fail and leave
        // the edge count untouched
        let constraints = vec![constraint(
            vec![spec(0, 1, EdgeKind::Ww), spec(2, 1, EdgeKind::Rw)],
            vec![spec(1, 0, EdgeKind::Ww)],
            0,
            1,
        )];
        let mut theory = AcyclicityTheory::new(3, Isolation::Serializability, &constraints);
        let mut known = DependencyGraph::new(3);
        known.add_edge(EdgeKind::So, 1, 0, []);
        theory.preprocess(&known).unwrap();

        let before = theory.edge_count();
        let cycle = theory.assert_var(0).unwrap_err();
        assert!(cycle.vars().contains(&0));
        assert_eq!(theory.edge_count(), before);
        // and the sibling still works
        theory.assert_var(1).unwrap();
    }

    #[test]
    fn si_mode_tolerates_anti_dependency_cycles() {
        // pure RW 2-cycle: 0 -> 1 and 1 -> 0, both anti-dependencies
        let constraints = vec![
            constraint(vec![spec(0, 1, EdgeKind::Rw)], vec![spec(2, 2, EdgeKind::Ww)], 0, 1),
            constraint(vec![spec(1, 0, EdgeKind::Rw)], vec![spec(2, 2, EdgeKind::Ww)], 1, 0),
        ];

        let mut ser = AcyclicityTheory::new(3, Isolation::Serializability, &constraints);
        ser.assert_var(0).unwrap();
        assert!(ser.assert_var(2).is_err(), "serializability must reject");

        let mut si = AcyclicityTheory::new(3, Isolation::SnapshotIsolation, &constraints);
        si.assert_var(0).unwrap();
        si.assert_var(2)
            .expect("snapshot isolation tolerates an RW-only cycle");
    }

    #[test]
    fn si_mode_composes_dependencies_with_anti_dependencies() {
        // known dep 0 -> 1, gated RW 1 -> 0: the composition 0 -> 0 is a
        // self-loop, so SI rejects despite the raw RW edge being invisible
        let constraints = vec![constraint(
            vec![spec(1, 0, EdgeKind::Rw)],
            vec![spec(2, 2, EdgeKind::Ww)],
            1,
            0,
        )];
        let mut theory = AcyclicityTheory::new(3, Isolation::SnapshotIsolation, &constraints);
        let mut known = DependencyGraph::new(3);
        known.add_edge(EdgeKind::Wr, 0, 1, [1]);
        theory.preprocess(&known).unwrap();

        let cycle = theory.assert_var(0).unwrap_err();
        assert_eq!(cycle.vars(), vec![0]);
        // the composite records its middle vertex for diagnostics
        assert!(cycle.reasons.iter().any(|r| r.via == Some(1)));
    }
}
