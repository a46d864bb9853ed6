//! SAT-modulo-theory decision procedure for transactional consistency.
//!
//! [`check`] is the user-facing entry point: it builds the polygraph from a
//! history (`polycheck_core`), optionally runs the deterministic pruner, and
//! then decides the remaining write-order constraints with a CDCL solver
//! whose theory keeps the graph of committed edges acyclic through an
//! incremental cycle detector. On reject, the last refuted cycle is mapped
//! back to transaction ids and edge labels.

pub mod icd;
pub mod lit;
pub mod solver;
pub mod theory;

use std::time::Instant;

use polycheck_core::graph::{DependencyGraph, EdgeKind, Vertex};
use polycheck_core::history::History;
use polycheck_core::polygraph::{constraints_of, known_graph_of, VertexMap};
use polycheck_core::prune::{prune_constraints, PruneOutcome};
use polycheck_core::verdict::{
    CheckError, CheckOptions, ConflictCycle, CycleEdge, Outcome, SolverBackend,
};

use crate::icd::Cycle;
use crate::lit::Lit;
use crate::solver::{Budget, SolveOutcome, Solver, SolverError};
use crate::theory::AcyclicityTheory;

/// Decide whether `history` satisfies the configured isolation level.
///
/// # Errors
///
/// - [`CheckError::Malformed`] -- the history is structurally broken
///   (missing writer, duplicate write, duplicate transaction id);
/// - [`CheckError::Timeout`] -- a configured budget ran out;
/// - [`CheckError::UnsupportedBackend`] -- the external SMT backend was
///   requested;
/// - [`CheckError::Invariant`] -- a solver invariant broke (a bug).
pub fn check(history: &History, options: &CheckOptions) -> Result<Outcome, CheckError> {
    if options.backend == SolverBackend::ExternalSmtUnused {
        return Err(CheckError::UnsupportedBackend);
    }
    if history.is_empty() {
        return Ok(Outcome::Accept);
    }

    let vertices = VertexMap::try_from_history(history)?;
    let mut known = known_graph_of(history, &vertices)?;
    let mut constraints = constraints_of(history, &known, &vertices);

    tracing::debug!(
        transactions = vertices.len(),
        constraints = constraints.len(),
        isolation = ?options.isolation,
        pruning = options.pruning,
        "checking history"
    );

    if options.pruning {
        match prune_constraints(&mut known, constraints, options.isolation, &vertices) {
            PruneOutcome::Pruned(rest) => constraints = rest,
            PruneOutcome::Rejected(cycle) => return Ok(Outcome::Reject(cycle)),
        }
    }

    let theory = AcyclicityTheory::new(vertices.len(), options.isolation, &constraints);
    let mut solver = Solver::new(theory);

    // One boolean per bundle; exactly one bundle of each constraint holds.
    for i in 0..constraints.len() as u32 {
        let forward = Lit::positive(2 * i);
        let reverse = Lit::positive(2 * i + 1);
        if !solver.add_clause(vec![forward, reverse])
            || !solver.add_clause(vec![!forward, !reverse])
        {
            return Err(CheckError::Invariant("encoding clauses are contradictory"));
        }
    }

    // Known edges are unconditional; a cycle here is a verdict, not an error.
    if let Err(cycle) = solver.theory_mut().preprocess(&known) {
        return Ok(Outcome::Reject(materialize_cycle(
            &cycle,
            &known,
            solver.theory(),
            &vertices,
        )));
    }

    let budget = Budget {
        conflicts: options.budget_conflicts,
        deadline: options.budget_wall.map(|wall| Instant::now() + wall),
    };

    match solver.solve(budget) {
        Ok(SolveOutcome::Sat) => Ok(Outcome::Accept),
        Ok(SolveOutcome::Unsat) => {
            let cycle = solver
                .last_cycle
                .take()
                .ok_or(CheckError::Invariant("reject without a recorded cycle"))?;
            Ok(Outcome::Reject(materialize_cycle(
                &cycle,
                &known,
                solver.theory(),
                &vertices,
            )))
        }
        Err(SolverError::Timeout) => Err(CheckError::Timeout),
        Err(SolverError::Invariant(what)) => Err(CheckError::Invariant(what)),
    }
}

/// Map a detector cycle back to transaction ids and edge labels, expanding
/// composed edges through their recorded middle vertex.
fn materialize_cycle(
    cycle: &Cycle,
    known: &DependencyGraph,
    theory: &AcyclicityTheory,
    vertices: &VertexMap,
) -> ConflictCycle {
    let n = cycle.vertices.len();
    let mut txns = vec![vertices.txn(cycle.vertices[0])];
    let mut edges = Vec::new();

    for i in 0..n {
        let from = cycle.vertices[i];
        let to = cycle.vertices[(i + 1) % n];
        let reason = cycle.reasons[i];

        if let Some(mid) = reason.via {
            edges.push(dep_label(known, theory, reason.dep, from, mid));
            txns.push(vertices.txn(mid));
            edges.push(anti_label(known, theory, reason.anti, mid, to));
            txns.push(vertices.txn(to));
        } else if reason.anti.is_some() {
            edges.push(anti_label(known, theory, reason.anti, from, to));
            txns.push(vertices.txn(to));
        } else if reason.dep.is_some() {
            edges.push(dep_label(known, theory, reason.dep, from, to));
            txns.push(vertices.txn(to));
        } else {
            edges.push(known_label(known, from, to));
            txns.push(vertices.txn(to));
        }
    }

    ConflictCycle { txns, edges }
}

fn bundle_label(
    theory: &AcyclicityTheory,
    var: u32,
    from: Vertex,
    to: Vertex,
    anti: bool,
) -> Option<CycleEdge> {
    theory
        .bundle(var)
        .iter()
        .find(|spec| spec.from == from && spec.to == to && (spec.kind == EdgeKind::Rw) == anti)
        .map(|spec| CycleEdge {
            kind: spec.kind,
            keys: spec.keys.iter().copied().collect(),
        })
}

fn dep_label(
    known: &DependencyGraph,
    theory: &AcyclicityTheory,
    var: Option<u32>,
    from: Vertex,
    to: Vertex,
) -> CycleEdge {
    if let Some(edge) = var.and_then(|v| bundle_label(theory, v, from, to, false)) {
        return edge;
    }
    for kind in [EdgeKind::Ww, EdgeKind::Wr, EdgeKind::So] {
        if let Some(keys) = known.subgraph(kind).keys_of(from, to) {
            return CycleEdge {
                kind,
                keys: keys.iter().copied().collect(),
            };
        }
    }
    CycleEdge {
        kind: EdgeKind::So,
        keys: Vec::new(),
    }
}

fn anti_label(
    known: &DependencyGraph,
    theory: &AcyclicityTheory,
    var: Option<u32>,
    from: Vertex,
    to: Vertex,
) -> CycleEdge {
    if let Some(edge) = var.and_then(|v| bundle_label(theory, v, from, to, true)) {
        return edge;
    }
    if let Some(keys) = known.rw.keys_of(from, to) {
        return CycleEdge {
            kind: EdgeKind::Rw,
            keys: keys.iter().copied().collect(),
        };
    }
    // induced by a known WR into `from` and a known WW to `to` on one key
    let mut keys = Vec::new();
    for (writer, reader, wr_keys) in known.wr.edges() {
        if reader != from {
            continue;
        }
        if let Some(ww_keys) = known.ww.keys_of(writer, to) {
            keys.extend(wr_keys.intersection(ww_keys).copied());
        }
    }
    keys.sort_unstable();
    keys.dedup();
    CycleEdge {
        kind: EdgeKind::Rw,
        keys,
    }
}

fn known_label(known: &DependencyGraph, from: Vertex, to: Vertex) -> CycleEdge {
    known.label_of(from, to).map_or_else(
        || CycleEdge {
            kind: EdgeKind::Rw,
            keys: Vec::new(),
        },
        |(kind, keys)| CycleEdge {
            kind,
            keys: keys.iter().copied().collect(),
        },
    )
}
