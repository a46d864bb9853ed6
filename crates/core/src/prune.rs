//! Deterministic constraint pruning.
//!
//! A fixed-point pass over the constraint set: whenever one bundle of a
//! constraint would already close a cycle under the currently implied graph,
//! the opposite bundle is committed into the known graph and the constraint
//! drops out of the active set. When both bundles are cyclic the history is
//! rejected outright. Pruning only ever shrinks the search space; it never
//! changes the verdict.

use std::collections::BTreeMap;

use fixedbitset::FixedBitSet;
use hashbrown::HashMap;

use crate::graph::{DependencyGraph, EdgeKind, Vertex};
use crate::history::Key;
use crate::polygraph::{EdgeSpec, VertexMap, WriteOrderConstraint};
use crate::verdict::{ConflictCycle, CycleEdge, Isolation};

/// One labelled step of a path through the implied graph.
#[derive(Debug, Clone)]
struct Hop {
    to: Vertex,
    kind: EdgeKind,
    keys: Vec<Key>,
}

/// An edge of the implied graph `H`. A plain edge carries one hop; an edge
/// composed from a dependency followed by an anti-dependency carries two, so
/// a reported cycle can be expanded back into real transaction steps.
#[derive(Debug, Clone)]
struct ImpliedEdge {
    to: Vertex,
    hops: Vec<Hop>,
}

impl ImpliedEdge {
    /// True for a plain SO/WR/WW edge (not an anti-dependency, not composed).
    fn is_plain_dep(&self) -> bool {
        self.hops.len() == 1 && self.hops[0].kind.is_dep()
    }
}

/// Result of a pruning run.
#[derive(Debug)]
pub enum PruneOutcome {
    /// The surviving (unpruned) constraints; the known graph has been
    /// extended with every promoted bundle.
    Pruned(Vec<WriteOrderConstraint>),
    /// The implied graph is already cyclic; no assignment can succeed.
    Rejected(ConflictCycle),
}

/// Anti-dependency adjacency: raw RW edges in the known graph plus the
/// closure induced by WR and WW edges sharing a key.
fn anti_dep_closure(graph: &DependencyGraph) -> BTreeMap<(Vertex, Vertex), Vec<Key>> {
    let mut anti: BTreeMap<(Vertex, Vertex), Vec<Key>> = BTreeMap::new();
    let mut merge = |from: Vertex, to: Vertex, keys: &mut dyn Iterator<Item = Key>| {
        let entry = anti.entry((from, to)).or_default();
        entry.extend(keys);
        entry.sort_unstable();
        entry.dedup();
    };

    for (from, to, _, keys) in graph.anti_dep_edges() {
        merge(from, to, &mut keys.iter().copied());
    }

    // WR(k): t -> reader and WW(k): t -> other imply RW(k): reader -> other.
    for (t, reader, wr_keys) in graph.wr.edges() {
        for (other, ww_keys) in graph.ww.successors(t) {
            if other == reader {
                continue;
            }
            let mut shared = wr_keys.intersection(ww_keys).copied().peekable();
            if shared.peek().is_some() {
                merge(reader, other, &mut shared);
            }
        }
    }

    anti
}

/// Build the implied graph for the current known graph.
///
/// Dependency edges enter directly. Under serializability anti-dependencies
/// enter directly as well; under snapshot isolation they enter only composed
/// behind a dependency edge, mirroring the closure the cycle detector
/// maintains, so that anti-dependency-only cycles never materialize.
fn implied_graph(graph: &DependencyGraph, isolation: Isolation, n: usize) -> Vec<Vec<ImpliedEdge>> {
    let mut implied: Vec<Vec<ImpliedEdge>> = vec![Vec::new(); n];

    for (from, to, kind, keys) in graph.dep_edges() {
        implied[from as usize].push(ImpliedEdge {
            to,
            hops: vec![Hop {
                to,
                kind,
                keys: keys.iter().copied().collect(),
            }],
        });
    }

    let anti = anti_dep_closure(graph);

    match isolation {
        Isolation::Serializability => {
            for (&(from, to), keys) in &anti {
                implied[from as usize].push(ImpliedEdge {
                    to,
                    hops: vec![Hop {
                        to,
                        kind: EdgeKind::Rw,
                        keys: keys.clone(),
                    }],
                });
            }
        }
        Isolation::SnapshotIsolation => {
            let mut anti_out: HashMap<Vertex, Vec<(Vertex, &Vec<Key>)>> = HashMap::new();
            for (&(from, to), keys) in &anti {
                anti_out.entry(from).or_default().push((to, keys));
            }
            let mut composites = Vec::new();
            for (from, to, kind, keys) in graph.dep_edges() {
                let Some(outgoing) = anti_out.get(&to) else {
                    continue;
                };
                for &(rw_to, rw_keys) in outgoing {
                    composites.push((
                        from,
                        ImpliedEdge {
                            to: rw_to,
                            hops: vec![
                                Hop {
                                    to,
                                    kind,
                                    keys: keys.iter().copied().collect(),
                                },
                                Hop {
                                    to: rw_to,
                                    kind: EdgeKind::Rw,
                                    keys: rw_keys.clone(),
                                },
                            ],
                        },
                    ));
                }
            }
            for (from, edge) in composites {
                implied[from as usize].push(edge);
            }
        }
    }

    implied
}

/// Kahn's algorithm over the implied graph. Returns the topological order,
/// or `Err` with the set of vertices stuck on cycles.
fn topological_order(implied: &[Vec<ImpliedEdge>]) -> Result<Vec<Vertex>, Vec<bool>> {
    let n = implied.len();
    let mut in_degree = vec![0_usize; n];
    for edges in implied {
        for edge in edges {
            in_degree[edge.to as usize] += 1;
        }
    }

    let mut queue: Vec<Vertex> = (0..n)
        .filter(|&v| in_degree[v] == 0)
        .map(|v| v as Vertex)
        .collect();
    let mut order = Vec::with_capacity(n);

    while let Some(v) = queue.pop() {
        order.push(v);
        for edge in &implied[v as usize] {
            let d = &mut in_degree[edge.to as usize];
            *d -= 1;
            if *d == 0 {
                queue.push(edge.to);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        let remaining = (0..n).map(|v| in_degree[v] > 0).collect();
        Err(remaining)
    }
}

/// Extract one directed cycle among the vertices Kahn's algorithm could not
/// remove, expanded to labelled hops.
fn extract_cycle(
    implied: &[Vec<ImpliedEdge>],
    remaining: &[bool],
    vertices: &VertexMap,
) -> ConflictCycle {
    // Every remaining vertex keeps a predecessor among the remaining, so a
    // backward walk must revisit a vertex and close a cycle.
    let n = implied.len();
    let mut pred: Vec<Option<Vertex>> = vec![None; n];
    for (from, edges) in implied.iter().enumerate() {
        if !remaining[from] {
            continue;
        }
        for edge in edges {
            if remaining[edge.to as usize] {
                pred[edge.to as usize] = Some(from as Vertex);
            }
        }
    }

    let start = remaining
        .iter()
        .position(|&r| r)
        .expect("cyclic graph has a remaining vertex") as Vertex;

    let mut seen_at: HashMap<Vertex, usize> = HashMap::new();
    let mut walk = vec![start];
    let backward = loop {
        let head = *walk.last().expect("walk is never empty");
        seen_at.insert(head, walk.len() - 1);
        let prev = pred[head as usize].expect("remaining vertex has a predecessor");
        if let Some(&at) = seen_at.get(&prev) {
            break walk[at..].to_vec();
        }
        walk.push(prev);
    };

    // `backward` lists the cycle against edge direction; reverse it.
    let cycle: Vec<Vertex> = backward.into_iter().rev().collect();

    let mut txns = vec![vertices.txn(cycle[0])];
    let mut edges = Vec::new();
    for (i, &from) in cycle.iter().enumerate() {
        let to = cycle[(i + 1) % cycle.len()];
        let edge = implied[from as usize]
            .iter()
            .find(|e| e.to == to)
            .expect("consecutive cycle vertices are connected");
        for hop in &edge.hops {
            txns.push(vertices.txn(hop.to));
            edges.push(CycleEdge {
                kind: hop.kind,
                keys: hop.keys.clone(),
            });
        }
    }

    ConflictCycle { txns, edges }
}

/// Reachability bitsets by dynamic programming over the reverse topological
/// order, plus predecessor bitsets.
///
/// Under snapshot isolation the predecessor sets are restricted to plain
/// dependency edges: committing an RW edge `u -> v` only materializes the
/// composites `w -> v` for dependency predecessors `w` of `u`, so only those
/// predecessors can certify infeasibility.
fn reach_and_pred(
    implied: &[Vec<ImpliedEdge>],
    order: &[Vertex],
    isolation: Isolation,
) -> (Vec<FixedBitSet>, Vec<FixedBitSet>) {
    let n = implied.len();
    let mut reach = vec![FixedBitSet::with_capacity(n); n];
    let mut pred = vec![FixedBitSet::with_capacity(n); n];

    for &v in order.iter().rev() {
        let mut bits = std::mem::replace(&mut reach[v as usize], FixedBitSet::with_capacity(0));
        bits.insert(v as usize);
        for edge in &implied[v as usize] {
            bits.union_with(&reach[edge.to as usize]);
            if isolation == Isolation::Serializability || edge.is_plain_dep() {
                pred[edge.to as usize].insert(v as usize);
            }
        }
        reach[v as usize] = bits;
    }

    (reach, pred)
}

/// A bundle is infeasible when committing it would close a cycle: its WW
/// edge points back into its own reachable set, or one of its RW edges has a
/// predecessor of the reader reachable from the overwriting writer.
fn bundle_feasible(
    edges: &[EdgeSpec],
    reach: &[FixedBitSet],
    pred: &[FixedBitSet],
    isolation: Isolation,
) -> bool {
    for edge in edges {
        let from = edge.from as usize;
        let to = edge.to as usize;
        match edge.kind {
            EdgeKind::Ww => {
                if reach[to].contains(from) {
                    return false;
                }
            }
            EdgeKind::Rw => {
                if pred[from].ones().any(|w| reach[to].contains(w)) {
                    return false;
                }
                // under serializability the raw RW edge itself is present
                if isolation == Isolation::Serializability && reach[to].contains(from) {
                    return false;
                }
            }
            EdgeKind::So | EdgeKind::Wr => {
                unreachable!("bundles carry only WW and RW edges")
            }
        }
    }
    true
}

fn commit_bundle(graph: &mut DependencyGraph, edges: &[EdgeSpec]) {
    for edge in edges {
        graph.add_edge(edge.kind, edge.from, edge.to, edge.keys.iter().copied());
    }
}

/// Surface the cycle a doubly-infeasible constraint closes: committing
/// either bundle creates one, so probe with each in turn.
fn rejected_cycle(
    graph: &DependencyGraph,
    constraint: &WriteOrderConstraint,
    isolation: Isolation,
    n: usize,
    vertices: &VertexMap,
) -> ConflictCycle {
    for bundle in [&constraint.forward, &constraint.reverse] {
        let mut probe = graph.clone();
        commit_bundle(&mut probe, &bundle.edges);
        let implied = implied_graph(&probe, isolation, n);
        if let Err(remaining) = topological_order(&implied) {
            return extract_cycle(&implied, &remaining, vertices);
        }
    }
    // Infeasibility certificates always materialize after the commit.
    ConflictCycle {
        txns: Vec::new(),
        edges: Vec::new(),
    }
}

/// Run the fixed-point pruning pass.
///
/// Promoted bundles are added to `graph` (the known graph only ever grows);
/// the returned constraint list is the active remainder.
pub fn prune_constraints(
    graph: &mut DependencyGraph,
    constraints: Vec<WriteOrderConstraint>,
    isolation: Isolation,
    vertices: &VertexMap,
) -> PruneOutcome {
    let n = vertices.len() as usize;
    let mut pruned = vec![false; constraints.len()];
    let mut passes = 0_u32;
    let mut changed = true;

    while changed {
        changed = false;
        passes += 1;

        let implied = implied_graph(graph, isolation, n);
        let order = match topological_order(&implied) {
            Ok(order) => order,
            Err(remaining) => {
                tracing::debug!(passes, "implied graph is cyclic, rejecting");
                return PruneOutcome::Rejected(extract_cycle(&implied, &remaining, vertices));
            }
        };
        let (reach, pred) = reach_and_pred(&implied, &order, isolation);

        for (i, constraint) in constraints.iter().enumerate() {
            if pruned[i] {
                continue;
            }
            let forward_ok = bundle_feasible(&constraint.forward.edges, &reach, &pred, isolation);
            let reverse_ok = bundle_feasible(&constraint.reverse.edges, &reach, &pred, isolation);

            match (forward_ok, reverse_ok) {
                (true, true) => {}
                (true, false) => {
                    commit_bundle(graph, &constraint.forward.edges);
                    pruned[i] = true;
                    changed = true;
                }
                (false, true) => {
                    commit_bundle(graph, &constraint.reverse.edges);
                    pruned[i] = true;
                    changed = true;
                }
                (false, false) => {
                    tracing::debug!(passes, constraint = i, "both bundles cyclic, rejecting");
                    return PruneOutcome::Rejected(rejected_cycle(
                        graph, constraint, isolation, n, vertices,
                    ));
                }
            }
        }
    }

    let survivors: Vec<WriteOrderConstraint> = constraints
        .into_iter()
        .zip(pruned.iter())
        .filter(|(_, &p)| !p)
        .map(|(c, _)| c)
        .collect();

    tracing::debug!(
        passes,
        pruned = pruned.iter().filter(|&&p| p).count(),
        surviving = survivors.len(),
        "pruning reached fixed point"
    );

    PruneOutcome::Pruned(survivors)
}
