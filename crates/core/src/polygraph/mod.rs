//! Polygraph builder: derives the known graph and the constraint set from a
//! parsed history.
//!
//! The known graph holds every edge the history forces on its own: session
//! order between consecutive transactions, and a write-read edge from the
//! unique producer of each read value. Everything the history leaves open --
//! the relative order of two writers of a common key -- becomes a
//! [`WriteOrderConstraint`] whose two bundles carry the WW edge and the RW
//! anti-dependencies that choice induces.

pub mod constraint;

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;

pub use self::constraint::{EdgeBundle, EdgeSpec, WriteOrderConstraint};
use crate::graph::{DependencyGraph, EdgeKind, Vertex};
use crate::history::{History, HistoryError, Key, TxnId, Value};

/// Dense vertex indices for transaction ids, assigned in session order and
/// stable for the whole run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct VertexMap {
    index_of: HashMap<TxnId, Vertex>,
    txns: Vec<TxnId>,
}

impl VertexMap {
    /// # Errors
    ///
    /// Returns [`HistoryError::DuplicateTxnId`] when two transactions share
    /// an id.
    pub fn try_from_history(history: &History) -> Result<Self, HistoryError> {
        let mut map = Self::default();
        for txn in history.transactions() {
            let vertex = u32::try_from(map.txns.len()).unwrap_or(u32::MAX);
            if map.index_of.insert(txn.id, vertex).is_some() {
                return Err(HistoryError::DuplicateTxnId { id: txn.id });
            }
            map.txns.push(txn.id);
        }
        Ok(map)
    }

    #[must_use]
    pub fn vertex(&self, txn: TxnId) -> Option<Vertex> {
        self.index_of.get(&txn).copied()
    }

    /// # Panics
    ///
    /// Panics if `vertex` was not assigned by this map.
    #[must_use]
    pub fn txn(&self, vertex: Vertex) -> TxnId {
        self.txns[vertex as usize]
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        u32::try_from(self.txns.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.txns.is_empty()
    }
}

/// Build the known graph: SO edges between consecutive transactions of each
/// session and WR edges from the unique writer of every read value.
///
/// # Errors
///
/// Returns [`HistoryError::DuplicateWrite`] when two transactions wrote the
/// same `(key, value)` pair, [`HistoryError::MissingWriter`] when a read
/// observes a value no transaction wrote, and
/// [`HistoryError::InconsistentLocalRead`] when a read contradicts its own
/// transaction's writes.
pub fn known_graph_of(
    history: &History,
    vertices: &VertexMap,
) -> Result<DependencyGraph, HistoryError> {
    let mut graph = DependencyGraph::new(vertices.len());

    // Unique writer per (key, value); repeated writes of the same pair within
    // one transaction are tolerated, across transactions they are malformed.
    let mut writer_of: HashMap<(Key, Value), TxnId> = HashMap::new();
    for (txn, event) in history.events().filter(|(_, e)| e.is_write()) {
        if let Some(&prev) = writer_of.get(&(event.key, event.value)) {
            if prev != txn {
                return Err(HistoryError::DuplicateWrite {
                    key: event.key,
                    value: event.value,
                    txns: [prev, txn],
                });
            }
        } else {
            writer_of.insert((event.key, event.value), txn);
        }
    }

    let vertex = |txn: TxnId| {
        vertices
            .vertex(txn)
            .expect("every transaction of the history is indexed")
    };

    for session in &history.sessions {
        for pair in session.transactions.windows(2) {
            graph.add_edge(EdgeKind::So, vertex(pair[0].id), vertex(pair[1].id), []);
        }
    }

    // Walk each transaction with its own write footprint: a read either
    // observes the latest local write (no edge) or an external writer (WR
    // edge). Anything else cannot be explained by any order of transactions
    // and is a recording defect, not a consistency violation.
    for session in &history.sessions {
        for txn in &session.transactions {
            let mut local: HashMap<Key, Value> = HashMap::new();
            for event in &txn.events {
                if event.is_write() {
                    local.insert(event.key, event.value);
                    continue;
                }
                let Some(&writer) = writer_of.get(&(event.key, event.value)) else {
                    return Err(HistoryError::MissingWriter {
                        txn: txn.id,
                        key: event.key,
                        value: event.value,
                    });
                };
                match local.get(&event.key) {
                    Some(&own) => {
                        if event.value != own {
                            return Err(HistoryError::InconsistentLocalRead {
                                txn: txn.id,
                                key: event.key,
                                value: event.value,
                            });
                        }
                    }
                    None if writer == txn.id => {
                        // reads one of its own writes before issuing it
                        return Err(HistoryError::InconsistentLocalRead {
                            txn: txn.id,
                            key: event.key,
                            value: event.value,
                        });
                    }
                    None => {
                        graph.add_edge(EdgeKind::Wr, vertex(writer), vertex(txn.id), [event.key]);
                    }
                }
            }
        }
    }

    tracing::debug!(
        vertices = vertices.len(),
        so = graph.so.edge_count(),
        wr = graph.wr.edge_count(),
        "known graph built"
    );

    Ok(graph)
}

/// Enumerate the write-order constraints: one per unordered pair of writers
/// of a common key, each bundle carrying the WW edge plus the RW edges it
/// induces through the known WR relation.
#[must_use]
pub fn constraints_of(
    history: &History,
    known: &DependencyGraph,
    vertices: &VertexMap,
) -> Vec<WriteOrderConstraint> {
    // Writers per key, deduplicated and sorted for deterministic output.
    let mut writers_per_key: HashMap<Key, BTreeSet<Vertex>> = HashMap::new();
    for (txn, event) in history.events().filter(|(_, e)| e.is_write()) {
        let writer = vertices
            .vertex(txn)
            .expect("every transaction of the history is indexed");
        writers_per_key.entry(event.key).or_default().insert(writer);
    }

    // Per ordered writer pair (p, q), the edges of the "p before q" bundle,
    // keyed by endpoints and kind so key sets merge.
    type BundleEdges = BTreeMap<(Vertex, Vertex, EdgeKind), BTreeSet<Key>>;
    let mut edges_per_pair: HashMap<(Vertex, Vertex), BundleEdges> = HashMap::new();

    for (&key, writers) in &writers_per_key {
        let writers: Vec<Vertex> = writers.iter().copied().collect();
        for (i, &p) in writers.iter().enumerate() {
            for &q in &writers[i + 1..] {
                edges_per_pair
                    .entry((p, q))
                    .or_default()
                    .entry((p, q, EdgeKind::Ww))
                    .or_default()
                    .insert(key);
                edges_per_pair
                    .entry((q, p))
                    .or_default()
                    .entry((q, p, EdgeKind::Ww))
                    .or_default()
                    .insert(key);
            }
        }
    }

    // For WR(k): t -> reader and any other writer c of k, ordering t before c
    // forces the anti-dependency RW(k): reader -> c.
    for (t, reader, keys) in known.wr.edges() {
        for &key in keys {
            let Some(writers) = writers_per_key.get(&key) else {
                continue;
            };
            for &c in writers {
                if c == t || c == reader {
                    continue;
                }
                edges_per_pair
                    .entry((t, c))
                    .or_default()
                    .entry((reader, c, EdgeKind::Rw))
                    .or_default()
                    .insert(key);
            }
        }
    }

    // Collapse symmetric pairs into one constraint per unordered pair.
    let pairs: BTreeSet<(Vertex, Vertex)> = edges_per_pair
        .keys()
        .map(|&(p, q)| if p < q { (p, q) } else { (q, p) })
        .collect();

    let bundle = |edges_per_pair: &HashMap<(Vertex, Vertex), BundleEdges>,
                  first: Vertex,
                  second: Vertex| {
        let edges = edges_per_pair
            .get(&(first, second))
            .map(|edges| {
                edges
                    .iter()
                    .map(|(&(from, to, kind), keys)| EdgeSpec {
                        from,
                        to,
                        kind,
                        keys: keys.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        EdgeBundle {
            first,
            second,
            edges,
        }
    };

    let constraints: Vec<WriteOrderConstraint> = pairs
        .into_iter()
        .map(|(p, q)| WriteOrderConstraint {
            forward: bundle(&edges_per_pair, p, q),
            reverse: bundle(&edges_per_pair, q, p),
        })
        .collect();

    tracing::debug!(constraints = constraints.len(), "constraints enumerated");

    constraints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Event, Session, Transaction};

    fn two_writer_history() -> History {
        // t1 writes x:=1, t2 writes x:=2 and reads y==0, t3 reads x==1
        History::new(vec![
            Session::new(
                1,
                vec![Transaction::new(1, vec![Event::write(1, 1)])],
            ),
            Session::new(
                2,
                vec![Transaction::new(
                    2,
                    vec![Event::write(1, 2), Event::read(2, 0)],
                )],
            ),
            Session::new(3, vec![Transaction::new(3, vec![Event::read(1, 1)])]),
        ])
        .with_initial_session()
    }

    #[test]
    fn vertex_map_is_dense_and_rejects_duplicates() {
        let history = two_writer_history();
        let vertices = VertexMap::try_from_history(&history).unwrap();
        assert_eq!(vertices.len(), 4);
        assert_eq!(vertices.vertex(0), Some(0));
        assert_eq!(vertices.txn(vertices.vertex(3).unwrap()), 3);

        let mut duplicated = history;
        duplicated.sessions[1]
            .transactions
            .push(Transaction::new(1, vec![]));
        assert_eq!(
            VertexMap::try_from_history(&duplicated),
            Err(HistoryError::DuplicateTxnId { id: 1 })
        );
    }

    #[test]
    fn known_graph_has_wr_edges() {
        let history = two_writer_history();
        let vertices = VertexMap::try_from_history(&history).unwrap();
        let graph = known_graph_of(&history, &vertices).unwrap();

        let t1 = vertices.vertex(1).unwrap();
        let t3 = vertices.vertex(3).unwrap();
        assert!(graph.has_edge(EdgeKind::Wr, t1, t3));
        // t2 reads y==0 from the initial transaction
        let init = vertices.vertex(0).unwrap();
        let t2 = vertices.vertex(2).unwrap();
        assert!(graph.has_edge(EdgeKind::Wr, init, t2));
    }

    #[test]
    fn missing_writer_is_malformed() {
        let history = History::new(vec![Session::new(
            1,
            vec![Transaction::new(1, vec![Event::read(1, 9)])],
        )]);
        let vertices = VertexMap::try_from_history(&history).unwrap();
        assert_eq!(
            known_graph_of(&history, &vertices),
            Err(HistoryError::MissingWriter {
                txn: 1,
                key: 1,
                value: 9
            })
        );
    }

    #[test]
    fn stale_read_after_own_write_is_malformed() {
        // t2 writes key 1 and then observes t1's value for it
        let history = History::new(vec![
            Session::new(1, vec![Transaction::new(1, vec![Event::write(1, 1)])]),
            Session::new(
                2,
                vec![Transaction::new(
                    2,
                    vec![Event::write(1, 2), Event::read(1, 1)],
                )],
            ),
        ]);
        let vertices = VertexMap::try_from_history(&history).unwrap();
        assert_eq!(
            known_graph_of(&history, &vertices),
            Err(HistoryError::InconsistentLocalRead {
                txn: 2,
                key: 1,
                value: 1
            })
        );
    }

    #[test]
    fn read_of_own_future_write_is_malformed() {
        let history = History::new(vec![Session::new(
            1,
            vec![Transaction::new(
                1,
                vec![Event::read(1, 1), Event::write(1, 1)],
            )],
        )]);
        let vertices = VertexMap::try_from_history(&history).unwrap();
        assert_eq!(
            known_graph_of(&history, &vertices),
            Err(HistoryError::InconsistentLocalRead {
                txn: 1,
                key: 1,
                value: 1
            })
        );
    }

    #[test]
    fn internal_read_of_latest_own_write_carries_no_edge() {
        let history = History::new(vec![Session::new(
            1,
            vec![Transaction::new(
                1,
                vec![Event::write(1, 1), Event::read(1, 1)],
            )],
        )]);
        let vertices = VertexMap::try_from_history(&history).unwrap();
        let graph = known_graph_of(&history, &vertices).unwrap();
        assert_eq!(graph.wr.edge_count(), 0);
    }

    #[test]
    fn duplicate_write_is_malformed() {
        let history = History::new(vec![
            Session::new(1, vec![Transaction::new(1, vec![Event::write(1, 7)])]),
            Session::new(2, vec![Transaction::new(2, vec![Event::write(1, 7)])]),
        ]);
        let vertices = VertexMap::try_from_history(&history).unwrap();
        assert!(matches!(
            known_graph_of(&history, &vertices),
            Err(HistoryError::DuplicateWrite { key: 1, value: 7, .. })
        ));
    }

    #[test]
    fn one_constraint_per_unordered_writer_pair() {
        let history = two_writer_history();
        let vertices = VertexMap::try_from_history(&history).unwrap();
        let graph = known_graph_of(&history, &vertices).unwrap();
        let constraints = constraints_of(&history, &graph, &vertices);

        // Key 1 has writers {t1, t2}; key 2 is written only by the initial
        // transaction. One writer pair, one constraint.
        assert_eq!(constraints.len(), 1);
        let c = &constraints[0];

        let t1 = vertices.vertex(1).unwrap();
        let t2 = vertices.vertex(2).unwrap();
        let t3 = vertices.vertex(3).unwrap();
        let (t1_first, t2_first) = if c.forward.first == t1 {
            (&c.forward, &c.reverse)
        } else {
            (&c.reverse, &c.forward)
        };
        // the t1-before-t2 bundle induces RW t3 -> t2 because t3 read x from t1
        assert_eq!(t1_first.edges.len(), 2);
        assert!(t1_first
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::Rw && e.from == t3 && e.to == t2));
        // t2 has no readers of key 1, so the opposite bundle is just the WW edge
        assert_eq!(t2_first.edges.len(), 1);
        assert_eq!(t2_first.edges[0].kind, EdgeKind::Ww);
    }

    #[test]
    fn unread_single_writer_key_generates_no_constraints() {
        let history = History::new(vec![Session::new(
            1,
            vec![Transaction::new(1, vec![Event::write(5, 1)])],
        )])
        .with_initial_session();
        let vertices = VertexMap::try_from_history(&history).unwrap();
        let graph = known_graph_of(&history, &vertices).unwrap();
        assert!(constraints_of(&history, &graph, &vertices).is_empty());
    }

    #[test]
    fn builder_is_deterministic() {
        let history = two_writer_history();
        let vertices = VertexMap::try_from_history(&history).unwrap();
        let g1 = known_graph_of(&history, &vertices).unwrap();
        let g2 = known_graph_of(&history, &vertices).unwrap();
        assert_eq!(g1, g2);
        assert_eq!(
            constraints_of(&history, &g1, &vertices),
            constraints_of(&history, &g2, &vertices)
        );
    }
}
