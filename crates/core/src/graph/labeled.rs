use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::history::Key;

/// Dense vertex index assigned by the polygraph builder; stable for a run.
pub type Vertex = u32;

/// Unordered set of keys labelling an edge; typically 0 or 1 entries.
/// A `BTreeSet` keeps label output deterministic.
pub type KeySet = BTreeSet<Key>;

/// Directed graph over dense vertices with a key set per edge.
///
/// Adding an edge that already exists extends its key set instead of
/// duplicating the edge. Looking up a vertex that was never added is
/// programmer error and simply behaves as an isolated vertex.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LabeledGraph {
    adj: HashMap<Vertex, HashMap<Vertex, KeySet>>,
}

impl LabeledGraph {
    pub fn add_vertex(&mut self, v: Vertex) {
        self.adj.entry(v).or_default();
    }

    /// Insert `from -> to`, merging `keys` into the label if the edge exists.
    pub fn add_edge(&mut self, from: Vertex, to: Vertex, keys: impl IntoIterator<Item = Key>) {
        self.adj.entry(to).or_default();
        self.adj
            .entry(from)
            .or_default()
            .entry(to)
            .or_default()
            .extend(keys);
    }

    #[must_use]
    pub fn has_edge(&self, from: Vertex, to: Vertex) -> bool {
        self.adj
            .get(&from)
            .is_some_and(|succ| succ.contains_key(&to))
    }

    #[must_use]
    pub fn keys_of(&self, from: Vertex, to: Vertex) -> Option<&KeySet> {
        self.adj.get(&from).and_then(|succ| succ.get(&to))
    }

    /// Successors of `v` with their edge labels.
    pub fn successors(&self, v: Vertex) -> impl Iterator<Item = (Vertex, &KeySet)> {
        self.adj
            .get(&v)
            .into_iter()
            .flat_map(|succ| succ.iter().map(|(&to, keys)| (to, keys)))
    }

    /// All edges as `(from, to, keys)`.
    pub fn edges(&self) -> impl Iterator<Item = (Vertex, Vertex, &KeySet)> {
        self.adj.iter().flat_map(|(&from, succ)| {
            succ.iter().map(move |(&to, keys)| (from, to, keys))
        })
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.adj.values().map(HashMap::len).sum()
    }
}
