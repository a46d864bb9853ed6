use core::fmt::{self, Display, Formatter};

use super::labeled::{KeySet, LabeledGraph, Vertex};
use crate::history::Key;

/// Kind of a dependency edge between two transactions.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EdgeKind {
    /// Session order: consecutive transactions of one client.
    So,
    /// Write-read: the reader consumed a value the writer produced.
    Wr,
    /// Write-write: both transactions wrote a common key.
    Ww,
    /// Read-write anti-dependency, induced from a WR and a WW on one key.
    Rw,
}

impl EdgeKind {
    pub const ALL: [Self; 4] = [Self::So, Self::Wr, Self::Ww, Self::Rw];

    /// Dependency kinds, as opposed to the RW anti-dependency.
    #[must_use]
    pub const fn is_dep(self) -> bool {
        !matches!(self, Self::Rw)
    }
}

impl Display for EdgeKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::So => write!(f, "SO"),
            Self::Wr => write!(f, "WR"),
            Self::Ww => write!(f, "WW"),
            Self::Rw => write!(f, "RW"),
        }
    }
}

/// The known graph: one labelled subgraph per edge kind over a shared dense
/// vertex space. Built once by the polygraph builder; the pruner may add
/// promoted WW/RW edges but never removes any.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    n_vertices: u32,
    pub so: LabeledGraph,
    pub wr: LabeledGraph,
    pub ww: LabeledGraph,
    pub rw: LabeledGraph,
}

impl DependencyGraph {
    #[must_use]
    pub fn new(n_vertices: u32) -> Self {
        let mut graph = Self {
            n_vertices,
            ..Self::default()
        };
        for v in 0..n_vertices {
            graph.so.add_vertex(v);
            graph.wr.add_vertex(v);
            graph.ww.add_vertex(v);
            graph.rw.add_vertex(v);
        }
        graph
    }

    #[must_use]
    pub const fn n_vertices(&self) -> u32 {
        self.n_vertices
    }

    #[must_use]
    pub const fn subgraph(&self, kind: EdgeKind) -> &LabeledGraph {
        match kind {
            EdgeKind::So => &self.so,
            EdgeKind::Wr => &self.wr,
            EdgeKind::Ww => &self.ww,
            EdgeKind::Rw => &self.rw,
        }
    }

    pub fn subgraph_mut(&mut self, kind: EdgeKind) -> &mut LabeledGraph {
        match kind {
            EdgeKind::So => &mut self.so,
            EdgeKind::Wr => &mut self.wr,
            EdgeKind::Ww => &mut self.ww,
            EdgeKind::Rw => &mut self.rw,
        }
    }

    pub fn add_edge(
        &mut self,
        kind: EdgeKind,
        from: Vertex,
        to: Vertex,
        keys: impl IntoIterator<Item = Key>,
    ) {
        self.subgraph_mut(kind).add_edge(from, to, keys);
    }

    #[must_use]
    pub fn has_edge(&self, kind: EdgeKind, from: Vertex, to: Vertex) -> bool {
        self.subgraph(kind).has_edge(from, to)
    }

    /// All edges across every kind.
    pub fn edges(&self) -> impl Iterator<Item = (Vertex, Vertex, EdgeKind, &KeySet)> {
        self.edges_of_kinds(&EdgeKind::ALL)
    }

    /// Edges restricted to a kind subset.
    pub fn edges_of_kinds<'a>(
        &'a self,
        kinds: &'a [EdgeKind],
    ) -> impl Iterator<Item = (Vertex, Vertex, EdgeKind, &'a KeySet)> {
        kinds.iter().flat_map(|&kind| {
            self.subgraph(kind)
                .edges()
                .map(move |(from, to, keys)| (from, to, kind, keys))
        })
    }

    /// SO, WR and WW edges.
    pub fn dep_edges(&self) -> impl Iterator<Item = (Vertex, Vertex, EdgeKind, &KeySet)> {
        self.edges_of_kinds(&[EdgeKind::So, EdgeKind::Wr, EdgeKind::Ww])
    }

    /// RW edges.
    pub fn anti_dep_edges(&self) -> impl Iterator<Item = (Vertex, Vertex, EdgeKind, &KeySet)> {
        self.edges_of_kinds(&[EdgeKind::Rw])
    }

    /// Label of some edge `from -> to`, preferring the most specific kind.
    #[must_use]
    pub fn label_of(&self, from: Vertex, to: Vertex) -> Option<(EdgeKind, &KeySet)> {
        [EdgeKind::Ww, EdgeKind::Wr, EdgeKind::So, EdgeKind::Rw]
            .into_iter()
            .find_map(|kind| self.subgraph(kind).keys_of(from, to).map(|keys| (kind, keys)))
    }
}
