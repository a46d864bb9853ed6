//! Graph kernel: a typed directed multigraph over dense transaction vertices.
//!
//! Edges are labelled by kind (SO, WR, WW, RW) and an unordered key set.
//! There is at most one edge per kind between a vertex pair; adding it again
//! merges the key sets. All failure is programmer error; no operation
//! performs I/O.

pub mod dependency;
pub mod labeled;

pub use dependency::{DependencyGraph, EdgeKind};
pub use labeled::{KeySet, LabeledGraph, Vertex};
