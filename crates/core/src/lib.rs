//! Core of the polycheck transactional-consistency checker.
//!
//! Given a recorded history of sessions, transactions, and read/write
//! events over a key-value store, this crate derives the *polygraph*: the
//! known dependency graph (session order and write-read edges the history
//! forces) together with a set of disjunctive write-order constraints, one
//! per pair of transactions writing a common key. A history is serializable
//! iff some choice of one bundle per constraint keeps the combined graph
//! acyclic; under snapshot isolation, cycles made purely of read-write
//! anti-dependencies are additionally tolerated.
//!
//! The crate contains:
//!
//! - [`history`] -- the immutable history model and its structural errors;
//! - [`graph`] -- the typed directed multigraph kernel (SO/WR/WW/RW edges
//!   with key-set labels);
//! - [`polygraph`] -- the builder deriving the known graph and constraints;
//! - [`prune`] -- the deterministic fixed-point pruner that commits
//!   constraints whose opposite choice is already cyclic;
//! - [`verdict`] -- configuration, verdicts, conflict cycles, and the error
//!   taxonomy.
//!
//! The search itself -- a CDCL solver with an incremental acyclicity
//! theory -- lives in the `polycheck_smt` crate, whose `check()` is the
//! user-facing entry point.

pub mod graph;
pub mod history;
pub mod polygraph;
pub mod prune;
pub mod verdict;

pub use graph::{DependencyGraph, EdgeKind};
pub use history::{History, HistoryError};
pub use verdict::{CheckError, CheckOptions, ConflictCycle, Isolation, Outcome, SolverBackend};
