use core::fmt::{self, Display, Formatter};
use std::time::Duration;

use ::derive_more::From;

use crate::graph::EdgeKind;
use crate::history::{HistoryError, Key, TxnId};

/// Isolation level the checker decides.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    /// Accept iff some total order of transactions explains every read.
    #[default]
    Serializability,
    /// Relaxed acyclicity: cycles made of anti-dependencies alone are allowed.
    SnapshotIsolation,
}

/// Solver backend selection. Only the built-in CDCL(T) engine is wired in;
/// the external SMT hook is kept for configuration compatibility.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverBackend {
    #[default]
    SatTheory,
    ExternalSmtUnused,
}

/// Checker configuration. Budgets are cooperative: they are consulted at
/// restart boundaries only.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    pub isolation: Isolation,
    pub pruning: bool,
    pub backend: SolverBackend,
    pub budget_conflicts: Option<u64>,
    pub budget_wall: Option<Duration>,
}

impl CheckOptions {
    /// Defaults: serializability, pruning enabled, no budgets.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pruning: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    #[must_use]
    pub const fn pruning(mut self, pruning: bool) -> Self {
        self.pruning = pruning;
        self
    }
}

/// Label of one edge of a reported conflict cycle.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleEdge {
    pub kind: EdgeKind,
    pub keys: Vec<Key>,
}

impl Display for CycleEdge {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}(", self.kind)?;
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{key}")?;
        }
        write!(f, ")")
    }
}

/// A directed cycle of transactions witnessing the rejection.
///
/// `txns` is closed: `txns[0] == txns[txns.len() - 1]`, and `edges[i]`
/// labels the edge `txns[i] -> txns[i + 1]`.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictCycle {
    pub txns: Vec<TxnId>,
    pub edges: Vec<CycleEdge>,
}

impl Display for ConflictCycle {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for (i, edge) in self.edges.iter().enumerate() {
            write!(f, "t{} -{}-> ", self.txns[i], edge)?;
        }
        if let Some(last) = self.txns.last() {
            write!(f, "t{last}")?;
        }
        Ok(())
    }
}

/// Final verdict of a check run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Reject(ConflictCycle),
}

impl Outcome {
    #[must_use]
    pub const fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Conditions that prevent any verdict.
#[derive(Debug, From, PartialEq, Eq)]
pub enum CheckError {
    /// The history itself is broken; see [`HistoryError`].
    Malformed(HistoryError),
    /// A cooperative budget was exceeded.
    Timeout,
    /// The configured backend is not compiled in.
    UnsupportedBackend,
    /// A solver invariant was violated; indicates a bug, not a bad history.
    Invariant(&'static str),
}

impl Display for CheckError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Malformed(err) => write!(f, "malformed history: {err}"),
            Self::Timeout => write!(f, "budget exceeded before a verdict was reached"),
            Self::UnsupportedBackend => write!(f, "requested solver backend is not available"),
            Self::Invariant(what) => write!(f, "internal invariant violated: {what}"),
        }
    }
}

impl std::error::Error for CheckError {}
