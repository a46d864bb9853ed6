//! polycheck CLI -- generate histories and verify their consistency.

use std::fmt::Write as _;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use polycheck_core::history::History;
use polycheck_core::verdict::{ConflictCycle, Isolation};

#[derive(Debug, Parser)]
#[command(
    name = "polycheck",
    about = "Offline checking of serializability and snapshot isolation"
)]
pub struct App {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate random transactional histories
    Generate(GenerateArgs),
    /// Verify recorded histories against an isolation level
    Verify(VerifyArgs),
}

#[derive(Debug, Parser)]
pub struct GenerateArgs {
    /// Number of histories to generate
    #[arg(long)]
    pub n_hist: u64,
    /// Number of nodes (sessions)
    #[arg(long)]
    pub n_node: u64,
    /// Number of keys
    #[arg(long)]
    pub n_var: u64,
    /// Number of transactions per node
    #[arg(long)]
    pub n_txn: u64,
    /// Number of events per transaction
    #[arg(long)]
    pub n_evt: u64,
    /// Output directory for generated history files
    #[arg(long)]
    pub output_dir: PathBuf,
}

#[derive(Debug, Parser)]
pub struct VerifyArgs {
    /// Input directory containing history JSON files
    #[arg(long)]
    pub input_dir: PathBuf,
    /// Isolation level to check
    #[arg(long, value_enum, default_value = "serializability")]
    pub isolation: IsolationLevel,
    /// Disable the deterministic pruning pass
    #[arg(long)]
    pub no_pruning: bool,
    /// Give up after this many solver conflicts
    #[arg(long)]
    pub budget_conflicts: Option<u64>,
    /// Give up after this many milliseconds of wall clock
    #[arg(long)]
    pub budget_wall_ms: Option<u64>,
    /// Write the first rejected history's conflict cycle as DOT to this path
    #[arg(long)]
    pub emit_cycle_dot: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum IsolationLevel {
    Serializability,
    SnapshotIsolation,
}

impl From<IsolationLevel> for Isolation {
    fn from(level: IsolationLevel) -> Self {
        match level {
            IsolationLevel::Serializability => Self::Serializability,
            IsolationLevel::SnapshotIsolation => Self::SnapshotIsolation,
        }
    }
}

/// Render a conflict cycle as a Graphviz digraph, listing each involved
/// transaction's operations and labelling every edge with its dependency
/// kind and keys.
#[must_use]
pub fn cycle_dot(history: &History, cycle: &ConflictCycle) -> String {
    let mut dot = String::from("digraph {\n");

    let mut nodes: Vec<i64> = cycle.txns.clone();
    nodes.sort_unstable();
    nodes.dedup();
    for txn_id in nodes {
        let ops = history
            .transactions()
            .find(|t| t.id == txn_id)
            .map(|t| {
                t.events
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        let _ = writeln!(dot, "  \"t{txn_id}\" [ops=\"{ops}\"]");
    }

    for (i, edge) in cycle.edges.iter().enumerate() {
        let _ = writeln!(
            dot,
            "  \"t{}\" -> \"t{}\" [label=\"{edge}\"]",
            cycle.txns[i],
            cycle.txns[i + 1],
        );
    }

    dot.push_str("}\n");
    dot
}

#[cfg(test)]
mod tests {
    use polycheck_core::graph::EdgeKind;
    use polycheck_core::history::{Event, Session, Transaction};
    use polycheck_core::verdict::CycleEdge;

    use super::*;

    #[test]
    fn dot_lists_nodes_and_labelled_edges() {
        let history = History::new(vec![Session::new(
            1,
            vec![
                Transaction::new(1, vec![Event::write(1, 1)]),
                Transaction::new(2, vec![Event::read(1, 1)]),
            ],
        )]);
        let cycle = ConflictCycle {
            txns: vec![1, 2, 1],
            edges: vec![
                CycleEdge {
                    kind: EdgeKind::Wr,
                    keys: vec![1],
                },
                CycleEdge {
                    kind: EdgeKind::Rw,
                    keys: vec![1],
                },
            ],
        };
        let dot = cycle_dot(&history, &cycle);
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("\"t1\" [ops=\"1:=1\"]"));
        assert!(dot.contains("\"t1\" -> \"t2\" [label=\"WR(1)\"]"));
        assert!(dot.contains("\"t2\" -> \"t1\" [label=\"RW(1)\"]"));
    }
}
