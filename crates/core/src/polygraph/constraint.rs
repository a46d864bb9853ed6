use core::fmt::{self, Display, Formatter};

use crate::graph::{EdgeKind, KeySet, Vertex};

/// A single edge a bundle would materialize, with its kind and key labels.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeSpec {
    pub from: Vertex,
    pub to: Vertex,
    pub kind: EdgeKind,
    pub keys: KeySet,
}

impl Display for EdgeSpec {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}->{} {}(", self.from, self.to, self.kind)?;
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{key}")?;
        }
        write!(f, ")")
    }
}

/// One disjunct of a write-order constraint: committing it places `first`
/// before `second` and materializes every edge in `edges` (the WW edge plus
/// the RW anti-dependencies it induces).
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeBundle {
    pub first: Vertex,
    pub second: Vertex,
    pub edges: Vec<EdgeSpec>,
}

/// Unresolved relative order of two writers of common keys: exactly one of
/// the two bundles must be committed, the other is forbidden. Content is
/// immutable once built; constraints are only ever dropped from the active
/// set, never edited.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOrderConstraint {
    pub forward: EdgeBundle,
    pub reverse: EdgeBundle,
}

impl WriteOrderConstraint {
    /// The unordered writer pair, in canonical (low, high) order.
    #[must_use]
    pub fn writers(&self) -> (Vertex, Vertex) {
        (self.forward.first, self.forward.second)
    }
}

impl Display for WriteOrderConstraint {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let bundle = |f: &mut Formatter, tag: &str, b: &EdgeBundle| -> fmt::Result {
            write!(f, "{tag}: {}<{} ", b.first, b.second)?;
            for edge in &b.edges {
                write!(f, "{edge}, ")?;
            }
            write!(f, "; ")
        };
        bundle(f, "forward", &self.forward)?;
        bundle(f, "reverse", &self.reverse)
    }
}
