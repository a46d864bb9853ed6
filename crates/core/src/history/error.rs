use core::fmt::{self, Display, Formatter};

use super::types::{Key, TxnId, Value};

/// Structural defects of a history that prevent any verdict.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// A read observed a value that no transaction wrote.
    MissingWriter { txn: TxnId, key: Key, value: Value },
    /// Two distinct writes produced the same `(key, value)` pair.
    DuplicateWrite {
        key: Key,
        value: Value,
        txns: [TxnId; 2],
    },
    /// Two transactions share the same id.
    DuplicateTxnId { id: TxnId },
    /// A read inside a transaction contradicts the transaction's own writes:
    /// it observes a foreign value although the transaction wrote the key
    /// earlier, or it observes one of its own writes before issuing it.
    InconsistentLocalRead { txn: TxnId, key: Key, value: Value },
}

impl Display for HistoryError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::MissingWriter { txn, key, value } => {
                write!(f, "t{txn} reads {key}=={value} but no transaction wrote it")
            }
            Self::DuplicateWrite { key, value, txns } => write!(
                f,
                "t{} and t{} both wrote {key}:={value}",
                txns[0], txns[1]
            ),
            Self::DuplicateTxnId { id } => write!(f, "transaction id {id} occurs twice"),
            Self::InconsistentLocalRead { txn, key, value } => write!(
                f,
                "t{txn} reads {key}=={value} inconsistently with its own writes"
            ),
        }
    }
}

impl std::error::Error for HistoryError {}
