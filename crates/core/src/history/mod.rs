//! History model: sessions of transactions over a key-value store.
//!
//! Keys, values and transaction ids are plain `i64`s; values are treated as
//! opaque tokens whose uniqueness per key is an invariant supplied by the
//! recording side. The synthetic initial transaction (id 0, its own session)
//! writes value 0 to every key read anywhere in the history.

pub mod error;
pub mod types;

pub use error::HistoryError;
pub use types::{
    Event, EventKind, History, Key, Session, SessionId, Transaction, TxnId, Value,
    INITIAL_SESSION_ID, INITIAL_TXN_ID,
};
