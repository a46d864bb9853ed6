use core::fmt::{self, Debug, Display, Formatter};

/// Key of the key-value store. Opaque to the checker.
pub type Key = i64;

/// Written or observed value. Opaque; uniqueness per key is a history invariant.
pub type Value = i64;

/// Transaction identifier, unique across the whole history.
pub type TxnId = i64;

/// Session identifier. The synthetic initial session uses id 0.
pub type SessionId = i64;

#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Read,
    Write,
}

/// A single read or write of one key within a transaction.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Event {
    pub key: Key,
    pub value: Value,
    pub kind: EventKind,
}

impl Event {
    #[must_use]
    pub const fn read(key: Key, value: Value) -> Self {
        Self {
            key,
            value,
            kind: EventKind::Read,
        }
    }

    #[must_use]
    pub const fn write(key: Key, value: Value) -> Self {
        Self {
            key,
            value,
            kind: EventKind::Write,
        }
    }

    #[must_use]
    pub const fn is_read(&self) -> bool {
        matches!(self.kind, EventKind::Read)
    }

    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(self.kind, EventKind::Write)
    }
}

impl Debug for Event {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.kind {
            EventKind::Read => write!(f, "{}=>{}", self.key, self.value),
            EventKind::Write => write!(f, "{}<={}", self.key, self.value),
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.kind {
            EventKind::Read => write!(f, "{}=={}", self.key, self.value),
            EventKind::Write => write!(f, "{}:={}", self.key, self.value),
        }
    }
}

/// An atomic sequence of events. Only committed transactions are recorded.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: TxnId,
    pub events: Vec<Event>,
}

impl Transaction {
    #[must_use]
    pub const fn new(id: TxnId, events: Vec<Event>) -> Self {
        Self { id, events }
    }
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "t{}{:?}", self.id, self.events)
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "t{}[", self.id)?;
        for (i, event) in self.events.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{event}")?;
        }
        write!(f, "]")
    }
}

/// An ordered sequence of transactions from a single client.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub transactions: Vec<Transaction>,
}

impl Session {
    #[must_use]
    pub const fn new(id: SessionId, transactions: Vec<Transaction>) -> Self {
        Self { id, transactions }
    }
}

/// A recorded history: immutable once parsed.
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct History {
    pub sessions: Vec<Session>,
}

/// Session and transaction ids reserved for the synthetic initial writer.
pub const INITIAL_SESSION_ID: SessionId = 0;
pub const INITIAL_TXN_ID: TxnId = 0;

impl History {
    #[must_use]
    pub const fn new(sessions: Vec<Session>) -> Self {
        Self { sessions }
    }

    /// Iterator over all transactions, in session order.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.sessions.iter().flat_map(|s| s.transactions.iter())
    }

    /// Iterator over all events with their owning transaction id.
    pub fn events(&self) -> impl Iterator<Item = (TxnId, &Event)> {
        self.transactions()
            .flat_map(|t| t.events.iter().map(move |e| (t.id, e)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.iter().all(|s| s.transactions.is_empty())
    }

    /// True if a transaction with the initial id is present.
    #[must_use]
    pub fn has_initial_session(&self) -> bool {
        self.transactions().any(|t| t.id == INITIAL_TXN_ID)
    }

    /// Prepend the synthetic initial session: a single transaction with the
    /// smallest id writing value 0 to every key read anywhere in the history.
    ///
    /// Real sessions and transactions are expected to use ids >= 1.
    #[must_use]
    pub fn with_initial_session(mut self) -> Self {
        let mut keys: Vec<Key> = self
            .events()
            .filter(|(_, e)| e.is_read())
            .map(|(_, e)| e.key)
            .collect();
        keys.sort_unstable();
        keys.dedup();

        let initial = Session::new(
            INITIAL_SESSION_ID,
            vec![Transaction::new(
                INITIAL_TXN_ID,
                keys.into_iter().map(|k| Event::write(k, 0)).collect(),
            )],
        );
        self.sessions.insert(0, initial);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_render() {
        assert_eq!(format!("{:?}", Event::read(1, 2)), "1=>2");
        assert_eq!(format!("{:?}", Event::write(1, 2)), "1<=2");
        assert_eq!(format!("{}", Event::read(1, 2)), "1==2");
        assert_eq!(format!("{}", Event::write(1, 2)), "1:=2");
    }

    #[test]
    fn transaction_render() {
        let txn = Transaction::new(3, vec![Event::write(1, 1), Event::read(2, 0)]);
        assert_eq!(format!("{txn}"), "t3[1:=1 2==0]");
    }

    #[test]
    fn initial_session_covers_read_keys() {
        let history = History::new(vec![Session::new(
            1,
            vec![Transaction::new(
                1,
                vec![Event::read(7, 0), Event::write(9, 1), Event::read(8, 0)],
            )],
        )])
        .with_initial_session();

        assert!(history.has_initial_session());
        let init = &history.sessions[0].transactions[0];
        assert_eq!(init.id, INITIAL_TXN_ID);
        // only read keys are seeded, sorted and deduplicated
        assert_eq!(init.events, vec![Event::write(7, 0), Event::write(8, 0)]);
    }

    #[test]
    fn events_iterates_in_session_order() {
        let history = History::new(vec![
            Session::new(1, vec![Transaction::new(1, vec![Event::write(1, 1)])]),
            Session::new(2, vec![Transaction::new(2, vec![Event::read(1, 1)])]),
        ]);
        let ids: Vec<TxnId> = history.events().map(|(tid, _)| tid).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn history_serde_roundtrip() {
        let history = History::new(vec![Session::new(
            1,
            vec![Transaction::new(1, vec![Event::write(1, 1)])],
        )]);
        let json = serde_json::to_string(&history).unwrap();
        let back: History = serde_json::from_str(&json).unwrap();
        assert_eq!(history, back);
    }
}
