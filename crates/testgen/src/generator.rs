use std::collections::HashMap;

use chrono::{DateTime, Duration, Local};
use polycheck_core::history::{
    Event, History as RawHistory, Key, Session, Transaction, TxnId, Value,
};
use rand::distr::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder)]
pub struct HistParams {
    pub id: u64,
    pub n_node: u64,
    pub n_variable: u64,
    pub n_transaction: u64,
    pub n_event: u64,
}

/// A generated history with its parameters and generation timestamps; the
/// JSON form of this struct is what the CLI reads and writes.
#[derive(Deserialize, Serialize, Debug)]
pub struct History {
    params: HistParams,
    info: String,
    start: DateTime<Local>,
    end: DateTime<Local>,
    data: RawHistory,
}

impl History {
    #[must_use]
    pub const fn new(
        params: HistParams,
        info: String,
        start: DateTime<Local>,
        end: DateTime<Local>,
        data: RawHistory,
    ) -> Self {
        Self {
            params,
            info,
            start,
            end,
            data,
        }
    }

    #[must_use]
    pub const fn get_id(&self) -> u64 {
        self.params.id
    }

    #[must_use]
    pub const fn get_data(&self) -> &RawHistory {
        &self.data
    }

    #[must_use]
    pub const fn get_params(&self) -> &HistParams {
        &self.params
    }

    #[must_use]
    pub fn get_duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Generate a random history of `n_node` sessions, each with
/// `n_transaction` transactions of `n_event` events over `n_variable` keys.
///
/// Every read is coherent -- it observes a value some transaction (or the
/// synthetic initial writer) actually wrote -- and written values are unique
/// per key via per-key version counters. The result is *not* necessarily
/// serializable; that is the point of feeding it to the checker.
///
/// # Panics
///
/// Panics if `n_variable` is zero.
#[must_use]
pub fn generate_single_history(
    n_node: u64,
    n_variable: u64,
    n_transaction: u64,
    n_event: u64,
) -> RawHistory {
    generate_single_history_with(&mut rand::rng(), n_node, n_variable, n_transaction, n_event)
}

/// Deterministic variant of [`generate_single_history`] for tests.
#[must_use]
pub fn generate_single_history_seeded(
    seed: u64,
    n_node: u64,
    n_variable: u64,
    n_transaction: u64,
    n_event: u64,
) -> RawHistory {
    let mut rng = StdRng::seed_from_u64(seed);
    generate_single_history_with(&mut rng, n_node, n_variable, n_transaction, n_event)
}

fn generate_single_history_with<R: RngExt>(
    rng: &mut R,
    n_node: u64,
    n_variable: u64,
    n_transaction: u64,
    n_event: u64,
) -> RawHistory {
    let key_range = Uniform::new(0, n_variable).unwrap();
    let mut counters: HashMap<Key, Value> = HashMap::new();
    let mut latest_writes: HashMap<Key, Value> = (0..n_variable).map(|v| (v as Key, 0)).collect();
    let mut next_txn_id: TxnId = 1;

    let sessions = (1..=n_node)
        .map(|session_id| {
            let transactions = (0..n_transaction)
                .map(|_| {
                    let snapshot = latest_writes.clone();
                    let mut local: HashMap<Key, Value> = HashMap::new();
                    let events = (0..n_event)
                        .map(|_| {
                            let key = key_range.sample(rng) as Key;
                            if rng.random::<bool>() {
                                // reads see the transaction's own writes
                                // first, then the snapshot at its start
                                let value = local
                                    .get(&key)
                                    .copied()
                                    .unwrap_or_else(|| snapshot[&key]);
                                Event::read(key, value)
                            } else {
                                let version = {
                                    let counter = counters.entry(key).or_insert(0);
                                    *counter += 1;
                                    *counter
                                };
                                local.insert(key, version);
                                latest_writes.insert(key, version);
                                Event::write(key, version)
                            }
                        })
                        .collect();
                    let txn = Transaction::new(next_txn_id, events);
                    next_txn_id += 1;
                    txn
                })
                .collect();
            Session::new(session_id as i64, transactions)
        })
        .collect();

    RawHistory::new(sessions).with_initial_session()
}

/// Generate a ground-truth *serializable* history by materializing a random
/// total order and replaying it: transactions are created one after another
/// against a single store, and each is appended to a random session, so the
/// creation order is a serialization witness that respects session order.
#[must_use]
pub fn generate_serial_history_seeded(
    seed: u64,
    n_node: u64,
    n_variable: u64,
    n_transaction: u64,
    n_event: u64,
) -> RawHistory {
    let mut rng = StdRng::seed_from_u64(seed);
    let key_range = Uniform::new(0, n_variable).unwrap();
    let session_range = Uniform::new(0, n_node).unwrap();

    let mut store: HashMap<Key, Value> = (0..n_variable).map(|v| (v as Key, 0)).collect();
    let mut counters: HashMap<Key, Value> = HashMap::new();
    let mut sessions: Vec<Session> =
        (1..=n_node).map(|id| Session::new(id as i64, vec![])).collect();

    let total = n_node * n_transaction;
    for txn_id in 1..=total {
        let events = (0..n_event)
            .map(|_| {
                let key = key_range.sample(&mut rng) as Key;
                if rng.random::<bool>() {
                    Event::read(key, store[&key])
                } else {
                    let version = {
                        let counter = counters.entry(key).or_insert(0);
                        *counter += 1;
                        *counter
                    };
                    store.insert(key, version);
                    Event::write(key, version)
                }
            })
            .collect();
        let session = session_range.sample(&mut rng) as usize;
        sessions[session]
            .transactions
            .push(Transaction::new(txn_id as TxnId, events));
    }

    RawHistory::new(sessions).with_initial_session()
}

/// Redirect one randomly chosen read to a different version of its key.
/// Returns false when the history has no read with an alternative version.
pub fn corrupt_one_read_seeded(seed: u64, history: &mut RawHistory) -> bool {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut versions: HashMap<Key, Vec<Value>> = HashMap::new();
    for (_, event) in history.events().filter(|(_, e)| e.is_write()) {
        versions.entry(event.key).or_default().push(event.value);
    }

    let mut candidates = Vec::new();
    for (s, session) in history.sessions.iter().enumerate() {
        for (t, txn) in session.transactions.iter().enumerate() {
            // redirecting a read inside a transaction that writes the same
            // key would corrupt the transaction itself rather than its
            // read-from link
            for (e, event) in txn.events.iter().enumerate() {
                if event.is_read()
                    && !txn.events.iter().any(|w| w.is_write() && w.key == event.key)
                    && versions
                        .get(&event.key)
                        .is_some_and(|vs| vs.iter().any(|&v| v != event.value))
                {
                    candidates.push((s, t, e));
                }
            }
        }
    }
    if candidates.is_empty() {
        return false;
    }

    let pick = Uniform::new(0, candidates.len()).unwrap().sample(&mut rng);
    let (s, t, e) = candidates[pick];
    let event = &mut history.sessions[s].transactions[t].events[e];
    let alternatives: Vec<Value> = versions[&event.key]
        .iter()
        .copied()
        .filter(|&v| v != event.value)
        .collect();
    let choice = Uniform::new(0, alternatives.len()).unwrap().sample(&mut rng);
    event.value = alternatives[choice];
    true
}

/// Generate a batch of histories in parallel.
#[must_use]
pub fn generate_mult_histories(
    n_hist: u64,
    n_node: u64,
    n_variable: u64,
    n_transaction: u64,
    n_event: u64,
) -> Vec<History> {
    (0..n_hist)
        .into_par_iter()
        .map(|i_hist| {
            let start = Local::now();
            let data = generate_single_history(n_node, n_variable, n_transaction, n_event);
            let end = Local::now();
            History {
                params: HistParams {
                    id: i_hist,
                    n_node,
                    n_variable,
                    n_transaction,
                    n_event,
                },
                info: "generated".to_string(),
                start,
                end,
                data,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_reads_are_coherent() {
        let history = generate_single_history_seeded(7, 3, 4, 5, 4);
        let mut written: HashMap<(Key, Value), u32> = HashMap::new();
        for (_, event) in history.events().filter(|(_, e)| e.is_write()) {
            *written.entry((event.key, event.value)).or_insert(0) += 1;
        }
        // unique values per key
        assert!(written.values().all(|&count| count == 1));
        // every read observes a written value
        for (_, event) in history.events().filter(|(_, e)| e.is_read()) {
            assert!(
                written.contains_key(&(event.key, event.value)),
                "read of unwritten {:?}",
                event
            );
        }
    }

    #[test]
    fn generated_ids_are_unique() {
        let history = generate_single_history_seeded(11, 3, 4, 5, 4);
        let mut ids: Vec<TxnId> = history.transactions().map(|t| t.id).collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn serial_histories_replay() {
        // the generation order must replay cleanly: reads match the store
        let history = generate_serial_history_seeded(3, 3, 4, 6, 4);
        let mut store: HashMap<Key, Value> = HashMap::new();
        let mut txns: Vec<&Transaction> = history.transactions().collect();
        txns.sort_by_key(|t| t.id);
        for txn in txns {
            for event in &txn.events {
                if event.is_read() {
                    assert_eq!(store.get(&event.key), Some(&event.value), "in {txn}");
                } else {
                    store.insert(event.key, event.value);
                }
            }
        }
    }

    #[test]
    fn corruption_changes_exactly_one_read() {
        let mut history = generate_serial_history_seeded(5, 3, 4, 6, 4);
        let pristine = history.clone();
        if corrupt_one_read_seeded(17, &mut history) {
            let before: Vec<Event> = pristine.events().map(|(_, e)| *e).collect();
            let after: Vec<Event> = history.events().map(|(_, e)| *e).collect();
            let diffs = before
                .iter()
                .zip(after.iter())
                .filter(|(a, b)| a != b)
                .count();
            assert_eq!(diffs, 1);
        }
    }
}
