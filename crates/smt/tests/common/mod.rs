use std::collections::HashMap;

use polycheck_core::history::{History, Key, Transaction, Value};

/// Reference decision procedure for serializability: backtracking search
/// over all interleavings that respect session order, replaying each prefix
/// against a single store. Exponential, for small cross-check histories
/// only.
pub fn oracle_serializable(history: &History) -> bool {
    let sessions: Vec<&[Transaction]> = history
        .sessions
        .iter()
        .map(|s| s.transactions.as_slice())
        .collect();
    let mut progress = vec![0_usize; sessions.len()];
    search(&sessions, &mut progress, &HashMap::new())
}

fn replay(txn: &Transaction, store: &HashMap<Key, Value>) -> Option<HashMap<Key, Value>> {
    let mut store = store.clone();
    for event in &txn.events {
        if event.is_read() {
            if store.get(&event.key) != Some(&event.value) {
                return None;
            }
        } else {
            store.insert(event.key, event.value);
        }
    }
    Some(store)
}

fn search(
    sessions: &[&[Transaction]],
    progress: &mut [usize],
    store: &HashMap<Key, Value>,
) -> bool {
    let mut done = true;
    for i in 0..sessions.len() {
        if progress[i] < sessions[i].len() {
            done = false;
            let txn = &sessions[i][progress[i]];
            if let Some(next) = replay(txn, store) {
                progress[i] += 1;
                if search(sessions, progress, &next) {
                    return true;
                }
                progress[i] -= 1;
            }
        }
    }
    done
}
