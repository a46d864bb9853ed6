//! Randomized agreement between the CDCL(T) engine and a reference
//! backtracking oracle, over both generator families.

mod common;

use common::oracle_serializable;
use polycheck_core::verdict::{CheckOptions, Isolation};
use polycheck_smt::check;
use polycheck_testgen::{
    corrupt_one_read_seeded, generate_serial_history_seeded, generate_single_history_seeded,
};

fn ser() -> CheckOptions {
    CheckOptions::new()
}

fn si() -> CheckOptions {
    CheckOptions::new().isolation(Isolation::SnapshotIsolation)
}

fn is_accept(history: &polycheck_core::history::History, options: &CheckOptions) -> bool {
    check(history, options).unwrap().is_accept()
}

/// Replaying a materialized total order always yields a serializable
/// history; the engine must accept it under both isolation levels.
#[test]
fn serial_histories_accept() {
    for seed in 0..30 {
        let history = generate_serial_history_seeded(seed, 3, 4, 2, 3);
        assert!(
            is_accept(&history, &ser()),
            "serial history rejected (seed {seed})"
        );
        assert!(
            is_accept(&history, &si()),
            "serial history rejected under SI (seed {seed})"
        );
    }
}

/// After redirecting one read-from link the engine must still agree with
/// the oracle, whichever way the verdict goes.
#[test]
fn corrupted_serial_histories_match_oracle() {
    let mut rejected = 0;
    for seed in 0..30 {
        let mut history = generate_serial_history_seeded(seed, 3, 4, 2, 3);
        if !corrupt_one_read_seeded(seed ^ 0xdead, &mut history) {
            continue;
        }
        let expected = oracle_serializable(&history);
        assert_eq!(
            is_accept(&history, &ser()),
            expected,
            "verdict mismatch on corrupted history (seed {seed})"
        );
        if !expected {
            rejected += 1;
        }
        // snapshot isolation only ever rejects where serializability does
        if !is_accept(&history, &si()) {
            assert!(
                !expected,
                "SI rejected a serializable history (seed {seed})"
            );
        }
    }
    assert!(rejected > 0, "no corruption produced a rejection");
}

/// Unconstrained random histories, cross-checked against the oracle.
#[test]
fn random_histories_match_oracle() {
    for seed in 0..30 {
        let history = generate_single_history_seeded(seed, 3, 3, 2, 3);
        let expected = oracle_serializable(&history);
        assert_eq!(
            is_accept(&history, &ser()),
            expected,
            "verdict mismatch on random history (seed {seed})"
        );
        // anything serializable is also snapshot-isolated
        if expected {
            assert!(
                is_accept(&history, &si()),
                "SI rejected a serializable history (seed {seed})"
            );
        }
    }
}

/// Pruning is a performance device: it never changes the verdict.
#[test]
fn pruning_does_not_change_the_verdict() {
    for seed in 0..30u64 {
        let history = generate_single_history_seeded(seed.wrapping_mul(31) + 5, 3, 3, 2, 3);
        for options in [ser(), si()] {
            let with = check(&history, &options).unwrap().is_accept();
            let without = check(&history, &options.clone().pruning(false))
                .unwrap()
                .is_accept();
            assert_eq!(
                with, without,
                "pruning changed the verdict (seed {seed}, {:?})",
                options.isolation
            );
        }
    }
}

/// Snapshot isolation accepts a superset of serializability.
#[test]
fn si_is_weaker_than_serializability() {
    for seed in 0..40u64 {
        let history = generate_single_history_seeded(seed.wrapping_add(1000), 3, 3, 2, 4);
        if is_accept(&history, &ser()) {
            assert!(
                is_accept(&history, &si()),
                "SI rejected where serializability accepted (seed {seed})"
            );
        }
    }
}
