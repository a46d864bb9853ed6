//! Random history generation for tests, benches, and the CLI.
//!
//! Two generators are provided: an unconstrained one whose histories are
//! coherent but not necessarily consistent, and a serial one that replays a
//! materialized total order and therefore produces ground-truth serializable
//! histories. [`generator::corrupt_one_read_seeded`] perturbs a single
//! read-from link to build the reject direction of property tests.

pub mod generator;

pub use generator::{
    corrupt_one_read_seeded, generate_mult_histories, generate_serial_history_seeded,
    generate_single_history, generate_single_history_seeded, History,
};
