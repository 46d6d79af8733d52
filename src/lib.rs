//! leaktrace
//!
//! Localizes microarchitectural side-channel leakage in program execution
//! traces: instructions whose branch direction, call/return target or
//! memory-access address depends on the test case.
//!
//! The crate merges one preprocessed trace per test case into a compact
//! call tree, then walks the tree once to attribute every divergence to
//! its call stack and render the findings.
//!
//! Most users should install and use the CLI:
//!
//! ```bash
//! leaktrace analyze --traces ./traces --output ./results
//! ```

pub mod analysis;
pub mod calltree;
pub mod commands;
pub mod output;
pub mod symbols;
pub mod trace;
pub mod utils;
