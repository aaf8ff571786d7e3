//! Test helpers
//!
//! In-memory chains at a low difficulty, plus shortcuts for building signed
//! transfers straight from chain history.

pub mod test_utils;

pub use test_utils::*;
