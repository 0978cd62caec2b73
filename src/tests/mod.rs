//! Crate-internal test suites
//!
//! - `common`: fixtures shared across suites
//! - `mocks`: mockall doubles for the storage seams
//! - `property`: proptest invariants

mod common;
mod mocks;
mod property;
