//! Deterministic, pure logic shared by the monitor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod anchors;
pub mod catalog;
pub mod paths;
pub mod region;
pub mod resolver;
pub mod states;
