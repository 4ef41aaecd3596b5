//! Side-effecting adapters: configuration, fixtures, and the locate/act seams.

pub mod actuator;
pub mod config;
pub mod fixtures;
pub mod locator;
pub mod replay;
