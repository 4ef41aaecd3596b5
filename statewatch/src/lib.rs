//! State-aware monitoring scheduler for visual UI automation.
//!
//! A monitored application is described as a catalog of *states*, each
//! detected through visual *anchors*, and *transitions* that move between
//! states with locate/act steps. The scheduler periodically confirms that the
//! required states are active (restoring them through transitions when
//! needed) before running a monitoring task.
//!
//! - **[`core`]**: Pure data and rules (regions, anchor registry, region
//!   resolution, catalog validation, path planning). No I/O.
//! - **[`io`]**: Side-effecting seams (config files, fixtures, screen locators,
//!   input actuators). Swappable for scripted doubles in tests.
//!
//! [`monitor`], [`finder`], [`transition`], [`verify`] and [`scheduler`]
//! combine the two; [`validate`] and [`run`] implement CLI commands.

pub mod cancel;
pub mod core;
pub mod exit_codes;
pub mod finder;
pub mod io;
pub mod logging;
pub mod monitor;
pub mod run;
pub mod scheduler;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod transition;
pub mod validate;
pub mod verify;
