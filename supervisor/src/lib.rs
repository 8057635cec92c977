//! FeedVox worker supervisor.
//!
//! Owns the lifecycle of the long-running backend worker process: proves
//! its liveness over redundant local transports, reconciles the result
//! into a status surface for the tray and UI, enforces the single-active
//! -worker invariant, and exposes a small command surface so the
//! presentation layer never touches OS process APIs directly.

pub mod commands;
pub mod logging;
pub mod worker;

pub use commands::{RestartOutcome, Supervisor, bootstrap, build_status};

#[cfg(test)]
mod tests;
