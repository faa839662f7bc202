//! Fab station core library.
//!
//! `fab-core` holds the configuration, domain types and leaf components
//! (step runner, serial handshake, report) used by the workflow crate and the
//! station binary.

pub mod config;
pub mod config_states;
pub mod errors;
pub mod flash;
pub mod logging;
pub mod orders;
pub mod preflight;
pub mod report;
pub mod serial;

#[cfg(test)]
pub mod test_env;
