//! Fab station Hardware Abstraction Layer (HAL).
//!
//! Everything that touches the outside world (the flashing tool, serial lines,
//! image files on disk) goes through the traits in [`hal`] so the orchestrator
//! can be exercised against [`FakeHal`] without a device on the bench.

pub mod hal;

pub use fab_error::{HalError, HalResult};
pub use hal::*;
