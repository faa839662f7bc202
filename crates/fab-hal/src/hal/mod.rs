//! HAL trait definitions and implementations.
//!
//! This module defines the capability traits used by the station and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod fake_hal;
pub mod image_ops;
pub mod linux_hal;
pub mod process_ops;
pub mod serial_ops;

pub use fake_hal::{FakeHal, Operation, ScriptedProcess};
pub use image_ops::ImageOps;
pub use linux_hal::LinuxHal;
pub use process_ops::{ProcessExit, ProcessOps};
pub use serial_ops::{SerialLink, SerialOps};

/// Complete HAL combining all station capability traits.
pub trait StationHal: ProcessOps + SerialOps + ImageOps + Send + Sync {}

/// Automatically implement StationHal for any type implementing all required traits.
impl<T> StationHal for T where T: ProcessOps + SerialOps + ImageOps + Send + Sync {}
