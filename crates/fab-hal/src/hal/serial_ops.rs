//! Serial line access.

use crate::HalResult;
use std::time::Duration;

/// An open, exclusively owned serial line carrying newline-delimited text.
///
/// Dropping the link closes the port.
pub trait SerialLink: Send {
    /// Read one line without its terminator.
    ///
    /// Returns `Ok(None)` when the read timeout elapses before a full line arrived;
    /// partial data is kept for the next call.
    fn read_line(&mut self) -> HalResult<Option<String>>;

    /// Write `line` followed by `\n`.
    fn write_line(&mut self, line: &str) -> HalResult<()>;
}

pub trait SerialOps {
    fn open_serial(
        &self,
        port: &str,
        baud: u32,
        read_timeout: Duration,
    ) -> HalResult<Box<dyn SerialLink>>;

    /// Device paths of the serial ports currently present.
    fn list_serial_ports(&self) -> HalResult<Vec<String>>;
}
