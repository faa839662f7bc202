//! Linux HAL implementation using real processes, serial ports and files.

use super::{ImageOps, ProcessExit, ProcessOps, SerialLink, SerialOps};
use crate::{HalError, HalResult};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;
use walkdir::WalkDir;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const EXIT_GRACE: Duration = Duration::from_secs(5);

fn map_command_err(program: &str, err: io::Error) -> HalError {
    if err.kind() == io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn read_lossy_lines<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

impl ProcessOps for LinuxHal {
    fn run_streaming(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        on_stdout_line: &mut dyn FnMut(&str),
    ) -> HalResult<ProcessExit> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| map_command_err(program, e))?;

        // Drain stderr in the background to avoid deadlocks if the tool is chatty.
        let mut stderr_handle = child.stderr.take().map(|stderr| {
            std::thread::spawn(move || {
                let mut s = String::new();
                let mut reader = BufReader::new(stderr);
                let _ = reader.read_to_string(&mut s);
                s
            })
        });

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            std::thread::spawn(move || read_lossy_lines(stdout, tx));
        } else {
            drop(tx);
        }

        let start = Instant::now();
        loop {
            if start.elapsed() > timeout {
                let _ = child.kill();
                let _ = child.wait();
                if let Some(h) = stderr_handle.take() {
                    let _ = h.join();
                }
                return Err(HalError::CommandTimeout {
                    program: program.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }

            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => on_stdout_line(&line),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                // stdout closed: the process is exiting (or already gone).
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        let remaining = timeout.saturating_sub(start.elapsed()).max(EXIT_GRACE);
        let status = match child.wait_timeout(remaining).map_err(HalError::Io)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(HalError::CommandTimeout {
                    program: program.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let stderr = stderr_handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        Ok(ProcessExit {
            code: status.code(),
            stderr,
        })
    }
}

/// Serial line backed by the `serialport` crate.
struct SerialPortLink {
    port: String,
    reader: BufReader<Box<dyn serialport::SerialPort>>,
    pending: Vec<u8>,
}

impl SerialPortLink {
    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.pending.clear();
        line
    }
}

impl SerialLink for SerialPortLink {
    fn read_line(&mut self) -> HalResult<Option<String>> {
        // read_until appends whatever it consumed before a timeout, so partial
        // lines survive across calls in `pending`.
        match self.reader.read_until(b'\n', &mut self.pending) {
            Ok(0) => Ok(None),
            Ok(_) if self.pending.ends_with(b"\n") => Ok(Some(self.take_line())),
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(e) => Err(HalError::SerialIo(format!("{}: {}", self.port, e))),
        }
    }

    fn write_line(&mut self, line: &str) -> HalResult<()> {
        let port = self.reader.get_mut();
        port.write_all(line.as_bytes())
            .and_then(|_| port.write_all(b"\n"))
            .and_then(|_| port.flush())
            .map_err(|e| HalError::SerialIo(format!("{}: {}", self.port, e)))
    }
}

impl Drop for SerialPortLink {
    fn drop(&mut self) {
        log::debug!("closing serial port {}", self.port);
    }
}

impl SerialOps for LinuxHal {
    fn open_serial(
        &self,
        port: &str,
        baud: u32,
        read_timeout: Duration,
    ) -> HalResult<Box<dyn SerialLink>> {
        let handle = serialport::new(port, baud)
            .timeout(read_timeout)
            .open()
            .map_err(|e| HalError::SerialOpen {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        log::info!("opened serial port {} @ {} baud", port, baud);
        Ok(Box::new(SerialPortLink {
            port: port.to_string(),
            reader: BufReader::new(handle),
            pending: Vec::new(),
        }))
    }

    fn list_serial_ports(&self) -> HalResult<Vec<String>> {
        let ports = serialport::available_ports()
            .map_err(|e| HalError::Other(format!("failed to enumerate serial ports: {}", e)))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}

impl ImageOps for LinuxHal {
    fn locate_image(&self, dir: &Path, keyword: &str) -> HalResult<Option<PathBuf>> {
        let found = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .find(|entry| {
                let path = entry.path();
                let is_bin = path.extension().is_some_and(|ext| ext == "bin");
                let name_matches = entry.file_name().to_string_lossy().contains(keyword);
                is_bin && name_matches
            })
            .map(|entry| entry.into_path());
        Ok(found)
    }
}
