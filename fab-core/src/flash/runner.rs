use super::step::{FlashStep, OperationKind, StepResult, StepStatus};
use fab_error::ProvisionError;
use fab_hal::{ProcessExit, ProcessOps};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::time::Duration;

/// Printed by the tool once it has reset the chip after a write.
pub const RESET_SENTINEL: &str = "Hard resetting via RTS pin...";
/// Prefix of the MAC line printed by `read_mac`.
pub const MAC_MARKER: &str = "MAC: ";

const STDOUT_TAIL_LINES: usize = 20;

/// Write steps: Success needs the reset sentinel and exit 0; a non-zero exit is
/// an Error whatever the output said.
pub fn classify_flash(
    sentinel_seen: bool,
    exit: &ProcessExit,
) -> (StepStatus, Option<ProvisionError>) {
    if !exit.success() {
        return (
            StepStatus::Error,
            Some(ProvisionError::ProcessExitError {
                exit_code: exit.code,
                stderr: exit.stderr.clone(),
            }),
        );
    }
    if sentinel_seen {
        (StepStatus::Success, None)
    } else {
        (StepStatus::Failure, Some(ProvisionError::SentinelNotObserved))
    }
}

/// One-shot commands: Success is exit 0 with nothing on stderr.
pub fn classify_one_shot(exit: &ProcessExit) -> (StepStatus, Option<ProvisionError>) {
    let failure = Some(ProvisionError::ProcessExitError {
        exit_code: exit.code,
        stderr: exit.stderr.clone(),
    });
    if !exit.success() {
        (StepStatus::Error, failure)
    } else if !exit.stderr.trim().is_empty() {
        (StepStatus::Failure, failure)
    } else {
        (StepStatus::Success, None)
    }
}

/// Value after [`MAC_MARKER`] on the first line carrying it.
pub fn parse_mac<'a, I>(lines: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .find_map(|line| line.split_once(MAC_MARKER).map(|(_, mac)| mac.trim().to_string()))
        .filter(|mac| !mac.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacReading {
    pub result: StepResult,
    pub mac: Option<String>,
}

/// Runs single tool invocations. Holds no state between calls.
pub struct StepRunner<'a, P: ProcessOps + ?Sized> {
    hal: &'a P,
    tool: String,
    timeout: Duration,
}

impl<'a, P: ProcessOps + ?Sized> StepRunner<'a, P> {
    pub fn new(hal: &'a P, tool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            hal,
            tool: tool.into(),
            timeout,
        }
    }

    pub fn run(&self, step: &FlashStep) -> StepResult {
        self.execute(step, &mut |_| {})
    }

    /// Commands without images (`run`). Judged on exit code and stderr only.
    pub fn run_one_shot(&self, step: &FlashStep) -> StepResult {
        debug_assert!(!step.kind().expects_reset_sentinel());
        self.execute(step, &mut |_| {})
    }

    /// Single-shot query; a missing MAC line is not an error.
    pub fn read_mac(&self, step: &FlashStep) -> MacReading {
        let mut mac = None;
        let result = self.execute(step, &mut |line| {
            if mac.is_none() {
                mac = parse_mac([line]);
            }
        });
        if mac.is_none() {
            warn!("{}: no MAC in read_mac output", step.target());
        }
        MacReading { result, mac }
    }

    fn execute(&self, step: &FlashStep, on_line: &mut dyn FnMut(&str)) -> StepResult {
        let mut result = StepResult::pending(step);
        let args = step.args();
        info!("⚡ {} {}: {} {}", step.target(), step.kind(), self.tool, args.join(" "));
        result.status = StepStatus::Running;

        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDOUT_TAIL_LINES);
        let mut sentinel_seen = false;
        let outcome = self
            .hal
            .run_streaming(&self.tool, &args, self.timeout, &mut |line| {
                debug!("[{}] {}", step.target(), line);
                if line.contains(RESET_SENTINEL) {
                    sentinel_seen = true;
                }
                if tail.len() == STDOUT_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
                on_line(line);
            });
        result.stdout_tail = tail.into_iter().collect();

        let exit = match outcome {
            Ok(exit) => exit,
            Err(err) => {
                let failure = ProvisionError::from_process(&self.tool, err);
                warn!("❌ {} {}: {}", step.target(), step.kind(), failure);
                result.status = StepStatus::Error;
                result.failure = Some(failure);
                return result;
            }
        };

        let (status, failure) = if step.kind().expects_reset_sentinel() {
            classify_flash(sentinel_seen, &exit)
        } else {
            classify_one_shot(&exit)
        };
        result.status = status;
        result.exit_code = exit.code;
        if status != StepStatus::Success && !exit.stderr.is_empty() {
            result.stderr = Some(exit.stderr);
        }
        match &failure {
            None => info!("✅ {} {} succeeded", step.target(), step.kind()),
            Some(f) => warn!("❌ {} {}: {}", step.target(), step.kind(), f),
        }
        result.failure = failure;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::{ImagePair, Target};
    use fab_hal::{FakeHal, ScriptedProcess};
    use std::path::PathBuf;

    fn exit(code: i32, stderr: &str) -> ProcessExit {
        ProcessExit {
            code: Some(code),
            stderr: stderr.to_string(),
        }
    }

    fn firmware_step() -> FlashStep {
        FlashStep::new(
            Target::S3,
            OperationKind::WriteFirmware,
            vec![ImagePair {
                address: "0x10000".to_string(),
                image: PathBuf::from("fw/rc.bin"),
            }],
            "/dev/ttyUSB0",
            460800,
        )
    }

    fn runner(hal: &FakeHal) -> StepRunner<'_, FakeHal> {
        StepRunner::new(hal, "esptool.py", Duration::from_secs(30))
    }

    #[test]
    fn classify_flash_covers_all_cases() {
        for sentinel in [true, false] {
            for code in [1, 2, 255] {
                let (status, failure) = classify_flash(sentinel, &exit(code, "boom"));
                assert_eq!(status, StepStatus::Error);
                assert!(matches!(
                    failure,
                    Some(ProvisionError::ProcessExitError { .. })
                ));
            }
        }
        assert_eq!(classify_flash(true, &exit(0, "")).0, StepStatus::Success);
        let (status, failure) = classify_flash(false, &exit(0, ""));
        assert_eq!(status, StepStatus::Failure);
        assert_eq!(failure, Some(ProvisionError::SentinelNotObserved));
    }

    #[test]
    fn signal_exit_is_error() {
        let killed = ProcessExit {
            code: None,
            stderr: String::new(),
        };
        assert_eq!(classify_flash(true, &killed).0, StepStatus::Error);
    }

    #[test]
    fn one_shot_needs_clean_stderr() {
        assert_eq!(classify_one_shot(&exit(0, "")).0, StepStatus::Success);
        assert_eq!(classify_one_shot(&exit(0, "warning")).0, StepStatus::Failure);
        assert_eq!(classify_one_shot(&exit(1, "")).0, StepStatus::Error);
    }

    #[test]
    fn parse_mac_takes_first_marker_line() {
        let lines = [
            "Chip is ESP32-S3",
            "MAC: aa:bb:cc:dd:ee:ff",
            "BASE MAC: 11:22:33:44:55:66",
        ];
        assert_eq!(parse_mac(lines).as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(parse_mac(["no marker here"]), None);
        assert_eq!(parse_mac(["MAC: "]), None);
    }

    #[test]
    fn run_succeeds_on_sentinel_and_clean_exit() {
        let hal = FakeHal::new();
        hal.script_command(
            &["write_flash"],
            ScriptedProcess::ok(["Writing at 0x00010000...", RESET_SENTINEL]),
        );
        let result = runner(&hal).run(&firmware_step());
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout_tail.last().map(String::as_str), Some(RESET_SENTINEL));
        assert!(result.stderr.is_none());
        assert_eq!(
            hal.commands()[0],
            vec![
                "--port",
                "/dev/ttyUSB0",
                "--baud",
                "460800",
                "write_flash",
                "0x10000",
                "fw/rc.bin"
            ]
        );
    }

    #[test]
    fn run_errors_keep_stderr_verbatim() {
        let hal = FakeHal::new();
        hal.script_command(
            &["write_flash"],
            ScriptedProcess::exit(2, "A fatal error occurred: Failed to connect\n")
                .with_stdout([RESET_SENTINEL]),
        );
        let result = runner(&hal).run(&firmware_step());
        assert_eq!(result.status, StepStatus::Error);
        assert_eq!(result.exit_code, Some(2));
        assert_eq!(
            result.stderr.as_deref(),
            Some("A fatal error occurred: Failed to connect\n")
        );
    }

    #[test]
    fn run_without_sentinel_is_failure() {
        let hal = FakeHal::new();
        let result = runner(&hal).run(&firmware_step());
        assert_eq!(result.status, StepStatus::Failure);
        assert_eq!(result.failure, Some(ProvisionError::SentinelNotObserved));
    }

    #[test]
    fn missing_tool_is_spawn_failed() {
        let hal = FakeHal::new();
        hal.script_command(&[], ScriptedProcess::missing());
        let result = runner(&hal).run(&firmware_step());
        assert_eq!(result.status, StepStatus::Error);
        assert!(matches!(
            result.failure,
            Some(ProvisionError::SpawnFailed { .. })
        ));
    }

    #[test]
    fn stdout_tail_is_bounded() {
        let hal = FakeHal::new();
        let lines: Vec<String> = (0..100).map(|i| format!("line {}", i)).collect();
        hal.script_command(&["write_flash"], ScriptedProcess::ok(lines));
        let result = runner(&hal).run(&firmware_step());
        assert_eq!(result.stdout_tail.len(), STDOUT_TAIL_LINES);
        assert_eq!(result.stdout_tail[0], "line 80");
    }

    #[test]
    fn reboot_with_stderr_is_failure() {
        let hal = FakeHal::new();
        hal.script_command(&["run"], ScriptedProcess::exit(0, "Warning: port reopened"));
        let step = FlashStep::one_shot(Target::S3, OperationKind::Run, "/dev/ttyUSB0", 460800);
        let result = runner(&hal).run_one_shot(&step);
        assert_eq!(result.status, StepStatus::Failure);
        assert_eq!(result.stderr.as_deref(), Some("Warning: port reopened"));

        let hal = FakeHal::new();
        assert!(runner(&hal).run_one_shot(&step).is_success());
    }

    #[test]
    fn read_mac_parses_value() {
        let hal = FakeHal::new();
        hal.script_command(
            &["read_mac"],
            ScriptedProcess::ok(["Serial port /dev/ttyUSB0", "MAC: AA:BB:CC:DD:EE:FF"]),
        );
        let step = FlashStep::one_shot(Target::S3, OperationKind::ReadMac, "/dev/ttyUSB0", 460800);
        let reading = runner(&hal).read_mac(&step);
        assert!(reading.result.is_success());
        assert_eq!(reading.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn read_mac_without_marker_is_none() {
        let hal = FakeHal::new();
        let step = FlashStep::one_shot(Target::H2, OperationKind::ReadMac, "/dev/ttyUSB2", 921600);
        let reading = runner(&hal).read_mac(&step);
        assert!(reading.mac.is_none());
        assert!(reading.result.is_success());
    }
}
