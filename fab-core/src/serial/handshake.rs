use super::machine::{HandshakeAction, HandshakeEvent, HandshakeMachine, HandshakeState};
use fab_error::ProvisionError;
use fab_hal::{SerialLink, SerialOps};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Where and how to talk to the factory console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeSettings {
    pub port: String,
    pub baud: u32,
    /// Bounded wait per read attempt; also the stop latency.
    pub read_timeout: Duration,
    pub sentinel: String,
    pub password: String,
    pub command: String,
}

/// Running flag shared between the reader loop and whoever may stop it.
#[derive(Debug, Clone)]
pub struct StopToken {
    running: Arc<AtomicBool>,
}

impl StopToken {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Returns true only for the call that actually cleared the flag.
    pub fn request_stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeOutcome {
    pub reached_active: bool,
    pub error: Option<ProvisionError>,
}

/// Owner-side view of a running handshake.
pub struct HandshakeHandle {
    token: StopToken,
    state: Arc<Mutex<HandshakeState>>,
    thread: Option<JoinHandle<HandshakeOutcome>>,
}

impl HandshakeHandle {
    /// Ask the reader loop to close the port. Safe to call any number of times.
    pub fn stop(&self) -> bool {
        let stopped = self.token.request_stop();
        if stopped {
            debug!("handshake stop requested");
        }
        stopped
    }

    pub fn stop_token(&self) -> StopToken {
        self.token.clone()
    }

    pub fn state(&self) -> HandshakeState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Wait for the reader loop to exit. Does not stop it.
    pub fn join(mut self) -> HandshakeOutcome {
        let joined = match self.thread.take() {
            Some(thread) => thread.join().ok(),
            None => None,
        };
        match joined {
            Some(outcome) => outcome,
            None => HandshakeOutcome {
                reached_active: false,
                error: Some(ProvisionError::SerialReadError(
                    "handshake reader panicked".to_string(),
                )),
            },
        }
    }
}

impl Drop for HandshakeHandle {
    /// A handle dropped without `join` stops the reader rather than leaving it
    /// polling the port.
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.token.request_stop();
        }
    }
}

pub struct SerialHandshake;

impl SerialHandshake {
    /// Open the factory port on a dedicated thread and run the handshake until
    /// stopped or a serial error occurs. Events go to `events`; a dropped
    /// receiver is ignored.
    pub fn start<H>(
        hal: Arc<H>,
        settings: HandshakeSettings,
        events: Sender<HandshakeEvent>,
    ) -> HandshakeHandle
    where
        H: SerialOps + Send + Sync + ?Sized + 'static,
    {
        let token = StopToken::new();
        let state = Arc::new(Mutex::new(HandshakeState::Closed));
        let reader = Reader {
            token: token.clone(),
            state: Arc::clone(&state),
            events,
            machine: HandshakeMachine::new(
                settings.sentinel.clone(),
                settings.password.clone(),
                settings.command.clone(),
            ),
        };
        let thread = thread::spawn(move || reader.run(hal.as_ref(), &settings));
        HandshakeHandle {
            token,
            state,
            thread: Some(thread),
        }
    }
}

struct Reader {
    token: StopToken,
    state: Arc<Mutex<HandshakeState>>,
    events: Sender<HandshakeEvent>,
    machine: HandshakeMachine,
}

impl Reader {
    fn run<H: SerialOps + ?Sized>(
        mut self,
        hal: &H,
        settings: &HandshakeSettings,
    ) -> HandshakeOutcome {
        let opened = hal.open_serial(&settings.port, settings.baud, settings.read_timeout);
        let mut link = match opened {
            Ok(link) => link,
            Err(err) => {
                let err = ProvisionError::from_serial(&settings.port, err);
                warn!("❌ factory console: {}", err);
                self.emit(HandshakeEvent::Data(format!("Error: {}", err)));
                return HandshakeOutcome {
                    reached_active: false,
                    error: Some(err),
                };
            }
        };
        self.machine.opened();
        self.publish_state();
        info!("👂 listening on {} for factory prompt", settings.port);

        let mut reached_active = false;
        let mut error = None;
        while self.token.is_running() {
            let line = match link.read_line() {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(err) => {
                    error = Some(ProvisionError::from_serial(&settings.port, err));
                    break;
                }
            };
            debug!("[factory] {}", line);
            let actions = self.machine.on_line(&line);
            self.publish_state();
            if let Err(err) = self.perform(&mut *link, actions) {
                error = Some(err);
                break;
            }
            if self.machine.state() == HandshakeState::SentinelSeen {
                let actions = self.machine.writes_done();
                self.publish_state();
                reached_active = true;
                info!("✅ factory mode active on {}", settings.port);
                self.emit_all(actions);
            }
        }

        drop(link);
        match &error {
            Some(err) => {
                warn!("❌ factory console: {}", err);
                self.machine.failed();
                self.publish_state();
                self.emit(HandshakeEvent::Data(format!("Error: {}", err)));
            }
            None => {
                let actions = self.machine.closed();
                self.publish_state();
                self.emit_all(actions);
                debug!("closed {}", settings.port);
            }
        }
        HandshakeOutcome {
            reached_active,
            error,
        }
    }

    fn perform(
        &self,
        link: &mut dyn SerialLink,
        actions: Vec<HandshakeAction>,
    ) -> Result<(), ProvisionError> {
        for action in actions {
            match action {
                HandshakeAction::Emit(event) => self.emit(event),
                HandshakeAction::Write(line) => link
                    .write_line(&line)
                    .map_err(|e| ProvisionError::SerialReadError(e.to_string()))?,
            }
        }
        Ok(())
    }

    /// Emits only; closing and activation never write.
    fn emit_all(&self, actions: Vec<HandshakeAction>) {
        for action in actions {
            if let HandshakeAction::Emit(event) = action {
                self.emit(event);
            }
        }
    }

    fn emit(&self, event: HandshakeEvent) {
        let _ = self.events.send(event);
    }

    fn publish_state(&self) {
        let current = self.machine.state();
        match self.state.lock() {
            Ok(mut state) => *state = current,
            Err(poisoned) => *poisoned.into_inner() = current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::FactoryState;
    use fab_hal::FakeHal;
    use std::sync::mpsc::{self, Receiver};
    use std::time::Instant;

    const PORT: &str = "/dev/ttyUSB1";

    fn settings() -> HandshakeSettings {
        HandshakeSettings {
            port: PORT.to_string(),
            baud: 115_200,
            read_timeout: Duration::from_millis(10),
            sentinel: ".".to_string(),
            password: "factory-pass".to_string(),
            command: "led 1".to_string(),
        }
    }

    fn wait_for_state(rx: &Receiver<HandshakeEvent>, wanted: FactoryState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(HandshakeEvent::StateChanged(state)) if state == wanted => return true,
                Ok(_) | Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => return false,
            }
        }
        false
    }

    #[test]
    fn sentinel_writes_password_then_command() {
        let hal = Arc::new(FakeHal::new());
        hal.script_serial(PORT, b"noise\n.\n");
        let (tx, rx) = mpsc::channel();
        let handle = SerialHandshake::start(Arc::clone(&hal), settings(), tx);

        assert!(wait_for_state(&rx, FactoryState::Active));
        assert_eq!(handle.state(), HandshakeState::Active);
        assert_eq!(hal.serial_writes(PORT), vec!["factory-pass", "led 1"]);

        assert!(handle.stop());
        let outcome = handle.join();
        assert!(outcome.reached_active);
        assert!(outcome.error.is_none());

        let rest: Vec<HandshakeEvent> = rx.try_iter().collect();
        assert!(rest.contains(&HandshakeEvent::StateChanged(FactoryState::Inactive)));
    }

    #[test]
    fn noise_then_stop_never_writes() {
        let hal = Arc::new(FakeHal::new());
        hal.script_serial(PORT, b"noise\nnoise\n");
        let (tx, rx) = mpsc::channel();
        let handle = SerialHandshake::start(Arc::clone(&hal), settings(), tx);

        let mut seen = Vec::new();
        while seen.len() < 2 {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(event) => seen.push(event),
                Err(_) => break,
            }
        }
        handle.stop();
        let outcome = handle.join();
        seen.extend(rx.try_iter());

        assert!(!outcome.reached_active);
        assert!(hal.serial_writes(PORT).is_empty());
        assert!(seen
            .iter()
            .all(|event| matches!(event, HandshakeEvent::Data(_))));
        assert_eq!(
            seen,
            vec![
                HandshakeEvent::Data("noise".into()),
                HandshakeEvent::Data("noise".into())
            ]
        );
    }

    #[test]
    fn stop_is_idempotent() {
        let hal = Arc::new(FakeHal::new());
        let (tx, _rx) = mpsc::channel();
        let handle = SerialHandshake::start(Arc::clone(&hal), settings(), tx);
        let token = handle.stop_token();

        assert!(handle.stop());
        assert!(!handle.stop());
        assert!(!token.request_stop());
        handle.join();
        assert_eq!(hal.serial_close_count(PORT), 1);
    }

    #[test]
    fn read_error_ends_unresolved() {
        let hal = Arc::new(FakeHal::new());
        hal.script_serial(PORT, b"boot\n");
        hal.script_serial_error(PORT, "device disconnected");
        let (tx, rx) = mpsc::channel();
        let handle = SerialHandshake::start(Arc::clone(&hal), settings(), tx);

        let outcome = handle.join();
        assert!(!outcome.reached_active);
        assert!(matches!(
            outcome.error,
            Some(ProvisionError::SerialReadError(_))
        ));
        let events: Vec<HandshakeEvent> = rx.try_iter().collect();
        assert!(events.iter().any(
            |e| matches!(e, HandshakeEvent::Data(line) if line.starts_with("Error:"))
        ));
    }

    #[test]
    fn write_failure_never_reaches_active() {
        let hal = Arc::new(FakeHal::new());
        hal.script_serial(PORT, b".\n");
        hal.fail_serial_write(PORT);
        let (tx, rx) = mpsc::channel();
        let handle = SerialHandshake::start(Arc::clone(&hal), settings(), tx);

        let outcome = handle.join();
        assert!(!outcome.reached_active);
        assert!(outcome.error.is_some());
        assert!(hal.serial_writes(PORT).is_empty());
        let events: Vec<HandshakeEvent> = rx.try_iter().collect();
        assert!(!events.contains(&HandshakeEvent::StateChanged(FactoryState::Active)));
        assert!(events.iter().any(
            |e| matches!(e, HandshakeEvent::Data(line) if line.starts_with("Error:"))
        ));
    }

    #[test]
    fn dropping_handle_stops_reader() {
        let hal = Arc::new(FakeHal::new());
        let (tx, rx) = mpsc::channel();
        let handle = SerialHandshake::start(Arc::clone(&hal), settings(), tx);
        drop(handle);

        // The reader owns the only sender; it disconnects once the loop exits.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut disconnected = false;
        while Instant::now() < deadline {
            if let Err(mpsc::RecvTimeoutError::Disconnected) =
                rx.recv_timeout(Duration::from_millis(50))
            {
                disconnected = true;
                break;
            }
        }
        assert!(disconnected);
        assert_eq!(hal.serial_close_count(PORT), 1);
    }

    #[test]
    fn open_failure_is_serial_open_error() {
        let hal = Arc::new(FakeHal::new());
        hal.fail_serial_open(PORT);
        let (tx, _rx) = mpsc::channel();
        let outcome = SerialHandshake::start(Arc::clone(&hal), settings(), tx).join();
        assert!(matches!(
            outcome.error,
            Some(ProvisionError::SerialOpenError { .. })
        ));
        assert_eq!(hal.serial_close_count(PORT), 0);
    }
}
