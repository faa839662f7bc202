use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    Closed,
    Listening,
    SentinelSeen,
    Active,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Closed => "closed",
            HandshakeState::Listening => "listening",
            HandshakeState::SentinelSeen => "sentinel-seen",
            HandshakeState::Active => "active",
        };
        f.write_str(name)
    }
}

/// Factory-mode transitions reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactoryState {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// A line received from the device, or an `Error: ...` line from the reader.
    Data(String),
    StateChanged(FactoryState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeAction {
    Emit(HandshakeEvent),
    /// Send one line to the device.
    Write(String),
}

/// Handshake transitions without I/O. The reader loop feeds it lines and
/// performs whatever actions come back.
#[derive(Debug, Clone)]
pub struct HandshakeMachine {
    state: HandshakeState,
    sentinel: String,
    password: String,
    command: String,
}

impl HandshakeMachine {
    pub fn new(
        sentinel: impl Into<String>,
        password: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            state: HandshakeState::Closed,
            sentinel: sentinel.into(),
            password: password.into(),
            command: command.into(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn opened(&mut self) {
        if self.state == HandshakeState::Closed {
            self.state = HandshakeState::Listening;
        }
    }

    pub fn on_line(&mut self, line: &str) -> Vec<HandshakeAction> {
        let mut actions = vec![HandshakeAction::Emit(HandshakeEvent::Data(line.to_string()))];
        let sentinel = self.sentinel.trim();
        if self.state == HandshakeState::Listening
            && !sentinel.is_empty()
            && line.trim() == sentinel
        {
            self.state = HandshakeState::SentinelSeen;
            actions.push(HandshakeAction::Write(self.password.clone()));
            actions.push(HandshakeAction::Write(self.command.clone()));
        }
        actions
    }

    /// Both writes went out.
    pub fn writes_done(&mut self) -> Vec<HandshakeAction> {
        if self.state != HandshakeState::SentinelSeen {
            return Vec::new();
        }
        self.state = HandshakeState::Active;
        vec![HandshakeAction::Emit(HandshakeEvent::StateChanged(
            FactoryState::Active,
        ))]
    }

    /// Port closed on request.
    pub fn closed(&mut self) -> Vec<HandshakeAction> {
        let was_active = self.state == HandshakeState::Active;
        self.state = HandshakeState::Closed;
        if was_active {
            vec![HandshakeAction::Emit(HandshakeEvent::StateChanged(
                FactoryState::Inactive,
            ))]
        } else {
            Vec::new()
        }
    }

    /// Serial error: the session ends unresolved.
    pub fn failed(&mut self) {
        self.state = HandshakeState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> HandshakeMachine {
        let mut m = HandshakeMachine::new(".", "factory-pass", "led 1");
        m.opened();
        m
    }

    fn writes(actions: &[HandshakeAction]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|a| match a {
                HandshakeAction::Write(line) => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sentinel_triggers_password_then_command() {
        let mut m = machine();
        assert!(writes(&m.on_line("noise")).is_empty());
        let actions = m.on_line(".");
        assert_eq!(writes(&actions), vec!["factory-pass", "led 1"]);
        assert_eq!(m.state(), HandshakeState::SentinelSeen);
        assert_eq!(
            m.writes_done(),
            vec![HandshakeAction::Emit(HandshakeEvent::StateChanged(
                FactoryState::Active
            ))]
        );
        assert_eq!(m.state(), HandshakeState::Active);
    }

    #[test]
    fn blank_sentinel_never_matches_blank_line() {
        let mut m = HandshakeMachine::new(" ", "factory-pass", "led 1");
        m.opened();
        let actions = m.on_line("");
        assert!(writes(&actions).is_empty());
        assert_eq!(m.state(), HandshakeState::Listening);
    }

    #[test]
    fn sentinel_must_match_whole_line() {
        let mut m = machine();
        assert!(writes(&m.on_line("..")).is_empty());
        assert!(writes(&m.on_line("boot.")).is_empty());
        assert_eq!(writes(&m.on_line(".\r")).len(), 2);
    }

    #[test]
    fn active_ignores_repeated_sentinel_but_forwards_it() {
        let mut m = machine();
        m.on_line(".");
        m.writes_done();
        let actions = m.on_line(".");
        assert_eq!(
            actions,
            vec![HandshakeAction::Emit(HandshakeEvent::Data(".".into()))]
        );
    }

    #[test]
    fn closing_from_active_reports_inactive() {
        let mut m = machine();
        assert!(m.closed().is_empty());

        let mut m = machine();
        m.on_line(".");
        m.writes_done();
        assert_eq!(
            m.closed(),
            vec![HandshakeAction::Emit(HandshakeEvent::StateChanged(
                FactoryState::Inactive
            ))]
        );
        assert_eq!(m.state(), HandshakeState::Closed);
    }

    #[test]
    fn lines_before_open_do_not_trigger() {
        let mut m = HandshakeMachine::new(".", "p", "c");
        assert!(writes(&m.on_line(".")).is_empty());
        assert!(m.writes_done().is_empty());
    }
}
