//! Factory console handshake.
//!
//! The device prints a sentinel line once its console is ready; the station
//! answers with the factory password and one diagnostic command. The session
//! runs on its own thread and is stopped through a shared running flag.

mod handshake;
mod machine;

pub use handshake::{
    HandshakeHandle, HandshakeOutcome, HandshakeSettings, SerialHandshake, StopToken,
};
pub use machine::{FactoryState, HandshakeAction, HandshakeEvent, HandshakeMachine, HandshakeState};
