//! Fab station workflow orchestration.
//!
//! This crate composes the leaf components from `fab-core` into one
//! provisioning run per unit: two independent tracks (one per chip) feeding a
//! single report.

pub mod sequencer;
pub mod track;

pub use sequencer::{provision_unit, Sequencer};
pub use track::{StageDefinition, TrackOutcome, TrackRunner};
