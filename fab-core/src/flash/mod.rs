//! Flashing steps: what to run against the tool, how to run it, and how the
//! station config turns into an ordered plan.

mod plan;
mod runner;
mod step;

pub use plan::ProvisioningPlan;
pub use runner::{
    classify_flash, classify_one_shot, parse_mac, MacReading, StepRunner, MAC_MARKER,
    RESET_SENTINEL,
};
pub use step::{FlashStep, ImagePair, OperationKind, StepResult, StepStatus, Target};
