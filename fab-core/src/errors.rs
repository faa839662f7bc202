pub use fab_error::{ProvisionError, ProvisionResult};

/// Result type alias for application-level station operations.
pub type Result<T> = anyhow::Result<T>;
