//! TypeState helpers for station configs (unvalidated -> validated).
//!
//! A provisioning plan can only be built from a [`ValidatedConfig`], so a missing
//! port, address or path is caught before any hardware is touched.

use fab_error::ProvisionResult;

pub trait ValidateConfig {
    fn validate_cfg(&self) -> ProvisionResult<()>;
}

#[derive(Debug, Clone)]
pub struct UnvalidatedConfig<T>(pub T);

#[derive(Debug, Clone)]
pub struct ValidatedConfig<T>(pub T);

impl<T> UnvalidatedConfig<T> {
    pub fn new(cfg: T) -> Self {
        Self(cfg)
    }
}

impl<T: ValidateConfig> UnvalidatedConfig<T> {
    pub fn validate(self) -> ProvisionResult<ValidatedConfig<T>> {
        self.0.validate_cfg()?;
        Ok(ValidatedConfig(self.0))
    }
}

impl<T> ValidatedConfig<T> {
    pub fn inner(&self) -> &T {
        &self.0
    }
}
