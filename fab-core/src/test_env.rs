//! Serializes tests that touch process-wide environment (`PATH`, `FAB_LOG_DIR`).

use once_cell::sync::Lazy;
use std::sync::{Mutex, MutexGuard};

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub struct EnvLockGuard(#[allow(dead_code)] MutexGuard<'static, ()>);

/// Restores (or removes) a variable when dropped.
pub struct EnvVarGuard {
    key: &'static str,
    original: Option<std::ffi::OsString>,
}

impl EnvVarGuard {
    pub fn set(key: &'static str, value: impl AsRef<std::ffi::OsStr>) -> Self {
        let original = std::env::var_os(key);
        std::env::set_var(key, value);
        Self { key, original }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        match self.original.take() {
            Some(original) => std::env::set_var(self.key, original),
            None => std::env::remove_var(self.key),
        }
    }
}

pub fn lock() -> EnvLockGuard {
    let guard = match ENV_LOCK.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    EnvLockGuard(guard)
}
