//! Serialised access to the process environment.

pub mod dispatch;
pub mod guard;
pub mod value;

use std::sync::{Mutex, MutexGuard, PoisonError};

use dispatch::DispatchEnvVar;

/// Environment variable identifiers understood by the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvVar {
    Dispatch(DispatchEnvVar),
}

impl From<DispatchEnvVar> for EnvVar {
    fn from(value: DispatchEnvVar) -> Self {
        Self::Dispatch(value)
    }
}

impl EnvVar {
    /// Canonical key as it appears in the process environment.
    pub const fn key(self) -> &'static str {
        match self {
            EnvVar::Dispatch(inner) => inner.key(),
        }
    }
}

static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Facade over `std::env` that serialises every mutation behind one mutex.
pub struct Environment;

impl Environment {
    /// Acquire the global environment mutex.
    ///
    /// A poisoned mutex is recovered: the guarded data is `()`, so there is no
    /// state a panicking holder could have left half-written.
    pub fn lock() -> MutexGuard<'static, ()> {
        ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the raw value, if present and valid UTF-8.
    pub fn get(var: impl Into<EnvVar>) -> Option<String> {
        std::env::var(var.into().key()).ok()
    }

    pub fn set(var: impl Into<EnvVar>, value: &str) {
        let mut guard = Self::lock();
        Self::set_locked(var.into(), value, &mut guard);
    }

    pub fn remove(var: impl Into<EnvVar>) {
        let mut guard = Self::lock();
        Self::remove_locked(var.into(), &mut guard);
    }

    pub(crate) fn set_locked(var: EnvVar, value: &str, _guard: &mut MutexGuard<'static, ()>) {
        // SAFETY: holding the environment mutex serialises all writers that go
        // through this facade.
        unsafe { std::env::set_var(var.key(), value) };
    }

    pub(crate) fn remove_locked(var: EnvVar, _guard: &mut MutexGuard<'static, ()>) {
        // SAFETY: see `set_locked`.
        unsafe { std::env::remove_var(var.key()) };
    }
}
