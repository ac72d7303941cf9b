//! Strongly typed environment descriptors.
//!
//! A [`TypedEnvVar`] pairs an [`EnvVar`] key with parse and format callbacks,
//! so callers read `Option<T>` instead of raw strings and can install scoped
//! typed overrides in tests.
//!
//! ```
//! use metallic_dispatch_env::QUEUE_CAPACITY;
//!
//! let guard = QUEUE_CAPACITY.set_guard(8).expect("format queue capacity");
//! assert_eq!(QUEUE_CAPACITY.get().expect("parse queue capacity"), Some(8));
//! drop(guard);
//! ```

use std::{fmt, marker::PhantomData, ops::Deref};

use super::{EnvVar, Environment, guard::EnvVarGuard};

#[derive(Debug, thiserror::Error)]
pub enum EnvVarError {
    #[error("failed to parse environment variable {name} from '{value}': {source}")]
    Parse {
        name: &'static str,
        value: String,
        source: EnvVarParseError,
    },
    #[error("failed to format environment variable {name}: {source}")]
    Format { name: &'static str, source: EnvVarFormatError },
}

/// Message returned by a parse callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVarParseError(String);

impl EnvVarParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for EnvVarParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for EnvVarParseError {}

/// Message returned by a format callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVarFormatError(String);

impl EnvVarFormatError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for EnvVarFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for EnvVarFormatError {}

pub type ParseFn<T> = fn(&str) -> Result<T, EnvVarParseError>;
pub type FormatFn<T> = fn(&T) -> Result<String, EnvVarFormatError>;

/// Descriptor for an environment variable holding a `T`.
#[derive(Clone, Copy)]
pub struct TypedEnvVar<T> {
    var: EnvVar,
    parse: ParseFn<T>,
    format: FormatFn<T>,
    _marker: PhantomData<T>,
}

impl<T> TypedEnvVar<T> {
    pub const fn new(var: EnvVar, parse: ParseFn<T>, format: FormatFn<T>) -> Self {
        Self {
            var,
            parse,
            format,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &'static str {
        self.var.key()
    }

    #[must_use]
    pub const fn var(&self) -> EnvVar {
        self.var
    }

    /// Read and parse the variable. `Ok(None)` when it is unset.
    pub fn get(&self) -> Result<Option<T>, EnvVarError> {
        let Some(raw) = Environment::get(self.var) else {
            return Ok(None);
        };
        (self.parse)(&raw).map(Some).map_err(|source| EnvVarError::Parse {
            name: self.key(),
            value: raw,
            source,
        })
    }

    /// Read the variable, falling back to `default` when unset.
    pub fn get_or(&self, default: T) -> Result<T, EnvVarError> {
        Ok(self.get()?.unwrap_or(default))
    }

    pub fn set(&self, value: T) -> Result<(), EnvVarError> {
        let formatted = self.format_value(&value)?;
        Environment::set(self.var, &formatted);
        Ok(())
    }

    pub fn unset(&self) {
        Environment::remove(self.var);
    }

    /// Override the variable until the returned guard is dropped.
    pub fn set_guard(&self, value: T) -> Result<TypedEnvVarGuard<T>, EnvVarError> {
        let formatted = self.format_value(&value)?;
        let inner = EnvVarGuard::set(self.var, &formatted);
        Ok(TypedEnvVarGuard { _inner: inner, value })
    }

    /// Unset the variable until the returned guard is dropped.
    pub fn unset_guard(&self) -> EnvVarGuard {
        EnvVarGuard::unset(self.var)
    }

    fn format_value(&self, value: &T) -> Result<String, EnvVarError> {
        (self.format)(value).map_err(|source| EnvVarError::Format { name: self.key(), source })
    }
}

/// Typed scoped override; dereferences to the value that was installed.
#[must_use = "the override is reverted as soon as the guard is dropped"]
pub struct TypedEnvVarGuard<T> {
    _inner: EnvVarGuard,
    value: T,
}

impl<T> Deref for TypedEnvVarGuard<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}
