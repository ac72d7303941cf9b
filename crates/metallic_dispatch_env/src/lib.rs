//! Process environment configuration for metallic-dispatch.
//!
//! Every tunable the dispatcher reads from the environment is described by a
//! [`TypedEnvVar`] so parsing, formatting and scoped overrides live in one place.

pub mod environment;

pub use environment::{
    EnvVar, Environment, dispatch::{DispatchEnvVar, LOG_LEVEL, PIPELINE_CACHE, QUEUE_CAPACITY}, guard::EnvVarGuard, value::{EnvVarError, EnvVarFormatError, EnvVarParseError, TypedEnvVar, TypedEnvVarGuard}
};
