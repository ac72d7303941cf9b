//! Runtime configuration for the dispatcher.

use metallic_dispatch_env::{EnvVarError, LOG_LEVEL, PIPELINE_CACHE, QUEUE_CAPACITY};
use tracing::Level;

use crate::loader::PipelinePolicy;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Errors that can occur while loading [`RuntimeConfig`] from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid log level '{value}' for {name}")]
    InvalidLogLevel { name: &'static str, value: String },
    #[error("invalid queue capacity '{value}' for {name}: expected an integer of at least 1")]
    InvalidQueueCapacity { name: &'static str, value: String },
    #[error("invalid boolean flag '{value}' for {name}")]
    InvalidBoolean { name: &'static str, value: String },
    #[error("failed to access dispatch environment: {source}")]
    EnvVar {
        #[from]
        source: EnvVarError,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Dispatches per command buffer before an implicit flush; also the
    /// queue's in-flight command buffer limit.
    pub queue_capacity: usize,
    pub pipeline_policy: PipelinePolicy,
    /// Default level for [`crate::logging::init_tracing`].
    pub log_level: Level,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pipeline_policy: PipelinePolicy::Cached,
            log_level: Level::INFO,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from the process environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_level = match LOG_LEVEL.get() {
            Ok(value) => value.unwrap_or(Level::INFO),
            Err(EnvVarError::Parse { value, .. }) => {
                return Err(ConfigError::InvalidLogLevel {
                    name: LOG_LEVEL.key(),
                    value,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let queue_capacity = match QUEUE_CAPACITY.get() {
            Ok(value) => value.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            Err(EnvVarError::Parse { value, .. }) => {
                return Err(ConfigError::InvalidQueueCapacity {
                    name: QUEUE_CAPACITY.key(),
                    value,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let pipeline_policy = match PIPELINE_CACHE.get() {
            Ok(Some(false)) => PipelinePolicy::RebuildEveryLaunch,
            Ok(_) => PipelinePolicy::Cached,
            Err(EnvVarError::Parse { value, .. }) => {
                return Err(ConfigError::InvalidBoolean {
                    name: PIPELINE_CACHE.key(),
                    value,
                });
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            queue_capacity,
            pipeline_policy,
            log_level,
        })
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    #[must_use]
    pub fn with_pipeline_policy(mut self, policy: PipelinePolicy) -> Self {
        self.pipeline_policy = policy;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }
}
