//! Variables read by the dispatcher runtime.

use tracing::Level;

use super::{
    EnvVar, value::{EnvVarFormatError, EnvVarParseError, TypedEnvVar}
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DispatchEnvVar {
    /// Minimum tracing level for the default subscriber.
    LogLevel,
    /// Dispatches accumulated per command buffer before an implicit flush.
    QueueCapacity,
    /// Whether compute pipelines are cached per kernel handle.
    PipelineCache,
}

impl DispatchEnvVar {
    pub const fn key(self) -> &'static str {
        match self {
            DispatchEnvVar::LogLevel => "METALLIC_LOG_LEVEL",
            DispatchEnvVar::QueueCapacity => "METALLIC_DISPATCH_QUEUE_CAPACITY",
            DispatchEnvVar::PipelineCache => "METALLIC_DISPATCH_PIPELINE_CACHE",
        }
    }

    pub const fn into_env(self) -> EnvVar {
        EnvVar::Dispatch(self)
    }
}

pub const LOG_LEVEL: TypedEnvVar<Level> = TypedEnvVar::new(DispatchEnvVar::LogLevel.into_env(), parse_log_level, format_display);

pub const QUEUE_CAPACITY: TypedEnvVar<usize> =
    TypedEnvVar::new(DispatchEnvVar::QueueCapacity.into_env(), parse_capacity, format_display);

pub const PIPELINE_CACHE: TypedEnvVar<bool> = TypedEnvVar::new(DispatchEnvVar::PipelineCache.into_env(), parse_bool, format_display);

fn parse_log_level(value: &str) -> Result<Level, EnvVarParseError> {
    value.trim().parse::<Level>().map_err(|_| EnvVarParseError::new("invalid tracing level"))
}

fn parse_capacity(value: &str) -> Result<usize, EnvVarParseError> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(EnvVarParseError::new("queue capacity must be at least 1")),
        Ok(capacity) => Ok(capacity),
        Err(err) => Err(EnvVarParseError::new(err.to_string())),
    }
}

fn parse_bool(value: &str) -> Result<bool, EnvVarParseError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EnvVarParseError::new("value is not a recognised boolean")),
    }
}

fn format_display<T: std::fmt::Display>(value: &T) -> Result<String, EnvVarFormatError> {
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rejects_zero_and_garbage() {
        assert_eq!(parse_capacity("16"), Ok(16));
        assert_eq!(parse_capacity(" 3 "), Ok(3));
        assert!(parse_capacity("0").is_err());
        assert!(parse_capacity("-1").is_err());
        assert!(parse_capacity("many").is_err());
    }

    #[test]
    fn bool_accepts_common_spellings() {
        for raw in ["1", "true", "YES", "On"] {
            assert_eq!(parse_bool(raw), Ok(true), "{raw}");
        }
        for raw in ["0", "false", "no", "OFF"] {
            assert_eq!(parse_bool(raw), Ok(false), "{raw}");
        }
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn log_level_is_case_insensitive() {
        assert_eq!(parse_log_level("debug"), Ok(Level::DEBUG));
        assert_eq!(parse_log_level("WARN"), Ok(Level::WARN));
        assert!(parse_log_level("loud").is_err());
    }
}
