use std::path::PathBuf;

use thiserror::Error;

/// Why a user-supplied target line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("empty target")]
    Empty,
    #[error("missing closing ']' in '{0}'; for IPv6 with ports use [fe80::1]:80,443")]
    UnclosedBracket(String),
    #[error("unexpected text after ']' in '{0}'")]
    TrailingText(String),
    #[error("invalid port list in '{0}'; use comma-separated numbers or ranges (1-65535)")]
    InvalidPorts(String),
    #[error("the hostname '{host}' is not valid: {reason}")]
    InvalidHost { host: String, reason: &'static str },
    #[error("duplicate of an earlier target for host '{0}'")]
    Duplicate(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not determine the user config directory")]
    PathUnavailable,
    #[error("unknown UDP service port {0} (known: 161, 427, 3702, 5353)")]
    UnknownService(u16),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("ping interval {0} ms is below the 50 ms minimum")]
    IntervalTooShort(u64),
}
