use std::time;

use thiserror::Error;

/// Configuration that parsed but cannot be run with.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Why a probe reported the target as unreachable. Only ever logged.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to run ping: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("probe exceeded its {0:?} budget")]
    Timeout(time::Duration),
    #[error("no reply from target (exit status {0:?})")]
    NoReply(Option<i32>),
}
