//! Error taxonomy for construction-time and start-time failures.
//!
//! Steady-state failures (transient I/O hiccups, scorer/tracer failures, child death) are not
//! typed errors: they are logged via `tracing` and swallowed where they occur, so a long-running
//! campaign never dies mid-run. Only `ConfigError`, `StartFailure`, and `TimerError` ever leave
//! an API.

use std::io;
use std::path::PathBuf;

use crate::testcase::FuzzerIdentifier;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one of the mutational or assisted adapter must be enabled")]
    NoAdapterEnabled,

    #[error(
        "the target's argument vector contains the file-input placeholder but no --reads-file path was supplied"
    )]
    MissingInputFile,

    #[error("callback_time_interval and callback_fn must both be present or both be absent")]
    IncompleteCallback,

    #[error("selection_pressure must be in (0, 1], got {0}")]
    InvalidSelectionPressure(f64),
}

#[derive(Debug, thiserror::Error)]
pub enum StartFailure {
    #[error("failed to create directory {path}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write seed file {path}")]
    Seed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn the {identifier} engine process")]
    Spawn {
        identifier: FuzzerIdentifier,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    #[error("timer is currently firing; cannot be armed re-entrantly")]
    AlreadyFiring,

    #[error("timer has been cancelled and is terminal; it cannot be restarted")]
    Cancelled,
}
