//! Error taxonomy for the race.
//!
//! Track and deployment errors are fatal before seeding. Store errors are
//! retryable inside the worker loop. Malformed timing entries are not errors at
//! all; they surface in the report (see `race::report`).

use std::path::PathBuf;
use thiserror::Error;

/// Problems with the track definition. Always fatal.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("failed to access track file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse track file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize track definition for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("track definition contains no tracks")]
    NoTracks,
    #[error("track {0} has no start-goal segment")]
    MissingStartGoal(String),
    #[error("track {track} has {count} start-goal segments, expected exactly one")]
    MultipleStartGoal { track: String, count: usize },
    #[error("segment id {0} is defined more than once")]
    DuplicateSegment(String),
    #[error("segment {0} has no successors")]
    EmptySuccessors(String),
    #[error("segment {from} points at unknown segment {to}")]
    UnknownSuccessor { from: String, to: String },
    #[error("segment {segment} of track {track} is not reachable from its start-goal segment")]
    Unreachable { track: String, segment: String },
    #[error("segment {segment} of track {track} cannot reach its start-goal segment")]
    NoReturn { track: String, segment: String },
    #[error("invalid generator parameters: {0}")]
    Generator(String),
}

/// Failures talking to the shared store. Workers retry these.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("value at {key} is not valid: {value}")]
    InvalidValue { key: String, value: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the deployment service.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("worker {0} failed: {1}")]
    Worker(String, String),
}

#[derive(Debug, Error)]
pub enum RaceError {
    #[error(transparent)]
    Track(#[from] TrackError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error("failed to write results to {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cancelled")]
    Cancelled,
}
