//! Error types for the round server

use lootrush_shared::model::RegionId;
use std::path::PathBuf;
use thiserror::Error;

use crate::chunks::ChunkKey;

/// Admin command rejected given the current round phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("a round is already running")]
    AlreadyRunning,

    #[error("no round is running")]
    AlreadyStopped,

    #[error("no countdown in progress")]
    NoCountdown,

    #[error("the round is not active")]
    NotActive,

    #[error("there is no current target item")]
    NoCurrentTarget,

    #[error("nobody has the player role")]
    NoParticipants,

    #[error("not allowed to change roles")]
    Unauthorized,

    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("no online targets matched")]
    NoTargets,
}

impl CommandError {
    /// Stable reason code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::AlreadyRunning => "already_running",
            CommandError::AlreadyStopped => "already_stopped",
            CommandError::NoCountdown => "no_countdown",
            CommandError::NotActive => "not_active",
            CommandError::NoCurrentTarget => "no_current_target",
            CommandError::NoParticipants => "no_participants",
            CommandError::Unauthorized => "unauthorized",
            CommandError::UnknownRole(_) => "unknown_role",
            CommandError::NoTargets => "no_targets",
        }
    }
}

/// Terrain access failure. Cloneable so that every waiter on a deduplicated
/// load receives the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerrainError {
    #[error("failed to load cell ({}, {}): {reason}", .key.cell_x, .key.cell_z)]
    LoadFailed { key: ChunkKey, reason: String },

    #[error("unknown region {0:?}")]
    UnknownRegion(RegionId),
}

/// Failure of a whole scatter operation. Everything recoverable is handled
/// inside the pipeline; reaching one of these aborts the round.
#[derive(Debug, Clone, Error)]
pub enum ScatterError {
    #[error("terrain error: {0}")]
    Terrain(#[from] TerrainError),

    #[error("scatter task crashed: {0}")]
    Crashed(String),
}

/// Startup configuration could not be assembled.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    Env { key: String, value: String },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse game config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid game config: {0}")]
    Invalid(String),
}
