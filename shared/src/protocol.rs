use serde::{Deserialize, Serialize};

use crate::geometry::BlockPos;
use crate::model::{ItemId, PlayerId, Role, RoundPhase};

/// Protocol version - increment when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

// === Notices ===

/// A player-facing event. Clients localize and render these; the server never
/// produces display text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    RoundStarting { target: ItemId },
    SpectatingRound,
    LoadingChunks,
    PlayersTeleported { countdown: u32 },
    StartingIn { seconds: u32 },
    RoundStarted { target: ItemId },
    TargetSkipped { target: ItemId },
    Teleported { location: BlockPos },
    LivesRemaining { lives: u32, max: u32 },
    OutOfLives,
    PlayerEliminated { player: PlayerId, name: String },
    LastPlayerStanding { player: PlayerId, name: String },
    PlayerWon { player: PlayerId, name: String, target: ItemId },
    ReturningToSpawn,
    GameStopped,
    GameCancelled,
    ScatterFailed { reason: String },
    SwapWarning { seconds: u32 },
    Swapping,
    RoleChanged { role: Role, by_admin: bool },
}

// === Progress ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wave {
    Near,
    Far,
}

/// Why a placement attempt was thrown away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    TooClose { x: i32, z: i32 },
    NoFloor { x: i32, z: i32 },
    UnsafeBlocks {
        at: BlockPos,
        floor: String,
        feet: String,
        head: String,
    },
    ChunkLoadFailed { x: i32, z: i32, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ProgressLabel {
    Searching { player: PlayerId, name: String },
    Rejected {
        player: PlayerId,
        attempt: u32,
        #[serde(flatten)]
        rejection: Rejection,
    },
    Placed {
        player: PlayerId,
        location: BlockPos,
        fallback: bool,
    },
    LoadingChunks { wave: Wave },
    ChunkFailed { wave: Wave, cell_x: i32, cell_z: i32 },
    Complete,
    Stopped,
}

/// Scatter progress as `(done, total, label)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub label: ProgressLabel,
}

impl Progress {
    pub fn new(done: usize, total: usize, label: ProgressLabel) -> Self {
        Self { done, total, label }
    }

    /// Completion in 0..=1. An empty job counts as complete.
    pub fn ratio(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        (self.done as f32 / self.total as f32).clamp(0.0, 1.0)
    }
}

// === Server -> Client ===

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    Welcome(WelcomeMsg),
    Notice { notice: Notice },
    Progress(ProgressMsg),
    Phase { phase: RoundPhase },
    Status(StatusMsg),
    CommandResult(CommandResultMsg),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeMsg {
    pub protocol_version: u32,
    pub self_id: PlayerId,
    pub phase: RoundPhase,
    pub operator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMsg {
    pub ratio: f32,
    #[serde(flatten)]
    pub progress: Progress,
}

impl From<Progress> for ProgressMsg {
    fn from(progress: Progress) -> Self {
        Self {
            ratio: round4(progress.ratio() as f64) as f32,
            progress,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMsg {
    pub phase: RoundPhase,
    pub target: Option<ItemId>,
    /// Elapsed active time as `mm:ss`, present while Active
    pub elapsed: Option<String>,
    pub countdown_remaining: Option<u32>,
    pub players_alive: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResultMsg {
    pub command: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

// === Client -> Server ===

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    Start,
    Stop,
    Cancel,
    Skip,
    Status,
    /// Assign a role. An empty target list means the sender.
    Role {
        role: String,
        #[serde(default)]
        targets: Vec<PlayerId>,
    },
    /// The sender picked up an item.
    Pickup { item: ItemId },
    /// The sender died.
    Die,
}

// === Conversion helpers ===

/// Round to 4 decimal places
#[inline]
pub fn round4(v: f64) -> f64 {
    (v * 10000.0).round() / 10000.0
}
