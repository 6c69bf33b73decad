// The duel command set.
//
// `Command` is the one closed enum every peer and the relay speak. Each
// variant carries exactly what the receiver needs to replay its effect on its
// own engine; none carries derived board state except `Snapshot`, whose whole
// purpose is a full-state transfer.
//
// `CommandKind` is a fieldless mirror of `Command` used as the key of the two
// handler-set lookups in `dispatch.rs`.
//
// Supporting structs (`MatchSettings`, `InputCommand`, `AttackPattern`,
// `BoardGrid`, `FallingPiece`, `BoardProgress`, `Snapshot`) are plain data.
// With the `cli` feature, `GameMode` doubles as a clap value enum. The engine converts its own board
// type to and from `BoardGrid`; this crate does not depend on the engine.

use serde::{Deserialize, Serialize};

use crate::types::{GlobalSeq, LocalSeq, PlayerNumber};

/// Rule set for a match. Only passed through by the core; item effects are
/// implemented elsewhere on top of the engine's hook points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum GameMode {
    #[default]
    Classic,
    Items,
}

/// Per-player view of a match, sent in `GameStart`.
///
/// The relay builds one of these per slot. Seeds are cross-assigned: one
/// player's `my_seed` is the other's `other_seed`, which lets each peer
/// generate both boards' piece sequences independently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSettings {
    pub player_number: PlayerNumber,
    pub my_seed: u64,
    pub other_seed: u64,
    pub mode: GameMode,
}

impl MatchSettings {
    /// The seed that drives `player`'s board.
    pub fn seed_for(&self, player: PlayerNumber) -> u64 {
        if player == self.player_number {
            self.my_seed
        } else {
            self.other_seed
        }
    }
}

/// A single player action on that player's own board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    MoveLeft,
    MoveRight,
    Rotate,
    SoftDrop,
    HardDrop,
    /// Gravity step. Emitted by the board owner's timer so the mirror on the
    /// other peer locks at the same point in the action stream.
    Descend,
    /// An opponent's attack entering this board's queue. Only the board's
    /// owner issues it, so the mirror queues the garbage at the same point
    /// in the stream as the original.
    QueueGarbage(AttackPattern),
}

/// A sequenced action, the unit of lockstep-like synchronization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCommand {
    pub player_number: PlayerNumber,
    pub local_seq: LocalSeq,
    /// Stamped by the relay exactly once when it forwards the input. `None`
    /// on the way in.
    pub global_seq: Option<GlobalSeq>,
    pub action: Action,
    pub timestamp_ms: u64,
}

/// A garbage-row block pushed into the bottom of a board: `lines` rows, each
/// full except for the `hole` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttackPattern {
    pub lines: u8,
    pub hole: u8,
}

/// Deep copy of a board's settled cells, row-major, row 0 at the top.
/// `0` is empty; any other value is an occupied cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardGrid {
    pub width: u8,
    pub height: u8,
    pub cells: Vec<u8>,
}

impl BoardGrid {
    pub fn empty(width: u8, height: u8) -> Self {
        Self {
            width,
            height,
            cells: vec![0; usize::from(width) * usize::from(height)],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        if row >= usize::from(self.height) || col >= usize::from(self.width) {
            return None;
        }
        self.cells.get(row * usize::from(self.width) + col).copied()
    }

    /// True when `cells` has exactly `width * height` entries.
    pub fn is_well_formed(&self) -> bool {
        self.cells.len() == usize::from(self.width) * usize::from(self.height)
    }
}

/// Placement of a board's falling piece. `kind` uses the same values the
/// piece leaves in a `BoardGrid` once it settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallingPiece {
    pub kind: u8,
    pub rotation: u8,
    pub row: i32,
    pub col: i32,
}

/// Per-board counters that, together with the grid and seed, let a peer
/// resume a board exactly where the snapshot was taken.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardProgress {
    pub lines: u32,
    pub level: u32,
    /// `None` while the board was resolving a lock; the next piece spawns.
    pub falling: Option<FallingPiece>,
    /// Pieces drawn from the board's seeded source so far.
    pub pieces_drawn: u64,
    /// Garbage holes drawn from the board's garbage stream so far.
    pub garbage_drawn: u64,
    /// Attacks waiting in the board's queue, oldest first.
    pub attacks: Vec<AttackPattern>,
    /// First `local_seq` of the owner's stream not reflected in the grid.
    /// Inputs from here on are replayed on top of the snapshot.
    pub stream_pos: LocalSeq,
}

/// Full match state for desync correction. Boards, scores and seeds are
/// indexed by `PlayerNumber::index()` (player 1 first), never by "mine" /
/// "theirs", so both peers read the same snapshot the same way.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub authoritative_seq: GlobalSeq,
    pub boards: [BoardGrid; 2],
    pub scores: [u64; 2],
    pub seeds: [u64; 2],
    pub progress: [BoardProgress; 2],
}

impl Snapshot {
    pub fn board(&self, player: PlayerNumber) -> &BoardGrid {
        &self.boards[player.index()]
    }

    pub fn score(&self, player: PlayerNumber) -> u64 {
        self.scores[player.index()]
    }

    pub fn seed(&self, player: PlayerNumber) -> u64 {
        self.seeds[player.index()]
    }

    pub fn progress(&self, player: PlayerNumber) -> &BoardProgress {
        &self.progress[player.index()]
    }
}

/// Every message exchanged between peers and the relay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Peer toggles its ready flag in the lobby.
    Ready { is_ready: bool },
    /// Match begins with these per-player settings.
    GameStart { settings: MatchSettings },
    /// Slot binding changed. `player_number` is the recipient's own slot.
    ConnectionChanged {
        player_number: PlayerNumber,
        opponent_connected: bool,
    },
    /// Lobby mirror of the opponent's ready flag.
    SyncReadyState { opponent_ready: bool },
    /// A sequenced action for one board.
    Input(InputCommand),
    /// `player_number` (the attacker) sends garbage to the opponent.
    Attack {
        player_number: PlayerNumber,
        pattern: AttackPattern,
    },
    /// `player_number` topped out. Attacks still queued against it ride along
    /// so result reporting can account for them.
    GameOver {
        player_number: PlayerNumber,
        score: u64,
        pending_attacks: Vec<AttackPattern>,
    },
    /// Final outcome for the recipient.
    GameResult { is_winner: bool, score: u64 },
    Pause { is_paused: bool },
    Ping { timestamp_ms: u64 },
    Pong { original_timestamp_ms: u64 },
    /// Periodic score report from a board owner.
    StateUpdate {
        player_number: PlayerNumber,
        score: u64,
        level: u32,
        lines: u32,
    },
    Snapshot(Snapshot),
    Disconnect { reason: String },
    /// Host asks for a rematch after a match ended.
    Restart,
    /// Ask the host for a `Snapshot`.
    RequestSync,
}

/// Fieldless tag of a `Command`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Ready,
    GameStart,
    ConnectionChanged,
    SyncReadyState,
    Input,
    Attack,
    GameOver,
    GameResult,
    Pause,
    Ping,
    Pong,
    StateUpdate,
    Snapshot,
    Disconnect,
    Restart,
    RequestSync,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Ready { .. } => CommandKind::Ready,
            Command::GameStart { .. } => CommandKind::GameStart,
            Command::ConnectionChanged { .. } => CommandKind::ConnectionChanged,
            Command::SyncReadyState { .. } => CommandKind::SyncReadyState,
            Command::Input(_) => CommandKind::Input,
            Command::Attack { .. } => CommandKind::Attack,
            Command::GameOver { .. } => CommandKind::GameOver,
            Command::GameResult { .. } => CommandKind::GameResult,
            Command::Pause { .. } => CommandKind::Pause,
            Command::Ping { .. } => CommandKind::Ping,
            Command::Pong { .. } => CommandKind::Pong,
            Command::StateUpdate { .. } => CommandKind::StateUpdate,
            Command::Snapshot(_) => CommandKind::Snapshot,
            Command::Disconnect { .. } => CommandKind::Disconnect,
            Command::Restart => CommandKind::Restart,
            Command::RequestSync => CommandKind::RequestSync,
        }
    }
}
