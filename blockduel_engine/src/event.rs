// Engine output events.
//
// The engine takes actions and clock ticks in and emits `EngineEvent`s out.
// A peer turns some of them into network commands (`LocalInput` becomes an
// `Input`, `AttackSent` an `Attack`, a local `GameOver` a `GameOver`) and
// hands the rest to whatever renders the boards.
//
// Events are stamped with the engine clock (`at_ms`) and the board they
// concern, and are emitted in the order the engine processed them.

use serde::{Deserialize, Serialize};

use blockduel_protocol::{Action, AttackPattern, GlobalSeq, LocalSeq, PlayerNumber};

use crate::board::PieceKind;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub at_ms: u64,
    pub player: PlayerNumber,
    pub kind: EngineEventKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEventKind {
    /// A new piece entered the well.
    Spawned { piece: PieceKind },
    /// Gravity moved (or locked) a locally driven piece.
    AutoDescend,
    /// An action was applied to a locally driven board and took `local_seq`
    /// on its stream. This is what the owner sends to the other peer.
    LocalInput { local_seq: LocalSeq, action: Action },
    /// The falling piece settled. `rows`/`cols`/`cells` is the clear set.
    Locked {
        rows: Vec<usize>,
        cols: Vec<usize>,
        cells: usize,
    },
    FlashToggled { visible: bool, toggles: u32 },
    /// The clear set was removed.
    Cleared { rows: usize, score_gained: u64 },
    /// Force-down item resolved. `discarded` when the piece could not move.
    ForcedDown { discarded: bool },
    /// `player` earned an attack against its opponent.
    AttackSent { pattern: AttackPattern },
    /// `player` received an attack into its queue.
    AttackQueued { pattern: AttackPattern },
    /// A queued attack was pushed into `player`'s board.
    AttackApplied { pattern: AttackPattern },
    GameOver {
        score: u64,
        pending_attacks: Vec<AttackPattern>,
    },
    /// State was replaced from a snapshot and `replayed` later inputs from
    /// the board's stream were applied on top.
    Resynced {
        authoritative_seq: GlobalSeq,
        replayed: usize,
    },
}

/// Events accumulated since the last `SyncEngine::tick`.
#[derive(Debug, Default)]
pub struct StepResult {
    pub events: Vec<EngineEvent>,
}
