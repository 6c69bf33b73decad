// blockduel_engine — the per-peer simulation for Block Duel.
//
// Each peer runs one `SyncEngine` holding both boards of the match: its own
// (driven by the local player and gravity timer) and a mirror of the
// opponent's (driven only by relayed inputs). Because both peers seed each
// board's piece source identically and apply the same actions through the
// same lock/flash/clear state machine, the mirrors stay equal to the
// originals without any grid ever crossing the wire, except in a `Snapshot`.
//
// Module overview:
// - `board.rs`:        Grid, tetromino shapes, collision and clearing
//                      primitives, garbage insertion, `BoardGrid` conversion.
// - `piece_source.rs`: Seeded weighted lookahead queue of `PieceKind`s.
// - `attack.rs`:       Bounded garbage-row `AttackQueue` (capacity 10).
// - `config.rs`:       `EngineConfig` (timings, score table, piece weights)
//                      with JSON loading and validation.
// - `event.rs`:        `EngineEvent` output vocabulary and `StepResult`.
// - `engine.rs`:       `SyncEngine`, `EngineMode`, `Phase`, the state machine,
//                      pause handling and item hooks.
// - `snapshot.rs`:     Snapshot capture, restore and stream replay.
//
// The engine is single-threaded and clock-agnostic: callers pass `now_ms` in.
// It never touches a socket; `blockduel_client` feeds it commands drained
// from the network channel and turns its events back into commands.
//
// **Critical constraint: determinism.** Given the same seeds, config and
// ordered actions, two engines must produce identical boards. No wall-clock
// reads, no hash-map iteration, no floating point.

pub mod attack;
pub mod board;
pub mod config;
pub mod engine;
pub mod event;
pub mod piece_source;
pub mod snapshot;

pub use attack::{ATTACK_QUEUE_CAPACITY, AttackQueue};
pub use board::{
    ActivePiece, BOARD_HEIGHT, BOARD_WIDTH, Board, ClearSet, EMPTY_CELL, GARBAGE_CELL, PieceKind,
};
pub use config::{ConfigError, EngineConfig};
pub use engine::{ApplyOutcome, EngineMode, Origin, Phase, PlayerState, SyncEngine};
pub use event::{EngineEvent, EngineEventKind, StepResult};
pub use piece_source::PieceSource;
pub use snapshot::SnapshotError;
