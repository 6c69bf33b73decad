// blockduel_client — per-peer glue between the relay channel and the engine.
//
// A peer owns one `Channel` to the relay and one `SyncEngine` holding both
// boards. Commands received on the channel are drained on the caller's
// thread and dispatched to two handler surfaces:
//
// - `menu.rs`:  `MenuState`, the lobby view (slot, opponent presence and
//               readiness, current match settings).
// - `game.rs`:  `GameSide`, which applies game commands to the engine and
//               turns local engine events back into commands.
// - `peer.rs`:  `DuelPeer`, the update loop tying the two to the channel.
//
// Dependencies: `blockduel_protocol`, `blockduel_engine`, `blockduel_relay`
// (for `Channel` only).

pub mod game;
pub mod menu;
pub mod peer;

pub use game::{GameSide, MatchResult, OpponentStats};
pub use menu::MenuState;
pub use peer::{DuelPeer, PeerError};
