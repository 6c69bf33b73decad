// blockduel_relay — the two-player relay and the client side of its socket.
//
// The relay is a thin message broker: it accepts two TCP connections, assigns
// them player slots, runs the ready/start/restart/end-of-match handshake,
// stamps inputs with a global sequence number and forwards everything else to
// the other peer. It never runs the game; both peers simulate both boards.
//
// Module overview:
// - `queue.rs`:    `OutboundQueue`, the bounded drop-oldest FIFO between a
//                  producer and a socket writer thread.
// - `session.rs`:  Slot table, ready flags, match phase and command routing.
//                  The core data structure that `server.rs` drives.
// - `server.rs`:   TCP listener, reader/writer threads per connection, and
//                  the main event loop funnelling events into `Session`.
// - `channel.rs`:  `Channel`, the peer's connection to the relay: sender,
//                  receiver and ping threads plus a pollable inbox.
// - `error.rs`:    `ChannelError`, `AdmitError`, `ConfigError`.
//
// Dependencies: `blockduel_protocol` (command set and framing). No
// dependency on the engine.
//
// The relay can run as a standalone binary (`main.rs`) or be embedded in a
// process via the library API (`start_relay`), which is how the integration
// tests drive it.

pub mod channel;
pub mod error;
pub mod queue;
pub mod server;
pub mod session;

pub use channel::{Channel, ChannelConfig, now_ms};
pub use error::{AdmitError, ChannelError, ConfigError};
pub use queue::{OutboundQueue, Pushed};
pub use server::{RelayConfig, RelayHandle, start_relay};
pub use session::{ConnectionId, MatchPhase, Session};
