// blockduel_protocol — wire protocol for Block Duel peers and the relay.
//
// This crate defines the command set, its JSON envelope, the length-prefixed
// framing, and the two handler surfaces a receiver dispatches into. It is
// shared by the relay (`blockduel_relay`), the engine (`blockduel_engine`,
// which only borrows the data types) and peers (`blockduel_client`).
//
// Module overview:
// - `types.rs`:    Core ID types — `PlayerNumber`, `LocalSeq`, `GlobalSeq`.
// - `command.rs`:  The `Command` enum and its payload structs
//                  (`MatchSettings`, `InputCommand`, `AttackPattern`,
//                  `BoardGrid`, `Snapshot`).
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream:
//                  4-byte big-endian length prefix, then payload.
// - `codec.rs`:    Versioned JSON envelope, `encode`/`decode`, and the
//                  `ProtocolError` type.
// - `dispatch.rs`: `MenuHandler` / `GameHandler` traits, the two handler-set
//                  lookups, and `dispatch`.
//
// Design decisions:
// - **JSON serialization.** Messages are tiny and infrequent (one per player
//   action), so readability on the wire wins over compactness.
// - **Decode errors are per-frame.** A frame that parses as an envelope but
//   names an unknown command, or carries the wrong version, is reported as a
//   recoverable `ProtocolError`; the connection stays open.
// - **No async runtime.** Uses `std::io::Read`/`Write` for framing, compatible
//   with both blocking TCP streams and buffered wrappers.

pub mod codec;
pub mod command;
pub mod dispatch;
pub mod framing;
pub mod types;

pub use codec::{PROTOCOL_VERSION, ProtocolError, decode, encode, read_command, write_command};
pub use command::{
    Action, AttackPattern, BoardGrid, BoardProgress, Command, CommandKind, FallingPiece,
    GameMode, InputCommand, MatchSettings, Snapshot,
};
pub use dispatch::{
    Dispatched, GAME_COMMANDS, GameHandler, MENU_COMMANDS, MenuHandler, Surface, dispatch,
};
pub use framing::{MAX_MESSAGE_SIZE, read_message, write_message};
pub use types::{GlobalSeq, LocalSeq, PlayerNumber};

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Encode, frame, read back and decode a command.
    fn wire_roundtrip(command: &Command) {
        let payload = encode(command).unwrap();
        let mut wire = Vec::new();
        write_message(&mut wire, &payload).unwrap();

        let mut cursor = Cursor::new(&wire);
        let recovered = decode(&read_message(&mut cursor).unwrap()).unwrap();
        assert_eq!(&recovered, command);
    }

    #[test]
    fn roundtrip_ready() {
        wire_roundtrip(&Command::Ready { is_ready: true });
    }

    #[test]
    fn roundtrip_game_start() {
        wire_roundtrip(&Command::GameStart {
            settings: MatchSettings {
                player_number: PlayerNumber::ONE,
                my_seed: 0xDEAD_BEEF,
                other_seed: 0xCAFE_BABE,
                mode: GameMode::Items,
            },
        });
    }

    #[test]
    fn roundtrip_connection_changed() {
        wire_roundtrip(&Command::ConnectionChanged {
            player_number: PlayerNumber::TWO,
            opponent_connected: false,
        });
    }

    #[test]
    fn roundtrip_input_unstamped() {
        wire_roundtrip(&Command::Input(InputCommand {
            player_number: PlayerNumber::ONE,
            local_seq: LocalSeq(0),
            global_seq: None,
            action: Action::Descend,
            timestamp_ms: 16,
        }));
    }

    #[test]
    fn roundtrip_attack() {
        wire_roundtrip(&Command::Attack {
            player_number: PlayerNumber::ONE,
            pattern: AttackPattern { lines: 2, hole: 7 },
        });
    }

    #[test]
    fn roundtrip_state_update() {
        wire_roundtrip(&Command::StateUpdate {
            player_number: PlayerNumber::TWO,
            score: 1_200,
            level: 3,
            lines: 21,
        });
    }

    #[test]
    fn roundtrip_disconnect() {
        wire_roundtrip(&Command::Disconnect {
            reason: "peer closed".into(),
        });
    }

    #[test]
    fn roundtrip_ping_pong() {
        wire_roundtrip(&Command::Ping { timestamp_ms: 1 });
        wire_roundtrip(&Command::Pong {
            original_timestamp_ms: 1,
        });
    }

    #[test]
    fn roundtrip_game_result() {
        wire_roundtrip(&Command::GameResult {
            is_winner: true,
            score: 900,
        });
    }
}
