// Command encoding and decoding.
//
// Each frame payload is one JSON `Envelope { version, command }`. Decoding is
// two-stage: the envelope is parsed with the command left as a raw
// `serde_json::Value`, the version is checked, and only then is the command
// deserialized. This lets a receiver distinguish "wrong protocol version"
// from "a command tag this build does not know" from "garbage bytes", and log
// each differently while keeping the connection open.
//
// `write_command` / `read_command` compose this module with `framing.rs` for
// callers that own a stream directly (tests, the relay's writer threads).

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::Command;
use crate::framing::{read_message, write_message};

/// Bumped whenever the command set changes incompatibly.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Serialize)]
struct Envelope<'a> {
    version: u32,
    command: &'a Command,
}

#[derive(Deserialize)]
struct RawEnvelope {
    version: u32,
    command: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed payload: {0}")]
    Malformed(serde_json::Error),
    #[error("protocol version mismatch: got {got}, expected {expected}")]
    VersionMismatch { got: u32, expected: u32 },
    #[error("unrecognized command: {0}")]
    UnknownCommand(serde_json::Error),
    #[error("failed to encode command: {0}")]
    Encode(serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// True for errors that leave the byte stream intact: the frame was read
    /// in full but its contents were unusable. Receivers drop such frames and
    /// keep reading; anything else means the stream itself is gone.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ProtocolError::Io(_))
    }
}

/// Serialize a command into a frame payload.
pub fn encode(command: &Command) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(&Envelope {
        version: PROTOCOL_VERSION,
        command,
    })
    .map_err(ProtocolError::Encode)
}

/// Parse a frame payload back into a command.
pub fn decode(payload: &[u8]) -> Result<Command, ProtocolError> {
    let raw: RawEnvelope = serde_json::from_slice(payload).map_err(ProtocolError::Malformed)?;
    if raw.version != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            got: raw.version,
            expected: PROTOCOL_VERSION,
        });
    }
    serde_json::from_value(raw.command).map_err(ProtocolError::UnknownCommand)
}

/// Encode and frame a command onto `writer`.
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<(), ProtocolError> {
    let payload = encode(command)?;
    write_message(writer, &payload)?;
    Ok(())
}

/// Read one frame from `reader` and decode it.
///
/// A recoverable error (see `ProtocolError::is_recoverable`) means the frame
/// was consumed and the next call will read the following frame.
pub fn read_command<R: Read>(reader: &mut R) -> Result<Command, ProtocolError> {
    let payload = read_message(reader)?;
    decode(&payload)
}
