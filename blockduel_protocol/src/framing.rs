// Length-delimited message framing over TCP.
//
// Wire format: a 4-byte big-endian length prefix followed by the payload.
// `write_message` and `read_message` operate on raw bytes; `codec.rs` turns
// commands into payloads, keeping this module format-agnostic.
//
// `MAX_MESSAGE_SIZE` (1 MiB) protects against unbounded allocation from a
// malformed length prefix. A `Snapshot` with two 10x20 boards is a few KB.

use std::io::{self, Read, Write};

/// Largest payload either side will write or accept.
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

fn too_large(kind: io::ErrorKind, len: usize) -> io::Error {
    io::Error::new(
        kind,
        format!("frame of {len} bytes exceeds {MAX_MESSAGE_SIZE}"),
    )
}

/// Write one frame and flush. Nothing is written if `payload` is too large.
pub fn write_message<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_MESSAGE_SIZE)
        .ok_or_else(|| too_large(io::ErrorKind::InvalidInput, payload.len()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Read one frame's payload.
///
/// A stream that ends mid-frame gives `UnexpectedEof`; an oversized length
/// prefix gives `InvalidData` before anything is allocated.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_MESSAGE_SIZE as usize {
        return Err(too_large(io::ErrorKind::InvalidData, len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_is_prefix_plus_payload() {
        let original = b"ready";
        let mut buf = Vec::new();
        write_message(&mut buf, original).unwrap();
        assert_eq!(buf.len(), 4 + original.len());

        let mut cursor = Cursor::new(&buf);
        assert_eq!(read_message(&mut cursor).unwrap(), original);
    }

    #[test]
    fn rejects_oversized_write() {
        let big = vec![0u8; MAX_MESSAGE_SIZE as usize + 1];
        let mut buf = Vec::new();
        let err = write_message(&mut buf, &big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty(), "nothing may be written for a rejected frame");
    }

    #[test]
    fn rejects_oversized_read() {
        let fake_len = (MAX_MESSAGE_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(fake_len.to_vec());
        let err = read_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_payload_is_unexpected_eof() {
        let mut wire = 10u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(wire);
        let err = read_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn back_to_back_frames_read_in_order() {
        let messages: Vec<&[u8]> = vec![b"first", b"", b"third"];
        let mut buf = Vec::new();
        for msg in &messages {
            write_message(&mut buf, msg).unwrap();
        }

        let mut cursor = Cursor::new(&buf);
        for expected in &messages {
            assert_eq!(read_message(&mut cursor).unwrap(), *expected);
        }
    }
}
