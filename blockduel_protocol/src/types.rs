// Core ID types for the duel protocol.
//
// Lightweight newtypes shared by `command.rs`, the relay's session and the
// engine. `PlayerNumber` is the relay-assigned slot (1 or 2, by arrival
// order); its field is private so a value outside {1, 2} cannot exist, and
// deserialization goes through `TryFrom<u8>` to keep it that way on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Player slot within a match: 1 or 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PlayerNumber(u8);

impl PlayerNumber {
    pub const ONE: Self = Self(1);
    pub const TWO: Self = Self(2);
    pub const BOTH: [Self; 2] = [Self::ONE, Self::TWO];

    pub fn new(n: u8) -> Option<Self> {
        match n {
            1 | 2 => Some(Self(n)),
            _ => None,
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// The opposing slot.
    pub fn other(self) -> Self {
        if self.0 == 1 { Self::TWO } else { Self::ONE }
    }

    /// Zero-based index for `[T; 2]` tables keyed by player.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::ONE),
            1 => Some(Self::TWO),
            _ => None,
        }
    }
}

impl TryFrom<u8> for PlayerNumber {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Self::new(n).ok_or_else(|| format!("player number must be 1 or 2, got {n}"))
    }
}

impl From<PlayerNumber> for u8 {
    fn from(p: PlayerNumber) -> u8 {
        p.0
    }
}

impl fmt::Display for PlayerNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Sender-local monotonic input sequence number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalSeq(pub u64);

impl LocalSeq {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Relay-assigned position of an input in the match-wide order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalSeq(pub u64);

impl GlobalSeq {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}
