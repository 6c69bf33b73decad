// Garbage-row attack queue.
//
// Each board owns an `AttackQueue` of patterns waiting to be pushed into its
// bottom rows. The engine drains it during the settle step, when no lock or
// flash is in progress and no piece is falling. Capacity is fixed at 10;
// pushing onto a full queue leaves it unchanged.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use blockduel_protocol::AttackPattern;

pub const ATTACK_QUEUE_CAPACITY: usize = 10;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackQueue {
    entries: VecDeque<AttackPattern>,
}

impl AttackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `pattern`. Returns `false`, and changes nothing, when full.
    pub fn push(&mut self, pattern: AttackPattern) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push_back(pattern);
        true
    }

    pub fn pop(&mut self) -> Option<AttackPattern> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= ATTACK_QUEUE_CAPACITY
    }

    /// Queued patterns, oldest first.
    pub fn to_vec(&self) -> Vec<AttackPattern> {
        self.entries.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// The pattern sent to the opponent for clearing `lines_cleared` rows, if
/// any. Single-line clears send nothing.
pub fn attack_for(lines_cleared: usize, hole: u8) -> Option<AttackPattern> {
    if lines_cleared <= 1 {
        return None;
    }
    Some(AttackPattern {
        lines: u8::try_from(lines_cleared).unwrap_or(u8::MAX),
        hole,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(lines: u8) -> AttackPattern {
        AttackPattern { lines, hole: 0 }
    }

    #[test]
    fn fifo_order() {
        let mut queue = AttackQueue::new();
        queue.push(pattern(2));
        queue.push(pattern(3));
        assert_eq!(queue.pop(), Some(pattern(2)));
        assert_eq!(queue.pop(), Some(pattern(3)));
    }

    #[test]
    fn push_on_full_queue_is_a_noop() {
        let mut queue = AttackQueue::new();
        for i in 0..ATTACK_QUEUE_CAPACITY {
            assert!(queue.push(pattern(i as u8 + 1)));
        }
        let before = queue.clone();
        assert!(!queue.push(pattern(99)));
        assert_eq!(queue, before);
        assert_eq!(queue.len(), ATTACK_QUEUE_CAPACITY);
    }

    #[test]
    fn pop_on_empty_queue_is_none() {
        let mut queue = AttackQueue::new();
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn only_multi_line_clears_attack() {
        assert_eq!(attack_for(0, 3), None);
        assert_eq!(attack_for(1, 3), None);
        assert_eq!(attack_for(2, 3), Some(AttackPattern { lines: 2, hole: 3 }));
        assert_eq!(attack_for(4, 9), Some(AttackPattern { lines: 4, hole: 9 }));
    }
}
