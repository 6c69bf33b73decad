// Seed-synchronized piece source.
//
// A lookahead queue backed by a `GameRng` and a weighted piece table. Both
// peers build one source per board from the seeds in `MatchSettings`, so
// "my board" and "the opponent's board as I simulate it" draw the same pieces
// in the same order, and only diverge through the actions applied to them.
//
// Refilling only ever appends to the back of the queue: a piece that has
// been peeked is already in the queue and will be the one drawn later.

use std::collections::VecDeque;

use blockduel_prng::GameRng;

use crate::board::PieceKind;

/// Pieces generated per refill.
const REFILL_BATCH: usize = 7;

#[derive(Clone, Debug)]
pub struct PieceSource {
    seed: u64,
    rng: GameRng,
    weights: [u32; 7],
    queue: VecDeque<PieceKind>,
    drawn: u64,
}

impl PieceSource {
    /// `weights` is indexed like `PieceKind::ALL`. An all-zero table falls
    /// back to uniform draws.
    pub fn new(seed: u64, weights: [u32; 7]) -> Self {
        Self {
            seed,
            rng: GameRng::new(seed),
            weights,
            queue: VecDeque::with_capacity(REFILL_BATCH * 2),
            drawn: 0,
        }
    }

    /// A source for `seed` that has already handed out `drawn` pieces.
    pub fn resume(seed: u64, weights: [u32; 7], drawn: u64) -> Self {
        let mut source = Self::new(seed, weights);
        for _ in 0..drawn {
            source.get_block();
        }
        source
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of pieces consumed so far.
    pub fn drawn(&self) -> u64 {
        self.drawn
    }

    /// The next piece `get_block` will return.
    pub fn peek(&mut self) -> PieceKind {
        self.peek_nth(0)
    }

    /// The piece `n` draws ahead, without consuming anything.
    pub fn peek_nth(&mut self, n: usize) -> PieceKind {
        while self.queue.len() <= n {
            self.refill();
        }
        self.queue[n]
    }

    /// Consume exactly one piece.
    pub fn get_block(&mut self) -> PieceKind {
        let kind = self.peek();
        self.queue.pop_front();
        self.drawn += 1;
        kind
    }

    fn refill(&mut self) {
        for _ in 0..REFILL_BATCH {
            let index = self
                .rng
                .pick_weighted(&self.weights)
                .unwrap_or_else(|| self.rng.range_usize(0, PieceKind::ALL.len()));
            self.queue.push_back(PieceKind::ALL[index]);
        }
    }
}
