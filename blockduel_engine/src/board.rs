// Board geometry and collision.
//
// A 10x20 grid of settled cells plus the seven tetromino shapes. Row 0 is the
// top of the well, row 19 the bottom. Cell values: 0 empty, 1-7 a settled
// piece of that `PieceKind` (`kind.cell_value()`), 8 garbage.
//
// The engine consumes exactly these primitives: `fits`, `try_move`,
// `try_rotate`, `hard_drop`, `merge`, `full_rows`, `full_columns`,
// `clear_row`, `clear_column`, `clear` (a whole `ClearSet` at once) and
// `push_garbage`. Nothing here knows about players, timing or the network.
//
// Rotation is a clockwise quarter turn inside the piece's bounding box
// (`(r, c) -> (c, n - 1 - r)`), tried in place and then with horizontal
// kicks of 1 and 2 columns either way. There is no SRS kick table; both peers
// run this same code so only determinism matters.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use blockduel_protocol::BoardGrid;

pub const BOARD_WIDTH: usize = 10;
pub const BOARD_HEIGHT: usize = 20;
pub const EMPTY_CELL: u8 = 0;
pub const GARBAGE_CELL: u8 = 8;

const ROTATION_KICKS: [i32; 5] = [0, -1, 1, -2, 2];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    I,
    O,
    T,
    S,
    Z,
    J,
    L,
}

impl PieceKind {
    pub const ALL: [PieceKind; 7] = [
        PieceKind::I,
        PieceKind::O,
        PieceKind::T,
        PieceKind::S,
        PieceKind::Z,
        PieceKind::J,
        PieceKind::L,
    ];

    /// Value written into the grid when a piece of this kind settles.
    pub fn cell_value(self) -> u8 {
        match self {
            PieceKind::I => 1,
            PieceKind::O => 2,
            PieceKind::T => 3,
            PieceKind::S => 4,
            PieceKind::Z => 5,
            PieceKind::J => 6,
            PieceKind::L => 7,
        }
    }

    /// Inverse of `cell_value`.
    pub fn from_cell_value(value: u8) -> Option<PieceKind> {
        PieceKind::ALL.into_iter().find(|kind| kind.cell_value() == value)
    }

    /// Bounding box size and the four occupied `(row, col)` offsets at
    /// rotation 0.
    fn shape(self) -> (i32, [(i32, i32); 4]) {
        match self {
            PieceKind::I => (4, [(1, 0), (1, 1), (1, 2), (1, 3)]),
            PieceKind::O => (2, [(0, 0), (0, 1), (1, 0), (1, 1)]),
            PieceKind::T => (3, [(0, 1), (1, 0), (1, 1), (1, 2)]),
            PieceKind::S => (3, [(0, 1), (0, 2), (1, 0), (1, 1)]),
            PieceKind::Z => (3, [(0, 0), (0, 1), (1, 1), (1, 2)]),
            PieceKind::J => (3, [(0, 0), (1, 0), (1, 1), (1, 2)]),
            PieceKind::L => (3, [(0, 2), (1, 0), (1, 1), (1, 2)]),
        }
    }
}

/// The falling piece: kind, quarter-turn count, and the board position of
/// its bounding box's top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePiece {
    pub kind: PieceKind,
    pub rotation: u8,
    pub row: i32,
    pub col: i32,
}

impl ActivePiece {
    /// A fresh piece at the top of the well, horizontally centred.
    pub fn spawn(kind: PieceKind) -> Self {
        let (size, _) = kind.shape();
        Self {
            kind,
            rotation: 0,
            row: 0,
            col: (BOARD_WIDTH as i32 - size) / 2,
        }
    }

    /// Absolute `(row, col)` of the four occupied cells.
    pub fn cells(&self) -> [(i32, i32); 4] {
        let (size, mut offsets) = self.kind.shape();
        for _ in 0..self.rotation % 4 {
            for offset in &mut offsets {
                *offset = (offset.1, size - 1 - offset.0);
            }
        }
        offsets.map(|(r, c)| (self.row + r, self.col + c))
    }

    fn shifted(self, drow: i32, dcol: i32) -> Self {
        Self {
            row: self.row + drow,
            col: self.col + dcol,
            ..self
        }
    }
}

/// Rows, columns and single cells selected for clearing after a lock.
///
/// Ordered sets so iteration (and therefore clearing) is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearSet {
    pub rows: BTreeSet<usize>,
    pub cols: BTreeSet<usize>,
    pub cells: BTreeSet<(usize, usize)>,
}

impl ClearSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.cols.is_empty() && self.cells.is_empty()
    }

    pub fn union_with(&mut self, other: &ClearSet) {
        self.rows.extend(other.rows.iter().copied());
        self.cols.extend(other.cols.iter().copied());
        self.cells.extend(other.cells.iter().copied());
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.cols.clear();
        self.cells.clear();
    }
}

/// Settled cells of one well.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    cells: Vec<u8>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    pub fn new() -> Self {
        Self {
            cells: vec![EMPTY_CELL; BOARD_WIDTH * BOARD_HEIGHT],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.cells[row * BOARD_WIDTH + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: u8) {
        self.cells[row * BOARD_WIDTH + col] = value;
    }

    /// Fill `row` with `value` everywhere except the listed columns.
    pub fn fill_row_except(&mut self, row: usize, value: u8, gaps: &[usize]) {
        for col in 0..BOARD_WIDTH {
            let v = if gaps.contains(&col) { EMPTY_CELL } else { value };
            self.set(row, col, v);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|&c| c == EMPTY_CELL)
    }

    fn occupied(&self, row: i32, col: i32) -> bool {
        if row < 0 || col < 0 || row >= BOARD_HEIGHT as i32 || col >= BOARD_WIDTH as i32 {
            return true;
        }
        self.get(row as usize, col as usize) != EMPTY_CELL
    }

    /// True when every cell of `piece` is inside the well and empty.
    pub fn fits(&self, piece: &ActivePiece) -> bool {
        piece.cells().iter().all(|&(r, c)| !self.occupied(r, c))
    }

    /// Shift `piece` by `(drow, dcol)` if the target position fits.
    pub fn try_move(&self, piece: &mut ActivePiece, drow: i32, dcol: i32) -> bool {
        let moved = piece.shifted(drow, dcol);
        if self.fits(&moved) {
            *piece = moved;
            true
        } else {
            false
        }
    }

    /// Rotate `piece` a quarter turn clockwise, trying each horizontal kick.
    pub fn try_rotate(&self, piece: &mut ActivePiece) -> bool {
        let turned = ActivePiece {
            rotation: (piece.rotation + 1) % 4,
            ..*piece
        };
        for kick in ROTATION_KICKS {
            let candidate = turned.shifted(0, kick);
            if self.fits(&candidate) {
                *piece = candidate;
                return true;
            }
        }
        false
    }

    /// Drop `piece` as far as it goes. Returns the number of rows it fell.
    pub fn hard_drop(&self, piece: &mut ActivePiece) -> u32 {
        let mut dropped = 0;
        while self.try_move(piece, 1, 0) {
            dropped += 1;
        }
        dropped
    }

    /// Write `piece` into the grid. Cells outside the well are skipped.
    pub fn merge(&mut self, piece: &ActivePiece) {
        let value = piece.kind.cell_value();
        for (r, c) in piece.cells() {
            if (0..BOARD_HEIGHT as i32).contains(&r) && (0..BOARD_WIDTH as i32).contains(&c) {
                self.set(r as usize, c as usize, value);
            }
        }
    }

    pub fn full_rows(&self) -> Vec<usize> {
        (0..BOARD_HEIGHT)
            .filter(|&r| (0..BOARD_WIDTH).all(|c| self.get(r, c) != EMPTY_CELL))
            .collect()
    }

    pub fn full_columns(&self) -> Vec<usize> {
        (0..BOARD_WIDTH)
            .filter(|&c| (0..BOARD_HEIGHT).all(|r| self.get(r, c) != EMPTY_CELL))
            .collect()
    }

    /// Remove `row`; everything above it falls by one and row 0 becomes empty.
    pub fn clear_row(&mut self, row: usize) {
        let start = row * BOARD_WIDTH;
        self.cells.drain(start..start + BOARD_WIDTH);
        self.cells
            .splice(0..0, std::iter::repeat_n(EMPTY_CELL, BOARD_WIDTH));
    }

    /// Empty `col` in place. Nothing collapses sideways.
    pub fn clear_column(&mut self, col: usize) {
        for row in 0..BOARD_HEIGHT {
            self.set(row, col, EMPTY_CELL);
        }
    }

    /// Apply a whole clear set: single cells and columns are emptied in
    /// place first, then rows are removed top to bottom so each removal only
    /// shifts rows that are still above the next one. Returns the number of
    /// rows removed. An empty set changes nothing.
    pub fn clear(&mut self, set: &ClearSet) -> usize {
        for &(row, col) in &set.cells {
            if row < BOARD_HEIGHT && col < BOARD_WIDTH {
                self.set(row, col, EMPTY_CELL);
            }
        }
        for &col in set.cols.iter().filter(|&&c| c < BOARD_WIDTH) {
            self.clear_column(col);
        }
        let mut removed = 0;
        for &row in set.rows.iter().filter(|&&r| r < BOARD_HEIGHT) {
            self.clear_row(row);
            removed += 1;
        }
        removed
    }

    /// Push `lines` garbage rows in from the bottom, each full except for the
    /// `hole` column. Returns `false` if occupied cells were pushed out of the
    /// top of the well.
    pub fn push_garbage(&mut self, lines: u8, hole: u8) -> bool {
        let lines = usize::from(lines).min(BOARD_HEIGHT);
        let hole = usize::from(hole) % BOARD_WIDTH;
        let overflow = self.cells[..lines * BOARD_WIDTH]
            .iter()
            .any(|&c| c != EMPTY_CELL);
        self.cells.drain(..lines * BOARD_WIDTH);
        for _ in 0..lines {
            self.cells.extend((0..BOARD_WIDTH).map(|c| {
                if c == hole { EMPTY_CELL } else { GARBAGE_CELL }
            }));
        }
        !overflow
    }

    pub fn to_grid(&self) -> BoardGrid {
        BoardGrid {
            width: BOARD_WIDTH as u8,
            height: BOARD_HEIGHT as u8,
            cells: self.cells.clone(),
        }
    }

    /// Rebuild a board from a grid of the same dimensions.
    pub fn from_grid(grid: &BoardGrid) -> Option<Self> {
        if usize::from(grid.width) != BOARD_WIDTH
            || usize::from(grid.height) != BOARD_HEIGHT
            || !grid.is_well_formed()
        {
            return None;
        }
        Some(Self {
            cells: grid.cells.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_positions_fit_on_empty_board() {
        let board = Board::new();
        for kind in PieceKind::ALL {
            assert!(board.fits(&ActivePiece::spawn(kind)), "{kind:?} does not fit");
        }
    }

    #[test]
    fn four_rotations_return_to_start() {
        for kind in PieceKind::ALL {
            let piece = ActivePiece::spawn(kind);
            let mut cells = piece.cells();
            let turned = ActivePiece {
                rotation: 4,
                ..piece
            };
            let mut turned_cells = turned.cells();
            cells.sort();
            turned_cells.sort();
            assert_eq!(cells, turned_cells);
        }
    }

    #[test]
    fn vertical_i_occupies_one_column() {
        let piece = ActivePiece {
            kind: PieceKind::I,
            rotation: 1,
            row: 0,
            col: -2,
        };
        let cells = piece.cells();
        assert!(cells.iter().all(|&(_, c)| c == 0));
        let rows: Vec<i32> = cells.iter().map(|&(r, _)| r).collect();
        assert_eq!(rows, vec![0, 1, 2, 3]);
    }

    #[test]
    fn walls_block_movement() {
        let board = Board::new();
        let mut piece = ActivePiece::spawn(PieceKind::O);
        let mut moves = 0;
        while board.try_move(&mut piece, 0, -1) {
            moves += 1;
        }
        assert_eq!(moves, 4);
        assert_eq!(piece.col, 0);
    }

    #[test]
    fn rotation_kicks_off_the_wall() {
        let board = Board::new();
        let mut piece = ActivePiece {
            kind: PieceKind::I,
            rotation: 1,
            row: 0,
            col: -2,
        };
        assert!(board.fits(&piece));
        assert!(board.try_rotate(&mut piece));
        assert!(board.fits(&piece));
    }

    #[test]
    fn hard_drop_lands_on_floor() {
        let board = Board::new();
        let mut piece = ActivePiece::spawn(PieceKind::O);
        assert_eq!(board.hard_drop(&mut piece), 18);
        assert!(piece.cells().iter().all(|&(r, _)| r >= 18));
    }

    #[test]
    fn clear_row_collapses_rows_above() {
        let mut board = Board::new();
        board.fill_row_except(19, 3, &[]);
        board.set(18, 4, 5);
        board.set(17, 2, 6);
        board.clear_row(19);
        assert_eq!(board.get(19, 4), 5);
        assert_eq!(board.get(18, 2), 6);
        assert_eq!(board.get(0, 0), EMPTY_CELL);
        assert!(board.full_rows().is_empty());
    }

    #[test]
    fn clear_set_removes_multiple_rows_in_order() {
        let mut board = Board::new();
        board.fill_row_except(19, 1, &[]);
        board.fill_row_except(17, 1, &[]);
        board.set(18, 0, 4);
        board.set(16, 9, 7);

        let mut set = ClearSet::default();
        set.rows.extend(board.full_rows());
        assert_eq!(board.clear(&set), 2);
        assert_eq!(board.get(19, 0), 4);
        assert_eq!(board.get(18, 9), 7);
        assert_eq!(board.get(17, 9), EMPTY_CELL);
    }

    #[test]
    fn clearing_an_empty_set_is_a_noop() {
        let mut board = Board::new();
        board.fill_row_except(19, 2, &[5]);
        let before = board.clone();
        assert_eq!(board.clear(&ClearSet::default()), 0);
        assert_eq!(board, before);
    }

    #[test]
    fn column_clear_does_not_collapse() {
        let mut board = Board::new();
        for row in 0..BOARD_HEIGHT {
            board.set(row, 3, 1);
        }
        board.set(19, 4, 2);
        assert_eq!(board.full_columns(), vec![3]);

        let mut set = ClearSet::default();
        set.cols.insert(3);
        assert_eq!(board.clear(&set), 0);
        assert!((0..BOARD_HEIGHT).all(|r| board.get(r, 3) == EMPTY_CELL));
        assert_eq!(board.get(19, 4), 2);
    }

    #[test]
    fn garbage_rows_enter_from_the_bottom() {
        let mut board = Board::new();
        board.set(19, 0, 3);
        assert!(board.push_garbage(2, 4));
        assert_eq!(board.get(17, 0), 3);
        for row in [18, 19] {
            for col in 0..BOARD_WIDTH {
                let expected = if col == 4 { EMPTY_CELL } else { GARBAGE_CELL };
                assert_eq!(board.get(row, col), expected);
            }
        }
    }

    #[test]
    fn garbage_overflow_is_reported() {
        let mut board = Board::new();
        board.set(0, 5, 1);
        assert!(!board.push_garbage(1, 0));
    }

    #[test]
    fn grid_conversion_preserves_cells() {
        let mut board = Board::new();
        board.set(12, 7, GARBAGE_CELL);
        let grid = board.to_grid();
        assert_eq!(grid.get(12, 7), Some(GARBAGE_CELL));
        assert_eq!(Board::from_grid(&grid), Some(board));
        assert_eq!(Board::from_grid(&BoardGrid::empty(4, 4)), None);
    }
}
