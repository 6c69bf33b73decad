// Snapshot capture and reconciliation.
//
// A `Snapshot` is the one command that carries full board state. The host
// (player 1) captures it on `RequestSync`; the relay broadcasts it so both
// peers, the host included, apply the same state.
//
// Reconciliation is replace-then-replay. Each board is restored exactly as
// captured: grid, falling piece, score, lines, level, the piece source and
// garbage stream fast-forwarded to their captured draw counts, and the
// attack queue. Flashes, item marks and deferred inputs are dropped. Then
// every input on the board's stream from the captured `stream_pos` on is
// re-applied in order. Those are inputs the capturing peer had not yet
// seen: local actions the host made while the snapshot was on its way back,
// and relayed inputs still in flight. A later relayed input is applied only
// if its `local_seq` is past everything already on the stream, so nothing
// is applied twice. Boards that have already topped out keep their
// game-over state.
//
// The whole snapshot is validated before anything is touched, so a bad
// snapshot leaves the engine unchanged.

use log::{info, warn};
use thiserror::Error;

use blockduel_prng::GameRng;
use blockduel_protocol::{
    Action, BoardProgress, FallingPiece, GlobalSeq, LocalSeq, PlayerNumber, Snapshot,
};

use crate::attack::ATTACK_QUEUE_CAPACITY;
use crate::board::{ActivePiece, BOARD_WIDTH, Board, ClearSet, PieceKind};
use crate::engine::{GARBAGE_SALT, Origin, Phase, PlayerState, SyncEngine, player_at};
use crate::event::EngineEventKind;
use crate::piece_source::PieceSource;

/// Upper bound on the draw counters a snapshot may ask us to fast-forward.
const MAX_DRAWS: u64 = 1 << 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot board for {0} has the wrong dimensions")]
    BadGrid(PlayerNumber),
    #[error("snapshot falling piece for {0} is invalid or overlaps the board")]
    BadPiece(PlayerNumber),
    #[error("snapshot progress for {0} is out of range")]
    BadProgress(PlayerNumber),
}

impl SyncEngine {
    /// Highest relay sequence applied to either board.
    pub fn latest_global_seq(&self) -> GlobalSeq {
        PlayerNumber::BOTH
            .iter()
            .filter_map(|&p| self.player(p).last_global_seq())
            .max()
            .unwrap_or_default()
    }

    /// Capture both boards with everything needed to resume them.
    pub fn snapshot(&self, authoritative_seq: GlobalSeq) -> Snapshot {
        let one = self.player(PlayerNumber::ONE);
        let two = self.player(PlayerNumber::TWO);
        Snapshot {
            authoritative_seq,
            boards: [one.board().to_grid(), two.board().to_grid()],
            scores: [one.score(), two.score()],
            seeds: [one.seed(), two.seed()],
            progress: [progress_of(one), progress_of(two)],
        }
    }

    /// Replace local state with `snapshot` and replay later inputs.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot, now_ms: u64) -> Result<(), SnapshotError> {
        let mut restored = Vec::with_capacity(2);
        for player in PlayerNumber::BOTH {
            let board = Board::from_grid(snapshot.board(player))
                .ok_or(SnapshotError::BadGrid(player))?;
            let progress = snapshot.progress(player);
            if progress.pieces_drawn > MAX_DRAWS
                || progress.garbage_drawn > MAX_DRAWS
                || progress.attacks.len() > ATTACK_QUEUE_CAPACITY
            {
                return Err(SnapshotError::BadProgress(player));
            }
            let falling = match progress.falling {
                Some(falling) => Some(
                    placed_piece(&board, falling).ok_or(SnapshotError::BadPiece(player))?,
                ),
                None => None,
            };
            restored.push((board, falling));
        }

        for (player, (board, falling)) in PlayerNumber::BOTH.into_iter().zip(restored) {
            let index = player.index();
            let weights = self.config.piece_weights;
            let state = &mut self.players[index];
            restore_player(state, board, snapshot, player, weights);
            if !self.mode.has_board(player) || state.phase == Phase::GameOver {
                continue;
            }
            match falling {
                Some(piece) => {
                    state.active = Some(piece);
                    state.phase = Phase::Active;
                    state.next_gravity_ms = now_ms + self.config.gravity_interval_ms(state.level);
                }
                None => self.spawn(index, now_ms),
            }
        }

        info!("applied snapshot at {:?}", snapshot.authoritative_seq);
        for player in PlayerNumber::BOTH {
            if !self.mode.has_board(player) {
                continue;
            }
            let replayed =
                self.replay_stream(player.index(), snapshot.progress(player).stream_pos, now_ms);
            self.emit(
                now_ms,
                player,
                EngineEventKind::Resynced {
                    authoritative_seq: snapshot.authoritative_seq,
                    replayed,
                },
            );
        }
        Ok(())
    }

    /// Re-apply the board's stream from `from` on. Returns how many inputs
    /// were replayed.
    fn replay_stream(&mut self, index: usize, from: LocalSeq, now_ms: u64) -> usize {
        let player = player_at(index);
        let history = &self.players[index].history;
        if history.front().is_some_and(|&(oldest, _)| oldest > from) {
            warn!("{player}'s input history starts after {from:?}, replay is incomplete");
        }
        let pending: Vec<Action> = history
            .iter()
            .filter(|&&(seq, _)| seq >= from)
            .map(|&(_, action)| action)
            .collect();
        for &action in &pending {
            self.apply_action(player, action, Origin::Replay, now_ms);
        }
        pending.len()
    }
}

fn progress_of(state: &PlayerState) -> BoardProgress {
    let unapplied = u64::try_from(state.deferred.len()).unwrap_or(u64::MAX);
    BoardProgress {
        lines: state.lines,
        level: state.level,
        falling: state.active.map(|piece| FallingPiece {
            kind: piece.kind.cell_value(),
            rotation: piece.rotation,
            row: piece.row,
            col: piece.col,
        }),
        pieces_drawn: state.source.drawn(),
        garbage_drawn: state.garbage_drawn,
        attacks: state.attacks.to_vec(),
        stream_pos: LocalSeq(state.stream_next.0.saturating_sub(unapplied)),
    }
}

fn placed_piece(board: &Board, falling: FallingPiece) -> Option<ActivePiece> {
    let kind = PieceKind::from_cell_value(falling.kind)?;
    if falling.rotation >= 4 {
        return None;
    }
    let piece = ActivePiece {
        kind,
        rotation: falling.rotation,
        row: falling.row,
        col: falling.col,
    };
    board.fits(&piece).then_some(piece)
}

fn restore_player(
    state: &mut PlayerState,
    board: Board,
    snapshot: &Snapshot,
    player: PlayerNumber,
    weights: [u32; 7],
) {
    let seed = snapshot.seed(player);
    let progress = snapshot.progress(player);

    state.board = board;
    state.score = snapshot.score(player);
    state.lines = progress.lines;
    state.level = progress.level.max(1);
    state.source = PieceSource::resume(seed, weights, progress.pieces_drawn);
    let mut garbage_rng = GameRng::with_salt(seed, GARBAGE_SALT);
    for _ in 0..progress.garbage_drawn {
        garbage_rng.range_usize(0, BOARD_WIDTH);
    }
    state.garbage_rng = garbage_rng;
    state.garbage_drawn = progress.garbage_drawn;
    state.active = None;
    state.flash = None;
    state.marks = ClearSet::default();
    state.force_down = false;
    state.attacks.clear();
    for &pattern in &progress.attacks {
        state.attacks.push(pattern);
    }
    state.deferred.clear();
    state.stream_next = state.stream_next.max(progress.stream_pos);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::GARBAGE_CELL;
    use crate::config::EngineConfig;
    use crate::engine::{ApplyOutcome, EngineMode};
    use crate::event::EngineEvent;
    use blockduel_protocol::{AttackPattern, BoardGrid, InputCommand};

    const P1: PlayerNumber = PlayerNumber::ONE;
    const P2: PlayerNumber = PlayerNumber::TWO;

    fn engine(local: PlayerNumber, seeds: [u64; 2]) -> SyncEngine {
        SyncEngine::new(
            EngineConfig::default(),
            EngineMode::Networked { local },
            seeds,
            0,
        )
    }

    fn sample_snapshot() -> Snapshot {
        let mut board1 = Board::new();
        board1.fill_row_except(19, GARBAGE_CELL, &[2]);
        let mut board2 = Board::new();
        board2.set(18, 7, 3);
        let progress = BoardProgress {
            lines: 7,
            level: 1,
            falling: None,
            pieces_drawn: 5,
            garbage_drawn: 2,
            attacks: vec![AttackPattern { lines: 2, hole: 1 }],
            stream_pos: LocalSeq(10),
        };
        Snapshot {
            authoritative_seq: GlobalSeq(50),
            boards: [board1.to_grid(), board2.to_grid()],
            scores: [1_000, 2_500],
            seeds: [101, 202],
            progress: [
                progress.clone(),
                BoardProgress {
                    attacks: vec![],
                    ..progress
                },
            ],
        }
    }

    /// The `Input`s a peer would send for `player`, stamped as the relay
    /// would stamp them from `next_global` on.
    fn sent_inputs(
        events: &[EngineEvent],
        player: PlayerNumber,
        next_global: &mut u64,
    ) -> Vec<InputCommand> {
        let mut inputs = Vec::new();
        for event in events {
            if event.player != player {
                continue;
            }
            if let EngineEventKind::LocalInput { local_seq, action } = event.kind {
                inputs.push(InputCommand {
                    player_number: player,
                    local_seq,
                    global_seq: Some(GlobalSeq(*next_global)),
                    action,
                    timestamp_ms: event.at_ms,
                });
                *next_global += 1;
            }
        }
        inputs
    }

    #[test]
    fn both_peers_converge_on_snapshot_boards() {
        let mut host = engine(P1, [1, 2]);
        let mut guest = engine(P2, [1, 2]);
        host.apply_action(P1, Action::HardDrop, Origin::Local, 0);
        guest.apply_action(P2, Action::MoveLeft, Origin::Local, 0);
        guest.apply_action(P2, Action::HardDrop, Origin::Local, 0);

        let snapshot = sample_snapshot();
        host.apply_snapshot(&snapshot, 10).unwrap();
        guest.apply_snapshot(&snapshot, 10).unwrap();

        for player in PlayerNumber::BOTH {
            assert_eq!(&host.player(player).board().to_grid(), snapshot.board(player));
            assert_eq!(&guest.player(player).board().to_grid(), snapshot.board(player));
            assert_eq!(host.player(player).score(), snapshot.score(player));
            assert_eq!(
                host.player(player).active(),
                guest.player(player).active(),
                "both peers must respawn the same piece"
            );
        }
    }

    #[test]
    fn snapshot_restores_progress_and_drops_transient_state() {
        let mut engine = engine(P1, [1, 2]);
        engine.mark_rows(P1, &[3]);
        engine.receive_attack(P1, AttackPattern { lines: 3, hole: 0 }, 0);
        engine.apply_snapshot(&sample_snapshot(), 5).unwrap();

        let state = engine.player(P1);
        assert_eq!(state.seed(), 101);
        assert_eq!(state.lines(), 7);
        assert_eq!(state.level(), 1);
        assert_eq!(state.garbage_drawn(), 2);
        assert_eq!(state.pieces_drawn(), 6);
        assert_eq!(state.attacks().to_vec(), vec![AttackPattern { lines: 2, hole: 1 }]);
        assert_eq!(state.phase(), Phase::Active);
        assert_eq!(state.deferred_len(), 0);
        assert_eq!(engine.player(P2).seed(), 202);

        // The sixth piece of seed 101, not the first.
        let mut expected = PieceSource::resume(101, [1; 7], 5);
        assert_eq!(state.active().map(|p| p.kind), Some(expected.get_block()));
    }

    #[test]
    fn relayed_inputs_covered_by_snapshot_are_ignored() {
        let mut engine = engine(P1, [1, 2]);
        engine.apply_snapshot(&sample_snapshot(), 0).unwrap();
        let old = InputCommand {
            player_number: P2,
            local_seq: LocalSeq(9),
            global_seq: Some(GlobalSeq(49)),
            action: Action::MoveLeft,
            timestamp_ms: 0,
        };
        assert_eq!(engine.apply_remote_input(&old, 1), ApplyOutcome::Ignored);
        let next = InputCommand {
            local_seq: LocalSeq(10),
            ..old
        };
        assert_eq!(engine.apply_remote_input(&next, 1), ApplyOutcome::Applied);
    }

    #[test]
    fn malformed_snapshot_changes_nothing() {
        let mut engine = engine(P1, [1, 2]);
        let before = engine.player(P1).board().clone();

        let mut snapshot = sample_snapshot();
        snapshot.boards[1] = BoardGrid::empty(3, 3);
        assert_eq!(
            engine.apply_snapshot(&snapshot, 0),
            Err(SnapshotError::BadGrid(P2))
        );

        let mut snapshot = sample_snapshot();
        snapshot.progress[0].falling = Some(FallingPiece {
            kind: 42,
            rotation: 0,
            row: 0,
            col: 3,
        });
        assert_eq!(
            engine.apply_snapshot(&snapshot, 0),
            Err(SnapshotError::BadPiece(P1))
        );

        let mut snapshot = sample_snapshot();
        snapshot.progress[1].attacks = vec![AttackPattern { lines: 1, hole: 0 }; 11];
        assert_eq!(
            engine.apply_snapshot(&snapshot, 0),
            Err(SnapshotError::BadProgress(P2))
        );

        assert_eq!(engine.player(P1).board(), &before);
        assert_eq!(engine.player(P1).seed(), 1);
    }

    #[test]
    fn capture_then_apply_reproduces_both_boards() {
        let mut source = engine(P1, [7, 8]);
        source.apply_action(P1, Action::HardDrop, Origin::Local, 0);
        source.apply_action(P1, Action::MoveRight, Origin::Local, 0);
        source.apply_action(P1, Action::MoveRight, Origin::Local, 0);
        let snapshot = source.snapshot(GlobalSeq(3));
        assert_eq!(snapshot.seeds, [7, 8]);
        assert_eq!(snapshot.progress(P1).stream_pos, LocalSeq(3));

        let mut target = engine(P2, [99, 98]);
        target.apply_snapshot(&snapshot, 0).unwrap();
        for player in PlayerNumber::BOTH {
            let (a, b) = (source.player(player), target.player(player));
            assert_eq!(a.board(), b.board());
            assert_eq!(a.active(), b.active(), "{player} falling piece");
            assert_eq!(a.pieces_drawn(), b.pieces_drawn());
        }

        // Both continue with the same pieces.
        source.apply_action(P1, Action::HardDrop, Origin::Local, 1);
        let events = source.take_events();
        for input in sent_inputs(&events, P1, &mut 4) {
            target.apply_remote_input(&input, 1);
        }
        assert_eq!(target.player(P1).board(), source.player(P1).board());
        assert_eq!(target.player(P1).active(), source.player(P1).active());
    }

    #[test]
    fn local_input_made_while_a_sync_is_in_flight_survives_it() {
        let mut host = engine(P1, [1, 2]);
        let mut guest = engine(P2, [1, 2]);
        let spawn_col = host.player(P1).active().map(|p| p.col);
        host.take_events();

        let snapshot = host.snapshot(host.latest_global_seq());
        // The host keeps playing before its own snapshot comes back.
        assert_eq!(
            host.apply_action(P1, Action::MoveLeft, Origin::Local, 5),
            ApplyOutcome::Applied
        );
        let relayed = sent_inputs(&host.take_events(), P1, &mut 1);
        assert_eq!(relayed.len(), 1);

        host.apply_snapshot(&snapshot, 10).unwrap();
        guest.apply_snapshot(&snapshot, 10).unwrap();
        assert_eq!(
            guest.apply_remote_input(&relayed[0], 11),
            ApplyOutcome::Applied
        );

        let expected = spawn_col.map(|c| c - 1);
        assert_eq!(host.player(P1).active().map(|p| p.col), expected);
        assert_eq!(guest.player(P1).active().map(|p| p.col), expected);
        assert_eq!(host.player(P1).active(), guest.player(P1).active());
    }

    #[test]
    fn relayed_input_received_before_the_snapshot_is_replayed() {
        let mut host = engine(P1, [1, 2]);
        let mut guest = engine(P2, [1, 2]);
        host.take_events();
        guest.take_events();

        let snapshot = host.snapshot(host.latest_global_seq());
        // The guest's move reaches the host after the capture but before
        // the snapshot is echoed back.
        guest.apply_action(P2, Action::MoveRight, Origin::Local, 5);
        for input in sent_inputs(&guest.take_events(), P2, &mut 0) {
            assert_eq!(host.apply_remote_input(&input, 6), ApplyOutcome::Applied);
        }

        host.apply_snapshot(&snapshot, 10).unwrap();
        guest.apply_snapshot(&snapshot, 10).unwrap();
        assert_eq!(host.player(P2).active(), guest.player(P2).active());
        assert_eq!(host.player(P2).stream_next(), guest.player(P2).stream_next());
    }

    #[test]
    fn replayed_clear_does_not_send_its_attack_twice() {
        let mut host = engine(P1, [3, 4]);
        {
            let board = host.board_mut(P1);
            board.fill_row_except(18, GARBAGE_CELL, &[0]);
            board.fill_row_except(19, GARBAGE_CELL, &[0]);
        }
        let vertical_i = ActivePiece {
            kind: PieceKind::I,
            rotation: 1,
            row: 0,
            col: -2,
        };
        assert!(host.set_active(P1, vertical_i));
        let snapshot = host.snapshot(GlobalSeq(0));

        host.apply_action(P1, Action::HardDrop, Origin::Local, 0);
        let sent_before = host.tick(400).events;
        assert!(sent_before
            .iter()
            .any(|e| matches!(e.kind, EngineEventKind::AttackSent { .. })));

        host.apply_snapshot(&snapshot, 500).unwrap();
        let replay = host.tick(900).events;
        assert_eq!(host.player(P1).lines(), 2);
        assert_eq!(host.player(P1).garbage_drawn(), 1);
        assert!(!replay
            .iter()
            .any(|e| matches!(e.kind, EngineEventKind::AttackSent { .. })));
    }
}
