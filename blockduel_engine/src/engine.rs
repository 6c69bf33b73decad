// The synchronized lock/flash/clear engine.
//
// `SyncEngine` owns both boards of a match and drives each through
//
//     Active -> LockPending -> (Flashing ->) Cleared -> Active | GameOver
//
// with the same code whether the triggering action came from the local
// player, the local gravity timer, or a relayed remote `Input`. That shared
// path is what keeps the two peers' copies of a board equal without ever
// sending grids: both peers see the same seeded pieces and the same actions,
// so both reach the same lock, the same clear set, and the same spawn.
//
// `EngineMode` is a flat tag saying which boards exist and which are driven
// by this process:
// - `Single`: board 1 only, driven locally.
// - `LocalDual`: both boards, both driven locally (hot-seat).
// - `Networked { local }`: both boards; `local` is driven here, the other is
//   a mirror fed by relayed inputs.
// Gravity runs only for locally driven boards; the mirror advances only when
// the owner's `Descend` arrives. Flash timers run for every board.
//
// Actions that target a flashing board: remote ones are deferred and
// replayed in arrival order right after the board settles; local ones are
// ignored (and so never transmitted).
//
// Input stream: every action applied to a locally driven board, including
// gravity steps and incoming garbage, is numbered with the board's next
// `LocalSeq`, kept in a short history and announced as `LocalInput`. The
// mirror tracks the same numbering from relayed inputs. Snapshots record a
// stream position per board so inputs past it can be replayed on top.
//
// Attacks: a locally driven board that clears more than one row emits
// `AttackSent`. The victim's owner receives it through `receive_attack`,
// holds it until its board is `Active`, and then feeds it into its own
// stream as `QueueGarbage`, so the victim's mirror queues it at the same
// point. Mirror boards draw the same garbage holes but never send attacks.
// Queued attacks are applied in the settle step, after the clear and before
// the next spawn.
//
// Once any board tops out the match is decided and locally driven boards stop
// producing input; mirrors keep applying what is still in flight.
//
// The engine has no clock of its own. Every entry point takes `now_ms`, and
// `tick(now_ms)` advances timers and returns the events produced since the
// previous tick.
//
// See also: `snapshot.rs` for replace-then-replay resynchronization, `board.rs` for
// geometry, `event.rs` for the output vocabulary.

use std::collections::VecDeque;

use log::{debug, info, warn};

use blockduel_prng::GameRng;
use blockduel_protocol::{
    Action, AttackPattern, GlobalSeq, InputCommand, LocalSeq, MatchSettings, PlayerNumber,
};

use crate::attack::{ATTACK_QUEUE_CAPACITY, AttackQueue, attack_for};
use crate::board::{ActivePiece, BOARD_HEIGHT, BOARD_WIDTH, Board, ClearSet};
use crate::config::EngineConfig;
use crate::event::{EngineEvent, EngineEventKind, StepResult};
use crate::piece_source::PieceSource;

/// Salt separating a board's garbage-hole stream from its piece stream.
pub(crate) const GARBAGE_SALT: u64 = 0x6761_7262_6167_6521;

/// Stream entries kept per board for replay after a snapshot.
const HISTORY_LIMIT: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineMode {
    Single,
    LocalDual,
    Networked { local: PlayerNumber },
}

impl EngineMode {
    pub fn has_board(self, player: PlayerNumber) -> bool {
        match self {
            EngineMode::Single => player == PlayerNumber::ONE,
            EngineMode::LocalDual | EngineMode::Networked { .. } => true,
        }
    }

    pub fn drives_locally(self, player: PlayerNumber) -> bool {
        match self {
            EngineMode::Single => player == PlayerNumber::ONE,
            EngineMode::LocalDual => true,
            EngineMode::Networked { local } => player == local,
        }
    }

    pub fn has_opponent(self) -> bool {
        !matches!(self, EngineMode::Single)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Active,
    LockPending,
    Flashing,
    Cleared,
    GameOver,
}

/// Where an action came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// The local player or the local gravity timer.
    Local,
    /// A relayed `Input` from the board's owner.
    Remote,
    /// An input already in the board's stream, re-applied after a snapshot.
    Replay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The action changed the board. Local outcomes of this kind are what a
    /// peer transmits.
    Applied,
    /// Queued until the board finishes flashing.
    Deferred,
    /// No effect.
    Ignored,
}

#[derive(Clone, Debug)]
pub(crate) struct Flash {
    pub(crate) set: ClearSet,
    pub(crate) toggles: u32,
    pub(crate) visible: bool,
    pub(crate) next_deadline_ms: u64,
}

/// Everything one board needs to run its state machine.
#[derive(Clone, Debug)]
pub struct PlayerState {
    pub(crate) board: Board,
    pub(crate) active: Option<ActivePiece>,
    pub(crate) source: PieceSource,
    pub(crate) garbage_rng: GameRng,
    pub(crate) score: u64,
    pub(crate) lines: u32,
    pub(crate) level: u32,
    pub(crate) paused: bool,
    pub(crate) phase: Phase,
    pub(crate) flash: Option<Flash>,
    pub(crate) marks: ClearSet,
    pub(crate) force_down: bool,
    pub(crate) attacks: AttackQueue,
    /// Attacks received while the board was busy, not yet in the stream.
    pub(crate) incoming: AttackQueue,
    pub(crate) deferred: VecDeque<Action>,
    pub(crate) last_global_seq: Option<GlobalSeq>,
    pub(crate) stream_next: LocalSeq,
    pub(crate) history: VecDeque<(LocalSeq, Action)>,
    pub(crate) garbage_drawn: u64,
    /// Highest `garbage_drawn` already announced as `AttackSent`.
    pub(crate) attacks_announced: u64,
    pub(crate) next_gravity_ms: u64,
}

impl PlayerState {
    pub(crate) fn new(seed: u64, config: &EngineConfig) -> Self {
        Self {
            board: Board::new(),
            active: None,
            source: PieceSource::new(seed, config.piece_weights),
            garbage_rng: GameRng::with_salt(seed, GARBAGE_SALT),
            score: 0,
            lines: 0,
            level: 1,
            paused: false,
            phase: Phase::Cleared,
            flash: None,
            marks: ClearSet::default(),
            force_down: false,
            attacks: AttackQueue::new(),
            incoming: AttackQueue::new(),
            deferred: VecDeque::new(),
            last_global_seq: None,
            stream_next: LocalSeq::default(),
            history: VecDeque::new(),
            garbage_drawn: 0,
            attacks_announced: 0,
            next_gravity_ms: 0,
        }
    }

    pub(crate) fn remember(&mut self, local_seq: LocalSeq, action: Action) {
        self.history.push_back((local_seq, action));
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn active(&self) -> Option<&ActivePiece> {
        self.active.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn lines(&self) -> u32 {
        self.lines
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn seed(&self) -> u64 {
        self.source.seed()
    }

    pub fn attacks(&self) -> &AttackQueue {
        &self.attacks
    }

    /// Attacks held until the board is next `Active`.
    pub fn incoming_attacks(&self) -> &AttackQueue {
        &self.incoming
    }

    /// Visibility of the flashing cells, or `None` when not flashing.
    pub fn flash_visible(&self) -> Option<bool> {
        self.flash.as_ref().map(|f| f.visible)
    }

    pub fn flash_toggles(&self) -> u32 {
        self.flash.as_ref().map_or(0, |f| f.toggles)
    }

    /// Rows, columns and cells the current flash will clear.
    pub fn flashing_set(&self) -> Option<&ClearSet> {
        self.flash.as_ref().map(|f| &f.set)
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn last_global_seq(&self) -> Option<GlobalSeq> {
        self.last_global_seq
    }

    /// The `local_seq` the next input on this board's stream will carry.
    pub fn stream_next(&self) -> LocalSeq {
        self.stream_next
    }

    pub fn garbage_drawn(&self) -> u64 {
        self.garbage_drawn
    }

    /// Pieces consumed from this board's source so far.
    pub fn pieces_drawn(&self) -> u64 {
        self.source.drawn()
    }
}

pub(crate) fn player_at(index: usize) -> PlayerNumber {
    if index == 0 {
        PlayerNumber::ONE
    } else {
        PlayerNumber::TWO
    }
}

pub struct SyncEngine {
    pub(crate) config: EngineConfig,
    pub(crate) mode: EngineMode,
    pub(crate) players: [PlayerState; 2],
    pub(crate) paused_at: Option<u64>,
    pub(crate) events: Vec<EngineEvent>,
}

impl SyncEngine {
    /// Build an engine and spawn the first piece on every board in `mode`.
    /// `seeds` is indexed by `PlayerNumber::index()`.
    pub fn new(config: EngineConfig, mode: EngineMode, seeds: [u64; 2], now_ms: u64) -> Self {
        let players = [
            PlayerState::new(seeds[0], &config),
            PlayerState::new(seeds[1], &config),
        ];
        let mut engine = Self {
            config,
            mode,
            players,
            paused_at: None,
            events: Vec::new(),
        };
        for player in PlayerNumber::BOTH {
            if mode.has_board(player) {
                engine.spawn(player.index(), now_ms);
            }
        }
        engine
    }

    /// Networked engine for the local side of `settings`.
    pub fn from_settings(config: EngineConfig, settings: &MatchSettings, now_ms: u64) -> Self {
        let seeds = [
            settings.seed_for(PlayerNumber::ONE),
            settings.seed_for(PlayerNumber::TWO),
        ];
        Self::new(
            config,
            EngineMode::Networked {
                local: settings.player_number,
            },
            seeds,
            now_ms,
        )
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn player(&self, player: PlayerNumber) -> &PlayerState {
        &self.players[player.index()]
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// True once any board in play has topped out.
    pub fn is_over(&self) -> bool {
        PlayerNumber::BOTH
            .iter()
            .any(|&p| self.mode.has_board(p) && self.player(p).phase == Phase::GameOver)
    }

    /// Direct access to a board's settled cells, for item effects and
    /// scenario setup.
    pub fn board_mut(&mut self, player: PlayerNumber) -> &mut Board {
        &mut self.players[player.index()].board
    }

    /// Replace the falling piece. Only allowed while the board is `Active`
    /// and the new piece fits.
    pub fn set_active(&mut self, player: PlayerNumber, piece: ActivePiece) -> bool {
        let state = &mut self.players[player.index()];
        if state.phase != Phase::Active || !state.board.fits(&piece) {
            return false;
        }
        state.active = Some(piece);
        true
    }

    /// Events produced since the last `tick` or `take_events`.
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn emit(&mut self, at_ms: u64, player: PlayerNumber, kind: EngineEventKind) {
        self.events.push(EngineEvent {
            at_ms,
            player,
            kind,
        });
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Apply one action to `player`'s board.
    pub fn apply_action(
        &mut self,
        player: PlayerNumber,
        action: Action,
        origin: Origin,
        now_ms: u64,
    ) -> ApplyOutcome {
        if !self.mode.has_board(player) {
            return ApplyOutcome::Ignored;
        }
        let local_board = self.mode.drives_locally(player);
        match origin {
            Origin::Local if !local_board => return ApplyOutcome::Ignored,
            Origin::Local if self.paused_at.is_some() => return ApplyOutcome::Ignored,
            Origin::Local if self.is_over() => return ApplyOutcome::Ignored,
            Origin::Local if matches!(action, Action::QueueGarbage(_)) => {
                debug!("garbage for {player} only arrives through receive_attack");
                return ApplyOutcome::Ignored;
            }
            Origin::Remote if local_board && matches!(self.mode, EngineMode::Networked { .. }) => {
                warn!("remote {action:?} for locally driven board {player}, ignoring");
                return ApplyOutcome::Ignored;
            }
            _ => {}
        }

        let index = player.index();
        let outcome = self.step(index, action, origin, now_ms);
        if origin == Origin::Local && outcome == ApplyOutcome::Applied {
            self.record_local(index, action, now_ms);
        }
        outcome
    }

    fn step(&mut self, index: usize, action: Action, origin: Origin, now_ms: u64) -> ApplyOutcome {
        match self.players[index].phase {
            Phase::GameOver => ApplyOutcome::Ignored,
            Phase::Active => self.apply_active(index, action, now_ms),
            Phase::LockPending | Phase::Flashing | Phase::Cleared => match origin {
                Origin::Remote | Origin::Replay => {
                    self.players[index].deferred.push_back(action);
                    ApplyOutcome::Deferred
                }
                Origin::Local => ApplyOutcome::Ignored,
            },
        }
    }

    /// Number an applied local action on the board's stream.
    fn record_local(&mut self, index: usize, action: Action, now_ms: u64) {
        let state = &mut self.players[index];
        let local_seq = state.stream_next;
        state.stream_next = local_seq.next();
        state.remember(local_seq, action);
        self.emit(
            now_ms,
            player_at(index),
            EngineEventKind::LocalInput { local_seq, action },
        );
    }

    /// Apply a relayed input to a mirror board.
    ///
    /// Inputs already on the board's stream (a `local_seq` below the next
    /// expected one, which includes inputs covered by a snapshot) or with a
    /// relay sequence that is not newer than the last one are ignored. A
    /// skipped `local_seq` is logged and the input applied anyway.
    pub fn apply_remote_input(&mut self, input: &InputCommand, now_ms: u64) -> ApplyOutcome {
        let player = input.player_number;
        if !self.mode.has_board(player) {
            return ApplyOutcome::Ignored;
        }
        if self.mode.drives_locally(player) {
            warn!("relayed {:?} for locally driven board {player}, ignoring", input.action);
            return ApplyOutcome::Ignored;
        }

        let state = &mut self.players[player.index()];
        let stale_relay = input
            .global_seq
            .is_some_and(|seq| state.last_global_seq.is_some_and(|last| seq <= last));
        if stale_relay || input.local_seq < state.stream_next {
            debug!(
                "stale input {:?}/{:?} for {player} (next {:?}, last relay {:?})",
                input.local_seq, input.global_seq, state.stream_next, state.last_global_seq
            );
            return ApplyOutcome::Ignored;
        }
        if input.local_seq > state.stream_next {
            warn!(
                "{player}'s input stream skipped from {:?} to {:?}",
                state.stream_next, input.local_seq
            );
        }
        if input.global_seq.is_some() {
            state.last_global_seq = input.global_seq;
        }
        state.stream_next = input.local_seq.next();
        state.remember(input.local_seq, input.action);
        self.apply_action(player, input.action, Origin::Remote, now_ms)
    }

    fn apply_active(&mut self, index: usize, action: Action, now_ms: u64) -> ApplyOutcome {
        let state = &mut self.players[index];
        let Some(mut piece) = state.active else {
            return ApplyOutcome::Ignored;
        };
        let changed = match action {
            Action::MoveLeft => state.board.try_move(&mut piece, 0, -1),
            Action::MoveRight => state.board.try_move(&mut piece, 0, 1),
            Action::Rotate => state.board.try_rotate(&mut piece),
            Action::SoftDrop => state.board.try_move(&mut piece, 1, 0),
            Action::Descend => {
                if !state.board.try_move(&mut piece, 1, 0) {
                    self.lock(index, now_ms);
                    return ApplyOutcome::Applied;
                }
                true
            }
            Action::HardDrop => {
                state.board.hard_drop(&mut piece);
                state.active = Some(piece);
                self.lock(index, now_ms);
                return ApplyOutcome::Applied;
            }
            Action::QueueGarbage(pattern) => {
                if !state.attacks.push(pattern) {
                    warn!("attack queue for {} is full, dropping {pattern:?}", player_at(index));
                    return ApplyOutcome::Ignored;
                }
                self.emit(now_ms, player_at(index), EngineEventKind::AttackQueued { pattern });
                return ApplyOutcome::Applied;
            }
        };
        if changed {
            state.active = Some(piece);
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Ignored
        }
    }

    // -----------------------------------------------------------------------
    // Lock / flash / clear
    // -----------------------------------------------------------------------

    fn lock(&mut self, index: usize, now_ms: u64) {
        let player = player_at(index);
        let state = &mut self.players[index];
        let Some(piece) = state.active.take() else {
            return;
        };
        state.phase = Phase::LockPending;
        state.board.merge(&piece);

        let set = Self::collect_clear_set(state);
        let kind = EngineEventKind::Locked {
            rows: set.rows.iter().copied().collect(),
            cols: set.cols.iter().copied().collect(),
            cells: set.cells.len(),
        };
        self.emit(now_ms, player, kind);

        if set.is_empty() {
            self.settle(index, 0, now_ms);
            return;
        }
        debug!("{player} flashing {} rows, {} cols", set.rows.len(), set.cols.len());
        let state = &mut self.players[index];
        state.flash = Some(Flash {
            set,
            toggles: 0,
            visible: true,
            next_deadline_ms: now_ms + self.config.flash_interval_ms,
        });
        state.phase = Phase::Flashing;
    }

    /// Full rows and columns plus any item marks. Consumes the marks.
    fn collect_clear_set(state: &mut PlayerState) -> ClearSet {
        let mut set = ClearSet::default();
        set.rows.extend(state.board.full_rows());
        set.cols.extend(state.board.full_columns());
        set.union_with(&state.marks);
        state.marks.clear();
        set
    }

    fn advance_flash(&mut self, index: usize, now_ms: u64) {
        let player = player_at(index);
        let total = self.config.flash_toggles;
        let interval = self.config.flash_interval_ms;
        let Some(flash) = self.players[index].flash.as_mut() else {
            return;
        };

        let mut toggled = Vec::new();
        while flash.toggles < total && now_ms >= flash.next_deadline_ms {
            flash.toggles += 1;
            flash.visible = !flash.visible;
            flash.next_deadline_ms += interval;
            toggled.push((flash.visible, flash.toggles));
        }
        let done = flash.toggles >= total;
        for (visible, toggles) in toggled {
            self.emit(now_ms, player, EngineEventKind::FlashToggled { visible, toggles });
        }
        if done {
            self.finish_flash(index, now_ms);
        }
    }

    /// Clear the flashing set and settle, whatever the timers say.
    fn finish_flash(&mut self, index: usize, now_ms: u64) {
        let state = &mut self.players[index];
        let Some(flash) = state.flash.take() else {
            return;
        };
        let rows = state.board.clear(&flash.set);
        self.settle(index, rows, now_ms);
        self.replay_deferred(index, now_ms);
    }

    /// The tail of every lock: score, attack, queued garbage, spawn.
    fn settle(&mut self, index: usize, rows: usize, now_ms: u64) {
        let player = player_at(index);
        let state = &mut self.players[index];
        state.phase = Phase::Cleared;
        state.flash = None;

        if rows > 0 {
            let score_gained = self.config.score_for(rows, state.level);
            state.score += score_gained;
            state.lines += u32::try_from(rows).unwrap_or(u32::MAX);
            state.level = self.config.level_for(state.lines);
            self.emit(now_ms, player, EngineEventKind::Cleared { rows, score_gained });
        }

        if rows > 1 && self.mode.has_opponent() {
            let state = &mut self.players[index];
            let hole = state.garbage_rng.range_usize(0, BOARD_WIDTH) as u8;
            state.garbage_drawn += 1;
            // A clear replayed after a snapshot redraws a hole already sent.
            let announce = self.mode.drives_locally(player)
                && state.garbage_drawn > state.attacks_announced;
            if announce {
                state.attacks_announced = state.garbage_drawn;
            }
            if let Some(pattern) = attack_for(rows, hole).filter(|_| announce) {
                info!("{player} attacks with {} lines", pattern.lines);
                self.emit(now_ms, player, EngineEventKind::AttackSent { pattern });
                if self.mode.drives_locally(player.other()) {
                    self.receive_attack(player.other(), pattern, now_ms);
                }
            }
        }

        while let Some(pattern) = self.players[index].attacks.pop() {
            let fits = self.players[index]
                .board
                .push_garbage(pattern.lines, pattern.hole);
            self.emit(now_ms, player, EngineEventKind::AttackApplied { pattern });
            if !fits {
                self.game_over(index, now_ms);
                return;
            }
        }

        self.spawn(index, now_ms);
    }

    pub(crate) fn spawn(&mut self, index: usize, now_ms: u64) {
        let player = player_at(index);
        let state = &mut self.players[index];
        let piece = ActivePiece::spawn(state.source.get_block());
        if !state.board.fits(&piece) {
            self.game_over(index, now_ms);
            return;
        }
        state.active = Some(piece);
        state.phase = Phase::Active;
        state.next_gravity_ms = now_ms + self.config.gravity_interval_ms(state.level);
        let force_down = std::mem::take(&mut state.force_down);
        self.emit(now_ms, player, EngineEventKind::Spawned { piece: piece.kind });
        if force_down {
            self.force_down_now(index, now_ms);
        }
    }

    fn replay_deferred(&mut self, index: usize, now_ms: u64) {
        let player = player_at(index);
        while self.players[index].phase == Phase::Active {
            let Some(action) = self.players[index].deferred.pop_front() else {
                break;
            };
            self.apply_action(player, action, Origin::Replay, now_ms);
        }
    }

    fn game_over(&mut self, index: usize, now_ms: u64) {
        let player = player_at(index);
        let state = &mut self.players[index];
        if state.phase == Phase::GameOver {
            return;
        }
        state.phase = Phase::GameOver;
        state.active = None;
        state.flash = None;
        let score = state.score;
        let mut pending_attacks = state.attacks.to_vec();
        pending_attacks.extend(state.incoming.to_vec());
        info!("{player} topped out with score {score}");
        self.emit(
            now_ms,
            player,
            EngineEventKind::GameOver {
                score,
                pending_attacks,
            },
        );
    }

    /// The owner of `player`'s board reported it topped out.
    ///
    /// A clear still flashing on this copy of the board is finished first:
    /// the owner settled it before reporting.
    pub fn mark_game_over(&mut self, player: PlayerNumber, now_ms: u64) {
        if self.mode.has_board(player) {
            self.finish_flash(player.index(), now_ms);
            self.game_over(player.index(), now_ms);
        }
    }

    // -----------------------------------------------------------------------
    // Attacks
    // -----------------------------------------------------------------------

    /// Hand an opponent's attack to `target`, a locally driven board.
    ///
    /// The attack enters the board's stream as `QueueGarbage` as soon as the
    /// board is `Active`, which is right away unless a lock is resolving.
    /// Returns `false` when the attack is dropped: the board is a mirror
    /// (its owner's stream carries the garbage), the match is over, or the
    /// board already has a full queue of pending attacks.
    pub fn receive_attack(
        &mut self,
        target: PlayerNumber,
        pattern: AttackPattern,
        now_ms: u64,
    ) -> bool {
        if !self.mode.has_board(target) || self.is_over() {
            return false;
        }
        if !self.mode.drives_locally(target) {
            debug!("attack on mirror board {target} waits for its owner's input");
            return false;
        }
        let index = target.index();
        let state = &mut self.players[index];
        if state.attacks.len() + state.incoming.len() >= ATTACK_QUEUE_CAPACITY {
            warn!("attack queue for {target} is full, dropping {pattern:?}");
            return false;
        }
        state.incoming.push(pattern);
        self.flush_incoming(index, now_ms);
        true
    }

    fn flush_incoming(&mut self, index: usize, now_ms: u64) {
        while self.players[index].phase == Phase::Active {
            let Some(pattern) = self.players[index].incoming.pop() else {
                break;
            };
            let action = Action::QueueGarbage(pattern);
            if self.step(index, action, Origin::Local, now_ms) == ApplyOutcome::Applied {
                self.record_local(index, action, now_ms);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Clock
    // -----------------------------------------------------------------------

    /// Advance flash timers for every board and gravity for locally driven
    /// boards. Returns every event produced since the previous tick.
    ///
    /// Once a board has topped out the match is decided: flashes still run
    /// to the end but locally driven boards stop falling, so the last input
    /// on each stream is the last one the relay sees.
    pub fn tick(&mut self, now_ms: u64) -> StepResult {
        if self.paused_at.is_none() {
            for player in PlayerNumber::BOTH {
                if !self.mode.has_board(player) {
                    continue;
                }
                self.advance_flash(player.index(), now_ms);
                if self.mode.drives_locally(player) && !self.is_over() {
                    self.flush_incoming(player.index(), now_ms);
                    self.advance_gravity(player.index(), now_ms);
                }
            }
        }
        StepResult {
            events: self.take_events(),
        }
    }

    fn advance_gravity(&mut self, index: usize, now_ms: u64) {
        let player = player_at(index);
        let state = &mut self.players[index];
        if state.phase != Phase::Active || state.active.is_none() || now_ms < state.next_gravity_ms
        {
            return;
        }
        state.next_gravity_ms = now_ms + self.config.gravity_interval_ms(state.level);
        self.emit(now_ms, player, EngineEventKind::AutoDescend);
        self.apply_action(player, Action::Descend, Origin::Local, now_ms);
    }

    /// Freeze or resume gravity and flash timers. Deadlines are shifted by
    /// the paused duration on resume.
    pub fn set_paused(&mut self, paused: bool, now_ms: u64) {
        match (paused, self.paused_at) {
            (true, None) => {
                self.paused_at = Some(now_ms);
                for state in &mut self.players {
                    state.paused = true;
                }
            }
            (false, Some(since)) => {
                let delta = now_ms.saturating_sub(since);
                for state in &mut self.players {
                    state.paused = false;
                    state.next_gravity_ms += delta;
                    if let Some(flash) = state.flash.as_mut() {
                        flash.next_deadline_ms += delta;
                    }
                }
                self.paused_at = None;
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Item hooks
    // -----------------------------------------------------------------------

    /// Add rows to the clear set of `player`'s next lock.
    pub fn mark_rows(&mut self, player: PlayerNumber, rows: &[usize]) {
        let marks = &mut self.players[player.index()].marks;
        marks
            .rows
            .extend(rows.iter().copied().filter(|&r| r < BOARD_HEIGHT));
    }

    pub fn mark_columns(&mut self, player: PlayerNumber, cols: &[usize]) {
        let marks = &mut self.players[player.index()].marks;
        marks
            .cols
            .extend(cols.iter().copied().filter(|&c| c < BOARD_WIDTH));
    }

    pub fn mark_cells(&mut self, player: PlayerNumber, cells: &[(usize, usize)]) {
        let marks = &mut self.players[player.index()].marks;
        marks.cells.extend(
            cells
                .iter()
                .copied()
                .filter(|&(r, c)| r < BOARD_HEIGHT && c < BOARD_WIDTH),
        );
    }

    /// Drive the falling piece straight down and resolve the lock without a
    /// flash. While the board is flashing, the effect waits for the next
    /// spawned piece.
    pub fn activate_force_down(&mut self, player: PlayerNumber, now_ms: u64) {
        if !self.mode.has_board(player) {
            return;
        }
        let index = player.index();
        match self.players[index].phase {
            Phase::Active => self.force_down_now(index, now_ms),
            Phase::GameOver => {}
            _ => self.players[index].force_down = true,
        }
    }

    fn force_down_now(&mut self, index: usize, now_ms: u64) {
        let player = player_at(index);
        let state = &mut self.players[index];
        let Some(mut piece) = state.active.take() else {
            return;
        };
        state.phase = Phase::LockPending;
        let dropped = state.board.hard_drop(&mut piece);
        if dropped == 0 {
            self.emit(now_ms, player, EngineEventKind::ForcedDown { discarded: true });
            self.settle(index, 0, now_ms);
            return;
        }
        state.board.merge(&piece);
        let set = Self::collect_clear_set(state);
        let rows = state.board.clear(&set);
        self.emit(now_ms, player, EngineEventKind::ForcedDown { discarded: false });
        self.settle(index, rows, now_ms);
    }
}
