// Game-side handler: the engine and the commands it produces.
//
// `GameSide` implements `GameHandler` over one `SyncEngine` in networked
// mode. Inbound game commands are applied to the engine here; engine events
// concerning the local board are turned back into outbound commands:
//
//   LocalInput           -> Input
//   AttackSent           -> Attack
//   Cleared              -> StateUpdate
//   GameOver (local)     -> GameOver
//
// The engine numbers every action it applies to the local board (player
// moves, gravity steps, incoming garbage) and reports it as `LocalInput`;
// that number is the `Input`'s `local_seq`. Actions it ignores (e.g. during
// a flash) are never transmitted, so the mirror on the other peer only ever
// sees actions that were actually applied.
//
// The handler trait carries no clock, so the owning peer sets `now_ms` before
// dispatching a batch of commands.

use log::{info, warn};

use blockduel_engine::{ApplyOutcome, EngineConfig, EngineEvent, EngineEventKind, Origin, SyncEngine};
use blockduel_protocol::{
    Action, AttackPattern, Command, GameHandler, InputCommand, MatchSettings, PlayerNumber,
    Snapshot,
};

/// How the match ended for us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchResult {
    pub is_winner: bool,
    pub score: u64,
}

/// The opponent's last reported progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpponentStats {
    pub score: u64,
    pub level: u32,
    pub lines: u32,
}

pub struct GameSide {
    config: EngineConfig,
    engine: Option<SyncEngine>,
    local: Option<PlayerNumber>,
    now_ms: u64,
    outgoing: Vec<Command>,
    events: Vec<EngineEvent>,
    game_over_sent: bool,
    resyncs: u32,
    result: Option<MatchResult>,
    opponent: OpponentStats,
    disconnect_reason: Option<String>,
}

impl GameSide {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            engine: None,
            local: None,
            now_ms: 0,
            outgoing: Vec::new(),
            events: Vec::new(),
            game_over_sent: false,
            resyncs: 0,
            result: None,
            opponent: OpponentStats::default(),
            disconnect_reason: None,
        }
    }

    pub fn engine(&self) -> Option<&SyncEngine> {
        self.engine.as_ref()
    }

    /// For item effects and scenario setup.
    pub fn engine_mut(&mut self) -> Option<&mut SyncEngine> {
        self.engine.as_mut()
    }

    pub fn local_player(&self) -> Option<PlayerNumber> {
        self.local
    }

    pub fn result(&self) -> Option<MatchResult> {
        self.result
    }

    pub fn opponent_stats(&self) -> OpponentStats {
        self.opponent
    }

    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    /// Snapshots applied during the current match.
    pub fn resyncs(&self) -> u32 {
        self.resyncs
    }

    pub fn set_now(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }

    pub fn take_outgoing(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Apply a local player action and queue it for the opponent if the
    /// engine accepted it.
    pub fn local_action(&mut self, action: Action, now_ms: u64) -> ApplyOutcome {
        self.now_ms = now_ms;
        let (Some(engine), Some(local)) = (self.engine.as_mut(), self.local) else {
            return ApplyOutcome::Ignored;
        };
        let outcome = engine.apply_action(local, action, Origin::Local, now_ms);
        self.collect_events();
        outcome
    }

    /// Pause or resume locally and tell the opponent.
    pub fn local_pause(&mut self, paused: bool, now_ms: u64) {
        self.now_ms = now_ms;
        if let Some(engine) = self.engine.as_mut() {
            engine.set_paused(paused, now_ms);
            self.outgoing.push(Command::Pause { is_paused: paused });
        }
    }

    /// Advance engine timers.
    pub fn tick(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let step = engine.tick(now_ms);
        self.absorb(step.events);
    }

    /// Pull events the engine produced outside `tick` (actions, snapshots).
    fn collect_events(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            let events = engine.take_events();
            self.absorb(events);
        }
    }

    fn absorb(&mut self, events: Vec<EngineEvent>) {
        let Some(local) = self.local else {
            self.events.extend(events);
            return;
        };
        for event in &events {
            if event.player != local {
                continue;
            }
            match &event.kind {
                EngineEventKind::LocalInput { local_seq, action } => {
                    self.outgoing.push(Command::Input(InputCommand {
                        player_number: local,
                        local_seq: *local_seq,
                        global_seq: None,
                        action: *action,
                        timestamp_ms: event.at_ms,
                    }));
                }
                EngineEventKind::AttackSent { pattern } => self.outgoing.push(Command::Attack {
                    player_number: local,
                    pattern: *pattern,
                }),
                EngineEventKind::Cleared { .. } => {
                    if let Some(state) = self.engine.as_ref().map(|e| e.player(local)) {
                        self.outgoing.push(Command::StateUpdate {
                            player_number: local,
                            score: state.score(),
                            level: state.level(),
                            lines: state.lines(),
                        });
                    }
                }
                EngineEventKind::GameOver {
                    score,
                    pending_attacks,
                } if !self.game_over_sent => {
                    self.game_over_sent = true;
                    self.outgoing.push(Command::GameOver {
                        player_number: local,
                        score: *score,
                        pending_attacks: pending_attacks.clone(),
                    });
                }
                _ => {}
            }
        }
        self.events.extend(events);
    }
}

impl GameHandler for GameSide {
    fn on_game_start(&mut self, settings: &MatchSettings) {
        let engine = SyncEngine::from_settings(self.config.clone(), settings, self.now_ms);
        self.engine = Some(engine);
        self.local = Some(settings.player_number);
        self.game_over_sent = false;
        self.resyncs = 0;
        self.result = None;
        self.opponent = OpponentStats::default();
        self.disconnect_reason = None;
        self.collect_events();
    }

    fn on_input(&mut self, input: &InputCommand) {
        if let Some(engine) = self.engine.as_mut() {
            engine.apply_remote_input(input, self.now_ms);
        }
        self.collect_events();
    }

    fn on_attack(&mut self, attacker: PlayerNumber, pattern: AttackPattern) {
        let (Some(engine), Some(local)) = (self.engine.as_mut(), self.local) else {
            return;
        };
        if attacker == local {
            warn!("echoed attack from ourselves, ignoring");
            return;
        }
        engine.receive_attack(local, pattern, self.now_ms);
        self.collect_events();
    }

    fn on_game_over(&mut self, loser: PlayerNumber, _score: u64, _pending: &[AttackPattern]) {
        if Some(loser) == self.local {
            return;
        }
        if let Some(engine) = self.engine.as_mut() {
            engine.mark_game_over(loser, self.now_ms);
        }
        self.collect_events();
    }

    fn on_game_result(&mut self, is_winner: bool, score: u64) {
        info!(
            "match result: {} with {score}",
            if is_winner { "won" } else { "lost" }
        );
        self.result = Some(MatchResult { is_winner, score });
    }

    fn on_pause(&mut self, is_paused: bool) {
        if let Some(engine) = self.engine.as_mut() {
            engine.set_paused(is_paused, self.now_ms);
        }
    }

    fn on_state_update(&mut self, player_number: PlayerNumber, score: u64, level: u32, lines: u32) {
        if Some(player_number) != self.local {
            self.opponent = OpponentStats {
                score,
                level,
                lines,
            };
        }
    }

    fn on_snapshot(&mut self, snapshot: &Snapshot) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        match engine.apply_snapshot(snapshot, self.now_ms) {
            Ok(()) => self.resyncs += 1,
            Err(e) => warn!("rejected snapshot: {e}"),
        }
        self.collect_events();
    }

    fn on_disconnect(&mut self, reason: &str) {
        info!("disconnected: {reason}");
        self.disconnect_reason = Some(reason.to_string());
    }

    fn on_restart(&mut self) {
        self.engine = None;
        self.result = None;
        self.game_over_sent = false;
    }

    /// Only the host answers; the relay broadcasts the snapshot to both.
    fn on_request_sync(&mut self) {
        if self.local != Some(PlayerNumber::ONE) {
            return;
        }
        if let Some(engine) = self.engine.as_ref() {
            let snapshot = engine.snapshot(engine.latest_global_seq());
            self.outgoing.push(Command::Snapshot(snapshot));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockduel_engine::Phase;
    use blockduel_protocol::{GameMode, GlobalSeq, LocalSeq, dispatch};

    fn started(player: PlayerNumber) -> GameSide {
        let mut side = GameSide::new(EngineConfig::default());
        let settings = MatchSettings {
            player_number: player,
            my_seed: 11,
            other_seed: 22,
            mode: GameMode::Classic,
        };
        dispatch(&Command::GameStart { settings }, None, Some(&mut side));
        side
    }

    #[test]
    fn accepted_local_actions_become_inputs() {
        let mut side = started(PlayerNumber::ONE);
        assert_eq!(
            side.local_action(Action::MoveLeft, 5),
            ApplyOutcome::Applied
        );
        let out = side.take_outgoing();
        let [Command::Input(input)] = &out[..] else {
            panic!("expected one Input, got {out:?}");
        };
        assert_eq!(input.local_seq, LocalSeq(0));
        assert_eq!(input.action, Action::MoveLeft);
        assert_eq!(input.global_seq, None);
    }

    #[test]
    fn rejected_local_actions_are_not_sent() {
        let mut side = started(PlayerNumber::ONE);
        for _ in 0..10 {
            side.local_action(Action::MoveLeft, 0);
        }
        let sent = side.take_outgoing().len();
        assert!(sent < 10, "moves past the wall were sent");
    }

    #[test]
    fn gravity_is_transmitted_as_descend() {
        let mut side = started(PlayerNumber::TWO);
        side.tick(1_000);
        let out = side.take_outgoing();
        assert!(matches!(
            &out[..],
            [Command::Input(InputCommand {
                action: Action::Descend,
                player_number,
                ..
            })] if *player_number == PlayerNumber::TWO
        ));
    }

    #[test]
    fn remote_input_drives_the_mirror() {
        let mut side = started(PlayerNumber::ONE);
        let before = side.engine().unwrap().player(PlayerNumber::TWO).active().copied();
        let input = InputCommand {
            player_number: PlayerNumber::TWO,
            local_seq: LocalSeq(0),
            global_seq: Some(GlobalSeq(0)),
            action: Action::MoveRight,
            timestamp_ms: 0,
        };
        dispatch(&Command::Input(input), None, Some(&mut side));
        let after = side.engine().unwrap().player(PlayerNumber::TWO).active().copied();
        assert_eq!(after.map(|p| p.col), before.map(|p| p.col + 1));
        assert!(side.take_outgoing().is_empty());
    }

    #[test]
    fn incoming_attack_is_queued_on_the_local_board() {
        let mut side = started(PlayerNumber::TWO);
        let pattern = AttackPattern { lines: 2, hole: 3 };
        dispatch(
            &Command::Attack {
                player_number: PlayerNumber::ONE,
                pattern,
            },
            None,
            Some(&mut side),
        );
        let engine = side.engine().unwrap();
        assert_eq!(engine.player(PlayerNumber::TWO).attacks().to_vec(), vec![pattern]);
        // The mirror on the attacker's side learns of it through our stream.
        let out = side.take_outgoing();
        assert!(matches!(
            &out[..],
            [Command::Input(InputCommand {
                action: Action::QueueGarbage(queued),
                local_seq: LocalSeq(0),
                ..
            })] if *queued == pattern
        ));
    }

    #[test]
    fn opponent_game_over_and_result() {
        let mut side = started(PlayerNumber::ONE);
        dispatch(
            &Command::GameOver {
                player_number: PlayerNumber::TWO,
                score: 10,
                pending_attacks: vec![],
            },
            None,
            Some(&mut side),
        );
        assert_eq!(
            side.engine().unwrap().player(PlayerNumber::TWO).phase(),
            Phase::GameOver
        );
        dispatch(
            &Command::GameResult {
                is_winner: true,
                score: 0,
            },
            None,
            Some(&mut side),
        );
        assert_eq!(
            side.result(),
            Some(MatchResult {
                is_winner: true,
                score: 0
            })
        );
        // Our own GameOver is never sent for the opponent's loss.
        assert!(side.take_outgoing().is_empty());

        // The decided match sends nothing more: no gravity, no moves.
        side.tick(60_000);
        assert_eq!(side.local_action(Action::MoveLeft, 60_001), ApplyOutcome::Ignored);
        assert!(side.take_outgoing().is_empty());
    }

    #[test]
    fn host_answers_request_sync() {
        let mut host = started(PlayerNumber::ONE);
        dispatch(&Command::RequestSync, None, Some(&mut host));
        assert!(matches!(&host.take_outgoing()[..], [Command::Snapshot(_)]));

        let mut guest = started(PlayerNumber::TWO);
        dispatch(&Command::RequestSync, None, Some(&mut guest));
        assert!(guest.take_outgoing().is_empty());
    }

    #[test]
    fn sequence_numbers_continue_across_gravity_and_moves() {
        let mut side = started(PlayerNumber::ONE);
        side.local_action(Action::MoveRight, 0);
        side.tick(1_000);
        side.local_action(Action::MoveRight, 1_001);
        let seqs: Vec<u64> = side
            .take_outgoing()
            .into_iter()
            .filter_map(|c| match c {
                Command::Input(input) => Some(input.local_seq.0),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn applied_snapshot_is_counted() {
        let mut host = started(PlayerNumber::ONE);
        dispatch(&Command::RequestSync, None, Some(&mut host));
        let out = host.take_outgoing();
        let [Command::Snapshot(snapshot)] = &out[..] else {
            panic!("expected one Snapshot, got {out:?}");
        };
        let mut guest = started(PlayerNumber::TWO);
        dispatch(&Command::Snapshot(snapshot.clone()), None, Some(&mut guest));
        assert_eq!(guest.resyncs(), 1);
        assert_eq!(
            guest.engine().unwrap().player(PlayerNumber::ONE).active(),
            host.engine().unwrap().player(PlayerNumber::ONE).active()
        );
    }

    #[test]
    fn pause_is_applied_and_announced() {
        let mut side = started(PlayerNumber::ONE);
        side.local_pause(true, 10);
        assert!(side.engine().unwrap().is_paused());
        assert_eq!(side.take_outgoing(), vec![Command::Pause { is_paused: true }]);
        dispatch(&Command::Pause { is_paused: false }, None, Some(&mut side));
        assert!(!side.engine().unwrap().is_paused());
    }
}
