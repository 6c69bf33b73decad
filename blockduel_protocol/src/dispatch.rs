// Handler surfaces and tag dispatch.
//
// A received command is routed to one or both of two handler sets: the menu
// surface (lobby: ready flags, connection status, match start) and the game
// surface (everything that touches an engine). Membership is two explicit
// lookup tables, `MENU_COMMANDS` and `GAME_COMMANDS`; a command that both
// surfaces care about (`GameStart`, `Pong`, `Restart`) is listed in both.
//
// The handler traits give every method a no-op default so an implementor
// overrides only what its phase reacts to. `dispatch` takes each handler as
// an `Option` because a peer may have only one surface alive at a time (the
// lobby runs before any engine exists).

use log::debug;

use crate::command::{
    AttackPattern, Command, CommandKind, InputCommand, MatchSettings, Snapshot,
};
use crate::types::PlayerNumber;

/// Which handler set(s) a command kind belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Surface {
    Menu,
    Game,
    Both,
}

pub const MENU_COMMANDS: &[CommandKind] = &[
    CommandKind::Ready,
    CommandKind::GameStart,
    CommandKind::ConnectionChanged,
    CommandKind::SyncReadyState,
    CommandKind::Pong,
    CommandKind::Restart,
];

pub const GAME_COMMANDS: &[CommandKind] = &[
    CommandKind::Input,
    CommandKind::Attack,
    CommandKind::GameOver,
    CommandKind::GameResult,
    CommandKind::Pause,
    CommandKind::Ping,
    CommandKind::Pong,
    CommandKind::StateUpdate,
    CommandKind::Snapshot,
    CommandKind::Disconnect,
    CommandKind::GameStart,
    CommandKind::Restart,
    CommandKind::RequestSync,
];

impl CommandKind {
    pub fn surface(self) -> Surface {
        match (
            MENU_COMMANDS.contains(&self),
            GAME_COMMANDS.contains(&self),
        ) {
            (true, true) => Surface::Both,
            (true, false) => Surface::Menu,
            // Every kind is in at least one table; the tests enforce it.
            (false, _) => Surface::Game,
        }
    }
}

/// Menu-phase (lobby) operations.
pub trait MenuHandler {
    fn on_ready(&mut self, _is_ready: bool) {}
    fn on_game_start(&mut self, _settings: &MatchSettings) {}
    fn on_connection_changed(&mut self, _player_number: PlayerNumber, _opponent_connected: bool) {
    }
    fn on_sync_ready_state(&mut self, _opponent_ready: bool) {}
    fn on_pong(&mut self, _original_timestamp_ms: u64) {}
    fn on_restart(&mut self) {}
}

/// Game-phase operations.
pub trait GameHandler {
    fn on_input(&mut self, _input: &InputCommand) {}
    fn on_attack(&mut self, _attacker: PlayerNumber, _pattern: AttackPattern) {}
    fn on_game_over(&mut self, _loser: PlayerNumber, _score: u64, _pending: &[AttackPattern]) {}
    fn on_game_result(&mut self, _is_winner: bool, _score: u64) {}
    fn on_pause(&mut self, _is_paused: bool) {}
    fn on_ping(&mut self, _timestamp_ms: u64) {}
    fn on_pong(&mut self, _original_timestamp_ms: u64) {}
    fn on_state_update(&mut self, _player_number: PlayerNumber, _score: u64, _level: u32, _lines: u32) {
    }
    fn on_snapshot(&mut self, _snapshot: &Snapshot) {}
    fn on_disconnect(&mut self, _reason: &str) {}
    fn on_game_start(&mut self, _settings: &MatchSettings) {}
    fn on_restart(&mut self) {}
    fn on_request_sync(&mut self) {}
}

/// Which handler sets a `dispatch` call reached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dispatched {
    pub menu: bool,
    pub game: bool,
}

impl Dispatched {
    pub fn any(self) -> bool {
        self.menu || self.game
    }
}

/// Route `command` to every supplied handler whose lookup table contains its
/// kind. Commands that reach no handler are logged at debug and dropped.
pub fn dispatch(
    command: &Command,
    menu: Option<&mut dyn MenuHandler>,
    game: Option<&mut dyn GameHandler>,
) -> Dispatched {
    let kind = command.kind();
    let mut result = Dispatched::default();

    if let Some(handler) = menu.filter(|_| MENU_COMMANDS.contains(&kind)) {
        dispatch_menu(command, handler);
        result.menu = true;
    }

    if let Some(handler) = game.filter(|_| GAME_COMMANDS.contains(&kind)) {
        dispatch_game(command, handler);
        result.game = true;
    }

    if !result.any() {
        debug!("no handler registered for {kind:?}, dropping");
    }
    result
}

fn dispatch_menu(command: &Command, handler: &mut dyn MenuHandler) {
    match command {
        Command::Ready { is_ready } => handler.on_ready(*is_ready),
        Command::GameStart { settings } => handler.on_game_start(settings),
        Command::ConnectionChanged {
            player_number,
            opponent_connected,
        } => handler.on_connection_changed(*player_number, *opponent_connected),
        Command::SyncReadyState { opponent_ready } => handler.on_sync_ready_state(*opponent_ready),
        Command::Pong {
            original_timestamp_ms,
        } => handler.on_pong(*original_timestamp_ms),
        Command::Restart => handler.on_restart(),
        _ => {}
    }
}

fn dispatch_game(command: &Command, handler: &mut dyn GameHandler) {
    match command {
        Command::Input(input) => handler.on_input(input),
        Command::Attack {
            player_number,
            pattern,
        } => handler.on_attack(*player_number, *pattern),
        Command::GameOver {
            player_number,
            score,
            pending_attacks,
        } => handler.on_game_over(*player_number, *score, pending_attacks),
        Command::GameResult { is_winner, score } => handler.on_game_result(*is_winner, *score),
        Command::Pause { is_paused } => handler.on_pause(*is_paused),
        Command::Ping { timestamp_ms } => handler.on_ping(*timestamp_ms),
        Command::Pong {
            original_timestamp_ms,
        } => handler.on_pong(*original_timestamp_ms),
        Command::StateUpdate {
            player_number,
            score,
            level,
            lines,
        } => handler.on_state_update(*player_number, *score, *level, *lines),
        Command::Snapshot(snapshot) => handler.on_snapshot(snapshot),
        Command::Disconnect { reason } => handler.on_disconnect(reason),
        Command::GameStart { settings } => handler.on_game_start(settings),
        Command::Restart => handler.on_restart(),
        Command::RequestSync => handler.on_request_sync(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::GameMode;

    const ALL_KINDS: [CommandKind; 16] = [
        CommandKind::Ready,
        CommandKind::GameStart,
        CommandKind::ConnectionChanged,
        CommandKind::SyncReadyState,
        CommandKind::Input,
        CommandKind::Attack,
        CommandKind::GameOver,
        CommandKind::GameResult,
        CommandKind::Pause,
        CommandKind::Ping,
        CommandKind::Pong,
        CommandKind::StateUpdate,
        CommandKind::Snapshot,
        CommandKind::Disconnect,
        CommandKind::Restart,
        CommandKind::RequestSync,
    ];

    #[derive(Default)]
    struct MenuLog(Vec<String>);

    impl MenuHandler for MenuLog {
        fn on_game_start(&mut self, settings: &MatchSettings) {
            self.0.push(format!("start {}", settings.player_number));
        }
        fn on_pong(&mut self, ts: u64) {
            self.0.push(format!("pong {ts}"));
        }
        fn on_sync_ready_state(&mut self, opponent_ready: bool) {
            self.0.push(format!("sync {opponent_ready}"));
        }
    }

    #[derive(Default)]
    struct GameLog(Vec<String>);

    impl GameHandler for GameLog {
        fn on_game_start(&mut self, settings: &MatchSettings) {
            self.0.push(format!("start {}", settings.player_number));
        }
        fn on_pong(&mut self, ts: u64) {
            self.0.push(format!("pong {ts}"));
        }
        fn on_pause(&mut self, is_paused: bool) {
            self.0.push(format!("pause {is_paused}"));
        }
    }

    #[test]
    fn every_kind_belongs_to_a_surface() {
        for kind in ALL_KINDS {
            assert!(
                MENU_COMMANDS.contains(&kind) || GAME_COMMANDS.contains(&kind),
                "{kind:?} is in neither handler set"
            );
        }
    }

    #[test]
    fn dual_commands_are_in_both_sets() {
        assert_eq!(CommandKind::GameStart.surface(), Surface::Both);
        assert_eq!(CommandKind::Pong.surface(), Surface::Both);
        assert_eq!(CommandKind::Restart.surface(), Surface::Both);
        assert_eq!(CommandKind::Ready.surface(), Surface::Menu);
        assert_eq!(CommandKind::Input.surface(), Surface::Game);
    }

    #[test]
    fn game_start_reaches_both_handlers() {
        let mut menu = MenuLog::default();
        let mut game = GameLog::default();
        let start = Command::GameStart {
            settings: MatchSettings {
                player_number: PlayerNumber::TWO,
                my_seed: 1,
                other_seed: 2,
                mode: GameMode::Classic,
            },
        };
        let reached = dispatch(&start, Some(&mut menu), Some(&mut game));
        assert_eq!(reached, Dispatched { menu: true, game: true });
        assert_eq!(menu.0, vec!["start P2"]);
        assert_eq!(game.0, vec!["start P2"]);
    }

    #[test]
    fn menu_only_command_skips_game_handler() {
        let mut menu = MenuLog::default();
        let mut game = GameLog::default();
        let reached = dispatch(
            &Command::SyncReadyState {
                opponent_ready: true,
            },
            Some(&mut menu),
            Some(&mut game),
        );
        assert_eq!(reached, Dispatched { menu: true, game: false });
        assert_eq!(menu.0, vec!["sync true"]);
        assert!(game.0.is_empty());
    }

    #[test]
    fn game_command_without_game_handler_is_dropped() {
        let mut menu = MenuLog::default();
        let reached = dispatch(&Command::Pause { is_paused: true }, Some(&mut menu), None);
        assert!(!reached.any());
        assert!(menu.0.is_empty());
    }

    #[test]
    fn pong_reaches_whichever_handler_is_present() {
        let mut game = GameLog::default();
        let reached = dispatch(
            &Command::Pong {
                original_timestamp_ms: 77,
            },
            None,
            Some(&mut game),
        );
        assert_eq!(reached, Dispatched { menu: false, game: true });
        assert_eq!(game.0, vec!["pong 77"]);
    }
}
