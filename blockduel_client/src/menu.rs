// Lobby-side view of the relay handshake.
//
// `MenuState` is the peer's menu-surface handler: it tracks which slot the
// relay gave us, whether an opponent is connected and ready, and the
// settings of the match the relay most recently started. It holds no engine
// state; `GameSide` builds the engine from the same `GameStart`.

use log::info;

use blockduel_protocol::{MatchSettings, MenuHandler, PlayerNumber};

#[derive(Debug, Default)]
pub struct MenuState {
    player_number: Option<PlayerNumber>,
    opponent_connected: bool,
    opponent_ready: bool,
    ready: bool,
    settings: Option<MatchSettings>,
    last_pong_ms: Option<u64>,
}

impl MenuState {
    /// Our slot, once the relay has told us.
    pub fn player_number(&self) -> Option<PlayerNumber> {
        self.player_number
    }

    pub fn opponent_connected(&self) -> bool {
        self.opponent_connected
    }

    pub fn opponent_ready(&self) -> bool {
        self.opponent_ready
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Settings of the current match, cleared on restart.
    pub fn settings(&self) -> Option<&MatchSettings> {
        self.settings.as_ref()
    }

    pub fn in_match(&self) -> bool {
        self.settings.is_some()
    }

    pub fn last_pong_ms(&self) -> Option<u64> {
        self.last_pong_ms
    }
}

impl MenuHandler for MenuState {
    fn on_ready(&mut self, is_ready: bool) {
        self.ready = is_ready;
    }

    fn on_game_start(&mut self, settings: &MatchSettings) {
        info!("match started as {}", settings.player_number);
        self.player_number = Some(settings.player_number);
        self.ready = false;
        self.opponent_ready = false;
        self.settings = Some(settings.clone());
    }

    fn on_connection_changed(&mut self, player_number: PlayerNumber, opponent_connected: bool) {
        self.player_number = Some(player_number);
        self.opponent_connected = opponent_connected;
        if !opponent_connected {
            self.opponent_ready = false;
        }
    }

    fn on_sync_ready_state(&mut self, opponent_ready: bool) {
        self.opponent_ready = opponent_ready;
    }

    fn on_pong(&mut self, original_timestamp_ms: u64) {
        self.last_pong_ms = Some(original_timestamp_ms);
    }

    fn on_restart(&mut self) {
        self.ready = false;
        self.opponent_ready = false;
        self.settings = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockduel_protocol::{Command, GameMode, dispatch};

    #[test]
    fn handshake_updates_lobby_state() {
        let mut menu = MenuState::default();
        dispatch(
            &Command::ConnectionChanged {
                player_number: PlayerNumber::TWO,
                opponent_connected: true,
            },
            Some(&mut menu),
            None,
        );
        dispatch(
            &Command::SyncReadyState {
                opponent_ready: true,
            },
            Some(&mut menu),
            None,
        );
        assert_eq!(menu.player_number(), Some(PlayerNumber::TWO));
        assert!(menu.opponent_connected());
        assert!(menu.opponent_ready());

        dispatch(
            &Command::ConnectionChanged {
                player_number: PlayerNumber::TWO,
                opponent_connected: false,
            },
            Some(&mut menu),
            None,
        );
        assert!(!menu.opponent_ready());
    }

    #[test]
    fn game_start_then_restart() {
        let mut menu = MenuState::default();
        menu.on_ready(true);
        let settings = MatchSettings {
            player_number: PlayerNumber::ONE,
            my_seed: 1,
            other_seed: 2,
            mode: GameMode::Classic,
        };
        dispatch(&Command::GameStart { settings }, Some(&mut menu), None);
        assert!(menu.in_match());
        assert!(!menu.is_ready());

        dispatch(&Command::Restart, Some(&mut menu), None);
        assert!(!menu.in_match());
    }
}
