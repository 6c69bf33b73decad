// One duel participant: a relay `Channel` plus both handler surfaces.
//
// `DuelPeer` is what a game loop (or a test) drives. Each `update_at(now)`
// call:
//   1. drains every command the channel received since the last call,
//   2. dispatches each to the menu and game surfaces in arrival order,
//   3. advances the engine clock,
//   4. sends whatever commands the engine produced,
// and returns the engine events for rendering. Network threads never touch
// the engine; everything here runs on the caller's thread.

use log::info;
use thiserror::Error;

use blockduel_engine::{ApplyOutcome, EngineConfig, EngineEvent, SyncEngine};
use blockduel_protocol::{Action, Command, MenuHandler, PlayerNumber, dispatch};
use blockduel_relay::{Channel, ChannelConfig, ChannelError};

use crate::game::GameSide;
use crate::menu::MenuState;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("invalid engine config: {0}")]
    Config(#[from] blockduel_engine::ConfigError),
}

pub struct DuelPeer {
    channel: Channel,
    menu: MenuState,
    game: GameSide,
}

impl DuelPeer {
    pub fn new(engine: EngineConfig, channel: ChannelConfig) -> Result<Self, PeerError> {
        engine.validate()?;
        Ok(Self {
            channel: Channel::new(channel),
            menu: MenuState::default(),
            game: GameSide::new(engine),
        })
    }

    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), PeerError> {
        self.channel.connect(host, port)?;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.channel.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn rtt_ms(&self) -> Option<u64> {
        self.channel.rtt_ms()
    }

    pub fn menu(&self) -> &MenuState {
        &self.menu
    }

    pub fn game(&self) -> &GameSide {
        &self.game
    }

    pub fn engine(&self) -> Option<&SyncEngine> {
        self.game.engine()
    }

    pub fn engine_mut(&mut self) -> Option<&mut SyncEngine> {
        self.game.engine_mut()
    }

    pub fn local_player(&self) -> Option<PlayerNumber> {
        self.game.local_player()
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.menu.on_ready(ready);
        self.channel.send(Command::Ready { is_ready: ready });
    }

    /// Apply a local action; transmitted only if the engine accepted it.
    pub fn press(&mut self, action: Action, now_ms: u64) -> ApplyOutcome {
        let outcome = self.game.local_action(action, now_ms);
        self.flush();
        outcome
    }

    pub fn pause(&mut self, paused: bool, now_ms: u64) {
        self.game.local_pause(paused, now_ms);
        self.flush();
    }

    /// Ask the host for a snapshot of both boards.
    pub fn request_sync(&mut self) {
        self.channel.send(Command::RequestSync);
    }

    /// Back to the lobby after a match. The relay only honours it from
    /// player 1.
    pub fn restart(&mut self) {
        info!("requesting restart");
        self.channel.send(Command::Restart);
    }

    /// Process inbound commands, advance timers and send the results.
    pub fn update_at(&mut self, now_ms: u64) -> Vec<EngineEvent> {
        self.game.set_now(now_ms);
        for command in self.channel.poll() {
            dispatch(&command, Some(&mut self.menu), Some(&mut self.game));
        }
        self.game.tick(now_ms);
        self.flush();
        self.game.take_events()
    }

    fn flush(&mut self) {
        for command in self.game.take_outgoing() {
            self.channel.send(command);
        }
    }
}
