// Match state for the relay.
//
// `Session` is the central data structure that `server.rs` drives: the two
// player slots, their ready flags and last reported scores, the match phase,
// and the relay-assigned input sequence. All mutation happens through
// methods called from the server's single event-loop thread, so there is no
// internal locking.
//
// Key responsibilities:
// - Admission: slot 1 if empty, else slot 2, else `AdmitError::Full`. When
//   both slots are filled, both peers get `ConnectionChanged` and
//   `SyncReadyState`. A slot is bound once: after its peer leaves it stays
//   empty for the rest of the session (`AdmitError::Vacated`).
// - Lobby handshake: `Ready` flags, and on both-ready exactly one `GameStart`
//   per slot carrying cross-assigned seeds drawn from the relay's RNG.
// - Relay: `Input` is stamped with the next `GlobalSeq`, then forwarded along
//   with `Pause`, `Attack`, `StateUpdate` and `RequestSync` to the other slot.
//   `Snapshot` goes to both slots so both peers apply identical state.
// - End of match: `GameOver` is broadcast and followed by a `GameResult` per
//   slot. A peer leaving mid-match makes the remaining peer the winner.
//   Inputs keep flowing until `Restart`, so moves made before a peer learned
//   of the result still reach its opponent's mirror.
//
// The relay never simulates. Scores in `GameResult` are whatever the peers
// last reported through `StateUpdate` and `GameOver`.
//
// Writing to peers: each slot holds the `OutboundQueue` its connection's
// writer thread drains, so `send_to` / `broadcast` never block the event
// loop on a slow socket.

use std::sync::Arc;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use blockduel_protocol::{
    AttackPattern, Command, GameMode, GlobalSeq, MatchSettings, PlayerNumber,
};

use crate::error::AdmitError;
use crate::queue::OutboundQueue;

/// Identifies one accepted TCP connection for the lifetime of the relay.
pub type ConnectionId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchPhase {
    Lobby,
    Playing,
    Ended,
}

struct Slot {
    conn: ConnectionId,
    outbound: Arc<OutboundQueue<Command>>,
    ready: bool,
    last_score: u64,
}

pub struct Session {
    slots: [Option<Slot>; 2],
    /// Slots whose peer has left. Never reassigned.
    vacated: [bool; 2],
    phase: MatchPhase,
    mode: GameMode,
    next_global_seq: GlobalSeq,
    rng: StdRng,
}

impl Session {
    /// `seed` makes the match seeds reproducible; `None` draws from entropy.
    pub fn new(mode: GameMode, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            slots: [None, None],
            vacated: [false, false],
            phase: MatchPhase::Lobby,
            mode,
            next_global_seq: GlobalSeq::default(),
            rng,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn player_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_ready(&self, player: PlayerNumber) -> bool {
        self.slot(player).is_some_and(|slot| slot.ready)
    }

    pub fn slot_of(&self, conn: ConnectionId) -> Option<PlayerNumber> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.conn == conn))
            .and_then(PlayerNumber::from_index)
    }

    fn slot(&self, player: PlayerNumber) -> Option<&Slot> {
        self.slots[player.index()].as_ref()
    }

    fn slot_mut(&mut self, player: PlayerNumber) -> Option<&mut Slot> {
        self.slots[player.index()].as_mut()
    }

    /// Bind a new connection to the first slot that has never been bound.
    pub fn admit(
        &mut self,
        conn: ConnectionId,
        outbound: Arc<OutboundQueue<Command>>,
    ) -> Result<PlayerNumber, AdmitError> {
        let open = (0..self.slots.len())
            .find(|&i| self.slots[i].is_none() && !self.vacated[i]);
        let Some(index) = open else {
            return Err(if self.vacated.contains(&true) {
                AdmitError::Vacated
            } else {
                AdmitError::Full
            });
        };
        let player = PlayerNumber::from_index(index).ok_or(AdmitError::Full)?;
        self.slots[index] = Some(Slot {
            conn,
            outbound,
            ready: false,
            last_score: 0,
        });
        info!("connection {conn} joined as {player}");

        if self.player_count() == 2 {
            for p in PlayerNumber::BOTH {
                self.send_to(
                    p,
                    Command::ConnectionChanged {
                        player_number: p,
                        opponent_connected: true,
                    },
                );
                let opponent_ready = self.is_ready(p.other());
                self.send_to(p, Command::SyncReadyState { opponent_ready });
            }
        } else {
            self.send_to(
                player,
                Command::ConnectionChanged {
                    player_number: player,
                    opponent_connected: false,
                },
            );
        }
        Ok(player)
    }

    /// Unbind `player`'s slot for good and tell the remaining peer. During a
    /// match the remaining peer wins and the match ends. Returns the
    /// connection that was bound to the slot.
    pub fn remove(&mut self, player: PlayerNumber, reason: &str) -> Option<ConnectionId> {
        let slot = self.slots[player.index()].take()?;
        self.vacated[player.index()] = true;
        slot.outbound.close();
        info!("{player} left ({reason})");

        let remaining = player.other();
        if let Some(other) = self.slot_mut(remaining) {
            other.ready = false;
            let score = other.last_score;
            self.send_to(
                remaining,
                Command::Disconnect {
                    reason: reason.to_string(),
                },
            );
            self.send_to(
                remaining,
                Command::ConnectionChanged {
                    player_number: remaining,
                    opponent_connected: false,
                },
            );
            if self.phase == MatchPhase::Playing {
                self.send_to(
                    remaining,
                    Command::GameResult {
                        is_winner: true,
                        score,
                    },
                );
            }
        }
        if self.phase == MatchPhase::Playing {
            self.phase = MatchPhase::Ended;
        }
        Some(slot.conn)
    }

    /// Handle one command from `from`.
    pub fn handle(&mut self, from: PlayerNumber, command: Command) {
        if self.slot(from).is_none() {
            debug!("command from empty slot {from}, ignoring");
            return;
        }
        match command {
            Command::Ready { is_ready } => self.set_ready(from, is_ready),
            Command::Input(mut input) => {
                if self.phase == MatchPhase::Lobby {
                    debug!("input from {from} outside a match, dropping");
                    return;
                }
                if input.player_number != from {
                    warn!(
                        "{from} sent input for {}, dropping",
                        input.player_number
                    );
                    return;
                }
                input.global_seq = Some(self.next_global_seq);
                self.next_global_seq = self.next_global_seq.next();
                self.relay_to_other(from, Command::Input(input));
            }
            Command::StateUpdate {
                player_number,
                score,
                level,
                lines,
            } => {
                if let Some(slot) = self.slot_mut(from) {
                    slot.last_score = score;
                }
                self.relay_to_other(
                    from,
                    Command::StateUpdate {
                        player_number,
                        score,
                        level,
                        lines,
                    },
                );
            }
            command @ (Command::Pause { .. } | Command::Attack { .. } | Command::RequestSync) => {
                self.relay_to_other(from, command);
            }
            command @ Command::Snapshot(_) => self.broadcast(&command),
            Command::GameOver {
                player_number,
                score,
                pending_attacks,
            } => {
                if player_number != from {
                    warn!("{from} reported game over for {player_number}, ignoring");
                    return;
                }
                self.end_match(from, score, pending_attacks);
            }
            Command::Restart => self.restart(from),
            Command::Ping { timestamp_ms } => self.send_to(
                from,
                Command::Pong {
                    original_timestamp_ms: timestamp_ms,
                },
            ),
            Command::Disconnect { reason } => {
                self.remove(from, &reason);
            }
            Command::Pong { .. } => {}
            other @ (Command::GameStart { .. }
            | Command::ConnectionChanged { .. }
            | Command::SyncReadyState { .. }
            | Command::GameResult { .. }) => {
                warn!("{from} sent relay-only {:?}, ignoring", other.kind());
            }
        }
    }

    fn set_ready(&mut self, from: PlayerNumber, is_ready: bool) {
        if self.phase == MatchPhase::Playing {
            debug!("{from} sent Ready during a match, ignoring");
            return;
        }
        if let Some(slot) = self.slot_mut(from) {
            slot.ready = is_ready;
        }
        self.relay_to_other(
            from,
            Command::SyncReadyState {
                opponent_ready: is_ready,
            },
        );
        if PlayerNumber::BOTH.iter().all(|&p| self.is_ready(p)) {
            self.start_match();
        }
    }

    fn start_match(&mut self) {
        let first: u64 = self.rng.r#gen();
        let mut second: u64 = self.rng.r#gen();
        while second == first {
            second = self.rng.r#gen();
        }
        let seeds = [first, second];

        self.phase = MatchPhase::Playing;
        self.next_global_seq = GlobalSeq::default();
        for slot in self.slots.iter_mut().flatten() {
            slot.ready = false;
            slot.last_score = 0;
        }
        info!("match starting ({:?})", self.mode);

        for player in PlayerNumber::BOTH {
            let settings = MatchSettings {
                player_number: player,
                my_seed: seeds[player.index()],
                other_seed: seeds[player.other().index()],
                mode: self.mode,
            };
            self.send_to(player, Command::GameStart { settings });
        }
    }

    fn end_match(
        &mut self,
        loser: PlayerNumber,
        score: u64,
        pending_attacks: Vec<AttackPattern>,
    ) {
        if self.phase != MatchPhase::Playing {
            debug!("GameOver for {loser} outside a match, ignoring");
            return;
        }
        self.phase = MatchPhase::Ended;
        if let Some(slot) = self.slot_mut(loser) {
            slot.last_score = score;
        }
        info!("match over, {loser} topped out with {score}");

        self.broadcast(&Command::GameOver {
            player_number: loser,
            score,
            pending_attacks,
        });
        for player in PlayerNumber::BOTH {
            let score = self.slot(player).map_or(0, |slot| slot.last_score);
            self.send_to(
                player,
                Command::GameResult {
                    is_winner: player != loser,
                    score,
                },
            );
        }
    }

    fn restart(&mut self, from: PlayerNumber) {
        if from != PlayerNumber::ONE {
            warn!("Restart from {from} ignored, only {} may restart", PlayerNumber::ONE);
            return;
        }
        if self.phase == MatchPhase::Playing {
            warn!("Restart during an active match ignored");
            return;
        }
        self.phase = MatchPhase::Lobby;
        for slot in self.slots.iter_mut().flatten() {
            slot.ready = false;
        }
        self.broadcast(&Command::Restart);
    }

    pub fn send_to(&self, player: PlayerNumber, command: Command) {
        if let Some(slot) = self.slot(player) {
            slot.outbound.push(command);
        }
    }

    pub fn relay_to_other(&self, sender: PlayerNumber, command: Command) {
        self.send_to(sender.other(), command);
    }

    pub fn broadcast(&self, command: &Command) {
        for slot in self.slots.iter().flatten() {
            slot.outbound.push(command.clone());
        }
    }

    /// Close every slot's queue. Used on relay shutdown.
    pub fn close_all(&mut self) {
        for slot in self.slots.iter().flatten() {
            slot.outbound.close();
        }
    }
}
