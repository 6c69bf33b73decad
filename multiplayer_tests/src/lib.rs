// Test-only peer harness for multiplayer integration tests.
//
// Wraps the real `DuelPeer` (channel + engine + handler surfaces) with a
// test-controlled clock and synchronous polling helpers, to exercise the full
// pipeline: peer -> relay -> peer -> engine -> identical boards.
//
// The only test-specific code here is the virtual clock and the blocking
// loops around `DuelPeer::update_at()`. All networking, dispatch and engine
// logic uses the same code paths as a real game loop.
//
// See also: `tests/full_pipeline.rs` for the scenarios.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use blockduel_client::DuelPeer;
use blockduel_engine::{ApplyOutcome, EngineConfig, EngineEvent, SyncEngine};
use blockduel_protocol::{Action, PlayerNumber};
use blockduel_relay::{ChannelConfig, RelayConfig, RelayHandle, start_relay};

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Engine config shared by every test peer. Gravity is pushed far out so
/// pieces only move when a test says so; flash timing stays at the defaults.
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        gravity_base_ms: 3_600_000,
        gravity_min_ms: 3_600_000,
        ..EngineConfig::default()
    }
}

/// Engine config for matches that run on their own: pieces fall every few
/// virtual frames, so a match tops out within a few hundred pieces' worth of
/// ticks.
pub fn fast_gravity_config() -> EngineConfig {
    EngineConfig {
        gravity_base_ms: 48,
        gravity_min_ms: 48,
        ..EngineConfig::default()
    }
}

/// Start a relay on a random port with a fixed match-seed RNG.
pub fn start_test_relay() -> (RelayHandle, SocketAddr) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (handle, addr) = start_relay(RelayConfig {
        port: 0,
        seed: Some(0xB10C),
        ..RelayConfig::default()
    })
    .expect("start_relay failed");
    thread::sleep(Duration::from_millis(50));
    (handle, addr)
}

/// A real `DuelPeer` driven by a virtual clock.
pub struct TestPeer {
    pub peer: DuelPeer,
    pub now_ms: u64,
}

impl TestPeer {
    pub fn connect(addr: SocketAddr) -> Self {
        Self::connect_with(addr, test_engine_config())
    }

    pub fn connect_with(addr: SocketAddr, config: EngineConfig) -> Self {
        let mut peer = DuelPeer::new(config, ChannelConfig::default())
            .expect("test engine config is valid");
        peer.connect("127.0.0.1", addr.port())
            .expect("TestPeer::connect failed");
        Self { peer, now_ms: 0 }
    }

    /// Process inbound commands at the current virtual time.
    pub fn update(&mut self) -> Vec<EngineEvent> {
        self.peer.update_at(self.now_ms)
    }

    /// Move the virtual clock forward and update.
    pub fn advance(&mut self, ms: u64) -> Vec<EngineEvent> {
        self.now_ms += ms;
        self.update()
    }

    /// Blocking poll until `condition` holds. The virtual clock does not move.
    pub fn update_until<F: FnMut(&DuelPeer) -> bool>(&mut self, what: &str, mut condition: F) {
        let start = Instant::now();
        loop {
            self.update();
            if condition(&self.peer) {
                return;
            }
            assert!(start.elapsed() < POLL_TIMEOUT, "timed out waiting for {what}");
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn press(&mut self, action: Action) -> ApplyOutcome {
        self.peer.press(action, self.now_ms)
    }

    pub fn engine(&self) -> &SyncEngine {
        self.peer.engine().expect("no match in progress")
    }

    pub fn engine_mut(&mut self) -> &mut SyncEngine {
        self.peer.engine_mut().expect("no match in progress")
    }

    pub fn local(&self) -> PlayerNumber {
        self.peer.local_player().expect("no match in progress")
    }
}

/// Connect host then guest, wait for the join handshake.
pub fn connect_pair(addr: SocketAddr) -> (TestPeer, TestPeer) {
    connect_pair_with(addr, test_engine_config())
}

/// `connect_pair` with both peers running `config`.
pub fn connect_pair_with(addr: SocketAddr, config: EngineConfig) -> (TestPeer, TestPeer) {
    let mut host = TestPeer::connect_with(addr, config.clone());
    host.update_until("host slot", |p| {
        p.menu().player_number() == Some(PlayerNumber::ONE)
    });
    let mut guest = TestPeer::connect_with(addr, config);
    guest.update_until("guest handshake", |p| p.menu().opponent_connected());
    host.update_until("host handshake", |p| p.menu().opponent_connected());
    (host, guest)
}

/// Ready both peers and wait until both engines exist.
pub fn start_match(host: &mut TestPeer, guest: &mut TestPeer) {
    host.peer.set_ready(true);
    guest.update_until("opponent ready", |p| p.menu().opponent_ready());
    guest.peer.set_ready(true);
    host.update_until("host GameStart", |p| p.engine().is_some());
    guest.update_until("guest GameStart", |p| p.engine().is_some());
}
