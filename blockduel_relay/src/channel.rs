// Client-side network channel to the relay.
//
// A `Channel` owns one TCP connection and three background threads:
// - **Receiver**: `read_command()` in a loop. Every decoded command goes into
//   an `mpsc` inbox that the simulation loop drains with `poll()`. A `Ping`
//   is answered with a `Pong` right here, without waiting for the simulation
//   loop; a `Pong` updates the published round-trip time and is forwarded.
// - **Sender**: pops the bounded `OutboundQueue` and writes frames, so
//   `send()` never blocks the caller on network I/O.
// - **Ping**: enqueues `Ping{timestamp_ms}` every `ping_interval_ms`.
//
// A frame that arrives intact but does not decode is logged and dropped.
// A framing or I/O failure is a disconnection: the channel is marked not
// connected, the outbound queue is closed (which ends the sender), the ping
// thread notices and exits, and a synthetic `Disconnect{reason}` is posted to
// the inbox so the simulation loop sees the loss through the same path as a
// relay-sent `Disconnect`. When the failure follows our own `disconnect()` it
// is expected noise and is only logged at debug level.
//
// Engine state is never touched from these threads.

use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use blockduel_protocol::{Command, read_command, write_command};

use crate::error::{ChannelError, ConfigError};
use crate::queue::{OutboundQueue, Pushed};

const RTT_UNKNOWN: u64 = u64::MAX;

/// How long `disconnect()` lets the sender drain before the socket is shut.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Wall-clock milliseconds since the Unix epoch, used for ping timestamps.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub ping_interval_ms: u64,
    /// Pending outbound commands before drop-oldest kicks in.
    pub outbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 2000,
            outbound_capacity: 256,
        }
    }
}

impl ChannelConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ChannelConfig = serde_json::from_str(json)?;
        if config.ping_interval_ms == 0 {
            return Err(ConfigError::Zero("ping_interval_ms"));
        }
        if config.outbound_capacity == 0 {
            return Err(ConfigError::Zero("outbound_capacity"));
        }
        Ok(config)
    }
}

/// State shared between the channel and its threads for one connection.
struct Shared {
    connected: AtomicBool,
    /// Set by `disconnect()` before the socket is shut down.
    closing: AtomicBool,
    rtt_ms: AtomicU64,
}

/// Threads and handles of the live (or most recently live) connection.
struct Link {
    stream: TcpStream,
    outbound: Arc<OutboundQueue<Command>>,
    shared: Arc<Shared>,
    ping_stop: Option<Sender<()>>,
    receiver: Option<JoinHandle<()>>,
    sender: Option<JoinHandle<()>>,
    pinger: Option<JoinHandle<()>>,
}

pub struct Channel {
    config: ChannelConfig,
    link: Option<Link>,
    /// Kept across disconnects so a final synthetic `Disconnect` can still be
    /// polled; replaced on the next `connect`.
    inbox: Option<Receiver<Command>>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl Channel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            link: None,
            inbox: None,
        }
    }

    /// Open the connection and start the receiver, sender and ping threads.
    /// Does nothing if already connected.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), ChannelError> {
        if self.is_connected() {
            debug!("connect({host}:{port}) ignored, already connected");
            return Ok(());
        }
        // Reap the threads of a previous connection that failed on its own.
        self.teardown();

        let stream = TcpStream::connect((host, port)).map_err(|source| ChannelError::Connect {
            addr: format!("{host}:{port}"),
            source,
        })?;
        stream.set_nodelay(true).ok();
        let read_half = stream.try_clone()?;
        let write_half = stream.try_clone()?;

        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            rtt_ms: AtomicU64::new(RTT_UNKNOWN),
        });
        let outbound = Arc::new(OutboundQueue::new(self.config.outbound_capacity));
        let (inbox_tx, inbox_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();

        let receiver = {
            let outbound = outbound.clone();
            let shared = shared.clone();
            thread::spawn(move || {
                receiver_loop(BufReader::new(read_half), inbox_tx, outbound, shared);
            })
        };
        let sender = {
            let outbound = outbound.clone();
            thread::spawn(move || sender_loop(BufWriter::new(write_half), outbound))
        };
        let pinger = {
            let outbound = outbound.clone();
            let shared = shared.clone();
            let interval = Duration::from_millis(self.config.ping_interval_ms.max(1));
            thread::spawn(move || ping_loop(outbound, shared, stop_rx, interval))
        };

        info!("connected to relay at {host}:{port}");
        self.inbox = Some(inbox_rx);
        self.link = Some(Link {
            stream,
            outbound,
            shared,
            ping_stop: Some(stop_tx),
            receiver: Some(receiver),
            sender: Some(sender),
            pinger: Some(pinger),
        });
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.shared.connected.load(Ordering::SeqCst))
    }

    /// Queue a command for sending. Logged and dropped when not connected.
    pub fn send(&self, command: Command) {
        let Some(link) = self.link.as_ref().filter(|_| self.is_connected()) else {
            warn!("not connected, dropping outgoing {:?}", command.kind());
            return;
        };
        if link.outbound.push(command) == Pushed::Closed {
            warn!("connection closing, outgoing command dropped");
        }
    }

    /// Drain every command received since the last call.
    pub fn poll(&self) -> Vec<Command> {
        let mut commands = Vec::new();
        if let Some(inbox) = &self.inbox {
            while let Ok(command) = inbox.try_recv() {
                commands.push(command);
            }
        }
        commands
    }

    /// Last measured round-trip time, if a `Pong` has arrived yet.
    pub fn rtt_ms(&self) -> Option<u64> {
        self.link
            .as_ref()
            .map(|link| link.shared.rtt_ms.load(Ordering::SeqCst))
            .filter(|&rtt| rtt != RTT_UNKNOWN)
    }

    /// Outbound commands discarded by drop-oldest on this connection.
    pub fn dropped(&self) -> u64 {
        self.link.as_ref().map_or(0, |link| link.outbound.dropped())
    }

    /// Send a best-effort `Disconnect`, shut the socket and join all threads.
    pub fn disconnect(&mut self) {
        if let Some(link) = &self.link {
            link.shared.closing.store(true, Ordering::SeqCst);
            if link.shared.connected.swap(false, Ordering::SeqCst) {
                link.outbound.push(Command::Disconnect {
                    reason: "client disconnect".into(),
                });
                info!("disconnecting from relay");
            }
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        link.shared.closing.store(true, Ordering::SeqCst);
        link.shared.connected.store(false, Ordering::SeqCst);
        link.outbound.close();
        link.ping_stop = None;
        // The sender gets a short grace period to drain what is queued
        // (including our `Disconnect`). The socket is shut before any join,
        // which also unblocks a sender stuck writing to a peer that stopped
        // reading.
        let sender = link.sender.take();
        let deadline = Instant::now() + DRAIN_GRACE;
        while sender.as_ref().is_some_and(|h| !h.is_finished()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        link.stream.shutdown(Shutdown::Both).ok();
        for handle in [sender, link.receiver.take(), link.pinger.take()]
            .into_iter()
            .flatten()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn receiver_loop(
    mut reader: BufReader<TcpStream>,
    inbox: Sender<Command>,
    outbound: Arc<OutboundQueue<Command>>,
    shared: Arc<Shared>,
) {
    loop {
        match read_command(&mut reader) {
            Ok(Command::Ping { timestamp_ms }) => {
                outbound.push(Command::Pong {
                    original_timestamp_ms: timestamp_ms,
                });
            }
            Ok(command) => {
                if let Command::Pong {
                    original_timestamp_ms,
                } = command
                {
                    let rtt = now_ms().saturating_sub(original_timestamp_ms);
                    shared.rtt_ms.store(rtt, Ordering::SeqCst);
                }
                if inbox.send(command).is_err() {
                    break; // Channel dropped its receiver.
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!("dropping undecodable frame from relay: {e}");
            }
            Err(e) => {
                shared.connected.store(false, Ordering::SeqCst);
                outbound.close();
                if shared.closing.load(Ordering::SeqCst) {
                    debug!("receiver stopped after disconnect: {e}");
                } else {
                    warn!("connection to relay lost: {e}");
                    let _ = inbox.send(Command::Disconnect {
                        reason: format!("connection lost: {e}"),
                    });
                }
                break;
            }
        }
    }
}

fn sender_loop(mut writer: BufWriter<TcpStream>, outbound: Arc<OutboundQueue<Command>>) {
    while let Some(command) = outbound.pop_blocking() {
        match write_command(&mut writer, &command) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                warn!("skipping unencodable {:?}: {e}", command.kind());
            }
            Err(e) => {
                debug!("sender stopped: {e}");
                break;
            }
        }
    }
}

fn ping_loop(
    outbound: Arc<OutboundQueue<Command>>,
    shared: Arc<Shared>,
    stop: Receiver<()>,
    interval: Duration,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                if !shared.connected.load(Ordering::SeqCst) {
                    break;
                }
                let ping = Command::Ping {
                    timestamp_ms: now_ms(),
                };
                if outbound.push(ping) == Pushed::Closed {
                    break;
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
