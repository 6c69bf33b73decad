// TCP server and main event loop for the relay.
//
// Architecture: thread-per-reader and thread-per-writer with a central `mpsc`
// channel.
//
// - **Listener thread**: polls a non-blocking `TcpListener` and hands each
//   accepted socket to the main thread as `InternalEvent::NewConnection`.
// - **Reader threads** (one per connection): call `read_command()` in a loop
//   and send `InternalEvent::CommandFrom` to the main thread. Frames that
//   arrive whole but fail to decode are logged and skipped; a framing or I/O
//   error sends `InternalEvent::Disconnected` and ends the thread.
// - **Writer threads** (one per connection): drain that connection's
//   `OutboundQueue` and write frames. They exit when the queue is closed.
// - **Main thread**: owns the `Session` and the connection table, receives
//   events from the channel and dispatches them. The slot table is only ever
//   touched here.
//
// A third connection is closed immediately without affecting the match.
//
// `RelayHandle::stop` clears `keep_running`; the main thread notices within
// one receive timeout, then closes every queue and socket so the
// per-connection threads unwind.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use blockduel_protocol::{Command, GameMode, read_command, write_command};

use crate::error::ConfigError;
use crate::queue::OutboundQueue;
use crate::session::{ConnectionId, Session};

/// Everything the network threads report to the session thread.
enum InternalEvent {
    NewConnection {
        stream: TcpStream,
    },
    CommandFrom {
        conn: ConnectionId,
        command: Command,
    },
    Disconnected {
        conn: ConnectionId,
    },
}

/// Owner of a running relay.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Ask the relay to shut down and join its main thread.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Block until the relay's main loop exits.
    pub fn wait(mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Relay settings, loadable from JSON or built from CLI flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Pending commands per connection before drop-oldest kicks in.
    pub outbound_capacity: usize,
    pub mode: GameMode,
    /// Fixed seed for the match-seed RNG. `None` uses OS entropy.
    pub seed: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 12345,
            outbound_capacity: 256,
            mode: GameMode::Classic,
            seed: None,
        }
    }
}

impl RelayConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = serde_json::from_str(json)?;
        if config.outbound_capacity == 0 {
            return Err(ConfigError::Zero("outbound_capacity"));
        }
        Ok(config)
    }
}

/// Bind the listener and run the relay on its own thread. The returned
/// address is the one actually bound, so `port: 0` works for tests.
pub fn start_relay(config: RelayConfig) -> std::io::Result<(RelayHandle, SocketAddr)> {
    let listener = TcpListener::bind((config.host.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();
    info!("relay listening on {addr}");

    let thread = thread::spawn(move || {
        run_relay(listener, config, keep_running_clone);
    });

    Ok((
        RelayHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Everything the main thread owns besides the session.
struct Connections {
    streams: BTreeMap<ConnectionId, TcpStream>,
    next_id: ConnectionId,
    outbound_capacity: usize,
}

/// Session thread: owns the `Session` until `keep_running` goes false.
fn run_relay(listener: TcpListener, config: RelayConfig, keep_running: Arc<AtomicBool>) {
    let mut session = Session::new(config.mode, config.seed);
    let mut conns = Connections {
        streams: BTreeMap::new(),
        next_id: 1,
        outbound_capacity: config.outbound_capacity,
    };

    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    // Non-blocking so the accept thread can check keep_running periodically.
    listener.set_nonblocking(true).ok();

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false).ok();
                    let _ = tx_listener.send(InternalEvent::NewConnection { stream });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!("listener failed: {e}");
                    break;
                }
            }
        }
    });

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                handle_event(&mut session, &mut conns, event, &tx);
                // Take whatever queued up meanwhile before blocking again.
                while let Ok(event) = rx.try_recv() {
                    handle_event(&mut session, &mut conns, event, &tx);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("relay shutting down");
    session.close_all();
    for stream in conns.streams.values() {
        stream.shutdown(Shutdown::Both).ok();
    }
}

/// Apply one event, then release sockets the session let go of.
fn handle_event(
    session: &mut Session,
    conns: &mut Connections,
    event: InternalEvent,
    tx: &Sender<InternalEvent>,
) {
    match event {
        InternalEvent::NewConnection { stream } => {
            handle_new_connection(session, conns, stream, tx);
        }
        InternalEvent::CommandFrom { conn, command } => match session.slot_of(conn) {
            Some(player) => session.handle(player, command),
            None => debug!("command from unbound connection {conn}, ignoring"),
        },
        InternalEvent::Disconnected { conn } => {
            if let Some(player) = session.slot_of(conn) {
                session.remove(player, "connection lost");
            }
        }
    }
    close_unbound(session, conns);
}

/// Shut down sockets whose slot the session has released (after a
/// `Disconnect` command or a read failure).
fn close_unbound(session: &Session, conns: &mut Connections) {
    let released: Vec<ConnectionId> = conns
        .streams
        .keys()
        .copied()
        .filter(|&conn| session.slot_of(conn).is_none())
        .collect();
    for conn in released {
        if let Some(stream) = conns.streams.remove(&conn) {
            debug!("closing connection {conn}");
            stream.shutdown(Shutdown::Both).ok();
        }
    }
}

/// Bind a new connection to a slot and spawn its reader and writer threads,
/// or close it if both slots are taken.
fn handle_new_connection(
    session: &mut Session,
    conns: &mut Connections,
    stream: TcpStream,
    tx: &Sender<InternalEvent>,
) {
    let conn = conns.next_id;
    conns.next_id += 1;
    stream.set_nodelay(true).ok();

    let (read_half, write_half) = match (stream.try_clone(), stream.try_clone()) {
        (Ok(r), Ok(w)) => (r, w),
        (Err(e), _) | (_, Err(e)) => {
            warn!("failed to set up connection {conn}: {e}");
            return;
        }
    };

    let outbound = Arc::new(OutboundQueue::new(conns.outbound_capacity));
    match session.admit(conn, outbound.clone()) {
        Ok(_player) => {
            thread::spawn(move || writer_loop(BufWriter::new(write_half), conn, outbound));
            let tx_reader = tx.clone();
            thread::spawn(move || reader_loop(BufReader::new(read_half), conn, tx_reader));
            conns.streams.insert(conn, stream);
        }
        Err(e) => {
            warn!("rejecting connection {conn}: {e}");
            stream.shutdown(Shutdown::Both).ok();
        }
    }
}

/// Reader loop for a single connection. Runs in its own thread.
fn reader_loop(mut reader: BufReader<TcpStream>, conn: ConnectionId, tx: Sender<InternalEvent>) {
    loop {
        match read_command(&mut reader) {
            Ok(command) => {
                if tx.send(InternalEvent::CommandFrom { conn, command }).is_err() {
                    break; // Relay stopped.
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!("dropping undecodable frame from connection {conn}: {e}");
            }
            Err(e) => {
                debug!("connection {conn} read ended: {e}");
                let _ = tx.send(InternalEvent::Disconnected { conn });
                break;
            }
        }
    }
}

/// Writer loop for a single connection. Runs until the queue is closed or a
/// write fails; the reader notices a dead socket on its own.
fn writer_loop(
    mut writer: BufWriter<TcpStream>,
    conn: ConnectionId,
    outbound: Arc<OutboundQueue<Command>>,
) {
    while let Some(command) = outbound.pop_blocking() {
        if let Err(e) = write_command(&mut writer, &command) {
            debug!("connection {conn} write failed: {e}");
            outbound.close();
            break;
        }
    }
}
