// CLI entry point for the Block Duel relay.
//
// Starts a standalone relay that two peers connect to. The relay pairs them,
// hands out match seeds and forwards their commands; it never runs the game.
// See `server.rs` for the networking architecture and `session.rs` for the
// match state.
//
// Logging goes through `env_logger`; set `RUST_LOG` (default `info`).

use clap::Parser;
use log::error;

use blockduel_protocol::GameMode;
use blockduel_relay::{RelayConfig, start_relay};

#[derive(Parser, Debug)]
#[command(name = "relay", about = "Block Duel two-player relay")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Listen port.
    #[arg(long, default_value_t = 12345)]
    port: u16,

    /// Pending commands per connection before the oldest is dropped.
    #[arg(long, default_value_t = 256)]
    outbound_capacity: usize,

    /// Rule set announced in GameStart.
    #[arg(long, value_enum, default_value_t = GameMode::Classic)]
    mode: GameMode,

    /// Fixed seed for match seeds (reproducible sessions).
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = RelayConfig {
        host: args.host,
        port: args.port,
        outbound_capacity: args.outbound_capacity.max(1),
        mode: args.mode,
        seed: args.seed,
    };

    let (handle, addr) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            error!("failed to start relay: {e}");
            std::process::exit(1);
        }
    };

    println!("Relay listening on {addr}");
    println!("Press Ctrl+C to stop.");

    // The process exits on SIGINT/SIGTERM; the relay threads go with it.
    handle.wait();
}
