//! Command-line entry point for the relay (`SPEC_FULL.md` §6.4).

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use tcp_relay::{parse_host_port, Mode, RelayConfig, RelayEngine};

#[derive(Parser, Debug)]
#[command(name = "tcp-relay", about = "A configurable one-way TCP relay")]
struct Args {
    /// Upstream address, `host:port`.
    src: String,

    /// Downstream address, `host:port`.
    dst: String,

    /// Which side actively connects vs. passively listens.
    #[arg(long, value_enum, default_value_t = Mode::ConnectListen)]
    mode: Mode,

    /// Log every forwarded buffer's contents.
    #[arg(long)]
    dump: bool,

    /// Seconds to wait between reconnect attempts.
    #[arg(long, default_value_t = tcp_relay::DEFAULT_RETRY_SECS)]
    retry: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Args::parse();

    let (upstream_host, upstream_port) = match parse_host_port(&args.src) {
        Ok(hp) => hp,
        Err(e) => {
            eprintln!("invalid src address: {e}");
            return ExitCode::FAILURE;
        }
    };
    let (downstream_host, downstream_port) = match parse_host_port(&args.dst) {
        Ok(hp) => hp,
        Err(e) => {
            eprintln!("invalid dst address: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = RelayConfig::new(
        upstream_host,
        upstream_port,
        downstream_host,
        downstream_port,
        args.mode,
        args.dump,
        Duration::from_secs(args.retry),
    );

    let engine = Arc::new(RelayEngine::new(config));
    install_signal_watcher(Arc::clone(&engine));

    match engine.start() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Watch SIGINT/SIGTERM on a dedicated thread and call `stop()` on receipt.
/// `signal-hook`'s iterator API blocks a thread rather than requiring an
/// async runtime, matching this binary's plain-thread shape.
fn install_signal_watcher(engine: Arc<RelayEngine>) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            eprintln!("warning: could not install signal handler: {e}");
            return;
        }
    };

    std::thread::spawn(move || {
        for _ in signals.forever() {
            engine.stop();
            break;
        }
    });
}
