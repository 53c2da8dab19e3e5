//! End-to-end scenarios exercising the relay engine over real loopback
//! sockets, corresponding to the numbered scenarios and invariants this
//! crate is built against.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tcp_relay::{Mode, RelayConfig, RelayEngine};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    cond()
}

fn spawn_engine(config: RelayConfig) -> (Arc<RelayEngine>, thread::JoinHandle<()>) {
    let engine = Arc::new(RelayEngine::new(config));
    let handle = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let _ = engine.start();
        })
    };
    (engine, handle)
}

fn read_exact_or_less(stream: &mut TcpStream, n: usize, timeout: Duration) -> Vec<u8> {
    stream.set_read_timeout(Some(timeout)).unwrap();
    let mut buf = vec![0u8; n];
    let mut total = 0;
    while total < n {
        match stream.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(k) => total += k,
            Err(_) => break,
        }
    }
    buf.truncate(total);
    buf
}

/// Scenario 1: connect-listen, one stub upstream, two downstream clients
/// connected before the byte arrives. Both must receive it in full, and the
/// client-count callback must have fired 1 then 2.
#[test]
fn fanout_to_two_clients_connect_listen() {
    let upstream_port = free_port();
    let downstream_port = free_port();
    let upstream_listener = TcpListener::bind(("127.0.0.1", upstream_port)).unwrap();

    let config = RelayConfig::new(
        "127.0.0.1",
        upstream_port,
        "127.0.0.1",
        downstream_port,
        Mode::ConnectListen,
        false,
        Duration::from_millis(50),
    );
    let (engine, _handle) = spawn_engine(config);

    let counts: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let counts = Arc::clone(&counts);
        engine.set_on_client_count(move |n| counts.lock().unwrap().push(n));
    }

    let mut client_a = loop {
        if let Ok(s) = TcpStream::connect(("127.0.0.1", downstream_port)) {
            break s;
        }
        thread::sleep(Duration::from_millis(20));
    };
    let mut client_b = loop {
        if let Ok(s) = TcpStream::connect(("127.0.0.1", downstream_port)) {
            break s;
        }
        thread::sleep(Duration::from_millis(20));
    };

    assert!(wait_until(|| engine.client_count() == 2, Duration::from_secs(2)));

    let (mut upstream, _) = upstream_listener.accept().unwrap();
    upstream.write_all(b"hello").unwrap();

    assert_eq!(
        read_exact_or_less(&mut client_a, 5, Duration::from_secs(2)),
        b"hello"
    );
    assert_eq!(
        read_exact_or_less(&mut client_b, 5, Duration::from_secs(2)),
        b"hello"
    );

    let counts = counts.lock().unwrap().clone();
    assert!(counts.windows(2).any(|w| w == [1, 2]));

    engine.stop();
}

/// Scenario 2: listen-connect, upstream not yet bound. The relay must keep
/// retrying its connect role and succeed once the peer finally listens.
#[test]
fn listen_connect_retries_until_downstream_appears() {
    let upstream_port = free_port();
    let downstream_port = free_port();

    let config = RelayConfig::new(
        "127.0.0.1",
        upstream_port,
        "127.0.0.1",
        downstream_port,
        Mode::ListenConnect,
        false,
        Duration::from_millis(50),
    );
    let (engine, _handle) = spawn_engine(config);

    thread::sleep(Duration::from_millis(150));
    let downstream_listener = TcpListener::bind(("127.0.0.1", downstream_port)).unwrap();

    let (mut downstream_peer, _) = downstream_listener.accept().unwrap();

    let mut upstream = loop {
        if let Ok(s) = TcpStream::connect(("127.0.0.1", upstream_port)) {
            break s;
        }
        thread::sleep(Duration::from_millis(20));
    };
    upstream.write_all(b"ping").unwrap();

    assert_eq!(
        read_exact_or_less(&mut downstream_peer, 4, Duration::from_secs(2)),
        b"ping"
    );

    engine.stop();
}

/// Scenario 4: listen-listen, a second upstream producer takes over once
/// the first is gone; subsequent bytes come from the new one.
///
/// Under upstream-listen the accept loop runs the forwarding pipeline
/// inline on its own thread (`src/drivers/upstream_listen.rs`, no extra
/// thread per `SPEC_FULL.md` §5.2/§7): it cannot `accept()` a second
/// producer while still blocked reading the first, so the only way a
/// replacement is observable end-to-end is for the first producer to
/// close, which unblocks the read, lets the accept loop come back around,
/// and hands the relay its next producer.
#[test]
fn listen_listen_replaces_upstream() {
    let upstream_port = free_port();
    let downstream_port = free_port();

    let config = RelayConfig::new(
        "127.0.0.1",
        upstream_port,
        "127.0.0.1",
        downstream_port,
        Mode::ListenListen,
        false,
        Duration::from_millis(50),
    );
    let (engine, _handle) = spawn_engine(config);

    let mut client = loop {
        if let Ok(s) = TcpStream::connect(("127.0.0.1", downstream_port)) {
            break s;
        }
        thread::sleep(Duration::from_millis(20));
    };

    let mut upstream1 = loop {
        if let Ok(s) = TcpStream::connect(("127.0.0.1", upstream_port)) {
            break s;
        }
        thread::sleep(Duration::from_millis(20));
    };
    upstream1.write_all(b"A").unwrap();
    assert_eq!(read_exact_or_less(&mut client, 1, Duration::from_secs(2)), b"A");

    // Close the first producer so the accept loop's pipeline read unblocks
    // and it can accept the next one.
    drop(upstream1);

    let mut upstream2 = loop {
        if let Ok(s) = TcpStream::connect(("127.0.0.1", upstream_port)) {
            break s;
        }
        thread::sleep(Duration::from_millis(20));
    };
    upstream2.write_all(b"B").unwrap();
    assert_eq!(read_exact_or_less(&mut client, 1, Duration::from_secs(2)), b"B");

    engine.stop();
}

/// Scenario 5: one client closes mid-stream; the other must still see the
/// full sequence of bytes, and the client-count callback must reflect the
/// eviction.
#[test]
fn send_failure_to_one_client_does_not_block_others() {
    let upstream_port = free_port();
    let downstream_port = free_port();
    let upstream_listener = TcpListener::bind(("127.0.0.1", upstream_port)).unwrap();

    let config = RelayConfig::new(
        "127.0.0.1",
        upstream_port,
        "127.0.0.1",
        downstream_port,
        Mode::ConnectListen,
        false,
        Duration::from_millis(50),
    );
    let (engine, _handle) = spawn_engine(config);

    let flaky = TcpStream::connect(("127.0.0.1", downstream_port)).unwrap();
    let mut healthy = loop {
        if let Ok(s) = TcpStream::connect(("127.0.0.1", downstream_port)) {
            break s;
        }
        thread::sleep(Duration::from_millis(20));
    };
    assert!(wait_until(|| engine.client_count() == 2, Duration::from_secs(2)));

    let (mut upstream, _) = upstream_listener.accept().unwrap();
    upstream.write_all(b"X").unwrap();

    // Read the one byte then hang up, so the second write fails.
    let mut buf = [0u8; 1];
    let mut flaky = flaky;
    flaky.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"X");
    drop(flaky);

    thread::sleep(Duration::from_millis(100));
    upstream.write_all(b"Y").unwrap();

    let received = read_exact_or_less(&mut healthy, 2, Duration::from_secs(2));
    assert_eq!(received, b"XY");

    assert!(wait_until(|| engine.client_count() == 1, Duration::from_secs(2)));

    engine.stop();
}

/// Scenario 6: stop while idle, upstream never reachable. Teardown must
/// complete promptly and leave final callbacks in a disconnected state.
#[test]
fn stop_while_idle_tears_down_promptly() {
    let upstream_port = free_port();
    let downstream_port = free_port();

    let config = RelayConfig::new(
        "127.0.0.1",
        upstream_port,
        "127.0.0.1",
        downstream_port,
        Mode::ConnectListen,
        false,
        Duration::from_secs(5),
    );
    let (engine, handle) = spawn_engine(config);

    let upstream_statuses: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let upstream_statuses = Arc::clone(&upstream_statuses);
        engine.set_on_upstream_status(move |up| upstream_statuses.lock().unwrap().push(up));
    }

    thread::sleep(Duration::from_millis(200));
    engine.stop();

    let deadline = Instant::now() + Duration::from_secs(3);
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert!(handle.is_finished(), "engine did not shut down within bound");

    assert_eq!(upstream_statuses.lock().unwrap().last(), Some(&false));
    assert_eq!(engine.client_count(), 0);
}

/// Invariant: calling `stop()` more than once, or before `start()` returns,
/// never panics and tears down exactly once.
#[test]
fn stop_is_idempotent() {
    let upstream_port = free_port();
    let downstream_port = free_port();

    let config = RelayConfig::new(
        "127.0.0.1",
        upstream_port,
        "127.0.0.1",
        downstream_port,
        Mode::ConnectListen,
        false,
        Duration::from_millis(50),
    );
    let (engine, handle) = spawn_engine(config);

    thread::sleep(Duration::from_millis(100));
    engine.stop();
    engine.stop();
    engine.stop();

    handle.join().unwrap();
}

/// Live toggling of the dump flag must not require a restart and must not
/// affect forwarding.
#[test]
fn dump_toggle_does_not_disrupt_forwarding() {
    let upstream_port = free_port();
    let downstream_port = free_port();
    let upstream_listener = TcpListener::bind(("127.0.0.1", upstream_port)).unwrap();

    let config = RelayConfig::new(
        "127.0.0.1",
        upstream_port,
        "127.0.0.1",
        downstream_port,
        Mode::ConnectListen,
        false,
        Duration::from_millis(50),
    );
    let (engine, _handle) = spawn_engine(config);

    let mut client = loop {
        if let Ok(s) = TcpStream::connect(("127.0.0.1", downstream_port)) {
            break s;
        }
        thread::sleep(Duration::from_millis(20));
    };
    assert!(wait_until(|| engine.client_count() == 1, Duration::from_secs(2)));

    engine.set_dump(true);

    let (mut upstream, _) = upstream_listener.accept().unwrap();
    upstream.write_all(b"dumped").unwrap();
    assert_eq!(
        read_exact_or_less(&mut client, 6, Duration::from_secs(2)),
        b"dumped"
    );

    engine.stop();
}
