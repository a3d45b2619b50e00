//! Integration tests for api_facades crate
//!
//! End-to-end workflows through the facade surface only: a datagram echo
//! server driven by the multiplexer, and a stream server that accepts a
//! client and registers it for dispatch.

#![cfg(unix)]

use adapters_socket::{SocketAddress, SocketType};
use api_facades::*;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
fn test_datagram_server_dispatches_client_message() {
    let dir = tempfile::tempdir().unwrap();
    let server = make_socket(SocketType::Datagram, &SocketAddress::from(dir.path().join("srv"))).unwrap();
    let listener_fd = sockno(&server);

    let mut muxer = make_muxer().unwrap();
    assert!(muxer.add(listener_fd));

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    muxer.bind_event(listener_fd, "ev_print", move |fd, msg| {
        let mut ss = sdopen(fd);
        let word = ss.read_token().unwrap().unwrap_or_default();
        ss.reply(b"ack").unwrap();
        sink.lock().unwrap().push((msg.to_string(), word));
    });

    let client_path = dir.path().join("cl");
    let client = thread::spawn(move || {
        let mut client = make_socket(SocketType::Datagram, &SocketAddress::from(client_path)).unwrap();
        socket_connect_to(&mut client, listener_fd).unwrap();
        let mut ss = sdopen(sockno(&client));
        writeln!(ss, "first").unwrap();
        ss.flush().unwrap();

        let mut buf = [0u8; 8];
        let (n, _) = client.recv_from(&mut buf).unwrap();
        buf[..n].to_vec()
    });

    assert_eq!(muxer.listen_timeout(WAIT).unwrap(), 1);
    assert_eq!(client.join().unwrap(), b"ack");

    let received = received.lock().unwrap();
    assert_eq!(
        *received,
        vec![("iomux event triggered: ev_print".to_string(), "first".to_string())]
    );
}

#[test]
fn test_stream_server_accepts_and_dispatches() {
    let dir = tempfile::tempdir().unwrap();
    let addr = SocketAddress::from(dir.path().join("stream.sock"));
    let server = make_socket_listener(&addr).unwrap();

    let mut muxer = make_muxer().unwrap();
    assert!(muxer.add(sockno(&server)));

    let client_addr = addr.clone();
    let client = thread::spawn(move || {
        let mut sock = adapters_socket::Socket::new(client_addr.family(), SocketType::Stream).unwrap();
        socket_connect(&mut sock, &client_addr).unwrap();
        let mut ss = sdopen(sockno(&sock));
        ss.write_all(b"hello\n").unwrap();
        ss.flush().unwrap();
        sock
    });

    // The listener becomes readable once the client connects.
    assert_eq!(muxer.listen_timeout(WAIT).unwrap(), 1);
    let conn = socket_accept(&server).unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    assert!(muxer.add(sockno(&conn)));
    muxer.bind_event(sockno(&conn), "client", move |fd, _| {
        let mut ss = sdopen(fd);
        assert_eq!(ss.read_token().unwrap().as_deref(), Some("hello"));
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let client_sock = client.join().unwrap();
    assert_eq!(muxer.listen_timeout(WAIT).unwrap(), 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // The connection is owned by `conn`; take it out of the muxer before it closes.
    assert!(muxer.remove(sockno(&conn)));
    assert!(!muxer.has_handler(sockno(&conn)));
    drop(client_sock);
    drop(conn);
    assert_eq!(muxer.interest_set(), vec![sockno(&server)]);
}
