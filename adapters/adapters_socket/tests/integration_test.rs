//! Integration tests for adapters_socket crate
//!
//! These tests run real loopback connections between handles, with peers on
//! spawned threads, and check the end-to-end workflows: setup, accept,
//! send/receive, broadcast, disconnect and moves between handles.

use adapters_event_loop::{wait_write, EventLoop, WaitStatus};
use adapters_socket::*;
use entities_networking::{AddressFamily, SocketConfig};
use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn listening_server() -> (Arc<SocketHandle>, SocketAddr) {
    let server = Arc::new(SocketHandle::new());
    server.initialize(&SocketConfig::server(0)).unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

/// Connected client handle plus the accepted child on the server side
fn connected_pair(server: &SocketHandle, addr: SocketAddr) -> (SocketHandle, SocketHandle) {
    let client = SocketHandle::new();
    client
        .initialize(&SocketConfig::client(addr.ip().to_string(), addr.port()))
        .unwrap();
    let fd = server.accept_connection().unwrap();
    let child = server.take_client(fd).unwrap();
    (client, child)
}

fn drain(handle: &SocketHandle) -> usize {
    let mut buf = [0u8; 8192];
    let mut total = 0;
    loop {
        match handle.receive_data(&mut buf, 0) {
            Ok(0) => return total,
            Ok(n) => total += n,
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }
}

#[test]
fn test_loopback_server_client_accept() {
    let (server, addr) = listening_server();
    let client = SocketHandle::new();
    client
        .initialize(&SocketConfig::client("127.0.0.1", addr.port()))
        .unwrap();
    assert_eq!(client.state(), HandleState::Connected);

    let fd = server.accept_connection().unwrap();
    assert!(fd >= 0);
    assert_eq!(server.client_count(), 1);

    let peer = server.with_client(fd, |child| child.address()).unwrap().unwrap();
    assert!(peer.is_ipv4());
    assert_eq!(peer, client.local_addr().unwrap());
}

#[test]
fn test_loopback_ipv6_family_matches() {
    let server = SocketHandle::new();
    let config = SocketConfig::server(0).with_family(AddressFamily::Ipv6).with_ip("::1");
    if server.initialize(&config).is_err() {
        // No IPv6 loopback on this host
        return;
    }
    let addr = server.local_addr().unwrap();
    let client = SocketHandle::new();
    client
        .initialize(&SocketConfig::client("::1", addr.port()).with_family(AddressFamily::Ipv6))
        .unwrap();
    let fd = server.accept_connection().unwrap();
    let peer = server.with_client(fd, |child| child.address()).unwrap().unwrap();
    assert!(peer.is_ipv6());
}

#[test]
fn test_send_all_delivers_every_byte() {
    for len in [0usize, 1, 70_000] {
        let (server, addr) = listening_server();
        let (client, child) = connected_pair(&server, addr);

        let reader = thread::spawn(move || drain(&child));
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        assert_eq!(client.send_all(&data, 0), Ok(len));
        client.close_socket().unwrap();

        assert_eq!(reader.join().unwrap(), len);
    }
}

#[test]
fn test_send_all_fails_after_peer_close() {
    let (server, addr) = listening_server();
    let (client, child) = connected_pair(&server, addr);
    child.close_socket().unwrap();
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    let outcome = client.send_all(b"are you there", 0);
    assert!(outcome.is_err(), "send after peer close succeeded: {:?}", outcome);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(client.last_error(), outcome.err());
}

#[test]
fn test_send_all_fails_when_peer_closes_mid_send() {
    let (server, addr) = listening_server();
    let client = SocketHandle::new();
    client
        .initialize(&SocketConfig::client("127.0.0.1", addr.port()).with_non_blocking(true))
        .unwrap();
    let mut event_loop = EventLoop::new();
    assert_eq!(wait_write(&mut event_loop, &client, 2000), Ok(WaitStatus::Ready));

    let fd = server.accept_connection().unwrap();
    let child = server.take_client(fd).unwrap();
    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        // Unread data is pending, so the close resets the connection
        child.close_socket().unwrap();
    });

    let data = vec![0x5au8; 64 * 1024 * 1024];
    let started = Instant::now();
    let outcome = client.send_all(&data, 0);
    closer.join().unwrap();

    match outcome {
        Err(SocketError::Send(_)) | Err(SocketError::PeerClosed) => {}
        other => panic!("Expected send failure, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_verifier_detects_closed_tcp_peer() {
    let (server, addr) = listening_server();
    let stream = TcpStream::connect(addr).unwrap();
    let fd = server.accept_connection().unwrap();
    server.disconnect_client(fd).unwrap();
    assert_eq!(server.client_count(), 0);

    let socket = socket2::Socket::from(stream);
    let outcome = verify_peer_alive(&socket);
    assert!(outcome.is_err());
}

#[test]
fn test_non_blocking_client_becomes_writable() {
    let (server, addr) = listening_server();
    let client = SocketHandle::new();
    client
        .initialize(&SocketConfig::client("127.0.0.1", addr.port()).with_non_blocking(true))
        .unwrap();
    assert_eq!(client.state(), HandleState::Connected);

    let mut event_loop = EventLoop::new();
    assert_eq!(wait_write(&mut event_loop, &client, 2000), Ok(WaitStatus::Ready));

    let fd = server.accept_connection().unwrap();
    assert_eq!(client.send_all(b"late hello", 0), Ok(10));
    let received = server
        .with_client(fd, |child| {
            let mut buf = [0u8; 16];
            child.receive_data(&mut buf, 0)
        })
        .unwrap();
    assert_eq!(received, Ok(10));
}

#[test]
fn test_broadcast_skips_excluded_client() {
    let (server, addr) = listening_server();
    let mut peers = Vec::new();
    let mut fds = Vec::new();
    for _ in 0..3 {
        peers.push(TcpStream::connect(addr).unwrap());
        fds.push(server.accept_connection().unwrap());
    }

    let outcome = server.broadcast_data(b"news", 0, Some(fds[1])).unwrap();
    assert_eq!(outcome.bytes_sent, 8);
    assert!(outcome.is_complete());
    assert!(server.last_error().is_none());

    let mut buf = [0u8; 4];
    for index in [0, 2] {
        peers[index].read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"news");
    }
    peers[1].set_read_timeout(Some(Duration::from_millis(50))).unwrap();
    assert!(peers[1].read(&mut buf).is_err());
}

#[test]
fn test_broadcast_continues_past_dead_client() {
    let (server, addr) = listening_server();
    let mut peers = Vec::new();
    let mut fds = Vec::new();
    for _ in 0..3 {
        peers.push(TcpStream::connect(addr).unwrap());
        fds.push(server.accept_connection().unwrap());
    }
    drop(peers.remove(1));

    // The first send after the peer's close is usually accepted; the reset
    // it provokes makes a later one fail
    let mut rounds = 0;
    let failing = loop {
        assert!(rounds < 50, "send to the closed peer never failed");
        rounds += 1;
        let outcome = server.broadcast_data(b"tick", 0, None).unwrap();
        if !outcome.is_complete() {
            break outcome;
        }
        assert_eq!(outcome.bytes_sent, 12);
        thread::sleep(Duration::from_millis(10));
    };

    assert_eq!(failing.failed, vec![fds[1]]);
    assert_eq!(failing.bytes_sent, 8);
    assert!(matches!(server.last_error(), Some(SocketError::Send(_))));
    assert_eq!(server.client_count(), 3);

    for peer in peers.iter_mut() {
        let mut buf = vec![0u8; rounds * 4];
        peer.read_exact(&mut buf).unwrap();
        assert!(buf.chunks(4).all(|chunk| chunk == b"tick"));
    }
}

#[test]
fn test_disconnect_client_unknown_descriptor() {
    let (server, _) = listening_server();
    assert_eq!(server.disconnect_client(12345), Err(SocketError::ClientNotFound(12345)));
    assert_eq!(server.last_error(), Some(SocketError::ClientNotFound(12345)));
}

#[test]
fn test_disconnect_all_concurrent_with_accept() {
    const CONNECTIONS: usize = 20;
    let (server, addr) = listening_server();

    let connector = thread::spawn(move || {
        (0..CONNECTIONS)
            .map(|_| TcpStream::connect(addr).unwrap())
            .collect::<Vec<_>>()
    });

    let accepted = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let acceptor = {
        let (server, accepted, done) = (Arc::clone(&server), Arc::clone(&accepted), Arc::clone(&done));
        thread::spawn(move || {
            for _ in 0..CONNECTIONS {
                server.accept_connection().unwrap();
                accepted.fetch_add(1, Ordering::SeqCst);
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let mut detached = 0;
    while !done.load(Ordering::SeqCst) {
        detached += server.disconnect_all_clients().unwrap();
        thread::yield_now();
    }
    acceptor.join().unwrap();
    let _streams = connector.join().unwrap();

    assert_eq!(accepted.load(Ordering::SeqCst), CONNECTIONS);
    assert_eq!(detached + server.client_count(), CONNECTIONS);
}

#[test]
fn test_pairwise_moves_across_pool_terminate() {
    const HANDLES: usize = 6;
    const THREADS: usize = 4;
    const ITERATIONS: usize = 100;

    let pool: Arc<Vec<SocketHandle>> = Arc::new(
        (0..HANDLES)
            .map(|i| {
                let handle = SocketHandle::new();
                if i % 2 == 0 {
                    handle.initialize(&SocketConfig::server(0)).unwrap();
                }
                handle
            })
            .collect(),
    );

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..ITERATIONS {
                    let a = (t + i) % HANDLES;
                    let b = (t * 3 + i * 5 + 1) % HANDLES;
                    pool[a].take_from(&pool[b]);
                    pool[b].take_from(&pool[a]);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    for handle in pool.iter() {
        match handle.state() {
            HandleState::Listening => assert!(handle.as_raw_fd() >= 0),
            HandleState::Unbound => assert_eq!(handle.as_raw_fd(), -1),
            other => panic!("unexpected state {:?}", other),
        }
    }
}

#[test]
fn test_opposite_order_lock_pair_between_handles() {
    let left = Arc::new(OrderedMutex::new(0u32));
    let right = Arc::new(OrderedMutex::new(0u32));

    let forward = {
        let (left, right) = (Arc::clone(&left), Arc::clone(&right));
        thread::spawn(move || {
            for _ in 0..500 {
                let _pair = lock_pair(&left, &right);
            }
        })
    };
    let backward = {
        let (left, right) = (Arc::clone(&left), Arc::clone(&right));
        thread::spawn(move || {
            for _ in 0..500 {
                let _pair = lock_pair(&right, &left);
            }
        })
    };
    forward.join().unwrap();
    backward.join().unwrap();
}

#[test]
fn test_reset_closes_children() {
    let (server, addr) = listening_server();
    let mut peer = TcpStream::connect(addr).unwrap();
    server.accept_connection().unwrap();

    server.reset_to_empty_state().unwrap();
    assert_eq!(server.state(), HandleState::Unbound);
    assert_eq!(server.client_count(), 0);
    assert!(server.address().is_none());

    peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(peer.read(&mut buf).unwrap_or(0), 0);
}

#[test]
fn test_socket_hook_injects_creation_failure() {
    fn exhausted(
        _: socket2::Domain,
        _: socket2::Type,
        _: Option<socket2::Protocol>,
    ) -> std::io::Result<socket2::Socket> {
        Err(std::io::Error::from_raw_os_error(libc::EMFILE))
    }

    set_socket_hook(Some(exhausted));
    let endpoint = UdpEndpoint::new();
    let outcome = endpoint.initialize(&SocketConfig::server(0));
    set_socket_hook(None);

    assert!(matches!(outcome, Err(SocketError::Creation(_))));
    assert_eq!(endpoint.as_raw_fd(), -1);
    endpoint.initialize(&SocketConfig::server(0)).unwrap();
}
