//! Integration tests for adapters_event_loop crate
//!
//! These tests drive the multiplexer with real descriptors (unix socket pairs
//! and loopback TCP) and other threads acting as peers.

use adapters_event_loop::*;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_backend_name_matches_platform() {
    if cfg!(any(target_os = "linux", target_os = "android")) {
        assert_eq!(BACKEND_NAME, "epoll");
    } else if cfg!(any(target_os = "macos", target_os = "freebsd")) {
        assert_eq!(BACKEND_NAME, "kqueue");
    }
}

#[test]
fn test_empty_loop_zero_timeout_returns_immediately() {
    let mut event_loop = EventLoop::new();
    let started = Instant::now();
    let readiness = event_loop.run(0).unwrap();
    assert!(readiness.is_empty());
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_negative_timeout_wakes_when_peer_writes() {
    let (left, right) = UnixStream::pair().unwrap();
    let mut event_loop = EventLoop::new();
    event_loop.add_read(right.as_raw_fd()).unwrap();

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        (&left).write_all(b"wake").unwrap();
        left
    });

    let readiness = event_loop.run(-1).unwrap();
    assert_eq!(readiness.readable(), &[right.as_raw_fd()]);
    drop(writer.join().unwrap());
}

#[test]
fn test_bounded_timeout_expires() {
    let (_left, right) = UnixStream::pair().unwrap();
    let mut event_loop = EventLoop::new();
    event_loop.add_read(right.as_raw_fd()).unwrap();

    let started = Instant::now();
    let readiness = event_loop.run(50).unwrap();
    assert!(readiness.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[test]
fn test_listener_becomes_readable_on_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let client = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        TcpStream::connect(addr).unwrap()
    });

    let mut event_loop = EventLoop::new();
    let status = wait_read(&mut event_loop, &listener, 2000).unwrap();
    assert_eq!(status, WaitStatus::Ready);
    assert!(event_loop.is_empty());
    let _stream = client.join().unwrap();
}

#[test]
fn test_readiness_preserves_registration_order() {
    let pairs: Vec<(UnixStream, UnixStream)> = (0..4).map(|_| UnixStream::pair().unwrap()).collect();
    let mut event_loop = EventLoop::new();
    for (_, right) in pairs.iter().rev() {
        event_loop.add_read(right.as_raw_fd()).unwrap();
    }
    for (left, _) in &pairs {
        (&*left).write_all(b"x").unwrap();
    }

    let readiness = event_loop.run(100).unwrap();
    let expected: Vec<_> = pairs.iter().rev().map(|(_, right)| right.as_raw_fd()).collect();
    assert_eq!(readiness.readable(), expected.as_slice());
}

#[test]
fn test_poll_descriptors_reports_writable() {
    let (left, _right) = UnixStream::pair().unwrap();
    let readiness = poll_descriptors(&[left.as_raw_fd()], &[left.as_raw_fd()], 0).unwrap();
    assert!(readiness.is_writable(left.as_raw_fd()));
    assert!(!readiness.is_readable(left.as_raw_fd()));
}

#[test]
fn test_poll_descriptors_rejects_negative() {
    let err = poll_descriptors(&[-1], &[], 0).unwrap_err();
    assert_eq!(err, EventLoopError::InvalidDescriptor(-1));
}

#[test]
fn test_shared_loop_registration_during_wait() {
    let (left, right) = UnixStream::pair().unwrap();
    let shared = SharedEventLoop::new();
    shared.add_read(right.as_raw_fd()).unwrap();

    let waiter = {
        let shared = shared.clone();
        thread::spawn(move || shared.run(2000))
    };

    // Registration must not block behind the running wait
    thread::sleep(Duration::from_millis(20));
    let started = Instant::now();
    let (_extra_left, extra_right) = UnixStream::pair().unwrap();
    assert_eq!(shared.add_read(extra_right.as_raw_fd()), Ok(true));
    assert!(started.elapsed() < Duration::from_millis(500));

    (&left).write_all(b"go").unwrap();
    let readiness = waiter.join().unwrap().unwrap();
    assert!(readiness.is_readable(right.as_raw_fd()));
}

#[test]
fn test_shared_loop_through_trait() {
    let (left, right) = UnixStream::pair().unwrap();
    (&left).write_all(b"x").unwrap();

    let mut shared = SharedEventLoop::new();
    let status = wait_read(&mut shared, &right, 100).unwrap();
    assert_eq!(status, WaitStatus::Ready);
    assert!(shared.snapshot().is_empty());
}
