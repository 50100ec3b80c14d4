//! End-to-end test over a real TCP socket on the loopback interface.
//!
//! Binds the acceptor on `127.0.0.1:0` (the OS picks a free port), connects
//! a plain `TcpStream` as a student client, and checks that a session can
//! authenticate and that shutdown closes it and stops the accept loop.

mod common;

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use common::*;
use proctor_core::protocol::messages::MessageType;
use proctor_core::{read_message, write_message, Message};
use proctor_server::infrastructure::network::acceptor::{NetworkError, TcpAcceptor};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[tokio::test]
async fn test_student_authenticates_over_tcp_and_shutdown_disconnects() {
    // Arrange
    let dashboard = make_dashboard();
    let (ada, _) = host(&dashboard, 30).await;
    let running = Arc::new(AtomicBool::new(true));
    let acceptor = TcpAcceptor::bind(
        "127.0.0.1:0".parse().unwrap(),
        Arc::clone(&dashboard),
        Arc::clone(&running),
    )
    .await
    .expect("bind loopback");
    let addr = acceptor.local_addr().unwrap();
    let accept_loop = tokio::spawn(acceptor.run());

    // Act
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    write_message(&mut stream, &Message::new("student", MessageType::Auth, ada.as_str()))
        .await
        .unwrap();
    let reply = timeout(Duration::from_secs(5), read_message(&mut stream))
        .await
        .expect("reply in time")
        .unwrap()
        .expect("AUTH_OK frame");

    // Assert
    assert_eq!(reply.kind(), MessageType::AuthOk);
    assert_eq!(reply.arg("clientId"), Some("Client1"));
    let clients = dashboard.client_summaries().await;
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].remote_addr.ip(), addr.ip());

    // Shutdown closes the socket and ends the accept loop.
    running.store(false, Ordering::Relaxed);
    dashboard.shutdown().await;
    let eof = timeout(Duration::from_secs(5), read_message(&mut stream))
        .await
        .expect("close in time")
        .unwrap();
    assert!(eof.is_none());
    timeout(Duration::from_secs(5), accept_loop)
        .await
        .expect("accept loop stops")
        .unwrap();
}

#[tokio::test]
async fn test_garbage_frame_drops_only_that_connection() {
    // Arrange
    let dashboard = make_dashboard();
    let (ada, _) = host(&dashboard, 30).await;
    let running = Arc::new(AtomicBool::new(true));
    let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&dashboard), Arc::clone(&running))
        .await
        .unwrap();
    let addr = acceptor.local_addr().unwrap();
    tokio::spawn(acceptor.run());

    // Act: a negative argument count is a protocol error.
    let mut bad = TcpStream::connect(addr).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(
        &mut bad,
        &[0, 1, b's', 0, 4, b'A', b'U', b'T', b'H', 0, 0, 0xFF, 0xFF, 0xFF, 0xFF],
    )
    .await
    .unwrap();
    let mut good = TcpStream::connect(addr).await.unwrap();
    write_message(&mut good, &Message::new("student", MessageType::Auth, ada.as_str()))
        .await
        .unwrap();

    // Assert
    let closed = timeout(Duration::from_secs(5), read_message(&mut bad))
        .await
        .expect("bad connection closed in time")
        .unwrap();
    assert!(closed.is_none());
    let reply = timeout(Duration::from_secs(5), read_message(&mut good))
        .await
        .expect("reply in time")
        .unwrap()
        .unwrap();
    assert_eq!(reply.kind(), MessageType::AuthOk);

    running.store(false, Ordering::Relaxed);
    dashboard.shutdown().await;
}

#[tokio::test]
async fn test_binding_a_taken_port_is_a_bind_error() {
    let dashboard = make_dashboard();
    let running = Arc::new(AtomicBool::new(true));
    let first = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&dashboard), Arc::clone(&running))
        .await
        .unwrap();
    let taken: SocketAddr = first.local_addr().unwrap();

    let second = TcpAcceptor::bind(taken, dashboard, running).await;

    assert!(matches!(second, Err(NetworkError::Bind { addr, .. }) if addr == taken));
}
