//! Integration tests for the proctor-core stream codec.
//!
//! These tests push frames through an in-memory duplex pipe the same way the
//! server's per-connection tasks do: one side writes with `write_message`,
//! the other reads with `read_message`.

use proctor_core::{
    protocol::{codec::MAX_ARGS, ProtocolError},
    read_message, write_message, Message, MessageType,
};
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn test_conversation_arrives_in_order_and_ends_cleanly() {
    // Arrange
    let (mut client, mut server) = tokio::io::duplex(64);
    let sent = vec![
        Message::new("student", MessageType::Auth, "481516"),
        Message::new("Client1", MessageType::NextTask, "481516"),
        Message::new("Client1", MessageType::SendAnswer, "481516")
            .with_arg("taskId", 4)
            .with_arg("answer", "Three-way handshake"),
        Message::new("Client1", MessageType::Other("PING".to_string()), "481516"),
    ];

    // Act: the writer runs concurrently because the pipe buffer is smaller
    // than the conversation.
    let to_send = sent.clone();
    let writer = tokio::spawn(async move {
        for msg in &to_send {
            write_message(&mut client, msg).await.unwrap();
        }
        client.shutdown().await.unwrap();
    });

    let mut received = Vec::new();
    while let Some(msg) = read_message(&mut server).await.unwrap() {
        received.push(msg);
    }
    writer.await.unwrap();

    // Assert
    assert_eq!(received, sent);
    assert_eq!(received[3].kind(), MessageType::Other("PING".to_string()));
}

#[tokio::test]
async fn test_oversized_argument_count_is_a_protocol_error() {
    // Arrange: a frame header that claims more arguments than allowed.
    let (mut client, mut server) = tokio::io::duplex(256);
    let mut frame = Vec::new();
    for field in ["x", "NEXT_TASK", ""] {
        frame.extend_from_slice(&(field.len() as u16).to_be_bytes());
        frame.extend_from_slice(field.as_bytes());
    }
    frame.extend_from_slice(&((MAX_ARGS as i32) + 1).to_be_bytes());
    client.write_all(&frame).await.unwrap();

    // Act
    let result = read_message(&mut server).await;

    // Assert
    assert!(matches!(result, Err(ProtocolError::InvalidArgCount(_))));
}

#[tokio::test]
async fn test_peer_closing_mid_frame_is_truncated_not_clean_end() {
    let (mut client, mut server) = tokio::io::duplex(256);
    client.write_all(&[0, 5, b'C', b'l']).await.unwrap();
    drop(client);

    let result = read_message(&mut server).await;
    assert!(matches!(result, Err(ProtocolError::Truncated { context: "sender" })));
}
