//! Integration tests for framepipe.
//!
//! These drive real socket pairs and listeners end to end: the async
//! write pipeline against the read loop, sticky broken pipe, teardown
//! drains, and the batched disconnect sweep.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use framepipe::transport::{generate_socket_path, LocalListener, LocalStream};
use framepipe::{
    check_for_client_disconnects, ClientConnection, FrameHeader, FramepipeError,
    ServerConnection, TransportConfig,
};

const TEST_COOKIE: i64 = 0x0123_4567_89AB_CDEF;

fn test_config() -> TransportConfig {
    TransportConfig {
        cookie: TEST_COOKIE,
        ..TransportConfig::default()
    }
}

fn echo_to_channel(
    tx: mpsc::UnboundedSender<(i64, Bytes)>,
) -> framepipe::MessageHandler {
    Box::new(move |conn, message_type, payload| {
        tx.send((message_type, payload)).unwrap();
        conn.process_messages();
    })
}

fn errors_to_channel(
    tx: mpsc::UnboundedSender<FramepipeError>,
) -> framepipe::ConnectionErrorHandler {
    Box::new(move |_conn, err| {
        tx.send(err).unwrap();
    })
}

fn ignore_messages() -> framepipe::MessageHandler {
    Box::new(|_conn, _message_type, _payload| {})
}

fn ignore_errors() -> framepipe::ConnectionErrorHandler {
    Box::new(|_conn, _err| {})
}

#[tokio::test]
async fn async_write_reaches_read_loop_and_completion_fires() {
    let (a, b) = LocalStream::pair().unwrap();
    let writer = ServerConnection::create(a, test_config());

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    let reader = ClientConnection::create(
        echo_to_channel(msg_tx),
        ignore_errors(),
        b,
        "reader".to_string(),
        Vec::new(),
        test_config(),
    );
    reader.process_messages();

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    writer.write_message_async(
        7,
        b"hello",
        Box::new(move |status| {
            status_tx.send(status).unwrap();
        }),
    );

    let (message_type, payload) = msg_rx.recv().await.unwrap();
    assert_eq!(message_type, 7);
    assert_eq!(payload, Bytes::from_static(b"hello"));
    assert_eq!(status_rx.recv().await.unwrap(), Ok(()));
    assert_eq!(writer.async_writes(), 1);
    assert_eq!(writer.bytes_written(), 5);
}

#[tokio::test]
async fn read_loop_delivers_frames_in_sent_order() {
    let (a, b) = LocalStream::pair().unwrap();
    let writer = ServerConnection::create(a, test_config());

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    let reader = ClientConnection::create(
        echo_to_channel(msg_tx),
        ignore_errors(),
        b,
        "reader".to_string(),
        Vec::new(),
        test_config(),
    );
    reader.process_messages();

    for i in 0..5i64 {
        let payload = format!("message-{i}");
        writer.write_message(i, payload.as_bytes()).await.unwrap();
    }

    for i in 0..5i64 {
        let (message_type, payload) = msg_rx.recv().await.unwrap();
        assert_eq!(message_type, i);
        assert_eq!(payload, format!("message-{i}").as_bytes());
    }
    assert_eq!(reader.server().bytes_read(), 5 * "message-0".len() as u64);
}

#[tokio::test]
async fn completions_fire_in_enqueue_order_with_default_bound() {
    let (a, b) = LocalStream::pair().unwrap();
    let writer = ServerConnection::create(a, test_config());

    let (tx, mut rx) = mpsc::unbounded_channel();
    for i in 0..8i64 {
        let tx = tx.clone();
        writer.write_message_async(
            i,
            &[i as u8],
            Box::new(move |status| {
                tx.send((i, status)).unwrap();
            }),
        );
    }

    let mut order = Vec::new();
    for _ in 0..8 {
        let (i, status) = rx.recv().await.unwrap();
        assert_eq!(status, Ok(()));
        order.push(i);
    }
    assert_eq!(order, (0..8).collect::<Vec<_>>());
    drop(b);
}

#[test]
fn coalescing_bound_batches_flush_rounds() {
    // A current-thread runtime keeps the flush task parked until the first
    // await, so all ten messages are queued when it runs: rounds of 4, 4, 2.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let (a, b) = LocalStream::pair().unwrap();
        let config = TransportConfig {
            cookie: TEST_COOKIE,
            async_write_max_messages: 4,
            event_stats: true,
            ..TransportConfig::default()
        };
        let writer = ServerConnection::create(a, config);

        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..10i64 {
            let tx = tx.clone();
            writer.write_message_async(
                i,
                &[i as u8],
                Box::new(move |status| {
                    tx.send((i, status)).unwrap();
                }),
            );
        }

        let mut order = Vec::new();
        for _ in 0..10 {
            let (i, status) = rx.recv().await.unwrap();
            assert_eq!(status, Ok(()));
            order.push(i);
        }
        assert_eq!(order, (0..10).collect::<Vec<_>>());

        let stats = writer.event_stats().unwrap();
        let flush = stats.get("server_connection.async_write.flush").unwrap();
        assert_eq!(flush.started, 3);
        assert_eq!(flush.finished, 3);
        drop(b);
    });
}

#[test]
fn queued_messages_drain_on_drop_in_enqueue_order() {
    // The flush task never gets to run: no await happens between enqueue
    // and runtime teardown, so every completion must fire from Drop.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let (status_tx, status_rx) = std::sync::mpsc::channel();

    runtime.block_on(async {
        let (a, _b) = LocalStream::pair().unwrap();
        let writer = ServerConnection::create(a, test_config());
        for i in 0..5i64 {
            let status_tx = status_tx.clone();
            writer.write_message_async(
                i,
                b"payload",
                Box::new(move |status| {
                    status_tx.send((i, status)).unwrap();
                }),
            );
        }
    });
    drop(runtime);
    drop(status_tx);

    let drained: Vec<_> = status_rx.iter().collect();
    assert_eq!(drained.len(), 5);
    for (expected, (i, status)) in drained.iter().enumerate() {
        assert_eq!(*i, expected as i64);
        assert_eq!(*status, Err(FramepipeError::ConnectionClosed));
    }
}

#[tokio::test]
async fn broken_pipe_is_sticky_across_the_queue() {
    let (a, b) = LocalStream::pair().unwrap();
    drop(b);
    let writer = ServerConnection::create(a, test_config());

    let (tx, mut rx) = mpsc::unbounded_channel();
    for i in 0..10i64 {
        let tx = tx.clone();
        writer.write_message_async(
            i,
            b"x",
            Box::new(move |status| {
                tx.send((i, status)).unwrap();
            }),
        );
    }

    let mut order = Vec::new();
    for _ in 0..10 {
        let (i, status) = rx.recv().await.unwrap();
        assert_eq!(status, Err(FramepipeError::BrokenPipe));
        order.push(i);
    }
    assert_eq!(order, (0..10).collect::<Vec<_>>());

    // Later enqueues short-circuit without touching the socket.
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    writer.write_message_async(
        99,
        b"y",
        Box::new(move |status| {
            tx2.send(status).unwrap();
        }),
    );
    assert_eq!(rx2.recv().await.unwrap(), Err(FramepipeError::BrokenPipe));
}

#[tokio::test]
async fn cookie_mismatch_before_register_closes_without_dispatch() {
    let (mut rogue, b) = LocalStream::pair().unwrap();

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    let conn = ClientConnection::create(
        echo_to_channel(msg_tx),
        errors_to_channel(err_tx),
        b,
        "server".to_string(),
        Vec::new(),
        test_config(),
    );
    conn.process_messages();

    let frame = FrameHeader::new(0, 7, 5).encode();
    rogue.write_all(&frame).await.unwrap();
    rogue.write_all(b"hello").await.unwrap();

    // The connection closes its write side; the rogue peer observes EOF.
    let mut buf = [0u8; 1];
    let n = rogue.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);

    // Neither the message handler nor the error handler ran.
    assert!(msg_rx.try_recv().is_err());
    assert!(err_rx.try_recv().is_err());
}

#[tokio::test]
async fn oversized_frame_routes_to_error_handler() {
    let (mut rogue, b) = LocalStream::pair().unwrap();

    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    let config = TransportConfig {
        cookie: TEST_COOKIE,
        max_read_length: 16,
        ..TransportConfig::default()
    };
    let conn = ClientConnection::create(
        ignore_messages(),
        errors_to_channel(err_tx),
        b,
        "server".to_string(),
        Vec::new(),
        config,
    );
    conn.process_messages();

    let frame = FrameHeader::new(TEST_COOKIE, 7, 1 << 40).encode();
    rogue.write_all(&frame).await.unwrap();

    let err = err_rx.recv().await.unwrap();
    assert_eq!(
        err,
        FramepipeError::FrameTooLarge {
            length: 1 << 40,
            max: 16
        }
    );
}

#[tokio::test]
async fn peer_eof_routes_to_error_handler() {
    let (a, b) = LocalStream::pair().unwrap();

    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    let conn = ClientConnection::create(
        ignore_messages(),
        errors_to_channel(err_tx),
        b,
        "server".to_string(),
        Vec::new(),
        test_config(),
    );
    conn.process_messages();

    drop(a);

    let err = err_rx.recv().await.unwrap();
    assert!(matches!(err, FramepipeError::Io(_)));
}

#[tokio::test]
async fn read_loop_waits_for_handler_rearm() {
    let (a, b) = LocalStream::pair().unwrap();
    let writer = ServerConnection::create(a, test_config());

    // This handler never re-arms; delivery of the second frame must wait
    // for an explicit process_messages call.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn = ClientConnection::create(
        Box::new(move |_conn, message_type, _payload| {
            tx.send(message_type).unwrap();
        }),
        ignore_errors(),
        b,
        "reader".to_string(),
        Vec::new(),
        test_config(),
    );
    conn.process_messages();

    writer.write_message(1, b"a").await.unwrap();
    writer.write_message(2, b"b").await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    conn.process_messages();
    assert_eq!(rx.recv().await.unwrap(), 2);
}

#[tokio::test]
async fn disconnect_sweep_flags_only_the_hung_up_peer() {
    let mut conns: Vec<Arc<ClientConnection>> = Vec::new();
    let mut peers = Vec::new();
    for i in 0..3 {
        let (a, b) = LocalStream::pair().unwrap();
        conns.push(ClientConnection::create(
            ignore_messages(),
            ignore_errors(),
            a,
            format!("conn-{i}"),
            Vec::new(),
            test_config(),
        ));
        peers.push(b);
    }

    assert_eq!(
        check_for_client_disconnects(&conns),
        vec![false, false, false]
    );

    let hung_up = peers.remove(1);
    drop(hung_up);

    assert_eq!(
        check_for_client_disconnects(&conns),
        vec![false, true, false]
    );
}

#[tokio::test]
async fn sync_roundtrip_over_listener_socket() {
    let path = generate_socket_path();
    let listener = LocalListener::bind(&path).await.unwrap();

    let (client, accepted) = tokio::join!(LocalStream::connect(&path), listener.accept());
    let client_conn = ServerConnection::create(client.unwrap(), test_config());
    let server_conn = ServerConnection::create(accepted.unwrap(), test_config());

    // Larger than a socket buffer, so writer and reader must overlap.
    let payload: Vec<u8> = (0..500_000u32).map(|i| (i % 251) as u8).collect();
    let (wrote, read) = tokio::join!(
        client_conn.write_message(3, &payload),
        server_conn.read_message(3)
    );
    wrote.unwrap();
    assert_eq!(read.unwrap(), payload);
}

#[tokio::test]
async fn event_stats_record_read_rounds() {
    let (a, b) = LocalStream::pair().unwrap();
    let writer = ServerConnection::create(a, test_config());

    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
    let config = TransportConfig {
        cookie: TEST_COOKIE,
        event_stats: true,
        ..TransportConfig::default()
    };
    let reader = ClientConnection::create(
        echo_to_channel(msg_tx),
        ignore_errors(),
        b,
        "reader".to_string(),
        Vec::new(),
        config,
    );
    reader.process_messages();

    writer.write_message(1, b"hello").await.unwrap();
    let _ = msg_rx.recv().await.unwrap();

    let stats = reader.server().event_stats().unwrap();
    let header = stats.get("client_connection.async_read.header").unwrap();
    let payload = stats.get("client_connection.async_read.payload").unwrap();
    assert!(header.started >= 1);
    assert_eq!(payload.finished, 1);
}
