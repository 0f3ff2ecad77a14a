//! Relay behaviour over loopback TCP connections

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use splitproxy::relay::{RelayEngine, RelaySession, StatsCallback};

/// Connected pair: (remote end kept by the test, local end handed to the relay)
async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (connected, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (connected.unwrap(), accepted.unwrap().0)
}

fn counting_stats() -> (StatsCallback, Arc<AtomicU64>, Arc<AtomicU64>) {
    let out_total = Arc::new(AtomicU64::new(0));
    let in_total = Arc::new(AtomicU64::new(0));
    let stats: StatsCallback = {
        let out_total = Arc::clone(&out_total);
        let in_total = Arc::clone(&in_total);
        Arc::new(move |outbound, n| {
            let counter = if outbound { &out_total } else { &in_total };
            counter.fetch_add(n as u64, Ordering::SeqCst);
        })
    };
    (stats, out_total, in_total)
}

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[tokio::test]
async fn test_bidirectional_transfer_is_counted() {
    let (mut client, client_side) = tcp_pair().await;
    let (mut peer, peer_side) = tcp_pair().await;
    let (stats, out_total, in_total) = counting_stats();

    let relay = tokio::spawn(async move {
        let session = RelaySession::new(
            "loopback".to_string(),
            "127.0.0.1:40000".parse().unwrap(),
            "peer:1".to_string(),
        );
        let summary = RelayEngine::new()
            .relay(&session, client_side, peer_side, &stats)
            .await;
        (summary, session.bytes_up(), session.bytes_down())
    });

    let upload = payload(100_000, 1);
    let download = payload(70_000, 2);

    let (mut client_reader, mut client_writer) = client.split();
    let (mut peer_reader, mut peer_writer) = peer.split();

    let mut from_peer = vec![0u8; download.len()];
    let mut from_client = vec![0u8; upload.len()];
    let (up, down, got_down, got_up) = tokio::join!(
        client_writer.write_all(&upload),
        peer_writer.write_all(&download),
        client_reader.read_exact(&mut from_peer),
        peer_reader.read_exact(&mut from_client),
    );
    up.unwrap();
    down.unwrap();
    got_down.unwrap();
    got_up.unwrap();
    assert_eq!(from_peer, download);
    assert_eq!(from_client, upload);

    client.shutdown().await.unwrap();

    let (summary, bytes_up, bytes_down) = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay should finish after client EOF")
        .unwrap();

    assert_eq!(summary.bytes_out, 100_000);
    assert_eq!(summary.bytes_in, 70_000);
    assert_eq!(bytes_up, 100_000);
    assert_eq!(bytes_down, 70_000);
    assert_eq!(out_total.load(Ordering::SeqCst), 100_000);
    assert_eq!(in_total.load(Ordering::SeqCst), 70_000);

    let mut rest = Vec::new();
    peer.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_peer_close_ends_both_directions() {
    let (mut client, client_side) = tcp_pair().await;
    let (mut peer, peer_side) = tcp_pair().await;
    let (stats, _, in_total) = counting_stats();

    let relay = tokio::spawn(async move {
        let session = RelaySession::new(
            "peer-close".to_string(),
            "127.0.0.1:40001".parse().unwrap(),
            "peer:2".to_string(),
        );
        RelayEngine::with_buffer_size(256)
            .relay(&session, client_side, peer_side, &stats)
            .await
    });

    peer.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.unwrap();
    drop(peer);

    // Client never closes its side; the relay must still finish
    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"HTTP/1.1 204 No Content\r\n\r\n");

    let summary = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay should finish after peer EOF")
        .unwrap();
    assert_eq!(summary.bytes_out, 0);
    assert_eq!(summary.bytes_in, response.len() as u64);
    assert_eq!(in_total.load(Ordering::SeqCst), response.len() as u64);
}

#[tokio::test]
async fn test_reset_peer_does_not_fail_the_relay() {
    let (mut client, client_side) = tcp_pair().await;
    let (peer, peer_side) = tcp_pair().await;
    let (stats, _, _) = counting_stats();

    let relay = tokio::spawn(async move {
        let session = RelaySession::new(
            "reset".to_string(),
            "127.0.0.1:40002".parse().unwrap(),
            "peer:3".to_string(),
        );
        RelayEngine::new()
            .relay(&session, client_side, peer_side, &stats)
            .await
    });

    peer.set_linger(Some(Duration::ZERO)).unwrap();
    drop(peer);

    let _ = client.write_all(b"anyone there?").await;
    let mut rest = Vec::new();
    let _ = client.read_to_end(&mut rest).await;
    drop(client);

    let summary = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay should finish after peer reset")
        .unwrap();
    assert_eq!(summary.bytes_in, 0);
}
