//! Integration tests for the 3-way handshake.
//!
//! The first test runs both halves over real UDP sockets on loopback; the rest
//! use in-memory links with a paused clock so retransmission timers fire
//! instantly and deterministically.

use std::time::Duration;

use rdt::segment::{Segment, SegmentBuf, SegmentKind};
use rdt::simulator::{link, LossModel, MemoryTransport, Simulator};
use rdt::transport::{RecvOutcome, Transport};
use rdt::{ConnError, Connection, ConnectionState, Socket};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A loopback port that was free a moment ago.
fn free_port() -> u16 {
    let probe = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind probe socket");
    probe.local_addr().unwrap().port()
}

/// Receive one segment on a raw endpoint and return `(kind, seq, ack)`.
async fn expect_segment(end: &mut MemoryTransport) -> (SegmentKind, u8, u8) {
    let mut buf = SegmentBuf::new();
    end.set_timeout(Some(Duration::from_secs(5)));
    match end.recv(buf.spare()).await.unwrap() {
        RecvOutcome::Data(n) => {
            buf.set_filled(n);
            let seg = buf.segment().unwrap();
            (seg.kind, seg.seq, seg.ack)
        }
        other => panic!("expected a segment, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Both sides reach their transfer states after a clean handshake on loopback.
#[tokio::test]
async fn udp_handshake_reaches_transfer_states() {
    let port = free_port();

    let server_task = tokio::spawn(async move {
        let mut server = Connection::new(Socket::new());
        server.accept(port).await.map(|_| server)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = Connection::new(Socket::new());
    tokio::time::timeout(Duration::from_secs(5), client.initiate("127.0.0.1", port))
        .await
        .expect("client initiate timed out")
        .expect("client initiate failed");

    let server = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server accept timed out")
        .expect("server task panicked")
        .expect("server accept failed");

    assert_eq!(client.state(), ConnectionState::WaitSend);
    assert_eq!(server.state(), ConnectionState::WaitData0);
    assert_eq!(
        server.transport().peer_addr().unwrap(),
        client.transport().local_addr().unwrap()
    );
}

/// A lost ACK(2) is recovered by the client's CONN retransmission.
#[tokio::test(start_paused = true)]
async fn lost_conn_ack_is_recovered() {
    let (a, b) = link();
    let mut client = Connection::new(a);
    let mut server = Connection::new(Simulator::new(b, LossModel::scripted([1])));

    let (c, s) = tokio::join!(client.initiate("peer", 9000), server.accept(9000));
    c.unwrap();
    s.unwrap();

    assert_eq!(client.state(), ConnectionState::WaitSend);
    assert_eq!(server.state(), ConnectionState::WaitData0);
    assert_eq!(server.transport().dropped(), 1);
}

/// A lost CONN is simply resent.
#[tokio::test(start_paused = true)]
async fn lost_conn_is_resent() {
    let (a, b) = link();
    let mut client = Connection::new(Simulator::new(a, LossModel::scripted([1, 2])));
    let mut server = Connection::new(b);

    let (c, s) = tokio::join!(client.initiate("peer", 9000), server.accept(9000));
    c.unwrap();
    s.unwrap();
    assert_eq!(client.retransmissions(), 2);
}

/// When ACK(3) is lost, the client's first DATA completes the handshake and
/// its retransmission is delivered.
#[tokio::test(start_paused = true)]
async fn data_before_ack3_completes_handshake() {
    let (mut peer, b) = link();
    let server_task = tokio::spawn(async move {
        let mut server = Connection::new(b);
        server.accept(9000).await?;
        let state = server.state();
        let payload = server.recv().await?;
        Ok::<_, ConnError>((state, payload))
    });

    peer.send(&Segment::control(SegmentKind::Conn, 0, 0).encode().unwrap())
        .await
        .unwrap();
    assert_eq!(expect_segment(&mut peer).await, (SegmentKind::Ack, 0, 2));

    // ACK(3) "lost": go straight to DATA, then retransmit it.
    let data = Segment::data(0, b"hi").encode().unwrap();
    peer.send(&data).await.unwrap();
    peer.send(&data).await.unwrap();
    assert_eq!(expect_segment(&mut peer).await, (SegmentKind::Ack, 0, 0));

    let (state, payload) = server_task.await.unwrap().unwrap();
    assert_eq!(state, ConnectionState::WaitData0);
    assert_eq!(payload, Some(b"hi".to_vec()));
}

/// When ACK(3) is lost and the client has nothing to send, its CLOSE
/// completes the handshake and the retransmitted CLOSE ends the stream.
#[tokio::test(start_paused = true)]
async fn close_before_ack3_completes_handshake() {
    let (a, b) = link();
    // Client sends: #1 CONN, #2 ACK(3) (lost), #3 CLOSE, #4 CLOSE again.
    let mut client = Connection::new(Simulator::new(a, LossModel::scripted([2])));
    let mut server = Connection::new(b);

    let closing = async {
        client.initiate("peer", 9000).await?;
        client.close().await
    };
    let draining = async {
        server.accept(9000).await?;
        let mut delivered = 0;
        while server.recv().await?.is_some() {
            delivered += 1;
        }
        server.close().await?;
        Ok::<_, ConnError>(delivered)
    };
    let (closed, drained) = tokio::time::timeout(Duration::from_secs(60), async {
        tokio::join!(closing, draining)
    })
    .await
    .expect("lost ACK(3) followed by CLOSE stalled");

    closed.unwrap();
    assert_eq!(drained.unwrap(), 0);
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(server.state(), ConnectionState::Closed);
    assert_eq!(client.retransmissions(), 1);
}

/// Junk and unexpected segments before CONN do not disturb the listener.
#[tokio::test(start_paused = true)]
async fn listener_ignores_noise_before_conn() {
    let (mut peer, b) = link();
    let server_task = tokio::spawn(async move {
        let mut server = Connection::new(b);
        server.accept(9000).await.map(|_| server.state())
    });

    peer.send(&[0xff, 0x00]).await.unwrap();
    peer.send(&Segment::ack(7).encode().unwrap()).await.unwrap();
    peer.send(&Segment::control(SegmentKind::Conn, 0, 0).encode().unwrap())
        .await
        .unwrap();
    assert_eq!(expect_segment(&mut peer).await, (SegmentKind::Ack, 0, 2));
    peer.send(&Segment::ack(3).encode().unwrap()).await.unwrap();

    assert_eq!(server_task.await.unwrap().unwrap(), ConnectionState::WaitData0);
}

/// A repeated CONN while waiting for ACK(3) gets ACK(2) again.
#[tokio::test(start_paused = true)]
async fn repeated_conn_is_reanswered() {
    let (mut peer, b) = link();
    let server_task = tokio::spawn(async move {
        let mut server = Connection::new(b);
        server.accept(9000).await.map(|_| server.state())
    });

    let conn = Segment::control(SegmentKind::Conn, 0, 0).encode().unwrap();
    peer.send(&conn).await.unwrap();
    assert_eq!(expect_segment(&mut peer).await, (SegmentKind::Ack, 0, 2));
    peer.send(&conn).await.unwrap();
    assert_eq!(expect_segment(&mut peer).await, (SegmentKind::Ack, 0, 2));
    peer.send(&Segment::ack(3).encode().unwrap()).await.unwrap();

    assert_eq!(server_task.await.unwrap().unwrap(), ConnectionState::WaitData0);
}

/// A peer that vanishes mid-handshake is reported, not waited on forever.
#[tokio::test(start_paused = true)]
async fn vanished_listener_fails_initiate() {
    let (a, mut b) = link();
    b.close().unwrap();
    drop(b);

    let mut client = Connection::new(a);
    let err = client.initiate("peer", 9000).await.unwrap_err();
    assert!(matches!(
        err,
        ConnError::PeerClosed {
            state: ConnectionState::WaitHs2
        }
    ));
}
