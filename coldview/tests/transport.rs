//! Transport behaviour against a local tungstenite server: fan-out order,
//! reconnect after close, disposal and the reconnect cap.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use coldview::transport::{ConnectionState, Transport, TransportConfig, TransportEvent};
use coldview::types::StatusKind;

// Greets every connection with "hello N". Then either closes with 1000/"bye"
// or stays open and answers "ping" with "pong!".
async fn spawn_server(close_after_hello: bool) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let count = accepted.clone();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let n = count.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(tcp).await else {
                    return;
                };
                let _ = ws.send(Message::Text(format!("hello {n}"))).await;
                if close_after_hello {
                    let _ = ws
                        .close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "bye".into(),
                        }))
                        .await;
                    while let Some(Ok(_)) = ws.next().await {}
                    return;
                }
                while let Some(Ok(msg)) = ws.next().await {
                    if let Message::Text(t) = msg {
                        if t == "ping" {
                            let _ = ws.send(Message::Text("pong!".into())).await;
                        }
                    }
                }
            });
        }
    });
    (format!("ws://{addr}/ws"), accepted)
}

async fn next_event(rx: &mut UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within timeout")
        .expect("channel open")
}

fn expect_status(ev: TransportEvent, kind: StatusKind) -> String {
    match ev {
        TransportEvent::Status(s) if s.value == kind => s.desc,
        other => panic!("expected {kind} status, got {other:?}"),
    }
}

fn config(url: String, delay_ms: u64) -> TransportConfig {
    TransportConfig {
        reconnect_delay: Duration::from_millis(delay_ms),
        ..TransportConfig::new(url)
    }
}

#[tokio::test]
async fn reconnects_after_server_close() {
    let (url, accepted) = spawn_server(true).await;
    let transport = Transport::new(config(url, 300));
    let (_id, mut rx) = transport.subscribe_channel();
    transport.connect().unwrap();

    expect_status(next_event(&mut rx).await, StatusKind::Connected);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Text("hello 1".into()));
    let desc = expect_status(next_event(&mut rx).await, StatusKind::Closed);
    assert_eq!(desc, "websocket closed [1000]: bye");
    let closed_at = Instant::now();

    expect_status(next_event(&mut rx).await, StatusKind::Connected);
    assert!(
        closed_at.elapsed() >= Duration::from_millis(250),
        "reconnected too early: {:?}",
        closed_at.elapsed()
    );
    assert_eq!(next_event(&mut rx).await, TransportEvent::Text("hello 2".into()));
    assert!(accepted.load(Ordering::SeqCst) >= 2);
    transport.dispose();
}

#[tokio::test]
async fn every_subscriber_sees_the_same_order() {
    let (url, _) = spawn_server(true).await;
    let transport = Transport::new(config(url, 5_000));
    let (_a, mut rx_a) = transport.subscribe_channel();
    let (_b, mut rx_b) = transport.subscribe_channel();
    transport.connect().unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        expect_status(next_event(rx).await, StatusKind::Connected);
        assert_eq!(next_event(rx).await, TransportEvent::Text("hello 1".into()));
        expect_status(next_event(rx).await, StatusKind::Closed);
    }
    transport.dispose();
}

#[tokio::test]
async fn dispose_stops_events_and_reconnects() {
    let (url, accepted) = spawn_server(false).await;
    let transport = Transport::new(config(url, 50));
    let (_id, mut rx) = transport.subscribe_channel();
    transport.connect().unwrap();

    expect_status(next_event(&mut rx).await, StatusKind::Connected);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Text("hello 1".into()));

    transport.dispose();
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    // no closed status and no second dial
    assert!(timeout(Duration::from_millis(400), rx.recv()).await.is_err());
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    // the winding-down task never republishes a live state
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn unsubscribed_handler_gets_nothing_more() {
    let (url, _) = spawn_server(false).await;
    let transport = Transport::new(config(url, 5_000));
    let (gone, mut rx_gone) = transport.subscribe_channel();
    let (_kept, mut rx_kept) = transport.subscribe_channel();
    assert!(transport.unsubscribe(gone));
    transport.connect().unwrap();

    expect_status(next_event(&mut rx_kept).await, StatusKind::Connected);
    assert!(rx_gone.try_recv().is_err());
    transport.dispose();
}

#[tokio::test]
async fn ping_is_answered() {
    let (url, _) = spawn_server(false).await;
    let transport = Transport::new(config(url, 5_000));
    let (_id, mut rx) = transport.subscribe_channel();
    transport.connect().unwrap();

    expect_status(next_event(&mut rx).await, StatusKind::Connected);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Text("hello 1".into()));
    transport.send_text("ping").unwrap();
    assert_eq!(next_event(&mut rx).await, TransportEvent::Text("pong!".into()));
    transport.dispose();
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    // grab a free port, then release it so every dial is refused
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    };
    let transport = Transport::new(TransportConfig {
        max_attempts: Some(2),
        ..config(format!("ws://127.0.0.1:{port}/ws"), 50)
    });
    let (_id, mut rx) = transport.subscribe_channel();
    let mut state = transport.watch_state();
    transport.connect().unwrap();

    for _ in 0..3 {
        let desc = expect_status(next_event(&mut rx).await, StatusKind::Error);
        assert!(desc.starts_with("websocket error [connect]"), "{desc}");
    }
    assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();
}
