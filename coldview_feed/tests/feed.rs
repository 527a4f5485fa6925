//! End-to-end: run the feed binary on an ephemeral port, follow it with the
//! coldview transport and write through the coordinator.
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use assert_cmd::prelude::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use coldview::app::Dashboard;
use coldview::alarms::AlarmFilter;
use coldview::transport::{Transport, TransportConfig, TransportEvent};
use coldview::types::{Inbound, StatusKind};
use coldview::writer::{WriteCoordinator, WritePolicy, WriterConfig, CSRF_HEADER};

const TOKEN: &str = "feedtest";

struct Feed {
    child: Child,
    port: u16,
}

impl Drop for Feed {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Feed {
    fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }
}

// Starts on port 0 and reads the bound port from the startup banner.
fn start_feed(rooms: &str) -> Feed {
    let mut child = Command::cargo_bin("coldview_feed")
        .expect("binary exists")
        .args(["-p", "0", "--rooms", rooms, "--period-ms", "100", "--token", TOKEN])
        .env_remove("COLDVIEW_FEED_TOKEN")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn feed");
    let stdout = child.stdout.take().expect("stdout piped");
    let mut line = String::new();
    BufReader::new(stdout).read_line(&mut line).expect("banner");
    let addr = line
        .split_whitespace()
        .find(|w| w.starts_with("http://"))
        .unwrap_or_else(|| panic!("no address in banner: {line}"));
    let port = addr
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or_else(|| panic!("no port in {addr}"));
    Feed { child, port }
}

#[tokio::test]
async fn snapshot_on_connect_and_ping() {
    let feed = start_feed("2");
    let (mut ws, _) = connect_async(feed.ws_url()).await.expect("connect");

    let first = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("snapshot in time")
        .expect("open")
        .expect("frame");
    let Message::Text(text) = &first else {
        panic!("expected text frame, got {first:?}");
    };
    let Inbound::Snapshot(snapshot) = Inbound::parse(text).unwrap() else {
        panic!("expected a snapshot: {text}");
    };
    snapshot.validate().unwrap();
    assert_eq!(snapshot.structs.len(), 2);

    ws.send(Message::Text("ping".into())).await.unwrap();
    let got_pong = timeout(Duration::from_secs(5), async {
        while let Some(Ok(msg)) = ws.next().await {
            if msg == Message::Text("pong!".into()) {
                return true;
            }
        }
        false
    })
    .await
    .expect("pong in time");
    assert!(got_pong);
}

#[tokio::test]
async fn dashboard_follows_the_feed() {
    let feed = start_feed("3");
    let transport = Transport::new(TransportConfig::new(feed.ws_url()));
    let (_id, mut rx) = transport.subscribe_channel();
    transport.connect().unwrap();

    let mut dashboard = Dashboard::new(AlarmFilter::default()).with_history_len(10);
    timeout(Duration::from_secs(5), async {
        while dashboard.snapshots_seen() < 3 {
            let event = rx.recv().await.expect("channel open");
            if let TransportEvent::Status(s) = &event {
                assert_eq!(s.value, StatusKind::Connected, "{s:?}");
            }
            dashboard.apply(&event).expect("valid snapshot");
        }
    })
    .await
    .expect("three snapshots in time");

    assert!(dashboard.is_connected());
    let temps = dashboard.histories().get(3, "temperature").expect("room 3 history");
    assert_eq!(temps.capacity(), 10);
    transport.dispose();
}

#[tokio::test]
async fn writes_are_checked_and_confirmed() {
    let feed = start_feed("2");
    let endpoint = feed.http_url("/write");

    // coordinator with the right token: one coerced, one exact
    let writer = WriteCoordinator::new(WriterConfig {
        csrf_token: Some(TOKEN.into()),
        policy: WritePolicy::AllOrError,
        ..WriterConfig::new(endpoint.clone())
    })
    .unwrap();
    let batch = writer
        .write(1, &json!({"setpointTemperature": 40.0, "systemOn": false}))
        .await
        .expect("both writes accepted");
    assert_eq!(batch.total(), 2);
    let coerced: Vec<_> = batch.coerced().collect();
    assert_eq!(coerced.len(), 1);
    assert_eq!(coerced[0].result.as_ref().unwrap().value, json!(15.0));

    let client = reqwest::Client::new();
    let post = |body: serde_json::Value, token: Option<&str>| {
        let mut req = client.post(endpoint.clone()).json(&body);
        if let Some(t) = token {
            req = req.header(CSRF_HEADER, t);
        }
        req.send()
    };
    let status = |r: reqwest::Response| r.status().as_u16();

    let body = json!({"cold_room": 1, "property": "systemOn", "value": true});
    assert_eq!(status(post(body.clone(), None).await.unwrap()), 403);
    assert_eq!(status(post(body, Some("wrong")).await.unwrap()), 403);
    assert_eq!(
        status(post(json!({"cold_room": 7, "property": "systemOn", "value": true}), Some(TOKEN)).await.unwrap()),
        404
    );
    assert_eq!(
        status(post(json!({"cold_room": 1, "property": "systemOn", "value": "on"}), Some(TOKEN)).await.unwrap()),
        400
    );
    assert_eq!(
        status(post(json!({"cold_room": 1, "property": "humidity", "value": 50}), Some(TOKEN)).await.unwrap()),
        400
    );

    let ack = client
        .post(feed.http_url("/acknowledge"))
        .header(CSRF_HEADER, TOKEN)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(ack.status().as_u16(), 200);
    let ack: serde_json::Value = ack.json().await.unwrap();
    assert!(ack["data"]["acknowledged"].is_u64(), "{ack}");
}
