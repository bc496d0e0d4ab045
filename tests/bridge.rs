//! Web-socket bridge and text callback through a running gateway.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

mod common;

use common::{local, wait_accepting, write_config, Ports, Running};

#[tokio::test]
async fn callback_events_reach_web_socket_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let ports = Ports::pick();
    write_config(dir.path(), ports, "");

    let mut gateway = Running::spawn(dir.path());
    gateway.until_running().await;
    wait_accepting(local(ports.http)).await;
    wait_accepting(local(ports.pubsub)).await;

    let url = format!("ws://127.0.0.1:{}/ws-mqtt", ports.http);
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    socket
        .send(Message::text("{\"op\":\"subscribe\",\"filter\":\"device/status/#\"}\n"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let reply = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/RPC3", ports.http))
        .body(r#"{"method":"event","params":["test-HmIP-RF","000A1B2C:1","STATE",true]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(reply.status(), 200);
    let reply: serde_json::Value = reply.json().await.unwrap();
    assert!(reply.get("fault").is_none(), "{reply}");

    let mut received = Vec::new();
    let line = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = socket.next().await {
            match frame.unwrap() {
                Message::Binary(bytes) => received.extend_from_slice(&bytes),
                Message::Text(text) => received.extend_from_slice(text.as_bytes()),
                _ => continue,
            }
            if let Some(end) = received.iter().position(|b| *b == b'\n') {
                return String::from_utf8_lossy(&received[..end]).into_owned();
            }
        }
        panic!("socket closed");
    })
    .await
    .expect("no delivery");

    let delivery: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(delivery["topic"], "device/status/000A1B2C/1/STATE");
    let pv: serde_json::Value = serde_json::from_str(delivery["payload"].as_str().unwrap()).unwrap();
    assert_eq!(pv["v"], true);

    // The value is also visible through the resource model.
    let pv: serde_json::Value = reqwest::get(format!(
        "http://127.0.0.1:{}/veap/device/000A1B2C/1/STATE/~pv",
        ports.http
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(pv["v"], true);

    gateway.terminate().await.unwrap();
    // The tunnel ended with the gateway.
    let end = tokio::time::timeout(Duration::from_secs(5), socket.next()).await.unwrap();
    assert!(!matches!(end, Some(Ok(Message::Binary(_)))));
}

#[tokio::test]
async fn tunnelled_sessions_need_configured_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let ports = Ports::pick();
    write_config(dir.path(), ports, "");
    let paths = home_gateway::config::Paths::new(dir.path());
    let config = paths.config_file();
    let mut text = std::fs::read_to_string(&config).unwrap();
    text.push_str("\n[[users]]\nidentifier = \"admin\"\npassword = \"secret\"\n");
    std::fs::write(&config, text).unwrap();

    let mut gateway = Running::spawn(dir.path());
    gateway.until_running().await;
    wait_accepting(local(ports.http)).await;
    wait_accepting(local(ports.pubsub)).await;
    let url = format!("ws://127.0.0.1:{}/ws-mqtt", ports.http);

    let (mut anonymous, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    anonymous
        .send(Message::text("{\"op\":\"subscribe\",\"filter\":\"#\"}\n"))
        .await
        .unwrap();
    assert_eq!(first_line(&mut anonymous).await, r#"{"op":"connack","ok":false}"#);

    let (mut known, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    known
        .send(Message::text(
            "{\"op\":\"connect\",\"username\":\"admin\",\"password\":\"secret\"}\n",
        ))
        .await
        .unwrap();
    assert_eq!(first_line(&mut known).await, r#"{"op":"connack","ok":true}"#);

    gateway.terminate().await.unwrap();
}

async fn first_line<S>(socket: &mut S) -> String
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = socket.next().await {
            match frame.unwrap() {
                Message::Binary(bytes) => received.extend_from_slice(&bytes),
                Message::Text(text) => received.extend_from_slice(text.as_bytes()),
                _ => continue,
            }
            if let Some(end) = received.iter().position(|b| *b == b'\n') {
                return String::from_utf8_lossy(&received[..end]).into_owned();
            }
        }
        panic!("socket closed");
    })
    .await
    .expect("no reply")
}
