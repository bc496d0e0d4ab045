//! End-to-end lifecycle tests of the gateway.

use std::fs;

use home_gateway::config::schema::InterfaceKind;
use home_gateway::config::Paths;
use home_gateway::lifecycle::{GatewayError, LifecycleState, ServerError};

mod common;

use common::{local, wait_accepting, write_config, Ports, Running};

#[tokio::test]
async fn clean_start_and_termination() {
    let dir = tempfile::tempdir().unwrap();
    let ports = Ports::pick();
    write_config(dir.path(), ports, r#""HmIP-RF""#);

    let mut gateway = Running::spawn(dir.path());
    assert_eq!(gateway.until_running().await, LifecycleState::Running);

    let paths = Paths::new(dir.path());
    for file in [paths.ca_cert(), paths.ca_key(), paths.server_cert(), paths.server_key()] {
        assert!(file.exists(), "{} missing", file.display());
    }
    for port in ports.all() {
        wait_accepting(local(port)).await;
    }

    let vendor = reqwest::get(format!("http://127.0.0.1:{}/veap/~vendor", ports.http))
        .await
        .unwrap();
    assert_eq!(vendor.status(), 200);
    let body: serde_json::Value = vendor.json().await.unwrap();
    assert_eq!(body["serverName"], "Home Gateway");

    let link = gateway.link.clone();
    for _ in 0..100 {
        if !link.inits.lock().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let inits = link.inits.lock().clone();
    assert_eq!(inits.len(), 1);
    assert_eq!(inits[0].0, InterfaceKind::HmIpRf);
    assert_eq!(inits[0].1, format!("http://127.0.0.1:{}/RPC3", ports.http));
    assert_eq!(inits[0].2, "test-HmIP-RF");

    // The controller calls back on exactly the URL it was given.
    let reply = reqwest::Client::new()
        .post(&inits[0].1)
        .body(r#"{"method":"event","params":["test-HmIP-RF","000A1B2C:1","STATE",true]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(reply.status(), 200);
    let reply: serde_json::Value = reply.json().await.unwrap();
    assert!(reply.get("fault").is_none(), "{reply}");

    gateway.terminate().await.unwrap();
    assert_eq!(link.deinits.lock().as_slice(), &[InterfaceKind::HmIpRf]);

    // Nothing is left listening and the configuration was written back.
    for port in ports.all() {
        assert!(tokio::net::TcpStream::connect(local(port)).await.is_err());
    }
    let written = fs::read_to_string(paths.config_file()).unwrap();
    assert!(written.contains(&format!("port = {}", ports.http)));
}

#[tokio::test]
async fn malformed_configuration_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::new(dir.path());
    fs::write(paths.config_file(), "[http]\nport = \"not a number\"\n").unwrap();

    let gateway = Running::spawn(dir.path());
    let result = gateway.finish().await;

    assert!(matches!(result, Err(GatewayError::Config(_))), "{result:?}");
    assert!(!paths.server_cert().exists());
    assert!(!paths.ca_cert().exists());
}

#[tokio::test]
async fn occupied_port_stops_the_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let ports = Ports::pick();
    write_config(dir.path(), ports, "");
    let held = std::net::TcpListener::bind(("0.0.0.0", ports.pubsub_tls)).unwrap();

    let mut gateway = Running::spawn(dir.path());
    let mut state = gateway.state.clone();
    gateway.until_running().await;
    let result = gateway.finish().await;

    match result {
        Err(GatewayError::ServerStart(ServerError::Bind { service, addr, .. })) => {
            assert_eq!(service, "pub/sub TLS");
            assert_eq!(addr.port(), ports.pubsub_tls);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(*state.borrow_and_update(), LifecycleState::Stopped);

    // Every other listener was shut down before the error was returned.
    for port in [ports.http, ports.http_tls, ports.pubsub] {
        assert!(tokio::net::TcpStream::connect(local(port)).await.is_err());
    }
    drop(held);
}

#[tokio::test]
async fn existing_certificates_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let ports = Ports::pick();
    write_config(dir.path(), ports, "");

    let mut first = Running::spawn(dir.path());
    first.until_running().await;
    first.terminate().await.unwrap();
    let paths = Paths::new(dir.path());
    let cert = fs::read(paths.server_cert()).unwrap();

    let mut second = Running::spawn(dir.path());
    assert_eq!(second.until_running().await, LifecycleState::Running);
    second.terminate().await.unwrap();
    assert_eq!(fs::read(paths.server_cert()).unwrap(), cert);
}

#[tokio::test]
async fn configuration_written_through_the_model_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let ports = Ports::pick();
    write_config(dir.path(), ports, "");

    let mut gateway = Running::spawn(dir.path());
    gateway.until_running().await;
    wait_accepting(local(ports.http)).await;

    let url = format!("http://127.0.0.1:{}/veap/~vendor/config/~pv", ports.http);
    let client = reqwest::Client::new();
    let pv: serde_json::Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    let mut config = pv["v"].clone();
    assert_eq!(config["controller"]["init_id"], "test");
    config["controller"]["init_id"] = "renamed".into();

    let reply = client
        .put(&url)
        .json(&serde_json::json!({ "v": config }))
        .send()
        .await
        .unwrap();
    assert_eq!(reply.status(), 200);
    gateway.terminate().await.unwrap();

    let written = fs::read_to_string(Paths::new(dir.path()).config_file()).unwrap();
    assert!(written.contains("init_id = \"renamed\""), "{written}");
}
