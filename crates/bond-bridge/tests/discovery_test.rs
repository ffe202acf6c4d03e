//! Integration tests for the token and bridge information requests of
//! `Discovery`, run against a wiremock bridge.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bond_bridge::device::BridgeKind;
use bond_bridge::{BridgeEndpoint, BridgeInfoStatus, Discovery, ErrorKind, TokenStatus, TransportConfig};

const TOKEN: &str = "abc123";

fn discovery() -> Discovery {
    Discovery::default().transport(TransportConfig::new().timeout(Duration::from_millis(500)))
}

async fn mount_token(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/v2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn token_unlocked() {
    let server = MockServer::start().await;
    mount_token(&server, json!({"locked": 0, "token": TOKEN})).await;

    let status = discovery()
        .fetch_bridge_token(&server.address().to_string())
        .await
        .unwrap();

    assert_eq!(status, TokenStatus::Token(TOKEN.into()));
}

#[tokio::test]
async fn token_locked() {
    let server = MockServer::start().await;
    mount_token(&server, json!({"locked": 1})).await;

    let status = discovery()
        .fetch_bridge_token(&server.address().to_string())
        .await
        .unwrap();

    assert_eq!(status, TokenStatus::Locked);
}

#[tokio::test]
async fn token_unlocked_without_token() {
    let server = MockServer::start().await;
    mount_token(&server, json!({"locked": 0})).await;

    let error = discovery()
        .fetch_bridge_token(&server.address().to_string())
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::InvalidData);
}

#[tokio::test]
async fn token_unreachable_bridge() {
    // Reserve a port and release it, nothing listens on it anymore.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let status = discovery()
        .fetch_bridge_token(&address.to_string())
        .await
        .unwrap();

    assert_eq!(status, TokenStatus::Failed);
}

#[tokio::test]
async fn bridge_info_rejected_token() {
    let server = MockServer::start().await;
    let endpoint = BridgeEndpoint::new(server.address().to_string(), TOKEN);

    Mock::given(method("GET"))
        .and(path("/v2/sys/version"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let status = discovery().fetch_bridge_info(&endpoint).await.unwrap();
    assert_eq!(status, BridgeInfoStatus::BadToken);
}

#[tokio::test]
async fn bridge_info_with_name() {
    let server = MockServer::start().await;
    let endpoint = BridgeEndpoint::new(server.address().to_string(), TOKEN);

    Mock::given(method("GET"))
        .and(path("/v2/sys/version"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"bondid": "ZZBL12345", "fw_ver": "v2.10.8"})),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/bridge"))
        .and(header("BOND-Token", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Living Room"})))
        .mount(&server)
        .await;

    let BridgeInfoStatus::Info(info) = discovery().fetch_bridge_info(&endpoint).await.unwrap()
    else {
        panic!("Bridge information expected");
    };

    assert_eq!(info.kind(), BridgeKind::Bridge);
    assert_eq!(info.name.as_deref(), Some("Living Room"));
}

#[tokio::test]
async fn bridge_info_rejected_by_metadata() {
    let server = MockServer::start().await;
    let endpoint = BridgeEndpoint::new(server.address().to_string(), "stale");

    Mock::given(method("GET"))
        .and(path("/v2/sys/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bondid": "ZZBL12345"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/bridge"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let status = discovery().fetch_bridge_info(&endpoint).await.unwrap();
    assert_eq!(status, BridgeInfoStatus::BadToken);
}

#[tokio::test]
async fn bridge_info_smart_by_bond() {
    let server = MockServer::start().await;
    let endpoint = BridgeEndpoint::new(server.address().to_string(), TOKEN);

    Mock::given(method("GET"))
        .and(path("/v2/sys/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bondid": "KVPRBDJ45842"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/devices"))
        .and(header("BOND-Token", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"_": "7fc1e84b"})))
        .expect(1)
        .mount(&server)
        .await;

    let BridgeInfoStatus::Info(info) = discovery().fetch_bridge_info(&endpoint).await.unwrap()
    else {
        panic!("Bridge information expected");
    };

    assert_eq!(info.kind(), BridgeKind::SmartByBond);
    assert_eq!(info.name, None);
}

#[tokio::test]
async fn bridge_info_unreachable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let endpoint = BridgeEndpoint::new(address.to_string(), TOKEN);
    let status = discovery().fetch_bridge_info(&endpoint).await.unwrap();

    assert_eq!(status, BridgeInfoStatus::Failed);
}

#[tokio::test]
async fn bridge_info_without_metadata() {
    let server = MockServer::start().await;
    let endpoint = BridgeEndpoint::new(server.address().to_string(), TOKEN);

    Mock::given(method("GET"))
        .and(path("/v2/sys/version"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"bondid": "ZZBL12345", "fw_ver": "v1.2.3"})),
        )
        .mount(&server)
        .await;

    // Old firmware does not expose the bridge metadata.
    Mock::given(method("GET"))
        .and(path("/v2/bridge"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let BridgeInfoStatus::Info(info) = discovery().fetch_bridge_info(&endpoint).await.unwrap()
    else {
        panic!("Bridge information expected");
    };

    assert_eq!(info.kind(), BridgeKind::Bridge);
    assert_eq!(info.firmware_version.as_deref(), Some("v1.2.3"));
    assert_eq!(info.name, None);
}

#[tokio::test]
async fn bridge_info_smart_by_bond_rejected_token() {
    let server = MockServer::start().await;
    let endpoint = BridgeEndpoint::new(server.address().to_string(), "stale");

    Mock::given(method("GET"))
        .and(path("/v2/sys/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bondid": "KVPRBDJ45842"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/devices"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let status = discovery().fetch_bridge_info(&endpoint).await.unwrap();
    assert_eq!(status, BridgeInfoStatus::BadToken);
}

#[tokio::test]
async fn bridge_info_smart_by_bond_failure() {
    let server = MockServer::start().await;
    let endpoint = BridgeEndpoint::new(server.address().to_string(), TOKEN);

    Mock::given(method("GET"))
        .and(path("/v2/sys/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bondid": "KVPRBDJ45842"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/devices"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let status = discovery().fetch_bridge_info(&endpoint).await.unwrap();
    assert_eq!(status, BridgeInfoStatus::Failed);
}
