#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use {
    courier_host::{OpenParams, PushHandle},
    courier_push::{
        ChannelKeys, ConnectionBuilder, CryptoProvider, ErrorKind, MemoryChannelStore, Result,
    },
    mockito::{Matcher, Server},
};

fn params(server: &Server, dir: &std::path::Path) -> OpenParams {
    OpenParams {
        server_host: Some(server.host_with_port()),
        socket_protocol: Some("http".into()),
        data_dir: Some(dir.to_path_buf()),
        ..OpenParams::new("app1", "sender1")
    }
}

#[test]
fn subscribe_unsubscribe_scenario() {
    let mut server = Server::new();
    let _register = server
        .mock("POST", "/v1/fcm/sender1/registration")
        .match_body(Matcher::PartialJson(serde_json::json!({"channelID": "chan-A"})))
        .with_status(200)
        .with_body(
            r#"{"uaid":"uaid-1","channelID":"chan-A","secret":"s3cret","endpoint":"https://push.example.com/wpush/v2/a"}"#,
        )
        .create();
    let _revoke = server
        .mock("DELETE", "/v1/fcm/sender1/registration/uaid-1/subscription/chan-A")
        .with_status(200)
        .create();
    let dir = tempfile::tempdir().unwrap();

    let handle = PushHandle::open(params(&server, dir.path())).unwrap();
    let info = handle.get_subscription_info("chan-A").unwrap();
    assert_eq!(info.endpoint, "https://push.example.com/wpush/v2/a");
    assert!(!info.keys.auth.is_empty());
    assert!(!info.keys.p256dh.is_empty());

    let json: serde_json::Value =
        serde_json::from_str(&handle.get_subscription_info_json("chan-A")).unwrap();
    assert_eq!(json["endpoint"], "https://push.example.com/wpush/v2/a");
    assert_eq!(json["keys"]["auth"], info.keys.auth.as_str());

    assert_eq!(handle.unsubscribe_json("chan-A"), r#"{"ok":true}"#);
    assert!(!handle.unsubscribe("chan-A").unwrap());
}

#[test]
fn operations_after_close_are_internal_errors() {
    let server = Server::new();
    let dir = tempfile::tempdir().unwrap();

    let handle = PushHandle::open(params(&server, dir.path())).unwrap();
    handle.close().unwrap();
    handle.close().unwrap();

    let err = handle.verify_connection().unwrap_err();
    assert_eq!(err.kind, ErrorKind::InternalError);

    let json: serde_json::Value = serde_json::from_str(&handle.update_json("t")).unwrap();
    assert_eq!(json["error"]["kind"], "InternalError");
    assert_eq!(json["error"]["message"], "connection closed");
}

#[test]
fn fresh_connection_verifies_clean() {
    let server = Server::new();
    let dir = tempfile::tempdir().unwrap();

    let handle = PushHandle::open(params(&server, dir.path())).unwrap();
    assert!(handle.verify_connection().unwrap().is_empty());
    assert_eq!(handle.verify_connection_json(), "{}");
}

#[test]
fn dropping_a_handle_releases_the_store() {
    let server = Server::new();
    let dir = tempfile::tempdir().unwrap();

    let first = PushHandle::open(params(&server, dir.path())).unwrap();
    let err = PushHandle::open(params(&server, dir.path())).err().unwrap();
    assert_eq!(err.kind, ErrorKind::StorageError);

    drop(first);
    PushHandle::open(params(&server, dir.path())).unwrap();
}

#[test]
fn dropping_a_handle_inside_a_runtime_does_not_panic() {
    let server = Server::new();
    let store = Arc::new(MemoryChannelStore::new());
    let builder = ConnectionBuilder::new(params(&server, std::path::Path::new(".")).into_config())
        .store(store.clone());
    let handle = PushHandle::open_with(builder).unwrap();
    assert!(handle.channels().unwrap().is_empty());

    let outer = tokio::runtime::Runtime::new().unwrap();
    outer.block_on(async move { drop(handle) });

    // The connection went with the handle.
    assert_eq!(Arc::strong_count(&store), 1);
}

struct PanickingCrypto;

impl CryptoProvider for PanickingCrypto {
    fn generate_channel_keys(&self) -> Result<ChannelKeys> {
        panic!("entropy pool exploded");
    }
}

#[test]
fn panic_in_operation_is_contained() {
    let server = Server::new();
    let builder = ConnectionBuilder::new(params(&server, std::path::Path::new(".")).into_config())
        .store(Arc::new(MemoryChannelStore::new()))
        .crypto(Arc::new(PanickingCrypto));
    let handle = PushHandle::open_with(builder).unwrap();

    let err = handle.get_subscription_info("chan-A").unwrap_err();
    assert_eq!(err.kind, ErrorKind::InternalError);
    assert!(err.message.contains("entropy pool exploded"));

    // The connection is still usable afterwards.
    assert!(handle.channels().unwrap().is_empty());
}
