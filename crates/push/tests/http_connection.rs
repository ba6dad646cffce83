#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End to end: HTTP bridge against a mock push server, SQLite store on disk.

use {
    courier_push::{Connection, ConnectionConfig, ErrorKind},
    mockito::{Matcher, Server},
};

fn config(server: &Server, dir: &std::path::Path) -> ConnectionConfig {
    let mut config = ConnectionConfig::new("app1", "sender1").with_data_dir(dir);
    config.server_host = server.host_with_port();
    config.socket_protocol = "http".into();
    config.retry_backoff_ms = 1;
    config.storage.kdf.m_cost = 256;
    config.storage.kdf.t_cost = 1;
    config
}

async fn mock_registration(server: &mut Server) -> mockito::Mock {
    server
        .mock("POST", "/v1/fcm/sender1/registration")
        .match_body(Matcher::PartialJson(serde_json::json!({"channelID": "chan-A"})))
        .with_status(200)
        .with_body(
            r#"{"uaid":"uaid-1","channelID":"chan-A","secret":"s3cret","endpoint":"https://push.example.com/wpush/v2/a"}"#,
        )
        .create_async()
        .await
}

#[tokio::test]
async fn keys_and_session_persist_across_reopen() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let register = mock_registration(&mut server).await;

    let conn = Connection::open(config(&server, dir.path())).await.unwrap();
    let info = conn.get_subscription_info("chan-A").await.unwrap();
    assert_eq!(info.endpoint, "https://push.example.com/wpush/v2/a");
    conn.close().await.unwrap();
    register.assert_async().await;

    let list = server
        .mock("GET", "/v1/fcm/sender1/registration/uaid-1/")
        .match_header("authorization", "Bearer s3cret")
        .with_status(200)
        .with_body(r#"{"channelIDs":["chan-A"]}"#)
        .create_async()
        .await;

    let conn = Connection::open(config(&server, dir.path())).await.unwrap();
    assert_eq!(conn.get_subscription_info("chan-A").await.unwrap(), info);
    assert!(conn.verify_connection().await.unwrap().is_empty());
    conn.close().await.unwrap();
    list.assert_async().await;
}

#[tokio::test]
async fn second_connection_on_same_store_is_refused() {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();

    let first = Connection::open(config(&server, dir.path())).await.unwrap();
    let err = Connection::open(config(&server, dir.path()))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::StorageError);

    first.close().await.unwrap();
    let again = Connection::open(config(&server, dir.path())).await.unwrap();
    again.close().await.unwrap();
}

#[tokio::test]
async fn encrypted_store_rejects_wrong_key() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let _register = mock_registration(&mut server).await;

    let conn = Connection::open(config(&server, dir.path()).with_encryption_key("right"))
        .await
        .unwrap();
    conn.get_subscription_info("chan-A").await.unwrap();
    conn.close().await.unwrap();

    let err = Connection::open(config(&server, dir.path()).with_encryption_key("wrong"))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::StorageError);
}

#[tokio::test]
async fn server_rejection_leaves_no_record() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let _mock = server
        .mock("POST", "/v1/fcm/sender1/registration")
        .with_status(401)
        .with_body("unauthorized")
        .expect(1)
        .create_async()
        .await;

    let conn = Connection::open(config(&server, dir.path())).await.unwrap();
    let err = conn.get_subscription_info("chan-A").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommunicationServerError);
    assert!(conn.channels().await.unwrap().is_empty());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn gone_session_triggers_reregistration() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let _register = mock_registration(&mut server).await;

    let conn = Connection::open(config(&server, dir.path())).await.unwrap();
    conn.get_subscription_info("chan-A").await.unwrap();

    // The server forgets uaid-1 and hands out a new session.
    server.reset_async().await;
    let _gone = server
        .mock("GET", "/v1/fcm/sender1/registration/uaid-1/")
        .with_status(410)
        .create_async()
        .await;
    let _register_again = server
        .mock("POST", "/v1/fcm/sender1/registration")
        .with_status(200)
        .with_body(
            r#"{"uaid":"uaid-2","channelID":"chan-A","secret":"s2","endpoint":"https://push.example.com/wpush/v2/a2"}"#,
        )
        .create_async()
        .await;

    let endpoints = conn.verify_connection().await.unwrap();
    assert_eq!(endpoints["chan-A"], "https://push.example.com/wpush/v2/a2");
    assert_eq!(
        conn.get_subscription_info("chan-A").await.unwrap().endpoint,
        "https://push.example.com/wpush/v2/a2"
    );
    conn.close().await.unwrap();
}
