//! Client for the push server's bridge registration API.
//!
//! Routes hang off `{protocol}://{host}/v1/{bridge_type}/{sender_id}`. The
//! first registration returns a UAID and secret; every later call for that
//! UAID authenticates with the secret as a bearer token.

use std::time::Duration;

use {
    async_trait::async_trait,
    courier_config::ConnectionConfig,
    reqwest::{Client, RequestBuilder, Response, header::AUTHORIZATION},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    tracing::{debug, warn},
    url::Url,
};

use crate::{Error, Result, types::BridgeSession};

/// Outcome of registering one channel.
#[derive(Debug, Clone)]
pub struct Registration {
    pub channel_id: String,
    pub endpoint: String,
    /// Present when the server opened a new session for this device.
    pub session: Option<BridgeSession>,
}

/// Push server operations the connection manager depends on.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Register `channel_id`. Without a session this creates one.
    async fn subscribe(
        &self,
        session: Option<&BridgeSession>,
        channel_id: &str,
        token: Option<&str>,
        app_server_key: Option<&str>,
    ) -> Result<Registration>;

    /// Revoke one channel.
    async fn unsubscribe(&self, session: &BridgeSession, channel_id: &str) -> Result<()>;

    /// Push a new native token for one channel. Returns the endpoint when the
    /// server reissued it.
    async fn update_token(
        &self,
        session: &BridgeSession,
        channel_id: &str,
        token: &str,
    ) -> Result<Option<String>>;

    /// Channel ids the server holds for this session.
    async fn channel_list(&self, session: &BridgeSession) -> Result<Vec<String>>;

    /// Forget the whole session server-side.
    async fn drop_registration(&self, session: &BridgeSession) -> Result<()>;
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
    #[serde(rename = "channelID")]
    channel_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
}

#[derive(Serialize)]
struct TokenBody<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    uaid: String,
    #[serde(rename = "channelID")]
    channel_id: String,
    secret: String,
    endpoint: String,
}

#[derive(Deserialize)]
struct SubscribeResponse {
    #[serde(rename = "channelID")]
    channel_id: String,
    endpoint: String,
}

#[derive(Deserialize)]
struct UpdateResponse {
    #[serde(default)]
    endpoint: Option<String>,
}

#[derive(Deserialize)]
struct ChannelListResponse {
    #[serde(rename = "channelIDs")]
    channel_ids: Vec<String>,
}

/// [`Bridge`] over HTTP with bounded retries.
pub struct HttpBridge {
    client: Client,
    base: Url,
    timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl HttpBridge {
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let invalid = |message: String| {
            Error::Config(courier_config::Error::invalid("server_host", message))
        };

        let mut base = Url::parse(&config.server_url())
            .map_err(|e| invalid(format!("{}: {e}", config.server_url())))?;
        base.path_segments_mut()
            .map_err(|()| invalid(format!("{} cannot be a base URL", config.server_url())))?
            .pop_if_empty()
            .extend(["v1", config.bridge_type.as_str(), config.sender_id.as_str()]);

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("courier/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::transport("failed to build HTTP client", e))?;

        Ok(Self {
            client,
            base,
            timeout: config.request_timeout(),
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // `base` was checked to be a base URL in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        url
    }

    /// Send a request, retrying transient failures with exponential backoff.
    async fn execute(
        &self,
        op: &'static str,
        build: impl Fn(&Client) -> RequestBuilder + Send + Sync,
    ) -> Result<Response> {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            let error = match build(&self.client).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(op, status = resp.status().as_u16(), attempt, "bridge request ok");
                    return Ok(resp);
                },
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    Error::Server { status, body }
                },
                Err(e) if e.is_timeout() => Error::Timeout(self.timeout),
                Err(e) => Error::transport(format!("{op} request failed"), e),
            };

            if !error.is_transient() || attempt >= self.max_attempts {
                return Err(error);
            }
            warn!(op, attempt, error = %error, "bridge request failed, retrying");
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
            attempt += 1;
        }
    }

    async fn decode<T: DeserializeOwned>(op: &'static str, resp: Response) -> Result<T> {
        resp.json::<T>()
            .await
            .map_err(|e| Error::transport(format!("malformed {op} response"), e))
    }
}

fn require(field: &str, value: String) -> Result<String> {
    if value.is_empty() {
        Err(Error::communication(format!(
            "push server returned an empty {field}"
        )))
    } else {
        Ok(value)
    }
}

fn conflict_as_registered(error: Error, channel_id: &str) -> Error {
    match error {
        Error::Server { status: 409, .. } => Error::AlreadyRegistered {
            channel_id: channel_id.to_string(),
        },
        other => other,
    }
}

#[async_trait]
impl Bridge for HttpBridge {
    async fn subscribe(
        &self,
        session: Option<&BridgeSession>,
        channel_id: &str,
        token: Option<&str>,
        app_server_key: Option<&str>,
    ) -> Result<Registration> {
        match session {
            None => {
                let url = self.url(&["registration"]);
                let body = RegisterBody {
                    token,
                    channel_id,
                    key: app_server_key,
                };
                let resp = self
                    .execute("register", |c| c.post(url.clone()).json(&body))
                    .await
                    .map_err(|e| conflict_as_registered(e, channel_id))?;
                let reg: RegisterResponse = Self::decode("register", resp).await?;
                Ok(Registration {
                    channel_id: require("channelID", reg.channel_id)?,
                    endpoint: require("endpoint", reg.endpoint)?,
                    session: Some(BridgeSession::new(
                        require("uaid", reg.uaid)?,
                        require("secret", reg.secret)?,
                    )),
                })
            },
            Some(session) => {
                let url = self.url(&["registration", &session.uaid, "subscription"]);
                let body = RegisterBody {
                    token: None,
                    channel_id,
                    key: app_server_key,
                };
                let resp = self
                    .execute("subscribe", |c| {
                        c.post(url.clone())
                            .header(AUTHORIZATION, session.bearer())
                            .json(&body)
                    })
                    .await
                    .map_err(|e| conflict_as_registered(e, channel_id))?;
                let sub: SubscribeResponse = Self::decode("subscribe", resp).await?;
                Ok(Registration {
                    channel_id: require("channelID", sub.channel_id)?,
                    endpoint: require("endpoint", sub.endpoint)?,
                    session: None,
                })
            },
        }
    }

    async fn unsubscribe(&self, session: &BridgeSession, channel_id: &str) -> Result<()> {
        let url = self.url(&["registration", &session.uaid, "subscription", channel_id]);
        self.execute("unsubscribe", |c| {
            c.delete(url.clone()).header(AUTHORIZATION, session.bearer())
        })
        .await?;
        Ok(())
    }

    async fn update_token(
        &self,
        session: &BridgeSession,
        channel_id: &str,
        token: &str,
    ) -> Result<Option<String>> {
        let url = self.url(&["registration", &session.uaid, "subscription", channel_id]);
        let body = TokenBody { token };
        let resp = self
            .execute("update", |c| {
                c.put(url.clone())
                    .header(AUTHORIZATION, session.bearer())
                    .json(&body)
            })
            .await?;
        // Some servers answer with an empty body.
        let raw = resp
            .text()
            .await
            .map_err(|e| Error::transport("malformed update response", e))?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let update: UpdateResponse = serde_json::from_str(&raw)
            .map_err(|e| Error::communication(format!("malformed update response: {e}")))?;
        Ok(update.endpoint.filter(|e| !e.is_empty()))
    }

    async fn channel_list(&self, session: &BridgeSession) -> Result<Vec<String>> {
        let url = self.url(&["registration", &session.uaid, ""]);
        let resp = self
            .execute("channel_list", |c| {
                c.get(url.clone()).header(AUTHORIZATION, session.bearer())
            })
            .await?;
        let list: ChannelListResponse = Self::decode("channel_list", resp).await?;
        Ok(list.channel_ids)
    }

    async fn drop_registration(&self, session: &BridgeSession) -> Result<()> {
        let url = self.url(&["registration", &session.uaid]);
        self.execute("drop_registration", |c| {
            c.delete(url.clone()).header(AUTHORIZATION, session.bearer())
        })
        .await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::ErrorKind, mockito::Matcher};

    fn config(server: &mockito::Server) -> ConnectionConfig {
        let mut config = ConnectionConfig::new("app1", "sender1");
        config.server_host = server.host_with_port();
        config.socket_protocol = "http".into();
        config.retry_backoff_ms = 1;
        config
    }

    fn session() -> BridgeSession {
        BridgeSession::new("uaid-1", "s3cret")
    }

    #[test]
    fn base_url_includes_bridge_and_sender() {
        let bridge = HttpBridge::new(&ConnectionConfig::new("app1", "sender1")).unwrap();
        assert_eq!(
            bridge.base_url().as_str(),
            "https://updates.push.services.mozilla.com/v1/fcm/sender1"
        );
        assert_eq!(
            bridge.url(&["registration", "u", ""]).path(),
            "/v1/fcm/sender1/registration/u/"
        );
    }

    #[test]
    fn path_segments_are_escaped() {
        let bridge = HttpBridge::new(&ConnectionConfig::new("app1", "sender1")).unwrap();
        assert_eq!(
            bridge.url(&["registration", "a/b"]).path(),
            "/v1/fcm/sender1/registration/a%2Fb"
        );
    }

    #[tokio::test]
    async fn first_subscribe_opens_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/fcm/sender1/registration")
            .match_body(Matcher::Json(serde_json::json!({
                "token": "native-1",
                "channelID": "chan-A",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"uaid":"uaid-1","channelID":"chan-A","secret":"s3cret","endpoint":"https://push.example.com/wpush/v1/abc","senderid":"sender1"}"#,
            )
            .create_async()
            .await;

        let bridge = HttpBridge::new(&config(&server)).unwrap();
        let reg = bridge
            .subscribe(None, "chan-A", Some("native-1"), None)
            .await
            .unwrap();
        assert_eq!(reg.endpoint, "https://push.example.com/wpush/v1/abc");
        let session = reg.session.unwrap();
        assert_eq!(session.uaid, "uaid-1");
        assert_eq!(session.bearer(), "Bearer s3cret");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn later_subscribe_authenticates() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/fcm/sender1/registration/uaid-1/subscription")
            .match_header("authorization", "Bearer s3cret")
            .match_body(Matcher::Json(serde_json::json!({
                "channelID": "chan-B",
                "key": "BKEY",
            })))
            .with_status(200)
            .with_body(r#"{"channelID":"chan-B","endpoint":"https://push.example.com/b"}"#)
            .create_async()
            .await;

        let bridge = HttpBridge::new(&config(&server)).unwrap();
        let reg = bridge
            .subscribe(Some(&session()), "chan-B", None, Some("BKEY"))
            .await
            .unwrap();
        assert_eq!(reg.endpoint, "https://push.example.com/b");
        assert!(reg.session.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/fcm/sender1/registration")
            .with_status(400)
            .with_body(r#"{"errno":101}"#)
            .expect(1)
            .create_async()
            .await;

        let bridge = HttpBridge::new(&config(&server)).unwrap();
        let err = bridge
            .subscribe(None, "chan-A", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommunicationServerError);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/fcm/sender1/registration")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let bridge = HttpBridge::new(&config(&server)).unwrap();
        let err = bridge
            .subscribe(None, "chan-A", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommunicationError);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn conflict_maps_to_already_registered() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/fcm/sender1/registration/uaid-1/subscription")
            .with_status(409)
            .create_async()
            .await;

        let bridge = HttpBridge::new(&config(&server)).unwrap();
        let err = bridge
            .subscribe(Some(&session()), "chan-A", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyRegisteredError);
    }

    #[tokio::test]
    async fn empty_endpoint_is_a_communication_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/fcm/sender1/registration/uaid-1/subscription")
            .with_status(200)
            .with_body(r#"{"channelID":"chan-A","endpoint":""}"#)
            .create_async()
            .await;

        let bridge = HttpBridge::new(&config(&server)).unwrap();
        let err = bridge
            .subscribe(Some(&session()), "chan-A", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommunicationError);
    }

    #[tokio::test]
    async fn channel_list_and_token_update() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/fcm/sender1/registration/uaid-1/")
            .match_header("authorization", "Bearer s3cret")
            .with_status(200)
            .with_body(r#"{"uaid":"uaid-1","channelIDs":["chan-A","chan-B"]}"#)
            .create_async()
            .await;
        let _mock = server
            .mock("PUT", "/v1/fcm/sender1/registration/uaid-1/subscription/chan-A")
            .match_body(Matcher::Json(serde_json::json!({"token": "native-2"})))
            .with_status(200)
            .with_body("")
            .create_async()
            .await;

        let bridge = HttpBridge::new(&config(&server)).unwrap();
        assert_eq!(
            bridge.channel_list(&session()).await.unwrap(),
            ["chan-A", "chan-B"]
        );
        assert_eq!(
            bridge
                .update_token(&session(), "chan-A", "native-2")
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn unknown_uaid_is_recognisable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/fcm/sender1/registration/uaid-1/")
            .with_status(410)
            .create_async()
            .await;

        let bridge = HttpBridge::new(&config(&server)).unwrap();
        let err = bridge.channel_list(&session()).await.unwrap_err();
        assert!(err.is_unknown_registration());
    }

    #[tokio::test]
    async fn revoke_and_drop() {
        let mut server = mockito::Server::new_async().await;
        let revoke = server
            .mock("DELETE", "/v1/fcm/sender1/registration/uaid-1/subscription/chan-A")
            .with_status(200)
            .create_async()
            .await;
        let dropped = server
            .mock("DELETE", "/v1/fcm/sender1/registration/uaid-1")
            .with_status(200)
            .create_async()
            .await;

        let bridge = HttpBridge::new(&config(&server)).unwrap();
        bridge.unsubscribe(&session(), "chan-A").await.unwrap();
        bridge.drop_registration(&session()).await.unwrap();
        revoke.assert_async().await;
        dropped.assert_async().await;
    }
}
