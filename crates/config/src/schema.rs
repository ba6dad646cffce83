//! Config schema for a push connection.

use std::{path::PathBuf, time::Duration};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

pub const DEFAULT_SERVER_HOST: &str = "updates.push.services.mozilla.com";
pub const DEFAULT_SOCKET_PROTOCOL: &str = "https";
pub const DEFAULT_BRIDGE_TYPE: &str = "fcm";

/// Everything needed to open a push connection.
///
/// `application_id` and `sender_id` identify the connection for its whole
/// lifetime; changing either means opening a new connection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Push server host (and optional port), without scheme.
    pub server_host: String,
    /// `https` or `http`.
    pub socket_protocol: String,
    /// Native bridge the server forwards wake-ups through (`fcm`, `apns`, ...).
    pub bridge_type: String,
    pub application_id: String,
    /// OS push sender identity (FCM project number, APNs topic).
    pub sender_id: String,
    /// Passphrase for at-rest encryption of the channel store.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub encryption_key: Option<Secret<String>>,
    /// Native registration token known at startup, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_token: Option<String>,
    /// Overall timeout for one bridge request, in seconds.
    pub request_timeout_secs: u64,
    /// Attempts per bridge request, including the first.
    pub max_attempts: u32,
    /// Base delay between retries in milliseconds, doubled per attempt.
    pub retry_backoff_ms: u64,
    pub storage: StorageConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_host: DEFAULT_SERVER_HOST.into(),
            socket_protocol: DEFAULT_SOCKET_PROTOCOL.into(),
            bridge_type: DEFAULT_BRIDGE_TYPE.into(),
            application_id: String::new(),
            sender_id: String::new(),
            encryption_key: None,
            registration_token: None,
            request_timeout_secs: 30,
            max_attempts: 3,
            retry_backoff_ms: 250,
            storage: StorageConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Config with the required identity set and everything else defaulted.
    pub fn new(application_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            sender_id: sender_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(Secret::new(key.into()));
        self
    }

    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.data_dir = Some(dir.into());
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// `{protocol}://{host}` for the push server.
    pub fn server_url(&self) -> String {
        format!("{}://{}", self.socket_protocol, self.server_host)
    }

    /// Store file name for this connection, derived from `application_id`.
    ///
    /// Characters outside `[A-Za-z0-9._-]` are replaced so any id maps to a
    /// single flat file name.
    pub fn store_file_name(&self) -> String {
        let sanitized: String = self
            .application_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("push-{sanitized}.db")
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("server_host", &self.server_host)
            .field("socket_protocol", &self.socket_protocol)
            .field("bridge_type", &self.bridge_type)
            .field("application_id", &self.application_id)
            .field("sender_id", &self.sender_id)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "registration_token",
                &self.registration_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("storage", &self.storage)
            .finish()
    }
}

/// Where and how the channel store is kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the store file. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    pub kdf: KdfConfig,
}

/// Argon2id cost parameters used when the store is encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB.
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 1,
        }
    }
}

/// Serialize an `Option<Secret<String>>` by exposing its inner value.
/// Only used when writing a config file back out.
pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn defaults_match_push_service() {
        let cfg = ConnectionConfig::new("app1", "sender1");
        assert_eq!(cfg.socket_protocol, "https");
        assert_eq!(cfg.bridge_type, "fcm");
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(
            cfg.server_url(),
            "https://updates.push.services.mozilla.com"
        );
    }

    #[rstest]
    #[case("app1", "push-app1.db")]
    #[case("org.example.app", "push-org.example.app.db")]
    #[case("../../etc/passwd", "push-.._.._etc_passwd.db")]
    #[case("a b:c", "push-a_b_c.db")]
    fn store_file_name_is_flat(#[case] app_id: &str, #[case] expected: &str) {
        let cfg = ConnectionConfig::new(app_id, "s");
        assert_eq!(cfg.store_file_name(), expected);
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut cfg = ConnectionConfig::new("app1", "sender1").with_encryption_key("s3cret");
        cfg.registration_token = Some("native-token".into());
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("s3cret"));
        assert!(!printed.contains("native-token"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: ConnectionConfig = toml::from_str(
            r#"
application_id = "app1"
sender_id = "sender1"

[storage.kdf]
m_cost = 1024
"#,
        )
        .unwrap();
        assert_eq!(cfg.bridge_type, "fcm");
        assert_eq!(cfg.storage.kdf.m_cost, 1024);
        assert_eq!(cfg.storage.kdf.t_cost, 3);
        assert!(cfg.encryption_key.is_none());
    }
}
