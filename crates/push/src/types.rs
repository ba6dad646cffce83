//! Records, key material and the shapes handed back to callers.

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    chrono::{DateTime, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    zeroize::{Zeroize, ZeroizeOnDrop},
};

use crate::{
    Error, Result,
    error::{ChannelFailure, ErrorKind},
};

pub const AUTH_SECRET_LEN: usize = 16;
pub const PRIVATE_KEY_LEN: usize = 32;
pub const PUBLIC_KEY_LEN: usize = 65;

/// A P-256 key pair: raw private scalar and uncompressed SEC1 public point.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    #[serde(with = "b64")]
    private_key: Vec<u8>,
    #[serde(with = "b64")]
    public_key: Vec<u8>,
}

impl KeyPair {
    pub fn new(private_key: Vec<u8>, public_key: Vec<u8>) -> Result<Self> {
        if private_key.len() != PRIVATE_KEY_LEN {
            return Err(Error::crypto(format!(
                "private key must be {PRIVATE_KEY_LEN} bytes, got {}",
                private_key.len()
            )));
        }
        if public_key.len() != PUBLIC_KEY_LEN || public_key[0] != 0x04 {
            return Err(Error::crypto("public key must be an uncompressed P-256 point"));
        }
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"[REDACTED]")
            .field("public_key", &URL_SAFE_NO_PAD.encode(&self.public_key))
            .finish()
    }
}

/// Fresh key material for one channel.
#[derive(Debug, Clone)]
pub struct ChannelKeys {
    pub auth_secret: Vec<u8>,
    pub key_pair: KeyPair,
}

/// Everything known locally about one channel.
///
/// `auth_secret` and `key_pair` are fixed at creation; re-registration only
/// replaces `endpoint` and `registered_at`.
#[derive(Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub endpoint: String,
    #[serde(with = "b64")]
    pub auth_secret: Vec<u8>,
    pub key_pair: KeyPair,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_server_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl ChannelRecord {
    pub fn new(
        channel_id: impl Into<String>,
        endpoint: impl Into<String>,
        keys: ChannelKeys,
        app_server_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            channel_id: channel_id.into(),
            endpoint: endpoint.into(),
            auth_secret: keys.auth_secret,
            key_pair: keys.key_pair,
            app_server_key,
            created_at: now,
            registered_at: now,
        }
    }

    /// Point the record at a newly issued endpoint.
    pub fn reregistered(&mut self, endpoint: impl Into<String>) {
        self.endpoint = endpoint.into();
        self.registered_at = Utc::now();
    }

    pub fn subscription_info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            endpoint: self.endpoint.clone(),
            keys: SubscriptionKeys {
                auth: URL_SAFE_NO_PAD.encode(&self.auth_secret),
                p256dh: URL_SAFE_NO_PAD.encode(self.key_pair.public_key()),
            },
        }
    }
}

impl std::fmt::Debug for ChannelRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRecord")
            .field("channel_id", &self.channel_id)
            .field("endpoint", &self.endpoint)
            .field("auth_secret", &"[REDACTED]")
            .field("key_pair", &self.key_pair)
            .field("app_server_key", &self.app_server_key)
            .field("registered_at", &self.registered_at)
            .finish_non_exhaustive()
    }
}

/// What a sender needs to deliver to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

/// Base64url (no padding) encoded channel keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub auth: String,
    pub p256dh: String,
}

impl SubscriptionInfo {
    /// Decode and validate a subscription info document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let info: Self = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidInput(format!("malformed subscription info: {e}")))?;
        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(Error::InvalidInput("subscription endpoint is empty".into()));
        }
        let auth = decode_key("auth", &self.keys.auth)?;
        if auth.len() != AUTH_SECRET_LEN {
            return Err(Error::InvalidInput(format!(
                "auth must be {AUTH_SECRET_LEN} bytes"
            )));
        }
        let p256dh = decode_key("p256dh", &self.keys.p256dh)?;
        if p256dh.len() != PUBLIC_KEY_LEN {
            return Err(Error::InvalidInput(format!(
                "p256dh must be {PUBLIC_KEY_LEN} bytes"
            )));
        }
        Ok(())
    }
}

fn decode_key(name: &str, value: &str) -> Result<Vec<u8>> {
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{name} is empty")));
    }
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| Error::InvalidInput(format!("{name} is not base64url: {e}")))
}

/// Server-side identity issued on the first registration.
#[derive(Clone)]
pub struct BridgeSession {
    pub uaid: String,
    pub secret: Secret<String>,
}

impl BridgeSession {
    pub fn new(uaid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            uaid: uaid.into(),
            secret: Secret::new(secret.into()),
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.secret.expose_secret())
    }
}

impl std::fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSession")
            .field("uaid", &self.uaid)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Per-channel outcome of a token update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub updated: Vec<String>,
    pub failed: Vec<ChannelFailure>,
}

impl UpdateReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn record(&mut self, channel_id: &str, outcome: &Result<()>) {
        match outcome {
            Ok(()) => self.updated.push(channel_id.to_string()),
            Err(e) => self.failed.push(ChannelFailure {
                channel_id: channel_id.to_string(),
                kind: e.kind(),
                message: e.to_string(),
            }),
        }
    }

    /// First failure's kind, if any channel failed.
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.failed.first().map(|f| f.kind)
    }

    pub(crate) fn into_result(self) -> Result<bool> {
        if self.failed.is_empty() {
            Ok(true)
        } else {
            Err(Error::PartialUpdate {
                updated: self.updated,
                failed: self.failed,
            })
        }
    }
}

mod b64 {
    use {
        base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
        serde::{Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ChannelRecord {
        let mut public = vec![0x04];
        public.extend([7u8; 64]);
        ChannelRecord::new(
            "chan-A",
            "https://push.example.com/wpush/v2/abc",
            ChannelKeys {
                auth_secret: vec![1; AUTH_SECRET_LEN],
                key_pair: KeyPair::new(vec![9; PRIVATE_KEY_LEN], public).unwrap(),
            },
            None,
        )
    }

    #[test]
    fn subscription_info_round_trips_through_decoder() {
        let info = record().subscription_info();
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(SubscriptionInfo::from_json(&json).unwrap(), info);
        assert_eq!(info.keys.auth, "AQEBAQEBAQEBAQEBAQEBAQ");
    }

    #[test]
    fn decoder_rejects_malformed_documents() {
        for raw in [
            "[]",
            r#"{"endpoint":"https://x"}"#,
            r#"{"endpoint":"","keys":{"auth":"AQEBAQEBAQEBAQEBAQEBAQ","p256dh":"x"}}"#,
            r#"{"endpoint":"https://x","keys":{"auth":"","p256dh":"x"}}"#,
            r#"{"endpoint":"https://x","keys":{"auth":"AQEBAQEBAQEBAQEBAQEBAQ","p256dh":"!!"}}"#,
        ] {
            let err = SubscriptionInfo::from_json(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::GeneralError, "{raw}");
        }
    }

    #[test]
    fn record_serializes_keys_as_base64url() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["auth_secret"], "AQEBAQEBAQEBAQEBAQEBAQ");
        assert!(json.get("app_server_key").is_none());

        let back: ChannelRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.key_pair, record().key_pair);
    }

    #[test]
    fn reregistration_keeps_keys() {
        let mut rec = record();
        let keys = rec.key_pair.clone();
        rec.reregistered("https://push.example.com/wpush/v2/new");
        assert_eq!(rec.endpoint, "https://push.example.com/wpush/v2/new");
        assert_eq!(rec.key_pair, keys);
        assert!(rec.registered_at >= rec.created_at);
    }

    #[test]
    fn key_pair_rejects_compressed_point() {
        let mut public = vec![0x02];
        public.extend([7u8; 32]);
        assert!(KeyPair::new(vec![9; PRIVATE_KEY_LEN], public).is_err());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let printed = format!("{:?}", record());
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("AQEBAQEBAQEBAQEBAQEBAQ"));

        let session = BridgeSession::new("uaid-1", "hunter2");
        assert!(!format!("{session:?}").contains("hunter2"));
        assert_eq!(session.bearer(), "Bearer hunter2");
    }

    #[test]
    fn update_report_collects_failures() {
        let mut report = UpdateReport::default();
        report.record("a", &Ok(()));
        report.record("b", &Err(Error::Timeout(std::time::Duration::from_secs(1))));
        assert!(!report.is_complete());
        assert_eq!(report.failure_kind(), Some(ErrorKind::CommunicationError));
        assert_eq!(report.into_result().unwrap_err().kind(), ErrorKind::CommunicationError);
    }
}
