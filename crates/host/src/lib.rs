//! Blocking boundary between a host application and a push connection.
//!
//! [`PushHandle`] owns its connection and a private runtime. Every call
//! returns either a serializable value or a [`BoundaryError`] carrying the
//! error kind; panics inside a call are caught and reported as
//! `InternalError`. The `*_json` variants return the same outcome as a JSON
//! string for hosts that only speak text.

use std::{
    collections::HashMap,
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
    path::PathBuf,
};

use {
    courier_config::ConnectionConfig,
    courier_push::{Connection, ConnectionBuilder, ErrorKind, SubscriptionInfo},
    serde::{Deserialize, Serialize},
    tokio::runtime::Runtime,
};

/// Parameters a host supplies to open a connection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenParams {
    pub application_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub server_host: Option<String>,
    #[serde(default)]
    pub socket_protocol: Option<String>,
    #[serde(default)]
    pub bridge_type: Option<String>,
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub registration_token: Option<String>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl OpenParams {
    pub fn new(application_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            sender_id: sender_id.into(),
            ..Self::default()
        }
    }

    pub fn into_config(self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.application_id, self.sender_id);
        if let Some(host) = self.server_host {
            config.server_host = host;
        }
        if let Some(protocol) = self.socket_protocol {
            config.socket_protocol = protocol;
        }
        if let Some(bridge_type) = self.bridge_type {
            config.bridge_type = bridge_type;
        }
        if let Some(key) = self.encryption_key {
            config = config.with_encryption_key(key);
        }
        config.registration_token = self.registration_token;
        if let Some(dir) = self.data_dir {
            config = config.with_data_dir(dir);
        }
        config
    }
}

/// Failure reported across the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BoundaryError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BoundaryError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InternalError,
            message: message.into(),
        }
    }

    fn to_json(&self) -> String {
        encode_json(&ErrorEnvelope { error: self })
    }
}

impl From<courier_push::Error> for BoundaryError {
    fn from(error: courier_push::Error) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: &'a BoundaryError,
}

#[derive(Serialize)]
struct BoolResponse {
    ok: bool,
}

pub type BoundaryResult<T> = Result<T, BoundaryError>;

/// An open push connection. Moved, never copied; dropping it closes the
/// connection.
pub struct PushHandle {
    /// Only `None` while the handle is being dropped.
    runtime: Option<Runtime>,
    connection: Connection,
}

impl PushHandle {
    pub fn open(params: OpenParams) -> BoundaryResult<Self> {
        Self::open_with(ConnectionBuilder::new(params.into_config()))
    }

    /// Open from a JSON-encoded [`OpenParams`]. The error is a JSON envelope.
    pub fn open_json(params_json: &str) -> Result<Self, String> {
        let params: OpenParams = serde_json::from_str(params_json).map_err(|e| {
            BoundaryError {
                kind: ErrorKind::GeneralError,
                message: format!("invalid open parameters: {e}"),
            }
            .to_json()
        })?;
        Self::open(params).map_err(|e| e.to_json())
    }

    /// Open with injected collaborators.
    pub fn open_with(builder: ConnectionBuilder) -> BoundaryResult<Self> {
        with_boundary("open", || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("courier-host")
                .enable_all()
                .build()
                .map_err(|e| BoundaryError::internal(format!("failed to start runtime: {e}")))?;
            let connection = runtime.block_on(builder.open())?;
            Ok(Self {
                runtime: Some(runtime),
                connection,
            })
        })
    }

    pub fn application_id(&self) -> &str {
        self.connection.application_id()
    }

    fn run<T>(&self, op: impl Future<Output = courier_push::Result<T>>) -> BoundaryResult<T> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| BoundaryError::internal("host runtime stopped"))?;
        Ok(runtime.block_on(op)?)
    }

    pub fn get_subscription_info(&self, channel_id: &str) -> BoundaryResult<SubscriptionInfo> {
        with_boundary("get_subscription_info", || {
            self.run(self.connection.get_subscription_info(channel_id))
        })
    }

    pub fn unsubscribe(&self, channel_id: &str) -> BoundaryResult<bool> {
        with_boundary("unsubscribe", || {
            self.run(self.connection.unsubscribe(channel_id))
        })
    }

    pub fn update(&self, token: &str) -> BoundaryResult<bool> {
        with_boundary("update", || {
            self.run(self.connection.update(token))
        })
    }

    pub fn verify_connection(&self) -> BoundaryResult<HashMap<String, String>> {
        with_boundary("verify_connection", || {
            self.run(self.connection.verify_connection())
        })
    }

    pub fn channels(&self) -> BoundaryResult<Vec<String>> {
        with_boundary("channels", || {
            self.run(self.connection.channels())
        })
    }

    /// Close the connection. Safe to call more than once.
    pub fn close(&self) -> BoundaryResult<()> {
        with_boundary("close", || {
            self.run(self.connection.close())
        })
    }

    pub fn get_subscription_info_json(&self, channel_id: &str) -> String {
        encode_result(self.get_subscription_info(channel_id))
    }

    pub fn unsubscribe_json(&self, channel_id: &str) -> String {
        encode_result(self.unsubscribe(channel_id).map(|ok| BoolResponse { ok }))
    }

    pub fn update_json(&self, token: &str) -> String {
        encode_result(self.update(token).map(|ok| BoolResponse { ok }))
    }

    pub fn verify_connection_json(&self) -> String {
        encode_result(self.verify_connection())
    }
}

impl Drop for PushHandle {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        // Inside another runtime both `block_on` and a blocking shutdown
        // panic. The store is released when the connection drops.
        if tokio::runtime::Handle::try_current().is_ok() {
            tracing::debug!("push handle dropped inside a runtime, skipping close");
            runtime.shutdown_background();
            return;
        }
        if let Err(e) = runtime.block_on(self.connection.close()) {
            tracing::warn!(error = %e, "failed to close push connection on drop");
        }
    }
}

fn with_boundary<T>(op: &'static str, work: impl FnOnce() -> BoundaryResult<T>) -> BoundaryResult<T> {
    record_call(op);
    trace_call(op);

    let result = match catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(op, panic = %detail, "panic inside push operation");
            Err(BoundaryError::internal(format!("unexpected panic: {detail}")))
        },
    };
    if let Err(e) = &result {
        record_error(op, e.kind);
    }
    result
}

fn encode_json<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => json,
        Err(_) => "{\"error\":{\"kind\":\"InternalError\",\"message\":\"failed to serialize response\"}}"
            .to_owned(),
    }
}

fn encode_result<T: Serialize>(result: BoundaryResult<T>) -> String {
    match result {
        Ok(value) => encode_json(&value),
        Err(e) => e.to_json(),
    }
}

#[cfg(feature = "metrics")]
fn record_call(op: &'static str) {
    metrics::counter!("courier_host_calls_total", "op" => op).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_call(_op: &'static str) {}

#[cfg(feature = "metrics")]
fn record_error(op: &'static str, kind: ErrorKind) {
    metrics::counter!(
        "courier_host_errors_total",
        "op" => op,
        "kind" => kind.as_str()
    )
    .increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_error(_op: &'static str, _kind: ErrorKind) {}

fn trace_call(op: &'static str) {
    tracing::debug!(target: "courier_host", op, "host call");
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_override_defaults() {
        let config = OpenParams {
            server_host: Some("push.example.com".into()),
            encryption_key: Some("pw".into()),
            ..OpenParams::new("app1", "sender1")
        }
        .into_config();
        assert_eq!(config.server_host, "push.example.com");
        assert_eq!(config.socket_protocol, "https");
        assert_eq!(config.bridge_type, "fcm");
        assert!(config.encryption_key.is_some());
    }

    #[test]
    fn panics_become_internal_errors() {
        let err = with_boundary::<()>("test", || panic!("boom")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InternalError);
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn error_envelope_shape() {
        let json = encode_result::<()>(Err(BoundaryError {
            kind: ErrorKind::StorageError,
            message: "store is locked".into(),
        }));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["error"]["kind"], "StorageError");
        assert_eq!(value["error"]["message"], "store is locked");
    }

    #[test]
    fn push_errors_keep_their_kind() {
        let err: BoundaryError = courier_push::Error::Closed.into();
        assert_eq!(err.kind, ErrorKind::InternalError);
        assert_eq!(err.message, "connection closed");
    }

    #[test]
    fn open_json_rejects_bad_params() {
        let err = PushHandle::open_json("{\"sender_id\": 5}").err().unwrap();
        let value: serde_json::Value = serde_json::from_str(&err).unwrap();
        assert_eq!(value["error"]["kind"], "GeneralError");
    }

    #[test]
    fn invalid_config_is_reported_not_panicked() {
        let err = PushHandle::open(OpenParams::new("", "sender1")).err().unwrap();
        assert_eq!(err.kind, ErrorKind::GeneralError);
    }
}
