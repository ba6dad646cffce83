//! Connection lifecycle and the operations exposed to hosts.

use std::{
    collections::{BTreeSet, HashMap},
    future::Future,
    sync::Arc,
    time::Duration,
};

use {
    courier_config::ConnectionConfig,
    secrecy::ExposeSecret,
    tokio::sync::{MappedMutexGuard, Mutex, MutexGuard},
    tracing::{debug, info, warn},
};

use crate::{
    Error, ErrorKind, Result,
    bridge::{Bridge, HttpBridge},
    crypto::{CryptoProvider, P256Provider},
    store::{ChannelStore, META_NATIVE_TOKEN, META_SECRET, META_UAID},
    store_sqlite::SqliteChannelStore,
    telemetry,
    types::{BridgeSession, ChannelRecord, SubscriptionInfo, UpdateReport},
};

/// Wires a [`Connection`] to its collaborators.
///
/// Anything left unset falls back to the production implementation: the
/// SQLite store under the configured data directory, [`HttpBridge`] and
/// [`P256Provider`].
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    store: Option<Arc<dyn ChannelStore>>,
    bridge: Option<Arc<dyn Bridge>>,
    crypto: Option<Arc<dyn CryptoProvider>>,
}

impl ConnectionBuilder {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            store: None,
            bridge: None,
            crypto: None,
        }
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn ChannelStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn bridge(mut self, bridge: Arc<dyn Bridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    #[must_use]
    pub fn crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub async fn open(self) -> Result<Connection> {
        let config = self.config;
        config.check()?;

        let bridge = match self.bridge {
            Some(bridge) => bridge,
            None => Arc::new(HttpBridge::new(&config)?),
        };
        let crypto = self.crypto.unwrap_or_else(|| Arc::new(P256Provider));
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteChannelStore::for_config(&config).await?),
        };

        let session = match (
            store.get_meta(META_UAID).await?,
            store.get_meta(META_SECRET).await?,
        ) {
            (Some(uaid), Some(secret)) => Some(BridgeSession::new(uaid, secret)),
            _ => None,
        };

        let token = match &config.registration_token {
            Some(token) if !token.is_empty() => {
                store.set_meta(META_NATIVE_TOKEN, token).await?;
                Some(token.clone())
            },
            _ => store.get_meta(META_NATIVE_TOKEN).await?,
        };

        info!(
            application_id = %config.application_id,
            sender_id = %config.sender_id,
            has_session = session.is_some(),
            "push connection opened"
        );

        Ok(Connection {
            application_id: config.application_id.clone(),
            sender_id: config.sender_id.clone(),
            state: Mutex::new(State::Open(Inner {
                store,
                bridge,
                crypto,
                session,
                token,
            })),
        })
    }
}

enum State {
    Open(Inner),
    Closed,
}

struct Inner {
    store: Arc<dyn ChannelStore>,
    bridge: Arc<dyn Bridge>,
    crypto: Arc<dyn CryptoProvider>,
    session: Option<BridgeSession>,
    token: Option<String>,
}

/// A push connection for one application / sender pair.
///
/// Every operation, `close` included, runs under one lock, so calls on the
/// same connection never interleave. After `close` every operation fails with
/// [`Error::Closed`].
pub struct Connection {
    application_id: String,
    sender_id: String,
    state: Mutex<State>,
}

impl Connection {
    /// Open with the default store, bridge and crypto provider.
    pub async fn open(config: ConnectionConfig) -> Result<Self> {
        ConnectionBuilder::new(config).open().await
    }

    pub fn builder(config: ConnectionConfig) -> ConnectionBuilder {
        ConnectionBuilder::new(config)
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    async fn inner(&self) -> Result<MappedMutexGuard<'_, Inner>> {
        let guard = self.state.lock().await;
        MutexGuard::try_map(guard, |state| match state {
            State::Open(inner) => Some(inner),
            State::Closed => None,
        })
        .map_err(|_| Error::Closed)
    }

    /// Subscription info for `channel_id`, creating the channel on first use.
    ///
    /// Repeated calls return the same keys until the channel is unsubscribed.
    pub async fn get_subscription_info(&self, channel_id: &str) -> Result<SubscriptionInfo> {
        self.subscribe(channel_id, None).await
    }

    /// Like [`get_subscription_info`](Self::get_subscription_info), restricting
    /// a new channel to `app_server_key`.
    ///
    /// An existing channel bound to a different key is an
    /// [`Error::AlreadyRegistered`].
    pub async fn subscribe(
        &self,
        channel_id: &str,
        app_server_key: Option<&str>,
    ) -> Result<SubscriptionInfo> {
        const OP: &str = "subscribe";
        telemetry::record_call(OP);
        let result = async {
            let mut inner = self.inner().await?;
            inner.subscribe(channel_id, app_server_key).await
        }
        .await;
        observe(OP, result)
    }

    /// Forget `channel_id`. Returns `false` when it was not subscribed.
    ///
    /// The local record is removed first; revoking it with the server is
    /// best effort and never fails the call.
    pub async fn unsubscribe(&self, channel_id: &str) -> Result<bool> {
        const OP: &str = "unsubscribe";
        telemetry::record_call(OP);
        let result = async {
            let inner = self.inner().await?;
            inner.unsubscribe(channel_id).await
        }
        .await;
        observe(OP, result)
    }

    /// Drop every channel and the server-side registration. Returns how many
    /// channels were removed.
    pub async fn unsubscribe_all(&self) -> Result<usize> {
        const OP: &str = "unsubscribe_all";
        telemetry::record_call(OP);
        let result = async {
            let mut inner = self.inner().await?;
            inner.unsubscribe_all().await
        }
        .await;
        observe(OP, result)
    }

    /// Record a new native registration token and push it for every channel.
    ///
    /// Returns `true` when all channels were updated. If some failed the
    /// error is [`Error::PartialUpdate`], classified by the first failure.
    pub async fn update(&self, token: &str) -> Result<bool> {
        const OP: &str = "update";
        telemetry::record_call(OP);
        let result = async {
            let mut inner = self.inner().await?;
            inner.update(token).await?.into_result()
        }
        .await;
        observe(OP, result)
    }

    /// [`update`](Self::update) with the per-channel outcome.
    pub async fn update_report(&self, token: &str) -> Result<UpdateReport> {
        const OP: &str = "update_report";
        telemetry::record_call(OP);
        let result = async {
            let mut inner = self.inner().await?;
            inner.update(token).await
        }
        .await;
        observe(OP, result)
    }

    /// Check the server still holds exactly our channels.
    ///
    /// Returns an empty map when it does. Otherwise the session is dropped,
    /// every channel is registered again and the map holds each channel's new
    /// endpoint. Endpoints are committed one channel at a time; a failure part
    /// way leaves the channels already re-registered in place.
    pub async fn verify_connection(&self) -> Result<HashMap<String, String>> {
        const OP: &str = "verify_connection";
        telemetry::record_call(OP);
        let result = async {
            let mut inner = self.inner().await?;
            inner.verify().await
        }
        .await;
        observe(OP, result)
    }

    /// Ids of every subscribed channel, sorted.
    pub async fn channels(&self) -> Result<Vec<String>> {
        let inner = self.inner().await?;
        Ok(inner
            .store
            .list()
            .await?
            .into_iter()
            .map(|r| r.channel_id)
            .collect())
    }

    /// Run `op` (an operation on this connection) with a deadline.
    ///
    /// When the deadline passes the operation is abandoned and the call fails
    /// with [`Error::DeadlineExceeded`]. Records committed before that stay.
    pub async fn with_deadline<T, F>(&self, deadline: Duration, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(deadline, op).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    application_id = %self.application_id,
                    deadline_ms = deadline.as_millis() as u64,
                    "operation abandoned at deadline"
                );
                telemetry::record_error("deadline", ErrorKind::CommunicationError);
                Err(Error::DeadlineExceeded)
            },
        }
    }

    pub async fn is_closed(&self) -> bool {
        matches!(*self.state.lock().await, State::Closed)
    }

    /// Release the store. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, State::Closed) {
            State::Open(inner) => {
                inner.store.close().await?;
                info!(application_id = %self.application_id, "push connection closed");
                Ok(())
            },
            State::Closed => Ok(()),
        }
    }
}

fn observe<T>(op: &'static str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        debug!(op, kind = %e.kind(), error = %e, "push operation failed");
        telemetry::record_error(op, e.kind());
    }
    result
}

fn check_channel_id(channel_id: &str) -> Result<()> {
    if channel_id.trim().is_empty() {
        return Err(Error::InvalidInput("channel id must not be empty".into()));
    }
    Ok(())
}

impl Inner {
    async fn subscribe(
        &mut self,
        channel_id: &str,
        app_server_key: Option<&str>,
    ) -> Result<SubscriptionInfo> {
        check_channel_id(channel_id)?;

        if let Some(record) = self.store.get(channel_id).await? {
            if app_server_key.is_some() && record.app_server_key.as_deref() != app_server_key {
                return Err(Error::AlreadyRegistered {
                    channel_id: channel_id.to_string(),
                });
            }
            return Ok(record.subscription_info());
        }

        let keys = self.crypto.generate_channel_keys()?;
        let endpoint = self.register(channel_id, app_server_key).await?;
        let record = ChannelRecord::new(
            channel_id,
            endpoint,
            keys,
            app_server_key.map(str::to_string),
        );
        self.store.put(&record).await?;

        info!(channel_id, "channel subscribed");
        Ok(record.subscription_info())
    }

    /// Register `channel_id` with the bridge, adopting any new session.
    ///
    /// A session the server no longer knows is dropped and the channel is
    /// registered once more under a fresh one.
    async fn register(&mut self, channel_id: &str, app_server_key: Option<&str>) -> Result<String> {
        let attempt = self
            .bridge
            .subscribe(
                self.session.as_ref(),
                channel_id,
                self.token.as_deref(),
                app_server_key,
            )
            .await;
        let registration = match attempt {
            Err(e) if self.session.is_some() && e.is_unknown_registration() => {
                warn!(channel_id, error = %e, "push server forgot our session, registering anew");
                self.forget_session().await?;
                self.bridge
                    .subscribe(None, channel_id, self.token.as_deref(), app_server_key)
                    .await?
            },
            attempt => attempt?,
        };

        if registration.channel_id != channel_id {
            return Err(Error::communication(format!(
                "push server registered channel {} instead of {channel_id}",
                registration.channel_id
            )));
        }
        if let Some(session) = registration.session {
            self.adopt_session(session).await?;
        }
        Ok(registration.endpoint)
    }

    async fn adopt_session(&mut self, session: BridgeSession) -> Result<()> {
        self.store.set_meta(META_UAID, &session.uaid).await?;
        self.store
            .set_meta(META_SECRET, session.secret.expose_secret())
            .await?;
        debug!(uaid = %session.uaid, "bridge session stored");
        self.session = Some(session);
        Ok(())
    }

    async fn forget_session(&mut self) -> Result<()> {
        self.store.delete_meta(META_UAID).await?;
        self.store.delete_meta(META_SECRET).await?;
        self.session = None;
        Ok(())
    }

    async fn unsubscribe(&self, channel_id: &str) -> Result<bool> {
        check_channel_id(channel_id)?;

        if !self.store.delete(channel_id).await? {
            debug!(channel_id, "unsubscribe of unknown channel");
            return Ok(false);
        }
        if let Some(session) = &self.session
            && let Err(e) = self.bridge.unsubscribe(session, channel_id).await
        {
            warn!(channel_id, error = %e, "failed to revoke channel with push server");
            telemetry::record_revoke_failure();
        }

        info!(channel_id, "channel unsubscribed");
        Ok(true)
    }

    async fn unsubscribe_all(&mut self) -> Result<usize> {
        let mut removed = 0;
        for record in self.store.list().await? {
            if self.store.delete(&record.channel_id).await? {
                removed += 1;
            }
        }

        if let Some(session) = self.session.clone() {
            if let Err(e) = self.bridge.drop_registration(&session).await {
                warn!(uaid = %session.uaid, error = %e, "failed to drop registration with push server");
                telemetry::record_revoke_failure();
            }
            self.forget_session().await?;
        }

        info!(removed, "all channels unsubscribed");
        Ok(removed)
    }

    async fn update(&mut self, token: &str) -> Result<UpdateReport> {
        if token.is_empty() {
            return Err(Error::InvalidInput("registration token must not be empty".into()));
        }
        self.store.set_meta(META_NATIVE_TOKEN, token).await?;
        self.token = Some(token.to_string());

        // Without a session nothing is registered server-side yet; registering
        // again opens a session carrying the new token.
        let session = self.session.clone();
        let mut report = UpdateReport::default();
        for mut record in self.store.list().await? {
            let outcome = match &session {
                Some(session) => self.push_token(session, &mut record, token).await,
                None => self.reregister(&mut record).await,
            };
            report.record(&record.channel_id, &outcome);
        }

        if report.is_complete() {
            info!(channels = report.updated.len(), "registration token updated");
        } else {
            warn!(
                updated = report.updated.len(),
                failed = report.failed.len(),
                "registration token update incomplete"
            );
        }
        Ok(report)
    }

    async fn push_token(
        &self,
        session: &BridgeSession,
        record: &mut ChannelRecord,
        token: &str,
    ) -> Result<()> {
        let endpoint = self
            .bridge
            .update_token(session, &record.channel_id, token)
            .await?;
        if let Some(endpoint) = endpoint {
            record.reregistered(endpoint);
            self.store.put(record).await?;
        }
        Ok(())
    }

    async fn reregister(&mut self, record: &mut ChannelRecord) -> Result<()> {
        let endpoint = self
            .register(&record.channel_id, record.app_server_key.as_deref())
            .await?;
        record.reregistered(endpoint);
        self.store.put(record).await
    }

    async fn verify(&mut self) -> Result<HashMap<String, String>> {
        let records = self.store.list().await?;
        let local: BTreeSet<&str> = records.iter().map(|r| r.channel_id.as_str()).collect();

        let (valid, server_knows_session) = match self.session.clone() {
            None => (local.is_empty(), false),
            Some(session) => match self.bridge.channel_list(&session).await {
                Ok(remote) => {
                    let remote: BTreeSet<&str> = remote.iter().map(String::as_str).collect();
                    (remote == local, true)
                },
                Err(e) if e.is_unknown_registration() => {
                    debug!(uaid = %session.uaid, error = %e, "push server no longer knows session");
                    (false, false)
                },
                Err(e) => return Err(e),
            },
        };
        if valid {
            debug!(channels = local.len(), "connection verified");
            return Ok(HashMap::new());
        }

        warn!(channels = records.len(), "connection invalid, re-registering channels");
        if let Some(session) = self.session.clone() {
            if server_knows_session
                && let Err(e) = self.bridge.drop_registration(&session).await
            {
                warn!(uaid = %session.uaid, error = %e, "failed to drop stale registration");
            }
            self.forget_session().await?;
        }

        let mut endpoints = HashMap::with_capacity(records.len());
        for mut record in records {
            self.reregister(&mut record).await?;
            endpoints.insert(record.channel_id.clone(), record.endpoint.clone());
        }
        info!(channels = endpoints.len(), "channels re-registered");
        Ok(endpoints)
    }
}
