//! Push subscription connection manager.
//!
//! A [`Connection`] owns one channel store and talks to the push server's
//! bridge API on behalf of one application. It hands out per-channel
//! subscription info, revokes channels, forwards native token updates and
//! re-registers everything when the server loses track of the device.

pub mod bridge;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
mod telemetry;
pub mod types;

pub use {
    bridge::{Bridge, HttpBridge, Registration},
    connection::{Connection, ConnectionBuilder},
    courier_config::ConnectionConfig,
    crypto::{CryptoProvider, P256Provider},
    error::{ChannelFailure, Error, ErrorKind, Result},
    store::ChannelStore,
    store_memory::MemoryChannelStore,
    store_sqlite::SqliteChannelStore,
    types::{
        BridgeSession, ChannelKeys, ChannelRecord, KeyPair, SubscriptionInfo, SubscriptionKeys,
        UpdateReport,
    },
};
