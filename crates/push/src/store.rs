//! Persistence trait for channel records.

use async_trait::async_trait;

use crate::{Result, types::ChannelRecord};

/// Metadata key holding the server-issued UAID.
pub const META_UAID: &str = "uaid";
/// Metadata key holding the registration secret paired with the UAID.
pub const META_SECRET: &str = "secret";
/// Metadata key holding the last native registration token.
pub const META_NATIVE_TOKEN: &str = "native_token";

/// Durable mapping from channel id to [`ChannelRecord`], plus a small string
/// metadata table.
///
/// Every write is atomic per record. `list` returns an owned snapshot sorted
/// by channel id, so it can be walked any number of times.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn get(&self, channel_id: &str) -> Result<Option<ChannelRecord>>;
    /// Insert or replace.
    async fn put(&self, record: &ChannelRecord) -> Result<()>;
    /// Returns `false` when the channel was not stored.
    async fn delete(&self, channel_id: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<ChannelRecord>>;

    async fn get_meta(&self, key: &str) -> Result<Option<String>>;
    async fn set_meta(&self, key: &str, value: &str) -> Result<()>;
    async fn delete_meta(&self, key: &str) -> Result<()>;

    /// Release the underlying handle. Further calls may fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
