//! In-memory channel store for tests and ephemeral connections.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{Result, store::ChannelStore, types::ChannelRecord};

/// Store backed by a `BTreeMap`. Nothing survives the process.
#[derive(Default)]
pub struct MemoryChannelStore {
    channels: Mutex<BTreeMap<String, ChannelRecord>>,
    meta: Mutex<HashMap<String, String>>,
}

impl MemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelStore for MemoryChannelStore {
    async fn get(&self, channel_id: &str) -> Result<Option<ChannelRecord>> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        Ok(channels.get(channel_id).cloned())
    }

    async fn put(&self, record: &ChannelRecord) -> Result<()> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.insert(record.channel_id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, channel_id: &str) -> Result<bool> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        Ok(channels.remove(channel_id).is_some())
    }

    async fn list(&self) -> Result<Vec<ChannelRecord>> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        Ok(channels.values().cloned().collect())
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let meta = self.meta.lock().unwrap_or_else(|e| e.into_inner());
        Ok(meta.get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let mut meta = self.meta.lock().unwrap_or_else(|e| e.into_inner());
        meta.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_meta(&self, key: &str) -> Result<()> {
        let mut meta = self.meta.lock().unwrap_or_else(|e| e.into_inner());
        meta.remove(key);
        Ok(())
    }
}
