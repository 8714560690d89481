use crate::core::cache::KeyValueCollection;
use anyhow::Result;
use async_trait::async_trait;
use fjall::PartitionHandle;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tracing::debug;

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<SystemTime>,
}

/// Persistent collection stored in a fjall partition
pub struct DiskCollection {
    partition: PartitionHandle,
}

impl DiskCollection {
    pub fn new(partition: PartitionHandle) -> Self {
        Self { partition }
    }
}

#[async_trait]
impl KeyValueCollection for DiskCollection {
    async fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let res: Result<Option<Vec<u8>>> = (|| {
            if let Some(value) = self.partition.get(key)? {
                let entry: CacheEntry = serde_json::from_slice(&value)?;
                if let Some(expires_at) = entry.expires_at
                    && SystemTime::now() > expires_at
                {
                    debug!("Cache entry expired for key: {}", String::from_utf8_lossy(key));
                    self.partition.remove(key)?;
                    return Ok(None);
                }
                debug!("Cache HIT for key: {}", String::from_utf8_lossy(key));
                return Ok(Some(entry.value));
            }
            debug!("Cache MISS for key: {}", String::from_utf8_lossy(key));
            Ok(None)
        })();

        res.unwrap_or_else(|e| {
            debug!("DiskCollection get error: {}", e);
            None
        })
    }

    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) {
        let res: Result<()> = (|| {
            let entry = CacheEntry {
                value: value.to_vec(),
                expires_at: ttl.map(|d| SystemTime::now() + d),
            };
            self.partition.insert(key, serde_json::to_vec(&entry)?)?;
            debug!("Cache PUT for key: {}", String::from_utf8_lossy(key));
            Ok(())
        })();
        if let Err(e) = res {
            debug!("DiskCollection put error: {}", e);
        }
    }
}
