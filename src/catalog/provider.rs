//! Catalog access
//!
//! The admission walk never owns catalog data; it resolves channels, streams
//! and accounts through the [`Catalog`] trait on every call so the host stays
//! free to back it with whatever store it already has. [`MemoryCatalog`] is
//! the bundled implementation used by the demo server and the tests.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::model::{Account, AccountId, Channel, ChannelId, Stream, StreamId};

/// Read access to the channel/stream/account hierarchy
///
/// Implementations return snapshots; the walk holds no locks into the catalog
/// while it runs.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Look up a channel by id
    async fn channel(&self, id: ChannelId) -> Option<Channel>;

    /// Look up a stream by id
    async fn stream(&self, id: StreamId) -> Option<Stream>;

    /// Look up an account by id
    async fn account(&self, id: AccountId) -> Option<Account>;
}

/// In-memory catalog backed by hash maps
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    channels: RwLock<HashMap<ChannelId, Channel>>,
    streams: RwLock<HashMap<StreamId, Stream>>,
    accounts: RwLock<HashMap<AccountId, Account>>,
}

impl MemoryCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a channel
    pub async fn put_channel(&self, channel: Channel) {
        self.channels.write().await.insert(channel.id, channel);
    }

    /// Insert or replace a stream
    pub async fn put_stream(&self, stream: Stream) {
        self.streams.write().await.insert(stream.id, stream);
    }

    /// Insert or replace an account
    pub async fn put_account(&self, account: Account) {
        self.accounts.write().await.insert(account.id, account);
    }

    /// Number of channels currently stored
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.channels.read().await.get(&id).cloned()
    }

    async fn stream(&self, id: StreamId) -> Option<Stream> {
        self.streams.read().await.get(&id).cloned()
    }

    async fn account(&self, id: AccountId) -> Option<Account> {
        self.accounts.read().await.get(&id).cloned()
    }
}
