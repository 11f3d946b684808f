//! Saturation store implementation
//!
//! Tracks which channels have exhausted their upstream capacity, with a
//! TTL on every record and a JSON state file that survives restarts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::entry::{epoch_now, SaturationEntry};
use crate::catalog::ChannelId;
use crate::config::Config;
use crate::error::Result;

/// Host hook driven by saturation transitions
///
/// Called with `saturated = true` when a channel's failure count reaches the
/// threshold (the host applies the fallback feed and stops the channel) and
/// with `saturated = false` when the record later expires (the host removes
/// the feed again). `()` implements it as a no-op.
#[async_trait]
pub trait ChannelReconciler: Send + Sync {
    /// React to a channel entering or leaving saturation
    async fn reconcile(&self, channel: ChannelId, saturated: bool);
}

#[async_trait]
impl ChannelReconciler for () {
    async fn reconcile(&self, _channel: ChannelId, _saturated: bool) {}
}

/// TTL-bounded, persisted record of saturated channels
///
/// Thread-safe via `RwLock`; the admission path only takes the read lock
/// unless it finds a stale record. Every mutation rewrites the state file
/// atomically (temp file + rename) under an ordering lock, so a later
/// snapshot can never be overwritten by an earlier one.
pub struct SaturationStore {
    /// Map of channel id to saturation record
    entries: RwLock<HashMap<ChannelId, SaturationEntry>>,

    /// Orders mutation+persist pairs
    persist_lock: Mutex<()>,

    /// State file location
    path: PathBuf,

    /// Record lifetime
    ttl: Duration,

    /// Failures required before a channel counts as saturated
    threshold: u64,

    /// Optional host hook for saturation transitions
    reconciler: Option<Arc<dyn ChannelReconciler>>,
}

impl SaturationStore {
    /// Open the store, loading any persisted state
    ///
    /// A missing state file starts the store empty; a corrupt one is logged
    /// and discarded. Only a failure to create the state directory is fatal.
    pub async fn open(config: &Config) -> Result<Self> {
        if let Some(parent) = config.state_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let entries = load_state(&config.state_path).await;

        Ok(Self {
            entries: RwLock::new(entries),
            persist_lock: Mutex::new(()),
            path: config.state_path.clone(),
            ttl: config.ttl,
            threshold: config.failure_threshold,
            reconciler: None,
        })
    }

    /// Attach a reconciler for saturation transitions
    pub fn with_reconciler(mut self, reconciler: Arc<dyn ChannelReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    /// Record one admission failure for a channel
    ///
    /// Creates the record at count 1 (also when the previous record had
    /// expired), otherwise increments, and resets the expiry to now + TTL.
    /// Returns the failure count now on record.
    pub async fn mark(&self, channel: ChannelId) -> u64 {
        let now = epoch_now();
        let expires_at = now + self.ttl.as_secs_f64();

        let count = self
            .mutate_and_persist(|entries| {
                let entry = entries.entry(channel).or_default();
                let count = if entry.is_live(now) {
                    entry.failures() + 1
                } else {
                    1
                };
                entry.failure_count = Some(count);
                entry.expires_at = Some(expires_at);
                (count, true)
            })
            .await;

        if count == self.threshold {
            tracing::info!(
                channel = %channel,
                failures = count,
                ttl_secs = self.ttl.as_secs_f64(),
                "Channel saturated"
            );
        } else if count > self.threshold {
            tracing::debug!(channel = %channel, failures = count, "Saturation refreshed");
        } else {
            tracing::debug!(
                channel = %channel,
                failures = count,
                threshold = self.threshold,
                "Admission failure recorded"
            );
        }

        if count >= self.threshold {
            self.notify(channel, true).await;
        }

        count
    }

    /// Whether a channel currently counts as saturated
    ///
    /// True iff a live record exists with at least `threshold` failures.
    /// A stale record (expired, or missing fields after a tolerant decode)
    /// is removed on the spot and the state file rewritten, so a second
    /// call gives the same answer.
    pub async fn is_saturated(&self, channel: ChannelId) -> bool {
        {
            let entries = self.entries.read().await;
            match entries.get(&channel) {
                None => return false,
                Some(entry) => {
                    if entry.is_live(epoch_now()) {
                        return entry.meets(self.threshold);
                    }
                }
            }
        }

        // Record present but stale
        if let Some(removed) = self.purge_stale(channel).await {
            tracing::debug!(channel = %channel, "Expired saturation record removed");
            if removed.meets(self.threshold) {
                self.notify(channel, false).await;
            }
        }

        false
    }

    /// Remove stale records and report ended saturations
    ///
    /// Returns the number of records removed.
    pub async fn sweep(&self) -> usize {
        let channels: Vec<ChannelId> = self.entries.read().await.keys().copied().collect();

        let mut removed = 0;
        for channel in channels {
            if let Some(entry) = self.purge_stale(channel).await {
                removed += 1;
                if entry.meets(self.threshold) {
                    self.notify(channel, false).await;
                }
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Sweep removed stale saturation records");
        }

        removed
    }

    /// Spawn the background sweep task
    ///
    /// Ticks once per TTL. Returns a handle that can be used to abort the
    /// task.
    pub fn spawn_sweep_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        let period = store.ttl;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                store.sweep().await;
            }
        })
    }

    /// Current record for a channel, stale or not
    pub async fn entry(&self, channel: ChannelId) -> Option<SaturationEntry> {
        self.entries.read().await.get(&channel).cloned()
    }

    /// Number of records currently held, stale or not
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Remove a record iff it is still stale under the write lock
    async fn purge_stale(&self, channel: ChannelId) -> Option<SaturationEntry> {
        self.mutate_and_persist(|entries| {
            // Re-check: a concurrent mark may have refreshed the record
            match entries.get(&channel) {
                Some(entry) if !entry.is_live(epoch_now()) => (entries.remove(&channel), true),
                _ => (None, false),
            }
        })
        .await
    }

    /// Run a mutation and persist the resulting snapshot
    ///
    /// The ordering lock is held across both steps; the map write lock only
    /// for the mutation itself. The closure's second value says whether the
    /// map changed and the file must be rewritten.
    async fn mutate_and_persist<R>(
        &self,
        mutate: impl FnOnce(&mut HashMap<ChannelId, SaturationEntry>) -> (R, bool),
    ) -> R {
        let _ordering = self.persist_lock.lock().await;

        let (result, snapshot) = {
            let mut entries = self.entries.write().await;
            let (result, changed) = mutate(&mut entries);
            (result, changed.then(|| entries.clone()))
        };

        if let Some(snapshot) = snapshot {
            self.persist(&snapshot).await;
        }

        result
    }

    /// Atomically replace the state file with a snapshot
    ///
    /// Persistence failures are logged, never propagated: the in-memory
    /// state stays authoritative for this process.
    async fn persist(&self, snapshot: &HashMap<ChannelId, SaturationEntry>) {
        let keyed: HashMap<String, &SaturationEntry> = snapshot
            .iter()
            .map(|(channel, entry)| (channel.to_string(), entry))
            .collect();

        let encoded = match serde_json::to_vec_pretty(&keyed) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode saturation state");
                return;
            }
        };

        let tmp = self.path.with_extension("tmp");
        let written = async {
            tokio::fs::write(&tmp, &encoded).await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = written {
            tracing::warn!(
                error = %e,
                path = %self.path.display(),
                "Failed to persist saturation state"
            );
        }
    }

    async fn notify(&self, channel: ChannelId, saturated: bool) {
        if let Some(reconciler) = &self.reconciler {
            reconciler.reconcile(channel, saturated).await;
        }
    }
}

/// Load the state file, tolerating absence and corruption
async fn load_state(path: &std::path::Path) -> HashMap<ChannelId, SaturationEntry> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "Could not read saturation state");
            return HashMap::new();
        }
    };

    let raw: HashMap<String, SaturationEntry> = match serde_json::from_slice(&bytes) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "Saturation state file is corrupt, starting empty"
            );
            return HashMap::new();
        }
    };

    let mut entries = HashMap::with_capacity(raw.len());
    for (key, entry) in raw {
        match key.parse::<u64>() {
            Ok(id) => {
                entries.insert(ChannelId(id), entry);
            }
            Err(_) => {
                tracing::warn!(key = %key, "Ignoring unparseable channel key in saturation state");
            }
        }
    }

    tracing::info!(
        records = entries.len(),
        path = %path.display(),
        "Loaded saturation state"
    );

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(dir: &tempfile::TempDir, ttl: Duration, threshold: u64) -> Config {
        Config::default()
            .state_path(dir.path().join("saturation.json"))
            .ttl(ttl)
            .failure_threshold(threshold)
    }

    #[tokio::test]
    async fn test_mark_then_saturated() {
        let dir = tempfile::tempdir().unwrap();
        let store = SaturationStore::open(&test_config(&dir, Duration::from_secs(60), 1))
            .await
            .unwrap();

        assert!(!store.is_saturated(ChannelId(1)).await);
        assert_eq!(store.mark(ChannelId(1)).await, 1);
        assert!(store.is_saturated(ChannelId(1)).await);
        assert!(!store.is_saturated(ChannelId(2)).await);
    }

    #[tokio::test]
    async fn test_below_threshold_not_saturated() {
        let dir = tempfile::tempdir().unwrap();
        let store = SaturationStore::open(&test_config(&dir, Duration::from_secs(60), 2))
            .await
            .unwrap();

        store.mark(ChannelId(1)).await;
        assert!(!store.is_saturated(ChannelId(1)).await);
        // The record stays on file while failures accumulate
        assert_eq!(store.entry_count().await, 1);

        store.mark(ChannelId(1)).await;
        assert!(store.is_saturated(ChannelId(1)).await);
    }

    #[tokio::test]
    async fn test_expired_record_removed_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = SaturationStore::open(&test_config(&dir, Duration::from_millis(60), 1))
            .await
            .unwrap();

        store.mark(ChannelId(1)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!store.is_saturated(ChannelId(1)).await);
        assert_eq!(store.entry_count().await, 0);
        // Idempotent second read
        assert!(!store.is_saturated(ChannelId(1)).await);
    }

    #[tokio::test]
    async fn test_mark_restarts_count_after_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = SaturationStore::open(&test_config(&dir, Duration::from_millis(60), 2))
            .await
            .unwrap();

        assert_eq!(store.mark(ChannelId(1)).await, 1);
        tokio::time::sleep(Duration::from_millis(150)).await;

        // The first failure expired; the count starts over
        assert_eq!(store.mark(ChannelId(1)).await, 1);
        assert!(!store.is_saturated(ChannelId(1)).await);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, Duration::from_secs(60), 1);

        let store = SaturationStore::open(&config).await.unwrap();
        store.mark(ChannelId(7)).await;
        drop(store);

        // No temp file left behind by the atomic replace
        assert!(!config.state_path.with_extension("tmp").exists());

        let reopened = SaturationStore::open(&config).await.unwrap();
        assert!(reopened.is_saturated(ChannelId(7)).await);
    }

    #[tokio::test]
    async fn test_state_file_shape() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, Duration::from_secs(60), 1);

        let store = SaturationStore::open(&config).await.unwrap();
        store.mark(ChannelId(3)).await;

        let raw = std::fs::read(&config.state_path).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["3"]["failure_count"], 1);
        assert!(value["3"]["expires_at"].as_f64().unwrap() > epoch_now());
    }

    #[tokio::test]
    async fn test_corrupt_state_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, Duration::from_secs(60), 1);
        std::fs::write(&config.state_path, b"definitely not json").unwrap();

        let store = SaturationStore::open(&config).await.unwrap();
        assert_eq!(store.entry_count().await, 0);

        // The store still works after discarding the corrupt file
        store.mark(ChannelId(1)).await;
        assert!(store.is_saturated(ChannelId(1)).await);
    }

    #[tokio::test]
    async fn test_tolerant_decode_of_foreign_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, Duration::from_secs(60), 1);

        let future = epoch_now() + 300.0;
        let state = format!(
            r#"{{
                "7": {{"expires_at": {future}, "failure_count": 4, "written_by": "v2"}},
                "8": {{"expires_at": {future}}},
                "not-a-channel": {{"expires_at": {future}, "failure_count": 1}}
            }}"#
        );
        std::fs::write(&config.state_path, state).unwrap();

        let store = SaturationStore::open(&config).await.unwrap();
        assert_eq!(store.entry_count().await, 2);

        assert!(store.is_saturated(ChannelId(7)).await);
        // Missing failure_count makes the record stale; it is purged on read
        assert!(!store.is_saturated(ChannelId(8)).await);
        assert_eq!(store.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = SaturationStore::open(&test_config(&dir, Duration::from_millis(80), 1))
            .await
            .unwrap();

        store.mark(ChannelId(1)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        store.mark(ChannelId(2)).await;

        assert_eq!(store.sweep().await, 1);
        assert_eq!(store.entry_count().await, 1);
        assert!(store.is_saturated(ChannelId(2)).await);
    }

    struct RecordingReconciler {
        calls: Mutex<Vec<(ChannelId, bool)>>,
    }

    #[async_trait]
    impl ChannelReconciler for RecordingReconciler {
        async fn reconcile(&self, channel: ChannelId, saturated: bool) {
            self.calls.lock().await.push((channel, saturated));
        }
    }

    #[tokio::test]
    async fn test_reconciler_sees_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Arc::new(RecordingReconciler {
            calls: Mutex::new(Vec::new()),
        });

        let store = SaturationStore::open(&test_config(&dir, Duration::from_millis(80), 1))
            .await
            .unwrap()
            .with_reconciler(reconciler.clone());

        store.mark(ChannelId(5)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        store.sweep().await;

        let calls = reconciler.calls.lock().await;
        assert_eq!(*calls, vec![(ChannelId(5), true), (ChannelId(5), false)]);
    }

    #[tokio::test]
    async fn test_reconciler_not_called_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Arc::new(RecordingReconciler {
            calls: Mutex::new(Vec::new()),
        });

        let store = SaturationStore::open(&test_config(&dir, Duration::from_millis(80), 3))
            .await
            .unwrap()
            .with_reconciler(reconciler.clone());

        store.mark(ChannelId(5)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        store.sweep().await;

        // One failure never reached the threshold, so neither transition fired
        assert!(reconciler.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_task_purges_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SaturationStore::open(&test_config(&dir, Duration::from_millis(100), 1))
                .await
                .unwrap(),
        );

        store.mark(ChannelId(1)).await;
        let handle = store.spawn_sweep_task();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.entry_count().await, 0);

        handle.abort();
    }
}
