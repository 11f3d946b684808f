//! Assignment slots and profile connection counters
//!
//! The shared mutable state behind admission decisions. Each channel owns a
//! slot (mutex over an optional [`Assignment`]) that is held across the
//! whole admission walk, so racing requests for one channel serialize there
//! while unrelated channels proceed in parallel. Each profile owns an atomic
//! connection counter updated with compare-and-swap, never read-modify-write.
//!
//! Slots and counters are created on first use and afterwards only cleared,
//! never removed; both maps are bounded by catalog size.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::catalog::{ChannelId, ProfileId, StreamId};

/// An ephemeral binding of a channel to its granted stream/profile pair
///
/// `counted` records whether the grant incremented the profile counter
/// (it does not for unlimited profiles), so release only decrements what
/// admission incremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// Granted stream
    pub stream: StreamId,
    /// Granted profile
    pub profile: ProfileId,
    /// Whether the profile counter was incremented for this grant
    pub counted: bool,
}

/// Shared admission state, keyed per channel and per profile
#[derive(Debug, Default)]
pub struct AdmissionLedger {
    /// Per-channel assignment slot
    slots: RwLock<HashMap<ChannelId, Arc<Mutex<Option<Assignment>>>>>,

    /// Per-profile live connection counter
    counters: RwLock<HashMap<ProfileId, Arc<AtomicU32>>>,
}

impl AdmissionLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// The assignment slot for a channel, created on first use
    pub async fn slot(&self, channel: ChannelId) -> Arc<Mutex<Option<Assignment>>> {
        if let Some(slot) = self.slots.read().await.get(&channel) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(channel).or_default())
    }

    /// Take one connection slot on a profile with room left
    ///
    /// Compare-and-swap loop: increments only while `current < max`, so two
    /// walks racing for one remaining slot cannot both win. Callers handle
    /// unlimited profiles (`max == 0`) themselves; those are never counted.
    pub async fn try_count(&self, profile: ProfileId, max: u32) -> bool {
        let counter = self.counter(profile).await;
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                if current < max {
                    Some(current + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Give back one counted connection slot
    ///
    /// Never underflows; releasing more than was counted is a no-op.
    pub async fn uncount(&self, profile: ProfileId) {
        let counter = self.counter(profile).await;
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
            current.checked_sub(1)
        });
    }

    /// Live connection count for a profile
    pub async fn connection_count(&self, profile: ProfileId) -> u32 {
        match self.counters.read().await.get(&profile) {
            Some(counter) => counter.load(Ordering::Relaxed),
            None => 0,
        }
    }

    /// Current assignment for a channel, if any
    pub async fn assignment_for(&self, channel: ChannelId) -> Option<Assignment> {
        let slot = self.slots.read().await.get(&channel).map(Arc::clone)?;
        let assignment = slot.lock().await;
        *assignment
    }

    async fn counter(&self, profile: ProfileId) -> Arc<AtomicU32> {
        if let Some(counter) = self.counters.read().await.get(&profile) {
            return Arc::clone(counter);
        }

        let mut counters = self.counters.write().await;
        Arc::clone(counters.entry(profile).or_default())
    }
}
