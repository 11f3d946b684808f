//! Admission controller implementation
//!
//! The walk that turns "a client wants this channel" into a concrete
//! stream/profile grant, an error, or a degraded admission pointing at the
//! fallback feed.

use std::sync::Arc;

use super::error::AdmissionError;
use super::ledger::{AdmissionLedger, Assignment};
use crate::catalog::{Catalog, ChannelId, ProfileId, StreamId};
use crate::config::{Config, SaturationPolicy};
use crate::saturation::SaturationStore;

/// Outcome of a successful admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A connection slot was taken and the assignment recorded
    Granted {
        /// Granted stream
        stream: StreamId,
        /// Granted profile
        profile: ProfileId,
    },
    /// The channel is saturated; serve the consumer the fallback feed
    Degraded {
        /// Last-examined stream
        stream: StreamId,
        /// Last-examined profile
        profile: ProfileId,
    },
}

/// Arbitrates access to the finite pool of upstream connections
///
/// One instance serves all channels. Racing requests for the same channel
/// serialize on that channel's assignment slot; exactly one runs the walk,
/// the rest reuse its assignment. Requests for different channels never
/// contend.
pub struct AdmissionController<C: Catalog> {
    /// Catalog the walk resolves channels, streams and accounts through
    catalog: Arc<C>,

    /// Saturation records consulted when the walk comes up empty
    saturation: Arc<SaturationStore>,

    /// Assignment slots and profile counters
    ledger: AdmissionLedger,

    /// What to do with consumers of an already-saturated channel
    policy: SaturationPolicy,
}

impl<C: Catalog> AdmissionController<C> {
    /// Create a controller over a catalog and saturation store
    pub fn new(catalog: Arc<C>, saturation: Arc<SaturationStore>, config: &Config) -> Self {
        Self {
            catalog,
            saturation,
            ledger: AdmissionLedger::new(),
            policy: config.policy,
        }
    }

    /// Admit a channel, returning its stream/profile pair
    ///
    /// Walks the channel's streams in order and each account's profiles in
    /// trial order (default first), taking the first profile with a free
    /// connection slot. Streams whose account flags no default profile are
    /// skipped outright. An already-assigned channel returns its existing
    /// pair unchanged. When every eligible profile is full the channel is
    /// marked saturated and the call fails once; while the mark is live,
    /// later calls degrade per the configured [`SaturationPolicy`] instead
    /// of repeating the error.
    pub async fn admit(&self, channel: ChannelId) -> Result<Admission, AdmissionError> {
        let slot = self.ledger.slot(channel).await;
        let mut held = slot.lock().await;

        // Idempotent re-request
        if let Some(existing) = *held {
            tracing::debug!(
                channel = %channel,
                stream = %existing.stream,
                profile = %existing.profile,
                "Existing assignment reused"
            );
            return Ok(Admission::Granted {
                stream: existing.stream,
                profile: existing.profile,
            });
        }

        let record = self
            .catalog
            .channel(channel)
            .await
            .ok_or(AdmissionError::UnknownChannel(channel))?;
        if record.streams.is_empty() {
            return Err(AdmissionError::NoStreamsAssigned(channel));
        }

        // Resolve candidates and order them by their configured position
        let mut streams = Vec::with_capacity(record.streams.len());
        for id in &record.streams {
            if let Some(stream) = self.catalog.stream(*id).await {
                streams.push(stream);
            }
        }
        streams.sort_by_key(|stream| stream.order);

        let mut saw_active = false;
        let mut capacity_hit: Option<(StreamId, ProfileId)> = None;

        for stream in &streams {
            let account_id = match stream.account {
                Some(id) => id,
                None => continue,
            };
            let account = match self.catalog.account(account_id).await {
                Some(account) => account,
                None => continue,
            };
            if account.default_profile().is_none() {
                tracing::debug!(
                    channel = %channel,
                    stream = %stream.id,
                    account = %account.id,
                    "Account flags no default profile, stream skipped"
                );
                continue;
            }

            for profile in account.trial_order() {
                if !profile.is_active {
                    continue;
                }
                saw_active = true;

                let counted = if profile.is_unlimited() {
                    false
                } else if self
                    .ledger
                    .try_count(profile.id, profile.max_connections)
                    .await
                {
                    true
                } else {
                    // Full; remember the pair and keep walking
                    capacity_hit = Some((stream.id, profile.id));
                    continue;
                };

                *held = Some(Assignment {
                    stream: stream.id,
                    profile: profile.id,
                    counted,
                });

                tracing::info!(
                    channel = %channel,
                    stream = %stream.id,
                    profile = %profile.id,
                    counted = counted,
                    "Admission granted"
                );

                return Ok(Admission::Granted {
                    stream: stream.id,
                    profile: profile.id,
                });
            }
        }

        if let Some((stream, profile)) = capacity_hit {
            // Every viable profile was active but full
            if self.saturation.is_saturated(channel).await {
                let admission = match self.policy {
                    SaturationPolicy::Substitute => Admission::Degraded { stream, profile },
                    SaturationPolicy::ReuseSlot => Admission::Granted { stream, profile },
                };

                tracing::info!(
                    channel = %channel,
                    stream = %stream,
                    profile = %profile,
                    policy = %self.policy,
                    "Channel saturated, admitting per policy"
                );

                return Ok(admission);
            }

            let failures = self.saturation.mark(channel).await;
            tracing::warn!(
                channel = %channel,
                failures = failures,
                "All profiles at capacity"
            );
            return Err(AdmissionError::AllProfilesMaxed(channel));
        }

        if saw_active {
            Err(AdmissionError::NoCompatibleProfile(channel))
        } else {
            Err(AdmissionError::NoActiveProfiles(channel))
        }
    }

    /// Release a channel's assignment
    ///
    /// Decrements the profile counter iff the grant incremented it, then
    /// clears the slot. Idempotent: releasing an unassigned channel is a
    /// no-op.
    pub async fn release(&self, channel: ChannelId) {
        let slot = self.ledger.slot(channel).await;
        let mut held = slot.lock().await;

        match held.take() {
            Some(assignment) => {
                if assignment.counted {
                    self.ledger.uncount(assignment.profile).await;
                }
                tracing::info!(
                    channel = %channel,
                    stream = %assignment.stream,
                    profile = %assignment.profile,
                    "Assignment released"
                );
            }
            None => {
                tracing::debug!(channel = %channel, "Release with no assignment");
            }
        }
    }

    /// Current assignment for a channel, if any
    pub async fn assignment_for(&self, channel: ChannelId) -> Option<Assignment> {
        self.ledger.assignment_for(channel).await
    }

    /// Live connection count for a profile
    pub async fn connection_count(&self, profile: ProfileId) -> u32 {
        self.ledger.connection_count(profile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Account, AccountId, Channel, MemoryCatalog, Profile, Stream};
    use std::time::Duration;

    async fn setup(
        config: Config,
        dir: &tempfile::TempDir,
    ) -> (Arc<MemoryCatalog>, AdmissionController<MemoryCatalog>) {
        let config = config.state_path(dir.path().join("saturation.json"));
        let catalog = Arc::new(MemoryCatalog::new());
        let saturation = Arc::new(SaturationStore::open(&config).await.unwrap());
        let controller = AdmissionController::new(Arc::clone(&catalog), saturation, &config);
        (catalog, controller)
    }

    /// Channel 1 -> stream 10 -> account 5 -> the given profile, flagged default
    async fn seed_single(catalog: &MemoryCatalog, profile: Profile) {
        catalog
            .put_channel(Channel::new(ChannelId(1), "one", vec![StreamId(10)]))
            .await;
        catalog
            .put_stream(Stream::new(StreamId(10), "one-hd", Some(AccountId(5)), 0))
            .await;
        catalog
            .put_account(Account::new(
                AccountId(5),
                "acct",
                vec![profile.default_profile()],
            ))
            .await;
    }

    /// Channels 1 and 2 with their own streams, sharing account 5
    async fn seed_shared_pool(catalog: &MemoryCatalog, profile: Profile) {
        catalog
            .put_channel(Channel::new(ChannelId(1), "one", vec![StreamId(10)]))
            .await;
        catalog
            .put_channel(Channel::new(ChannelId(2), "two", vec![StreamId(20)]))
            .await;
        catalog
            .put_stream(Stream::new(StreamId(10), "one-hd", Some(AccountId(5)), 0))
            .await;
        catalog
            .put_stream(Stream::new(StreamId(20), "two-hd", Some(AccountId(5)), 0))
            .await;
        catalog
            .put_account(Account::new(
                AccountId(5),
                "acct",
                vec![profile.default_profile()],
            ))
            .await;
    }

    #[tokio::test]
    async fn test_admit_grants_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        seed_single(&catalog, Profile::new(ProfileId(50), "main", 2)).await;

        let admission = controller.admit(ChannelId(1)).await.unwrap();
        assert_eq!(
            admission,
            Admission::Granted {
                stream: StreamId(10),
                profile: ProfileId(50),
            }
        );
        assert_eq!(controller.connection_count(ProfileId(50)).await, 1);

        let assignment = controller.assignment_for(ChannelId(1)).await.unwrap();
        assert!(assignment.counted);
    }

    #[tokio::test]
    async fn test_admit_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        seed_single(&catalog, Profile::new(ProfileId(50), "main", 2)).await;

        let first = controller.admit(ChannelId(1)).await.unwrap();
        let second = controller.admit(ChannelId(1)).await.unwrap();

        assert_eq!(first, second);
        // The re-request must not double-count
        assert_eq!(controller.connection_count(ProfileId(50)).await, 1);
    }

    #[tokio::test]
    async fn test_unlimited_profile_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        seed_single(&catalog, Profile::new(ProfileId(50), "main", 0)).await;

        let admission = controller.admit(ChannelId(1)).await.unwrap();
        assert!(matches!(admission, Admission::Granted { .. }));
        assert_eq!(controller.connection_count(ProfileId(50)).await, 0);

        let assignment = controller.assignment_for(ChannelId(1)).await.unwrap();
        assert!(!assignment.counted);
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let dir = tempfile::tempdir().unwrap();
        let (_catalog, controller) = setup(Config::default(), &dir).await;

        let result = controller.admit(ChannelId(404)).await;
        assert!(matches!(result, Err(AdmissionError::UnknownChannel(_))));
    }

    #[tokio::test]
    async fn test_channel_without_streams() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        catalog
            .put_channel(Channel::new(ChannelId(1), "empty", vec![]))
            .await;

        let result = controller.admit(ChannelId(1)).await;
        assert!(matches!(result, Err(AdmissionError::NoStreamsAssigned(_))));
    }

    #[tokio::test]
    async fn test_no_active_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        seed_single(&catalog, Profile::new(ProfileId(50), "main", 2).inactive()).await;

        let result = controller.admit(ChannelId(1)).await;
        assert!(matches!(result, Err(AdmissionError::NoActiveProfiles(_))));
    }

    #[tokio::test]
    async fn test_stream_without_account_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        catalog
            .put_channel(Channel::new(ChannelId(1), "one", vec![StreamId(10)]))
            .await;
        catalog
            .put_stream(Stream::new(StreamId(10), "orphan", None, 0))
            .await;

        let result = controller.admit(ChannelId(1)).await;
        assert!(matches!(result, Err(AdmissionError::NoActiveProfiles(_))));
    }

    #[tokio::test]
    async fn test_account_without_default_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        catalog
            .put_channel(Channel::new(ChannelId(1), "one", vec![StreamId(10)]))
            .await;
        catalog
            .put_stream(Stream::new(StreamId(10), "one-hd", Some(AccountId(5)), 0))
            .await;
        catalog
            .put_account(Account::new(
                AccountId(5),
                "acct",
                vec![Profile::new(ProfileId(50), "main", 2)],
            ))
            .await;

        // An active profile alone is not enough; the account must flag it
        let result = controller.admit(ChannelId(1)).await;
        assert!(matches!(result, Err(AdmissionError::NoActiveProfiles(_))));
        assert_eq!(controller.connection_count(ProfileId(50)).await, 0);
    }

    #[tokio::test]
    async fn test_account_without_default_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        catalog
            .put_channel(Channel::new(
                ChannelId(1),
                "one",
                vec![StreamId(10), StreamId(11)],
            ))
            .await;
        catalog
            .put_stream(Stream::new(StreamId(10), "flagless", Some(AccountId(5)), 0))
            .await;
        catalog
            .put_stream(Stream::new(StreamId(11), "flagged", Some(AccountId(6)), 1))
            .await;
        catalog
            .put_account(Account::new(
                AccountId(5),
                "no-default",
                vec![Profile::new(ProfileId(50), "main", 2)],
            ))
            .await;
        catalog
            .put_account(Account::new(
                AccountId(6),
                "has-default",
                vec![Profile::new(ProfileId(60), "main", 2).default_profile()],
            ))
            .await;

        let admission = controller.admit(ChannelId(1)).await.unwrap();
        assert_eq!(
            admission,
            Admission::Granted {
                stream: StreamId(11),
                profile: ProfileId(60),
            }
        );
        assert_eq!(controller.connection_count(ProfileId(50)).await, 0);
    }

    #[tokio::test]
    async fn test_default_profile_tried_first() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        seed_single(&catalog, Profile::new(ProfileId(50), "first", 2)).await;
        catalog
            .put_account(Account::new(
                AccountId(5),
                "acct",
                vec![
                    Profile::new(ProfileId(50), "first", 2),
                    Profile::new(ProfileId(51), "preferred", 2).default_profile(),
                ],
            ))
            .await;

        let admission = controller.admit(ChannelId(1)).await.unwrap();
        assert_eq!(
            admission,
            Admission::Granted {
                stream: StreamId(10),
                profile: ProfileId(51),
            }
        );
    }

    #[tokio::test]
    async fn test_inactive_default_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        seed_single(&catalog, Profile::new(ProfileId(50), "main", 2)).await;
        catalog
            .put_account(Account::new(
                AccountId(5),
                "acct",
                vec![
                    Profile::new(ProfileId(50), "second", 2),
                    Profile::new(ProfileId(51), "dead", 2)
                        .default_profile()
                        .inactive(),
                ],
            ))
            .await;

        let admission = controller.admit(ChannelId(1)).await.unwrap();
        assert_eq!(
            admission,
            Admission::Granted {
                stream: StreamId(10),
                profile: ProfileId(50),
            }
        );
    }

    #[tokio::test]
    async fn test_streams_walked_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        catalog
            .put_channel(Channel::new(
                ChannelId(1),
                "one",
                vec![StreamId(10), StreamId(11)],
            ))
            .await;
        // Listed first but ordered second
        catalog
            .put_stream(Stream::new(StreamId(10), "backup", Some(AccountId(5)), 1))
            .await;
        catalog
            .put_stream(Stream::new(StreamId(11), "primary", Some(AccountId(6)), 0))
            .await;
        catalog
            .put_account(Account::new(
                AccountId(5),
                "a",
                vec![Profile::new(ProfileId(50), "a", 2).default_profile()],
            ))
            .await;
        catalog
            .put_account(Account::new(
                AccountId(6),
                "b",
                vec![Profile::new(ProfileId(60), "b", 2).default_profile()],
            ))
            .await;

        let admission = controller.admit(ChannelId(1)).await.unwrap();
        assert_eq!(
            admission,
            Admission::Granted {
                stream: StreamId(11),
                profile: ProfileId(60),
            }
        );
    }

    #[tokio::test]
    async fn test_full_profile_falls_through_to_next_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        catalog
            .put_channel(Channel::new(
                ChannelId(1),
                "one",
                vec![StreamId(10), StreamId(11)],
            ))
            .await;
        catalog
            .put_channel(Channel::new(ChannelId(2), "two", vec![StreamId(20)]))
            .await;
        catalog
            .put_stream(Stream::new(StreamId(10), "a", Some(AccountId(5)), 0))
            .await;
        catalog
            .put_stream(Stream::new(StreamId(11), "b", Some(AccountId(6)), 1))
            .await;
        catalog
            .put_stream(Stream::new(StreamId(20), "c", Some(AccountId(5)), 0))
            .await;
        catalog
            .put_account(Account::new(
                AccountId(5),
                "small",
                vec![Profile::new(ProfileId(50), "tight", 1).default_profile()],
            ))
            .await;
        catalog
            .put_account(Account::new(
                AccountId(6),
                "spare",
                vec![Profile::new(ProfileId(60), "room", 1).default_profile()],
            ))
            .await;

        // Channel 2 takes the only slot on profile 50
        controller.admit(ChannelId(2)).await.unwrap();

        // Channel 1 falls through its first stream to the spare account
        let admission = controller.admit(ChannelId(1)).await.unwrap();
        assert_eq!(
            admission,
            Admission::Granted {
                stream: StreamId(11),
                profile: ProfileId(60),
            }
        );
    }

    #[tokio::test]
    async fn test_all_maxed_marks_then_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().failure_threshold(1);
        let (catalog, controller) = setup(config, &dir).await;
        seed_shared_pool(&catalog, Profile::new(ProfileId(50), "tight", 1)).await;

        // Channel 1 takes the only slot
        controller.admit(ChannelId(1)).await.unwrap();
        assert_eq!(controller.connection_count(ProfileId(50)).await, 1);

        // First failure marks the channel saturated
        let result = controller.admit(ChannelId(2)).await;
        assert!(matches!(result, Err(AdmissionError::AllProfilesMaxed(_))));

        // While the mark is live, admission degrades to the fallback pair
        let admission = controller.admit(ChannelId(2)).await.unwrap();
        assert_eq!(
            admission,
            Admission::Degraded {
                stream: StreamId(20),
                profile: ProfileId(50),
            }
        );

        // Degraded admissions record nothing and count nothing
        assert!(controller.assignment_for(ChannelId(2)).await.is_none());
        assert_eq!(controller.connection_count(ProfileId(50)).await, 1);
    }

    #[tokio::test]
    async fn test_reuse_slot_policy_grants_full_pair() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default()
            .failure_threshold(1)
            .policy(SaturationPolicy::ReuseSlot);
        let (catalog, controller) = setup(config, &dir).await;
        seed_shared_pool(&catalog, Profile::new(ProfileId(50), "tight", 1)).await;

        controller.admit(ChannelId(1)).await.unwrap();
        let _ = controller.admit(ChannelId(2)).await;

        let admission = controller.admit(ChannelId(2)).await.unwrap();
        assert_eq!(
            admission,
            Admission::Granted {
                stream: StreamId(20),
                profile: ProfileId(50),
            }
        );
        // The slot is reused, not taken
        assert!(controller.assignment_for(ChannelId(2)).await.is_none());
        assert_eq!(controller.connection_count(ProfileId(50)).await, 1);
    }

    #[tokio::test]
    async fn test_release_gives_back_slot() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        seed_single(&catalog, Profile::new(ProfileId(50), "main", 1)).await;

        controller.admit(ChannelId(1)).await.unwrap();
        assert_eq!(controller.connection_count(ProfileId(50)).await, 1);

        controller.release(ChannelId(1)).await;
        assert_eq!(controller.connection_count(ProfileId(50)).await, 0);
        assert!(controller.assignment_for(ChannelId(1)).await.is_none());

        // Releasing again is a no-op
        controller.release(ChannelId(1)).await;
        assert_eq!(controller.connection_count(ProfileId(50)).await, 0);

        // The slot can be taken afresh
        let admission = controller.admit(ChannelId(1)).await.unwrap();
        assert!(matches!(admission, Admission::Granted { .. }));
    }

    #[tokio::test]
    async fn test_release_unassigned_channel_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (_catalog, controller) = setup(Config::default(), &dir).await;

        controller.release(ChannelId(99)).await;
        assert!(controller.assignment_for(ChannelId(99)).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_admits_single_increment() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, controller) = setup(Config::default(), &dir).await;
        seed_single(&catalog, Profile::new(ProfileId(50), "main", 5)).await;

        let controller = Arc::new(controller);
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let controller = Arc::clone(&controller);
            tasks.push(tokio::spawn(
                async move { controller.admit(ChannelId(1)).await },
            ));
        }

        let mut admissions = Vec::new();
        for task in tasks {
            admissions.push(task.await.unwrap().unwrap());
        }

        // Exactly one walk ran; everyone saw the same pair
        assert!(admissions.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(controller.connection_count(ProfileId(50)).await, 1);
    }

    #[tokio::test]
    async fn test_capacity_cycle_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default()
            .failure_threshold(1)
            .ttl(Duration::from_millis(150));
        let (catalog, controller) = setup(config, &dir).await;
        seed_shared_pool(&catalog, Profile::new(ProfileId(50), "tight", 1)).await;

        // Grant takes the only slot
        let first = controller.admit(ChannelId(1)).await.unwrap();
        assert!(matches!(first, Admission::Granted { .. }));

        // Capacity hit: marked saturated, error surfaced once
        let second = controller.admit(ChannelId(2)).await;
        assert!(matches!(second, Err(AdmissionError::AllProfilesMaxed(_))));

        // Within the TTL: degraded admission, no error storm
        let third = controller.admit(ChannelId(2)).await.unwrap();
        assert!(matches!(third, Admission::Degraded { .. }));

        // After expiry the mark is gone; failure semantics start over
        tokio::time::sleep(Duration::from_millis(250)).await;
        let fourth = controller.admit(ChannelId(2)).await;
        assert!(matches!(fourth, Err(AdmissionError::AllProfilesMaxed(_))));

        // The real slot was never double-counted along the way
        assert_eq!(controller.connection_count(ProfileId(50)).await, 1);
    }
}
