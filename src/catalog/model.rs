//! Catalog entity types
//!
//! The resource hierarchy the admission walk operates on:
//! a channel carries an ordered list of streams, each stream belongs to an
//! account, and each account owns an ordered list of connection-limited
//! profiles. All entities are plain snapshots handed out by a [`Catalog`]
//! implementation; live state (connection counters, saturation flags) is
//! never stored on them.
//!
//! [`Catalog`]: super::Catalog

/// Unique identifier for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

/// Unique identifier for a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

/// Unique identifier for an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub u64);

/// Unique identifier for a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileId(pub u64);

macro_rules! display_id {
    ($ty:ty) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $ty {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

display_id!(ChannelId);
display_id!(StreamId);
display_id!(AccountId);
display_id!(ProfileId);

/// A channel as seen by the admission walk
///
/// `streams` holds references only; the walk resolves each through the
/// catalog and orders them by [`Stream::order`]. Whether a channel is
/// saturated is derived from the saturation store, never stored here.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Channel identifier
    pub id: ChannelId,
    /// Human-readable name (logging only)
    pub name: String,
    /// Candidate streams for this channel
    pub streams: Vec<StreamId>,
}

impl Channel {
    /// Create a new channel snapshot
    pub fn new(id: ChannelId, name: impl Into<String>, streams: Vec<StreamId>) -> Self {
        Self {
            id,
            name: name.into(),
            streams,
        }
    }
}

/// A single upstream source belonging to a channel
#[derive(Debug, Clone)]
pub struct Stream {
    /// Stream identifier
    pub id: StreamId,
    /// Human-readable name (logging only)
    pub name: String,
    /// Owning account; streams without one are skipped by the walk
    pub account: Option<AccountId>,
    /// Position of this stream within its channel (stable sort key)
    pub order: u32,
}

impl Stream {
    /// Create a new stream snapshot
    pub fn new(
        id: StreamId,
        name: impl Into<String>,
        account: Option<AccountId>,
        order: u32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            account,
            order,
        }
    }
}

/// An upstream account owning an ordered set of profiles
#[derive(Debug, Clone)]
pub struct Account {
    /// Account identifier
    pub id: AccountId,
    /// Human-readable name (logging only)
    pub name: String,
    /// Profiles in their configured order; at most one is flagged default
    pub profiles: Vec<Profile>,
}

impl Account {
    /// Create a new account snapshot
    pub fn new(id: AccountId, name: impl Into<String>, profiles: Vec<Profile>) -> Self {
        Self {
            id,
            name: name.into(),
            profiles,
        }
    }

    /// The account's default profile, if one is flagged
    pub fn default_profile(&self) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.is_default)
    }

    /// Profiles in trial order: the default first, then the rest in their
    /// configured order. An account that flags no default yields nothing;
    /// admission never goes through such an account.
    pub fn trial_order(&self) -> impl Iterator<Item = &Profile> {
        let eligible = self.default_profile().is_some();
        let default = self.profiles.iter().filter(|p| p.is_default);
        let rest = self.profiles.iter().filter(|p| !p.is_default);
        eligible.then(|| default.chain(rest)).into_iter().flatten()
    }
}

/// A connection-limited path through which an upstream stream may be fetched
#[derive(Debug, Clone)]
pub struct Profile {
    /// Profile identifier
    pub id: ProfileId,
    /// Human-readable name (logging only)
    pub name: String,
    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: u32,
    /// Inactive profiles are skipped by the walk
    pub is_active: bool,
    /// Tried first within its account
    pub is_default: bool,
}

impl Profile {
    /// Create a new profile snapshot
    pub fn new(id: ProfileId, name: impl Into<String>, max_connections: u32) -> Self {
        Self {
            id,
            name: name.into(),
            max_connections,
            is_active: true,
            is_default: false,
        }
    }

    /// Flag this profile as the account default
    pub fn default_profile(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Mark this profile inactive
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Whether the profile accepts any number of concurrent connections
    pub fn is_unlimited(&self) -> bool {
        self.max_connections == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(ChannelId(7).to_string(), "7");
        assert_eq!(ProfileId(42).to_string(), "42");
    }

    #[test]
    fn test_trial_order_default_first() {
        let account = Account::new(
            AccountId(1),
            "acct",
            vec![
                Profile::new(ProfileId(1), "a", 1),
                Profile::new(ProfileId(2), "b", 1).default_profile(),
                Profile::new(ProfileId(3), "c", 1),
            ],
        );

        let order: Vec<u64> = account.trial_order().map(|p| p.id.0).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn test_trial_order_empty_without_default() {
        let account = Account::new(
            AccountId(1),
            "acct",
            vec![
                Profile::new(ProfileId(1), "a", 1),
                Profile::new(ProfileId(2), "b", 1),
            ],
        );

        assert!(account.default_profile().is_none());
        assert_eq!(account.trial_order().count(), 0);
    }

    #[test]
    fn test_profile_unlimited() {
        assert!(Profile::new(ProfileId(1), "p", 0).is_unlimited());
        assert!(!Profile::new(ProfileId(1), "p", 3).is_unlimited());
    }
}
