//! Admission error types

use crate::catalog::ChannelId;

/// Error type for admission decisions
///
/// `AllProfilesMaxed` is the only transient variant; the others describe
/// catalog shapes the walk cannot admit against and are surfaced unchanged.
#[derive(Debug, Clone)]
pub enum AdmissionError {
    /// Channel not present in the catalog
    UnknownChannel(ChannelId),
    /// Channel has no candidate streams
    NoStreamsAssigned(ChannelId),
    /// No stream on the channel reaches an active profile
    NoActiveProfiles(ChannelId),
    /// Active profiles exist but none could serve the request
    NoCompatibleProfile(ChannelId),
    /// Every eligible profile is at capacity
    AllProfilesMaxed(ChannelId),
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionError::UnknownChannel(id) => write!(f, "Unknown channel: {}", id),
            AdmissionError::NoStreamsAssigned(id) => {
                write!(f, "Channel {} has no streams assigned", id)
            }
            AdmissionError::NoActiveProfiles(id) => {
                write!(f, "Channel {} has no active profiles", id)
            }
            AdmissionError::NoCompatibleProfile(id) => {
                write!(f, "Channel {} has no compatible profile", id)
            }
            AdmissionError::AllProfilesMaxed(id) => {
                write!(f, "All profiles for channel {} are at capacity", id)
            }
        }
    }
}

impl std::error::Error for AdmissionError {}
