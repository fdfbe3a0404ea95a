//! Error types for the relocation core
//!
//! Input errors and empty results are kept apart so callers can tell
//! "you asked for something invalid" from "there was nothing to do".

use thiserror::Error;

/// Errors that can occur while selecting or acting on voice members
#[derive(Debug, Error)]
pub enum RelocError {
    /// None of the referenced channels resolved to a voice channel
    #[error("Invalid channel")]
    InvalidChannel,

    /// None of the referenced roles exist in the guild
    #[error("Invalid role")]
    InvalidRole,

    /// No users were referenced
    #[error("No users specified")]
    NoUsers,

    /// More targets were referenced than a source allows
    #[error("Too many {kind}: at most {max} allowed")]
    TooManyTargets { kind: &'static str, max: usize },

    /// Source and target channel of a move are the same
    #[error("Channels are identical")]
    IdenticalChannels,

    /// The request was not made from within a guild
    #[error("Not in a guild")]
    NotInGuild,

    /// The source resolved but holds no eligible members
    #[error("No users found in voice channels")]
    NoMembers,

    /// The member could not be found in the guild
    #[error("Could not find member {0}")]
    MemberNotFound(u64),

    /// The member is not connected to a voice channel
    #[error("Member is not in a voice channel")]
    NotInVoice,

    /// Discord API error
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<poise::serenity_prelude::Error>),

    /// Any other platform failure
    #[error("Platform error: {0}")]
    Platform(String),
}

impl From<poise::serenity_prelude::Error> for RelocError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::DiscordApi(Box::new(error))
    }
}

impl From<String> for RelocError {
    fn from(message: String) -> Self {
        Self::Platform(message)
    }
}

impl RelocError {
    /// Whether the error stems from an invalid or unresolvable request
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidChannel
                | Self::InvalidRole
                | Self::NoUsers
                | Self::TooManyTargets { .. }
                | Self::IdenticalChannels
                | Self::NotInGuild
        )
    }

    /// Whether the request was valid but matched nobody
    #[must_use]
    pub const fn is_empty_result(&self) -> bool {
        matches!(self, Self::NoMembers)
    }
}

/// Result type for relocation operations
pub type RelocResult<T> = Result<T, RelocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(RelocError::InvalidChannel.to_string(), "Invalid channel");
        assert_eq!(
            RelocError::IdenticalChannels.to_string(),
            "Channels are identical"
        );
        assert_eq!(
            RelocError::TooManyTargets {
                kind: "channels",
                max: 5
            }
            .to_string(),
            "Too many channels: at most 5 allowed"
        );

        let error = RelocError::from("gateway closed".to_string());
        assert_eq!(error.to_string(), "Platform error: gateway closed");
    }

    #[test]
    fn test_error_classification() {
        assert!(RelocError::InvalidRole.is_input_error());
        assert!(RelocError::IdenticalChannels.is_input_error());
        assert!(!RelocError::InvalidRole.is_empty_result());

        assert!(RelocError::NoMembers.is_empty_result());
        assert!(!RelocError::NoMembers.is_input_error());

        let platform = RelocError::Platform("denied".to_string());
        assert!(!platform.is_input_error());
        assert!(!platform.is_empty_result());
    }
}
