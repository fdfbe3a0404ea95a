//! Platform interface consumed by the relocation core
//!
//! The core never talks to Discord directly. Everything it needs from the
//! gateway or the REST API goes through [`VoicePlatform`], which keeps the
//! selection pipeline, executor and quit flow testable with mocks.

use crate::relocation::{MemberSource, RelocResult};
use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, UserId};

#[cfg(test)]
use mockall::automock;

/// A live guild member as seen by the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberHandle {
    /// Guild the member resides in
    pub guild_id: GuildId,
    /// The member's user ID
    pub user_id: UserId,
    /// Whether the user is a bot account
    pub is_bot: bool,
    /// Voice channel the member is connected to, if any
    pub voice_channel_id: Option<ChannelId>,
    /// Name used in log lines
    pub display_name: String,
}

impl MemberHandle {
    #[must_use]
    pub fn new(
        guild_id: GuildId,
        user_id: UserId,
        is_bot: bool,
        voice_channel_id: Option<ChannelId>,
    ) -> Self {
        Self {
            guild_id,
            user_id,
            is_bot,
            voice_channel_id,
            display_name: user_id.to_string(),
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Whether the member currently occupies a voice channel
    #[must_use]
    pub const fn in_voice(&self) -> bool {
        self.voice_channel_id.is_some()
    }
}

/// A message posted by the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHandle {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

/// What the bot may do in the channel a deferred quit was requested from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnouncementPermissions {
    pub can_manage_messages: bool,
    pub can_send_messages: bool,
}

/// Capabilities the core needs from the platform binding
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VoicePlatform: Send + Sync {
    /// Resolve a member source to the voice-connected members it covers.
    ///
    /// # Errors
    ///
    /// Returns an input error when none of the referenced channels or roles
    /// resolve in the guild.
    async fn resolve_voice_members(
        &self,
        guild_id: GuildId,
        source: &MemberSource,
    ) -> RelocResult<Vec<MemberHandle>>;

    /// Look up a single member, `None` if they are not in the guild
    async fn fetch_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> RelocResult<Option<MemberHandle>>;

    /// Whether the channel exists in the guild and is voice based
    async fn is_voice_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> bool;

    /// Disconnect a member from voice
    async fn disconnect(&self, member: &MemberHandle, reason: &str) -> RelocResult<MemberHandle>;

    /// Move a member into another voice channel
    async fn move_to(
        &self,
        member: &MemberHandle,
        channel_id: ChannelId,
        reason: &str,
    ) -> RelocResult<MemberHandle>;

    /// Post a message in a channel
    async fn announce(&self, channel_id: ChannelId, text: &str) -> RelocResult<MessageHandle>;

    /// Delete a previously posted message
    async fn delete_message(&self, message: &MessageHandle) -> RelocResult<()>;

    /// The bot's own permissions in a channel
    async fn current_permissions(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> AnnouncementPermissions;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_handle_voice_state() {
        let connected = MemberHandle::new(
            GuildId::new(1),
            UserId::new(2),
            false,
            Some(ChannelId::new(3)),
        );
        assert!(connected.in_voice());
        assert_eq!(connected.display_name, "2");

        let idle = MemberHandle::new(GuildId::new(1), UserId::new(4), true, None)
            .with_display_name("Robot");
        assert!(!idle.in_voice());
        assert_eq!(idle.display_name, "Robot");
    }

    #[test]
    fn test_default_permissions_deny_everything() {
        let perms = AnnouncementPermissions::default();
        assert!(!perms.can_manage_messages);
        assert!(!perms.can_send_messages);
    }
}
