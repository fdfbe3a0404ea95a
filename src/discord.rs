//! Serenity implementation of [`VoicePlatform`]
//!
//! Voice membership is read from the gateway cache. Members missing from the
//! cache are fetched over HTTP.

use crate::relocation::{
    AnnouncementPermissions, MemberHandle, MemberSource, MessageHandle, RelocError, RelocResult,
    VoicePlatform,
};
use async_trait::async_trait;
use poise::serenity_prelude::{
    Cache, ChannelId, ChannelType, EditMember, GuildId, Http, Member, Permissions, RoleId, UserId,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Whether a channel kind can hold voice members
#[must_use]
pub const fn is_voice_kind(kind: ChannelType) -> bool {
    matches!(kind, ChannelType::Voice | ChannelType::Stage)
}

/// Reduce a permission set to what announcements need
#[must_use]
pub fn announcement_permissions(permissions: Permissions) -> AnnouncementPermissions {
    AnnouncementPermissions {
        can_manage_messages: permissions.contains(Permissions::MANAGE_MESSAGES),
        can_send_messages: permissions.contains(Permissions::SEND_MESSAGES),
    }
}

fn to_handle(
    guild_id: GuildId,
    member: &Member,
    voice_channel_id: Option<ChannelId>,
) -> MemberHandle {
    MemberHandle::new(guild_id, member.user.id, member.user.bot, voice_channel_id)
        .with_display_name(member.display_name())
}

/// A voice-connected user as read from the cache
struct VoiceEntry {
    user_id: UserId,
    channel_id: ChannelId,
    member: Option<Member>,
}

/// Which voice entries a source keeps
enum SourceFilter {
    All,
    Channels(HashSet<ChannelId>),
    Roles(HashSet<RoleId>),
    Users(HashSet<UserId>),
}

/// Platform binding backed by serenity's HTTP client and cache
#[derive(Clone)]
pub struct DiscordPlatform {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl DiscordPlatform {
    #[must_use]
    pub const fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache }
    }

    /// Validate the source against the cached guild and copy out its voice states
    fn snapshot(
        &self,
        guild_id: GuildId,
        source: &MemberSource,
    ) -> RelocResult<(SourceFilter, Vec<VoiceEntry>)> {
        let guild = self.cache.guild(guild_id).ok_or(RelocError::NotInGuild)?;

        let filter = match source {
            MemberSource::Guild => SourceFilter::All,
            MemberSource::Channels(ids) => {
                let valid: HashSet<_> = ids
                    .iter()
                    .copied()
                    .filter(|id| guild.channels.get(id).is_some_and(|c| is_voice_kind(c.kind)))
                    .collect();
                if valid.is_empty() {
                    return Err(RelocError::InvalidChannel);
                }
                SourceFilter::Channels(valid)
            }
            MemberSource::Roles(ids) => {
                let valid: HashSet<_> = ids
                    .iter()
                    .copied()
                    .filter(|id| guild.roles.contains_key(id))
                    .collect();
                if valid.is_empty() {
                    return Err(RelocError::InvalidRole);
                }
                SourceFilter::Roles(valid)
            }
            MemberSource::Users(ids) => SourceFilter::Users(ids.iter().copied().collect()),
        };

        let entries = guild
            .voice_states
            .values()
            .filter_map(|state| {
                let channel_id = state.channel_id?;
                let keep = match &filter {
                    SourceFilter::Channels(channels) => channels.contains(&channel_id),
                    SourceFilter::Users(users) => users.contains(&state.user_id),
                    SourceFilter::All | SourceFilter::Roles(_) => true,
                };
                keep.then(|| VoiceEntry {
                    user_id: state.user_id,
                    channel_id,
                    member: guild
                        .members
                        .get(&state.user_id)
                        .cloned()
                        .or_else(|| state.member.clone()),
                })
            })
            .collect();

        Ok((filter, entries))
    }

    fn cached_voice_channel(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Option<(Option<ChannelId>, Option<Member>)> {
        let guild = self.cache.guild(guild_id)?;
        let channel = guild
            .voice_states
            .get(&user_id)
            .and_then(|state| state.channel_id);
        Some((channel, guild.members.get(&user_id).cloned()))
    }

    fn cached_permissions(&self, guild_id: GuildId, channel_id: ChannelId) -> Option<Permissions> {
        let me = self.cache.current_user().id;
        let guild = self.cache.guild(guild_id)?;
        let channel = guild.channels.get(&channel_id)?;
        let member = guild.members.get(&me)?;
        Some(guild.user_permissions_in(channel, member))
    }

    async fn member_or_fetch(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        cached: Option<Member>,
    ) -> RelocResult<Member> {
        if let Some(member) = cached {
            return Ok(member);
        }
        Ok(guild_id.member(&*self.http, user_id).await?)
    }
}

#[async_trait]
impl VoicePlatform for DiscordPlatform {
    async fn resolve_voice_members(
        &self,
        guild_id: GuildId,
        source: &MemberSource,
    ) -> RelocResult<Vec<MemberHandle>> {
        let (filter, entries) = self.snapshot(guild_id, source)?;

        let mut members = Vec::with_capacity(entries.len());
        for entry in entries {
            let member = match self.member_or_fetch(guild_id, entry.user_id, entry.member).await {
                Ok(member) => member,
                Err(e) => {
                    debug!("Skipping voice member {} in guild {guild_id}: {e}", entry.user_id);
                    continue;
                }
            };
            if let SourceFilter::Roles(roles) = &filter {
                if !member.roles.iter().any(|role| roles.contains(role)) {
                    continue;
                }
            }
            members.push(to_handle(guild_id, &member, Some(entry.channel_id)));
        }

        Ok(members)
    }

    async fn fetch_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> RelocResult<Option<MemberHandle>> {
        let (channel, cached) = self
            .cached_voice_channel(guild_id, user_id)
            .ok_or(RelocError::NotInGuild)?;

        match self.member_or_fetch(guild_id, user_id, cached).await {
            Ok(member) => Ok(Some(to_handle(guild_id, &member, channel))),
            Err(e) => {
                debug!("Member {user_id} not found in guild {guild_id}: {e}");
                Ok(None)
            }
        }
    }

    async fn is_voice_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        let cached = self.cache.guild(guild_id).map(|guild| {
            guild
                .channels
                .get(&channel_id)
                .is_some_and(|c| is_voice_kind(c.kind))
        });
        if let Some(is_voice) = cached {
            return is_voice;
        }

        match channel_id.to_channel(&*self.http).await {
            Ok(channel) => channel
                .guild()
                .is_some_and(|c| c.guild_id == guild_id && is_voice_kind(c.kind)),
            Err(_) => false,
        }
    }

    async fn disconnect(&self, member: &MemberHandle, reason: &str) -> RelocResult<MemberHandle> {
        let updated = member
            .guild_id
            .edit_member(
                &*self.http,
                member.user_id,
                EditMember::new().disconnect_member().audit_log_reason(reason),
            )
            .await?;

        info!(
            "Disconnected {} from voice in guild {}",
            member.user_id, member.guild_id
        );
        Ok(to_handle(member.guild_id, &updated, None))
    }

    async fn move_to(
        &self,
        member: &MemberHandle,
        channel_id: ChannelId,
        reason: &str,
    ) -> RelocResult<MemberHandle> {
        let updated = member
            .guild_id
            .edit_member(
                &*self.http,
                member.user_id,
                EditMember::new()
                    .voice_channel(channel_id)
                    .audit_log_reason(reason),
            )
            .await?;

        info!(
            "Moved {} to channel {channel_id} in guild {}",
            member.user_id, member.guild_id
        );
        Ok(to_handle(member.guild_id, &updated, Some(channel_id)))
    }

    async fn announce(&self, channel_id: ChannelId, text: &str) -> RelocResult<MessageHandle> {
        let message = channel_id.say(&*self.http, text).await?;
        Ok(MessageHandle {
            channel_id: message.channel_id,
            message_id: message.id,
        })
    }

    async fn delete_message(&self, message: &MessageHandle) -> RelocResult<()> {
        message
            .channel_id
            .delete_message(&*self.http, message.message_id)
            .await?;
        Ok(())
    }

    async fn current_permissions(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> AnnouncementPermissions {
        self.cached_permissions(guild_id, channel_id)
            .map(announcement_permissions)
            .unwrap_or_default()
    }
}
