//! Slash-command surface
//!
//! A single parent command (renamed to the configured base command at
//! startup) carries every subcommand. Bulk subcommands share one runner that
//! builds a [`SelectionRequest`], hands it to the relocation core and turns
//! the outcome into a reply.

use crate::relocation::{
    AnnouncementPermissions, BulkAction, BulkRun, MemberHandle, MemberSource, QuitOutcome,
    QuitRequest, RelocError, RelocResult, SelectionRequest, audit_reason, quit_message, run_bulk,
    scheduled_message,
};
use crate::{COMMAND_TARGET, Context, Data, Error};
use poise::CreateReply;
use poise::serenity_prelude::{self as serenity, Mentionable};
use tracing::warn;

/// Mentions per reply line
pub const MENTIONS_PER_LINE: usize = 4;

/// `1 user`, `3 users`
#[must_use]
pub fn pluralize(word: &str, count: usize) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

/// Mention members, `per_line` to a line
#[must_use]
pub fn mention_lines(members: &[MemberHandle], per_line: usize) -> Vec<String> {
    members
        .chunks(per_line.max(1))
        .map(|chunk| {
            chunk
                .iter()
                .map(|m| m.user_id.mention().to_string())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Reply text for a finished bulk run
#[must_use]
pub fn bulk_summary(action: &BulkAction, run: &BulkRun, reason: Option<&str>) -> String {
    let reason = reason
        .filter(|r| !r.is_empty())
        .map(|r| format!(" (Reason: {r})"))
        .unwrap_or_default();

    let mut lines = vec![format!(
        "{} {}{reason}",
        action.verb(),
        pluralize("user", run.report.succeeded.len())
    )];
    lines.extend(mention_lines(&run.report.succeeded, MENTIONS_PER_LINE));

    if !run.protected.is_empty() {
        lines.push(format!("Protected {}", pluralize("user", run.protected.len())));
        lines.extend(mention_lines(&run.protected, MENTIONS_PER_LINE));
    }

    lines.join("\n")
}

/// Reply text when a source held nobody to act on
#[must_use]
pub fn empty_message(source: &MemberSource) -> String {
    match source {
        MemberSource::Guild => "No users in voice channels".to_string(),
        MemberSource::Users(_) => "The specified users were not found".to_string(),
        MemberSource::Channels(ids) => format!(
            "No users in {}",
            ids.iter()
                .map(|id| id.mention().to_string())
                .collect::<Vec<_>>()
                .join(" ")
        ),
        MemberSource::Roles(ids) => format!(
            "No users with {} in voice channels",
            ids.iter()
                .map(|id| id.mention().to_string())
                .collect::<Vec<_>>()
                .join(" ")
        ),
    }
}

/// Reply text for a failed bulk request
#[must_use]
pub fn bulk_error_message(error: &RelocError, source: &MemberSource) -> String {
    if error.is_empty_result() {
        empty_message(source)
    } else {
        error.to_string()
    }
}

/// Reply text for a failed immediate quit
#[must_use]
pub fn quit_error_message(error: &RelocError) -> String {
    match error {
        RelocError::MemberNotFound(_) => "Could not find you".to_string(),
        RelocError::NotInVoice => "You are not in a voice channel".to_string(),
        other => other.to_string(),
    }
}

fn user_ids(users: impl IntoIterator<Item = Option<serenity::User>>) -> Vec<serenity::UserId> {
    users.into_iter().flatten().map(|u| u.id).collect()
}

fn channel_ids(
    channels: impl IntoIterator<Item = Option<serenity::GuildChannel>>,
) -> Vec<serenity::ChannelId> {
    channels.into_iter().flatten().map(|c| c.id).collect()
}

async fn reply_ephemeral(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(CreateReply::default().content(content).ephemeral(true))
        .await?;
    Ok(())
}

/// Shared runner for every bulk subcommand
async fn relocate(
    ctx: Context<'_>,
    source: RelocResult<MemberSource>,
    action: BulkAction,
    include_bots: bool,
    reverse: bool,
    reason: Option<&str>,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        ctx.say(RelocError::NotInGuild.to_string()).await?;
        return Ok(());
    };
    let source = match source {
        Ok(source) => source,
        Err(e) => {
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };

    let data = ctx.data();
    let request = SelectionRequest::new(guild_id, source)
        .issued_by(ctx.author().id)
        .include_bots(include_bots)
        .reversed(reverse)
        .consuming_credits(data.config.credit_policy.consumes_for(&action));

    ctx.defer().await?;

    let reply = match run_bulk(data.platform.as_ref(), &data.ledger, &request, &action).await {
        Ok(run) => bulk_summary(&action, &run, reason),
        Err(e) => {
            if !e.is_input_error() && !e.is_empty_result() {
                warn!(
                    target: COMMAND_TARGET,
                    guild_id = %guild_id,
                    user_id = %ctx.author().id,
                    error = %e,
                    "Bulk request failed"
                );
            }
            bulk_error_message(&e, &request.source)
        }
    };

    ctx.say(reply).await?;
    Ok(())
}

fn disconnect_action(ctx: Context<'_>, reason: Option<&str>) -> BulkAction {
    BulkAction::disconnect(audit_reason(reason, &ctx.author().name))
}

fn move_action(ctx: Context<'_>, to: &serenity::GuildChannel) -> BulkAction {
    BulkAction::move_to(to.id, audit_reason(None, &ctx.author().name))
}

/// Relocate voice channel members
#[poise::command(
    slash_command,
    guild_only,
    subcommands(
        "kick_all",
        "kick_role",
        "move_all",
        "move_role",
        "annihilate",
        "marshal",
        "kick",
        "move_users",
        "quit",
        "abort_quit",
        "protect",
        "unprotect"
    ),
    subcommand_required
)]
pub async fn reloc(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Disconnect up to 10 users
#[poise::command(slash_command, guild_only, required_permissions = "MOVE_MEMBERS")]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "User 1"] user1: serenity::User,
    #[description = "User 2"] user2: Option<serenity::User>,
    #[description = "User 3"] user3: Option<serenity::User>,
    #[description = "User 4"] user4: Option<serenity::User>,
    #[description = "User 5"] user5: Option<serenity::User>,
    #[description = "User 6"] user6: Option<serenity::User>,
    #[description = "User 7"] user7: Option<serenity::User>,
    #[description = "User 8"] user8: Option<serenity::User>,
    #[description = "User 9"] user9: Option<serenity::User>,
    #[description = "User 10"] user10: Option<serenity::User>,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    let users = user_ids([
        Some(user1),
        user2,
        user3,
        user4,
        user5,
        user6,
        user7,
        user8,
        user9,
        user10,
    ]);
    let action = disconnect_action(ctx, reason.as_deref());
    relocate(
        ctx,
        MemberSource::users(users),
        action,
        true,
        true,
        reason.as_deref(),
    )
    .await
}

/// Disconnect all users from up to 5 voice channels
#[poise::command(
    slash_command,
    guild_only,
    rename = "kick-all",
    required_permissions = "MOVE_MEMBERS"
)]
pub async fn kick_all(
    ctx: Context<'_>,
    #[description = "Voice channel 1"]
    #[channel_types("Voice", "Stage")]
    channel1: serenity::GuildChannel,
    #[description = "Voice channel 2"]
    #[channel_types("Voice", "Stage")]
    channel2: Option<serenity::GuildChannel>,
    #[description = "Voice channel 3"]
    #[channel_types("Voice", "Stage")]
    channel3: Option<serenity::GuildChannel>,
    #[description = "Voice channel 4"]
    #[channel_types("Voice", "Stage")]
    channel4: Option<serenity::GuildChannel>,
    #[description = "Voice channel 5"]
    #[channel_types("Voice", "Stage")]
    channel5: Option<serenity::GuildChannel>,
    #[description = "Include bot users"]
    #[rename = "with-bot"]
    with_bot: Option<bool>,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    let channels = channel_ids([Some(channel1), channel2, channel3, channel4, channel5]);
    let action = disconnect_action(ctx, reason.as_deref());
    relocate(
        ctx,
        MemberSource::channels(channels),
        action,
        with_bot.unwrap_or(false),
        true,
        reason.as_deref(),
    )
    .await
}

/// Disconnect every voice-connected user holding a role
#[poise::command(
    slash_command,
    guild_only,
    rename = "kick-role",
    required_permissions = "MOVE_MEMBERS"
)]
pub async fn kick_role(
    ctx: Context<'_>,
    #[description = "Role"] role: serenity::Role,
    #[description = "Include bot users"]
    #[rename = "with-bot"]
    with_bot: Option<bool>,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    let action = disconnect_action(ctx, reason.as_deref());
    relocate(
        ctx,
        MemberSource::roles([role.id]),
        action,
        with_bot.unwrap_or(false),
        true,
        reason.as_deref(),
    )
    .await
}

/// Disconnect everyone in every voice channel
#[poise::command(slash_command, guild_only, required_permissions = "MOVE_MEMBERS")]
pub async fn annihilate(
    ctx: Context<'_>,
    #[description = "Include bot users"]
    #[rename = "with-bot"]
    with_bot: Option<bool>,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    let action = disconnect_action(ctx, reason.as_deref());
    relocate(
        ctx,
        Ok(MemberSource::Guild),
        action,
        with_bot.unwrap_or(false),
        true,
        reason.as_deref(),
    )
    .await
}

/// Move up to 10 users into a new voice channel
#[poise::command(
    slash_command,
    guild_only,
    rename = "move",
    required_permissions = "MOVE_MEMBERS"
)]
pub async fn move_users(
    ctx: Context<'_>,
    #[description = "The designated voice channel"]
    #[channel_types("Voice", "Stage")]
    to: serenity::GuildChannel,
    #[description = "User 1"] user1: serenity::User,
    #[description = "User 2"] user2: Option<serenity::User>,
    #[description = "User 3"] user3: Option<serenity::User>,
    #[description = "User 4"] user4: Option<serenity::User>,
    #[description = "User 5"] user5: Option<serenity::User>,
    #[description = "User 6"] user6: Option<serenity::User>,
    #[description = "User 7"] user7: Option<serenity::User>,
    #[description = "User 8"] user8: Option<serenity::User>,
    #[description = "User 9"] user9: Option<serenity::User>,
    #[description = "User 10"] user10: Option<serenity::User>,
) -> Result<(), Error> {
    let users = user_ids([
        Some(user1),
        user2,
        user3,
        user4,
        user5,
        user6,
        user7,
        user8,
        user9,
        user10,
    ]);
    let action = move_action(ctx, &to);
    relocate(ctx, MemberSource::users(users), action, true, false, None).await
}

/// Move all users from one voice channel into another
#[poise::command(
    slash_command,
    guild_only,
    rename = "move-all",
    required_permissions = "MOVE_MEMBERS"
)]
pub async fn move_all(
    ctx: Context<'_>,
    #[description = "The source voice channel"]
    #[channel_types("Voice", "Stage")]
    from: serenity::GuildChannel,
    #[description = "The designated voice channel"]
    #[channel_types("Voice", "Stage")]
    to: serenity::GuildChannel,
    #[description = "Include bot users"]
    #[rename = "with-bot"]
    with_bot: Option<bool>,
) -> Result<(), Error> {
    let action = move_action(ctx, &to);
    relocate(
        ctx,
        MemberSource::channels([from.id]),
        action,
        with_bot.unwrap_or(false),
        false,
        None,
    )
    .await
}

/// Move every voice-connected user holding a role into a voice channel
#[poise::command(
    slash_command,
    guild_only,
    rename = "move-role",
    required_permissions = "MOVE_MEMBERS"
)]
pub async fn move_role(
    ctx: Context<'_>,
    #[description = "Role"] role: serenity::Role,
    #[description = "The designated voice channel"]
    #[channel_types("Voice", "Stage")]
    to: serenity::GuildChannel,
    #[description = "Include bot users"]
    #[rename = "with-bot"]
    with_bot: Option<bool>,
) -> Result<(), Error> {
    let action = move_action(ctx, &to);
    relocate(
        ctx,
        MemberSource::roles([role.id]),
        action,
        with_bot.unwrap_or(false),
        false,
        None,
    )
    .await
}

/// Gather everyone in voice into one channel
#[poise::command(slash_command, guild_only, required_permissions = "MOVE_MEMBERS")]
pub async fn marshal(
    ctx: Context<'_>,
    #[description = "The designated voice channel"]
    #[channel_types("Voice", "Stage")]
    to: serenity::GuildChannel,
    #[description = "Include bot users"]
    #[rename = "with-bot"]
    with_bot: Option<bool>,
) -> Result<(), Error> {
    let action = move_action(ctx, &to);
    relocate(
        ctx,
        Ok(MemberSource::Guild),
        action,
        with_bot.unwrap_or(false),
        false,
        None,
    )
    .await
}

/// Disconnect yourself, now or after a timeout
#[poise::command(slash_command, guild_only)]
pub async fn quit(
    ctx: Context<'_>,
    #[description = "Minutes to wait before disconnecting"] timeout: Option<f64>,
    #[description = "Reason"] reason: Option<String>,
) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        ctx.say(RelocError::NotInGuild.to_string()).await?;
        return Ok(());
    };
    let user_id = ctx.author().id;

    let request = QuitRequest {
        guild_id,
        channel_id: ctx.channel_id(),
        user_id,
        requester: ctx.author().name.clone(),
        reason: reason.clone(),
        timeout_minutes: timeout,
    };

    match ctx.data().quits.request(request).await {
        Ok(QuitOutcome::Disconnected(_)) => {
            ctx.say(quit_message(user_id, reason.as_deref())).await?;
        }
        Ok(QuitOutcome::Scheduled(scheduled)) => {
            // Without an announcement the caller is the only one who learns the time
            let content = if scheduled.announcement.is_some() {
                "OK".to_string()
            } else {
                scheduled_message(
                    user_id,
                    scheduled.fire_at,
                    AnnouncementPermissions::default(),
                )
            };
            reply_ephemeral(ctx, content).await?;
        }
        Err(e) => {
            ctx.say(quit_error_message(&e)).await?;
        }
    }
    Ok(())
}

/// Abort the deferred disconnection for yourself
#[poise::command(slash_command, guild_only, rename = "abort-quit")]
pub async fn abort_quit(ctx: Context<'_>) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        ctx.say(RelocError::NotInGuild.to_string()).await?;
        return Ok(());
    };

    let aborted = ctx.data().quits.abort(guild_id, ctx.author().id).await;
    ctx.say(if aborted { "OK, Aborted" } else { "Nothing to abort" })
        .await?;
    Ok(())
}

/// 🛡
#[poise::command(slash_command, guild_only)]
pub async fn protect(ctx: Context<'_>) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        ctx.say(RelocError::NotInGuild.to_string()).await?;
        return Ok(());
    };

    let data = ctx.data();
    let entry = data
        .ledger
        .grant(guild_id, ctx.author().id, data.config.protection.max_credits());

    reply_ephemeral(
        ctx,
        format!(
            "You're now under my protection until <t:{}:T>, with {}",
            entry.expires_at.timestamp(),
            pluralize("credit", entry.credits as usize)
        ),
    )
    .await
}

/// Give up your protection early
#[poise::command(slash_command, guild_only)]
pub async fn unprotect(ctx: Context<'_>) -> Result<(), Error> {
    let Some(guild_id) = ctx.guild_id() else {
        ctx.say(RelocError::NotInGuild.to_string()).await?;
        return Ok(());
    };

    let revoked = ctx.data().ledger.revoke(guild_id, ctx.author().id);
    reply_ephemeral(
        ctx,
        if revoked {
            "You're no longer under my protection"
        } else {
            "You're not under my protection"
        },
    )
    .await
}

/// The command tree, with the parent renamed to `base_command`
#[must_use]
pub fn commands(base_command: &str) -> Vec<poise::Command<Data, Error>> {
    let mut root = reloc();
    root.name = base_command.to_string();
    root.qualified_name = base_command.to_string();
    for sub in &mut root.subcommands {
        sub.qualified_name = format!("{base_command} {}", sub.name);
    }
    vec![root]
}
