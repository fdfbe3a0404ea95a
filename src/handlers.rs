use crate::EVENT_TARGET;
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, GuildId, Permissions, Ready,
};
use tracing::{info, warn};

/// OAuth2 scopes requested by the invite link
pub const INVITE_SCOPES: &str = "bot applications.commands";

/// Permissions the bot needs to disconnect and move members
#[must_use]
pub const fn required_permissions() -> Permissions {
    Permissions::MOVE_MEMBERS
}

/// Invite link for the given application
#[must_use]
pub fn invite_url(client_id: u64) -> String {
    format!(
        "https://discord.com/oauth2/authorize?client_id={client_id}&scope={}&permissions={}",
        INVITE_SCOPES.replace(' ', "%20"),
        required_permissions().bits()
    )
}

pub struct Handler;

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(target: EVENT_TARGET, "Connected as {user_name}, shard {shard_id}");
        info!(
            target: EVENT_TARGET,
            "Invite link: {}",
            invite_url(ready.application.id.get())
        );
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                target: EVENT_TARGET,
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }

    #[test]
    fn test_invite_url() {
        let url = invite_url(1234);
        assert!(url.starts_with("https://discord.com/oauth2/authorize?client_id=1234&"));
        assert!(url.contains("scope=bot%20applications.commands"));
        assert!(url.ends_with("&permissions=16777216"));
    }

    #[test]
    fn test_required_permissions_are_minimal() {
        assert_eq!(required_permissions(), Permissions::MOVE_MEMBERS);
        assert!(!required_permissions().contains(Permissions::ADMINISTRATOR));
    }
}
