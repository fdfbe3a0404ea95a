//! Deferred self-disconnect ("quit")
//!
//! A quit with no positive timeout disconnects right away. Otherwise the
//! request is announced, saved in the [`DeferredTaskStore`] and a task waits
//! for the timeout. The wait races the task's cancellation token, and a
//! cancelled wait skips every side effect.

use crate::relocation::{
    AnnouncementPermissions, Clock, DeferredTask, DeferredTaskStore, MemberHandle, MessageHandle,
    RelocError, RelocResult, TaskKey, VoicePlatform,
};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{ChannelId, GuildId, Mentionable, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A user asking to be disconnected
#[derive(Debug, Clone)]
pub struct QuitRequest {
    pub guild_id: GuildId,
    /// Channel the request came from; announcements go here
    pub channel_id: ChannelId,
    pub user_id: UserId,
    /// Name of the requester, used in the audit log reason
    pub requester: String,
    pub reason: Option<String>,
    /// Minutes to wait; missing, NaN or non-positive means now
    pub timeout_minutes: Option<f64>,
}

impl QuitRequest {
    /// The wait before disconnecting, `None` for an immediate quit
    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        let minutes = self.timeout_minutes.filter(|m| m.is_finite() && *m > 0.0)?;
        Some(Duration::try_from_secs_f64(minutes * 60.0).unwrap_or(Duration::MAX))
    }

    #[must_use]
    pub fn audit_reason(&self) -> String {
        audit_reason(self.reason.as_deref(), &self.requester)
    }
}

/// Audit log reason: the supplied reason, or who asked for the action
#[must_use]
pub fn audit_reason(reason: Option<&str>, requester: &str) -> String {
    reason
        .filter(|r| !r.is_empty())
        .map_or_else(|| format!("Demanded by {requester}"), ToString::to_string)
}

/// Announcement posted when a quit goes through
#[must_use]
pub fn quit_message(user_id: UserId, reason: Option<&str>) -> String {
    match reason.filter(|r| !r.is_empty()) {
        Some(reason) => format!("{} has quit (Reason: {reason})", user_id.mention()),
        None => format!("{} has quit", user_id.mention()),
    }
}

/// Announcement posted when a quit is scheduled
#[must_use]
pub fn scheduled_message(
    user_id: UserId,
    fire_at: DateTime<Utc>,
    permissions: AnnouncementPermissions,
) -> String {
    let timestamp = fire_at.timestamp();
    if permissions.can_manage_messages {
        // The message is deleted on fire, so a relative timestamp is enough
        format!("{} will quit <t:{timestamp}:R>", user_id.mention())
    } else {
        format!("OK, {} will quit at <t:{timestamp}:T>", user_id.mention())
    }
}

/// How a scheduled quit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Disconnected,
    /// The user was no longer in voice when the timer fired
    AlreadyLeft,
    /// Cancelled before the timer fired
    Aborted,
    /// The platform refused the disconnect
    Failed,
}

/// Handle to a scheduled quit
#[derive(Debug)]
pub struct ScheduledQuit {
    pub task_id: Uuid,
    pub fire_at: DateTime<Utc>,
    pub announcement: Option<MessageHandle>,
    /// Resolves once the quit fired or was aborted
    pub completion: JoinHandle<FireOutcome>,
}

/// Result of a quit request
#[derive(Debug)]
pub enum QuitOutcome {
    /// Disconnected immediately
    Disconnected(MemberHandle),
    Scheduled(ScheduledQuit),
}

/// Wait for `delay`, returning `false` if the token was cancelled first
pub async fn wait_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        () = tokio::time::sleep(delay) => !token.is_cancelled(),
    }
}

/// Runs quit requests against the platform and the task store
#[derive(Clone)]
pub struct QuitCoordinator {
    platform: Arc<dyn VoicePlatform>,
    store: DeferredTaskStore,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for QuitCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuitCoordinator")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl QuitCoordinator {
    #[must_use]
    pub fn new(
        platform: Arc<dyn VoicePlatform>,
        store: DeferredTaskStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            platform,
            store,
            clock,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &DeferredTaskStore {
        &self.store
    }

    /// Disconnect now or schedule a disconnect, depending on the timeout
    ///
    /// # Errors
    ///
    /// For an immediate quit: `MemberNotFound`, `NotInVoice` or the platform
    /// error from the disconnect. Scheduling itself does not fail.
    pub async fn request(&self, request: QuitRequest) -> RelocResult<QuitOutcome> {
        match request.delay() {
            None => self.quit_now(&request).await.map(QuitOutcome::Disconnected),
            Some(delay) => Ok(QuitOutcome::Scheduled(self.schedule(request, delay).await)),
        }
    }

    /// Abort the caller's pending quit, if any
    pub async fn abort(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.store.abort(TaskKey::new(guild_id, user_id)).await
    }

    async fn quit_now(&self, request: &QuitRequest) -> RelocResult<MemberHandle> {
        let member = self
            .platform
            .fetch_member(request.guild_id, request.user_id)
            .await?
            .ok_or(RelocError::MemberNotFound(request.user_id.get()))?;

        if !member.in_voice() {
            return Err(RelocError::NotInVoice);
        }

        let disconnected = self
            .platform
            .disconnect(&member, &request.audit_reason())
            .await?;
        info!(
            target: crate::RELOCATION_TARGET,
            guild_id = %request.guild_id,
            user_id = %request.user_id,
            "Member quit"
        );
        Ok(disconnected)
    }

    async fn schedule(&self, request: QuitRequest, delay: Duration) -> ScheduledQuit {
        let permissions = self
            .platform
            .current_permissions(request.guild_id, request.channel_id)
            .await;
        let fire_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| self.clock.now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let announcement = if permissions.can_send_messages {
            let text = scheduled_message(request.user_id, fire_at, permissions);
            match self.platform.announce(request.channel_id, &text).await {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(
                        target: crate::RELOCATION_TARGET,
                        channel_id = %request.channel_id,
                        error = %e,
                        "Could not announce scheduled quit"
                    );
                    None
                }
            }
        } else {
            None
        };

        let task = DeferredTask {
            id: Uuid::new_v4(),
            guild_id: request.guild_id,
            channel_id: request.channel_id,
            user_id: request.user_id,
            requester: request.requester,
            reason: request.reason,
            permissions,
            announcement,
            fire_at,
            cancellation: CancellationToken::new(),
        };
        let task_id = task.id;
        self.store.save(task.clone()).await;

        let coordinator = self.clone();
        let completion = tokio::spawn(async move { coordinator.fire_after(task, delay).await });

        ScheduledQuit {
            task_id,
            fire_at,
            announcement,
            completion,
        }
    }

    async fn fire_after(&self, task: DeferredTask, delay: Duration) -> FireOutcome {
        if !wait_or_cancel(delay, &task.cancellation).await {
            debug!(
                target: crate::RELOCATION_TARGET,
                key = %task.key(),
                task_id = %task.id,
                "Scheduled quit observed cancellation"
            );
            return FireOutcome::Aborted;
        }

        // Whoever removes the entry owns the task; losing to abort or save means cancelled
        if !self.store.complete(task.key(), task.id) {
            debug!(
                target: crate::RELOCATION_TARGET,
                key = %task.key(),
                task_id = %task.id,
                "Scheduled quit no longer owns its entry"
            );
            return FireOutcome::Aborted;
        }

        if task.permissions.can_manage_messages {
            if let Some(message) = &task.announcement {
                if let Err(e) = self.platform.delete_message(message).await {
                    debug!(
                        target: crate::RELOCATION_TARGET,
                        message_id = %message.message_id,
                        error = %e,
                        "Could not delete announcement"
                    );
                }
            }
        }

        let member = match self.platform.fetch_member(task.guild_id, task.user_id).await {
            Ok(Some(member)) if member.in_voice() => member,
            Ok(_) => {
                info!(
                    target: crate::RELOCATION_TARGET,
                    key = %task.key(),
                    "Scheduled quit fired but member already left voice"
                );
                return FireOutcome::AlreadyLeft;
            }
            Err(e) => {
                warn!(
                    target: crate::RELOCATION_TARGET,
                    key = %task.key(),
                    error = %e,
                    "Could not fetch member for scheduled quit"
                );
                return FireOutcome::Failed;
            }
        };

        let reason = audit_reason(task.reason.as_deref(), &task.requester);
        if let Err(e) = self.platform.disconnect(&member, &reason).await {
            warn!(
                target: crate::RELOCATION_TARGET,
                key = %task.key(),
                error = %e,
                "Scheduled quit failed to disconnect"
            );
            return FireOutcome::Failed;
        }

        info!(target: crate::RELOCATION_TARGET, key = %task.key(), "Scheduled quit fired");

        if task.permissions.can_send_messages {
            let text = quit_message(task.user_id, task.reason.as_deref());
            if let Err(e) = self.platform.announce(task.channel_id, &text).await {
                warn!(
                    target: crate::RELOCATION_TARGET,
                    channel_id = %task.channel_id,
                    error = %e,
                    "Could not announce quit"
                );
            }
        }

        FireOutcome::Disconnected
    }
}
