//! Deferred task store
//!
//! Holds at most one pending timed action per (guild, user). The store does
//! not schedule anything itself: whoever saves a task owns the wait and
//! watches the task's cancellation token.

use crate::relocation::{AnnouncementPermissions, MessageHandle, VoicePlatform};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use derive_more::Display;
use poise::serenity_prelude::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Store key: a user within a guild
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("{guild_id}:{user_id}")]
pub struct TaskKey {
    pub guild_id: GuildId,
    pub user_id: UserId,
}

impl TaskKey {
    #[must_use]
    pub const fn new(guild_id: GuildId, user_id: UserId) -> Self {
        Self { guild_id, user_id }
    }
}

/// A pending, cancellable timed action
#[derive(Debug, Clone)]
pub struct DeferredTask {
    /// Distinguishes this task from a later one saved under the same key
    pub id: Uuid,
    pub guild_id: GuildId,
    /// Channel the request was made from and the announcement lives in
    pub channel_id: ChannelId,
    pub user_id: UserId,
    /// Name of whoever requested the action
    pub requester: String,
    pub reason: Option<String>,
    /// Permission snapshot taken when the task was scheduled
    pub permissions: AnnouncementPermissions,
    pub announcement: Option<MessageHandle>,
    pub fire_at: DateTime<Utc>,
    pub cancellation: CancellationToken,
}

impl DeferredTask {
    #[must_use]
    pub const fn key(&self) -> TaskKey {
        TaskKey::new(self.guild_id, self.user_id)
    }
}

/// In-memory store of deferred tasks
#[derive(Clone)]
pub struct DeferredTaskStore {
    tasks: Arc<DashMap<TaskKey, DeferredTask>>,
    platform: Arc<dyn VoicePlatform>,
}

impl std::fmt::Debug for DeferredTaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredTaskStore")
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl DeferredTaskStore {
    #[must_use]
    pub fn new(platform: Arc<dyn VoicePlatform>) -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            platform,
        }
    }

    /// Store a task, aborting whatever was pending under the same key
    pub async fn save(&self, task: DeferredTask) {
        let key = task.key();
        info!(
            target: crate::RELOCATION_TARGET,
            key = %key,
            task_id = %task.id,
            fire_at = %task.fire_at,
            "Deferred task saved"
        );
        if let Some(previous) = self.tasks.insert(key, task) {
            self.cancel_and_clean(previous).await;
        }
    }

    /// Cancel and remove the task under `key`, returning whether there was one
    pub async fn abort(&self, key: TaskKey) -> bool {
        let Some((_, task)) = self.tasks.remove(&key) else {
            return false;
        };
        self.cancel_and_clean(task).await;
        true
    }

    /// Remove the task without cancelling it or touching its announcement
    pub fn delete(&self, key: TaskKey) -> Option<DeferredTask> {
        self.tasks.remove(&key).map(|(_, task)| task)
    }

    /// Remove the task only if it is still the one identified by `task_id`
    pub fn complete(&self, key: TaskKey, task_id: Uuid) -> bool {
        self.tasks
            .remove_if(&key, |_, task| task.id == task_id)
            .is_some()
    }

    #[must_use]
    pub fn get(&self, key: TaskKey) -> Option<DeferredTask> {
        self.tasks.get(&key).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    async fn cancel_and_clean(&self, task: DeferredTask) {
        task.cancellation.cancel();
        info!(
            target: crate::RELOCATION_TARGET,
            key = %task.key(),
            task_id = %task.id,
            "Deferred task aborted"
        );

        if !task.permissions.can_manage_messages {
            return;
        }
        if let Some(message) = task.announcement {
            if let Err(e) = self.platform.delete_message(&message).await {
                debug!(
                    target: crate::RELOCATION_TARGET,
                    message_id = %message.message_id,
                    error = %e,
                    "Could not delete announcement"
                );
            }
        }
    }
}
