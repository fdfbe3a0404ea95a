//! Bulk action executor
//!
//! Applies one action to each selected member, one at a time and in
//! selection order. A failure on one member never stops the batch.

use crate::relocation::{
    MemberHandle, MemberSource, ProtectionLedger, RelocError, RelocResult, SelectionRequest,
    VoicePlatform, select,
};
use poise::serenity_prelude::ChannelId;
use tracing::{info, warn};

/// Action applied to every unprotected member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkAction {
    /// Disconnect from voice
    Disconnect { reason: String },
    /// Move into another voice channel
    MoveTo { channel_id: ChannelId, reason: String },
}

impl BulkAction {
    #[must_use]
    pub fn disconnect(reason: impl Into<String>) -> Self {
        Self::Disconnect {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn move_to(channel_id: ChannelId, reason: impl Into<String>) -> Self {
        Self::MoveTo {
            channel_id,
            reason: reason.into(),
        }
    }

    /// Audit log reason
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Disconnect { reason } | Self::MoveTo { reason, .. } => reason,
        }
    }

    /// Past tense used when reporting results
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Disconnect { .. } => "Disconnected",
            Self::MoveTo { .. } => "Moved",
        }
    }
}

/// Result of acting on a single member
#[derive(Debug)]
pub enum ActionOutcome {
    /// The action succeeded; carries the updated member
    Applied(MemberHandle),
    /// Nothing to do, e.g. already in the target channel
    Skipped,
    /// The platform rejected the action
    Failed(RelocError),
}

/// Aggregated results of a bulk action
#[derive(Debug, Default)]
pub struct BulkReport {
    /// Members the action succeeded on, in execution order
    pub succeeded: Vec<MemberHandle>,
    pub skipped: usize,
    pub failed: usize,
}

impl BulkReport {
    #[must_use]
    pub fn record(mut self, outcome: ActionOutcome) -> Self {
        match outcome {
            ActionOutcome::Applied(member) => self.succeeded.push(member),
            ActionOutcome::Skipped => self.skipped += 1,
            ActionOutcome::Failed(_) => self.failed += 1,
        }
        self
    }
}

/// Apply the action to one member
pub async fn apply(
    platform: &dyn VoicePlatform,
    member: &MemberHandle,
    action: &BulkAction,
) -> ActionOutcome {
    let result = match action {
        BulkAction::Disconnect { reason } => platform.disconnect(member, reason).await,
        BulkAction::MoveTo { channel_id, reason } => {
            if member.voice_channel_id == Some(*channel_id) {
                return ActionOutcome::Skipped;
            }
            platform.move_to(member, *channel_id, reason).await
        }
    };

    match result {
        Ok(updated) => ActionOutcome::Applied(updated),
        Err(e) => {
            warn!(
                target: crate::RELOCATION_TARGET,
                guild_id = %member.guild_id,
                user_id = %member.user_id,
                member = %member.display_name,
                action = action.verb(),
                error = %e,
                "Bulk action failed for member"
            );
            ActionOutcome::Failed(e)
        }
    }
}

/// Apply the action to each member in order
pub async fn execute(
    platform: &dyn VoicePlatform,
    members: &[MemberHandle],
    action: &BulkAction,
) -> BulkReport {
    let mut outcomes = Vec::with_capacity(members.len());
    for member in members {
        outcomes.push(apply(platform, member, action).await);
    }
    outcomes.into_iter().fold(BulkReport::default(), BulkReport::record)
}

/// Outcome of a full select-then-execute run
#[derive(Debug)]
pub struct BulkRun {
    /// Members the ledger shielded from the action
    pub protected: Vec<MemberHandle>,
    pub report: BulkReport,
}

/// Reject a move whose target is unusable before touching anyone
async fn validate_target(
    platform: &dyn VoicePlatform,
    request: &SelectionRequest,
    action: &BulkAction,
) -> RelocResult<()> {
    let BulkAction::MoveTo { channel_id, .. } = action else {
        return Ok(());
    };

    if let MemberSource::Channels(sources) = &request.source {
        if sources.iter().all(|source| source == channel_id) {
            return Err(RelocError::IdenticalChannels);
        }
    }

    if !platform.is_voice_channel(request.guild_id, *channel_id).await {
        return Err(RelocError::InvalidChannel);
    }
    Ok(())
}

/// Select members and apply the action to the unprotected ones
///
/// # Errors
///
/// Input errors and `NoMembers`; per-member failures only show up in the report.
pub async fn run_bulk(
    platform: &dyn VoicePlatform,
    ledger: &ProtectionLedger,
    request: &SelectionRequest,
    action: &BulkAction,
) -> RelocResult<BulkRun> {
    validate_target(platform, request, action).await?;

    let selection = select(platform, ledger, request).await?;
    let report = execute(platform, &selection.unprotected, action).await;

    info!(
        target: crate::RELOCATION_TARGET,
        guild_id = %request.guild_id,
        action = action.verb(),
        succeeded = report.succeeded.len(),
        skipped = report.skipped,
        failed = report.failed,
        protected = selection.protected.len(),
        "Bulk action finished"
    );

    Ok(BulkRun {
        protected: selection.protected,
        report,
    })
}
