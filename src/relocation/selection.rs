//! Member selection pipeline
//!
//! Every bulk command goes through the same steps: resolve a source to voice
//! members, drop bots unless asked not to, shuffle, order by tier, then split
//! the result into protected and unprotected members.

use crate::relocation::{MemberHandle, ProtectionLedger, RelocError, RelocResult, VoicePlatform};
use poise::serenity_prelude::{ChannelId, GuildId, RoleId, UserId};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::hash::Hash;
use tracing::debug;

/// Maximum number of channels a source may name
pub const MAX_CHANNELS: usize = 5;
/// Maximum number of roles a source may name
pub const MAX_ROLES: usize = 5;
/// Maximum number of users a source may name
pub const MAX_USERS: usize = 10;

/// Where candidate members come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberSource {
    /// Every voice channel in the guild
    Guild,
    /// Members of the listed voice channels
    Channels(Vec<ChannelId>),
    /// Voice-connected members holding any of the listed roles
    Roles(Vec<RoleId>),
    /// The listed users, if they are voice-connected
    Users(Vec<UserId>),
}

fn dedup_ids<T: Copy + Eq + Hash>(ids: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

fn bounded<T>(
    ids: Vec<T>,
    kind: &'static str,
    max: usize,
    empty: RelocError,
) -> RelocResult<Vec<T>> {
    if ids.is_empty() {
        return Err(empty);
    }
    if ids.len() > max {
        return Err(RelocError::TooManyTargets { kind, max });
    }
    Ok(ids)
}

impl MemberSource {
    /// Build a channel source, deduplicated by ID
    ///
    /// # Errors
    ///
    /// `InvalidChannel` if no channel is given, `TooManyTargets` above
    /// [`MAX_CHANNELS`].
    pub fn channels(ids: impl IntoIterator<Item = ChannelId>) -> RelocResult<Self> {
        let ids = bounded(dedup_ids(ids), "channels", MAX_CHANNELS, RelocError::InvalidChannel)?;
        Ok(Self::Channels(ids))
    }

    /// Build a role source, deduplicated by ID
    ///
    /// # Errors
    ///
    /// `InvalidRole` if no role is given, `TooManyTargets` above [`MAX_ROLES`].
    pub fn roles(ids: impl IntoIterator<Item = RoleId>) -> RelocResult<Self> {
        let ids = bounded(dedup_ids(ids), "roles", MAX_ROLES, RelocError::InvalidRole)?;
        Ok(Self::Roles(ids))
    }

    /// Build a user source, deduplicated by ID
    ///
    /// # Errors
    ///
    /// `NoUsers` if no user is given, `TooManyTargets` above [`MAX_USERS`].
    pub fn users(ids: impl IntoIterator<Item = UserId>) -> RelocResult<Self> {
        let ids = bounded(dedup_ids(ids), "users", MAX_USERS, RelocError::NoUsers)?;
        Ok(Self::Users(ids))
    }

    /// Explicitly named users are candidates even when they are bots
    #[must_use]
    pub const fn filters_bots(&self) -> bool {
        !matches!(self, Self::Users(_))
    }
}

/// Parameters of one selection pass
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub guild_id: GuildId,
    pub source: MemberSource,
    /// Member who invoked the action
    pub issuer: Option<UserId>,
    pub include_bots: bool,
    /// Put the issuer last instead of first
    pub reverse: bool,
    /// Spend a protection credit for each protected member found
    pub consume_credit: bool,
}

impl SelectionRequest {
    #[must_use]
    pub fn new(guild_id: GuildId, source: MemberSource) -> Self {
        Self {
            guild_id,
            source,
            issuer: None,
            include_bots: false,
            reverse: false,
            consume_credit: false,
        }
    }

    #[must_use]
    pub fn issued_by(mut self, issuer: UserId) -> Self {
        self.issuer = Some(issuer);
        self
    }

    #[must_use]
    pub fn include_bots(mut self, include_bots: bool) -> Self {
        self.include_bots = include_bots;
        self
    }

    #[must_use]
    pub fn reversed(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    #[must_use]
    pub fn consuming_credits(mut self, consume_credit: bool) -> Self {
        self.consume_credit = consume_credit;
        self
    }
}

/// Ordered candidates split by protection status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub protected: Vec<MemberHandle>,
    pub unprotected: Vec<MemberHandle>,
}

impl Selection {
    #[must_use]
    pub fn len(&self) -> usize {
        self.protected.len() + self.unprotected.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.protected.is_empty() && self.unprotected.is_empty()
    }
}

// Issuer, then bots, then everyone else
fn tier(member: &MemberHandle, issuer: Option<UserId>) -> i8 {
    if issuer == Some(member.user_id) {
        1
    } else if member.is_bot {
        2
    } else {
        3
    }
}

/// Stable three-tier ordering. Members sharing a tier keep their relative order.
pub fn order_members(members: &mut [MemberHandle], issuer: Option<UserId>, reverse: bool) {
    members.sort_by_key(|member| {
        let rank = tier(member, issuer);
        if reverse { -rank } else { rank }
    });
}

/// Keep voice-connected members once each, dropping bots where the source asks for it
#[must_use]
pub fn filter_candidates(
    members: Vec<MemberHandle>,
    source: &MemberSource,
    include_bots: bool,
) -> Vec<MemberHandle> {
    let drop_bots = source.filters_bots() && !include_bots;
    let mut seen = HashSet::new();
    members
        .into_iter()
        .filter(|member| member.in_voice())
        .filter(|member| !(drop_bots && member.is_bot))
        .filter(|member| seen.insert(member.user_id))
        .collect()
}

/// Split ordered members with one ledger lookup each, preserving order in both halves
#[must_use]
pub fn partition(
    ordered: Vec<MemberHandle>,
    ledger: &ProtectionLedger,
    consume_credit: bool,
) -> Selection {
    let (protected, unprotected): (Vec<_>, Vec<_>) = ordered
        .into_iter()
        .partition(|member| ledger.is_protected(member.guild_id, member.user_id, consume_credit));
    Selection {
        protected,
        unprotected,
    }
}

/// Filter, shuffle, order and partition already resolved members
///
/// # Errors
///
/// `NoMembers` when nothing is left after filtering.
pub fn arrange<R: Rng + ?Sized>(
    members: Vec<MemberHandle>,
    request: &SelectionRequest,
    ledger: &ProtectionLedger,
    rng: &mut R,
) -> RelocResult<Selection> {
    let mut candidates = filter_candidates(members, &request.source, request.include_bots);
    if candidates.is_empty() {
        return Err(RelocError::NoMembers);
    }

    candidates.shuffle(rng);
    order_members(&mut candidates, request.issuer, request.reverse);
    Ok(partition(candidates, ledger, request.consume_credit))
}

/// Run the whole pipeline against the platform
///
/// # Errors
///
/// Input errors from resolving the source, or `NoMembers`.
pub async fn select(
    platform: &dyn VoicePlatform,
    ledger: &ProtectionLedger,
    request: &SelectionRequest,
) -> RelocResult<Selection> {
    let members = platform
        .resolve_voice_members(request.guild_id, &request.source)
        .await?;
    debug!(
        target: crate::RELOCATION_TARGET,
        guild_id = %request.guild_id,
        resolved = members.len(),
        "Resolved member source"
    );
    arrange(members, request, ledger, &mut rand::rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relocation::{ManualClock, MockVoicePlatform};
    use chrono::Utc;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;

    const GUILD: GuildId = GuildId::new(42);
    const VOICE: ChannelId = ChannelId::new(7);

    fn member(id: u64, is_bot: bool) -> MemberHandle {
        MemberHandle::new(GUILD, UserId::new(id), is_bot, Some(VOICE))
    }

    fn ids(members: &[MemberHandle]) -> Vec<u64> {
        members.iter().map(|m| m.user_id.get()).collect()
    }

    fn ledger() -> ProtectionLedger {
        ProtectionLedger::new(Arc::new(ManualClock::new(Utc::now())))
    }

    #[test]
    fn test_sources_deduplicate_and_bound() {
        let source = MemberSource::channels([1, 2, 1, 2, 3].map(ChannelId::new)).unwrap();
        assert_eq!(
            source,
            MemberSource::Channels(vec![ChannelId::new(1), ChannelId::new(2), ChannelId::new(3)])
        );

        assert!(matches!(
            MemberSource::channels(Vec::new()),
            Err(RelocError::InvalidChannel)
        ));
        assert!(matches!(
            MemberSource::roles((1..=6).map(RoleId::new)),
            Err(RelocError::TooManyTargets { kind: "roles", max: 5 })
        ));
        assert!(MemberSource::users((1..=10).chain(1..=10).map(UserId::new)).is_ok());
        assert!(matches!(
            MemberSource::users(Vec::new()),
            Err(RelocError::NoUsers)
        ));
    }

    #[test]
    fn test_order_members_tiers() {
        let issuer = UserId::new(1);
        let mut members = vec![member(3, false), member(2, true), member(1, false), member(4, false)];

        order_members(&mut members, Some(issuer), false);
        assert_eq!(ids(&members), vec![1, 2, 3, 4]);

        order_members(&mut members, Some(issuer), true);
        assert_eq!(ids(&members), vec![3, 4, 2, 1]);
    }

    #[test]
    fn test_ordering_preserves_shuffled_order_within_tiers() {
        let issuer = UserId::new(1);
        let members: Vec<_> = (1..=12).map(|id| member(id, id % 3 == 0)).collect();

        let mut shuffled = members.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(99));

        let request = SelectionRequest::new(GUILD, MemberSource::Guild)
            .issued_by(issuer)
            .include_bots(true);
        let forward = arrange(members.clone(), &request, &ledger(), &mut StdRng::seed_from_u64(99))
            .unwrap()
            .unprotected;
        let backward = arrange(
            members,
            &request.clone().reversed(true),
            &ledger(),
            &mut StdRng::seed_from_u64(99),
        )
        .unwrap()
        .unprotected;

        let in_tier = |list: &[MemberHandle], bots: bool| -> Vec<u64> {
            list.iter()
                .filter(|m| m.user_id != issuer && m.is_bot == bots)
                .map(|m| m.user_id.get())
                .collect()
        };

        for bots in [true, false] {
            assert_eq!(in_tier(&forward, bots), in_tier(&shuffled, bots));
            assert_eq!(in_tier(&backward, bots), in_tier(&shuffled, bots));
        }

        assert_eq!(forward.first().map(|m| m.user_id), Some(issuer));
        assert_eq!(backward.last().map(|m| m.user_id), Some(issuer));
        assert!(forward[1..5].iter().all(|m| m.is_bot));
        assert!(backward[7..11].iter().all(|m| m.is_bot));
    }

    #[test]
    fn test_bots_excluded_and_issuer_last_when_reversed() {
        // A is the issuer, B a bot, C and D regular members
        let members = vec![member(1, false), member(2, true), member(3, false), member(4, false)];
        let request = SelectionRequest::new(GUILD, MemberSource::Guild)
            .issued_by(UserId::new(1))
            .reversed(true);

        for seed in 0..20 {
            let selection =
                arrange(members.clone(), &request, &ledger(), &mut StdRng::seed_from_u64(seed))
                    .unwrap();
            let order = ids(&selection.unprotected);
            assert_eq!(order.len(), 3);
            assert!(!order.contains(&2));
            assert_eq!(order[2], 1);
            assert!(order[..2].contains(&3) && order[..2].contains(&4));
        }
    }

    #[test]
    fn test_explicit_users_keep_bots_but_require_voice() {
        let members = vec![
            member(1, true),
            MemberHandle::new(GUILD, UserId::new(2), false, None),
            member(3, false),
        ];
        let source = MemberSource::users([1, 2, 3].map(UserId::new)).unwrap();
        let kept = filter_candidates(members, &source, false);
        assert_eq!(ids(&kept), vec![1, 3]);
    }

    #[test]
    fn test_filter_drops_duplicate_members() {
        let members = vec![member(1, false), member(2, false), member(1, false)];
        let kept = filter_candidates(members, &MemberSource::Guild, false);
        assert_eq!(ids(&kept), vec![1, 2]);
    }

    #[test]
    fn test_partition_is_complete_and_disjoint() {
        let ledger = ledger();
        ledger.grant(GUILD, UserId::new(2), 10);
        ledger.grant(GUILD, UserId::new(5), 10);

        let ordered: Vec<_> = (1..=6).map(|id| member(id, false)).collect();
        let selection = partition(ordered, &ledger, false);

        assert_eq!(selection.len(), 6);
        assert_eq!(ids(&selection.protected), vec![2, 5]);
        assert_eq!(ids(&selection.unprotected), vec![1, 3, 4, 6]);
        assert!(
            selection
                .protected
                .iter()
                .all(|p| !selection.unprotected.contains(p))
        );
    }

    #[test]
    fn test_partition_credit_flag() {
        let ledger = ledger();
        ledger.grant(GUILD, UserId::new(1), 1);

        let observed = partition(vec![member(1, false)], &ledger, false);
        assert_eq!(observed.protected.len(), 1);
        assert!(ledger.get(GUILD, UserId::new(1)).is_some());

        let consumed = partition(vec![member(1, false)], &ledger, true);
        assert_eq!(consumed.protected.len(), 1);
        assert!(ledger.get(GUILD, UserId::new(1)).is_none());

        let after = partition(vec![member(1, false)], &ledger, true);
        assert_eq!(after.unprotected.len(), 1);
    }

    #[test]
    fn test_only_bots_without_flag_is_empty_result() {
        let request = SelectionRequest::new(GUILD, MemberSource::Guild);
        let result = arrange(vec![member(1, true)], &request, &ledger(), &mut rand::rng());
        assert!(matches!(result, Err(RelocError::NoMembers)));
    }

    #[tokio::test]
    async fn test_select_distinguishes_input_error_from_empty_result() {
        let mut platform = MockVoicePlatform::new();
        platform
            .expect_resolve_voice_members()
            .withf(|_, source| matches!(source, MemberSource::Roles(_)))
            .returning(|_, _| Err(RelocError::InvalidRole));
        platform
            .expect_resolve_voice_members()
            .withf(|_, source| matches!(source, MemberSource::Channels(_)))
            .returning(|_, _| Ok(Vec::new()));

        let ledger = ledger();
        let roles = SelectionRequest::new(GUILD, MemberSource::roles([RoleId::new(1)]).unwrap());
        let error = select(&platform, &ledger, &roles).await.unwrap_err();
        assert!(error.is_input_error());

        let channels =
            SelectionRequest::new(GUILD, MemberSource::channels([ChannelId::new(1)]).unwrap());
        let error = select(&platform, &ledger, &channels).await.unwrap_err();
        assert!(error.is_empty_result());
    }

    #[tokio::test]
    async fn test_select_partitions_resolved_members() {
        let mut platform = MockVoicePlatform::new();
        platform
            .expect_resolve_voice_members()
            .times(1)
            .returning(|_, _| Ok(vec![member(1, false), member(2, false), member(3, true)]));

        let ledger = ledger();
        ledger.grant(GUILD, UserId::new(2), 10);

        let request = SelectionRequest::new(GUILD, MemberSource::Guild).consuming_credits(true);
        let selection = select(&platform, &ledger, &request).await.unwrap();

        assert_eq!(ids(&selection.protected), vec![2]);
        assert_eq!(ids(&selection.unprotected), vec![1]);
        assert_eq!(ledger.get(GUILD, UserId::new(2)).map(|e| e.credits), Some(9));
    }
}
