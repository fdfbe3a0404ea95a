//! Protection ledger
//!
//! Members can shield themselves from bulk actions for a while. A grant is
//! bounded twice: by wall-clock expiry and by a number of credits, one of
//! which is spent each time the grant deflects a bulk action.

use crate::relocation::Clock;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use derive_more::Display;
use poise::serenity_prelude::{GuildId, UserId};
use rand::Rng;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default cap on credits held by a single grant
pub const DEFAULT_MAX_CREDITS: u32 = 10;
/// Granularity of rolled protection durations, in minutes
pub const DURATION_STEP_MINUTES: i64 = 5;
/// Number of possible durations (5, 10, ..., 60 minutes)
pub const DURATION_BUCKETS: i64 = 12;

/// Ledger key: a user within a guild
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("{scope}:{user_id}")]
pub struct ProtectionKey {
    pub scope: GuildId,
    pub user_id: UserId,
}

impl ProtectionKey {
    #[must_use]
    pub const fn new(scope: GuildId, user_id: UserId) -> Self {
        Self { scope, user_id }
    }
}

/// A single protection grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionEntry {
    /// When the grant lapses
    pub expires_at: DateTime<Utc>,
    /// Remaining deflections
    pub credits: u32,
}

/// In-memory store of protection grants
#[derive(Clone)]
pub struct ProtectionLedger {
    entries: Arc<DashMap<ProtectionKey, ProtectionEntry>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ProtectionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionLedger")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// Roll a protection duration uniformly from 5 to 60 minutes in 5 minute steps
#[must_use]
pub fn roll_duration<R: Rng + ?Sized>(rng: &mut R) -> Duration {
    Duration::minutes(rng.random_range(1..=DURATION_BUCKETS) * DURATION_STEP_MINUTES)
}

impl ProtectionLedger {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Grant or refresh protection for a user.
    ///
    /// Expiry only ever moves forward. A fresh grant starts with the full
    /// `max_credits`; refreshing an existing grant adds one credit, capped at
    /// `max_credits`.
    pub fn grant(&self, scope: GuildId, user_id: UserId, max_credits: u32) -> ProtectionEntry {
        let duration = roll_duration(&mut rand::rng());
        self.grant_for(scope, user_id, max_credits, duration)
    }

    /// Grant with an explicit duration instead of a rolled one
    pub fn grant_for(
        &self,
        scope: GuildId,
        user_id: UserId,
        max_credits: u32,
        duration: Duration,
    ) -> ProtectionEntry {
        let key = ProtectionKey::new(scope, user_id);
        let candidate_expiry = self.clock.now() + duration;
        let max_credits = max_credits.max(1);

        let entry = match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get_mut();
                current.expires_at = current.expires_at.max(candidate_expiry);
                current.credits = current.credits.saturating_add(1).min(max_credits);
                *current
            }
            Entry::Vacant(vacant) => *vacant.insert(ProtectionEntry {
                expires_at: candidate_expiry,
                credits: max_credits,
            }),
        };

        info!(
            target: crate::RELOCATION_TARGET,
            key = %key,
            expires_at = %entry.expires_at,
            credits = entry.credits,
            "Protection granted"
        );
        entry
    }

    /// Remove a grant, returning whether one existed
    pub fn revoke(&self, scope: GuildId, user_id: UserId) -> bool {
        let key = ProtectionKey::new(scope, user_id);
        let removed = self.entries.remove(&key).is_some();
        if removed {
            info!(target: crate::RELOCATION_TARGET, key = %key, "Protection revoked");
        }
        removed
    }

    /// Whether a grant exists for the user, optionally spending one credit.
    ///
    /// Each call commits immediately; a grant whose last credit is spent is
    /// removed.
    pub fn is_protected(&self, scope: GuildId, user_id: UserId, consume_credit: bool) -> bool {
        let key = ProtectionKey::new(scope, user_id);
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if consume_credit {
                    let remaining = occupied.get().credits.saturating_sub(1);
                    if remaining == 0 {
                        occupied.remove();
                    } else {
                        occupied.get_mut().credits = remaining;
                    }
                    debug!(
                        target: crate::RELOCATION_TARGET,
                        key = %key,
                        remaining,
                        "Protection credit consumed"
                    );
                }
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Look at a grant without touching it
    #[must_use]
    pub fn get(&self, scope: GuildId, user_id: UserId) -> Option<ProtectionEntry> {
        self.entries
            .get(&ProtectionKey::new(scope, user_id))
            .map(|entry| *entry.value())
    }

    /// Drop every grant whose expiry has passed, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(target: crate::RELOCATION_TARGET, removed, "Swept expired protections");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run [`Self::sweep`] on a fixed interval until the task is aborted
    pub fn spawn_sweeper(&self, interval: std::time::Duration) -> JoinHandle<()> {
        let ledger = self.clone();
        tokio::spawn(async move {
            info!(
                target: crate::RELOCATION_TARGET,
                interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                "Starting protection sweeper"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                ledger.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relocation::ManualClock;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const GUILD: GuildId = GuildId::new(100);
    const USER: UserId = UserId::new(200);

    fn ledger() -> (ProtectionLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        (ProtectionLedger::new(clock.clone()), clock)
    }

    #[test]
    fn test_roll_duration_is_bucketed() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let minutes = roll_duration(&mut rng).num_minutes();
            assert!((5..=60).contains(&minutes), "rolled {minutes}");
            assert_eq!(minutes % 5, 0);
        }
    }

    #[test]
    fn test_fresh_grant_has_full_credits() {
        let (ledger, clock) = ledger();
        let entry = ledger.grant(GUILD, USER, 3);
        assert_eq!(entry.credits, 3);
        assert!(entry.expires_at > clock.now());
        assert!(entry.expires_at <= clock.now() + Duration::minutes(60));
        assert_eq!(ledger.get(GUILD, USER), Some(entry));
    }

    #[test]
    fn test_zero_cap_grant_still_holds_one_credit() {
        let (ledger, _clock) = ledger();
        let entry = ledger.grant(GUILD, USER, 0);
        assert_eq!(entry.credits, 1);
        assert!(ledger.is_protected(GUILD, USER, true));
        assert!(ledger.get(GUILD, USER).is_none());
    }

    #[test]
    fn test_regrant_never_shortens_expiry_or_exceeds_cap() {
        let (ledger, _clock) = ledger();
        let first = ledger.grant_for(GUILD, USER, 10, Duration::minutes(60));
        let second = ledger.grant_for(GUILD, USER, 10, Duration::minutes(5));
        assert_eq!(second.expires_at, first.expires_at);
        assert_eq!(second.credits, 10);

        for _ in 0..20 {
            let entry = ledger.grant(GUILD, USER, 10);
            assert!(entry.expires_at >= first.expires_at);
            assert!(entry.credits <= 10);
        }
    }

    #[test]
    fn test_regrant_extends_expiry_and_adds_a_credit() {
        let (ledger, _clock) = ledger();
        let first = ledger.grant_for(GUILD, USER, 3, Duration::minutes(5));
        assert!(ledger.is_protected(GUILD, USER, true));
        assert_eq!(ledger.get(GUILD, USER).map(|e| e.credits), Some(2));

        let second = ledger.grant_for(GUILD, USER, 3, Duration::minutes(30));
        assert!(second.expires_at > first.expires_at);
        assert_eq!(second.credits, 3);
    }

    #[test]
    fn test_credit_exhaustion() {
        let (ledger, _clock) = ledger();
        ledger.grant(GUILD, USER, 3);

        for expected in [2, 1] {
            assert!(ledger.is_protected(GUILD, USER, true));
            assert_eq!(ledger.get(GUILD, USER).map(|e| e.credits), Some(expected));
        }

        assert!(ledger.is_protected(GUILD, USER, true));
        assert!(ledger.get(GUILD, USER).is_none());
        assert!(!ledger.is_protected(GUILD, USER, true));
    }

    #[test]
    fn test_observing_check_does_not_spend_credits() {
        let (ledger, _clock) = ledger();
        ledger.grant(GUILD, USER, 2);
        for _ in 0..5 {
            assert!(ledger.is_protected(GUILD, USER, false));
        }
        assert_eq!(ledger.get(GUILD, USER).map(|e| e.credits), Some(2));
    }

    #[test]
    fn test_protection_is_scoped_per_guild() {
        let (ledger, _clock) = ledger();
        ledger.grant(GUILD, USER, 2);
        assert!(!ledger.is_protected(GuildId::new(999), USER, true));
        assert!(!ledger.is_protected(GUILD, UserId::new(999), true));
        assert_eq!(ledger.get(GUILD, USER).map(|e| e.credits), Some(2));
    }

    #[test]
    fn test_revoke() {
        let (ledger, _clock) = ledger();
        assert!(!ledger.revoke(GUILD, USER));
        ledger.grant(GUILD, USER, 10);
        assert!(ledger.revoke(GUILD, USER));
        assert!(!ledger.revoke(GUILD, USER));
        assert!(!ledger.is_protected(GUILD, USER, false));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (ledger, clock) = ledger();
        let short = UserId::new(1);
        let exact = UserId::new(2);
        let long = UserId::new(3);
        ledger.grant_for(GUILD, short, 10, Duration::minutes(5));
        ledger.grant_for(GUILD, exact, 10, Duration::minutes(10));
        ledger.grant_for(GUILD, long, 10, Duration::minutes(60));

        assert_eq!(ledger.sweep(), 0);
        assert_eq!(ledger.len(), 3);

        clock.advance(Duration::minutes(10));
        assert_eq!(ledger.sweep(), 2);
        assert!(ledger.get(GUILD, short).is_none());
        assert!(ledger.get(GUILD, exact).is_none());
        assert!(ledger.get(GUILD, long).is_some());

        assert_eq!(ledger.sweep(), 0);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_expires_entries() {
        let (ledger, clock) = ledger();
        ledger.grant_for(GUILD, USER, 10, Duration::minutes(5));

        let handle = ledger.spawn_sweeper(std::time::Duration::from_secs(1));
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert_eq!(ledger.len(), 1);

        clock.advance(Duration::minutes(6));
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        assert!(ledger.is_empty());

        handle.abort();
    }
}
