//! Relocation core
//!
//! Member selection, bulk disconnect/move execution, the protection ledger
//! and the deferred quit store. Nothing here depends on the command layer;
//! Discord access goes through [`VoicePlatform`].

mod clock;
mod error;
mod executor;
mod platform;
mod protection;
mod quit;
mod selection;
mod task_store;

#[cfg(test)]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use error::{RelocError, RelocResult};
pub use executor::{ActionOutcome, BulkAction, BulkReport, BulkRun, apply, execute, run_bulk};
#[cfg(test)]
pub use platform::MockVoicePlatform;
pub use platform::{AnnouncementPermissions, MemberHandle, MessageHandle, VoicePlatform};
pub use protection::{
    DEFAULT_MAX_CREDITS, ProtectionEntry, ProtectionKey, ProtectionLedger, roll_duration,
};
pub use quit::{
    FireOutcome, QuitCoordinator, QuitOutcome, QuitRequest, ScheduledQuit, audit_reason,
    quit_message, scheduled_message, wait_or_cancel,
};
pub use selection::{
    MAX_CHANNELS, MAX_ROLES, MAX_USERS, MemberSource, Selection, SelectionRequest, arrange,
    filter_candidates, order_members, partition, select,
};
pub use task_store::{DeferredTask, DeferredTaskStore, TaskKey};
