//! Selected-mailbox state: the flag-and-UID cache, the resync decision
//! logic, and chunk tuning.

mod chunk;
mod flag_state;
mod sync;

pub use chunk::{Chunk, ChunkTuner, next_chunk};
pub use flag_state::{FlagEntry, FlagState};
pub use sync::{
    FolderSyncState, ResyncPlan, SanityVerdict, changedsince_sanity, highwater_after_changedsince,
    plan_resync, should_auto_expunge,
};
