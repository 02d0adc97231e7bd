//! The selected-mailbox synchronization algorithm.
//!
//! After SELECT the engine must bring the local flag-and-UID state in
//! line with the server using the cheapest safe command, while detecting
//! expunges done by other clients. The decision logic is pure; the ops
//! layer issues whatever command the plan names.

use crate::config::{DeleteModel, ExpungePolicy};
use crate::state::FlagState;

/// Persisted per-folder sync state (mirrors the folder database entries).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderSyncState {
    /// `highestModSeq`: the HIGHESTMODSEQ after the last full sync.
    pub highest_mod_seq: u64,
    /// `highestRecordedUID`: the highest UID we have flag state for.
    pub highest_uid: u32,
    /// Total message count at the last sync.
    pub total_messages: u32,
    /// `uidValidity` the state was built against; 0 when never synced.
    pub uid_validity: u32,
    /// `numDeletedHeaders`.
    pub num_deleted: u32,
}

/// Which resync command to issue after SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncPlan {
    /// `UID FETCH 1:* (FLAGS)`: rebuild everything.
    Full,
    /// `UID FETCH 1:* (FLAGS) (CHANGEDSINCE n)`: incremental, recorded
    /// in partial-UID-fetch mode.
    ChangedSince(u64),
    /// `UID FETCH (n+1):* (FLAGS)`: only the new tail.
    Tail(u32),
    /// Nothing to fetch: the mailbox is empty.
    Nothing,
}

/// Decides the resync command.
#[must_use]
pub fn plan_resync(
    persist: FolderSyncState,
    select_exists: u32,
    select_highest_mod_seq: Option<u64>,
    condstore_enabled: bool,
    flag_state: &FlagState,
    delete_model: DeleteModel,
) -> ResyncPlan {
    if select_exists == 0 {
        return ResyncPlan::Nothing;
    }

    let condstore_usable = condstore_enabled && select_highest_mod_seq.is_some();

    if persist.highest_uid == 0 || (flag_state.is_empty() && !condstore_usable) {
        return ResyncPlan::Full;
    }

    if condstore_usable {
        let server_mod_seq = select_highest_mod_seq.unwrap_or(0);
        if server_mod_seq != persist.highest_mod_seq {
            return ResyncPlan::ChangedSince(persist.highest_mod_seq);
        }
        return ResyncPlan::Tail(persist.highest_uid);
    }

    // Without CONDSTORE a fully deleted or empty cache plus a count
    // mismatch under the mark-deleted model means our picture is stale.
    if (flag_state.is_empty() || flag_state.all_deleted())
        && delete_model == DeleteModel::MarkDeleted
        && select_exists != persist.total_messages
    {
        return ResyncPlan::Full;
    }

    ResyncPlan::Tail(persist.highest_uid)
}

/// Result of the post-CHANGEDSINCE expunge sanity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanityVerdict {
    /// The counts line up; the incremental resync stands.
    Consistent,
    /// Another client expunged messages we still believe exist: clear
    /// the flag state and run a full resync.
    ExpungeDetected,
}

/// Checks whether a CHANGEDSINCE resync accounted for every mailbox
/// change.
///
/// `num_new_uids` counts returned UIDs strictly greater than the
/// previously recorded highest UID; `tail_coherent` is false when the
/// walk over the new-UID tail hit a placeholder entry (an observed
/// corruption pattern that also means an expunge slipped through).
#[must_use]
pub fn changedsince_sanity(
    num_new_uids: u32,
    current_exists: u32,
    previous_total: u32,
    tail_coherent: bool,
) -> SanityVerdict {
    if !tail_coherent {
        return SanityVerdict::ExpungeDetected;
    }
    let exists_delta = i64::from(current_exists) - i64::from(previous_total);
    if i64::from(num_new_uids) == exists_delta {
        SanityVerdict::Consistent
    } else {
        SanityVerdict::ExpungeDetected
    }
}

/// The persisted highest-UID cursor after a CHANGEDSINCE resync.
///
/// When the response carried only flag changes (no UID above the old
/// cursor), the cursor must stay at the old highwater so a later tail
/// fetch does not re-fetch those messages.
#[must_use]
pub fn highwater_after_changedsince(previous_highest: u32, max_returned_uid: u32) -> u32 {
    previous_highest.max(max_returned_uid)
}

/// Decides whether to auto-expunge after a resync.
#[must_use]
pub fn should_auto_expunge(
    policy: ExpungePolicy,
    lite_select: bool,
    deleted_count: u32,
    threshold: u32,
    delete_model: DeleteModel,
    show_deleted_messages: bool,
) -> bool {
    if lite_select || policy == ExpungePolicy::Never || deleted_count == 0 {
        return false;
    }
    match policy {
        ExpungePolicy::Always => true,
        ExpungePolicy::OnThreshold => deleted_count >= threshold,
        ExpungePolicy::DeleteModel => {
            delete_model != DeleteModel::MarkDeleted
                && !show_deleted_messages
                && deleted_count >= threshold
        }
        ExpungePolicy::Never => false,
    }
}

impl FolderSyncState {
    /// Folds a finished resync into the persisted values.
    pub fn absorb(
        &mut self,
        exists: u32,
        highest_uid: u32,
        highest_mod_seq: Option<u64>,
        uid_validity: u32,
        num_deleted: u32,
    ) {
        self.total_messages = exists;
        self.highest_uid = highwater_after_changedsince(self.highest_uid, highest_uid);
        if let Some(modseq) = highest_mod_seq {
            self.highest_mod_seq = modseq;
        }
        self.uid_validity = uid_validity;
        self.num_deleted = num_deleted;
    }

    /// Discards everything; used on UIDVALIDITY change.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Flag, Flags};

    fn populated_state(uids: &[u32]) -> FlagState {
        let mut state = FlagState::new();
        for (i, &uid) in uids.iter().enumerate() {
            state.record(
                u32::try_from(i).unwrap() + 1,
                uid,
                Flags::from_vec(vec![Flag::Seen]),
            );
        }
        state
    }

    #[test]
    fn first_sync_is_full() {
        let plan = plan_resync(
            FolderSyncState::default(),
            10,
            None,
            false,
            &FlagState::new(),
            DeleteModel::MoveToTrash,
        );
        assert_eq!(plan, ResyncPlan::Full);
    }

    #[test]
    fn empty_mailbox_fetches_nothing() {
        let plan = plan_resync(
            FolderSyncState::default(),
            0,
            None,
            false,
            &FlagState::new(),
            DeleteModel::MoveToTrash,
        );
        assert_eq!(plan, ResyncPlan::Nothing);
    }

    #[test]
    fn changed_modseq_picks_changedsince() {
        // Scenario: stored modseq 5000, SELECT reports 5200.
        let persist = FolderSyncState {
            highest_mod_seq: 5000,
            highest_uid: 100,
            total_messages: 100,
            uid_validity: 7,
            num_deleted: 0,
        };
        let plan = plan_resync(
            persist,
            101,
            Some(5200),
            true,
            &populated_state(&[99, 100]),
            DeleteModel::MoveToTrash,
        );
        assert_eq!(plan, ResyncPlan::ChangedSince(5000));
    }

    #[test]
    fn unchanged_modseq_picks_tail() {
        let persist = FolderSyncState {
            highest_mod_seq: 5000,
            highest_uid: 100,
            total_messages: 100,
            uid_validity: 7,
            num_deleted: 0,
        };
        let plan = plan_resync(
            persist,
            101,
            Some(5000),
            true,
            &populated_state(&[99, 100]),
            DeleteModel::MoveToTrash,
        );
        assert_eq!(plan, ResyncPlan::Tail(100));
    }

    #[test]
    fn stale_mark_deleted_cache_forces_full() {
        let persist = FolderSyncState {
            highest_mod_seq: 0,
            highest_uid: 100,
            total_messages: 100,
            uid_validity: 7,
            num_deleted: 0,
        };
        let plan = plan_resync(
            persist,
            95,
            None,
            false,
            &FlagState::new(),
            DeleteModel::MarkDeleted,
        );
        assert_eq!(plan, ResyncPlan::Full);
    }

    #[test]
    fn sanity_passes_when_counts_match() {
        // One new UID, EXISTS went from 100 to 101.
        assert_eq!(
            changedsince_sanity(1, 101, 100, true),
            SanityVerdict::Consistent
        );
    }

    #[test]
    fn sanity_detects_silent_expunge() {
        // One new UID but EXISTS dropped to 99: 1 != -1.
        assert_eq!(
            changedsince_sanity(1, 99, 100, true),
            SanityVerdict::ExpungeDetected
        );
    }

    #[test]
    fn sanity_fails_on_incoherent_tail() {
        assert_eq!(
            changedsince_sanity(0, 100, 100, false),
            SanityVerdict::ExpungeDetected
        );
    }

    #[test]
    fn highwater_keeps_old_cursor_on_flag_only_changes() {
        assert_eq!(highwater_after_changedsince(100, 50), 100);
        assert_eq!(highwater_after_changedsince(100, 101), 101);
    }

    #[test]
    fn auto_expunge_policies() {
        use ExpungePolicy as P;

        assert!(should_auto_expunge(P::Always, false, 1, 20, DeleteModel::MoveToTrash, false));
        assert!(!should_auto_expunge(P::Always, false, 0, 20, DeleteModel::MoveToTrash, false));
        assert!(!should_auto_expunge(P::Always, true, 5, 20, DeleteModel::MoveToTrash, false));
        assert!(!should_auto_expunge(P::Never, false, 100, 20, DeleteModel::MoveToTrash, false));

        assert!(should_auto_expunge(P::OnThreshold, false, 20, 20, DeleteModel::MoveToTrash, false));
        assert!(!should_auto_expunge(P::OnThreshold, false, 19, 20, DeleteModel::MoveToTrash, false));

        assert!(should_auto_expunge(P::DeleteModel, false, 25, 20, DeleteModel::MoveToTrash, false));
        assert!(!should_auto_expunge(P::DeleteModel, false, 25, 20, DeleteModel::MarkDeleted, false));
        assert!(!should_auto_expunge(P::DeleteModel, false, 25, 20, DeleteModel::MoveToTrash, true));
    }

    #[test]
    fn absorb_updates_persisted_state() {
        let mut persist = FolderSyncState::default();
        persist.absorb(101, 101, Some(5200), 7, 2);
        assert_eq!(persist.total_messages, 101);
        assert_eq!(persist.highest_uid, 101);
        assert_eq!(persist.highest_mod_seq, 5200);
        assert_eq!(persist.uid_validity, 7);

        persist.invalidate();
        assert_eq!(persist, FolderSyncState::default());
    }
}
