//! Selected-state operations: SELECT and the resync that follows it,
//! chunked body fetches, header batches, STORE with user-flag fallback,
//! COPY/MOVE (including the Gmail trash special case), SEARCH, EXPUNGE,
//! and NOOP/CHECK.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::cache::CacheWriter;
use crate::command::{Command, FetchAttribute, SearchCriteria, StatusAttribute, StoreAction};
use crate::config::DeleteModel;
use crate::connection::{Connection, ConnectionState};
use crate::sink::{HeaderBatch, HeaderEntry, ProgressKey, SinkBundle, UrlExtraStatus};
use crate::state::{
    FolderSyncState, ResyncPlan, SanityVerdict, changedsince_sanity, next_chunk, plan_resync,
    should_auto_expunge,
};
use crate::time::Clock;
use crate::types::{
    Capability, Flag, Flags, MailboxSpec, ResponseCode, SeqNum, SequenceSet, UidSet,
};
use crate::url::{ImapUrl, wire_name};
use crate::{Error, Result};

/// Message-flag bits as they appear in URLs (ASCII integer).
pub mod flag_bits {
    /// `\Seen`
    pub const SEEN: u32 = 0x01;
    /// `\Answered`
    pub const ANSWERED: u32 = 0x02;
    /// `\Flagged`
    pub const FLAGGED: u32 = 0x04;
    /// `\Deleted`
    pub const DELETED: u32 = 0x08;
    /// `\Draft`
    pub const DRAFT: u32 = 0x10;
}

/// Converts URL flag bits to a flag set.
#[must_use]
pub fn flags_from_bits(bits: u32) -> Flags {
    let mut flags = Flags::new();
    if bits & flag_bits::SEEN != 0 {
        flags.insert(Flag::Seen);
    }
    if bits & flag_bits::ANSWERED != 0 {
        flags.insert(Flag::Answered);
    }
    if bits & flag_bits::FLAGGED != 0 {
        flags.insert(Flag::Flagged);
    }
    if bits & flag_bits::DELETED != 0 {
        flags.insert(Flag::Deleted);
    }
    if bits & flag_bits::DRAFT != 0 {
        flags.insert(Flag::Draft);
    }
    flags
}

/// Makes sure the required mailbox is selected, closing and reselecting
/// when the connection sits in the wrong one.
pub async fn ensure_selected<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    canonical: &str,
    lite: bool,
    persist: &mut FolderSyncState,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if conn.state == ConnectionState::Selected
        && conn.selected_folder() == Some(canonical)
        && (lite || !conn.lite_select)
    {
        return Ok(());
    }

    if conn.state == ConnectionState::Selected
        && conn.config.delete_model == DeleteModel::MoveToTrash
    {
        // CLOSE expunges under the trash model, where \Deleted marks are
        // always transient.
        let _ = conn.run_command(&Command::Close, sinks).await?;
        conn.state = ConnectionState::Authenticated;
        conn.selected = None;
    }

    select_mailbox(conn, sinks, canonical, lite, persist).await
}

/// SELECTs a mailbox and, unless lite, brings the flag state in sync.
pub async fn select_mailbox<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    canonical: &str,
    lite: bool,
    persist: &mut FolderSyncState,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sinks
        .folder
        .progress_status(ProgressKey::SelectingMailbox, Some(canonical));

    let delimiter = sinks.folder.get_online_delimiter().unwrap_or('/');
    let mailbox = wire_name(canonical, delimiter, conn.utf8_accept);

    // Flag state never survives a re-SELECT.
    conn.flag_state.reset();
    conn.selected = Some(MailboxSpec {
        canonical_path: canonical.to_string(),
        delimiter: Some(delimiter),
        ..MailboxSpec::default()
    });
    conn.lite_select = lite;

    let condstore = conn.condstore_enabled;
    let outcome = conn
        .run_command(&Command::Select { mailbox, condstore }, sinks)
        .await?;
    if !outcome.is_ok() {
        conn.selected = None;
        conn.state = ConnectionState::Authenticated;
        return outcome.ok().map(|_| ());
    }
    conn.state = ConnectionState::Selected;

    // UIDVALIDITY epoch change discards everything we knew.
    let new_validity = conn
        .selected
        .as_ref()
        .and_then(|s| s.uid_validity)
        .map_or(0, |v| v.get());
    if persist.uid_validity != 0 && new_validity != persist.uid_validity {
        info!(
            folder = canonical,
            old = persist.uid_validity,
            new = new_validity,
            "UIDVALIDITY changed; discarding local state"
        );
        conn.flag_state.reset();
        persist.invalidate();
    }

    if let Some(spec) = &conn.selected {
        sinks.folder.update_mailbox_info(spec);
    }

    if lite {
        return Ok(());
    }

    update_mailbox(conn, sinks, persist).await
}

/// The mailbox update algorithm: cheapest safe resync plus expunge
/// detection and the auto-expunge policy.
pub async fn update_mailbox<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    persist: &mut FolderSyncState,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exists = conn.selected.as_ref().map_or(0, |s| s.exists);
    let server_mod_seq = conn
        .selected
        .as_ref()
        .and_then(|s| s.highest_mod_seq)
        .map(crate::types::ModSeq::get);

    let plan = plan_resync(
        *persist,
        exists,
        server_mod_seq,
        conn.condstore_enabled,
        &conn.flag_state,
        conn.config.delete_model,
    );
    debug!(?plan, exists, "mailbox resync plan");

    match plan {
        ResyncPlan::Nothing => {}
        ResyncPlan::Full => {
            full_flag_fetch(conn, sinks).await?;
        }
        ResyncPlan::ChangedSince(since) => {
            conn.flag_state.set_partial(true);
            let outcome = conn
                .run_command(
                    &Command::Fetch {
                        set: SequenceSet::RangeFrom(seq(1)),
                        attrs: vec![FetchAttribute::Flags],
                        uid: true,
                        changed_since: Some(since),
                    },
                    sinks,
                )
                .await?
                .ok()?;
            conn.flag_state.set_partial(false);

            let num_new_uids = u32::try_from(
                outcome
                    .fetch_records()
                    .filter(|r| r.uid.is_some_and(|u| u.get() > persist.highest_uid))
                    .count(),
            )
            .unwrap_or(u32::MAX);
            let current_exists = conn.selected.as_ref().map_or(0, |s| s.exists);
            let tail_coherent = conn.flag_state.tail_is_coherent(persist.highest_uid);

            if changedsince_sanity(
                num_new_uids,
                current_exists,
                persist.total_messages,
                tail_coherent,
            ) == SanityVerdict::ExpungeDetected
            {
                warn!("another client expunged behind our back; full resync");
                conn.flag_state.clear_messages();
                full_flag_fetch(conn, sinks).await?;
            }
        }
        ResyncPlan::Tail(highest) => {
            let start = highest.saturating_add(1);
            let _ = conn
                .run_command(
                    &Command::Fetch {
                        set: SequenceSet::RangeFrom(seq(start)),
                        attrs: vec![FetchAttribute::Flags],
                        uid: true,
                        changed_since: None,
                    },
                    sinks,
                )
                .await?
                .ok()?;
        }
    }

    let highest_uid = conn.flag_state.highest_uid();
    let exists_now = conn.selected.as_ref().map_or(0, |s| s.exists);
    let mod_seq_now = conn
        .selected
        .as_ref()
        .and_then(|s| s.highest_mod_seq)
        .map(crate::types::ModSeq::get);
    let validity_now = conn
        .selected
        .as_ref()
        .and_then(|s| s.uid_validity)
        .map_or(0, |v| v.get());
    persist.absorb(
        exists_now,
        highest_uid,
        mod_seq_now,
        validity_now,
        conn.flag_state.deleted_count(),
    );

    let deleted = conn.flag_state.deleted_count();
    if should_auto_expunge(
        conn.config.expunge_policy,
        conn.lite_select,
        deleted,
        conn.config.expunge_threshold,
        conn.config.delete_model,
        conn.config.show_deleted_messages,
    ) {
        let _ = conn.run_command(&Command::Expunge, sinks).await?;
    }

    if let Some(spec) = &conn.selected {
        sinks.folder.update_mailbox_status(spec);
    }
    Ok(())
}

async fn full_flag_fetch<S>(conn: &mut Connection<S>, sinks: &SinkBundle) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.flag_state.clear_messages();
    let _ = conn
        .run_command(
            &Command::Fetch {
                set: SequenceSet::RangeFrom(seq(1)),
                attrs: vec![FetchAttribute::Flags],
                uid: true,
                changed_since: None,
            },
            sinks,
        )
        .await?
        .ok()?;
    Ok(())
}

/// Throttle for percent-progress: at most one event per 750 ms, with
/// 100 % always delivered.
pub struct ProgressThrottle {
    last: Option<std::time::Instant>,
}

impl ProgressThrottle {
    const INTERVAL: Duration = Duration::from_millis(750);

    /// Creates a throttle that fires on the first call.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Emits progress through the folder sink if due. 100 % is always
    /// delivered.
    pub fn emit(&mut self, sinks: &SinkBundle, clock: &dyn Clock, current: u64, total: u64) {
        let now = clock.now();
        let complete = total > 0 && current >= total;
        let due = self.last.is_none_or(|t| now.duration_since(t) >= Self::INTERVAL);
        if complete || due {
            self.last = Some(now);
            sinks.folder.percent_progress(current, total);
        }
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one message-body download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFetchOutcome {
    /// The whole body was delivered.
    Complete,
    /// The server returned no bytes: the message vanished mid-fetch.
    ExpungedDuringFetch,
    /// A pseudo-interrupt or death signal stopped the download.
    Aborted,
}

/// Fetches one message body, chunked when size and configuration call
/// for it, streaming data to the listener/message sink and teeing into
/// an optional cache writer. Chunk-size tuning lives on the connection
/// and survives across URLs.
pub async fn fetch_message_body<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    url: &ImapUrl,
    uid: u32,
    message_size: u32,
    peek: bool,
    mut cache_writer: Option<Box<dyn CacheWriter>>,
    clock: &dyn Clock,
) -> Result<BodyFetchOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sinks.folder.start_message(url);
    sinks.message.setup_msg_write_stream(false);

    let chunking = conn.tuner.should_chunk(
        message_size,
        conn.config.fetch_by_chunks,
        conn.caps.has(&Capability::Imap4Rev1),
    );

    let mut throttle = ProgressThrottle::new();
    let mut delivered: u64 = 0;
    let outcome = if chunking {
        let mut offset = 0u32;
        loop {
            if conn.death_signaled() || conn.interrupted() {
                break BodyFetchOutcome::Aborted;
            }
            let Some(chunk) = next_chunk(offset, message_size, conn.tuner.chunk_size()) else {
                break BodyFetchOutcome::Complete;
            };

            let started = clock.now();
            let attrs = vec![
                FetchAttribute::Uid,
                FetchAttribute::Rfc822Size,
                FetchAttribute::body_chunk(peek, chunk.offset, chunk.length),
            ];
            let data = match fetch_body_data(conn, sinks, uid, attrs.clone()).await {
                Ok(data) => data,
                Err(first) => {
                    // A failed chunk gets one retry, skipped under a
                    // pending pseudo-interrupt or once the connection
                    // itself is gone.
                    if conn.interrupted() || conn.death_signaled() || first.is_fatal() {
                        abort_message_download(sinks, cache_writer.take());
                        return Err(first);
                    }
                    warn!(uid, offset = chunk.offset, error = %first, "chunk fetch failed; retrying once");
                    match fetch_body_data(conn, sinks, uid, attrs).await {
                        Ok(data) => data,
                        Err(second) => {
                            abort_message_download(sinks, cache_writer.take());
                            return Err(second);
                        }
                    }
                }
            };

            if data.is_empty() {
                // Zero bytes back means the message was expunged while
                // we were fetching it; stop cleanly.
                break BodyFetchOutcome::ExpungedDuringFetch;
            }

            let got = u32::try_from(data.len()).unwrap_or(u32::MAX);
            deliver_body_bytes(sinks, url, uid, &data, match cache_writer.as_mut() { Some(w) => Some(w.as_mut()), None => None });
            delivered += u64::from(got);
            throttle.emit(sinks, clock, delivered, u64::from(message_size));

            conn.tuner.adjust(clock.elapsed(started), got);
            offset = offset.saturating_add(got);
            if got < chunk.length {
                break BodyFetchOutcome::Complete;
            }
        }
    } else {
        let attrs = vec![
            FetchAttribute::Uid,
            FetchAttribute::Rfc822Size,
            FetchAttribute::whole_body(peek),
        ];
        // Whole-message fetches get no chunk-level retry; a failure
        // aborts this download and the URL carries the error.
        let data = match fetch_body_data(conn, sinks, uid, attrs).await {
            Ok(data) => data,
            Err(e) => {
                abort_message_download(sinks, cache_writer.take());
                return Err(e);
            }
        };
        if data.is_empty() {
            BodyFetchOutcome::ExpungedDuringFetch
        } else {
            delivered = u64::try_from(data.len()).unwrap_or(u64::MAX);
            deliver_body_bytes(sinks, url, uid, &data, match cache_writer.as_mut() { Some(w) => Some(w.as_mut()), None => None });
            BodyFetchOutcome::Complete
        }
    };

    match outcome {
        BodyFetchOutcome::Complete => {
            throttle.emit(sinks, clock, delivered, delivered.max(1));
            if let Some(writer) = cache_writer.take() {
                writer.commit();
            }
            sinks.message.normal_end_msg_write_stream(
                uid,
                !url.store_results_offline,
                url,
                u32::try_from(delivered).unwrap_or(u32::MAX),
            );
            sinks.folder.end_message(url, uid);
        }
        BodyFetchOutcome::ExpungedDuringFetch | BodyFetchOutcome::Aborted => {
            abort_message_download(sinks, cache_writer);
        }
    }

    Ok(outcome)
}

/// Tells the storage layer to discard the partial message and dooms any
/// open cache entry. Idempotent.
pub fn abort_message_download(sinks: &SinkBundle, cache_writer: Option<Box<dyn CacheWriter>>) {
    sinks.message.abort_msg_write_stream();
    if let Some(writer) = cache_writer {
        writer.doom();
    }
}

/// Issues one UID FETCH and extracts the body bytes for the target UID.
async fn fetch_body_data<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    uid: u32,
    attrs: Vec<FetchAttribute>,
) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let set = SequenceSet::single(uid).ok_or(Error::Protocol("UID 0 in fetch".to_string()))?;
    let outcome = conn
        .run_command(
            &Command::Fetch {
                set,
                attrs,
                uid: true,
                changed_since: None,
            },
            sinks,
        )
        .await?
        .ok()?;

    let mut data = Vec::new();
    for record in outcome.fetch_records() {
        if record.uid.is_some_and(|u| u.get() == uid)
            && let Some(body) = &record.body
            && let Some(bytes) = &body.data
        {
            data.extend_from_slice(bytes);
        }
    }
    Ok(data)
}

/// Streams body bytes to the listener, the message sink (line by line),
/// and the optional cache writer.
fn deliver_body_bytes(
    sinks: &SinkBundle,
    url: &ImapUrl,
    uid: u32,
    data: &[u8],
    cache_writer: Option<&mut dyn CacheWriter>,
) {
    sinks.listener.on_data_available(data);
    if let Some(writer) = cache_writer {
        writer.write(data);
    }
    let mut rest = data;
    while !rest.is_empty() {
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .map_or(rest.len(), |i| i + 1);
        sinks.message.parse_adopted_msg_line(&rest[..end], uid, url);
        rest = &rest[end..];
    }
}

/// STOREs flags on a UID set, silently dropping flags the server does
/// not allow as permanent. Returns the extra status for the URL.
pub async fn store_flags<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    set: &UidSet,
    action: &StoreAction,
    silent: bool,
) -> Result<UrlExtraStatus>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let requested = action.flags().clone();
    let permitted = requested.intersect_permitted(&conn.flag_state.permanent_flags);
    let dropped = requested.iter().count() != permitted.iter().count();

    if permitted.is_empty() {
        // Nothing storable is left; skip the round-trip entirely.
        return Ok(if dropped {
            UrlExtraStatus::FlagsNotSettable
        } else {
            UrlExtraStatus::None
        });
    }

    let cmd = Command::Store {
        set: SequenceSet::from_uid_set(set),
        action: action.with_flags(permitted),
        silent,
        uid: true,
    };
    conn.run_command(&cmd, sinks).await?.ok()?;

    Ok(if dropped {
        UrlExtraStatus::FlagsNotSettable
    } else {
        UrlExtraStatus::None
    })
}

/// Server-side copy (or move) of a UID set.
///
/// MOVE is preferred when advertised; otherwise COPY + STORE `\Deleted
/// \Seen` + expunge, with UID EXPUNGE under UIDPLUS so other clients'
/// `\Deleted` marks survive.
pub async fn online_copy_move<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    set: &UidSet,
    dest_canonical: &str,
    is_move: bool,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sinks
        .folder
        .progress_status(ProgressKey::CopyingMessages, Some(dest_canonical));

    let delimiter = conn
        .selected
        .as_ref()
        .and_then(|s| s.delimiter)
        .unwrap_or('/');
    let mailbox = wire_name(dest_canonical, delimiter, conn.utf8_accept);
    let seq_set = SequenceSet::from_uid_set(set);

    if is_move && conn.caps.has(&Capability::Move) {
        let outcome = conn
            .run_command(
                &Command::Move {
                    set: seq_set,
                    mailbox,
                    uid: true,
                },
                sinks,
            )
            .await?;
        if let Some(dest) = outcome.copyuid_dest() {
            sinks.folder.set_copy_response_uid(dest);
        }
        let ok = outcome.is_ok();
        sinks.folder.online_copy_completed(ok);
        return outcome.ok().map(|_| ());
    }

    let outcome = conn
        .run_command(
            &Command::Copy {
                set: seq_set.clone(),
                mailbox,
                uid: true,
            },
            sinks,
        )
        .await?;
    if !outcome.is_ok() {
        sinks.folder.online_copy_completed(false);
        return outcome.ok().map(|_| ());
    }
    if let Some(dest) = outcome.copyuid_dest() {
        sinks.folder.set_copy_response_uid(dest);
    }

    if is_move {
        let deleted_seen = Flags::from_vec(vec![Flag::Deleted, Flag::Seen]);
        conn.run_command(
            &Command::Store {
                set: seq_set,
                action: StoreAction::AddFlags(deleted_seen),
                silent: true,
                uid: true,
            },
            sinks,
        )
        .await?
        .ok()?;

        if conn.config.delete_model != DeleteModel::MarkDeleted {
            if conn.caps.has(&Capability::UidPlus) {
                conn.run_command(&Command::UidExpunge { uids: set.clone() }, sinks)
                    .await?
                    .ok()?;
            } else {
                conn.run_command(&Command::Expunge, sinks).await?.ok()?;
            }
        }
    }

    sinks.folder.online_copy_completed(true);
    Ok(())
}

/// The Gmail shift-delete interaction: when Gmail is the server,
/// `\Deleted` is being added with expunge-after-delete on, and a Gmail
/// Trash exists, a COPY to Trash is the only thing Gmail treats as an
/// expunging move out of All Mail. The copied messages are then deleted
/// out of Trash using the COPYUID mapping, and the original mailbox is
/// reselected without a mailbox update.
pub async fn gmail_trash_delete<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    set: &UidSet,
    trash_canonical: &str,
    origin_canonical: &str,
    persist: &mut FolderSyncState,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let delimiter = conn
        .selected
        .as_ref()
        .and_then(|s| s.delimiter)
        .unwrap_or('/');
    let trash_wire = wire_name(trash_canonical, delimiter, conn.utf8_accept);

    let outcome = conn
        .run_command(
            &Command::Copy {
                set: SequenceSet::from_uid_set(set),
                mailbox: trash_wire,
                uid: true,
            },
            sinks,
        )
        .await?
        .ok()?;

    let Some(dest) = outcome.copyuid_dest().cloned() else {
        // Without COPYUID there is nothing to clean out of Trash.
        return Ok(());
    };
    sinks.folder.set_copy_response_uid(&dest);

    // Trash is touched without a mailbox update on either side.
    let mut scratch = FolderSyncState::default();
    select_mailbox(conn, sinks, trash_canonical, true, &mut scratch).await?;

    conn.run_command(
        &Command::Store {
            set: SequenceSet::from_uid_set(&dest),
            action: StoreAction::AddFlags(Flags::from_vec(vec![Flag::Deleted])),
            silent: false,
            uid: true,
        },
        sinks,
    )
    .await?
    .ok()?;

    conn.run_command(&Command::UidExpunge { uids: dest }, sinks)
        .await?
        .ok()?;

    select_mailbox(conn, sinks, origin_canonical, true, persist).await?;
    Ok(())
}

/// SEARCH in the selected mailbox, reporting hits line by line.
pub async fn search<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    url: &ImapUrl,
    criteria: &str,
    uid: bool,
) -> Result<Vec<u32>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sinks
        .folder
        .progress_status(ProgressKey::SearchingMailbox, None);

    let outcome = conn
        .run_command(
            &Command::Search {
                criteria: SearchCriteria::Raw(criteria.to_string()),
                uid,
            },
            sinks,
        )
        .await?
        .ok()?;

    let hits = outcome.search_results();
    for hit in &hits {
        sinks.folder.notify_search_hit(url, &hit.to_string());
    }
    Ok(hits)
}

/// EXPUNGE, honoring `check_deleted_before_expunge`.
pub async fn expunge_folder<S>(conn: &mut Connection<S>, sinks: &SinkBundle) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if conn.config.check_deleted_before_expunge && conn.flag_state.deleted_count() == 0 {
        return Ok(());
    }
    conn.run_command(&Command::Expunge, sinks).await?.ok()?;
    if let Some(selected) = &mut conn.selected {
        selected.box_flags.insert(crate::types::BoxFlags::JUST_EXPUNGED);
    }
    Ok(())
}

/// UID EXPUNGE of a specific set (UIDPLUS), with whole-folder EXPUNGE as
/// the fallback.
pub async fn uid_expunge<S>(conn: &mut Connection<S>, sinks: &SinkBundle, set: &UidSet) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if conn.caps.has(&Capability::UidPlus) {
        conn.run_command(&Command::UidExpunge { uids: set.clone() }, sinks)
            .await?
            .ok()?;
    } else {
        conn.run_command(&Command::Expunge, sinks).await?.ok()?;
    }
    Ok(())
}

/// NOOP between refreshes; every Nth is promoted to CHECK.
pub async fn noop_or_check<S>(conn: &mut Connection<S>, sinks: &SinkBundle) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.noop_counter = conn.noop_counter.wrapping_add(1);
    let promote = conn.config.noop_check_count != 0
        && conn.noop_counter % conn.config.noop_check_count == 0;
    let cmd = if promote { Command::Check } else { Command::Noop };
    conn.run_command(&cmd, sinks).await?.ok()?;
    Ok(())
}

/// STATUS of another mailbox while one is selected (folder refresh).
pub async fn folder_status<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    canonical: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sinks.folder.progress_status(ProgressKey::FolderStatus, Some(canonical));

    let delimiter = sinks.folder.get_online_delimiter().unwrap_or('/');
    let mailbox = wire_name(canonical, delimiter, conn.utf8_accept);
    let outcome = conn
        .run_command(
            &Command::Status {
                mailbox,
                items: vec![
                    StatusAttribute::UidNext,
                    StatusAttribute::Messages,
                    StatusAttribute::UidValidity,
                    StatusAttribute::Unseen,
                    StatusAttribute::HighestModSeq,
                ],
            },
            sinks,
        )
        .await?
        .ok()?;

    for u in &outcome.untagged {
        if let crate::parser::UntaggedResponse::Status { items, .. } = u {
            let mut spec = MailboxSpec {
                canonical_path: canonical.to_string(),
                ..MailboxSpec::default()
            };
            for item in items {
                match item {
                    crate::parser::StatusItem::Messages(n) => spec.exists = *n,
                    crate::parser::StatusItem::Recent(n) => spec.recent = *n,
                    crate::parser::StatusItem::UidNext(uid) => spec.uid_next = Some(*uid),
                    crate::parser::StatusItem::UidValidity(v) => spec.uid_validity = Some(*v),
                    crate::parser::StatusItem::Unseen(n) => spec.unseen = SeqNum::new(*n),
                    crate::parser::StatusItem::HighestModSeq(n) => {
                        spec.highest_mod_seq = crate::types::ModSeq::from_u64(*n);
                    }
                }
            }
            sinks.folder.update_mailbox_status(&spec);
        }
    }
    Ok(())
}

/// Fetches headers for a UID set in batches, then downloads the bodies
/// the folder sink asks for.
pub async fn fetch_headers<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    url: &ImapUrl,
    uids: &UidSet,
    clock: &dyn Clock,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let total = u64::try_from(uids.len()).unwrap_or(u64::MAX);
    sinks
        .folder
        .progress_status(ProgressKey::ReceivingMessageHeaders, None);

    let header_attr = if conn.config.use_envelope_cmd {
        FetchAttribute::Envelope
    } else {
        let arbitrary = sinks.server.get_arbitrary_headers();
        let mut fields: Vec<String> = [
            "From", "To", "Cc", "Bcc", "Subject", "Date", "Message-ID", "References",
            "In-Reply-To", "Content-Type", "Priority",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        fields.extend(arbitrary);
        FetchAttribute::headers(Some(&fields))
    };

    let mut attrs = vec![
        FetchAttribute::Uid,
        FetchAttribute::Rfc822Size,
        FetchAttribute::Flags,
        header_attr,
    ];
    if conn.quirks.is_gmail {
        attrs.push(FetchAttribute::GmMsgId);
        attrs.push(FetchAttribute::GmThrId);
        attrs.push(FetchAttribute::GmLabels);
    }

    let outcome = conn
        .run_command(
            &Command::Fetch {
                set: SequenceSet::from_uid_set(uids),
                attrs,
                uid: true,
                changed_since: None,
            },
            sinks,
        )
        .await?
        .ok()?;

    let mut throttle = ProgressThrottle::new();
    let mut batch = HeaderBatch::new();
    let mut seen: u64 = 0;
    for record in outcome.fetch_records() {
        let Some(uid) = record.uid else { continue };
        if conn.death_signaled() || conn.interrupted() {
            sinks.folder.abort_header_parse_stream();
            return Err(Error::Shutdown);
        }
        let headers = record
            .body
            .as_ref()
            .and_then(|b| b.data.clone())
            .unwrap_or_default();
        let full = batch.push(HeaderEntry {
            uid: uid.get(),
            size: record.size.unwrap_or(0),
            flags: record.flags.clone().unwrap_or_default(),
            headers,
        });
        seen += 1;
        throttle.emit(sinks, clock, seen, total);
        if full {
            sinks.folder.parse_msg_hdrs(batch.entries());
            batch.take();
        }
    }
    if !batch.is_empty() {
        sinks.folder.parse_msg_hdrs(batch.entries());
    }
    sinks.folder.header_fetch_completed();

    // The folder sink decides which bodies come down now.
    loop {
        let (more, _total, body_uids) = sinks.folder.get_msg_hdrs_to_download();
        if body_uids.is_empty() {
            break;
        }
        for uid in body_uids {
            if conn.interrupted() || conn.death_signaled() {
                return Err(Error::Shutdown);
            }
            let size = sinks.message.message_size_from_db(uid).unwrap_or(0);
            let outcome =
                fetch_message_body(conn, sinks, url, uid, size, true, None, clock).await?;
            if outcome == BodyFetchOutcome::Aborted {
                break;
            }
        }
        if !more {
            break;
        }
    }
    Ok(())
}

fn seq(n: u32) -> SeqNum {
    SeqNum::new(n.max(1)).unwrap_or(SeqNum(std::num::NonZeroU32::MIN))
}

/// True when the Gmail trash interaction applies to a flag-add URL.
#[must_use]
pub fn gmail_trash_case_applies(
    is_gmail: bool,
    adding_deleted: bool,
    expunge_after_delete: bool,
    trash_known: bool,
) -> bool {
    is_gmail && adding_deleted && expunge_after_delete && trash_known
}

/// Maps a tagged NO carrying TRYCREATE into a distinct error text so the
/// caller can create the target and rerun.
#[must_use]
pub fn is_try_create(err: &Error) -> bool {
    matches!(
        err,
        Error::No {
            code: Some(ResponseCode::TryCreate),
            ..
        }
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_roundtrip() {
        let flags = flags_from_bits(flag_bits::SEEN | flag_bits::DELETED);
        assert!(flags.is_seen());
        assert!(flags.is_deleted());
        assert!(!flags.contains(&Flag::Draft));

        assert!(flags_from_bits(0).is_empty());
    }

    #[test]
    fn gmail_case_gates() {
        assert!(gmail_trash_case_applies(true, true, true, true));
        assert!(!gmail_trash_case_applies(false, true, true, true));
        assert!(!gmail_trash_case_applies(true, false, true, true));
        assert!(!gmail_trash_case_applies(true, true, false, true));
        assert!(!gmail_trash_case_applies(true, true, true, false));
    }

    #[test]
    fn try_create_detection() {
        assert!(is_try_create(&Error::No {
            text: "no such mailbox".to_string(),
            code: Some(ResponseCode::TryCreate),
        }));
        assert!(!is_try_create(&Error::No {
            text: "denied".to_string(),
            code: None,
        }));
    }

    #[test]
    fn progress_throttle_always_fires_at_completion() {
        use crate::time::MockClock;

        struct Counting(std::sync::atomic::AtomicU32);
        impl crate::sink::FolderSink for Counting {
            fn percent_progress(&self, _current: u64, _total: u64) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let counter = std::sync::Arc::new(Counting(std::sync::atomic::AtomicU32::new(0)));
        let mut sinks = SinkBundle::noop();
        sinks.folder = counter.clone();

        let clock = MockClock::new();
        let mut throttle = ProgressThrottle::new();
        throttle.emit(&sinks, &clock, 10, 100); // first fires
        throttle.emit(&sinks, &clock, 20, 100); // throttled
        throttle.emit(&sinks, &clock, 100, 100); // completion always fires
        assert_eq!(counter.0.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
