//! The URL runner: decides whether a URL can run on a connection, tries
//! to serve it locally, dispatches it to the operation implementations,
//! and delivers exactly one start/stop notification pair per run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::cache::{CacheLookup, FetchPath, MessageCache, plan_fetch_path, settle_lookup};
use crate::command::{Command, FetchAttribute, StoreAction};
use crate::config::DeleteModel;
use crate::connection::{Connection, ConnectionState};
use crate::discovery::{DiscoveryKind, discover_folders};
use crate::host::HostRegistry;
use crate::ops::authenticated as auth_ops;
use crate::ops::selected as sel_ops;
use crate::sink::{BiffState, SinkBundle, UrlExtraStatus, UrlStatus};
use crate::state::FolderSyncState;
use crate::time::Clock;
use crate::types::{Flag, Flags, SequenceSet, UidSet};
use crate::url::{ImapUrl, UrlAction};
use crate::{Error, Result};

/// Per-folder persisted sync state, keyed by canonical path.
///
/// The real store is the folder database; this mirror keeps the engine
/// testable and hands the values back to the sink layer for persisting.
#[derive(Debug, Clone, Default)]
pub struct FolderStateStore {
    inner: Arc<Mutex<HashMap<String, FolderSyncState>>>,
}

impl FolderStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, FolderSyncState>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The state for a folder, default when never synced.
    #[must_use]
    pub fn get(&self, folder: &str) -> FolderSyncState {
        self.lock().get(folder).copied().unwrap_or_default()
    }

    /// Stores the state for a folder.
    pub fn put(&self, folder: &str, state: FolderSyncState) {
        self.lock().insert(folder.to_string(), state);
    }
}

/// Whether a URL may run on this connection right now.
#[must_use]
pub fn can_run_url<S>(conn: &Connection<S>, url: &ImapUrl, busy: bool) -> bool {
    if busy {
        return false;
    }
    if !url.host.eq_ignore_ascii_case(&conn.config.host) {
        return false;
    }
    if !conn.config.username.is_empty()
        && !url.username.is_empty()
        && url.username != conn.config.username
    {
        return false;
    }
    true
}

/// Whether this connection is the preferred home for the URL: already
/// sitting in the mailbox the URL needs.
#[must_use]
pub fn is_preferred_for<S>(conn: &Connection<S>, url: &ImapUrl) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match (&url.folder, conn.selected_folder()) {
        (Some(want), Some(have)) => want == have,
        (None, _) => conn.state() != ConnectionState::NotAuthenticated,
        _ => false,
    }
}

/// Runs one URL to completion on the connection.
///
/// Exactly one `on_start_request` and one `on_stop_request` are
/// delivered, in that order, regardless of outcome. Returns the stop
/// status it delivered.
#[allow(clippy::too_many_arguments)]
pub async fn run_url<S>(
    conn: &mut Connection<S>,
    url: &ImapUrl,
    sinks: &SinkBundle,
    registry: &HostRegistry,
    store: &FolderStateStore,
    cache: &dyn MessageCache,
    clock: &dyn Clock,
) -> UrlStatus
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sinks.listener.on_start_request(url);

    let status = match run_url_inner(conn, url, sinks, registry, store, cache, clock).await {
        Ok(()) => UrlStatus::Ok,
        Err(e) => {
            let status = UrlStatus::from_error(&e);
            warn!(url = %url, error = %e, "url failed");

            // A single retry is allowed on connection drops, except for
            // online move/copy read-timeouts, which are not safely
            // retriable.
            let unsafe_retry = matches!(
                url.action,
                UrlAction::OnlineMove | UrlAction::OnlineCopy
            ) && matches!(e, Error::Timeout(_));
            if e.is_retriable_drop() && !url.rerunning && !unsafe_retry {
                let mut retry = url.clone();
                retry.rerunning = true;
                sinks.server.retry_url(&retry);
            }
            status
        }
    };

    // Per-URL state is released before the stop notification so the
    // next URL sees a clean connection.
    conn.clear_interrupt();
    sinks.listener.on_stop_request(url, status);
    sinks.server.load_next_queued_url();
    status
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
async fn run_url_inner<S>(
    conn: &mut Connection<S>,
    url: &ImapUrl,
    sinks: &SinkBundle,
    registry: &HostRegistry,
    store: &FolderStateStore,
    cache: &dyn MessageCache,
    clock: &dyn Clock,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if (sinks.server.server_shutting_down() || conn.death_signaled())
        && !url.action.allowed_during_shutdown()
    {
        return Err(Error::Shutdown);
    }

    if try_run_locally(url, sinks)? {
        return Ok(());
    }

    conn.clear_interrupt();
    let move_copy_count = match url.action {
        UrlAction::OnlineCopy | UrlAction::OnlineMove => {
            u32::try_from(url.id_set().map_or(0, |s| s.len())).unwrap_or(u32::MAX)
        }
        _ => 0,
    };
    let append = matches!(
        url.action,
        UrlAction::AppendMsgFromFile | UrlAction::AppendDraftFromFile
    );
    conn.set_io_timeout(conn.config.io_timeout(append, move_copy_count));

    let server_key = format!("{}:{}", conn.config.host, conn.config.port);
    let folder = url.folder.clone().unwrap_or_default();
    let mut persist = store.get(&folder);
    let result = dispatch(
        conn,
        url,
        sinks,
        registry,
        cache,
        clock,
        &server_key,
        &folder,
        &mut persist,
    )
    .await;
    if !folder.is_empty() {
        store.put(&folder, persist);
    }
    result
}

/// Serves the URL from local stores when possible. Returns true when the
/// URL is fully satisfied without the connection.
fn try_run_locally(url: &ImapUrl, sinks: &SinkBundle) -> Result<bool> {
    if !url.action.is_message_fetch() {
        return Ok(false);
    }
    let Some(set) = url.id_set() else {
        return Ok(false);
    };
    if set.len() != 1 {
        return Ok(false);
    }
    let uid = set.iter().next().unwrap_or(0);

    let offline = sinks.message.is_message_offline(uid);
    if url.store_results_offline && offline {
        // Offline-download URL for a message that is already offline:
        // nothing to do, the start/stop pair is the whole story.
        return Ok(true);
    }
    if offline && url.action == UrlAction::Fetch {
        if let Some(data) = sinks.message.offline_message(uid) {
            if crate::cache::looks_like_rfc822(&data) {
                deliver_local(url, sinks, uid, &data);
                return Ok(true);
            }
            // Offline copy does not parse as a message; discard it and
            // fall through to the network.
            sinks.message.abort_msg_write_stream();
            return Ok(false);
        }
    }
    if url.local_fetch_only && !offline {
        return Err(Error::NotOffline);
    }
    Ok(false)
}

fn deliver_local(url: &ImapUrl, sinks: &SinkBundle, uid: u32, data: &[u8]) {
    sinks.message.setup_msg_write_stream(false);
    sinks.listener.on_data_available(data);
    let mut rest = data;
    while !rest.is_empty() {
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .map_or(rest.len(), |i| i + 1);
        sinks.message.parse_adopted_msg_line(&rest[..end], uid, url);
        rest = &rest[end..];
    }
    sinks.message.normal_end_msg_write_stream(
        uid,
        true,
        url,
        u32::try_from(data.len()).unwrap_or(u32::MAX),
    );
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
async fn dispatch<S>(
    conn: &mut Connection<S>,
    url: &ImapUrl,
    sinks: &SinkBundle,
    registry: &HostRegistry,
    cache: &dyn MessageCache,
    clock: &dyn Clock,
    server_key: &str,
    folder: &str,
    persist: &mut FolderSyncState,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match url.action {
        UrlAction::Fetch | UrlAction::PreviewBody | UrlAction::CustomFetch => {
            fetch_dispatch(conn, url, sinks, cache, clock, folder, persist).await
        }

        UrlAction::Header => {
            let set = require_ids(url)?;
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;
            sel_ops::fetch_headers(conn, sinks, url, &set, clock).await
        }

        UrlAction::DeleteMsg => {
            let set = require_ids(url)?;
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;
            let flags = Flags::from_vec(vec![Flag::Deleted]);
            sel_ops::store_flags(conn, sinks, &set, &StoreAction::AddFlags(flags), true).await?;
            if conn.config.expunge_after_delete
                && conn.config.delete_model != DeleteModel::MarkDeleted
            {
                sel_ops::uid_expunge(conn, sinks, &set).await?;
            }
            sinks.message.notify_message_deleted(folder, false, Some(&set));
            Ok(())
        }

        UrlAction::UidExpunge => {
            let set = require_ids(url)?;
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;
            sel_ops::uid_expunge(conn, sinks, &set).await
        }

        UrlAction::DeleteAllMsgs => {
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;
            let all = SequenceSet::All;
            conn.run_command(
                &Command::Store {
                    set: all,
                    action: StoreAction::AddFlags(Flags::from_vec(vec![Flag::Deleted])),
                    silent: true,
                    uid: false,
                },
                sinks,
            )
            .await?
            .ok()?;
            sel_ops::expunge_folder(conn, sinks).await?;
            sinks.message.notify_message_deleted(folder, true, None);
            Ok(())
        }

        UrlAction::AddMsgFlags | UrlAction::SubtractMsgFlags | UrlAction::SetMsgFlags => {
            let set = require_ids(url)?;
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;

            let flags = sel_ops::flags_from_bits(url.msg_flags);
            let adding_deleted =
                url.action == UrlAction::AddMsgFlags && flags.contains(&Flag::Deleted);
            if sel_ops::gmail_trash_case_applies(
                conn.quirks.is_gmail,
                adding_deleted,
                conn.config.expunge_after_delete,
                registry.trash_discovered(server_key),
            ) {
                let trash = conn.config.trash_folder_path.clone();
                return sel_ops::gmail_trash_delete(conn, sinks, &set, &trash, folder, persist)
                    .await;
            }

            let action = match url.action {
                UrlAction::AddMsgFlags => StoreAction::AddFlags(flags),
                UrlAction::SubtractMsgFlags => StoreAction::RemoveFlags(flags),
                _ => StoreAction::SetFlags(flags),
            };
            let extra = sel_ops::store_flags(conn, sinks, &set, &action, true).await?;
            if extra == UrlExtraStatus::FlagsNotSettable {
                debug!("some flags were not settable and were dropped");
            }
            if url.action == UrlAction::AddMsgFlags
                && conn.config.expunge_after_delete
                && conn.config.delete_model != DeleteModel::MarkDeleted
                && url.msg_flags & sel_ops::flag_bits::DELETED != 0
            {
                sel_ops::uid_expunge(conn, sinks, &set).await?;
            }
            Ok(())
        }

        UrlAction::StoreCustomKeywords => {
            let set = require_ids(url)?;
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;
            if let Some(add) = &url.custom_add_keywords {
                let flags = Flags::from_vec(
                    add.split(' ').map(|k| Flag::Keyword(k.to_string())).collect(),
                );
                sel_ops::store_flags(conn, sinks, &set, &StoreAction::AddFlags(flags), true)
                    .await?;
            }
            if let Some(sub) = &url.custom_subtract_keywords {
                let flags = Flags::from_vec(
                    sub.split(' ').map(|k| Flag::Keyword(k.to_string())).collect(),
                );
                sel_ops::store_flags(conn, sinks, &set, &StoreAction::RemoveFlags(flags), true)
                    .await?;
            }
            Ok(())
        }

        UrlAction::OnlineCopy | UrlAction::OnlineMove => {
            let set = require_ids(url)?;
            let dest = require_dest(url)?;
            let is_move = url.action == UrlAction::OnlineMove;
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;
            let result = sel_ops::online_copy_move(conn, sinks, &set, &dest, is_move).await;
            if let Err(e) = &result
                && sel_ops::is_try_create(e)
            {
                // The destination does not exist but the server invites
                // us to create it.
                auth_ops::create_folder(conn, sinks, &dest, true).await?;
                return sel_ops::online_copy_move(conn, sinks, &set, &dest, is_move).await;
            }
            result
        }

        UrlAction::OnlineToOfflineCopy | UrlAction::OnlineToOfflineMove => {
            let set = require_ids(url)?;
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;
            for uid in set.iter() {
                if conn.interrupted() || conn.death_signaled() {
                    return Err(Error::Shutdown);
                }
                let size = sinks.message.message_size_from_db(uid).unwrap_or(0);
                let outcome = sel_ops::fetch_message_body(
                    conn, sinks, url, uid, size, true, None, clock,
                )
                .await?;
                if outcome == sel_ops::BodyFetchOutcome::Aborted {
                    return Err(Error::Shutdown);
                }
            }
            if url.action == UrlAction::OnlineToOfflineMove {
                let flags = Flags::from_vec(vec![Flag::Deleted, Flag::Seen]);
                sel_ops::store_flags(conn, sinks, &set, &StoreAction::AddFlags(flags), true)
                    .await?;
                if conn.config.delete_model != DeleteModel::MarkDeleted {
                    sel_ops::uid_expunge(conn, sinks, &set).await?;
                }
            }
            Ok(())
        }

        UrlAction::OfflineToOnlineCopy => {
            let dest = require_dest(url)?;
            let Some(set) = url.id_set() else {
                return Ok(());
            };
            for uid in set.iter() {
                let Some(message) = sinks.message.offline_message(uid) else {
                    continue;
                };
                let flags = sinks.message.cur_move_copy_message_flags(url);
                auth_ops::append_message(
                    conn,
                    sinks,
                    &dest,
                    Some(flags),
                    message,
                    None,
                    false,
                )
                .await?;
            }
            Ok(())
        }

        UrlAction::Search => {
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;
            let criteria = url.search_criteria.clone().unwrap_or_default();
            sel_ops::search(conn, sinks, url, &criteria, url.ids_are_uids).await?;
            Ok(())
        }

        UrlAction::Select => {
            sel_ops::select_mailbox(conn, sinks, folder, false, persist).await
        }
        UrlAction::LiteSelect => {
            sel_ops::select_mailbox(conn, sinks, folder, true, persist).await
        }
        UrlAction::SelectNoop => {
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;
            sel_ops::noop_or_check(conn, sinks).await?;
            sel_ops::update_mailbox(conn, sinks, persist).await
        }

        UrlAction::Expunge => {
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;
            sel_ops::expunge_folder(conn, sinks).await
        }

        UrlAction::Create => auth_ops::create_folder(conn, sinks, folder, true).await,
        UrlAction::EnsureExists => auth_ops::ensure_folder_exists(conn, sinks, folder).await,

        UrlAction::DiscoverChildren => {
            let delimiter = sinks.folder.get_online_delimiter().unwrap_or('/');
            let pattern = format!(
                "{}{}%",
                crate::url::online_from_canonical(folder, delimiter),
                delimiter
            );
            let entries = auth_ops::list_pattern(conn, sinks, &pattern, false).await?;
            for entry in &entries {
                sinks.server.possible_mailbox(entry);
            }
            Ok(())
        }

        UrlAction::DiscoverAllBoxes => {
            discover_folders(conn, sinks, registry, server_key, DiscoveryKind::AllBoxes).await
        }
        UrlAction::DiscoverAllAndSubscribedBoxes => {
            discover_folders(
                conn,
                sinks,
                registry,
                server_key,
                DiscoveryKind::AllAndSubscribed,
            )
            .await
        }

        UrlAction::DeleteFolder | UrlAction::DeleteFolderAndMsgs => {
            auth_ops::delete_folder(conn, sinks, folder).await
        }

        UrlAction::Rename => {
            let dest = require_dest(url)?;
            auth_ops::rename_folder(conn, sinks, folder, &dest).await
        }
        UrlAction::MoveFolderHierarchy => {
            // A missing destination promotes the folder to the root.
            let dest = url.dest_folder.clone().unwrap_or_else(|| {
                folder.rsplit('/').next().unwrap_or(folder).to_string()
            });
            auth_ops::move_folder_hierarchy(conn, sinks, folder, &dest).await
        }

        UrlAction::List => {
            let pattern = url.dest_folder.clone().unwrap_or_else(|| "*".to_string());
            let entries = auth_ops::list_pattern(conn, sinks, &pattern, false).await?;
            for entry in &entries {
                sinks.server.possible_mailbox(entry);
            }
            Ok(())
        }
        UrlAction::ListFolder => {
            auth_ops::list_one(conn, sinks, folder).await?;
            Ok(())
        }

        UrlAction::Biff => {
            let known_uid = url.id_set().and_then(|s| s.highest()).unwrap_or(0);
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;
            let uid_next = conn
                .selected
                .as_ref()
                .and_then(|s| s.uid_next)
                .map_or(0, crate::types::Uid::get);
            let state = if uid_next > known_uid.saturating_add(1) {
                BiffState::NewMail
            } else {
                BiffState::NoMail
            };
            sinks.folder.set_biff_state(state);
            Ok(())
        }

        UrlAction::Netscape | UrlAction::RefreshFolderUrls => {
            let _ = conn.run_command(&Command::XServerInfo, sinks).await?;
            Ok(())
        }

        UrlAction::AppendMsgFromFile | UrlAction::AppendDraftFromFile => {
            let message = sinks
                .message
                .append_message_source(url)
                .ok_or_else(|| Error::Protocol("no message source for append".to_string()))?;
            let message_id = extract_message_id(&message);
            auth_ops::append_message(
                conn,
                sinks,
                folder,
                None,
                message,
                message_id.as_deref(),
                url.action == UrlAction::AppendDraftFromFile,
            )
            .await?;
            Ok(())
        }

        UrlAction::Subscribe => auth_ops::set_subscription(conn, sinks, folder, true).await,
        UrlAction::Unsubscribe => auth_ops::set_subscription(conn, sinks, folder, false).await,

        UrlAction::RefreshAcl => {
            auth_ops::refresh_acl(conn, sinks, folder).await?;
            auth_ops::refresh_quota(conn, sinks, folder).await
        }
        UrlAction::RefreshAllAcls => {
            let entries = auth_ops::list_pattern(conn, sinks, "*", false).await?;
            for entry in entries {
                let delimiter = entry.delimiter.unwrap_or('/');
                let canonical = crate::url::canonical_from_online(&entry.name, delimiter);
                auth_ops::refresh_acl(conn, sinks, &canonical).await?;
            }
            Ok(())
        }

        UrlAction::UpgradeToSubscription => {
            let entries = auth_ops::list_pattern(conn, sinks, "*", false).await?;
            for entry in entries {
                let delimiter = entry.delimiter.unwrap_or('/');
                let canonical = crate::url::canonical_from_online(&entry.name, delimiter);
                auth_ops::set_subscription(conn, sinks, &canonical, true).await?;
            }
            Ok(())
        }

        UrlAction::FolderStatus => sel_ops::folder_status(conn, sinks, folder).await,

        UrlAction::VerifyLogon => auth_ops::verify_logon(conn, sinks).await,

        UrlAction::MsgCommand => {
            let set = require_ids(url)?;
            sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;
            let command = url
                .custom_command
                .clone()
                .ok_or_else(|| Error::UrlSyntax("missing custom command".to_string()))?;
            let text = format!("UID {command} {set}");
            conn.run_command(&Command::Custom { text }, sinks)
                .await?
                .ok()?;
            Ok(())
        }
    }
}

/// Message fetch with the cache path: offline store, entry cache, or
/// network with an optional tee.
async fn fetch_dispatch<S>(
    conn: &mut Connection<S>,
    url: &ImapUrl,
    sinks: &SinkBundle,
    cache: &dyn MessageCache,
    clock: &dyn Clock,
    folder: &str,
    persist: &mut FolderSyncState,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let set = require_ids(url)?;
    sel_ops::ensure_selected(conn, sinks, folder, false, persist).await?;

    if url.action == UrlAction::CustomFetch {
        let attr = url
            .custom_attribute
            .clone()
            .ok_or_else(|| Error::UrlSyntax("missing fetch attribute".to_string()))?;
        conn.run_command(
            &Command::Fetch {
                set: SequenceSet::from_uid_set(&set),
                attrs: vec![FetchAttribute::Uid, FetchAttribute::Custom(attr)],
                uid: url.ids_are_uids,
                changed_since: None,
            },
            sinks,
        )
        .await?
        .ok()?;
        return Ok(());
    }

    let uid_validity = conn
        .selected
        .as_ref()
        .and_then(|s| s.uid_validity)
        .map_or(0, |v| v.get());

    for uid in set.iter() {
        if conn.interrupted() || conn.death_signaled() {
            return Err(Error::Shutdown);
        }

        if url.action == UrlAction::PreviewBody {
            let length = url.preview_bytes.unwrap_or(2048);
            conn.run_command(
                &Command::Fetch {
                    set: SequenceSet::single(uid)
                        .ok_or_else(|| Error::Protocol("UID 0".to_string()))?,
                    attrs: vec![
                        FetchAttribute::Uid,
                        FetchAttribute::body_chunk(true, 0, length),
                    ],
                    uid: true,
                    changed_since: None,
                },
                sinks,
            )
            .await?
            .ok()?;
            continue;
        }

        let size = sinks.message.message_size_from_db(uid).unwrap_or(0);
        // Part-display URLs share the whole-message entry: the key
        // strips part and filename parameters.
        let key = url.cache_key(uid_validity);
        // Another caller may be writing this entry right now. Reads are
        // never served from a half-written entry and never duplicate the
        // in-flight fetch: wait for that writer to commit or doom, then
        // decide from the settled answer.
        let Some(lookup) = settle_lookup(cache, &key, || {
            conn.interrupted() || conn.death_signaled()
        })
        .await
        else {
            return Err(Error::Shutdown);
        };
        let had_hit = matches!(lookup, CacheLookup::Hit(_));
        let path = plan_fetch_path(
            sinks.message.is_message_offline(uid),
            lookup,
            size,
            conn.config.cache_entry_ceiling,
        );

        match path {
            FetchPath::Offline => {
                if let Some(data) = sinks.message.offline_message(uid) {
                    deliver_local(url, sinks, uid, &data);
                }
            }
            FetchPath::CacheHit(data) => {
                deliver_local(url, sinks, uid, &data);
            }
            FetchPath::Network { tee } => {
                if had_hit {
                    // The sniff rejected the entry; it must never hit
                    // again.
                    cache.doom(&key);
                }
                let writer = if tee { cache.open_writer(&key) } else { None };
                let peek = url.external_link;
                let outcome = sel_ops::fetch_message_body(
                    conn, sinks, url, uid, size, peek, writer, clock,
                )
                .await?;
                if outcome == sel_ops::BodyFetchOutcome::Aborted {
                    return Err(Error::Io(std::io::Error::from(
                        std::io::ErrorKind::Interrupted,
                    )));
                }
            }
        }
    }
    Ok(())
}

fn require_ids(url: &ImapUrl) -> Result<UidSet> {
    url.id_set()
        .ok_or_else(|| Error::UrlSyntax(format!("missing message ids in {url}")))
}

fn require_dest(url: &ImapUrl) -> Result<String> {
    url.dest_folder
        .clone()
        .ok_or_else(|| Error::UrlSyntax(format!("missing destination in {url}")))
}

/// Scans message headers for the Message-ID value.
fn extract_message_id(message: &[u8]) -> Option<String> {
    let head_end = message
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(message.len());
    let head = String::from_utf8_lossy(&message[..head_end]);
    for line in head.lines() {
        if let Some(value) = line
            .strip_prefix("Message-ID:")
            .or_else(|| line.strip_prefix("Message-Id:"))
        {
            return Some(value.trim().to_string());
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn folder_state_store_roundtrip() {
        let store = FolderStateStore::new();
        assert_eq!(store.get("INBOX"), FolderSyncState::default());

        let state = FolderSyncState {
            highest_mod_seq: 5000,
            highest_uid: 100,
            total_messages: 100,
            uid_validity: 7,
            num_deleted: 0,
        };
        store.put("INBOX", state);
        assert_eq!(store.get("INBOX"), state);
        assert_eq!(store.get("Sent"), FolderSyncState::default());
    }

    #[test]
    fn message_id_extraction() {
        let msg = b"From: a@b\r\nMessage-ID: <x123@host>\r\n\r\nbody";
        assert_eq!(extract_message_id(msg).as_deref(), Some("<x123@host>"));

        let msg = b"From: a@b\r\n\r\nno id";
        assert_eq!(extract_message_id(msg), None);
    }

    #[test]
    fn url_matching() {
        use crate::config::EngineConfig;
        use std::sync::Arc;

        let mut config = EngineConfig::new("mail.example.com");
        config.username = "user".to_string();
        let conn: Connection<tokio_test::io::Mock> = Connection::from_stream(
            tokio_test::io::Builder::new().build(),
            Arc::new(config),
        );

        let url = ImapUrl::parse("imap://user@mail.example.com/select>/INBOX").unwrap();
        assert!(can_run_url(&conn, &url, false));
        assert!(!can_run_url(&conn, &url, true));

        let other = ImapUrl::parse("imap://user@other.example.com/select>/INBOX").unwrap();
        assert!(!can_run_url(&conn, &other, false));

        let wrong_user = ImapUrl::parse("imap://bob@mail.example.com/select>/INBOX").unwrap();
        assert!(!can_run_url(&conn, &wrong_user, false));
    }
}
