//! Authenticated-state operations: folder management, subscription
//! handling, LIST variants, APPEND, and ACL/quota refreshes.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::command::{Command, SearchCriteria};
use crate::connection::Connection;
use crate::parser::UntaggedResponse;
use crate::sink::{ProgressKey, SinkBundle};
use crate::types::{Capability, Flags, ListEntry, ResponseCode, Uid};
use crate::url::{canonical_from_online, wire_name};
use crate::{Error, Result};

/// CREATEs a folder, respecting the subscription model.
pub async fn create_folder<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    canonical: &str,
    subscribe: bool,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sinks
        .folder
        .progress_status(ProgressKey::CreatingMailbox, Some(canonical));

    let mailbox = wire_for(conn, sinks, canonical);
    let outcome = conn
        .run_command(&Command::Create { mailbox: mailbox.clone() }, sinks)
        .await?;
    if !outcome.is_ok() {
        sinks.server.online_folder_create_failed(canonical);
        return outcome.ok().map(|_| ());
    }

    if subscribe && conn.config.use_subscriptions {
        let _ = conn.run_command(&Command::Subscribe { mailbox }, sinks).await?;
    }

    // Pick up the delimiter and attributes the server assigned.
    let _ = list_one(conn, sinks, canonical).await?;
    Ok(())
}

/// DELETEs a folder, unsubscribing first under the subscription model.
pub async fn delete_folder<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    canonical: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sinks
        .folder
        .progress_status(ProgressKey::DeletingMailbox, Some(canonical));

    let mailbox = wire_for(conn, sinks, canonical);
    if conn.config.use_subscriptions {
        let _ = conn
            .run_command(&Command::Unsubscribe { mailbox: mailbox.clone() }, sinks)
            .await?;
    }
    conn.run_command(&Command::DeleteMailbox { mailbox }, sinks)
        .await?
        .ok()?;
    sinks.server.online_folder_delete(canonical);
    Ok(())
}

/// RENAMEs a folder and fixes up subscriptions on both names.
pub async fn rename_folder<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    from_canonical: &str,
    to_canonical: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sinks
        .folder
        .progress_status(ProgressKey::RenamingMailbox, Some(from_canonical));

    let from = wire_for(conn, sinks, from_canonical);
    let to = wire_for(conn, sinks, to_canonical);

    if conn.config.use_subscriptions {
        let _ = conn
            .run_command(&Command::Unsubscribe { mailbox: from.clone() }, sinks)
            .await?;
    }
    conn.run_command(&Command::Rename { from, to: to.clone() }, sinks)
        .await?
        .ok()?;
    if conn.config.use_subscriptions {
        let _ = conn.run_command(&Command::Subscribe { mailbox: to }, sinks).await?;
    }
    sinks.server.online_folder_rename(from_canonical, to_canonical);
    Ok(())
}

/// Renames a folder hierarchy by enumerating and renaming the children.
pub async fn move_folder_hierarchy<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    from_canonical: &str,
    to_canonical: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    rename_folder(conn, sinks, from_canonical, to_canonical).await?;

    // Children first: LIST the old subtree, then rename each entry by
    // splicing the new prefix on.
    let delimiter = delimiter_for(conn, sinks);
    let pattern = format!("{}{}*", wire_for(conn, sinks, from_canonical), delimiter);
    let children = list_pattern(conn, sinks, &pattern, false).await?;

    for child in children {
        let child_canonical = canonical_from_online(&child.name, delimiter);
        let Some(suffix) = child_canonical.strip_prefix(from_canonical) else {
            continue;
        };
        let new_canonical = format!("{to_canonical}{suffix}");
        rename_folder(conn, sinks, &child_canonical, &new_canonical).await?;
    }
    Ok(())
}

/// SUBSCRIBE / UNSUBSCRIBE.
pub async fn set_subscription<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    canonical: &str,
    subscribe: bool,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mailbox = wire_for(conn, sinks, canonical);
    let cmd = if subscribe {
        Command::Subscribe { mailbox }
    } else {
        Command::Unsubscribe { mailbox }
    };
    conn.run_command(&cmd, sinks).await?.ok()?;
    Ok(())
}

/// LISTs a pattern and returns the entries (LSUB when `lsub`).
pub async fn list_pattern<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    pattern: &str,
    lsub: bool,
) -> Result<Vec<ListEntry>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let cmd = if lsub {
        Command::Lsub {
            reference: String::new(),
            pattern: pattern.to_string(),
        }
    } else {
        Command::List {
            reference: String::new(),
            pattern: pattern.to_string(),
            subscribed: false,
            return_special_use: false,
        }
    };
    let outcome = conn.run_command(&cmd, sinks).await?.ok()?;
    Ok(collect_list_entries(&outcome.untagged))
}

/// LISTs one folder, reporting it to the server sink.
pub async fn list_one<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    canonical: &str,
) -> Result<Vec<ListEntry>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mailbox = wire_for(conn, sinks, canonical);
    let entries = list_pattern(conn, sinks, &mailbox, false).await?;
    for entry in &entries {
        sinks.server.possible_mailbox(entry);
    }
    Ok(entries)
}

/// Collects LIST/LSUB/XLIST entries from an untagged stream.
#[must_use]
pub fn collect_list_entries(untagged: &[UntaggedResponse]) -> Vec<ListEntry> {
    let mut out = Vec::new();
    for u in untagged {
        match u {
            UntaggedResponse::List(entry)
            | UntaggedResponse::Lsub(entry)
            | UntaggedResponse::Xlist(entry) => out.push(entry.clone()),
            _ => {}
        }
    }
    out
}

/// How an APPEND located the new message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendedUid {
    /// The server told us via APPENDUID.
    Known(Uid),
    /// Located afterwards by SEARCH on the Message-ID header.
    Found(Uid),
    /// Not determinable.
    Unknown,
}

/// APPENDs a message, reporting the new UID through the folder sink.
///
/// With UIDPLUS the APPENDUID code carries the UID; otherwise the draft
/// path falls back to `SEARCH UNDELETED HEADER Message-ID`. Concurrent
/// APPENDs to the same draft folder must stay on one connection; the
/// search fallback cannot tell two in-flight drafts apart.
pub async fn append_message<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    canonical: &str,
    flags: Option<Flags>,
    message: Vec<u8>,
    message_id: Option<&str>,
    is_draft: bool,
) -> Result<AppendedUid>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mailbox = wire_for(conn, sinks, canonical);
    let flags = flags.or_else(|| {
        is_draft.then(|| Flags::from_vec(vec![crate::types::Flag::Draft, crate::types::Flag::Seen]))
    });

    let outcome = conn
        .run_command(
            &Command::Append {
                mailbox,
                flags,
                message,
            },
            sinks,
        )
        .await?
        .ok()?;

    if let Some(ResponseCode::AppendUid { uid, .. }) = outcome.code {
        sinks.folder.set_append_msg_uid(uid);
        return Ok(AppendedUid::Known(uid));
    }

    // No UIDPLUS: for drafts the caller needs the UID, so locate the
    // message by its Message-ID.
    if let Some(message_id) = message_id {
        let mut scratch = crate::state::FolderSyncState::default();
        super::selected::select_mailbox(conn, sinks, canonical, true, &mut scratch).await?;
        let outcome = conn
            .run_command(
                &Command::Search {
                    criteria: SearchCriteria::And(vec![
                        SearchCriteria::Undeleted,
                        SearchCriteria::Header(
                            "Message-ID".to_string(),
                            message_id.to_string(),
                        ),
                    ]),
                    uid: true,
                },
                sinks,
            )
            .await?
            .ok()?;
        if let Some(&uid) = outcome.search_results().last()
            && let Some(uid) = Uid::new(uid)
        {
            sinks.folder.set_append_msg_uid(uid);
            return Ok(AppendedUid::Found(uid));
        }
    }

    debug!("APPEND completed without a determinable UID");
    Ok(AppendedUid::Unknown)
}

/// Refreshes one folder's ACL via GETACL + MYRIGHTS.
pub async fn refresh_acl<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    canonical: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !conn.caps.has(&Capability::Acl) {
        return Ok(());
    }
    let mailbox = wire_for(conn, sinks, canonical);

    sinks.folder.clear_folder_rights();
    let _ = conn
        .run_command(&Command::GetAcl { mailbox: mailbox.clone() }, sinks)
        .await?;
    let _ = conn.run_command(&Command::MyRights { mailbox }, sinks).await?;
    Ok(())
}

/// Fetches quota data for a folder and forwards it to the folder sink.
pub async fn refresh_quota<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    canonical: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !conn.caps.has(&Capability::Quota) {
        return Ok(());
    }
    let mailbox = wire_for(conn, sinks, canonical);
    let outcome = conn
        .run_command(&Command::GetQuotaRoot { mailbox }, sinks)
        .await?;
    for u in &outcome.untagged {
        if let UntaggedResponse::Quota { root, usage } = u {
            for (resource, used, max) in usage {
                if resource.eq_ignore_ascii_case("STORAGE") {
                    sinks.folder.set_folder_quota_data(root, *used, *max);
                }
            }
        }
    }
    Ok(())
}

/// CREATE-if-missing: LIST first, CREATE on absence.
pub async fn ensure_folder_exists<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    canonical: &str,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let entries = list_one(conn, sinks, canonical).await?;
    if entries.is_empty() {
        create_folder(conn, sinks, canonical, true).await?;
    } else {
        sinks.server.folder_verified_online(canonical);
    }
    Ok(())
}

/// The wire name for a canonical path, using the folder sink's known
/// delimiter when the URL did not carry one.
fn wire_for<S>(conn: &Connection<S>, sinks: &SinkBundle, canonical: &str) -> String {
    wire_name(canonical, delimiter_for(conn, sinks), conn.utf8_accept)
}

fn delimiter_for<S>(conn: &Connection<S>, sinks: &SinkBundle) -> char {
    sinks
        .folder
        .get_online_delimiter()
        .or_else(|| conn.selected.as_ref().and_then(|s| s.delimiter))
        .unwrap_or('/')
}

/// Verify-logon has nothing to do beyond the established session; a
/// NOOP confirms the connection is actually serviceable.
pub async fn verify_logon<S>(conn: &mut Connection<S>, sinks: &SinkBundle) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.run_command(&Command::Noop, sinks).await?.ok()?;
    Ok(())
}

/// Guard used by delete-folder URLs: refuse to delete a folder the
/// server reports as `\Noselect` with children, surfacing a protocol
/// failure instead of silently losing the subtree.
pub fn check_deletable(entry: Option<&ListEntry>) -> Result<()> {
    if let Some(entry) = entry {
        let flags = entry.flags;
        if flags.contains(crate::types::BoxFlags::NOSELECT)
            && flags.contains(crate::types::BoxFlags::HAS_CHILDREN)
        {
            return Err(Error::Protocol(
                "folder is \\Noselect with children".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::BoxFlags;

    #[test]
    fn collect_entries_from_mixed_stream() {
        let untagged = vec![
            UntaggedResponse::Exists(3),
            UntaggedResponse::List(ListEntry {
                name: "INBOX".to_string(),
                delimiter: Some('/'),
                flags: BoxFlags::default(),
                from_lsub: false,
            }),
            UntaggedResponse::Lsub(ListEntry {
                name: "Work".to_string(),
                delimiter: Some('/'),
                flags: BoxFlags::default(),
                from_lsub: true,
            }),
        ];
        let entries = collect_list_entries(&untagged);
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].from_lsub);
        assert!(entries[1].from_lsub);
    }

    #[test]
    fn deletable_guard() {
        let mut flags = BoxFlags::default();
        flags.insert(BoxFlags::NOSELECT);
        flags.insert(BoxFlags::HAS_CHILDREN);
        let entry = ListEntry {
            name: "Parent".to_string(),
            delimiter: Some('/'),
            flags,
            from_lsub: false,
        };
        assert!(check_deletable(Some(&entry)).is_err());
        assert!(check_deletable(None).is_ok());
    }
}
