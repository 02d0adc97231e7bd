//! Folder discovery.
//!
//! One pass per session, gated through the host registry: walk the
//! namespaces, learn special-folder roles (XLIST or SPECIAL-USE), merge
//! LIST and LSUB views, make sure a Trash exists under the trash delete
//! model, and kick off ACL refreshes for new folders.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::command::Command;
use crate::config::DeleteModel;
use crate::connection::Connection;
use crate::host::HostRegistry;
use crate::ops::authenticated::{collect_list_entries, create_folder, refresh_acl};
use crate::sink::SinkBundle;
use crate::types::{BoxFlags, Capability, ListEntry, Namespace};
use crate::url::canonical_from_online;
use crate::Result;

/// Which discovery URL triggered the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryKind {
    /// `discoverallboxes`
    AllBoxes,
    /// `discoverallandsubscribedboxes`
    AllAndSubscribed,
    /// `discoverchildren` of one folder.
    Children,
}

/// Runs folder discovery for the session. Subsequent calls are no-ops
/// until the registry forgets the host.
pub async fn discover_folders<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    registry: &HostRegistry,
    server_key: &str,
    kind: DiscoveryKind,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if kind != DiscoveryKind::Children && !registry.begin_discovery(server_key) {
        debug!("discovery already done or in progress for this host");
        return Ok(());
    }

    let result = discover_inner(conn, sinks, registry, server_key, kind).await;

    if kind != DiscoveryKind::Children {
        registry.finish_discovery(server_key);
        sinks.server.discovery_done();
    }
    result
}

async fn discover_inner<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    registry: &HostRegistry,
    server_key: &str,
    kind: DiscoveryKind,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let namespaces = registry.namespaces(server_key);
    let use_subscriptions =
        conn.config.use_subscriptions && kind != DiscoveryKind::AllAndSubscribed;
    let mut special: HashMap<String, BoxFlags> = HashMap::new();
    let mut trash_seen = registry.trash_discovered(server_key);

    for ns in &namespaces {
        if conn.config.hide_other_users
            && ns.kind == crate::types::NamespaceKind::OtherUsers
        {
            continue;
        }
        let delimiter = ns.delimiter.unwrap_or('/');

        // Expose the namespace prefix itself as a no-select container
        // unless the preference hides unused namespaces.
        if !conn.config.hide_unused_namespaces && !ns.prefix.is_empty() {
            let name = ns.prefix.trim_end_matches(delimiter).to_string();
            let mut flags = BoxFlags::NOSELECT;
            flags.insert(BoxFlags::HAS_CHILDREN);
            flags.insert(ns.box_flag());
            sinks.server.possible_mailbox(&ListEntry {
                name,
                delimiter: Some(delimiter),
                flags,
                from_lsub: false,
            });
        }

        // XLIST teaches us special-folder roles the plain LIST may not.
        if use_subscriptions && conn.caps.has(&Capability::Xlist) {
            for pattern in [
                format!("{}%", ns.prefix),
                format!("{}%{}%", ns.prefix, delimiter),
            ] {
                let outcome = conn
                    .run_command(
                        &Command::Xlist {
                            reference: String::new(),
                            pattern,
                        },
                        sinks,
                    )
                    .await?;
                for entry in collect_list_entries(&outcome.untagged) {
                    special
                        .entry(entry.name.clone())
                        .or_insert(BoxFlags::default())
                        .insert(entry.flags);
                }
            }
        }

        let pattern = format!("{}*", ns.prefix);
        let shallow = format!("{}%", ns.prefix);

        let entries = if use_subscriptions {
            let list_subscribed_safe = conn.caps.has(&Capability::ListExtended)
                && !conn.quirks.list_subscribed_unsafe
                && !sinks.server.list_subscribed_unsafe();
            if list_subscribed_safe {
                let outcome = conn
                    .run_command(
                        &Command::List {
                            reference: String::new(),
                            pattern,
                            subscribed: true,
                            return_special_use: conn.caps.has(&Capability::SpecialUse),
                        },
                        sinks,
                    )
                    .await?
                    .ok()?;
                collect_list_entries(&outcome.untagged)
            } else {
                // LIST first for flags, then LSUB for the subscription
                // view; merge the flag bits across.
                let listed = conn
                    .run_command(
                        &Command::List {
                            reference: String::new(),
                            pattern: pattern.clone(),
                            subscribed: false,
                            return_special_use: false,
                        },
                        sinks,
                    )
                    .await?
                    .ok()?;
                let mut flags_by_name: HashMap<String, BoxFlags> = HashMap::new();
                for entry in collect_list_entries(&listed.untagged) {
                    flags_by_name.insert(entry.name.clone(), entry.flags);
                }

                let subscribed = conn
                    .run_command(
                        &Command::Lsub {
                            reference: String::new(),
                            pattern,
                        },
                        sinks,
                    )
                    .await?
                    .ok()?;
                collect_list_entries(&subscribed.untagged)
                    .into_iter()
                    .map(|mut entry| {
                        if let Some(flags) = flags_by_name.get(&entry.name) {
                            entry.flags.insert(*flags);
                        }
                        entry
                    })
                    .collect()
            }
        } else {
            // Without subscriptions only the first level is listed here;
            // the discovery-done callback recursively lists children.
            let outcome = conn
                .run_command(
                    &Command::List {
                        reference: String::new(),
                        pattern: shallow,
                        subscribed: false,
                        return_special_use: false,
                    },
                    sinks,
                )
                .await?
                .ok()?;
            collect_list_entries(&outcome.untagged)
        };

        for mut entry in entries {
            if let Some(flags) = special.get(&entry.name) {
                entry.flags.insert(*flags);
            }
            entry.flags.insert(ns.box_flag());
            if entry.flags.contains(BoxFlags::TRASH) {
                trash_seen = true;
            }
            report_mailbox(conn, sinks, entry, delimiter).await?;
        }
    }

    if conn.config.always_list_inbox {
        let outcome = conn
            .run_command(
                &Command::List {
                    reference: String::new(),
                    pattern: "INBOX".to_string(),
                    subscribed: false,
                    return_special_use: false,
                },
                sinks,
            )
            .await?;
        for mut entry in collect_list_entries(&outcome.untagged) {
            entry.flags.insert(BoxFlags::INBOX);
            let delimiter = entry.delimiter.unwrap_or('/');
            report_mailbox(conn, sinks, entry, delimiter).await?;
        }
    }

    if !trash_seen && conn.config.delete_model == DeleteModel::MoveToTrash {
        trash_seen = ensure_trash(conn, sinks, &namespaces).await?;
    }
    if trash_seen {
        registry.set_trash_discovered(server_key);
    }

    Ok(())
}

/// Hands one mailbox to the server sink and, when it is new and the
/// server does ACLs, refreshes its rights.
async fn report_mailbox<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    entry: ListEntry,
    delimiter: char,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let delimiter = entry.delimiter.unwrap_or(delimiter);
    let canonical = canonical_from_online(&entry.name, delimiter);
    let is_new = sinks.server.possible_mailbox(&entry);
    if is_new && conn.caps.has(&Capability::Acl) {
        refresh_acl(conn, sinks, &canonical).await?;
    }
    Ok(())
}

/// LISTs the configured trash path, creating it when absent.
async fn ensure_trash<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    namespaces: &[Namespace],
) -> Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let trash = conn.config.trash_folder_path.clone();
    let delimiter = namespaces
        .first()
        .and_then(|ns| ns.delimiter)
        .unwrap_or('/');

    let listed = conn
        .run_command(
            &Command::List {
                reference: String::new(),
                pattern: crate::url::online_from_canonical(&trash, delimiter),
                subscribed: false,
                return_special_use: false,
            },
            sinks,
        )
        .await?;
    if !collect_list_entries(&listed.untagged).is_empty() {
        info!(folder = %trash, "trash folder present");
        return Ok(true);
    }

    create_folder(conn, sinks, &trash, true).await?;
    let relisted = conn
        .run_command(
            &Command::List {
                reference: String::new(),
                pattern: crate::url::online_from_canonical(&trash, delimiter),
                subscribed: false,
                return_special_use: false,
            },
            sinks,
        )
        .await?;
    Ok(!collect_list_entries(&relisted.untagged).is_empty())
}
