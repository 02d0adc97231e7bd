//! IDLE between URLs (RFC 2177).
//!
//! The worker enters IDLE when the user opted in, nothing is running,
//! the server advertises IDLE, and a mailbox is selected. Any untagged
//! activity wakes the worker so it can synthesize a folder-update URL.
//! The enter/wait/finish split lets the worker race the wait against
//! its URL queue and still send DONE before running the next URL.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::parser::{Response, ResponseParser, UntaggedResponse};
use crate::sink::SinkBundle;
use crate::types::{Capability, Status, Tag};
use crate::{Error, Result};

use super::{Connection, ConnectionState};

/// Why the IDLE period ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The server reported mailbox activity; a folder update is due.
    NewActivity,
    /// Nothing happened within the wait window.
    Timeout,
    /// IDLE is unusable (capability missing, wrong state, or the server
    /// rejected the command and it is now disabled for the session).
    Disabled,
}

/// Sends IDLE and consumes the continuation. Returns the tag to finish
/// with, or `None` when IDLE cannot (or must not) be used.
pub(crate) async fn enter_idle<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
) -> Result<Option<Tag>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if conn.idle_disabled
        || !conn.config.use_idle
        || conn.state != ConnectionState::Selected
        || !conn.caps.has(&Capability::Idle)
    {
        return Ok(None);
    }

    let tag = conn.tags.next();
    debug!(tag = tag.as_str(), "C: IDLE");
    conn.framed
        .write_line(format!("{tag} IDLE").as_bytes())
        .await?;

    loop {
        let raw = conn.read_one().await?;
        match ResponseParser::parse(&raw)? {
            Response::Continuation { .. } => return Ok(Some(tag)),
            Response::Tagged { tag: t, status, .. } if t == tag => {
                if matches!(status, Status::No | Status::Bad) {
                    // Some servers advertise IDLE and then refuse it.
                    warn!("server refused IDLE; disabling for this session");
                    conn.idle_disabled = true;
                }
                return Ok(None);
            }
            Response::Tagged { .. } | Response::Ignored => {}
            Response::Untagged(u) => {
                let _ = conn.apply_untagged(u, sinks)?;
            }
        }
    }
}

/// Blocks until the server reports mailbox activity. Run under a
/// timeout or a select; partial reads stay buffered in the framed
/// stream when the future is dropped.
pub(crate) async fn wait_for_activity<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let raw = conn.framed.read_response().await?;
        match ResponseParser::parse(&raw)? {
            Response::Untagged(u) => {
                let activity = matches!(
                    u,
                    UntaggedResponse::Exists(_)
                        | UntaggedResponse::Recent(_)
                        | UntaggedResponse::Expunge(_)
                        | UntaggedResponse::Fetch(_)
                );
                let _ = conn.apply_untagged(u, sinks)?;
                if activity {
                    sinks.folder.on_new_idle_messages();
                    return Ok(());
                }
            }
            Response::Tagged { .. } | Response::Continuation { .. } | Response::Ignored => {}
        }
    }
}

/// Writes DONE and drains the tagged completion. On shutdown the drain
/// runs under a short timeout and the outcome is ignored.
pub(crate) async fn finish_idle<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    tag: &Tag,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.framed.write_line(b"DONE").await?;

    let drain_timeout = if conn.death_signaled() {
        Duration::from_secs(5)
    } else {
        conn.io_timeout
    };

    let drained = tokio::time::timeout(drain_timeout, async {
        loop {
            let raw = conn.framed.read_response().await?;
            match ResponseParser::parse(&raw)? {
                Response::Tagged { tag: t, status, .. } if &t == tag => {
                    return Ok::<Status, Error>(status);
                }
                Response::Tagged { .. } | Response::Continuation { .. } | Response::Ignored => {}
                Response::Untagged(u) => {
                    let _ = conn.apply_untagged(u, sinks)?;
                }
            }
        }
    })
    .await;

    match drained {
        Ok(Ok(Status::No | Status::Bad)) => {
            conn.idle_disabled = true;
            Ok(())
        }
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e),
        // Shutdown path: proceed regardless of the unanswered DONE.
        Err(_) if conn.death_signaled() => Ok(()),
        Err(_) => Err(Error::Timeout(drain_timeout)),
    }
}

/// Runs one complete IDLE period: enter, wait up to `wait`, DONE.
pub async fn idle_between_urls<S>(
    conn: &mut Connection<S>,
    sinks: &SinkBundle,
    wait: Duration,
) -> Result<IdleOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(tag) = enter_idle(conn, sinks).await? else {
        return Ok(IdleOutcome::Disabled);
    };

    let outcome = match tokio::time::timeout(wait, wait_for_activity(conn, sinks)).await {
        Ok(Ok(())) => IdleOutcome::NewActivity,
        Ok(Err(e)) => return Err(e),
        Err(_) => IdleOutcome::Timeout,
    };

    finish_idle(conn, sinks, &tag).await?;
    Ok(outcome)
}
