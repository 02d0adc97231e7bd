//! Per-connection worker task and its lifecycle.
//!
//! Each live connection is owned by one long-lived task: it connects,
//! establishes the session, drains its URL queue one URL at a time, and
//! idles between URLs after a short quiet period that coalesces incoming
//! work. `tell_thread_to_die` is the only supported shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use crate::cache::MessageCache;
use crate::command::Command;
use crate::config::{DeleteModel, EngineConfig};
use crate::connection::{Connection, ConnectionState, ImapStream, establish_session};
use crate::host::HostRegistry;
use crate::runner::{FolderStateStore, run_url};
use crate::sink::{AlertKey, SinkBundle};
use crate::time::SystemClock;
use crate::url::ImapUrl;

/// Quiet period after a URL before IDLE is entered, coalescing bursts
/// of queued work.
const IDLE_COALESCE: Duration = Duration::from_secs(2);

/// Time allowed for LOGOUT on shutdown.
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a connection's worker task.
pub struct ImapWorker {
    queue: mpsc::UnboundedSender<ImapUrl>,
    death: Arc<AtomicBool>,
    interrupt: Arc<AtomicBool>,
    safe_close: Arc<AtomicBool>,
    wake: Arc<Notify>,
    handle: tokio::task::JoinHandle<()>,
}

impl ImapWorker {
    /// Spawns a worker that connects and services its URL queue.
    #[must_use]
    pub fn spawn(
        config: Arc<EngineConfig>,
        sinks: SinkBundle,
        registry: HostRegistry,
        store: FolderStateStore,
        cache: Arc<dyn MessageCache>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let death = Arc::new(AtomicBool::new(false));
        let interrupt = Arc::new(AtomicBool::new(false));
        let safe_close = Arc::new(AtomicBool::new(true));
        let wake = Arc::new(Notify::new());

        let handle = tokio::spawn(worker_main(
            rx,
            config,
            sinks,
            registry,
            store,
            cache,
            Arc::clone(&death),
            Arc::clone(&interrupt),
            Arc::clone(&safe_close),
            Arc::clone(&wake),
        ));

        Self {
            queue: tx,
            death,
            interrupt,
            safe_close,
            wake,
            handle,
        }
    }

    /// Hands a URL to the worker. Returns false once the worker is gone.
    pub fn enqueue(&self, url: ImapUrl) -> bool {
        let ok = self.queue.send(url).is_ok();
        self.wake.notify_one();
        ok
    }

    /// Requests a pseudo-interrupt of the in-progress body fetch.
    /// Idempotent; does not kill the worker.
    pub fn pseudo_interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    /// True once the worker task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Tells the worker to die and waits for it.
    ///
    /// With `safe_to_close` the worker attempts CLOSE (under the trash
    /// delete model) and LOGOUT with a short timeout; otherwise the
    /// socket is dropped on the floor.
    pub async fn tell_thread_to_die(self, safe_to_close: bool) {
        self.safe_close.store(safe_to_close, Ordering::SeqCst);
        self.death.store(true, Ordering::SeqCst);
        self.interrupt.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        drop(self.queue);
        let _ = self.handle.await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_main(
    mut rx: mpsc::UnboundedReceiver<ImapUrl>,
    config: Arc<EngineConfig>,
    sinks: SinkBundle,
    registry: HostRegistry,
    store: FolderStateStore,
    cache: Arc<dyn MessageCache>,
    death: Arc<AtomicBool>,
    interrupt: Arc<AtomicBool>,
    safe_close: Arc<AtomicBool>,
    wake: Arc<Notify>,
) {
    let clock = SystemClock;

    let mut conn = match Connection::connect(Arc::clone(&config)).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "connect failed");
            sinks.server.fe_alert(AlertKey::ServerDisconnected, None);
            sinks.server.abort_queued_urls();
            sinks.server.remove_server_connection();
            return;
        }
    };
    conn.attach_control(Arc::clone(&death), Arc::clone(&interrupt));

    if let Err(e) = establish_session(&mut conn, &sinks, &registry).await {
        warn!(error = %e, "session establishment failed");
        sinks.server.abort_queued_urls();
        sinks.server.remove_server_connection();
        return;
    }
    info!(host = %config.host, "IMAP session established");

    while !death.load(Ordering::SeqCst) {
        // Coalesce: give queued work a moment before entering IDLE.
        let url = match tokio::time::timeout(IDLE_COALESCE, rx.recv()).await {
            Ok(Some(url)) => Some(url),
            Ok(None) => break,
            Err(_) => match idle_and_wait(&mut conn, &sinks, &mut rx, &wake).await {
                IdleWake::Url(url) => Some(url),
                IdleWake::FolderUpdate => conn.selected_folder().map(|folder| {
                    ImapUrl::folder_update(&config.username, &config.host, config.port, folder)
                }),
                IdleWake::Nothing => None,
                IdleWake::QueueClosed => break,
                IdleWake::ConnectionLost => {
                    sinks.server.abort_queued_urls();
                    break;
                }
            },
        };

        let Some(url) = url else { continue };
        if death.load(Ordering::SeqCst) && !url.action.allowed_during_shutdown() {
            continue;
        }

        debug!(url = %url, "running url");
        let _ = run_url(
            &mut conn,
            &url,
            &sinks,
            &registry,
            &store,
            cache.as_ref(),
            &clock,
        )
        .await;
    }

    teardown(conn, &sinks, safe_close.load(Ordering::SeqCst)).await;
}

enum IdleWake {
    Url(ImapUrl),
    FolderUpdate,
    Nothing,
    QueueClosed,
    ConnectionLost,
}

/// Idles (or just parks on the queue when IDLE is unusable) until work
/// or activity arrives.
async fn idle_and_wait(
    conn: &mut Connection<ImapStream>,
    sinks: &SinkBundle,
    rx: &mut mpsc::UnboundedReceiver<ImapUrl>,
    wake: &Notify,
) -> IdleWake {
    let tag = match crate::connection::idle::enter_idle(conn, sinks).await {
        Ok(Some(tag)) => tag,
        Ok(None) => {
            // No IDLE: just wait for the queue (or a wake poke).
            return tokio::select! {
                url = rx.recv() => url.map_or(IdleWake::QueueClosed, IdleWake::Url),
                () = wake.notified() => IdleWake::Nothing,
            };
        }
        Err(_) => return IdleWake::ConnectionLost,
    };

    let idle_window = conn.quirks.idle_timeout();
    enum Raced {
        Url(Option<ImapUrl>),
        Activity(crate::Result<()>),
        Expired,
        Poked,
    }
    let raced = {
        let activity = tokio::time::timeout(
            idle_window,
            crate::connection::idle::wait_for_activity(conn, sinks),
        );
        tokio::pin!(activity);
        tokio::select! {
            url = rx.recv() => Raced::Url(url),
            () = wake.notified() => Raced::Poked,
            res = &mut activity => match res {
                Ok(r) => Raced::Activity(r),
                Err(_) => Raced::Expired,
            },
        }
    };

    if crate::connection::idle::finish_idle(conn, sinks, &tag)
        .await
        .is_err()
    {
        return IdleWake::ConnectionLost;
    }

    match raced {
        Raced::Url(Some(url)) => IdleWake::Url(url),
        Raced::Url(None) => IdleWake::QueueClosed,
        Raced::Activity(Ok(())) => IdleWake::FolderUpdate,
        Raced::Activity(Err(_)) => IdleWake::ConnectionLost,
        Raced::Expired | Raced::Poked => IdleWake::Nothing,
    }
}

/// Graceful or forced teardown, then per-connection state release.
async fn teardown(mut conn: Connection<ImapStream>, sinks: &SinkBundle, safe_to_close: bool) {
    if safe_to_close {
        conn.set_io_timeout(LOGOUT_TIMEOUT);
        if conn.state() == ConnectionState::Selected
            && conn.config.delete_model == DeleteModel::MoveToTrash
        {
            let _ = conn.run_command(&Command::Close, sinks).await;
        }
        let _ = conn.run_command(&Command::Logout, sinks).await;
    }

    if let Some((chunk_size, chunk_threshold)) = conn.tuner.take_dirty() {
        sinks
            .server
            .persist_chunk_tuning(chunk_size, chunk_threshold);
    }
    sinks.server.remove_server_connection();
    info!("worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn worker_dies_on_request() {
        // Connecting to a closed port fails fast; the worker must still
        // exit cleanly and release its queue.
        let mut config = EngineConfig::new("127.0.0.1");
        config.port = 1; // nothing listens here
        config.security = crate::config::Security::Plain;
        config.response_timeout = Duration::from_millis(200);

        let worker = ImapWorker::spawn(
            Arc::new(config),
            SinkBundle::noop(),
            HostRegistry::new(),
            FolderStateStore::new(),
            Arc::new(crate::cache::MemoryCache::new()),
        );
        worker.tell_thread_to_die(false).await;
    }
}
