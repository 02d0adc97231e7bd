//! Connection management: transport, framing, the command engine, the
//! authentication flow, and IDLE.

mod auth;
mod engine;
pub mod framed;
pub(crate) mod idle;
pub mod stream;

pub use auth::{AuthMethod, MethodSet, authenticate, choose_method, establish_plain,
    establish_session};
pub use engine::CommandOutcome;
pub use framed::FramedStream;
pub use idle::{IdleOutcome, idle_between_urls};
pub use stream::{ImapStream, connect_plain, connect_tls};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::command::TagAllocator;
use crate::config::{EngineConfig, Security};
use crate::quirks::ServerQuirks;
use crate::state::{ChunkTuner, FlagState};
use crate::types::{CapabilitySet, MailboxSpec};
use crate::{Error, Result};

/// The connection's protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Connected, greeting handled, not yet authenticated.
    #[default]
    NotAuthenticated,
    /// Authenticated; no mailbox selected.
    Authenticated,
    /// A mailbox is selected.
    Selected,
}

/// One IMAP connection: transport, parser-derived state, and the tag
/// counter. At most one URL runs on a connection at any moment, and at
/// most one command is outstanding.
pub struct Connection<S = ImapStream> {
    pub(crate) framed: FramedStream<S>,
    pub(crate) tags: TagAllocator,
    pub(crate) caps: CapabilitySet,
    pub(crate) state: ConnectionState,
    pub(crate) quirks: ServerQuirks,
    pub(crate) utf8_accept: bool,
    pub(crate) condstore_enabled: bool,
    pub(crate) idle_disabled: bool,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) tuner: ChunkTuner,
    pub(crate) flag_state: FlagState,
    /// Snapshot of the selected mailbox, canonical path included.
    pub(crate) selected: Option<MailboxSpec>,
    /// Lite-select: UIDVALIDITY observation only, no resync afterwards.
    pub(crate) lite_select: bool,
    interrupt: Arc<AtomicBool>,
    death: Arc<AtomicBool>,
    pub(crate) outstanding: bool,
    pub(crate) noop_counter: u32,
    pub(crate) greeting_text: Option<String>,
    pub(crate) last_command_ok: bool,
    pub(crate) last_alert: Option<String>,
    pub(crate) io_timeout: Duration,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already-connected stream.
    pub fn from_stream(stream: S, config: Arc<EngineConfig>) -> Self {
        let io_timeout = config.response_timeout;
        let tuner = ChunkTuner::from_config(&config);
        Self {
            framed: FramedStream::new(stream),
            tags: TagAllocator::new(),
            caps: CapabilitySet::new(),
            state: ConnectionState::NotAuthenticated,
            quirks: ServerQuirks::default(),
            utf8_accept: false,
            condstore_enabled: false,
            idle_disabled: false,
            config,
            tuner,
            flag_state: FlagState::new(),
            selected: None,
            lite_select: false,
            interrupt: Arc::new(AtomicBool::new(false)),
            death: Arc::new(AtomicBool::new(false)),
            outstanding: false,
            noop_counter: 0,
            greeting_text: None,
            last_command_ok: false,
            last_alert: None,
            io_timeout,
        }
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// The active capability set.
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    /// The selected mailbox's canonical path, if any.
    #[must_use]
    pub fn selected_folder(&self) -> Option<&str> {
        self.selected.as_ref().map(|s| s.canonical_path.as_str())
    }

    /// Replaces the control flags with externally owned ones so the
    /// worker's owner can signal death and pseudo-interrupt.
    pub fn attach_control(&mut self, death: Arc<AtomicBool>, interrupt: Arc<AtomicBool>) {
        self.death = death;
        self.interrupt = interrupt;
    }

    /// Shared handle to the pseudo-interrupt flag.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Shared handle to the death flag.
    #[must_use]
    pub fn death_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.death)
    }

    /// True once a pseudo-interrupt was requested. Idempotent; cleared by
    /// [`Self::clear_interrupt`] when a new URL attaches.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Clears the pseudo-interrupt flag.
    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
    }

    /// True once the connection was told to die.
    #[must_use]
    pub fn death_signaled(&self) -> bool {
        self.death.load(Ordering::SeqCst)
    }

    /// Fails with `Shutdown` once death is signaled.
    pub fn check_death(&self) -> Result<()> {
        if self.death_signaled() {
            Err(Error::Shutdown)
        } else {
            Ok(())
        }
    }

    /// Sets the I/O timeout for the current URL.
    pub const fn set_io_timeout(&mut self, timeout: Duration) {
        self.io_timeout = timeout;
    }

    /// True if CONDSTORE has been enabled on this session.
    #[must_use]
    pub const fn condstore_enabled(&self) -> bool {
        self.condstore_enabled
    }

    /// Whether the last command completed OK.
    #[must_use]
    pub const fn last_command_successful(&self) -> bool {
        self.last_command_ok
    }
}

impl Connection<ImapStream> {
    /// Connects to the configured server, performing implicit TLS when
    /// the security mode asks for it. The greeting is not yet read;
    /// [`establish_session`] handles it.
    pub async fn connect(config: Arc<EngineConfig>) -> Result<Self> {
        let connect = async {
            match config.security {
                Security::Implicit => stream::connect_tls(&config.host, config.port).await,
                _ => stream::connect_plain(&config.host, config.port).await,
            }
        };
        let stream = tokio::time::timeout(config.connect_timeout(), connect)
            .await
            .map_err(|_| Error::Timeout(config.connect_timeout()))??;

        stream.apply_keepalive(config.keepalive.enabled);
        Ok(Self::from_stream(stream, config))
    }

    /// Upgrades the transport to TLS in place and discards every
    /// buffered byte that arrived before the handshake.
    pub(crate) async fn upgrade_starttls(&mut self) -> Result<()> {
        let host = self.config.host.clone();
        let old = std::mem::replace(&mut self.framed, FramedStream::new(ImapStream::Closed));
        let upgraded = old.into_inner().upgrade_to_tls(&host).await?;
        // A fresh FramedStream has an empty buffer: pre-TLS bytes are gone.
        self.framed = FramedStream::new(upgraded);
        Ok(())
    }

    /// Swaps the DEFLATE layer in after a successful COMPRESS DEFLATE.
    pub(crate) fn enable_deflate(&mut self) {
        let old = std::mem::replace(&mut self.framed, FramedStream::new(ImapStream::Closed));
        self.framed = FramedStream::new(old.into_inner().into_deflate());
    }
}

impl<S> std::fmt::Debug for Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("selected", &self.selected_folder())
            .field("condstore", &self.condstore_enabled)
            .field("outstanding", &self.outstanding)
            .finish_non_exhaustive()
    }
}
