//! Sink traits: the engine's only way to reach outside code.
//!
//! A running URL owns a bundle of sinks obtained fresh from the server
//! sink; they live exactly as long as the URL's run. All methods are
//! called from the worker task and are expected to marshal to their own
//! thread internally, so they are synchronous here. Every trait method
//! has a no-op default so implementations override only what they watch.

use std::sync::Arc;

use crate::parser::FetchRecord;
use crate::types::{Flags, ListEntry, MailboxSpec, Uid, UidSet};
use crate::url::ImapUrl;
use crate::{Error, Result};

/// Target size of one header-transfer batch.
pub const HEADER_BATCH_SIZE: usize = 200;

/// One message's header cache entry inside a batch.
#[derive(Debug, Clone)]
pub struct HeaderEntry {
    /// Message UID.
    pub uid: u32,
    /// RFC822.SIZE if reported.
    pub size: u32,
    /// Flags at fetch time.
    pub flags: Flags,
    /// Raw header block (or envelope-derived synthetic headers).
    pub headers: Vec<u8>,
}

/// A fixed-capacity batch of header entries handed to the folder sink in
/// bulk.
#[derive(Debug, Default)]
pub struct HeaderBatch {
    entries: Vec<HeaderEntry>,
}

impl HeaderBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(HEADER_BATCH_SIZE),
        }
    }

    /// Adds an entry; returns true once the batch is full and should be
    /// flushed.
    pub fn push(&mut self, entry: HeaderEntry) -> bool {
        self.entries.push(entry);
        self.entries.len() >= HEADER_BATCH_SIZE
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries.
    #[must_use]
    pub fn entries(&self) -> &[HeaderEntry] {
        &self.entries
    }

    /// Takes the entries, leaving the batch empty for reuse.
    pub fn take(&mut self) -> Vec<HeaderEntry> {
        std::mem::take(&mut self.entries)
    }
}

/// Stop status delivered to the URL listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlStatus {
    /// Completed successfully.
    Ok,
    /// DNS failure.
    NetworkUnknownHost,
    /// Connection refused.
    NetworkConnectionRefused,
    /// Read/write timed out.
    NetworkTimeout,
    /// Connection reset.
    NetworkReset,
    /// Connection closed by the peer.
    NetworkClosed,
    /// Transfer interrupted (pseudo-interrupt included).
    NetworkInterrupted,
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// Response syntax error.
    ProtocolBadResponse,
    /// Tagged NO/BAD.
    ProtocolCommandFailed,
    /// User cancelled authentication.
    AuthCancelled,
    /// Authentication failed.
    AuthFailed,
    /// Server answered NO `[UNAVAILABLE]`.
    AuthUnavailable,
    /// `local-fetch-only` URL wanted a message that is not offline.
    NotOffline,
    /// No mailbox selected for a selected-state URL.
    MailboxNotSelected,
    /// UIDVALIDITY changed under a UID-sensitive URL.
    UidValidityMismatch,
    /// Engine shutting down.
    Shutdown,
}

impl UrlStatus {
    /// Maps an engine error to the stop status for the listener.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => Self::NetworkUnknownHost,
                std::io::ErrorKind::ConnectionRefused => Self::NetworkConnectionRefused,
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                    Self::NetworkReset
                }
                std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe => {
                    Self::NetworkClosed
                }
                std::io::ErrorKind::TimedOut => Self::NetworkTimeout,
                std::io::ErrorKind::Interrupted => Self::NetworkInterrupted,
                _ => Self::NetworkClosed,
            },
            Error::Tls(_) | Error::InvalidDnsName(_) => Self::TlsHandshakeFailed,
            Error::Timeout(_) => Self::NetworkTimeout,
            Error::BadSyntax { .. } => Self::ProtocolBadResponse,
            Error::No { .. } | Error::Bad(_) | Error::Protocol(_) | Error::UrlSyntax(_) => {
                Self::ProtocolCommandFailed
            }
            Error::Bye(_) => Self::NetworkClosed,
            Error::AuthCancelled => Self::AuthCancelled,
            Error::AuthFailed(_) | Error::AuthMechNotSupported(_) | Error::NoPassword => {
                Self::AuthFailed
            }
            Error::AuthUnavailable(_) => Self::AuthUnavailable,
            Error::NotOffline => Self::NotOffline,
            Error::MailboxNotSelected | Error::InvalidState(_) => Self::MailboxNotSelected,
            Error::UidValidityMismatch { .. } => Self::UidValidityMismatch,
            Error::Shutdown => Self::Shutdown,
        }
    }

    /// Returns true for the success status.
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Extra status a URL can carry beside its stop status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UrlExtraStatus {
    /// Nothing notable.
    #[default]
    None,
    /// Some requested flags were not settable and were dropped.
    FlagsNotSettable,
}

/// Localized-string keys for status text. The core never renders UI; it
/// hands out keys plus an optional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKey {
    /// "Selecting mailbox..."
    SelectingMailbox,
    /// "Creating mailbox..."
    CreatingMailbox,
    /// "Deleting mailbox..."
    DeletingMailbox,
    /// "Renaming mailbox..."
    RenamingMailbox,
    /// "Receiving message headers..." (n of m)
    ReceivingMessageHeaders,
    /// "Receiving message..." (n of m)
    ReceivingMessageOf,
    /// "Deleting messages..."
    DeletingMessages,
    /// "Copying messages..."
    CopyingMessages,
    /// "Searching mailbox..."
    SearchingMailbox,
    /// "Getting folder status..."
    FolderStatus,
    /// "Logging on..."
    LoggingOn,
    /// "Checking mailbox capabilities..."
    CheckingCapabilities,
}

/// Localized-string keys for user-visible alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKey {
    /// The server dropped the connection.
    ServerDisconnected,
    /// No shared authentication mechanism.
    AuthMechNotSupported,
    /// Login failed.
    LoginFailed,
    /// PREAUTH greeting while STARTTLS is required: a possible MITM window.
    PreAuthWithStartTlsRequired,
    /// STARTTLS required but the server cannot do it.
    StartTlsRequiredUnavailable,
}

/// Outcome of the wrong-password prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginRetry {
    /// Try the same password again.
    Retry,
    /// Ask for a new password.
    NewPassword,
    /// Give up.
    Cancel,
}

/// Biff (new-mail) state reported to the folder sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiffState {
    /// New mail arrived.
    NewMail,
    /// No new mail.
    NoMail,
    /// State unknown.
    Unknown,
}

/// The URL's data listener (the "mock channel"). The engine emits exactly
/// one start and one stop per run, in that order, with any data events
/// between them.
pub trait UrlListener: Send + Sync {
    /// The run began.
    fn on_start_request(&self, url: &ImapUrl) {
        let _ = url;
    }

    /// A chunk of message data is available.
    fn on_data_available(&self, data: &[u8]) {
        let _ = data;
    }

    /// The run finished with the given status.
    fn on_stop_request(&self, url: &ImapUrl, status: UrlStatus) {
        let _ = (url, status);
    }
}

/// The selected mailbox's notifier.
pub trait FolderSink: Send + Sync {
    /// SELECT produced a fresh mailbox snapshot.
    fn update_mailbox_info(&self, spec: &MailboxSpec) {
        let _ = spec;
    }

    /// STATUS produced a refreshed snapshot.
    fn update_mailbox_status(&self, spec: &MailboxSpec) {
        let _ = spec;
    }

    /// A header batch is ready for parsing.
    fn parse_msg_hdrs(&self, batch: &[HeaderEntry]) {
        let _ = batch;
    }

    /// The header stream died mid-way; drop partial state.
    fn abort_header_parse_stream(&self) {}

    /// IDLE saw activity; the folder should schedule an update.
    fn on_new_idle_messages(&self) {}

    /// Quota data arrived for the folder.
    fn set_folder_quota_data(&self, root: &str, used: u64, max: u64) {
        let _ = (root, used, max);
    }

    /// Biff state changed.
    fn set_biff_state(&self, state: BiffState) {
        let _ = state;
    }

    /// Percent progress, throttled by the engine.
    fn percent_progress(&self, current: u64, total: u64) {
        let _ = (current, total);
    }

    /// A status string keyed for localization.
    fn progress_status(&self, key: ProgressKey, arg: Option<&str>) {
        let _ = (key, arg);
    }

    /// COPYUID destination set from a copy/move.
    fn set_copy_response_uid(&self, uids: &UidSet) {
        let _ = uids;
    }

    /// APPENDUID from an append.
    fn set_append_msg_uid(&self, uid: Uid) {
        let _ = uid;
    }

    /// ACL rights were revoked or refreshed; clear cached rights.
    fn clear_folder_rights(&self) {}

    /// A message body download is starting.
    fn start_message(&self, url: &ImapUrl) {
        let _ = url;
    }

    /// A message body download finished.
    fn end_message(&self, url: &ImapUrl, uid: u32) {
        let _ = (url, uid);
    }

    /// One SEARCH hit line.
    fn notify_search_hit(&self, url: &ImapUrl, hit: &str) {
        let _ = (url, hit);
    }

    /// After a header batch: which bodies should be downloaded.
    /// Returns `(more, total, uids)`.
    fn get_msg_hdrs_to_download(&self) -> (bool, u32, Vec<u32>) {
        (false, 0, Vec::new())
    }

    /// An online copy finished (success or failure).
    fn online_copy_completed(&self, ok: bool) {
        let _ = ok;
    }

    /// The folder's hierarchy delimiter, when already known.
    fn get_online_delimiter(&self) -> Option<char> {
        None
    }

    /// All header batches for the URL have been delivered.
    fn header_fetch_completed(&self) {}
}

/// The account/server-level sink: folder-tree mutations, user
/// interaction, and URL-queue orchestration.
pub trait ServerSink: Send + Sync {
    /// Discovery or LIST saw a mailbox. Returns true if it was new.
    fn possible_mailbox(&self, entry: &ListEntry) -> bool {
        let _ = entry;
        false
    }

    /// A folder was deleted online.
    fn online_folder_delete(&self, canonical: &str) {
        let _ = canonical;
    }

    /// CREATE failed.
    fn online_folder_create_failed(&self, canonical: &str) {
        let _ = canonical;
    }

    /// A folder was renamed online.
    fn online_folder_rename(&self, from: &str, to: &str) {
        let _ = (from, to);
    }

    /// A folder turned out to be `\Noselect`.
    fn folder_is_noselect(&self, canonical: &str) -> bool {
        let _ = canonical;
        false
    }

    /// A folder was verified to exist online.
    fn folder_verified_online(&self, canonical: &str) {
        let _ = canonical;
    }

    /// The capability set changed.
    fn set_capability(&self, caps: &crate::types::CapabilitySet) {
        let _ = caps;
    }

    /// The server identified itself via ID.
    fn set_server_id(&self, id: &[(String, String)]) {
        let _ = id;
    }

    /// Asks for the account password. `new_prompt` forces re-asking.
    fn async_get_password(&self, new_prompt: bool) -> Result<String> {
        let _ = new_prompt;
        Err(Error::NoPassword)
    }

    /// The password from the secret store, when no window is available.
    fn stored_password(&self) -> Option<String> {
        None
    }

    /// Wrong-password prompt.
    fn prompt_login_failed(&self) -> LoginRetry {
        LoginRetry::Cancel
    }

    /// A user-visible alert, either keyed or carrying raw server text.
    fn fe_alert(&self, key: AlertKey, server_text: Option<&str>) {
        let _ = (key, server_text);
    }

    /// Run the next queued URL, if any.
    fn load_next_queued_url(&self) {}

    /// Requeue this URL for a retry on a fresh connection.
    fn retry_url(&self, url: &ImapUrl) {
        let _ = url;
    }

    /// Drop everything still queued.
    fn abort_queued_urls(&self) {}

    /// The connection is gone; remove it from the pool.
    fn remove_server_connection(&self) {}

    /// Custom headers to add to header fetches.
    fn get_arbitrary_headers(&self) -> Vec<String> {
        Vec::new()
    }

    /// Forget the stored password (wrong-password recovery).
    fn forget_password(&self) {}

    /// CRAM-MD5 digest computation (keyed MD5 lives outside the core).
    fn cram_md5_digest(&self, challenge: &[u8], password: &str) -> Result<String> {
        let _ = (challenge, password);
        Err(Error::AuthMechNotSupported("CRAM-MD5".to_string()))
    }

    /// An OAuth2 bearer token for XOAUTH2 (acquisition lives outside).
    fn oauth2_token(&self) -> Result<String> {
        Err(Error::AuthMechNotSupported("XOAUTH2".to_string()))
    }

    /// The login username.
    fn login_username(&self) -> String {
        String::new()
    }

    /// Folder discovery finished.
    fn discovery_done(&self) {}

    /// True when the app is shutting down.
    fn server_shutting_down(&self) -> bool {
        false
    }

    /// Runs `f` under the server-wide logon-exclusive monitor so stale
    /// credentials do not stampede the provider.
    fn run_logon_exclusive(&self, f: &mut dyn FnMut() -> LoginRetry) -> LoginRetry {
        f()
    }

    /// Quirk bit: `LIST (SUBSCRIBED)` is unsafe on this server.
    fn list_subscribed_unsafe(&self) -> bool {
        false
    }

    /// Flushes changed chunk-tuning values to user preferences. Called
    /// on the owning thread at connection close.
    fn persist_chunk_tuning(&self, chunk_size: u32, chunk_threshold: u32) {
        let _ = (chunk_size, chunk_threshold);
    }
}

/// The per-message data sink.
pub trait MessageSink: Send + Sync {
    /// A message write stream is starting.
    fn setup_msg_write_stream(&self, add_envelope: bool) {
        let _ = add_envelope;
    }

    /// One line of adopted message data.
    fn parse_adopted_msg_line(&self, line: &[u8], uid: u32, url: &ImapUrl) {
        let _ = (line, uid, url);
    }

    /// The message write stream completed normally.
    fn normal_end_msg_write_stream(&self, uid: u32, for_display: bool, url: &ImapUrl, size: u32) {
        let _ = (uid, for_display, url, size);
    }

    /// The message write stream died; discard the partial message.
    fn abort_msg_write_stream(&self) {}

    /// A message's flags changed.
    fn notify_message_flags(&self, flags: &Flags, uid: u32, modseq: u64) {
        let _ = (flags, uid, modseq);
    }

    /// Messages were deleted (expunged) from the folder.
    fn notify_message_deleted(&self, folder: &str, all: bool, uids: Option<&UidSet>) {
        let _ = (folder, all, uids);
    }

    /// The message's size according to the local database.
    fn message_size_from_db(&self, uid: u32) -> Option<u32> {
        let _ = uid;
        None
    }

    /// True if the message body is already in the offline store.
    fn is_message_offline(&self, uid: u32) -> bool {
        let _ = uid;
        false
    }

    /// The offline copy of a message, if present.
    fn offline_message(&self, uid: u32) -> Option<Vec<u8>> {
        let _ = uid;
        None
    }

    /// Per-message metadata consulted when uploading offline messages.
    fn cur_move_copy_message_flags(&self, url: &ImapUrl) -> Flags {
        let _ = url;
        Flags::new()
    }

    /// The complete message bytes for an append-from-file URL.
    fn append_message_source(&self, url: &ImapUrl) -> Option<Vec<u8>> {
        let _ = url;
        None
    }
}

/// The bundle of sinks a running URL owns.
#[derive(Clone)]
pub struct SinkBundle {
    /// The selected mailbox's notifier.
    pub folder: Arc<dyn FolderSink>,
    /// The account-level sink.
    pub server: Arc<dyn ServerSink>,
    /// The message data sink.
    pub message: Arc<dyn MessageSink>,
    /// The URL's data listener.
    pub listener: Arc<dyn UrlListener>,
}

impl SinkBundle {
    /// A bundle of no-op sinks; the engine always has something to emit
    /// through even when the caller supplied nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            folder: Arc::new(NoopSinks),
            server: Arc::new(NoopSinks),
            message: Arc::new(NoopSinks),
            listener: Arc::new(NoopSinks),
        }
    }

    /// Applies an unsolicited FETCH record to the message sink.
    pub fn notify_flag_record(&self, record: &FetchRecord) {
        if let (Some(uid), Some(flags)) = (record.uid, record.flags.as_ref()) {
            let modseq = record.modseq.map_or(0, crate::types::ModSeq::get);
            self.message.notify_message_flags(flags, uid.get(), modseq);
        }
    }
}

impl std::fmt::Debug for SinkBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkBundle").finish_non_exhaustive()
    }
}

/// No-op implementation of every sink trait.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSinks;

impl UrlListener for NoopSinks {}
impl FolderSink for NoopSinks {}
impl ServerSink for NoopSinks {}
impl MessageSink for NoopSinks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_batch_reports_full() {
        let mut batch = HeaderBatch::new();
        for i in 0..HEADER_BATCH_SIZE - 1 {
            assert!(!batch.push(HeaderEntry {
                uid: u32::try_from(i).unwrap_or(1) + 1,
                size: 100,
                flags: Flags::new(),
                headers: Vec::new(),
            }));
        }
        assert!(batch.push(HeaderEntry {
            uid: 9999,
            size: 100,
            flags: Flags::new(),
            headers: Vec::new(),
        }));
        assert_eq!(batch.len(), HEADER_BATCH_SIZE);
        let taken = batch.take();
        assert_eq!(taken.len(), HEADER_BATCH_SIZE);
        assert!(batch.is_empty());
    }

    #[test]
    fn status_from_error_mapping() {
        let err = Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
        assert_eq!(UrlStatus::from_error(&err), UrlStatus::NetworkConnectionRefused);

        assert_eq!(
            UrlStatus::from_error(&Error::BadSyntax {
                position: 0,
                message: String::new()
            }),
            UrlStatus::ProtocolBadResponse
        );
        assert_eq!(
            UrlStatus::from_error(&Error::AuthUnavailable(String::new())),
            UrlStatus::AuthUnavailable
        );
        assert_eq!(
            UrlStatus::from_error(&Error::Shutdown),
            UrlStatus::Shutdown
        );
    }

    #[test]
    fn noop_sinks_are_callable() {
        let bundle = SinkBundle::noop();
        bundle.folder.abort_header_parse_stream();
        bundle.server.load_next_queued_url();
        bundle.message.abort_msg_write_stream();
        assert_eq!(bundle.server.prompt_login_failed(), LoginRetry::Cancel);
        assert!(bundle.server.async_get_password(false).is_err());
    }
}
