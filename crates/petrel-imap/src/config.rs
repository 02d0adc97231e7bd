//! Engine configuration.
//!
//! Everything here maps to a user preference; worker threads read it
//! through a shared handle and the chunk tuner writes back `chunk_size` /
//! `chunk_threshold` through a dirty flag at connection close.

use std::time::Duration;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Plaintext only. **Not recommended.**
    Plain,
    /// Upgrade with STARTTLS when the server offers it; continue in the
    /// clear otherwise.
    StartTlsOpportunistic,
    /// STARTTLS is mandatory; failure to negotiate it is fatal.
    StartTlsRequired,
    /// TLS from the first byte (port 993). **Recommended.**
    #[default]
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Plain | Self::StartTlsOpportunistic | Self::StartTlsRequired => 143,
            Self::Implicit => 993,
        }
    }

    /// Returns true if STARTTLS must succeed.
    #[must_use]
    pub const fn requires_starttls(self) -> bool {
        matches!(self, Self::StartTlsRequired)
    }

    /// Returns true if STARTTLS should be attempted when offered.
    #[must_use]
    pub const fn wants_starttls(self) -> bool {
        matches!(self, Self::StartTlsOpportunistic | Self::StartTlsRequired)
    }
}

/// User authentication preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPreference {
    /// Try everything sensible.
    #[default]
    Any,
    /// Cleartext password mechanisms (PLAIN, LOGIN).
    PasswordCleartext,
    /// Encrypted password mechanisms (CRAM-MD5).
    PasswordEncrypted,
    /// NTLM/MSN.
    Ntlm,
    /// Kerberos via GSSAPI.
    Gssapi,
    /// TLS client certificate (EXTERNAL).
    External,
    /// Any mechanism that does not expose the password.
    Secure,
    /// OAuth2 bearer tokens.
    OAuth2,
    /// No authentication (rare PREAUTH-style setups).
    None,
    /// Legacy "old-style" LOGIN command only.
    Old,
}

/// How deletion is modelled for the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteModel {
    /// Move deleted messages to the Trash folder.
    #[default]
    MoveToTrash,
    /// Mark messages `\Deleted` and leave them in place.
    MarkDeleted,
    /// Delete immediately (store + expunge).
    DeleteImmediately,
}

/// Auto-expunge policy applied after a mailbox resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpungePolicy {
    /// Expunge when the delete model implies it.
    #[default]
    DeleteModel,
    /// Always expunge.
    Always,
    /// Expunge once the deleted count reaches the threshold.
    OnThreshold,
    /// Never auto-expunge.
    Never,
}

/// TCP keepalive parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    /// Master switch.
    pub enabled: bool,
    /// Idle time before probes, seconds.
    pub idle_time: u32,
    /// Interval between probes, seconds.
    pub retry_interval: u32,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            enabled: false,
            idle_time: 100,
            retry_interval: 5,
        }
    }
}

/// Engine configuration. One instance per server, shared by its
/// connections.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct EngineConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Account username (matched against URL authorities).
    pub username: String,
    /// Security mode.
    pub security: Security,
    /// Authentication preference.
    pub auth: AuthPreference,
    /// Base read/write timeout, seconds (`tcptimeout`).
    pub response_timeout: Duration,
    /// Delete model for the account.
    pub delete_model: DeleteModel,
    /// Whether deleted messages stay visible (affects auto-expunge).
    pub show_deleted_messages: bool,
    /// Auto-expunge policy.
    pub expunge_policy: ExpungePolicy,
    /// Deleted-message count that triggers `OnThreshold` expunge.
    pub expunge_threshold: u32,
    /// Expunge immediately after storing `\Deleted`.
    pub expunge_after_delete: bool,
    /// Skip EXPUNGE when nothing is marked `\Deleted`.
    pub check_deleted_before_expunge: bool,
    /// Master switch for body chunking.
    pub fetch_by_chunks: bool,
    /// Starting chunk size, bytes.
    pub chunk_size: u32,
    /// Message size above which chunking activates.
    pub chunk_threshold: u32,
    /// Chunk adjustment granularity, bytes.
    pub chunk_add: u32,
    /// Transfer time at or under this is "too fast", seconds.
    pub chunk_fast: u32,
    /// Transfer time above this shrinks the chunk, seconds.
    pub chunk_ideal: u32,
    /// Prefer ENVELOPE over `BODY.PEEK[HEADER]` for header fetches.
    pub use_envelope_cmd: bool,
    /// Emit `{N+}` when the server supports LITERAL+.
    pub use_literal_plus: bool,
    /// Use IDLE between URLs when the server supports it.
    pub use_idle: bool,
    /// Use the subscription list during discovery.
    pub use_subscriptions: bool,
    /// Always LIST the INBOX even if unsubscribed.
    pub always_list_inbox: bool,
    /// Hide namespace-prefix pseudo-folders.
    pub hide_unused_namespaces: bool,
    /// Suppress the Other Users namespace during discovery.
    pub hide_other_users: bool,
    /// Every Nth NOOP is promoted to CHECK; 0 disables promotion.
    pub noop_check_count: u32,
    /// Disk-backed second-level message cache.
    pub use_disk_cache: bool,
    /// Largest message the entry cache will store, bytes.
    pub cache_entry_ceiling: u32,
    /// LANGUAGE negotiation preference list.
    pub accept_languages: Vec<String>,
    /// Canonical path of the configured Trash folder.
    pub trash_folder_path: String,
    /// TCP keepalive parameters.
    pub keepalive: KeepAlive,
    /// Client name sent in the ID command.
    pub client_id_name: String,
    /// Client version sent in the ID command.
    pub client_id_version: String,
}

impl EngineConfig {
    /// Creates a configuration with defaults for the given host.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Security::Implicit.default_port(),
            username: String::new(),
            security: Security::Implicit,
            auth: AuthPreference::Any,
            response_timeout: Duration::from_secs(100),
            delete_model: DeleteModel::MoveToTrash,
            show_deleted_messages: false,
            expunge_policy: ExpungePolicy::DeleteModel,
            expunge_threshold: 20,
            expunge_after_delete: false,
            check_deleted_before_expunge: false,
            fetch_by_chunks: true,
            chunk_size: 65536,
            chunk_threshold: 98304,
            chunk_add: 16384,
            chunk_fast: 2,
            chunk_ideal: 4,
            use_envelope_cmd: false,
            use_literal_plus: true,
            use_idle: true,
            use_subscriptions: true,
            always_list_inbox: true,
            hide_unused_namespaces: true,
            hide_other_users: false,
            noop_check_count: 0,
            use_disk_cache: true,
            cache_entry_ceiling: 512 * 1024,
            accept_languages: Vec::new(),
            trash_folder_path: "Trash".to_string(),
            keepalive: KeepAlive::default(),
            client_id_name: "petrel".to_string(),
            client_id_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the security mode, adjusting the port if it was the default.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the authentication preference.
    #[must_use]
    pub const fn auth(mut self, auth: AuthPreference) -> Self {
        self.auth = auth;
        self
    }

    /// Connect timeout: the base timeout plus sixty seconds.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.response_timeout + Duration::from_secs(60)
    }

    /// Per-URL I/O timeout. APPEND gets a fifth of the base; very large
    /// move/copy sets stretch it by one second per forty messages.
    #[must_use]
    pub fn io_timeout(&self, append: bool, move_copy_count: u32) -> Duration {
        let mut timeout = if append {
            self.response_timeout / 5
        } else {
            self.response_timeout
        };
        if move_copy_count > 0 {
            timeout += Duration::from_secs(u64::from(move_copy_count / 40));
        }
        timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports() {
        assert_eq!(Security::Plain.default_port(), 143);
        assert_eq!(Security::StartTlsRequired.default_port(), 143);
        assert_eq!(Security::Implicit.default_port(), 993);
    }

    #[test]
    fn starttls_requirements() {
        assert!(Security::StartTlsRequired.requires_starttls());
        assert!(!Security::StartTlsOpportunistic.requires_starttls());
        assert!(Security::StartTlsOpportunistic.wants_starttls());
        assert!(!Security::Implicit.wants_starttls());
    }

    #[test]
    fn connect_timeout_adds_sixty() {
        let config = EngineConfig::new("imap.example.com");
        assert_eq!(
            config.connect_timeout(),
            config.response_timeout + Duration::from_secs(60)
        );
    }

    #[test]
    fn io_timeout_append_divides() {
        let config = EngineConfig::new("imap.example.com");
        assert_eq!(config.io_timeout(true, 0), config.response_timeout / 5);
    }

    #[test]
    fn io_timeout_stretches_for_large_sets() {
        let config = EngineConfig::new("imap.example.com");
        let base = config.io_timeout(false, 0);
        assert_eq!(config.io_timeout(false, 400), base + Duration::from_secs(10));
    }
}
