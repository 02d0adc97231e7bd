//! Server quirks and workarounds.
//!
//! Different IMAP servers interpret the RFC differently. Detection here
//! feeds two policy points the engine cares about: the Gmail
//! trash-interaction special case and the "LIST (SUBSCRIBED) is unsafe"
//! class of servers.

use crate::types::{Capability, CapabilitySet};

/// Known IMAP server types with specific quirks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerType {
    /// Unknown or generic IMAP server.
    #[default]
    Unknown,
    /// Gmail IMAP (imap.gmail.com).
    Gmail,
    /// Microsoft Outlook/Office 365.
    Outlook,
    /// Yahoo Mail.
    Yahoo,
    /// Dovecot.
    Dovecot,
    /// Courier IMAP.
    Courier,
    /// Cyrus IMAP.
    Cyrus,
    /// Zimbra.
    Zimbra,
}

impl ServerType {
    /// Detects the server type from capabilities and the greeting text.
    #[must_use]
    pub fn detect(capabilities: &CapabilitySet, greeting: Option<&str>) -> Self {
        if capabilities.has(&Capability::GmailExt1) {
            return Self::Gmail;
        }

        if let Some(greeting) = greeting {
            let lower = greeting.to_lowercase();
            if lower.contains("gimap") || lower.contains("gmail") {
                return Self::Gmail;
            }
            if lower.contains("outlook") || lower.contains("microsoft") {
                return Self::Outlook;
            }
            if lower.contains("dovecot") {
                return Self::Dovecot;
            }
            if lower.contains("courier") {
                return Self::Courier;
            }
            if lower.contains("cyrus") {
                return Self::Cyrus;
            }
            if lower.contains("zimbra") {
                return Self::Zimbra;
            }
            if lower.contains("yahoo") {
                return Self::Yahoo;
            }
        }

        Self::Unknown
    }
}

/// Server-specific behavior switches.
#[derive(Debug, Clone, Default)]
pub struct ServerQuirks {
    /// The detected server type.
    pub server_type: ServerType,
    /// Gmail semantics: labels, All Mail, COPY-to-Trash expunges.
    pub is_gmail: bool,
    /// `LIST (SUBSCRIBED)` crashes or misbehaves on this server; use
    /// LIST + LSUB instead. Kept as a consultable bit rather than
    /// version parsing.
    pub list_subscribed_unsafe: bool,
    /// Recommended IDLE re-issue interval, seconds.
    pub idle_timeout_secs: u32,
}

impl ServerQuirks {
    /// Builds the quirk set for a detected server type.
    #[must_use]
    pub const fn for_server(server_type: ServerType) -> Self {
        match server_type {
            ServerType::Gmail => Self {
                server_type,
                is_gmail: true,
                list_subscribed_unsafe: false,
                idle_timeout_secs: 600,
            },
            ServerType::Zimbra => Self {
                server_type,
                is_gmail: false,
                list_subscribed_unsafe: true,
                idle_timeout_secs: 1740,
            },
            ServerType::Outlook
            | ServerType::Dovecot
            | ServerType::Courier
            | ServerType::Cyrus => Self {
                server_type,
                is_gmail: false,
                list_subscribed_unsafe: false,
                idle_timeout_secs: 1740,
            },
            ServerType::Yahoo | ServerType::Unknown => Self {
                server_type,
                is_gmail: false,
                list_subscribed_unsafe: false,
                idle_timeout_secs: 600,
            },
        }
    }

    /// Returns the IDLE re-issue interval as a Duration.
    #[must_use]
    pub const fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout_secs as u64)
    }
}
