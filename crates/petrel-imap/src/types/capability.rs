//! Server capabilities and response status.

/// Response status from a tagged response or greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed (operational error).
    No,
    /// Command failed (protocol/syntax error).
    Bad,
    /// Server greeting: connection starts pre-authenticated.
    PreAuth,
    /// Server is closing the connection.
    Bye,
}

impl Status {
    /// Returns true if this is a successful status.
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::PreAuth)
    }
}

/// Server capability.
///
/// Unknown tokens are accepted and preserved; the engine must never depend
/// on an extension that is not in the active set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `IMAP4rev1` (RFC 3501)
    Imap4Rev1,
    /// IDLE command support (RFC 2177)
    Idle,
    /// NAMESPACE command support (RFC 2342)
    Namespace,
    /// ACL extension (RFC 4314)
    Acl,
    /// QUOTA extension (RFC 2087)
    Quota,
    /// UIDPLUS extension (RFC 4315)
    UidPlus,
    /// MOVE extension (RFC 6851)
    Move,
    /// LITERAL+ extension (RFC 7888)
    LiteralPlus,
    /// STARTTLS support
    StartTls,
    /// LOGIN disabled until the connection is secured
    LoginDisabled,
    /// AUTH mechanism
    Auth(String),
    /// ENABLE command (RFC 5161)
    Enable,
    /// UTF8=ACCEPT (RFC 6855)
    Utf8Accept,
    /// CONDSTORE (RFC 7162)
    CondStore,
    /// COMPRESS=DEFLATE (RFC 4978)
    CompressDeflate,
    /// ID extension (RFC 2971)
    Id,
    /// LIST-EXTENDED (RFC 5258)
    ListExtended,
    /// SPECIAL-USE mailboxes (RFC 6154)
    SpecialUse,
    /// XLIST (pre-RFC 6154 special folders, Gmail and friends)
    Xlist,
    /// XSENDER extension
    XSender,
    /// LANGUAGE extension (RFC 5255)
    Language,
    /// CLIENTID extension (non-standard)
    ClientId,
    /// Gmail extensions (`X-GM-EXT-1`)
    GmailExt1,
    /// Unknown capability, preserved verbatim
    Unknown(String),
}

impl Capability {
    /// Parses a capability string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let upper = s.to_uppercase();
        match upper.as_str() {
            "IMAP4REV1" => Self::Imap4Rev1,
            "IDLE" => Self::Idle,
            "NAMESPACE" => Self::Namespace,
            "ACL" => Self::Acl,
            "QUOTA" => Self::Quota,
            "UIDPLUS" => Self::UidPlus,
            "MOVE" => Self::Move,
            "LITERAL+" => Self::LiteralPlus,
            "STARTTLS" => Self::StartTls,
            "LOGINDISABLED" => Self::LoginDisabled,
            "ENABLE" => Self::Enable,
            "UTF8=ACCEPT" => Self::Utf8Accept,
            "CONDSTORE" => Self::CondStore,
            "COMPRESS=DEFLATE" => Self::CompressDeflate,
            "ID" => Self::Id,
            "LIST-EXTENDED" => Self::ListExtended,
            "SPECIAL-USE" => Self::SpecialUse,
            "XLIST" => Self::Xlist,
            "XSENDER" => Self::XSender,
            "LANGUAGE" => Self::Language,
            "CLIENTID" => Self::ClientId,
            "X-GM-EXT-1" => Self::GmailExt1,
            _ if upper.starts_with("AUTH=") => Self::Auth(s[5..].to_uppercase()),
            _ => Self::Unknown(s.to_string()),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imap4Rev1 => write!(f, "IMAP4rev1"),
            Self::Idle => write!(f, "IDLE"),
            Self::Namespace => write!(f, "NAMESPACE"),
            Self::Acl => write!(f, "ACL"),
            Self::Quota => write!(f, "QUOTA"),
            Self::UidPlus => write!(f, "UIDPLUS"),
            Self::Move => write!(f, "MOVE"),
            Self::LiteralPlus => write!(f, "LITERAL+"),
            Self::StartTls => write!(f, "STARTTLS"),
            Self::LoginDisabled => write!(f, "LOGINDISABLED"),
            Self::Auth(mech) => write!(f, "AUTH={mech}"),
            Self::Enable => write!(f, "ENABLE"),
            Self::Utf8Accept => write!(f, "UTF8=ACCEPT"),
            Self::CondStore => write!(f, "CONDSTORE"),
            Self::CompressDeflate => write!(f, "COMPRESS=DEFLATE"),
            Self::Id => write!(f, "ID"),
            Self::ListExtended => write!(f, "LIST-EXTENDED"),
            Self::SpecialUse => write!(f, "SPECIAL-USE"),
            Self::Xlist => write!(f, "XLIST"),
            Self::XSender => write!(f, "XSENDER"),
            Self::Language => write!(f, "LANGUAGE"),
            Self::ClientId => write!(f, "CLIENTID"),
            Self::GmailExt1 => write!(f, "X-GM-EXT-1"),
            Self::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// The active capability set for a session.
///
/// STARTTLS is remembered persistently even when the post-STARTTLS
/// CAPABILITY response omits it.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    caps: Vec<Capability>,
    starttls_seen: bool,
}

impl CapabilitySet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            caps: Vec::new(),
            starttls_seen: false,
        }
    }

    /// Replaces the set with a freshly advertised list.
    pub fn replace(&mut self, caps: Vec<Capability>) {
        if caps.contains(&Capability::StartTls) {
            self.starttls_seen = true;
        }
        self.caps = caps;
    }

    /// Returns true if the capability is in the active set.
    #[must_use]
    pub fn has(&self, cap: &Capability) -> bool {
        if matches!(cap, Capability::StartTls) && self.starttls_seen {
            return true;
        }
        self.caps.contains(cap)
    }

    /// Returns true if the given AUTH mechanism is advertised.
    #[must_use]
    pub fn has_auth(&self, mechanism: &str) -> bool {
        self.caps
            .iter()
            .any(|c| matches!(c, Capability::Auth(m) if m.eq_ignore_ascii_case(mechanism)))
    }

    /// Returns true if no capabilities have been learned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Returns the raw list.
    #[must_use]
    pub fn as_slice(&self) -> &[Capability] {
        &self.caps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        assert!(Status::Ok.is_ok());
        assert!(Status::PreAuth.is_ok());
        assert!(!Status::No.is_ok());
        assert!(!Status::Bad.is_ok());
        assert!(!Status::Bye.is_ok());
    }

    #[test]
    fn parse_known_capabilities() {
        assert_eq!(Capability::parse("imap4rev1"), Capability::Imap4Rev1);
        assert_eq!(Capability::parse("COMPRESS=DEFLATE"), Capability::CompressDeflate);
        assert_eq!(Capability::parse("LIST-EXTENDED"), Capability::ListExtended);
        assert_eq!(Capability::parse("X-GM-EXT-1"), Capability::GmailExt1);
        assert_eq!(
            Capability::parse("AUTH=cram-md5"),
            Capability::Auth("CRAM-MD5".to_string())
        );
    }

    #[test]
    fn parse_unknown_preserved() {
        assert_eq!(
            Capability::parse("XYZZY"),
            Capability::Unknown("XYZZY".to_string())
        );
    }

    #[test]
    fn starttls_remembered_across_replace() {
        let mut set = CapabilitySet::new();
        set.replace(vec![Capability::Imap4Rev1, Capability::StartTls]);
        assert!(set.has(&Capability::StartTls));

        // Post-STARTTLS capability may omit STARTTLS; it stays remembered.
        set.replace(vec![Capability::Imap4Rev1, Capability::Idle]);
        assert!(set.has(&Capability::StartTls));
        assert!(set.has(&Capability::Idle));
    }

    #[test]
    fn has_auth_case_insensitive() {
        let mut set = CapabilitySet::new();
        set.replace(vec![Capability::Auth("PLAIN".to_string())]);
        assert!(set.has_auth("plain"));
        assert!(!set.has_auth("CRAM-MD5"));
    }
}
