//! Mailbox types: LIST entries, box-flag bits, SELECT snapshots, namespaces.

use super::{Flags, ModSeq, PermanentFlags, SeqNum, Uid, UidValidity};

/// Mailbox attribute bits from LIST/LSUB/XLIST responses plus synthetic
/// engine bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoxFlags(pub u32);

impl BoxFlags {
    /// `\Noselect`
    pub const NOSELECT: Self = Self(1 << 0);
    /// `\Marked`
    pub const MARKED: Self = Self(1 << 1);
    /// `\Unmarked`
    pub const UNMARKED: Self = Self(1 << 2);
    /// `\HasChildren`
    pub const HAS_CHILDREN: Self = Self(1 << 3);
    /// `\HasNoChildren`
    pub const HAS_NO_CHILDREN: Self = Self(1 << 4);
    /// `\Noinferiors`
    pub const NO_INFERIORS: Self = Self(1 << 5);
    /// `\Trash` (SPECIAL-USE or XLIST)
    pub const TRASH: Self = Self(1 << 6);
    /// `\Sent`
    pub const SENT: Self = Self(1 << 7);
    /// `\Drafts`
    pub const DRAFTS: Self = Self(1 << 8);
    /// `\Archive`
    pub const ARCHIVE: Self = Self(1 << 9);
    /// `\Junk` / `\Spam`
    pub const JUNK: Self = Self(1 << 10);
    /// `\AllMail` (XLIST) / `\All` (SPECIAL-USE)
    pub const ALL_MAIL: Self = Self(1 << 11);
    /// `\Inbox` (XLIST)
    pub const INBOX: Self = Self(1 << 12);
    /// `\Subscribed` (LIST-EXTENDED)
    pub const SUBSCRIBED: Self = Self(1 << 13);
    /// Synthetic: the engine just expunged this mailbox.
    pub const JUST_EXPUNGED: Self = Self(1 << 14);
    /// Namespace type: personal.
    pub const PERSONAL_NAMESPACE: Self = Self(1 << 16);
    /// Namespace type: other users.
    pub const OTHER_USERS_NAMESPACE: Self = Self(1 << 17);
    /// Namespace type: public.
    pub const PUBLIC_NAMESPACE: Self = Self(1 << 18);

    /// Returns the union of the two sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the given bits in place.
    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the given bits in place.
    pub const fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Parses one LIST attribute atom. Unknown attributes map to no bits
    /// (accepted silently).
    #[must_use]
    pub fn parse_attribute(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "\\NOSELECT" | "\\NONEXISTENT" => Self::NOSELECT,
            "\\MARKED" => Self::MARKED,
            "\\UNMARKED" => Self::UNMARKED,
            "\\HASCHILDREN" => Self::HAS_CHILDREN,
            "\\HASNOCHILDREN" => Self::HAS_NO_CHILDREN,
            "\\NOINFERIORS" => Self::NO_INFERIORS,
            "\\TRASH" => Self::TRASH,
            "\\SENT" => Self::SENT,
            "\\DRAFTS" => Self::DRAFTS,
            "\\ARCHIVE" => Self::ARCHIVE,
            "\\JUNK" | "\\SPAM" => Self::JUNK,
            "\\ALLMAIL" | "\\ALL" => Self::ALL_MAIL,
            "\\INBOX" => Self::INBOX,
            "\\SUBSCRIBED" => Self::SUBSCRIBED,
            _ => Self(0),
        }
    }
}

/// One LIST/LSUB/XLIST response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Mailbox name in wire form (Modified UTF-7 or UTF-8).
    pub name: String,
    /// Hierarchy delimiter, `None` for flat mailboxes.
    pub delimiter: Option<char>,
    /// Attribute bits.
    pub flags: BoxFlags,
    /// Whether this entry came from LSUB rather than LIST.
    pub from_lsub: bool,
}

/// Snapshot of a mailbox produced by SELECT, STATUS, or LIST.
#[derive(Debug, Clone, Default)]
pub struct MailboxSpec {
    /// Canonical path (`/`-separated, `^`-escaped).
    pub canonical_path: String,
    /// Hierarchy delimiter on the wire.
    pub delimiter: Option<char>,
    /// Attribute bits.
    pub box_flags: BoxFlags,
    /// Number of messages (EXISTS).
    pub exists: u32,
    /// Number of recent messages.
    pub recent: u32,
    /// First unseen message sequence number, or unseen count from STATUS.
    pub unseen: Option<SeqNum>,
    /// UIDVALIDITY value.
    pub uid_validity: Option<UidValidity>,
    /// Next UID to be assigned.
    pub uid_next: Option<Uid>,
    /// HIGHESTMODSEQ, present only when the server reports it.
    pub highest_mod_seq: Option<ModSeq>,
    /// Flags defined for this mailbox.
    pub supported_flags: Flags,
    /// Flags that may be stored permanently.
    pub permanent_flags: PermanentFlags,
    /// Whether the mailbox is currently selected read-write.
    pub folder_selected: bool,
    /// Whether the mailbox was discovered via LSUB.
    pub discovered_from_lsub: bool,
}

/// Namespace kind (RFC 2342).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    /// The user's personal namespace.
    Personal,
    /// Other users' mailboxes.
    OtherUsers,
    /// Shared/public mailboxes.
    Public,
    /// Not yet known.
    Unknown,
}

/// One namespace entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// Prefix in wire form, possibly empty.
    pub prefix: String,
    /// Hierarchy delimiter.
    pub delimiter: Option<char>,
    /// Namespace kind.
    pub kind: NamespaceKind,
}

impl Namespace {
    /// The default namespace used before the server reports any.
    #[must_use]
    pub fn default_personal() -> Self {
        Self {
            prefix: String::new(),
            delimiter: None,
            kind: NamespaceKind::Personal,
        }
    }

    /// Returns the namespace-type box flag for mailboxes under this prefix.
    #[must_use]
    pub const fn box_flag(&self) -> BoxFlags {
        match self.kind {
            NamespaceKind::Personal | NamespaceKind::Unknown => BoxFlags::PERSONAL_NAMESPACE,
            NamespaceKind::OtherUsers => BoxFlags::OTHER_USERS_NAMESPACE,
            NamespaceKind::Public => BoxFlags::PUBLIC_NAMESPACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_flags_union_contains() {
        let mut flags = BoxFlags::default();
        flags.insert(BoxFlags::TRASH);
        flags.insert(BoxFlags::NOSELECT);
        assert!(flags.contains(BoxFlags::TRASH));
        assert!(!flags.contains(BoxFlags::SENT));
        flags.remove(BoxFlags::NOSELECT);
        assert!(!flags.contains(BoxFlags::NOSELECT));
    }

    #[test]
    fn parse_special_use_attributes() {
        assert_eq!(BoxFlags::parse_attribute("\\Trash"), BoxFlags::TRASH);
        assert_eq!(BoxFlags::parse_attribute("\\Spam"), BoxFlags::JUNK);
        assert_eq!(BoxFlags::parse_attribute("\\AllMail"), BoxFlags::ALL_MAIL);
        assert_eq!(BoxFlags::parse_attribute("\\All"), BoxFlags::ALL_MAIL);
    }

    #[test]
    fn unknown_attribute_accepted_silently() {
        assert_eq!(BoxFlags::parse_attribute("\\XWeird"), BoxFlags(0));
    }

    #[test]
    fn namespace_box_flag() {
        let ns = Namespace {
            prefix: "Other Users/".to_string(),
            delimiter: Some('/'),
            kind: NamespaceKind::OtherUsers,
        };
        assert_eq!(ns.box_flag(), BoxFlags::OTHER_USERS_NAMESPACE);
    }

    #[test]
    fn default_spec_is_unselected() {
        let spec = MailboxSpec::default();
        assert!(!spec.folder_selected);
        assert_eq!(spec.exists, 0);
        assert!(spec.uid_validity.is_none());
    }
}
