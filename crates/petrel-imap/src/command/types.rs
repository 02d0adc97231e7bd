//! Command-related type definitions.

use crate::types::{Flags, UidSet};

/// STATUS attributes to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAttribute {
    /// Number of messages.
    Messages,
    /// Number of recent messages.
    Recent,
    /// Next UID.
    UidNext,
    /// UIDVALIDITY.
    UidValidity,
    /// Number of unseen messages.
    Unseen,
    /// Highest mod-sequence.
    HighestModSeq,
}

impl StatusAttribute {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "MESSAGES",
            Self::Recent => "RECENT",
            Self::UidNext => "UIDNEXT",
            Self::UidValidity => "UIDVALIDITY",
            Self::Unseen => "UNSEEN",
            Self::HighestModSeq => "HIGHESTMODSEQ",
        }
    }
}

/// Individual FETCH attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttribute {
    /// Message flags.
    Flags,
    /// Internal date.
    InternalDate,
    /// RFC822 size.
    Rfc822Size,
    /// Envelope structure.
    Envelope,
    /// UID.
    Uid,
    /// Body section.
    Body {
        /// Section specifier (`None` is the whole message).
        section: Option<String>,
        /// Peek (don't set `\Seen`).
        peek: bool,
        /// Partial fetch range `<start.length>`.
        partial: Option<(u32, u32)>,
    },
    /// MODSEQ.
    ModSeq,
    /// A custom attribute handed through from a customFetch URL.
    Custom(String),
    /// `X-GM-MSGID` (Gmail).
    GmMsgId,
    /// `X-GM-THRID` (Gmail).
    GmThrId,
    /// `X-GM-LABELS` (Gmail).
    GmLabels,
}

impl FetchAttribute {
    /// Whole-message body fetch.
    #[must_use]
    pub const fn whole_body(peek: bool) -> Self {
        Self::Body {
            section: None,
            peek,
            partial: None,
        }
    }

    /// Partial whole-message body fetch for chunking.
    #[must_use]
    pub const fn body_chunk(peek: bool, offset: u32, length: u32) -> Self {
        Self::Body {
            section: None,
            peek,
            partial: Some((offset, length)),
        }
    }

    /// Header fetch: `BODY.PEEK[HEADER]` or with explicit fields.
    #[must_use]
    pub fn headers(fields: Option<&[String]>) -> Self {
        let section = match fields {
            Some(list) if !list.is_empty() => {
                Some(format!("HEADER.FIELDS ({})", list.join(" ")))
            }
            _ => Some("HEADER".to_string()),
        };
        Self::Body {
            section,
            peek: true,
            partial: None,
        }
    }
}

/// STORE action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    /// Replace flags.
    SetFlags(Flags),
    /// Add flags.
    AddFlags(Flags),
    /// Remove flags.
    RemoveFlags(Flags),
}

impl StoreAction {
    /// Returns the flags being stored.
    #[must_use]
    pub const fn flags(&self) -> &Flags {
        match self {
            Self::SetFlags(f) | Self::AddFlags(f) | Self::RemoveFlags(f) => f,
        }
    }

    /// Replaces the flags, keeping the action kind.
    #[must_use]
    pub fn with_flags(&self, flags: Flags) -> Self {
        match self {
            Self::SetFlags(_) => Self::SetFlags(flags),
            Self::AddFlags(_) => Self::AddFlags(flags),
            Self::RemoveFlags(_) => Self::RemoveFlags(flags),
        }
    }
}

/// SEARCH criteria.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    /// All messages.
    All,
    /// Messages with `\Deleted`.
    Deleted,
    /// Messages without `\Deleted`.
    Undeleted,
    /// Messages without `\Seen`.
    Unseen,
    /// Restrict to a UID set.
    Uid(UidSet),
    /// Header field contains value.
    Header(String, String),
    /// A raw criteria string handed through from a search URL.
    Raw(String),
    /// AND of criteria (space-joined).
    And(Vec<Self>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_with_fields() {
        let attr = FetchAttribute::headers(Some(&["From".to_string(), "To".to_string()]));
        assert_eq!(
            attr,
            FetchAttribute::Body {
                section: Some("HEADER.FIELDS (From To)".to_string()),
                peek: true,
                partial: None,
            }
        );
    }

    #[test]
    fn headers_without_fields() {
        let attr = FetchAttribute::headers(None);
        assert!(matches!(
            attr,
            FetchAttribute::Body { section: Some(s), peek: true, .. } if s == "HEADER"
        ));
    }

    #[test]
    fn store_action_with_flags_keeps_kind() {
        use crate::types::{Flag, Flags};
        let action = StoreAction::AddFlags(Flags::from_vec(vec![Flag::Deleted]));
        let swapped = action.with_flags(Flags::from_vec(vec![Flag::Seen]));
        assert!(matches!(swapped, StoreAction::AddFlags(f) if f.is_seen()));
    }
}
