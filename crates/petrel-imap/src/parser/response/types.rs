//! Response data types.

use crate::types::{
    Capability, Flags, ListEntry, ModSeq, Namespace, ResponseCode, SeqNum, Uid, UidSet,
    UidValidity,
};

/// One FETCH record, extracted in a single pass.
///
/// Known attributes land in typed fields; anything the engine does not
/// recognize is preserved in `extra` so unknown attributes never abort a
/// response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchRecord {
    /// Message sequence number (from the untagged response prefix).
    pub seq: u32,
    /// UID, if the server included one. Records without a UID are
    /// discarded by the engine.
    pub uid: Option<Uid>,
    /// FLAGS, if present.
    pub flags: Option<Flags>,
    /// RFC822.SIZE.
    pub size: Option<u32>,
    /// INTERNALDATE, verbatim.
    pub internal_date: Option<String>,
    /// ENVELOPE.
    pub envelope: Option<Box<Envelope>>,
    /// BODY[] / BODY.PEEK[] data, including the section and partial origin.
    pub body: Option<BodySection>,
    /// MODSEQ (CONDSTORE).
    pub modseq: Option<ModSeq>,
    /// `X-GM-MSGID` (Gmail).
    pub gm_msgid: Option<u64>,
    /// `X-GM-THRID` (Gmail).
    pub gm_thrid: Option<u64>,
    /// `X-GM-LABELS` (Gmail).
    pub gm_labels: Option<Vec<String>>,
    /// Unrecognized attributes, name and raw value text.
    pub extra: Vec<(String, String)>,
}

/// A BODY[...] fetch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodySection {
    /// Section specifier (`HEADER`, `TEXT`, `HEADER.FIELDS (..)`, `1.2`, or
    /// empty for the whole message).
    pub section: Option<String>,
    /// Origin offset for `<offset.length>` partial fetches.
    pub origin: Option<u32>,
    /// The octets, `None` when the server answered NIL.
    pub data: Option<Vec<u8>>,
}

/// Message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Date header.
    pub date: Option<String>,
    /// Subject header.
    pub subject: Option<String>,
    /// From addresses.
    pub from: Vec<Address>,
    /// Sender addresses.
    pub sender: Vec<Address>,
    /// Reply-To addresses.
    pub reply_to: Vec<Address>,
    /// To addresses.
    pub to: Vec<Address>,
    /// Cc addresses.
    pub cc: Vec<Address>,
    /// Bcc addresses.
    pub bcc: Vec<Address>,
    /// In-Reply-To header.
    pub in_reply_to: Option<String>,
    /// Message-ID header.
    pub message_id: Option<String>,
}

/// Email address from an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Display name.
    pub name: Option<String>,
    /// Source route (obsolete).
    pub adl: Option<String>,
    /// Mailbox name (local part).
    pub mailbox: Option<String>,
    /// Host name (domain part).
    pub host: Option<String>,
}

impl Address {
    /// Returns the full email address.
    #[must_use]
    pub fn email(&self) -> Option<String> {
        match (&self.mailbox, &self.host) {
            (Some(m), Some(h)) => Some(format!("{m}@{h}")),
            _ => None,
        }
    }
}

/// STATUS response item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusItem {
    /// Number of messages.
    Messages(u32),
    /// Number of recent messages.
    Recent(u32),
    /// Next UID.
    UidNext(Uid),
    /// UIDVALIDITY value.
    UidValidity(UidValidity),
    /// Number of unseen messages.
    Unseen(u32),
    /// Highest mod-sequence.
    HighestModSeq(u64),
}

/// Untagged response data.
#[derive(Debug, Clone, PartialEq)]
pub enum UntaggedResponse {
    /// OK response with optional code.
    Ok {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// NO response.
    No {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// BAD response.
    Bad {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// PREAUTH greeting.
    PreAuth {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// BYE: server-initiated shutdown.
    Bye {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// CAPABILITY data.
    Capability(Vec<Capability>),
    /// LIST entry.
    List(ListEntry),
    /// LSUB entry.
    Lsub(ListEntry),
    /// XLIST entry (Gmail-style special folders).
    Xlist(ListEntry),
    /// FLAGS for the selected mailbox.
    Flags(Flags),
    /// EXISTS message count.
    Exists(u32),
    /// RECENT count.
    Recent(u32),
    /// EXPUNGE of one sequence number.
    Expunge(SeqNum),
    /// One FETCH record.
    Fetch(FetchRecord),
    /// SEARCH result numbers.
    Search(Vec<u32>),
    /// STATUS for a mailbox.
    Status {
        /// Mailbox name in wire form.
        mailbox: String,
        /// Status items.
        items: Vec<StatusItem>,
    },
    /// NAMESPACE lists.
    Namespace {
        /// Personal namespaces.
        personal: Vec<Namespace>,
        /// Other-users namespaces.
        other: Vec<Namespace>,
        /// Public namespaces.
        public: Vec<Namespace>,
    },
    /// ACL for a mailbox: (identifier, rights) pairs.
    Acl {
        /// Mailbox name in wire form.
        mailbox: String,
        /// Identifier/rights pairs.
        rights: Vec<(String, String)>,
    },
    /// MYRIGHTS for a mailbox.
    MyRights {
        /// Mailbox name in wire form.
        mailbox: String,
        /// Rights string.
        rights: String,
    },
    /// QUOTA usage for a quota root.
    Quota {
        /// Quota root name.
        root: String,
        /// (resource, usage, limit) triples.
        usage: Vec<(String, u64, u64)>,
    },
    /// QUOTAROOT for a mailbox.
    QuotaRoot {
        /// Mailbox name in wire form.
        mailbox: String,
        /// Quota root names.
        roots: Vec<String>,
    },
    /// ID key/value pairs from the server.
    Id(Vec<(String, String)>),
    /// ENABLED capabilities.
    Enabled(Vec<Capability>),
    /// VANISHED (QRESYNC-style expunge notification).
    Vanished {
        /// True for `VANISHED (EARLIER)` describing historic expunges.
        earlier: bool,
        /// The expunged UIDs.
        uids: UidSet,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn address_email() {
        let addr = Address {
            name: Some("A".into()),
            adl: None,
            mailbox: Some("a".into()),
            host: Some("example.com".into()),
        };
        assert_eq!(addr.email(), Some("a@example.com".to_string()));

        let partial = Address {
            name: None,
            adl: None,
            mailbox: Some("a".into()),
            host: None,
        };
        assert_eq!(partial.email(), None);
    }

    #[test]
    fn fetch_record_default_has_no_uid() {
        let rec = FetchRecord::default();
        assert!(rec.uid.is_none());
        assert!(rec.extra.is_empty());
    }
}
