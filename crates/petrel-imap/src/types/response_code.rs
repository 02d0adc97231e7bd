//! Response codes carried in bracketed form on OK/NO/BAD/BYE responses.

use super::{Capability, SeqNum, Uid, UidSet, UidValidity};

/// Response code from a status response.
///
/// Codes are extracted and attached to the tagged response they ride on.
/// Unknown codes are preserved rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// ALERT: text MUST be shown to the user.
    Alert,
    /// CAPABILITY piggybacked on a greeting or post-auth response.
    Capability(Vec<Capability>),
    /// PARSE: server had trouble parsing a message.
    Parse,
    /// PERMANENTFLAGS: raw atoms, including a possible `\*`.
    PermanentFlags(Vec<String>),
    /// READ-ONLY: mailbox selected read-only.
    ReadOnly,
    /// READ-WRITE: mailbox selected read-write.
    ReadWrite,
    /// TRYCREATE: target mailbox does not exist but may be created.
    TryCreate,
    /// UIDNEXT value.
    UidNext(Uid),
    /// UIDVALIDITY value.
    UidValidity(UidValidity),
    /// UNSEEN: first unseen sequence number.
    Unseen(SeqNum),
    /// HIGHESTMODSEQ value (CONDSTORE).
    HighestModSeq(u64),
    /// NOMODSEQ: mailbox does not support mod-sequences.
    NoModSeq,
    /// APPENDUID (UIDPLUS): UID assigned to an appended message.
    AppendUid {
        /// UIDVALIDITY of the target mailbox.
        uidvalidity: UidValidity,
        /// UID of the appended message.
        uid: Uid,
    },
    /// COPYUID (UIDPLUS): source and destination UID sets.
    CopyUid {
        /// UIDVALIDITY of the destination mailbox.
        uidvalidity: UidValidity,
        /// Source UIDs as sent.
        source: UidSet,
        /// Destination UIDs assigned by the server.
        dest: UidSet,
    },
    /// UNAVAILABLE: the server cannot service the request right now
    /// (commonly provider throttling during authentication).
    Unavailable,
    /// AUTHENTICATIONFAILED.
    AuthenticationFailed,
    /// CLIENTBUG: the server believes the client misbehaved.
    ClientBug,
    /// LIMIT: a command exceeded a server limit.
    Limit,
    /// UIDPLUS-related EXPUNGEISSUED and similar informational codes.
    ExpungeIssued,
    /// Unknown response code, preserved verbatim.
    Unknown(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn copyuid_holds_sets() {
        let code = ResponseCode::CopyUid {
            uidvalidity: UidValidity::new(15).unwrap(),
            source: UidSet::parse("4,7,9").unwrap(),
            dest: UidSet::parse("91:93").unwrap(),
        };
        if let ResponseCode::CopyUid { source, dest, .. } = code {
            assert_eq!(source.len(), dest.len());
        } else {
            panic!("expected CopyUid");
        }
    }

    #[test]
    fn appenduid_fields() {
        let code = ResponseCode::AppendUid {
            uidvalidity: UidValidity::new(7).unwrap(),
            uid: Uid::new(1024).unwrap(),
        };
        assert!(matches!(code, ResponseCode::AppendUid { uid, .. } if uid.get() == 1024));
    }
}
