//! IMAP command builder.
//!
//! Commands serialize to chunk streams ([`CommandChunk`]); the connection
//! engine renders literal framing and CRLF termination when sending.

mod serialize;
mod tag;
mod types;

use crate::types::{Flags, SequenceSet, UidSet};

pub use serialize::{CommandChunk, CommandWriter, LITERAL_THRESHOLD};
pub use tag::TagAllocator;
pub use types::{FetchAttribute, SearchCriteria, StatusAttribute, StoreAction};

use serialize::{write_fetch_attributes, write_search_criteria, write_store_action};

/// IMAP command.
///
/// Mailbox names are already in wire form (Modified UTF-7 or UTF-8); the
/// URL layer owns the canonical-to-wire translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // Any state
    /// CAPABILITY command.
    Capability,
    /// NOOP command.
    Noop,
    /// CHECK command (promoted NOOP).
    Check,
    /// LOGOUT command.
    Logout,

    // Not authenticated state
    /// STARTTLS command.
    StartTls,
    /// Legacy LOGIN command.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// AUTHENTICATE command.
    Authenticate {
        /// SASL mechanism name.
        mechanism: String,
        /// Initial response (SASL-IR), already base64-encoded.
        initial_response: Option<String>,
    },
    /// CLIENTID command (non-standard).
    ClientId {
        /// Identifier kind (e.g. `TOKEN`).
        kind: String,
        /// Identifier value.
        value: String,
    },

    // Authenticated state
    /// ID command (RFC 2971).
    Id {
        /// Field/value pairs; `None` sends `ID NIL`.
        parameters: Option<Vec<(String, String)>>,
    },
    /// ENABLE command (RFC 5161).
    Enable {
        /// Capability names to enable.
        capabilities: Vec<String>,
    },
    /// COMPRESS DEFLATE command (RFC 4978).
    CompressDeflate,
    /// LANGUAGE command (RFC 5255).
    Language {
        /// Language range tags in preference order.
        tags: Vec<String>,
    },
    /// XSERVERINFO command (manage-folder URLs).
    XServerInfo,
    /// SELECT command.
    Select {
        /// Mailbox in wire form.
        mailbox: String,
        /// Request CONDSTORE parameters.
        condstore: bool,
    },
    /// CREATE command.
    Create {
        /// Mailbox in wire form.
        mailbox: String,
    },
    /// DELETE command.
    DeleteMailbox {
        /// Mailbox in wire form.
        mailbox: String,
    },
    /// RENAME command.
    Rename {
        /// Current name in wire form.
        from: String,
        /// New name in wire form.
        to: String,
    },
    /// SUBSCRIBE command.
    Subscribe {
        /// Mailbox in wire form.
        mailbox: String,
    },
    /// UNSUBSCRIBE command.
    Unsubscribe {
        /// Mailbox in wire form.
        mailbox: String,
    },
    /// LIST command, optionally with LIST-EXTENDED selections.
    List {
        /// Reference name.
        reference: String,
        /// Mailbox pattern.
        pattern: String,
        /// Add `(SUBSCRIBED)` selection (LIST-EXTENDED).
        subscribed: bool,
        /// Add `RETURN (SPECIAL-USE)`.
        return_special_use: bool,
    },
    /// LSUB command.
    Lsub {
        /// Reference name.
        reference: String,
        /// Mailbox pattern.
        pattern: String,
    },
    /// XLIST command (Gmail-style special folders).
    Xlist {
        /// Reference name.
        reference: String,
        /// Mailbox pattern.
        pattern: String,
    },
    /// NAMESPACE command.
    Namespace,
    /// STATUS command.
    Status {
        /// Mailbox in wire form.
        mailbox: String,
        /// Attributes to request.
        items: Vec<StatusAttribute>,
    },
    /// APPEND command. The message travels as a literal.
    Append {
        /// Target mailbox in wire form.
        mailbox: String,
        /// Flags to set on the appended message.
        flags: Option<Flags>,
        /// Complete RFC 5322 message.
        message: Vec<u8>,
    },
    /// GETACL command (RFC 4314).
    GetAcl {
        /// Mailbox in wire form.
        mailbox: String,
    },
    /// MYRIGHTS command (RFC 4314).
    MyRights {
        /// Mailbox in wire form.
        mailbox: String,
    },
    /// GETQUOTAROOT command (RFC 2087).
    GetQuotaRoot {
        /// Mailbox in wire form.
        mailbox: String,
    },

    // Selected state
    /// CLOSE command.
    Close,
    /// EXPUNGE command.
    Expunge,
    /// UID EXPUNGE command (RFC 4315).
    UidExpunge {
        /// UIDs to expunge.
        uids: UidSet,
    },
    /// SEARCH command.
    Search {
        /// Search criteria.
        criteria: SearchCriteria,
        /// Use UID SEARCH.
        uid: bool,
    },
    /// FETCH command.
    Fetch {
        /// Message set.
        set: SequenceSet,
        /// Attributes to fetch.
        attrs: Vec<FetchAttribute>,
        /// Use UID FETCH.
        uid: bool,
        /// CHANGEDSINCE modifier (CONDSTORE).
        changed_since: Option<u64>,
    },
    /// STORE command.
    Store {
        /// Message set.
        set: SequenceSet,
        /// Flag action.
        action: StoreAction,
        /// `.SILENT` variant.
        silent: bool,
        /// Use UID STORE.
        uid: bool,
    },
    /// COPY command.
    Copy {
        /// Message set.
        set: SequenceSet,
        /// Destination mailbox in wire form.
        mailbox: String,
        /// Use UID COPY.
        uid: bool,
    },
    /// MOVE command (RFC 6851).
    Move {
        /// Message set.
        set: SequenceSet,
        /// Destination mailbox in wire form.
        mailbox: String,
        /// Use UID MOVE.
        uid: bool,
    },
    /// IDLE command (RFC 2177).
    Idle,
    /// DONE continuation ending IDLE (sent without a tag).
    Done,
    /// A user-defined message command, sent verbatim after the tag.
    Custom {
        /// Complete command text without tag or CRLF.
        text: String,
    },
}

impl Command {
    /// Serializes the command into a chunk stream.
    ///
    /// The tag prefix is included (except for DONE). The trailing CRLF is
    /// not; the engine appends it when writing.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn chunks(&self, tag: &str, utf8_accept: bool) -> Vec<CommandChunk> {
        let mut w = CommandWriter::new(utf8_accept);

        if !matches!(self, Self::Done) {
            w.raw(tag.as_bytes());
            w.space();
        }

        match self {
            Self::Capability => w.raw(b"CAPABILITY"),
            Self::Noop => w.raw(b"NOOP"),
            Self::Check => w.raw(b"CHECK"),
            Self::Logout => w.raw(b"LOGOUT"),
            Self::StartTls => w.raw(b"STARTTLS"),

            Self::Login { username, password } => {
                w.raw(b"LOGIN ");
                w.astring(username);
                w.space();
                w.astring(password);
            }

            Self::Authenticate {
                mechanism,
                initial_response,
            } => {
                w.raw(b"AUTHENTICATE ");
                w.raw(mechanism.as_bytes());
                if let Some(resp) = initial_response {
                    w.space();
                    w.raw(resp.as_bytes());
                }
            }

            Self::ClientId { kind, value } => {
                w.raw(b"CLIENTID ");
                w.raw(kind.as_bytes());
                w.space();
                w.astring(value);
            }

            Self::Id { parameters } => {
                w.raw(b"ID ");
                if let Some(params) = parameters {
                    w.raw(b"(");
                    for (i, (key, value)) in params.iter().enumerate() {
                        if i > 0 {
                            w.space();
                        }
                        w.astring(key);
                        w.space();
                        w.astring(value);
                    }
                    w.raw(b")");
                } else {
                    w.raw(b"NIL");
                }
            }

            Self::Enable { capabilities } => {
                w.raw(b"ENABLE");
                for cap in capabilities {
                    w.space();
                    w.raw(cap.as_bytes());
                }
            }

            Self::CompressDeflate => w.raw(b"COMPRESS DEFLATE"),

            Self::Language { tags } => {
                w.raw(b"LANGUAGE");
                for t in tags {
                    w.space();
                    w.raw(t.as_bytes());
                }
            }

            Self::XServerInfo => {
                w.raw(b"XSERVERINFO manageaccounturl manageliststurl managefiltersurl");
            }

            Self::Select { mailbox, condstore } => {
                w.raw(b"SELECT ");
                w.astring(mailbox);
                if *condstore {
                    w.raw(b" (CONDSTORE)");
                }
            }

            Self::Create { mailbox } => {
                w.raw(b"CREATE ");
                w.astring(mailbox);
            }

            Self::DeleteMailbox { mailbox } => {
                w.raw(b"DELETE ");
                w.astring(mailbox);
            }

            Self::Rename { from, to } => {
                w.raw(b"RENAME ");
                w.astring(from);
                w.space();
                w.astring(to);
            }

            Self::Subscribe { mailbox } => {
                w.raw(b"SUBSCRIBE ");
                w.astring(mailbox);
            }

            Self::Unsubscribe { mailbox } => {
                w.raw(b"UNSUBSCRIBE ");
                w.astring(mailbox);
            }

            Self::List {
                reference,
                pattern,
                subscribed,
                return_special_use,
            } => {
                w.raw(b"LIST ");
                if *subscribed {
                    w.raw(b"(SUBSCRIBED) ");
                }
                w.astring(reference);
                w.space();
                w.astring(pattern);
                if *return_special_use {
                    w.raw(b" RETURN (SPECIAL-USE)");
                }
            }

            Self::Lsub { reference, pattern } => {
                w.raw(b"LSUB ");
                w.astring(reference);
                w.space();
                w.astring(pattern);
            }

            Self::Xlist { reference, pattern } => {
                w.raw(b"XLIST ");
                w.astring(reference);
                w.space();
                w.astring(pattern);
            }

            Self::Namespace => w.raw(b"NAMESPACE"),

            Self::Status { mailbox, items } => {
                w.raw(b"STATUS ");
                w.astring(mailbox);
                w.raw(b" (");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        w.space();
                    }
                    w.raw(item.as_str().as_bytes());
                }
                w.raw(b")");
            }

            Self::Append {
                mailbox,
                flags,
                message,
            } => {
                w.raw(b"APPEND ");
                w.astring(mailbox);
                if let Some(flags) = flags {
                    w.raw(b" (");
                    w.raw(flags.to_string().as_bytes());
                    w.raw(b")");
                }
                w.space();
                w.literal(message.clone());
            }

            Self::GetAcl { mailbox } => {
                w.raw(b"GETACL ");
                w.astring(mailbox);
            }

            Self::MyRights { mailbox } => {
                w.raw(b"MYRIGHTS ");
                w.astring(mailbox);
            }

            Self::GetQuotaRoot { mailbox } => {
                w.raw(b"GETQUOTAROOT ");
                w.astring(mailbox);
            }

            Self::Close => w.raw(b"CLOSE"),
            Self::Expunge => w.raw(b"EXPUNGE"),

            Self::UidExpunge { uids } => {
                w.raw(b"UID EXPUNGE ");
                w.raw(uids.to_string().as_bytes());
            }

            Self::Search { criteria, uid } => {
                if *uid {
                    w.raw(b"UID ");
                }
                w.raw(b"SEARCH ");
                write_search_criteria(&mut w, criteria);
            }

            Self::Fetch {
                set,
                attrs,
                uid,
                changed_since,
            } => {
                if *uid {
                    w.raw(b"UID ");
                }
                w.raw(b"FETCH ");
                w.raw(set.to_string().as_bytes());
                w.space();
                write_fetch_attributes(&mut w, attrs);
                if let Some(modseq) = changed_since {
                    w.raw(format!(" (CHANGEDSINCE {modseq})").as_bytes());
                }
            }

            Self::Store {
                set,
                action,
                silent,
                uid,
            } => {
                if *uid {
                    w.raw(b"UID ");
                }
                w.raw(b"STORE ");
                w.raw(set.to_string().as_bytes());
                w.space();
                write_store_action(&mut w, action, *silent);
            }

            Self::Copy { set, mailbox, uid } => {
                if *uid {
                    w.raw(b"UID ");
                }
                w.raw(b"COPY ");
                w.raw(set.to_string().as_bytes());
                w.space();
                w.astring(mailbox);
            }

            Self::Move { set, mailbox, uid } => {
                if *uid {
                    w.raw(b"UID ");
                }
                w.raw(b"MOVE ");
                w.raw(set.to_string().as_bytes());
                w.space();
                w.astring(mailbox);
            }

            Self::Idle => w.raw(b"IDLE"),
            Self::Done => w.raw(b"DONE"),
            Self::Custom { text } => w.raw(text.as_bytes()),
        }

        w.finish()
    }

    /// A short name for logging. Auth commands log this instead of their
    /// argument text so credentials never reach the log.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::Noop => "NOOP",
            Self::Check => "CHECK",
            Self::Logout => "LOGOUT",
            Self::StartTls => "STARTTLS",
            Self::Login { .. } => "LOGIN",
            Self::Authenticate { .. } => "AUTHENTICATE",
            Self::ClientId { .. } => "CLIENTID",
            Self::Id { .. } => "ID",
            Self::Enable { .. } => "ENABLE",
            Self::CompressDeflate => "COMPRESS",
            Self::Language { .. } => "LANGUAGE",
            Self::XServerInfo => "XSERVERINFO",
            Self::Select { .. } => "SELECT",
            Self::Create { .. } => "CREATE",
            Self::DeleteMailbox { .. } => "DELETE",
            Self::Rename { .. } => "RENAME",
            Self::Subscribe { .. } => "SUBSCRIBE",
            Self::Unsubscribe { .. } => "UNSUBSCRIBE",
            Self::List { .. } => "LIST",
            Self::Lsub { .. } => "LSUB",
            Self::Xlist { .. } => "XLIST",
            Self::Namespace => "NAMESPACE",
            Self::Status { .. } => "STATUS",
            Self::Append { .. } => "APPEND",
            Self::GetAcl { .. } => "GETACL",
            Self::MyRights { .. } => "MYRIGHTS",
            Self::GetQuotaRoot { .. } => "GETQUOTAROOT",
            Self::Close => "CLOSE",
            Self::Expunge => "EXPUNGE",
            Self::UidExpunge { .. } => "UID EXPUNGE",
            Self::Search { .. } => "SEARCH",
            Self::Fetch { .. } => "FETCH",
            Self::Store { .. } => "STORE",
            Self::Copy { .. } => "COPY",
            Self::Move { .. } => "MOVE",
            Self::Idle => "IDLE",
            Self::Done => "DONE",
            Self::Custom { .. } => "CUSTOM",
        }
    }

    /// Returns true if the command's argument text must not be logged.
    #[must_use]
    pub const fn is_auth_sensitive(&self) -> bool {
        matches!(self, Self::Login { .. } | Self::Authenticate { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Renders chunks as if LITERAL+ were negotiated, for assertions.
    fn render(chunks: &[CommandChunk]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            match chunk {
                CommandChunk::Text(t) => out.extend_from_slice(t),
                CommandChunk::Literal(data) => {
                    out.extend_from_slice(format!("{{{}+}}\r\n", data.len()).as_bytes());
                    out.extend_from_slice(data);
                }
            }
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn capability_line() {
        assert_eq!(
            render(&Command::Capability.chunks("3", false)),
            b"3 CAPABILITY\r\n"
        );
    }

    #[test]
    fn login_quotes_spaced_password() {
        let cmd = Command::Login {
            username: "user@example.com".to_string(),
            password: "pass word".to_string(),
        };
        assert_eq!(
            render(&cmd.chunks("4", false)),
            b"4 LOGIN user@example.com \"pass word\"\r\n"
        );
    }

    #[test]
    fn select_condstore() {
        let cmd = Command::Select {
            mailbox: "INBOX".to_string(),
            condstore: true,
        };
        assert_eq!(
            render(&cmd.chunks("5", false)),
            b"5 SELECT INBOX (CONDSTORE)\r\n"
        );
    }

    #[test]
    fn uid_fetch_changedsince() {
        let cmd = Command::Fetch {
            set: SequenceSet::RangeFrom(crate::types::SeqNum::new(1).unwrap()),
            attrs: vec![FetchAttribute::Flags],
            uid: true,
            changed_since: Some(5000),
        };
        assert_eq!(
            render(&cmd.chunks("6", false)),
            b"6 UID FETCH 1:* (FLAGS) (CHANGEDSINCE 5000)\r\n"
        );
    }

    #[test]
    fn chunked_body_fetch() {
        let cmd = Command::Fetch {
            set: SequenceSet::single(42).unwrap(),
            attrs: vec![
                FetchAttribute::Uid,
                FetchAttribute::Rfc822Size,
                FetchAttribute::body_chunk(true, 250_000, 250_000),
            ],
            uid: true,
            changed_since: None,
        };
        assert_eq!(
            render(&cmd.chunks("7", false)),
            b"7 UID FETCH 42 (UID RFC822.SIZE BODY.PEEK[]<250000.250000>)\r\n"
        );
    }

    #[test]
    fn uid_store_silent_deleted() {
        use crate::types::{Flag, Flags};
        let cmd = Command::Store {
            set: SequenceSet::from_uid_set(&UidSet::parse("91:93").unwrap()),
            action: StoreAction::AddFlags(Flags::from_vec(vec![Flag::Deleted])),
            silent: true,
            uid: true,
        };
        assert_eq!(
            render(&cmd.chunks("8", false)),
            b"8 UID STORE 91:93 +FLAGS.SILENT (\\Deleted)\r\n"
        );
    }

    #[test]
    fn uid_expunge_range() {
        let cmd = Command::UidExpunge {
            uids: UidSet::parse("91:93").unwrap(),
        };
        assert_eq!(
            render(&cmd.chunks("9", false)),
            b"9 UID EXPUNGE 91:93\r\n"
        );
    }

    #[test]
    fn list_extended_subscribed_special_use() {
        let cmd = Command::List {
            reference: String::new(),
            pattern: "*".to_string(),
            subscribed: true,
            return_special_use: true,
        };
        assert_eq!(
            render(&cmd.chunks("10", false)),
            b"10 LIST (SUBSCRIBED) \"\" \"*\" RETURN (SPECIAL-USE)\r\n"
        );
    }

    #[test]
    fn append_message_is_literal() {
        let cmd = Command::Append {
            mailbox: "Drafts".to_string(),
            flags: Some(Flags::from_vec(vec![crate::types::Flag::Draft])),
            message: b"From: a@b\r\n\r\nhi".to_vec(),
        };
        let chunks = cmd.chunks("11", false);
        assert!(matches!(&chunks[0], CommandChunk::Text(t) if t.starts_with(b"11 APPEND Drafts (\\Draft) ")));
        assert!(matches!(&chunks[1], CommandChunk::Literal(d) if d.ends_with(b"hi")));
    }

    #[test]
    fn done_has_no_tag() {
        assert_eq!(render(&Command::Done.chunks("12", false)), b"DONE\r\n");
    }

    #[test]
    fn id_nil() {
        assert_eq!(
            render(&Command::Id { parameters: None }.chunks("13", false)),
            b"13 ID NIL\r\n"
        );
    }

    #[test]
    fn auth_sensitive_flag() {
        assert!(
            Command::Login {
                username: String::new(),
                password: String::new()
            }
            .is_auth_sensitive()
        );
        assert!(!Command::Noop.is_auth_sensitive());
    }
}
