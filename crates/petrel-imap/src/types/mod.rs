//! Core IMAP types.

mod capability;
mod flags;
mod identifiers;
mod mailbox;
mod response_code;
mod sequence;

pub use capability::{Capability, CapabilitySet, Status};
pub use flags::{Flag, Flags, PermanentFlags};
pub use identifiers::{ModSeq, SeqNum, Tag, Uid, UidValidity};
pub use mailbox::{BoxFlags, ListEntry, MailboxSpec, Namespace, NamespaceKind};
pub use response_code::ResponseCode;
pub use sequence::{SequenceSet, UidSet};
