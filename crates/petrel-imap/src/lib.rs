//! # petrel-imap
//!
//! A stateful IMAP4rev1 client engine. It keeps a long-lived,
//! authenticated connection to a mail server and executes a queue of
//! URL-described operations against it: select, fetch headers and
//! bodies (chunked), flag stores, copy/move, append, expunge, search,
//! IDLE, and folder discovery.
//!
//! ## What lives where
//!
//! - [`connection`]: transport (TLS, STARTTLS, COMPRESS=DEFLATE), the
//!   line buffer, the command engine, authentication, and IDLE
//! - [`parser`]: hand-written recursive-descent response parser
//! - [`command`]: command builders and literal-aware serialization
//! - [`url`]: the `imap://.../verb>...` work-item grammar with
//!   canonical folder paths
//! - [`state`]: the flag-and-UID cache, the mailbox resync algorithm,
//!   and chunk tuning
//! - [`runner`]: dispatches one URL at a time onto a connection
//! - [`worker`]: the per-connection task and its lifecycle
//! - [`sink`]: trait surface toward the folder/message/server layers
//! - [`cache`]: the message-display cache path with doom semantics
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use petrel_imap::{
//!     EngineConfig, FolderStateStore, HostRegistry, ImapUrl, ImapWorker,
//!     MemoryCache, SinkBundle,
//! };
//!
//! let mut config = EngineConfig::new("imap.example.com");
//! config.username = "user@example.com".into();
//!
//! let worker = ImapWorker::spawn(
//!     Arc::new(config),
//!     SinkBundle::noop(),          // real sinks wire into the app
//!     HostRegistry::new(),
//!     FolderStateStore::new(),
//!     Arc::new(MemoryCache::new()),
//! );
//!
//! worker.enqueue(ImapUrl::parse(
//!     "imap://user@imap.example.com:993/select>/INBOX",
//! )?);
//! # Ok::<(), petrel_imap::Error>(())
//! ```
//!
//! The engine never renders UI: everything user-visible flows through
//! the [`sink`] traits as localized-string keys or raw server text.

pub mod cache;
pub mod command;
pub mod config;
pub mod connection;
pub mod discovery;
mod error;
pub mod host;
pub mod ops;
pub mod parser;
pub mod quirks;
pub mod runner;
pub mod sink;
pub mod state;
pub mod time;
pub mod types;
pub mod url;
pub mod worker;

pub use cache::{CacheLookup, CacheWriter, MemoryCache, MessageCache, settle_lookup};
pub use command::{Command, FetchAttribute, SearchCriteria, StoreAction, TagAllocator};
pub use config::{AuthPreference, DeleteModel, EngineConfig, ExpungePolicy, Security};
pub use connection::{CommandOutcome, Connection, ConnectionState, FramedStream, ImapStream};
pub use error::{Error, Result};
pub use host::HostRegistry;
pub use parser::{FetchRecord, Response, ResponseParser, UntaggedResponse};
pub use quirks::{ServerQuirks, ServerType};
pub use runner::{FolderStateStore, can_run_url, run_url};
pub use sink::{
    FolderSink, MessageSink, ServerSink, SinkBundle, UrlListener, UrlStatus,
};
pub use state::{FlagState, FolderSyncState, ResyncPlan};
pub use types::{
    BoxFlags, Capability, CapabilitySet, Flag, Flags, ListEntry, MailboxSpec, ModSeq, Namespace,
    SeqNum, SequenceSet, Status, Tag, Uid, UidSet, UidValidity,
};
pub use url::{ImapUrl, UrlAction};
pub use worker::ImapWorker;
