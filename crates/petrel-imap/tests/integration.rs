//! End-to-end engine tests against a scripted in-memory server.
//!
//! The scripted server consumes command lines in order: each rule's
//! matcher must appear in the next command line, and its response
//! templates are pushed into the read buffer with `{TAG}` replaced by
//! the tag of the most recent tagged command. Literal continuations for
//! synchronizing literals are answered automatically.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use petrel_imap::config::{EngineConfig, Security};
use petrel_imap::connection::{Connection, ConnectionState, establish_plain};
use petrel_imap::ops::selected as sel_ops;
use petrel_imap::runner::{FolderStateStore, run_url};
use petrel_imap::sink::{
    FolderSink, LoginRetry, MessageSink, ServerSink, SinkBundle, UrlListener, UrlStatus,
};
use petrel_imap::state::FolderSyncState;
use petrel_imap::time::MockClock;
use petrel_imap::types::UidSet;
use petrel_imap::url::ImapUrl;
use petrel_imap::{Error, HostRegistry, MemoryCache, MessageCache};

// === Scripted server ===

struct Rule {
    matcher: String,
    responses: Vec<Vec<u8>>,
}

#[derive(Default)]
struct ServerState {
    read_buf: VecDeque<u8>,
    waker: Option<Waker>,
    line_acc: Vec<u8>,
    rules: VecDeque<Rule>,
    commands: Vec<String>,
    last_tag: String,
}

#[derive(Clone, Default)]
struct ScriptedServer {
    state: Arc<Mutex<ServerState>>,
}

impl ScriptedServer {
    fn new(greeting: &str) -> Self {
        let server = Self::default();
        {
            let mut state = server.state.lock().unwrap();
            state.read_buf.extend(greeting.as_bytes());
            state.read_buf.extend(b"\r\n");
        }
        server
    }

    /// Queues the next expected command and its responses.
    fn expect(&self, matcher: &str, responses: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.rules.push_back(Rule {
            matcher: matcher.to_string(),
            responses: responses.iter().map(|r| r.as_bytes().to_vec()).collect(),
        });
    }

    /// Queues an expected command with raw (possibly literal-bearing)
    /// response bytes.
    fn expect_raw(&self, matcher: &str, responses: Vec<Vec<u8>>) {
        let mut state = self.state.lock().unwrap();
        state.rules.push_back(Rule {
            matcher: matcher.to_string(),
            responses,
        });
    }

    fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    fn unmet_rules(&self) -> usize {
        self.state.lock().unwrap().rules.len()
    }

    fn process_line(state: &mut ServerState, line: Vec<u8>) {
        let line_str = String::from_utf8_lossy(&line).into_owned();
        if let Some(first) = line_str.split_whitespace().next()
            && first.bytes().all(|b| b.is_ascii_digit())
        {
            state.last_tag = first.to_string();
        }
        state.commands.push(line_str.clone());

        let matched = state
            .rules
            .front()
            .is_some_and(|rule| line_str.contains(&rule.matcher));
        if matched {
            let rule = state.rules.pop_front().unwrap();
            let tag = state.last_tag.clone();
            for template in rule.responses {
                let text = String::from_utf8_lossy(&template).replace("{TAG}", &tag);
                state.read_buf.extend(text.as_bytes());
                state.read_buf.extend(b"\r\n");
            }
        } else if line_str.ends_with('}') && line_str.contains('{') && !line_str.ends_with("+}") {
            // Synchronizing literal: invite the payload.
            state.read_buf.extend(b"+ go ahead\r\n");
        }
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }
}

impl AsyncRead for ScriptedServer {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self.state.lock().unwrap();
        if state.read_buf.is_empty() {
            state.waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = buf.remaining().min(state.read_buf.len());
        for _ in 0..n {
            if let Some(b) = state.read_buf.pop_front() {
                buf.put_slice(&[b]);
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedServer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock().unwrap();
        state.line_acc.extend_from_slice(buf);
        while let Some(pos) = state.line_acc.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = state.line_acc.drain(..=pos).collect();
            while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
                line.pop();
            }
            Self::process_line(&mut state, line);
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// === Recording sinks ===

#[derive(Default)]
struct TestSinks {
    events: Mutex<Vec<String>>,
    sizes: Mutex<HashMap<u32, u32>>,
    data_bytes: AtomicU32,
    data_events: AtomicU32,
    starts: AtomicU32,
    stops: AtomicU32,
    interrupt: Mutex<Option<(Arc<AtomicBool>, u32)>>,
    password: Mutex<Option<String>>,
    username: Mutex<String>,
    cram_digest: Mutex<Option<String>>,
    panic_on_prompt: AtomicBool,
}

impl TestSinks {
    fn bundle(self: &Arc<Self>) -> SinkBundle {
        SinkBundle {
            folder: Arc::clone(self) as Arc<dyn FolderSink>,
            server: Arc::clone(self) as Arc<dyn ServerSink>,
            message: Arc::clone(self) as Arc<dyn MessageSink>,
            listener: Arc::clone(self) as Arc<dyn UrlListener>,
        }
    }

    fn log(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn has_event(&self, needle: &str) -> bool {
        self.events().iter().any(|e| e.contains(needle))
    }
}

impl UrlListener for TestSinks {
    fn on_start_request(&self, _url: &ImapUrl) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.log("OnStartRequest");
    }

    fn on_data_available(&self, data: &[u8]) {
        self.data_bytes
            .fetch_add(u32::try_from(data.len()).unwrap(), Ordering::SeqCst);
        let n = self.data_events.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((flag, after)) = self.interrupt.lock().unwrap().as_ref()
            && n >= *after
        {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn on_stop_request(&self, _url: &ImapUrl, status: UrlStatus) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.log(format!("OnStopRequest:{status:?}"));
    }
}

impl FolderSink for TestSinks {
    fn set_copy_response_uid(&self, uids: &UidSet) {
        self.log(format!("CopyResponseUid:{uids}"));
    }
}

impl ServerSink for TestSinks {
    fn async_get_password(&self, _new_prompt: bool) -> petrel_imap::Result<String> {
        self.password
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::NoPassword)
    }

    fn login_username(&self) -> String {
        self.username.lock().unwrap().clone()
    }

    fn prompt_login_failed(&self) -> LoginRetry {
        assert!(
            !self.panic_on_prompt.load(Ordering::SeqCst),
            "unexpected login prompt"
        );
        self.log("PromptLoginFailed");
        LoginRetry::Cancel
    }

    fn cram_md5_digest(&self, _challenge: &[u8], _password: &str) -> petrel_imap::Result<String> {
        self.cram_digest
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::AuthMechNotSupported("CRAM-MD5".to_string()))
    }

    fn retry_url(&self, url: &ImapUrl) {
        self.log(format!("RetryUrl:{url}"));
    }
}

impl MessageSink for TestSinks {
    fn message_size_from_db(&self, uid: u32) -> Option<u32> {
        self.sizes.lock().unwrap().get(&uid).copied()
    }

    fn normal_end_msg_write_stream(&self, uid: u32, _display: bool, _url: &ImapUrl, size: u32) {
        self.log(format!("NormalEnd:{uid}:{size}"));
    }

    fn abort_msg_write_stream(&self) {
        self.log("AbortMsgWriteStream");
    }
}

// === Helpers ===

fn chunked_config() -> EngineConfig {
    let mut config = EngineConfig::new("mail.example.com");
    config.username = "user".to_string();
    config.security = Security::Plain;
    config.fetch_by_chunks = true;
    config.chunk_size = 250_000;
    config.chunk_threshold = 375_000;
    config.chunk_add = 0;
    config.response_timeout = Duration::from_secs(5);
    config
}

async fn establish(
    server: &ScriptedServer,
    config: EngineConfig,
    sinks: &SinkBundle,
) -> Connection<ScriptedServer> {
    let registry = HostRegistry::new();
    let mut conn = Connection::from_stream(server.clone(), Arc::new(config));
    establish_plain(&mut conn, sinks, &registry)
        .await
        .expect("session establishment failed");
    conn
}

fn select_rules(server: &ScriptedServer, mailbox: &str, exists: u32, uidvalidity: u32) {
    server.expect(
        &format!("SELECT {mailbox}"),
        &[
            "* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)",
            "* OK [PERMANENTFLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft \\*)] ok",
            &format!("* {exists} EXISTS"),
            "* 0 RECENT",
            &format!("* OK [UIDVALIDITY {uidvalidity}] UIDs valid"),
            &format!("* OK [UIDNEXT {}] next", exists + 1),
            "{TAG} OK [READ-WRITE] SELECT completed",
        ],
    );
}

fn body_chunk_response(uid: u32, size: u32, offset: u32, len: usize) -> Vec<Vec<u8>> {
    let mut line = format!("* 1 FETCH (UID {uid} RFC822.SIZE {size} BODY[]<{offset}> {{{len}}}\r\n")
        .into_bytes();
    line.extend(std::iter::repeat_n(b'x', len));
    line.extend_from_slice(b")");
    vec![line]
}

// === S1: chunked fetch ===

#[tokio::test]
async fn s1_chunked_fetch_issues_three_commands() {
    let server = ScriptedServer::new("* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready");
    let sinks_impl = Arc::new(TestSinks::default());
    *sinks_impl.password.lock().unwrap() = Some("pw".to_string());
    *sinks_impl.username.lock().unwrap() = "user".to_string();
    sinks_impl.sizes.lock().unwrap().insert(42, 750_000);
    let sinks = sinks_impl.bundle();

    server.expect("AUTHENTICATE PLAIN", &["{TAG} OK authenticated"]);
    let mut conn = establish(&server, chunked_config(), &sinks).await;

    select_rules(&server, "INBOX", 1, 7);
    server.expect(
        "UID FETCH 1:* (FLAGS)",
        &["* 1 FETCH (UID 42 FLAGS (\\Seen))", "{TAG} OK done"],
    );
    let mut persist = FolderSyncState::default();
    sel_ops::select_mailbox(&mut conn, &sinks, "INBOX", false, &mut persist)
        .await
        .unwrap();

    for offset in [0u32, 250_000, 500_000] {
        server.expect_raw(
            &format!("BODY[]<{offset}.250000>"),
            {
                let mut responses = body_chunk_response(42, 750_000, offset, 250_000);
                responses.push(b"{TAG} OK FETCH done".to_vec());
                responses
            },
        );
    }

    let url = ImapUrl::parse("imap://user@mail.example.com/fetch>UID>/INBOX>42").unwrap();
    let clock = MockClock::new();
    let outcome = sel_ops::fetch_message_body(
        &mut conn, &sinks, &url, 42, 750_000, false, None, &clock,
    )
    .await
    .unwrap();

    assert_eq!(outcome, sel_ops::BodyFetchOutcome::Complete);
    assert_eq!(server.unmet_rules(), 0);

    let fetches: Vec<String> = server
        .commands()
        .into_iter()
        .filter(|c| c.contains("UID FETCH 42"))
        .collect();
    assert_eq!(fetches.len(), 3);
    assert!(fetches[0].ends_with("UID FETCH 42 (UID RFC822.SIZE BODY[]<0.250000>)"));
    assert!(fetches[1].ends_with("UID FETCH 42 (UID RFC822.SIZE BODY[]<250000.250000>)"));
    assert!(fetches[2].ends_with("UID FETCH 42 (UID RFC822.SIZE BODY[]<500000.250000>)"));

    assert_eq!(sinks_impl.data_bytes.load(Ordering::SeqCst), 750_000);
    assert!(sinks_impl.has_event("NormalEnd:42:750000"));
}

// === S2: flag diff via CONDSTORE ===

#[tokio::test]
async fn s2_changedsince_resync_without_full_refetch() {
    let server =
        ScriptedServer::new("* OK [CAPABILITY IMAP4rev1 ENABLE CONDSTORE AUTH=PLAIN] ready");
    let sinks_impl = Arc::new(TestSinks::default());
    *sinks_impl.password.lock().unwrap() = Some("pw".to_string());
    let sinks = sinks_impl.bundle();

    server.expect("AUTHENTICATE PLAIN", &["{TAG} OK authenticated"]);
    server.expect("ENABLE CONDSTORE", &["* ENABLED CONDSTORE", "{TAG} OK enabled"]);
    let mut conn = establish(&server, chunked_config(), &sinks).await;
    assert!(conn.condstore_enabled());

    server.expect(
        "SELECT INBOX",
        &[
            "* FLAGS (\\Seen \\Deleted)",
            "* 101 EXISTS",
            "* OK [UIDVALIDITY 7] ok",
            "* OK [UIDNEXT 102] ok",
            "* OK [HIGHESTMODSEQ 5200] ok",
            "{TAG} OK [READ-WRITE] done",
        ],
    );
    server.expect(
        "UID FETCH 1:* (FLAGS) (CHANGEDSINCE 5000)",
        &[
            "* 101 FETCH (UID 101 FLAGS (\\Seen) MODSEQ (5200))",
            "{TAG} OK resync done",
        ],
    );

    let mut persist = FolderSyncState {
        highest_mod_seq: 5000,
        highest_uid: 100,
        total_messages: 100,
        uid_validity: 7,
        num_deleted: 0,
    };
    sel_ops::select_mailbox(&mut conn, &sinks, "INBOX", false, &mut persist)
        .await
        .unwrap();

    assert_eq!(server.unmet_rules(), 0);
    // No full resync was issued: exactly one UID FETCH, the CHANGEDSINCE one.
    let fetches: Vec<String> = server
        .commands()
        .into_iter()
        .filter(|c| c.contains("UID FETCH"))
        .collect();
    assert_eq!(fetches.len(), 1);
    assert!(fetches[0].contains("(CHANGEDSINCE 5000)"));

    assert_eq!(persist.total_messages, 101);
    assert_eq!(persist.highest_uid, 101);
    assert_eq!(persist.highest_mod_seq, 5200);
}

// === S3: silent expunge detection ===

#[tokio::test]
async fn s3_expunge_sanity_forces_full_resync() {
    let server =
        ScriptedServer::new("* OK [CAPABILITY IMAP4rev1 ENABLE CONDSTORE AUTH=PLAIN] ready");
    let sinks_impl = Arc::new(TestSinks::default());
    *sinks_impl.password.lock().unwrap() = Some("pw".to_string());
    let sinks = sinks_impl.bundle();

    server.expect("AUTHENTICATE PLAIN", &["{TAG} OK authenticated"]);
    server.expect("ENABLE CONDSTORE", &["* ENABLED CONDSTORE", "{TAG} OK enabled"]);
    let mut conn = establish(&server, chunked_config(), &sinks).await;

    server.expect(
        "SELECT INBOX",
        &[
            "* FLAGS (\\Seen \\Deleted)",
            "* 99 EXISTS",
            "* OK [UIDVALIDITY 7] ok",
            "* OK [HIGHESTMODSEQ 5200] ok",
            "{TAG} OK done",
        ],
    );
    server.expect(
        "(CHANGEDSINCE 5000)",
        &[
            "* 99 FETCH (UID 101 FLAGS (\\Seen) MODSEQ (5200))",
            "{TAG} OK resync done",
        ],
    );
    // Sanity check fails (1 new UID vs delta -1): a full resync follows.
    server.expect(
        "UID FETCH 1:* (FLAGS)",
        &[
            "* 1 FETCH (UID 3 FLAGS (\\Seen))",
            "* 99 FETCH (UID 101 FLAGS (\\Seen))",
            "{TAG} OK full done",
        ],
    );

    let mut persist = FolderSyncState {
        highest_mod_seq: 5000,
        highest_uid: 100,
        total_messages: 100,
        uid_validity: 7,
        num_deleted: 0,
    };
    sel_ops::select_mailbox(&mut conn, &sinks, "INBOX", false, &mut persist)
        .await
        .unwrap();

    assert_eq!(server.unmet_rules(), 0);
    let fetches: Vec<String> = server
        .commands()
        .into_iter()
        .filter(|c| c.contains("UID FETCH 1:* (FLAGS)"))
        .collect();
    assert_eq!(fetches.len(), 2, "changedsince then full resync");
    assert!(fetches[0].contains("CHANGEDSINCE"));
    assert!(!fetches[1].contains("CHANGEDSINCE"));
}

// === S4: Gmail shift-delete to trash ===

#[tokio::test]
async fn s4_gmail_delete_goes_through_trash() {
    let server = ScriptedServer::new(
        "* OK [CAPABILITY IMAP4rev1 X-GM-EXT-1 UIDPLUS AUTH=PLAIN] Gimap ready",
    );
    let sinks_impl = Arc::new(TestSinks::default());
    *sinks_impl.password.lock().unwrap() = Some("pw".to_string());
    let sinks = sinks_impl.bundle();

    let mut config = chunked_config();
    config.expunge_after_delete = true;
    config.trash_folder_path = "[Gmail]/Trash".to_string();

    server.expect("AUTHENTICATE PLAIN", &["{TAG} OK authenticated"]);
    let mut conn = establish(&server, config, &sinks).await;

    let registry = HostRegistry::new();
    let server_key = "mail.example.com:993";
    registry.set_trash_discovered(server_key);

    // ensure_selected: full select of All Mail plus its resync.
    select_rules(&server, "\"[Gmail]/All Mail\"", 9, 15);
    server.expect(
        "UID FETCH 1:* (FLAGS)",
        &["* 1 FETCH (UID 4 FLAGS (\\Seen))", "{TAG} OK done"],
    );
    // The trash interaction proper.
    server.expect(
        "UID COPY 4,7,9 \"[Gmail]/Trash\"",
        &["{TAG} OK [COPYUID 15 4,7,9 91:93] copy done"],
    );
    select_rules(&server, "\"[Gmail]/Trash\"", 3, 15);
    server.expect(
        "UID STORE 91:93 +FLAGS (\\Deleted)",
        &["{TAG} OK store done"],
    );
    server.expect("UID EXPUNGE 91:93", &["{TAG} OK expunged"]);
    select_rules(&server, "\"[Gmail]/All Mail\"", 6, 15);

    let url = ImapUrl::parse(
        "imap://user@mail.example.com/addmsgflags>UID>/%5BGmail%5D/All%20Mail>4,7,9>8",
    )
    .unwrap();
    let store = FolderStateStore::new();
    let cache = MemoryCache::new();
    let clock = MockClock::new();
    let status = run_url(&mut conn, &url, &sinks, &registry, &store, &cache, &clock).await;

    assert_eq!(status, UrlStatus::Ok);
    assert_eq!(server.unmet_rules(), 0);

    let commands = server.commands();
    // Lite-selects of Trash and the reselect of the origin do not run a
    // mailbox update: exactly one flag resync happened (the first SELECT).
    let resyncs = commands
        .iter()
        .filter(|c| c.contains("UID FETCH 1:* (FLAGS)"))
        .count();
    assert_eq!(resyncs, 1);
    assert!(sinks_impl.has_event("CopyResponseUid:91:93"));
    assert_eq!(sinks_impl.starts.load(Ordering::SeqCst), 1);
    assert_eq!(sinks_impl.stops.load(Ordering::SeqCst), 1);
}

// === S5: auth fallback ===

#[tokio::test]
async fn s5_auth_falls_back_without_prompting() {
    let server = ScriptedServer::new(
        "* OK [CAPABILITY IMAP4rev1 ID ENABLE CONDSTORE AUTH=PLAIN AUTH=LOGIN AUTH=CRAM-MD5] ready",
    );
    let sinks_impl = Arc::new(TestSinks::default());
    *sinks_impl.password.lock().unwrap() = Some("pw".to_string());
    *sinks_impl.username.lock().unwrap() = "user".to_string();
    *sinks_impl.cram_digest.lock().unwrap() = Some("cafebabe".to_string());
    sinks_impl.panic_on_prompt.store(true, Ordering::SeqCst);
    let sinks = sinks_impl.bundle();

    server.expect("AUTHENTICATE CRAM-MD5", &["+ PDEyMzQ1QGV4YW1wbGUuY29tPg=="]);
    // The digest line comes next; answer it with the failure.
    server.expect("", &["{TAG} NO [AUTHENTICATIONFAILED] bad credentials"]);
    server.expect("AUTHENTICATE PLAIN", &["{TAG} OK authenticated"]);
    server.expect("ID (", &["* ID (\"name\" \"TestServer\")", "{TAG} OK id done"]);
    server.expect("ENABLE CONDSTORE", &["* ENABLED CONDSTORE", "{TAG} OK enabled"]);

    let conn = establish(&server, chunked_config(), &sinks).await;
    assert_eq!(conn.state(), ConnectionState::Authenticated);
    assert_eq!(server.unmet_rules(), 0);

    // Post-auth setup ran in fixed order after the successful PLAIN.
    let commands = server.commands();
    let plain_at = commands
        .iter()
        .position(|c| c.contains("AUTHENTICATE PLAIN"))
        .unwrap();
    let id_at = commands.iter().position(|c| c.contains("ID (")).unwrap();
    let enable_at = commands
        .iter()
        .position(|c| c.contains("ENABLE CONDSTORE"))
        .unwrap();
    let cram_at = commands
        .iter()
        .position(|c| c.contains("AUTHENTICATE CRAM-MD5"))
        .unwrap();
    assert!(cram_at < plain_at);
    assert!(plain_at < id_at);
    assert!(id_at < enable_at);
}

#[tokio::test]
async fn auth_unavailable_stops_immediately() {
    let server =
        ScriptedServer::new("* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN AUTH=LOGIN] ready");
    let sinks_impl = Arc::new(TestSinks::default());
    *sinks_impl.password.lock().unwrap() = Some("pw".to_string());
    let sinks = sinks_impl.bundle();

    server.expect(
        "AUTHENTICATE PLAIN",
        &["{TAG} NO [UNAVAILABLE] Too many simultaneous connections"],
    );

    let registry = HostRegistry::new();
    let mut conn = Connection::from_stream(server.clone(), Arc::new(chunked_config()));
    let err = establish_plain(&mut conn, &sinks, &registry)
        .await
        .unwrap_err();
    match err {
        Error::AuthUnavailable(text) => {
            assert!(text.contains("Too many simultaneous connections"));
        }
        other => panic!("expected AuthUnavailable, got {other:?}"),
    }
    // No fallback to AUTH=LOGIN happened.
    assert!(
        !server
            .commands()
            .iter()
            .any(|c| c.contains("AUTHENTICATE LOGIN"))
    );
}

// === S6: pseudo-interrupt mid-body ===

#[tokio::test]
async fn s6_pseudo_interrupt_aborts_and_dooms() {
    let server = ScriptedServer::new("* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready");
    let sinks_impl = Arc::new(TestSinks::default());
    *sinks_impl.password.lock().unwrap() = Some("pw".to_string());
    let sinks = sinks_impl.bundle();

    server.expect("AUTHENTICATE PLAIN", &["{TAG} OK authenticated"]);
    let mut conn = establish(&server, chunked_config(), &sinks).await;

    select_rules(&server, "INBOX", 1, 7);
    server.expect(
        "UID FETCH 1:* (FLAGS)",
        &["* 1 FETCH (UID 42 FLAGS ())", "{TAG} OK done"],
    );
    let mut persist = FolderSyncState::default();
    sel_ops::select_mailbox(&mut conn, &sinks, "INBOX", false, &mut persist)
        .await
        .unwrap();

    // Interrupt after the second data delivery.
    *sinks_impl.interrupt.lock().unwrap() = Some((conn.interrupt_handle(), 2));

    for offset in [0u32, 250_000] {
        server.expect_raw(&format!("BODY[]<{offset}.250000>"), {
            let mut responses = body_chunk_response(42, 750_000, offset, 250_000);
            responses.push(b"{TAG} OK FETCH done".to_vec());
            responses
        });
    }

    let cache = MemoryCache::new();
    let writer = cache.open_writer("entry").unwrap();

    let url = ImapUrl::parse("imap://user@mail.example.com/fetch>UID>/INBOX>42").unwrap();
    let clock = MockClock::new();
    let outcome = sel_ops::fetch_message_body(
        &mut conn,
        &sinks,
        &url,
        42,
        750_000,
        false,
        Some(writer),
        &clock,
    )
    .await
    .unwrap();

    assert_eq!(outcome, sel_ops::BodyFetchOutcome::Aborted);
    // No third chunk command was sent.
    let fetches = server
        .commands()
        .into_iter()
        .filter(|c| c.contains("UID FETCH 42"))
        .count();
    assert_eq!(fetches, 2);
    // The partial download was discarded and the cache entry doomed.
    assert!(sinks_impl.has_event("AbortMsgWriteStream"));
    assert!(!sinks_impl.has_event("NormalEnd"));
    assert_eq!(
        cache.lookup("entry"),
        petrel_imap::CacheLookup::Miss
    );
    assert!(cache.open_writer("entry").is_none());
    // The connection stays selected and usable.
    assert_eq!(conn.state(), ConnectionState::Selected);
}

// === Per-chunk retry ===

#[tokio::test]
async fn chunk_failure_is_retried_once() {
    let server = ScriptedServer::new("* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready");
    let sinks_impl = Arc::new(TestSinks::default());
    *sinks_impl.password.lock().unwrap() = Some("pw".to_string());
    let sinks = sinks_impl.bundle();

    server.expect("AUTHENTICATE PLAIN", &["{TAG} OK authenticated"]);
    let mut conn = establish(&server, chunked_config(), &sinks).await;

    select_rules(&server, "INBOX", 1, 7);
    server.expect(
        "UID FETCH 1:* (FLAGS)",
        &["* 1 FETCH (UID 42 FLAGS (\\Seen))", "{TAG} OK done"],
    );
    let mut persist = FolderSyncState::default();
    sel_ops::select_mailbox(&mut conn, &sinks, "INBOX", false, &mut persist)
        .await
        .unwrap();

    // The first chunk fails once, succeeds on the retry; the rest of
    // the download continues normally.
    server.expect("BODY[]<0.250000>", &["{TAG} NO temporary failure"]);
    for offset in [0u32, 250_000, 500_000] {
        server.expect_raw(&format!("BODY[]<{offset}.250000>"), {
            let mut responses = body_chunk_response(42, 750_000, offset, 250_000);
            responses.push(b"{TAG} OK FETCH done".to_vec());
            responses
        });
    }

    let url = ImapUrl::parse("imap://user@mail.example.com/fetch>UID>/INBOX>42").unwrap();
    let clock = MockClock::new();
    let outcome = sel_ops::fetch_message_body(
        &mut conn, &sinks, &url, 42, 750_000, false, None, &clock,
    )
    .await
    .unwrap();

    assert_eq!(outcome, sel_ops::BodyFetchOutcome::Complete);
    assert_eq!(server.unmet_rules(), 0);
    let fetches = server
        .commands()
        .into_iter()
        .filter(|c| c.contains("UID FETCH 42"))
        .count();
    assert_eq!(fetches, 4, "failed chunk plus its retry plus two more");
    assert_eq!(sinks_impl.data_bytes.load(Ordering::SeqCst), 750_000);
    assert!(sinks_impl.has_event("NormalEnd:42:750000"));
}

#[tokio::test]
async fn second_chunk_failure_aborts_and_dooms() {
    let server = ScriptedServer::new("* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready");
    let sinks_impl = Arc::new(TestSinks::default());
    *sinks_impl.password.lock().unwrap() = Some("pw".to_string());
    let sinks = sinks_impl.bundle();

    server.expect("AUTHENTICATE PLAIN", &["{TAG} OK authenticated"]);
    let mut conn = establish(&server, chunked_config(), &sinks).await;

    select_rules(&server, "INBOX", 1, 7);
    server.expect(
        "UID FETCH 1:* (FLAGS)",
        &["* 1 FETCH (UID 42 FLAGS (\\Seen))", "{TAG} OK done"],
    );
    let mut persist = FolderSyncState::default();
    sel_ops::select_mailbox(&mut conn, &sinks, "INBOX", false, &mut persist)
        .await
        .unwrap();

    // Both the chunk and its single retry fail: the download aborts and
    // the URL carries the error.
    server.expect("BODY[]<0.250000>", &["{TAG} NO broken"]);
    server.expect("BODY[]<0.250000>", &["{TAG} NO still broken"]);

    let cache = MemoryCache::new();
    let writer = cache.open_writer("entry").unwrap();

    let url = ImapUrl::parse("imap://user@mail.example.com/fetch>UID>/INBOX>42").unwrap();
    let clock = MockClock::new();
    let err = sel_ops::fetch_message_body(
        &mut conn,
        &sinks,
        &url,
        42,
        750_000,
        false,
        Some(writer),
        &clock,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::No { .. }));
    assert_eq!(server.unmet_rules(), 0);
    // The partial download was discarded and the cache entry doomed, so
    // waiting readers settle on a miss instead of wedging.
    assert!(sinks_impl.has_event("AbortMsgWriteStream"));
    assert!(!sinks_impl.has_event("NormalEnd"));
    assert_eq!(cache.lookup("entry"), petrel_imap::CacheLookup::Miss);
}

// === Universal invariants ===

#[tokio::test]
async fn run_url_delivers_exactly_one_start_stop_pair() {
    let server = ScriptedServer::new("* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready");
    let sinks_impl = Arc::new(TestSinks::default());
    *sinks_impl.password.lock().unwrap() = Some("pw".to_string());
    let sinks = sinks_impl.bundle();

    server.expect("AUTHENTICATE PLAIN", &["{TAG} OK authenticated"]);
    let mut conn = establish(&server, chunked_config(), &sinks).await;

    select_rules(&server, "INBOX", 1, 7);
    server.expect(
        "UID FETCH 1:* (FLAGS)",
        &["* 1 FETCH (UID 5 FLAGS (\\Seen))", "{TAG} OK done"],
    );

    let url = ImapUrl::parse("imap://user@mail.example.com/select>/INBOX").unwrap();
    let registry = HostRegistry::new();
    let store = FolderStateStore::new();
    let cache = MemoryCache::new();
    let clock = MockClock::new();
    let status = run_url(&mut conn, &url, &sinks, &registry, &store, &cache, &clock).await;

    assert_eq!(status, UrlStatus::Ok);
    assert_eq!(sinks_impl.starts.load(Ordering::SeqCst), 1);
    assert_eq!(sinks_impl.stops.load(Ordering::SeqCst), 1);

    let events = sinks_impl.events();
    let start_at = events.iter().position(|e| e == "OnStartRequest").unwrap();
    let stop_at = events
        .iter()
        .position(|e| e.starts_with("OnStopRequest"))
        .unwrap();
    assert!(start_at < stop_at);
}

#[tokio::test]
async fn failed_url_still_delivers_stop_with_status() {
    let server = ScriptedServer::new("* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready");
    let sinks_impl = Arc::new(TestSinks::default());
    *sinks_impl.password.lock().unwrap() = Some("pw".to_string());
    let sinks = sinks_impl.bundle();

    server.expect("AUTHENTICATE PLAIN", &["{TAG} OK authenticated"]);
    let mut conn = establish(&server, chunked_config(), &sinks).await;

    server.expect("SELECT Missing", &["{TAG} NO no such mailbox"]);

    let url = ImapUrl::parse("imap://user@mail.example.com/select>/Missing").unwrap();
    let registry = HostRegistry::new();
    let store = FolderStateStore::new();
    let cache = MemoryCache::new();
    let clock = MockClock::new();
    let status = run_url(&mut conn, &url, &sinks, &registry, &store, &cache, &clock).await;

    assert_eq!(status, UrlStatus::ProtocolCommandFailed);
    assert_eq!(sinks_impl.starts.load(Ordering::SeqCst), 1);
    assert_eq!(sinks_impl.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn uidvalidity_change_discards_folder_state() {
    let server = ScriptedServer::new("* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN] ready");
    let sinks_impl = Arc::new(TestSinks::default());
    *sinks_impl.password.lock().unwrap() = Some("pw".to_string());
    let sinks = sinks_impl.bundle();

    server.expect("AUTHENTICATE PLAIN", &["{TAG} OK authenticated"]);
    let mut conn = establish(&server, chunked_config(), &sinks).await;

    // The server renumbered: UIDVALIDITY 8 instead of the stored 7.
    select_rules(&server, "INBOX", 5, 8);
    server.expect(
        "UID FETCH 1:* (FLAGS)",
        &["* 1 FETCH (UID 1 FLAGS (\\Seen))", "{TAG} OK done"],
    );

    let mut persist = FolderSyncState {
        highest_mod_seq: 9000,
        highest_uid: 500,
        total_messages: 500,
        uid_validity: 7,
        num_deleted: 3,
    };
    sel_ops::select_mailbox(&mut conn, &sinks, "INBOX", false, &mut persist)
        .await
        .unwrap();

    // The old epoch's state is gone and the resync was a full one.
    assert_eq!(persist.uid_validity, 8);
    assert_eq!(persist.highest_uid, 1);
    assert!(
        server
            .commands()
            .iter()
            .any(|c| c.ends_with("UID FETCH 1:* (FLAGS)"))
    );
}

// === UID set wire-form property ===

mod uid_set_properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn uid_sets_serialize_in_minimal_ascending_form(
            mut uids in proptest::collection::vec(1u32..10_000, 1..50)
        ) {
            uids.sort_unstable();
            let set = UidSet::from_uids(uids.clone());
            let rendered = set.to_string();

            // Parse the rendered form back and compare contents.
            let reparsed = UidSet::parse(&rendered).unwrap();
            uids.dedup();
            let expected: Vec<u32> = uids;
            let actual: Vec<u32> = reparsed.iter().collect();
            prop_assert_eq!(expected, actual);

            // Ascending invariant: for adjacent tokens a and b,
            // upper(a) < lower(b).
            let mut last_upper = 0u32;
            for token in rendered.split(',') {
                let (lo, hi) = match token.split_once(':') {
                    Some((lo, hi)) => (lo.parse::<u32>().unwrap(), hi.parse::<u32>().unwrap()),
                    None => {
                        let v = token.parse::<u32>().unwrap();
                        (v, v)
                    }
                };
                prop_assert!(lo <= hi);
                prop_assert!(last_upper < lo);
                last_upper = hi;
            }
        }
    }
}
