//! IMAP work-item URLs.
//!
//! Every operation the engine runs is described by a URL of the form
//! `imap://user@host[:port]/verb>...` whose path tokenizes on `>`. Folder
//! paths inside URLs are **canonical**: `/` is the universal hierarchy
//! separator, real slashes in mailbox names are escaped as `^`, and real
//! carets are doubled. The first character of a folder token is the
//! server's hierarchy delimiter (or `^` when unknown).

mod action;

pub use action::UrlAction;

use crate::types::UidSet;
use crate::{Error, Result};

/// Sentinel delimiter meaning "unknown, infer from the namespace".
pub const DELIMITER_UNKNOWN: char = '^';

/// A parsed IMAP URL: one unit of work for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapUrl {
    /// Username from the authority.
    pub username: String,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// The operation.
    pub action: UrlAction,
    /// Hierarchy delimiter carried by the URL, `None` when unknown.
    pub delimiter: Option<char>,
    /// Source mailbox, canonical form.
    pub folder: Option<String>,
    /// Destination mailbox, canonical form.
    pub dest_folder: Option<String>,
    /// Raw message-id list (may carry `?part=`/`;section=` suffixes).
    pub ids: Option<String>,
    /// True when the id list holds UIDs rather than sequence numbers.
    pub ids_are_uids: bool,
    /// Flag bits for the flag-store actions (ASCII integer in the URL).
    pub msg_flags: u32,
    /// Custom FETCH attribute (customFetch).
    pub custom_attribute: Option<String>,
    /// Preview byte count (previewBody).
    pub preview_bytes: Option<u32>,
    /// Search criteria string (search).
    pub search_criteria: Option<String>,
    /// Keywords to add (storeCustomKeywords).
    pub custom_add_keywords: Option<String>,
    /// Keywords to subtract (storeCustomKeywords).
    pub custom_subtract_keywords: Option<String>,
    /// The verb text for user-defined message commands.
    pub custom_command: Option<String>,
    /// URL came from an external link; fetch peeks instead of marking read.
    pub external_link: bool,
    /// This run is a retry of a failed URL.
    pub rerunning: bool,
    /// Store the fetched message into the offline store.
    pub store_results_offline: bool,
    /// Serve only from the offline store; never touch the network.
    pub local_fetch_only: bool,
    /// The folder sink has more header batches to hand out.
    pub more_headers_to_download: bool,
}

impl ImapUrl {
    /// Builds the folder-update URL the worker synthesizes when IDLE
    /// reports activity.
    #[must_use]
    pub fn folder_update(username: &str, host: &str, port: u16, folder: &str) -> Self {
        Self {
            username: username.to_string(),
            host: host.to_string(),
            port,
            action: UrlAction::SelectNoop,
            delimiter: None,
            folder: Some(folder.to_string()),
            dest_folder: None,
            ids: None,
            ids_are_uids: false,
            msg_flags: 0,
            custom_attribute: None,
            preview_bytes: None,
            search_criteria: None,
            custom_add_keywords: None,
            custom_subtract_keywords: None,
            custom_command: None,
            external_link: false,
            rerunning: false,
            store_results_offline: false,
            local_fetch_only: false,
            more_headers_to_download: false,
        }
    }

    /// Parses an `imap://` URL string. Unknown verbs are rejected.
    pub fn parse(spec: &str) -> Result<Self> {
        Self::parse_inner(spec, false)
    }

    /// Parses an `imap://` URL whose verb may be a user-defined message
    /// command; the verb text is kept in `custom_command`.
    pub fn parse_msg_command(spec: &str) -> Result<Self> {
        Self::parse_inner(spec, true)
    }

    #[allow(clippy::too_many_lines)]
    fn parse_inner(spec: &str, allow_custom: bool) -> Result<Self> {
        let rest = spec
            .strip_prefix("imap://")
            .ok_or_else(|| Error::UrlSyntax(format!("not an imap URL: {spec}")))?;

        let (authority, path) = rest
            .split_once('/')
            .ok_or_else(|| Error::UrlSyntax("missing path".to_string()))?;

        let (username, hostport) = match authority.rsplit_once('@') {
            Some((user, hp)) => (percent_decode(user), hp),
            None => (String::new(), authority),
        };

        let (host, port) = match hostport.rsplit_once(':') {
            Some((h, p)) => {
                let port = p
                    .parse()
                    .map_err(|_| Error::UrlSyntax(format!("bad port: {p}")))?;
                (h.to_string(), port)
            }
            None => (hostport.to_string(), 143),
        };

        let mut tokens = path.split('>');
        let verb = tokens
            .next()
            .ok_or_else(|| Error::UrlSyntax("missing verb".to_string()))?;
        let action = match UrlAction::parse(verb) {
            Some(action) => action,
            None if allow_custom && !verb.is_empty() => UrlAction::MsgCommand,
            None => return Err(Error::UrlSyntax(format!("unknown verb: {verb}"))),
        };

        let mut url = Self {
            username,
            host,
            port,
            custom_command: match &action {
                UrlAction::MsgCommand => Some(verb.to_string()),
                _ => None,
            },
            action,
            delimiter: None,
            folder: None,
            dest_folder: None,
            ids: None,
            ids_are_uids: false,
            msg_flags: 0,
            custom_attribute: None,
            preview_bytes: None,
            search_criteria: None,
            custom_add_keywords: None,
            custom_subtract_keywords: None,
            external_link: false,
            rerunning: false,
            store_results_offline: false,
            local_fetch_only: false,
            more_headers_to_download: false,
        };

        let mut next = |what: &str| -> Result<String> {
            tokens
                .next()
                .map(percent_decode)
                .ok_or_else(|| Error::UrlSyntax(format!("missing {what} field")))
        };

        let mut uid_choice = |url: &mut Self, next: &mut dyn FnMut(&str) -> Result<String>| {
            next("uid choice").map(|choice| url.ids_are_uids = choice == "UID")
        };

        match url.action {
            UrlAction::Fetch
            | UrlAction::Header
            | UrlAction::DeleteMsg
            | UrlAction::Biff
            | UrlAction::MsgCommand => {
                if !matches!(url.action, UrlAction::Biff) {
                    uid_choice(&mut url, &mut next)?;
                }
                url.folder = Some(folder_token(&mut url.delimiter, &next("folder")?));
                url.ids = Some(next("ids")?);
            }
            UrlAction::CustomFetch => {
                uid_choice(&mut url, &mut next)?;
                url.folder = Some(folder_token(&mut url.delimiter, &next("folder")?));
                url.ids = Some(next("ids")?);
                url.custom_attribute = Some(next("attribute")?);
            }
            UrlAction::PreviewBody => {
                uid_choice(&mut url, &mut next)?;
                url.folder = Some(folder_token(&mut url.delimiter, &next("folder")?));
                url.ids = Some(next("ids")?);
                url.preview_bytes = next("byte count")?.parse().ok();
            }
            UrlAction::UidExpunge => {
                url.ids_are_uids = true;
                url.folder = Some(folder_token(&mut url.delimiter, &next("folder")?));
                url.ids = Some(next("ids")?);
            }
            UrlAction::AddMsgFlags | UrlAction::SubtractMsgFlags | UrlAction::SetMsgFlags => {
                uid_choice(&mut url, &mut next)?;
                url.folder = Some(folder_token(&mut url.delimiter, &next("folder")?));
                url.ids = Some(next("ids")?);
                url.msg_flags = next("flags")?.parse().unwrap_or(0);
            }
            UrlAction::OnlineCopy
            | UrlAction::OnlineMove
            | UrlAction::OnlineToOfflineCopy
            | UrlAction::OnlineToOfflineMove => {
                uid_choice(&mut url, &mut next)?;
                url.folder = Some(folder_token(&mut url.delimiter, &next("folder")?));
                url.ids = Some(next("ids")?);
                url.dest_folder = Some(folder_token(&mut url.delimiter, &next("destination")?));
            }
            UrlAction::OfflineToOnlineCopy => {
                url.dest_folder = Some(folder_token(&mut url.delimiter, &next("destination")?));
            }
            UrlAction::Search => {
                uid_choice(&mut url, &mut next)?;
                url.folder = Some(folder_token(&mut url.delimiter, &next("folder")?));
                url.search_criteria = Some(next("criteria")?);
            }
            UrlAction::Select => {
                url.folder = Some(folder_token(&mut url.delimiter, &next("folder")?));
                url.ids = tokens.next().map(percent_decode);
            }
            UrlAction::LiteSelect
            | UrlAction::SelectNoop
            | UrlAction::Expunge
            | UrlAction::Create
            | UrlAction::EnsureExists
            | UrlAction::DiscoverChildren
            | UrlAction::DeleteFolder
            | UrlAction::DeleteFolderAndMsgs
            | UrlAction::Subscribe
            | UrlAction::Unsubscribe
            | UrlAction::RefreshAcl
            | UrlAction::RefreshFolderUrls
            | UrlAction::ListFolder
            | UrlAction::UpgradeToSubscription
            | UrlAction::FolderStatus
            | UrlAction::DeleteAllMsgs
            | UrlAction::AppendMsgFromFile => {
                url.folder = Some(folder_token(&mut url.delimiter, &next("folder")?));
            }
            UrlAction::AppendDraftFromFile => {
                url.folder = Some(folder_token(&mut url.delimiter, &next("folder")?));
                uid_choice(&mut url, &mut next)?;
                url.ids = tokens.next().map(percent_decode);
            }
            UrlAction::Rename | UrlAction::MoveFolderHierarchy => {
                url.folder = Some(folder_token(&mut url.delimiter, &next("folder")?));
                url.dest_folder = tokens
                    .next()
                    .map(|t| folder_token(&mut url.delimiter, &percent_decode(t)));
            }
            UrlAction::List => {
                url.dest_folder = Some(folder_token(&mut url.delimiter, &next("pattern")?));
            }
            UrlAction::StoreCustomKeywords => {
                uid_choice(&mut url, &mut next)?;
                url.folder = Some(folder_token(&mut url.delimiter, &next("folder")?));
                url.ids = Some(next("ids")?);
                let first = tokens.next().map(percent_decode);
                let second = tokens.next().map(percent_decode);
                match second {
                    Some(sub) => {
                        url.custom_add_keywords = first.filter(|s| !s.is_empty());
                        url.custom_subtract_keywords = Some(sub).filter(|s| !s.is_empty());
                    }
                    None => url.custom_add_keywords = first.filter(|s| !s.is_empty()),
                }
            }
            UrlAction::DiscoverAllBoxes
            | UrlAction::DiscoverAllAndSubscribedBoxes
            | UrlAction::RefreshAllAcls
            | UrlAction::Netscape
            | UrlAction::VerifyLogon => {}
        }

        Ok(url)
    }

    /// The UID/sequence set from the id list, with any MIME-part or
    /// filename suffix stripped.
    #[must_use]
    pub fn id_set(&self) -> Option<UidSet> {
        let ids = self.ids.as_deref()?;
        let bare = ids
            .split(['?', ';'])
            .next()
            .unwrap_or(ids)
            .split('&')
            .next()
            .unwrap_or(ids);
        UidSet::parse(bare)
    }

    /// The MIME part selector (`;section=X.Y` or `?part=X.Y`), if any.
    ///
    /// The engine never fetches an individual section over the wire; this
    /// is consumed by the downstream MIME extractor.
    #[must_use]
    pub fn mime_part(&self) -> Option<String> {
        let ids = self.ids.as_deref()?;
        for marker in ["?part=", "&part=", ";section="] {
            if let Some(idx) = ids.find(marker) {
                let rest = &ids[idx + marker.len()..];
                let end = rest.find(['&', '?', ';']).unwrap_or(rest.len());
                return Some(rest[..end].to_string());
            }
        }
        None
    }

    /// True when the id list carries a MIME part selector.
    #[must_use]
    pub fn mime_part_selected(&self) -> bool {
        self.mime_part().is_some()
    }

    /// The suggested filename (`&filename=...`), if any.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        let ids = self.ids.as_deref()?;
        let idx = ids.find("&filename=")?;
        let rest = &ids[idx + "&filename=".len()..];
        let end = rest.find(['&', '?', ';']).unwrap_or(rest.len());
        Some(percent_decode(&rest[..end]))
    }

    /// Cache key: the URL spec with part/filename parameters stripped.
    /// The caller appends UIDVALIDITY as a key extension.
    #[must_use]
    pub fn cache_key(&self, uid_validity: u32) -> String {
        let mut ids = self.ids.clone().unwrap_or_default();
        for marker in ["?part=", "&part=", "&filename=", ";section="] {
            if let Some(idx) = ids.find(marker) {
                ids.truncate(idx);
            }
        }
        format!(
            "imap://{}@{}:{}/{}>{}>{}|{}",
            self.username,
            self.host,
            self.port,
            self.action.as_verb(),
            self.folder.as_deref().unwrap_or(""),
            ids,
            uid_validity
        )
    }
}

impl std::fmt::Display for ImapUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "imap://{}@{}:{}/{}",
            self.username,
            self.host,
            self.port,
            self.action.as_verb()
        )?;
        if matches!(
            self.action,
            UrlAction::Fetch
                | UrlAction::Header
                | UrlAction::CustomFetch
                | UrlAction::PreviewBody
                | UrlAction::DeleteMsg
                | UrlAction::AddMsgFlags
                | UrlAction::SubtractMsgFlags
                | UrlAction::SetMsgFlags
                | UrlAction::OnlineCopy
                | UrlAction::OnlineMove
                | UrlAction::OnlineToOfflineCopy
                | UrlAction::OnlineToOfflineMove
                | UrlAction::Search
                | UrlAction::MsgCommand
                | UrlAction::StoreCustomKeywords
        ) {
            write!(f, ">{}", if self.ids_are_uids { "UID" } else { "SEQUENCE" })?;
        }
        if let Some(folder) = &self.folder {
            let delim = self.delimiter.unwrap_or(DELIMITER_UNKNOWN);
            write!(f, ">{delim}{}", percent_encode(folder))?;
        }
        if let Some(ids) = &self.ids {
            write!(f, ">{ids}")?;
        }
        if let Some(dest) = &self.dest_folder {
            let delim = self.delimiter.unwrap_or(DELIMITER_UNKNOWN);
            write!(f, ">{delim}{}", percent_encode(dest))?;
        }
        if self.msg_flags != 0 {
            write!(f, ">{}", self.msg_flags)?;
        }
        Ok(())
    }
}

/// Splits a folder token into its leading delimiter and canonical path.
fn folder_token(delimiter: &mut Option<char>, token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(DELIMITER_UNKNOWN) | None => {}
        Some(d) => *delimiter = Some(d),
    }
    chars.as_str().to_string()
}

/// Escapes a server-side name component: `^` doubles, then `/` becomes `^`.
#[must_use]
pub fn escape_slashes(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for c in source.chars() {
        match c {
            '/' => out.push('^'),
            '^' => out.push_str("^^"),
            c => out.push(c),
        }
    }
    out
}

/// Reverts [`escape_slashes`]: `^^` becomes `^`, lone `^` becomes `/`.
#[must_use]
pub fn unescape_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '^' {
            if chars.peek() == Some(&'^') {
                chars.next();
                out.push('^');
            } else {
                out.push('/');
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Converts an online (wire) mailbox name to canonical form.
///
/// When the server delimiter is not `/`, real slashes are escaped first
/// and the delimiter is then rewritten to `/`.
#[must_use]
pub fn canonical_from_online(online: &str, delimiter: char) -> String {
    if delimiter == '/' || delimiter == '\0' {
        online.to_string()
    } else {
        escape_slashes(online)
            .chars()
            .map(|c| if c == delimiter { '/' } else { c })
            .collect()
    }
}

/// Converts a canonical path back to the online (wire) name.
#[must_use]
pub fn online_from_canonical(canonical: &str, delimiter: char) -> String {
    if delimiter == '/' || delimiter == '\0' {
        canonical.to_string()
    } else {
        let replaced: String = canonical
            .chars()
            .map(|c| if c == '/' { delimiter } else { c })
            .collect();
        unescape_slashes(&replaced)
    }
}

/// Produces the wire-form mailbox name for commands: the online name,
/// Modified UTF-7 encoded unless UTF8=ACCEPT is active.
#[must_use]
pub fn wire_name(canonical: &str, delimiter: char, utf8_accept: bool) -> String {
    let online = online_from_canonical(canonical, delimiter);
    if utf8_accept || online.is_ascii() {
        online
    } else {
        utf7_imap::encode_utf7_imap(online)
    }
}

/// Decodes %XX escapes; invalid escapes pass through verbatim.
#[must_use]
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = bytes.get(i + 1..i + 3)
            && let Ok(hex_str) = std::str::from_utf8(hex)
            && let Ok(value) = u8::from_str_radix(hex_str, 16)
        {
            out.push(value);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Encodes characters that cannot travel raw inside a URL token.
#[must_use]
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~' | b'/' | b'^') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
