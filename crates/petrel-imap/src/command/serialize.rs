//! Command serialization helpers.
//!
//! Commands serialize into a chunk stream: text runs interleaved with
//! literal payloads. The engine renders literal markers (`{N}` or `{N+}`)
//! according to the negotiated capabilities, so nothing here depends on
//! LITERAL+.

use super::types::{FetchAttribute, SearchCriteria, StoreAction};

/// Arguments longer than this go out as literals even when quotable.
pub const LITERAL_THRESHOLD: usize = 1024;

/// One piece of a serialized command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandChunk {
    /// Plain command text (no CRLF except the trailing terminator).
    Text(Vec<u8>),
    /// A literal payload the engine must frame with `{N}`.
    Literal(Vec<u8>),
}

/// Incremental chunk-stream writer.
pub struct CommandWriter {
    utf8_accept: bool,
    chunks: Vec<CommandChunk>,
    cur: Vec<u8>,
}

impl CommandWriter {
    /// Creates a writer. `utf8_accept` controls whether 8-bit arguments
    /// may travel quoted instead of as literals.
    #[must_use]
    pub const fn new(utf8_accept: bool) -> Self {
        Self {
            utf8_accept,
            chunks: Vec::new(),
            cur: Vec::new(),
        }
    }

    /// Appends raw command text.
    pub fn raw(&mut self, bytes: &[u8]) {
        self.cur.extend_from_slice(bytes);
    }

    /// Appends a single space.
    pub fn space(&mut self) {
        self.cur.push(b' ');
    }

    /// Appends an astring: atom when clean, quoted when quotable,
    /// literal otherwise.
    pub fn astring(&mut self, s: &str) {
        if needs_literal(s, self.utf8_accept) {
            self.literal(s.as_bytes().to_vec());
        } else if s.is_empty() || s.bytes().any(needs_quoting) {
            self.cur.push(b'"');
            for b in s.bytes() {
                if b == b'"' || b == b'\\' {
                    self.cur.push(b'\\');
                }
                self.cur.push(b);
            }
            self.cur.push(b'"');
        } else {
            self.cur.extend_from_slice(s.as_bytes());
        }
    }

    /// Appends a literal payload, flushing the current text run.
    pub fn literal(&mut self, data: Vec<u8>) {
        self.chunks.push(CommandChunk::Text(std::mem::take(&mut self.cur)));
        self.chunks.push(CommandChunk::Literal(data));
    }

    /// Finishes the stream. The trailing CRLF is the engine's to write.
    #[must_use]
    pub fn finish(mut self) -> Vec<CommandChunk> {
        if !self.cur.is_empty() || self.chunks.is_empty() {
            self.chunks.push(CommandChunk::Text(self.cur));
        }
        self.chunks
    }
}

/// Returns true if the byte forces quoting inside an astring.
const fn needs_quoting(b: u8) -> bool {
    matches!(b, b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*') || b < 0x20 || b == 0x7F
}

/// Returns true if the argument must travel as a literal: NUL/CR/LF
/// always, 8-bit without UTF8=ACCEPT, or oversized arguments.
fn needs_literal(s: &str, utf8_accept: bool) -> bool {
    s.len() > LITERAL_THRESHOLD
        || s.bytes()
            .any(|b| b == 0 || b == b'\r' || b == b'\n' || (!utf8_accept && b >= 0x80))
}

/// Writes a parenthesized FETCH attribute list.
pub fn write_fetch_attributes(w: &mut CommandWriter, attrs: &[FetchAttribute]) {
    w.raw(b"(");
    for (i, attr) in attrs.iter().enumerate() {
        if i > 0 {
            w.space();
        }
        write_fetch_attribute(w, attr);
    }
    w.raw(b")");
}

fn write_fetch_attribute(w: &mut CommandWriter, attr: &FetchAttribute) {
    match attr {
        FetchAttribute::Flags => w.raw(b"FLAGS"),
        FetchAttribute::InternalDate => w.raw(b"INTERNALDATE"),
        FetchAttribute::Rfc822Size => w.raw(b"RFC822.SIZE"),
        FetchAttribute::Envelope => w.raw(b"ENVELOPE"),
        FetchAttribute::Uid => w.raw(b"UID"),
        FetchAttribute::ModSeq => w.raw(b"MODSEQ"),
        FetchAttribute::Custom(s) => w.raw(s.as_bytes()),
        FetchAttribute::GmMsgId => w.raw(b"X-GM-MSGID"),
        FetchAttribute::GmThrId => w.raw(b"X-GM-THRID"),
        FetchAttribute::GmLabels => w.raw(b"X-GM-LABELS"),
        FetchAttribute::Body {
            section,
            peek,
            partial,
        } => {
            if *peek {
                w.raw(b"BODY.PEEK[");
            } else {
                w.raw(b"BODY[");
            }
            if let Some(s) = section {
                w.raw(s.as_bytes());
            }
            w.raw(b"]");
            if let Some((start, len)) = partial {
                w.raw(format!("<{start}.{len}>").as_bytes());
            }
        }
    }
}

/// Writes a STORE action with optional `.SILENT`.
pub fn write_store_action(w: &mut CommandWriter, action: &StoreAction, silent: bool) {
    let prefix = match action {
        StoreAction::SetFlags(_) => "FLAGS",
        StoreAction::AddFlags(_) => "+FLAGS",
        StoreAction::RemoveFlags(_) => "-FLAGS",
    };
    w.raw(prefix.as_bytes());
    if silent {
        w.raw(b".SILENT");
    }
    w.raw(b" (");
    let mut first = true;
    for flag in action.flags().iter() {
        if !first {
            w.space();
        }
        w.raw(flag.as_str().as_bytes());
        first = false;
    }
    w.raw(b")");
}

/// Writes SEARCH criteria.
pub fn write_search_criteria(w: &mut CommandWriter, criteria: &SearchCriteria) {
    match criteria {
        SearchCriteria::All => w.raw(b"ALL"),
        SearchCriteria::Deleted => w.raw(b"DELETED"),
        SearchCriteria::Undeleted => w.raw(b"UNDELETED"),
        SearchCriteria::Unseen => w.raw(b"UNSEEN"),
        SearchCriteria::Uid(set) => {
            w.raw(b"UID ");
            w.raw(set.to_string().as_bytes());
        }
        SearchCriteria::Header(name, value) => {
            w.raw(b"HEADER ");
            w.astring(name);
            w.space();
            w.astring(value);
        }
        SearchCriteria::Raw(s) => w.raw(s.as_bytes()),
        SearchCriteria::And(parts) => {
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    w.space();
                }
                write_search_criteria(w, part);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn text_of(chunks: &[CommandChunk]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            match chunk {
                CommandChunk::Text(t) => out.extend_from_slice(t),
                CommandChunk::Literal(l) => {
                    out.extend_from_slice(b"<LIT:");
                    out.extend_from_slice(l);
                    out.extend_from_slice(b">");
                }
            }
        }
        out
    }

    #[test]
    fn atom_goes_bare() {
        let mut w = CommandWriter::new(false);
        w.astring("INBOX");
        assert_eq!(text_of(&w.finish()), b"INBOX");
    }

    #[test]
    fn space_forces_quoting() {
        let mut w = CommandWriter::new(false);
        w.astring("pass word");
        assert_eq!(text_of(&w.finish()), b"\"pass word\"");
    }

    #[test]
    fn quote_and_backslash_escaped() {
        let mut w = CommandWriter::new(false);
        w.astring("a\"b\\c");
        assert_eq!(text_of(&w.finish()), b"\"a\\\"b\\\\c\"");
    }

    #[test]
    fn eight_bit_without_utf8_goes_literal() {
        let mut w = CommandWriter::new(false);
        w.astring("café");
        let chunks = w.finish();
        assert!(chunks.iter().any(|c| matches!(c, CommandChunk::Literal(_))));
    }

    #[test]
    fn eight_bit_with_utf8_accept_stays_inline() {
        let mut w = CommandWriter::new(true);
        w.astring("café");
        let chunks = w.finish();
        assert!(!chunks.iter().any(|c| matches!(c, CommandChunk::Literal(_))));
    }

    #[test]
    fn crlf_always_literal() {
        let mut w = CommandWriter::new(true);
        w.astring("line1\r\nline2");
        let chunks = w.finish();
        assert!(matches!(&chunks[1], CommandChunk::Literal(d) if d == b"line1\r\nline2"));
    }

    #[test]
    fn oversized_argument_goes_literal() {
        let mut w = CommandWriter::new(true);
        let big = "x".repeat(LITERAL_THRESHOLD + 1);
        w.astring(&big);
        let chunks = w.finish();
        assert!(chunks.iter().any(|c| matches!(c, CommandChunk::Literal(_))));
    }

    #[test]
    fn store_action_silent() {
        use crate::types::{Flag, Flags};
        let mut w = CommandWriter::new(false);
        write_store_action(
            &mut w,
            &StoreAction::AddFlags(Flags::from_vec(vec![Flag::Deleted, Flag::Seen])),
            true,
        );
        assert_eq!(text_of(&w.finish()), b"+FLAGS.SILENT (\\Seen \\Deleted)");
    }

    #[test]
    fn search_header_criteria() {
        let mut w = CommandWriter::new(false);
        write_search_criteria(
            &mut w,
            &SearchCriteria::And(vec![
                SearchCriteria::Undeleted,
                SearchCriteria::Header("Message-ID".to_string(), "<x@y>".to_string()),
            ]),
        );
        assert_eq!(text_of(&w.finish()), b"UNDELETED HEADER Message-ID <x@y>");
    }
}
