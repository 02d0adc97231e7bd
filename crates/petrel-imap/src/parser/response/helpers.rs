//! Parser helper functions.

use crate::parser::lexer::{Lexer, Token};
use crate::types::{
    BoxFlags, Capability, Flag, Flags, ListEntry, Namespace, NamespaceKind, ResponseCode, SeqNum,
    Uid, UidSet, UidValidity,
};
use crate::{Error, Result};

use super::types::StatusItem;

/// Parses a bracketed response code.
pub fn parse_response_code(lexer: &mut Lexer<'_>) -> Result<ResponseCode> {
    lexer.expect(Token::LBracket)?;

    let atom = lexer.read_atom_string()?;
    let upper = atom.to_uppercase();

    let code = match upper.as_str() {
        "ALERT" => ResponseCode::Alert,
        "PARSE" => ResponseCode::Parse,
        "READ-ONLY" => ResponseCode::ReadOnly,
        "READ-WRITE" => ResponseCode::ReadWrite,
        "TRYCREATE" => ResponseCode::TryCreate,
        "NOMODSEQ" => ResponseCode::NoModSeq,
        "UNAVAILABLE" => ResponseCode::Unavailable,
        "AUTHENTICATIONFAILED" => ResponseCode::AuthenticationFailed,
        "CLIENTBUG" => ResponseCode::ClientBug,
        "LIMIT" => ResponseCode::Limit,
        "EXPUNGEISSUED" => ResponseCode::ExpungeIssued,
        "UIDNEXT" => {
            lexer.expect_space()?;
            let n = lexer.read_number32()?;
            let uid = Uid::new(n).ok_or_else(|| Error::BadSyntax {
                position: lexer.position(),
                message: "Invalid UIDNEXT 0".to_string(),
            })?;
            ResponseCode::UidNext(uid)
        }
        "UIDVALIDITY" => {
            lexer.expect_space()?;
            let n = lexer.read_number32()?;
            let validity = UidValidity::new(n).ok_or_else(|| Error::BadSyntax {
                position: lexer.position(),
                message: "Invalid UIDVALIDITY 0".to_string(),
            })?;
            ResponseCode::UidValidity(validity)
        }
        "UNSEEN" => {
            lexer.expect_space()?;
            let n = lexer.read_number32()?;
            match SeqNum::new(n) {
                Some(seq) => ResponseCode::Unseen(seq),
                None => ResponseCode::Unknown("UNSEEN".to_string()),
            }
        }
        "HIGHESTMODSEQ" => {
            lexer.expect_space()?;
            ResponseCode::HighestModSeq(lexer.read_number()?)
        }
        "CAPABILITY" => ResponseCode::Capability(parse_capability_data(lexer)?),
        "PERMANENTFLAGS" => {
            lexer.expect_space()?;
            ResponseCode::PermanentFlags(parse_flag_atoms(lexer)?)
        }
        "APPENDUID" => {
            lexer.expect_space()?;
            let v = lexer.read_number32()?;
            lexer.expect_space()?;
            let u = lexer.read_number32()?;
            match (UidValidity::new(v), Uid::new(u)) {
                (Some(uidvalidity), Some(uid)) => ResponseCode::AppendUid { uidvalidity, uid },
                _ => ResponseCode::Unknown("APPENDUID".to_string()),
            }
        }
        "COPYUID" => {
            lexer.expect_space()?;
            let v = lexer.read_number32()?;
            lexer.expect_space()?;
            let source = read_uid_set(lexer)?;
            lexer.expect_space()?;
            let dest = read_uid_set(lexer)?;
            match (UidValidity::new(v), source, dest) {
                (Some(uidvalidity), Some(source), Some(dest)) => ResponseCode::CopyUid {
                    uidvalidity,
                    source,
                    dest,
                },
                _ => ResponseCode::Unknown("COPYUID".to_string()),
            }
        }
        _ => {
            // Unknown code: swallow its arguments.
            while lexer.peek() != Some(b']') && !lexer.is_eof() {
                lexer.advance();
            }
            ResponseCode::Unknown(atom.to_string())
        }
    };

    // Defensive: skip anything left before the closing bracket.
    while lexer.peek() != Some(b']') && !lexer.is_eof() {
        lexer.advance();
    }
    lexer.expect(Token::RBracket)?;

    Ok(code)
}

/// Reads a UID set that may lex as a single number or an atom like `4,7,9`.
fn read_uid_set(lexer: &mut Lexer<'_>) -> Result<Option<UidSet>> {
    match lexer.next_token()? {
        Token::Number(n) => {
            let n = u32::try_from(n).ok().and_then(Uid::new);
            Ok(n.map(UidSet::single))
        }
        Token::Atom(s) => Ok(UidSet::parse(s)),
        token => Err(Error::BadSyntax {
            position: lexer.position(),
            message: format!("Expected UID set, got {token:?}"),
        }),
    }
}

/// Parses capability data (space-separated atoms).
pub fn parse_capability_data(lexer: &mut Lexer<'_>) -> Result<Vec<Capability>> {
    let mut caps = Vec::new();

    while lexer.peek() == Some(b' ') {
        lexer.advance();
        if let Token::Atom(s) = lexer.next_token()? {
            caps.push(Capability::parse(s));
        }
    }

    Ok(caps)
}

/// Parses a parenthesized flag list into a `Flags` collection.
pub fn parse_flag_list(lexer: &mut Lexer<'_>) -> Result<Flags> {
    let atoms = parse_flag_atoms(lexer)?;
    let mut flags = Flags::new();
    for atom in &atoms {
        if atom != "\\*" {
            flags.insert(Flag::parse(atom));
        }
    }
    Ok(flags)
}

/// Parses a parenthesized flag list into raw atoms, keeping `\*`.
pub fn parse_flag_atoms(lexer: &mut Lexer<'_>) -> Result<Vec<String>> {
    lexer.expect(Token::LParen)?;

    let mut atoms = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => {}
            Token::Atom(s) => {
                // `\*` lexes as the atom `\` followed by an asterisk.
                if s == "\\" && lexer.peek() == Some(b'*') {
                    lexer.advance();
                    atoms.push("\\*".to_string());
                } else {
                    atoms.push(s.to_string());
                }
            }
            token => {
                return Err(Error::BadSyntax {
                    position: lexer.position(),
                    message: format!("Unexpected token in flag list: {token:?}"),
                });
            }
        }
    }

    Ok(atoms)
}

/// Parses a LIST/LSUB/XLIST response body (after the keyword).
pub fn parse_list_entry(lexer: &mut Lexer<'_>, from_lsub: bool) -> Result<ListEntry> {
    lexer.expect(Token::LParen)?;
    let mut flags = BoxFlags::default();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => {}
            Token::Atom(s) => flags.insert(BoxFlags::parse_attribute(s)),
            token => {
                return Err(Error::BadSyntax {
                    position: lexer.position(),
                    message: format!("Unexpected token in LIST attributes: {token:?}"),
                });
            }
        }
    }

    lexer.expect_space()?;

    let delimiter = match lexer.next_token()? {
        Token::Nil => None,
        Token::QuotedString(s) => s.chars().next(),
        token => {
            return Err(Error::BadSyntax {
                position: lexer.position(),
                message: format!("Expected delimiter, got {token:?}"),
            });
        }
    };

    lexer.expect_space()?;

    let name = lexer.read_astring()?;

    Ok(ListEntry {
        name,
        delimiter,
        flags,
        from_lsub,
    })
}

/// Parses a SEARCH response (space-separated numbers).
pub fn parse_search_response(lexer: &mut Lexer<'_>) -> Result<Vec<u32>> {
    let mut nums = Vec::new();

    while lexer.peek() == Some(b' ') {
        lexer.advance();
        if let Token::Number(n) = lexer.next_token()?
            && let Ok(n) = u32::try_from(n)
        {
            nums.push(n);
        }
    }

    Ok(nums)
}

/// Parses a STATUS response.
pub fn parse_status_response(lexer: &mut Lexer<'_>) -> Result<(String, Vec<StatusItem>)> {
    let mailbox = lexer.read_astring()?;
    lexer.expect_space()?;
    lexer.expect(Token::LParen)?;

    let mut items = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => {}
            Token::Atom(name) => {
                lexer.expect_space()?;
                let value = lexer.read_number()?;
                let value32 = u32::try_from(value).unwrap_or(u32::MAX);

                let item = match name.to_uppercase().as_str() {
                    "MESSAGES" => StatusItem::Messages(value32),
                    "RECENT" => StatusItem::Recent(value32),
                    "UIDNEXT" => match Uid::new(value32) {
                        Some(uid) => StatusItem::UidNext(uid),
                        None => continue,
                    },
                    "UIDVALIDITY" => match UidValidity::new(value32) {
                        Some(v) => StatusItem::UidValidity(v),
                        None => continue,
                    },
                    "UNSEEN" => StatusItem::Unseen(value32),
                    "HIGHESTMODSEQ" => StatusItem::HighestModSeq(value),
                    _ => continue,
                };
                items.push(item);
            }
            _ => {}
        }
    }

    Ok((mailbox, items))
}

/// Parses one NAMESPACE list: NIL or `((prefix delim) ...)`.
fn parse_namespace_list(lexer: &mut Lexer<'_>, kind: NamespaceKind) -> Result<Vec<Namespace>> {
    match lexer.next_token()? {
        Token::Nil => Ok(Vec::new()),
        Token::LParen => {
            let mut out = Vec::new();
            loop {
                match lexer.peek() {
                    Some(b')') => {
                        lexer.advance();
                        break;
                    }
                    Some(b' ') => {
                        lexer.advance();
                    }
                    Some(b'(') => {
                        lexer.advance();
                        let prefix = lexer.read_astring()?;
                        lexer.expect_space()?;
                        let delimiter = match lexer.next_token()? {
                            Token::Nil => None,
                            Token::QuotedString(s) => s.chars().next(),
                            token => {
                                return Err(Error::BadSyntax {
                                    position: lexer.position(),
                                    message: format!("Expected namespace delimiter, got {token:?}"),
                                });
                            }
                        };
                        // Skip namespace response extensions up to the
                        // closing paren of this entry.
                        let mut depth = 0usize;
                        loop {
                            match lexer.peek() {
                                Some(b'(') => {
                                    depth += 1;
                                    lexer.advance();
                                }
                                Some(b')') => {
                                    lexer.advance();
                                    if depth == 0 {
                                        break;
                                    }
                                    depth -= 1;
                                }
                                Some(_) => {
                                    lexer.advance();
                                }
                                None => break,
                            }
                        }
                        out.push(Namespace {
                            prefix,
                            delimiter,
                            kind,
                        });
                    }
                    _ => break,
                }
            }
            Ok(out)
        }
        token => Err(Error::BadSyntax {
            position: lexer.position(),
            message: format!("Expected namespace list, got {token:?}"),
        }),
    }
}

/// Parses a NAMESPACE response body (three lists).
pub fn parse_namespace_response(
    lexer: &mut Lexer<'_>,
) -> Result<(Vec<Namespace>, Vec<Namespace>, Vec<Namespace>)> {
    let personal = parse_namespace_list(lexer, NamespaceKind::Personal)?;
    lexer.expect_space()?;
    let other = parse_namespace_list(lexer, NamespaceKind::OtherUsers)?;
    lexer.expect_space()?;
    let public = parse_namespace_list(lexer, NamespaceKind::Public)?;
    Ok((personal, other, public))
}

/// Parses an ACL response body: mailbox then identifier/rights pairs.
pub fn parse_acl_response(lexer: &mut Lexer<'_>) -> Result<(String, Vec<(String, String)>)> {
    let mailbox = lexer.read_astring()?;
    let mut rights = Vec::new();

    loop {
        lexer.skip_spaces();
        if lexer.is_eof() || lexer.peek() == Some(b'\r') || lexer.peek() == Some(b'\n') {
            break;
        }
        let identifier = lexer.read_astring()?;
        lexer.expect_space()?;
        let grant = lexer.read_astring()?;
        rights.push((identifier, grant));
    }

    Ok((mailbox, rights))
}

/// Parses a QUOTA response body: root then (resource usage limit ...).
pub fn parse_quota_response(lexer: &mut Lexer<'_>) -> Result<(String, Vec<(String, u64, u64)>)> {
    let root = lexer.read_astring()?;
    lexer.expect_space()?;
    lexer.expect(Token::LParen)?;

    let mut usage = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => {}
            Token::Atom(resource) => {
                lexer.expect_space()?;
                let used = lexer.read_number()?;
                lexer.expect_space()?;
                let limit = lexer.read_number()?;
                usage.push((resource.to_string(), used, limit));
            }
            _ => {}
        }
    }

    Ok((root, usage))
}

/// Parses an ID response body: NIL or a parenthesized field/value list.
pub fn parse_id_response(lexer: &mut Lexer<'_>) -> Result<Vec<(String, String)>> {
    match lexer.next_token()? {
        Token::Nil => Ok(Vec::new()),
        Token::LParen => {
            let mut pairs = Vec::new();
            loop {
                match lexer.peek() {
                    Some(b')') => {
                        lexer.advance();
                        break;
                    }
                    Some(b' ') => {
                        lexer.advance();
                    }
                    Some(_) => {
                        let key = lexer.read_astring()?;
                        lexer.skip_spaces();
                        let value = lexer.read_nstring()?.unwrap_or_default();
                        pairs.push((key, value));
                    }
                    None => break,
                }
            }
            Ok(pairs)
        }
        token => Err(Error::BadSyntax {
            position: lexer.position(),
            message: format!("Expected ID data, got {token:?}"),
        }),
    }
}

/// Parses a VANISHED response body: optional `(EARLIER)` then a UID set.
pub fn parse_vanished_response(lexer: &mut Lexer<'_>) -> Result<(bool, UidSet)> {
    lexer.skip_spaces();

    let mut earlier = false;
    if lexer.peek() == Some(b'(') {
        lexer.advance();
        let atom = lexer.read_atom_string()?;
        earlier = atom.eq_ignore_ascii_case("EARLIER");
        lexer.expect(Token::RParen)?;
        lexer.skip_spaces();
    }

    let uids = read_uid_set(lexer)?.ok_or_else(|| Error::BadSyntax {
        position: lexer.position(),
        message: "Invalid VANISHED UID set".to_string(),
    })?;

    Ok((earlier, uids))
}

/// Reads text until end of line.
pub fn read_text_until_crlf(lexer: &mut Lexer<'_>) -> String {
    let remaining = lexer.remaining();

    let end = remaining
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(remaining.len());

    let text = String::from_utf8_lossy(&remaining[..end]).into_owned();
    lexer.skip(remaining.len());
    text
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn response_code_copyuid() {
        let mut lexer = Lexer::new(b"[COPYUID 15 4,7,9 91:93]");
        let code = parse_response_code(&mut lexer).unwrap();
        match code {
            ResponseCode::CopyUid {
                uidvalidity,
                source,
                dest,
            } => {
                assert_eq!(uidvalidity.get(), 15);
                assert_eq!(source.to_string(), "4,7,9");
                assert_eq!(dest.to_string(), "91:93");
            }
            other => panic!("expected CopyUid, got {other:?}"),
        }
    }

    #[test]
    fn response_code_appenduid() {
        let mut lexer = Lexer::new(b"[APPENDUID 38505 3955]");
        let code = parse_response_code(&mut lexer).unwrap();
        assert!(matches!(
            code,
            ResponseCode::AppendUid { uidvalidity, uid }
                if uidvalidity.get() == 38505 && uid.get() == 3955
        ));
    }

    #[test]
    fn response_code_unavailable() {
        let mut lexer = Lexer::new(b"[UNAVAILABLE]");
        assert_eq!(
            parse_response_code(&mut lexer).unwrap(),
            ResponseCode::Unavailable
        );
    }

    #[test]
    fn response_code_unknown_swallows_args() {
        let mut lexer = Lexer::new(b"[X-FROB 12 weird stuff]");
        assert_eq!(
            parse_response_code(&mut lexer).unwrap(),
            ResponseCode::Unknown("X-FROB".to_string())
        );
    }

    #[test]
    fn permanent_flags_with_wildcard() {
        let mut lexer = Lexer::new(b"[PERMANENTFLAGS (\\Seen \\Deleted \\*)]");
        let code = parse_response_code(&mut lexer).unwrap();
        match code {
            ResponseCode::PermanentFlags(atoms) => {
                assert_eq!(atoms, vec!["\\Seen", "\\Deleted", "\\*"]);
            }
            other => panic!("expected PermanentFlags, got {other:?}"),
        }
    }

    #[test]
    fn highestmodseq_is_64_bit() {
        let mut lexer = Lexer::new(b"[HIGHESTMODSEQ 90000000000]");
        assert_eq!(
            parse_response_code(&mut lexer).unwrap(),
            ResponseCode::HighestModSeq(90_000_000_000)
        );
    }

    #[test]
    fn namespace_three_lists() {
        let mut lexer = Lexer::new(b"((\"\" \"/\")) ((\"Other Users/\" \"/\")) NIL");
        let (personal, other, public) = parse_namespace_response(&mut lexer).unwrap();
        assert_eq!(personal.len(), 1);
        assert_eq!(personal[0].prefix, "");
        assert_eq!(personal[0].delimiter, Some('/'));
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].prefix, "Other Users/");
        assert!(public.is_empty());
    }

    #[test]
    fn acl_pairs() {
        let mut lexer = Lexer::new(b"INBOX owner lrswipkxtecda anyone lr");
        let (mailbox, rights) = parse_acl_response(&mut lexer).unwrap();
        assert_eq!(mailbox, "INBOX");
        assert_eq!(rights.len(), 2);
        assert_eq!(rights[0].0, "owner");
        assert_eq!(rights[1], ("anyone".to_string(), "lr".to_string()));
    }

    #[test]
    fn quota_triples() {
        let mut lexer = Lexer::new(b"\"\" (STORAGE 10 512)");
        let (root, usage) = parse_quota_response(&mut lexer).unwrap();
        assert_eq!(root, "");
        assert_eq!(usage, vec![("STORAGE".to_string(), 10, 512)]);
    }

    #[test]
    fn vanished_earlier() {
        let mut lexer = Lexer::new(b"(EARLIER) 300:310,405");
        let (earlier, uids) = parse_vanished_response(&mut lexer).unwrap();
        assert!(earlier);
        assert_eq!(uids.len(), 12);
    }

    #[test]
    fn id_nil() {
        let mut lexer = Lexer::new(b"NIL");
        assert!(parse_id_response(&mut lexer).unwrap().is_empty());
    }

    #[test]
    fn id_pairs() {
        let mut lexer = Lexer::new(b"(\"name\" \"Dovecot\" \"version\" \"2.3\")");
        let pairs = parse_id_response(&mut lexer).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], ("name".to_string(), "Dovecot".to_string()));
    }
}
