//! FETCH response parsing.
//!
//! Extracts every attribute of interest in one pass over the record.
//! Unknown attributes are captured, not rejected.

use crate::parser::lexer::{Lexer, Token};
use crate::types::Uid;
use crate::{Error, Result};

use super::parse_flag_list;
use super::types::{Address, BodySection, Envelope, FetchRecord};

/// Parses a FETCH response body (the parenthesized attribute list).
pub fn parse_fetch_record(lexer: &mut Lexer<'_>, seq: u32) -> Result<FetchRecord> {
    lexer.expect(Token::LParen)?;

    let mut record = FetchRecord {
        seq,
        ..FetchRecord::default()
    };

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => {}
            Token::Atom(name) => {
                let upper = name.to_uppercase();
                match upper.as_str() {
                    "FLAGS" => {
                        lexer.expect_space()?;
                        record.flags = Some(parse_flag_list(lexer)?);
                    }
                    "UID" => {
                        lexer.expect_space()?;
                        let n = lexer.read_number32()?;
                        // UID 0 is nonsense; leave the field empty so the
                        // engine discards the record.
                        record.uid = Uid::new(n);
                    }
                    "RFC822.SIZE" => {
                        lexer.expect_space()?;
                        record.size = Some(lexer.read_number32()?);
                    }
                    "INTERNALDATE" => {
                        lexer.expect_space()?;
                        if let Token::QuotedString(date) = lexer.next_token()? {
                            record.internal_date = Some(date);
                        }
                    }
                    "ENVELOPE" => {
                        lexer.expect_space()?;
                        record.envelope = Some(Box::new(parse_envelope(lexer)?));
                    }
                    "BODY" | "BODY.PEEK" | "RFC822" | "RFC822.HEADER" | "RFC822.TEXT" => {
                        let (section, origin) = parse_section_and_origin(lexer)?;
                        lexer.expect_space()?;
                        let data = match lexer.next_token()? {
                            Token::Literal(d) => Some(d),
                            Token::QuotedString(s) => Some(s.into_bytes()),
                            Token::Nil => None,
                            token => {
                                return Err(Error::BadSyntax {
                                    position: lexer.position(),
                                    message: format!("Expected body data, got {token:?}"),
                                });
                            }
                        };
                        record.body = Some(BodySection {
                            section,
                            origin,
                            data,
                        });
                    }
                    "MODSEQ" => {
                        lexer.expect_space()?;
                        lexer.expect(Token::LParen)?;
                        let n = lexer.read_number()?;
                        lexer.expect(Token::RParen)?;
                        record.modseq = crate::types::ModSeq::from_u64(n);
                    }
                    "X-GM-MSGID" => {
                        lexer.expect_space()?;
                        record.gm_msgid = Some(lexer.read_number()?);
                    }
                    "X-GM-THRID" => {
                        lexer.expect_space()?;
                        record.gm_thrid = Some(lexer.read_number()?);
                    }
                    "X-GM-LABELS" => {
                        lexer.expect_space()?;
                        record.gm_labels = Some(parse_label_list(lexer)?);
                    }
                    _ => {
                        let raw = skip_fetch_value(lexer);
                        record.extra.push((name.to_string(), raw));
                    }
                }
            }
            token => {
                return Err(Error::BadSyntax {
                    position: lexer.position(),
                    message: format!("Unexpected token in FETCH record: {token:?}"),
                });
            }
        }
    }

    Ok(record)
}

/// Parses optional `[section]` and `<origin>` after a BODY attribute name.
fn parse_section_and_origin(lexer: &mut Lexer<'_>) -> Result<(Option<String>, Option<u32>)> {
    let mut section = None;
    let mut origin = None;

    if lexer.peek() == Some(b'[') {
        lexer.advance();
        let mut buf = String::new();
        loop {
            match lexer.peek() {
                Some(b']') => {
                    lexer.advance();
                    break;
                }
                Some(b) => {
                    buf.push(b as char);
                    lexer.advance();
                }
                None => break,
            }
        }
        if !buf.is_empty() {
            section = Some(buf);
        }
    }

    if lexer.peek() == Some(b'<') {
        lexer.advance();
        let mut buf = String::new();
        loop {
            match lexer.peek() {
                Some(b'>') => {
                    lexer.advance();
                    break;
                }
                Some(b) if b.is_ascii_digit() => {
                    buf.push(b as char);
                    lexer.advance();
                }
                _ => break,
            }
        }
        origin = buf.parse().ok();
    }

    Ok((section, origin))
}

/// Parses an X-GM-LABELS value: a parenthesized list of astrings.
fn parse_label_list(lexer: &mut Lexer<'_>) -> Result<Vec<String>> {
    lexer.expect(Token::LParen)?;
    let mut labels = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => {}
            Token::Atom(s) => labels.push(s.to_string()),
            Token::QuotedString(s) => labels.push(s),
            Token::Literal(data) => labels.push(String::from_utf8_lossy(&data).into_owned()),
            token => {
                return Err(Error::BadSyntax {
                    position: lexer.position(),
                    message: format!("Unexpected token in label list: {token:?}"),
                });
            }
        }
    }

    Ok(labels)
}

/// Parses an envelope structure.
pub fn parse_envelope(lexer: &mut Lexer<'_>) -> Result<Envelope> {
    lexer.expect(Token::LParen)?;

    let date = lexer.read_nstring()?;
    lexer.expect_space()?;

    let subject = lexer.read_nstring()?;
    lexer.expect_space()?;

    let from = parse_address_list(lexer)?;
    lexer.expect_space()?;

    let sender = parse_address_list(lexer)?;
    lexer.expect_space()?;

    let reply_to = parse_address_list(lexer)?;
    lexer.expect_space()?;

    let to = parse_address_list(lexer)?;
    lexer.expect_space()?;

    let cc = parse_address_list(lexer)?;
    lexer.expect_space()?;

    let bcc = parse_address_list(lexer)?;
    lexer.expect_space()?;

    let in_reply_to = lexer.read_nstring()?;
    lexer.expect_space()?;

    let message_id = lexer.read_nstring()?;

    lexer.expect(Token::RParen)?;

    Ok(Envelope {
        date,
        subject,
        from,
        sender,
        reply_to,
        to,
        cc,
        bcc,
        in_reply_to,
        message_id,
    })
}

/// Parses an address list (NIL or parenthesized addresses).
pub fn parse_address_list(lexer: &mut Lexer<'_>) -> Result<Vec<Address>> {
    match lexer.next_token()? {
        Token::Nil => Ok(Vec::new()),
        Token::LParen => {
            let mut addresses = Vec::new();

            loop {
                match lexer.peek() {
                    Some(b')') => {
                        lexer.advance();
                        break;
                    }
                    Some(b'(') => addresses.push(parse_address(lexer)?),
                    Some(b' ') => {
                        lexer.advance();
                    }
                    _ => break,
                }
            }

            Ok(addresses)
        }
        token => Err(Error::BadSyntax {
            position: lexer.position(),
            message: format!("Expected address list, got {token:?}"),
        }),
    }
}

/// Parses a single address.
fn parse_address(lexer: &mut Lexer<'_>) -> Result<Address> {
    lexer.expect(Token::LParen)?;

    let name = lexer.read_nstring()?;
    lexer.expect_space()?;

    let adl = lexer.read_nstring()?;
    lexer.expect_space()?;

    let mailbox = lexer.read_nstring()?;
    lexer.expect_space()?;

    let host = lexer.read_nstring()?;

    lexer.expect(Token::RParen)?;

    Ok(Address {
        name,
        adl,
        mailbox,
        host,
    })
}

/// Skips an unknown fetch attribute value, returning its raw text.
fn skip_fetch_value(lexer: &mut Lexer<'_>) -> String {
    if lexer.peek() == Some(b' ') {
        lexer.advance();
    }

    let start = lexer.position();
    let mut paren_depth = 0usize;

    loop {
        match lexer.peek() {
            Some(b'(') => {
                paren_depth += 1;
                lexer.advance();
            }
            Some(b')') => {
                if paren_depth == 0 {
                    break;
                }
                paren_depth -= 1;
                lexer.advance();
            }
            Some(b' ') if paren_depth == 0 => break,
            // Literal data may contain parens and spaces; consume it whole.
            Some(b'{') => {
                if lexer.next_token().is_err() {
                    break;
                }
            }
            Some(_) => {
                lexer.advance();
            }
            None => break,
        }
    }

    let raw = lexer.slice(start, lexer.position());
    String::from_utf8_lossy(raw).into_owned()
}
