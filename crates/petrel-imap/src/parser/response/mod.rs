//! IMAP response parser.
//!
//! Converts bytes to semantic events and never interprets policy. Driven
//! as a pull parser by the command engine: after writing a command, the
//! engine parses one response at a time until the matching tagged
//! response arrives.

mod fetch;
mod helpers;
mod types;

pub use types::{Address, BodySection, Envelope, FetchRecord, StatusItem, UntaggedResponse};

use crate::parser::lexer::{Lexer, Token};
use crate::types::{ResponseCode, Status, Tag};
use crate::{Error, Result};

use helpers::{
    parse_acl_response, parse_capability_data, parse_id_response, parse_list_entry,
    parse_namespace_response, parse_quota_response, parse_response_code, parse_search_response,
    parse_status_response, parse_vanished_response, read_text_until_crlf,
};

pub(crate) use helpers::parse_flag_list;

/// A parsed IMAP response.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Tagged response (command completion).
    Tagged {
        /// The command tag.
        tag: Tag,
        /// Response status.
        status: Status,
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// Untagged response (server data).
    Untagged(UntaggedResponse),
    /// Continuation request: the server awaits more client data.
    Continuation {
        /// Optional text or SASL challenge.
        text: Option<String>,
    },
    /// A response the engine does not understand and silently accepts.
    Ignored,
}

/// Response parser.
pub struct ResponseParser;

impl ResponseParser {
    /// Parses one complete response (line plus inline literals).
    pub fn parse(input: &[u8]) -> Result<Response> {
        let mut lexer = Lexer::new(input);

        match lexer.next_token()? {
            Token::Asterisk => Self::parse_untagged(&mut lexer),
            Token::Plus => Self::parse_continuation(&mut lexer),
            Token::Atom(tag) => Self::parse_tagged(&mut lexer, tag),
            // Tags allocated by this engine are plain decimal numbers.
            Token::Number(n) => Self::parse_tagged(&mut lexer, &n.to_string()),
            token => Err(Error::BadSyntax {
                position: 0,
                message: format!("Expected *, +, or tag, got {token:?}"),
            }),
        }
    }

    /// Parses a tagged response.
    fn parse_tagged(lexer: &mut Lexer<'_>, tag_str: &str) -> Result<Response> {
        lexer.expect_space()?;

        let status = Self::parse_status(lexer)?;
        lexer.skip_spaces();

        let (code, text) = Self::parse_resp_text(lexer)?;

        Ok(Response::Tagged {
            tag: Tag::new(tag_str),
            status,
            code,
            text,
        })
    }

    /// Parses an untagged response.
    #[allow(clippy::too_many_lines)]
    fn parse_untagged(lexer: &mut Lexer<'_>) -> Result<Response> {
        lexer.expect_space()?;

        let token = lexer.next_token()?;

        match token {
            Token::Atom(s) => {
                let upper = s.to_uppercase();
                match upper.as_str() {
                    "OK" => {
                        lexer.skip_spaces();
                        let (code, text) = Self::parse_resp_text(lexer)?;
                        Ok(Response::Untagged(UntaggedResponse::Ok { code, text }))
                    }
                    "NO" => {
                        lexer.skip_spaces();
                        let (code, text) = Self::parse_resp_text(lexer)?;
                        Ok(Response::Untagged(UntaggedResponse::No { code, text }))
                    }
                    "BAD" => {
                        lexer.skip_spaces();
                        let (code, text) = Self::parse_resp_text(lexer)?;
                        Ok(Response::Untagged(UntaggedResponse::Bad { code, text }))
                    }
                    "PREAUTH" => {
                        lexer.skip_spaces();
                        let (code, text) = Self::parse_resp_text(lexer)?;
                        Ok(Response::Untagged(UntaggedResponse::PreAuth { code, text }))
                    }
                    "BYE" => {
                        lexer.skip_spaces();
                        let (code, text) = Self::parse_resp_text(lexer)?;
                        Ok(Response::Untagged(UntaggedResponse::Bye { code, text }))
                    }
                    "CAPABILITY" => Ok(Response::Untagged(UntaggedResponse::Capability(
                        parse_capability_data(lexer)?,
                    ))),
                    "FLAGS" => {
                        lexer.expect_space()?;
                        Ok(Response::Untagged(UntaggedResponse::Flags(
                            parse_flag_list(lexer)?,
                        )))
                    }
                    "LIST" => {
                        lexer.expect_space()?;
                        Ok(Response::Untagged(UntaggedResponse::List(
                            parse_list_entry(lexer, false)?,
                        )))
                    }
                    "LSUB" => {
                        lexer.expect_space()?;
                        Ok(Response::Untagged(UntaggedResponse::Lsub(
                            parse_list_entry(lexer, true)?,
                        )))
                    }
                    "XLIST" => {
                        lexer.expect_space()?;
                        Ok(Response::Untagged(UntaggedResponse::Xlist(
                            parse_list_entry(lexer, false)?,
                        )))
                    }
                    "SEARCH" => Ok(Response::Untagged(UntaggedResponse::Search(
                        parse_search_response(lexer)?,
                    ))),
                    "STATUS" => {
                        lexer.expect_space()?;
                        let (mailbox, items) = parse_status_response(lexer)?;
                        Ok(Response::Untagged(UntaggedResponse::Status {
                            mailbox,
                            items,
                        }))
                    }
                    "NAMESPACE" => {
                        lexer.expect_space()?;
                        let (personal, other, public) = parse_namespace_response(lexer)?;
                        Ok(Response::Untagged(UntaggedResponse::Namespace {
                            personal,
                            other,
                            public,
                        }))
                    }
                    "ACL" => {
                        lexer.expect_space()?;
                        let (mailbox, rights) = parse_acl_response(lexer)?;
                        Ok(Response::Untagged(UntaggedResponse::Acl { mailbox, rights }))
                    }
                    "MYRIGHTS" => {
                        lexer.expect_space()?;
                        let mailbox = lexer.read_astring()?;
                        lexer.expect_space()?;
                        let rights = lexer.read_astring()?;
                        Ok(Response::Untagged(UntaggedResponse::MyRights {
                            mailbox,
                            rights,
                        }))
                    }
                    "QUOTA" => {
                        lexer.expect_space()?;
                        let (root, usage) = parse_quota_response(lexer)?;
                        Ok(Response::Untagged(UntaggedResponse::Quota { root, usage }))
                    }
                    "QUOTAROOT" => {
                        lexer.expect_space()?;
                        let mailbox = lexer.read_astring()?;
                        let mut roots = Vec::new();
                        loop {
                            lexer.skip_spaces();
                            if lexer.is_eof()
                                || lexer.peek() == Some(b'\r')
                                || lexer.peek() == Some(b'\n')
                            {
                                break;
                            }
                            roots.push(lexer.read_astring()?);
                        }
                        Ok(Response::Untagged(UntaggedResponse::QuotaRoot {
                            mailbox,
                            roots,
                        }))
                    }
                    "ID" => {
                        lexer.expect_space()?;
                        Ok(Response::Untagged(UntaggedResponse::Id(parse_id_response(
                            lexer,
                        )?)))
                    }
                    "ENABLED" => Ok(Response::Untagged(UntaggedResponse::Enabled(
                        parse_capability_data(lexer)?,
                    ))),
                    "VANISHED" => {
                        let (earlier, uids) = parse_vanished_response(lexer)?;
                        Ok(Response::Untagged(UntaggedResponse::Vanished {
                            earlier,
                            uids,
                        }))
                    }
                    // Unknown untagged responses are accepted silently.
                    _ => Ok(Response::Ignored),
                }
            }
            Token::Number(n) => {
                let n = u32::try_from(n).map_err(|_| Error::BadSyntax {
                    position: lexer.position(),
                    message: "Message number exceeds 32 bits".to_string(),
                })?;
                lexer.expect_space()?;
                let keyword = lexer.read_atom_string()?;
                let upper = keyword.to_uppercase();

                match upper.as_str() {
                    "EXISTS" => Ok(Response::Untagged(UntaggedResponse::Exists(n))),
                    "RECENT" => Ok(Response::Untagged(UntaggedResponse::Recent(n))),
                    "EXPUNGE" => {
                        let seq = crate::types::SeqNum::new(n).ok_or_else(|| Error::BadSyntax {
                            position: lexer.position(),
                            message: "Invalid sequence number 0".to_string(),
                        })?;
                        Ok(Response::Untagged(UntaggedResponse::Expunge(seq)))
                    }
                    "FETCH" => {
                        lexer.expect_space()?;
                        let record = fetch::parse_fetch_record(lexer, n)?;
                        Ok(Response::Untagged(UntaggedResponse::Fetch(record)))
                    }
                    _ => Ok(Response::Ignored),
                }
            }
            _ => Err(Error::BadSyntax {
                position: lexer.position(),
                message: format!("Unexpected token in untagged response: {token:?}"),
            }),
        }
    }

    /// Parses a continuation response.
    fn parse_continuation(lexer: &mut Lexer<'_>) -> Result<Response> {
        if lexer.peek() == Some(b' ') {
            lexer.advance();
        }

        let text = read_text_until_crlf(lexer);

        Ok(Response::Continuation {
            text: if text.is_empty() { None } else { Some(text) },
        })
    }

    /// Parses a status keyword.
    fn parse_status(lexer: &mut Lexer<'_>) -> Result<Status> {
        let s = lexer.read_atom_string()?;
        match s.to_uppercase().as_str() {
            "OK" => Ok(Status::Ok),
            "NO" => Ok(Status::No),
            "BAD" => Ok(Status::Bad),
            "PREAUTH" => Ok(Status::PreAuth),
            "BYE" => Ok(Status::Bye),
            _ => Err(Error::BadSyntax {
                position: lexer.position(),
                message: format!("Invalid status: {s}"),
            }),
        }
    }

    /// Parses response text with an optional leading response code.
    fn parse_resp_text(lexer: &mut Lexer<'_>) -> Result<(Option<ResponseCode>, String)> {
        let code = if lexer.peek() == Some(b'[') {
            Some(parse_response_code(lexer)?)
        } else {
            None
        };

        if lexer.peek() == Some(b' ') {
            lexer.advance();
        }

        let text = read_text_until_crlf(lexer);

        Ok((code, text))
    }
}
