//! Sans-I/O response parsing: lexer and recursive-descent response parser.

pub mod lexer;
mod response;

pub use response::{
    Address, BodySection, Envelope, FetchRecord, Response, ResponseParser, StatusItem,
    UntaggedResponse,
};
