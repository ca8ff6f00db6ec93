//! Wire protocol for talking to a Scala/Java analysis server.
//!
//! This crate is transport-agnostic: [`framing`] reads and writes
//! Content-Length framed bodies over any tokio byte stream, and [`codec`]
//! turns those bodies into typed [`Request`]s, [`ResponsePayload`]s and
//! [`ServerEvent`]s.
//!
//! ## Usage
//!
//! ```
//! use sextant_protocol::{Inbound, Request, ResponsePayload, codec};
//!
//! let body = codec::encode(1, &Request::type_check("/project/src/A.scala"))?;
//! assert!(!body.is_empty());
//!
//! let reply = codec::decode(br#"{"callId":1,"payload":{"typehint":"VoidResponse"}}"#)?;
//! assert_eq!(reply, Inbound::Reply { call_id: 1, payload: ResponsePayload::Void });
//! # Ok::<(), sextant_protocol::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod framing;
pub mod request;
pub mod response;

pub use codec::{Inbound, decode, encode};
pub use error::{Error, Result};
pub use framing::{FrameReader, FrameWriter};
pub use request::{Request, SourceFileInfo};
pub use response::{
    CompletionInfo, CompletionInfoList, ConnectionInfo, ImportSuggestions, Note, NoteList,
    NoteSeverity, RefactorDiffEffect, RefactorFailure, ResponsePayload, ServerEvent,
    SourcePosition, SymbolInfo, SymbolSearchResult, SymbolSearchResults, TypeInfo,
};
