//! # ziptide: Streaming ZIP Encoder
//!
//! `ziptide` produces a ZIP archive as a lazy sequence of byte blocks from
//! a lazy sequence of member files. The full archive never exists in
//! memory or on disk, member contents are visited exactly once in order,
//! and the total size does not need to be known in advance. That makes it
//! a fit for serving archives over HTTP, piping them into object storage,
//! or any other place a `Seek`-based writer cannot go.
//!
//! ## Features
//!
//! - **Streaming**: constant memory, no temp files, no seeking
//! - **ZIP64**: per-member 64-bit methods plus automatic upgrade of the
//!   end-of-archive records when classic limits are exceeded
//! - **Six member methods**: DEFLATE or store, 32- or 64-bit fields,
//!   buffered or pre-declared sizes
//! - **Encryption** (feature `encryption`): WinZip AE-2, AES-256-CTR with
//!   HMAC-SHA1 authentication
//! - **Async** (feature `async`): a tokio adapter driving the same core
//!
//! ## Quick Start
//!
//! ```no_run
//! use chrono::Utc;
//! use ziptide::{stream_zip, ArchiveOptions, Bytes, Member, Method};
//!
//! let members = vec![Member {
//!     name: "report.csv".into(),
//!     modified_at: Utc::now(),
//!     mode: 0o644,
//!     method: Method::DeflateAuto { uncompressed_size: 3, level: 9 },
//!     content: Box::new(std::iter::once(Ok(Bytes::from_static(b"a,b")))),
//! }];
//!
//! for block in stream_zip(members, ArchiveOptions::new()) {
//!     let block = block?;
//!     // hand `block` to a socket, a file, an upload part, ...
//! }
//! # Ok::<(), ziptide::ZipStreamError>(())
//! ```
//!
//! Every block has the configured chunk size (default 65536) except
//! possibly the last. Errors are terminal: the sequence ends and the bytes
//! already emitted must be discarded.

mod body;
mod chunker;
pub mod error;
mod method;
mod records;

#[cfg(feature = "async")]
mod async_encoder;
mod encoder;
#[cfg(feature = "encryption")]
mod encryption;

pub use bytes::Bytes;
pub use encoder::{stream_zip, ArchiveOptions, Member};
pub use error::{Result, ZipStreamError};
pub use method::Method;

#[cfg(feature = "async")]
pub use async_encoder::{async_stream_zip, AsyncMember};
