//! Async façade over the synchronous encoder
//!
//! Drives the sync core on a blocking worker thread, bridging the async
//! member and content streams to sync iterators by blocking the worker on
//! each pull. Blocks travel back through a capacity-1 channel, so the
//! worker never runs ahead of the consumer by more than one block; dropping
//! the output stream cancels the worker at its next send.
//!
//! Must be called from within a multi-thread tokio runtime: the worker
//! re-enters the runtime via a captured [`Handle`] to await content.

use crate::encoder::{stream_zip, ArchiveOptions, Member};
use crate::error::Result;
use crate::method::Method;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// A file to be included in the archive, with async content.
pub struct AsyncMember {
    pub name: String,
    pub modified_at: DateTime<Utc>,
    pub mode: u32,
    pub method: Method,
    pub content: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>,
}

/// Async counterpart of [`stream_zip`]: encodes an async sequence of
/// members into an async sequence of archive blocks with the same output,
/// byte for byte, as the synchronous encoder.
pub fn async_stream_zip<S>(
    members: S,
    options: ArchiveOptions,
) -> impl Stream<Item = Result<Bytes>>
where
    S: Stream<Item = AsyncMember> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Bytes>>(1);
    let handle = Handle::current();

    tokio::task::spawn_blocking(move || {
        let mut members = Box::pin(members);
        let member_handle = handle;
        let sync_members = std::iter::from_fn(move || {
            member_handle.block_on(members.next()).map(|m| {
                let content_handle = member_handle.clone();
                let mut content = m.content;
                Member {
                    name: m.name,
                    modified_at: m.modified_at,
                    mode: m.mode,
                    method: m.method,
                    content: Box::new(std::iter::from_fn(move || {
                        content_handle.block_on(content.next())
                    })),
                }
            })
        });
        for block in stream_zip(sync_members, options) {
            if tx.blocking_send(block).is_err() {
                break;
            }
        }
    });

    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|block| (block, rx))
    })
}
