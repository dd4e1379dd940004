//! Re-chunks an uneven block sequence into fixed-size blocks
//!
//! The encoder emits blocks whose sizes follow the archive structure
//! (headers, compressed runs, descriptors). Consumers usually want a fixed
//! block size instead, so both the outer output and each member's content
//! pass through this adapter.

use bytes::{Bytes, BytesMut};

/// Iterator adapter yielding blocks of exactly `chunk_size` bytes, except
/// possibly the last. Pulls from the inner sequence on demand only and
/// buffers at most one inner block plus a partial slice.
pub(crate) struct EvenChunks<I> {
    inner: I,
    chunk_size: usize,
    pending: Bytes,
    done: bool,
}

impl<I> EvenChunks<I> {
    pub(crate) fn new(inner: I, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be at least 1");
        Self {
            inner,
            chunk_size,
            pending: Bytes::new(),
            done: false,
        }
    }
}

impl<I, E> Iterator for EvenChunks<I>
where
    I: Iterator<Item = std::result::Result<Bytes, E>>,
{
    type Item = std::result::Result<Bytes, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.pending.len() >= self.chunk_size {
                // split_to is a cheap refcount move, no copy
                return Some(Ok(self.pending.split_to(self.chunk_size)));
            }
            match self.inner.next() {
                Some(Ok(block)) => {
                    if block.is_empty() {
                        continue;
                    }
                    if self.pending.is_empty() {
                        self.pending = block;
                    } else {
                        let mut buf =
                            BytesMut::with_capacity(self.pending.len() + block.len());
                        buf.extend_from_slice(&self.pending);
                        buf.extend_from_slice(&block);
                        self.pending = buf.freeze();
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    if self.pending.is_empty() {
                        return None;
                    }
                    return Some(Ok(std::mem::take(&mut self.pending)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn chunks(blocks: Vec<&'static [u8]>, size: usize) -> Vec<Bytes> {
        let inner = blocks
            .into_iter()
            .map(|b| Ok::<Bytes, Infallible>(Bytes::from_static(b)));
        EvenChunks::new(inner, size).map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_exact_multiple() {
        let out = chunks(vec![b"abcd", b"efgh"], 4);
        assert_eq!(out, vec![Bytes::from_static(b"abcd"), Bytes::from_static(b"efgh")]);
    }

    #[test]
    fn test_rechunks_across_blocks() {
        let out = chunks(vec![b"ab", b"cdef", b"g"], 3);
        assert_eq!(
            out,
            vec![
                Bytes::from_static(b"abc"),
                Bytes::from_static(b"def"),
                Bytes::from_static(b"g"),
            ]
        );
    }

    #[test]
    fn test_short_final_block() {
        let out = chunks(vec![b"abcdefg"], 3);
        assert_eq!(out.last().unwrap().as_ref(), b"g");
        assert!(out[..out.len() - 1].iter().all(|b| b.len() == 3));
    }

    #[test]
    fn test_large_inner_block_split_without_copy() {
        let out = chunks(vec![b"abcdefghij"], 2);
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|b| b.len() == 2));
    }

    #[test]
    fn test_empty_input() {
        let out = chunks(vec![], 4);
        assert!(out.is_empty());
        let out = chunks(vec![b"", b""], 4);
        assert!(out.is_empty());
    }

    #[test]
    fn test_error_fuses() {
        let inner = vec![
            Ok(Bytes::from_static(b"abcd")),
            Err("boom"),
            Ok(Bytes::from_static(b"efgh")),
        ]
        .into_iter();
        let mut it = EvenChunks::new(inner, 4);
        assert_eq!(it.next().unwrap().unwrap().as_ref(), b"abcd");
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }

    #[test]
    #[should_panic]
    fn test_zero_chunk_size_rejected() {
        let inner = std::iter::empty::<std::result::Result<Bytes, Infallible>>();
        EvenChunks::new(inner, 0);
    }
}
