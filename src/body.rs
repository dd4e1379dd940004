//! Per-member data stages
//!
//! Each member's data region is produced by a stage implementing
//! [`BodyStage`]: a reified generator that yields byte blocks and, once the
//! content is exhausted, reports the final uncompressed size, compressed
//! size, and CRC-32. The encryption envelope wraps any stage and forwards
//! its sizes unchanged.

use crate::chunker::EvenChunks;
use crate::error::{Result, ZipStreamError};
use bytes::Bytes;
use crc32fast::Hasher as Crc32;
use flate2::{Compress, FlushCompress, Status};
use std::io;

/// Member content after re-chunking to the configured block size.
pub(crate) type ContentBlocks<'a> =
    EvenChunks<Box<dyn Iterator<Item = io::Result<Bytes>> + 'a>>;

/// Final accounting for a member's data region, before any encryption
/// overhead is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BodySizes {
    pub uncompressed: u64,
    pub compressed: u64,
    pub crc_32: u32,
}

pub(crate) enum Step {
    Block(Bytes),
    Finished(BodySizes),
}

pub(crate) trait BodyStage {
    /// Produce the next block, or the final sizes once content is exhausted.
    fn advance(&mut self) -> Result<Step>;
}

/// Spare output capacity kept ahead of the compressor.
const DEFLATE_OUT_CHUNK: usize = 32 * 1024;

/// DEFLATE stage: compresses content with a fresh raw-deflate compressor,
/// tracking CRC-32 and both byte counters against the method's caps.
pub(crate) struct DeflateBody<'a> {
    content: ContentBlocks<'a>,
    compress: Compress,
    crc: Crc32,
    uncompressed_size: u64,
    compressed_size: u64,
    max_uncompressed: u64,
    max_compressed: u64,
    flushed: bool,
}

impl<'a> DeflateBody<'a> {
    pub(crate) fn new(
        content: ContentBlocks<'a>,
        compress: Compress,
        max_uncompressed: u64,
        max_compressed: u64,
    ) -> Self {
        Self {
            content,
            compress,
            crc: Crc32::new(),
            uncompressed_size: 0,
            compressed_size: 0,
            max_uncompressed,
            max_compressed,
            flushed: false,
        }
    }

    fn deflate(&mut self, input: &[u8], flush: FlushCompress) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(DEFLATE_OUT_CHUNK);
        let mut pos = 0;
        loop {
            if out.capacity() == out.len() {
                out.reserve(DEFLATE_OUT_CHUNK);
            }
            let before_in = self.compress.total_in();
            let status = self
                .compress
                .compress_vec(&input[pos..], &mut out, flush)
                .map_err(|e| ZipStreamError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
            pos += (self.compress.total_in() - before_in) as usize;
            if matches!(flush, FlushCompress::Finish) {
                if matches!(status, Status::StreamEnd) {
                    break;
                }
            } else if pos == input.len() {
                break;
            }
        }
        Ok(out)
    }

    fn count_compressed(&mut self, produced: usize) -> Result<()> {
        self.compressed_size += produced as u64;
        if self.compressed_size > self.max_compressed {
            return Err(ZipStreamError::CompressedSizeOverflow);
        }
        Ok(())
    }
}

impl BodyStage for DeflateBody<'_> {
    fn advance(&mut self) -> Result<Step> {
        if self.flushed {
            return Ok(Step::Finished(BodySizes {
                uncompressed: self.uncompressed_size,
                compressed: self.compressed_size,
                crc_32: self.crc.clone().finalize(),
            }));
        }
        loop {
            match self.content.next() {
                Some(Ok(chunk)) => {
                    self.uncompressed_size += chunk.len() as u64;
                    if self.uncompressed_size > self.max_uncompressed {
                        return Err(ZipStreamError::UncompressedSizeOverflow);
                    }
                    self.crc.update(&chunk);
                    let out = self.deflate(&chunk, FlushCompress::None)?;
                    self.count_compressed(out.len())?;
                    if out.is_empty() {
                        continue;
                    }
                    return Ok(Step::Block(Bytes::from(out)));
                }
                Some(Err(e)) => return Err(ZipStreamError::Io(e)),
                None => {
                    let out = self.deflate(&[], FlushCompress::Finish)?;
                    self.count_compressed(out.len())?;
                    self.flushed = true;
                    return Ok(Step::Block(Bytes::from(out)));
                }
            }
        }
    }
}

/// Materialize buffered-store content up front, computing size and CRC so
/// the local header can be authoritative. Fails the moment the running size
/// would exceed the method's cap.
pub(crate) fn buffer_content(
    content: &mut ContentBlocks<'_>,
    max_size: u64,
) -> Result<(Vec<Bytes>, u64, u32)> {
    let mut blocks = Vec::new();
    let mut size = 0u64;
    let mut crc = Crc32::new();
    for block in content {
        let block = block?;
        size += block.len() as u64;
        if size > max_size {
            return Err(ZipStreamError::UncompressedSizeOverflow);
        }
        crc.update(&block);
        blocks.push(block);
    }
    Ok((blocks, size, crc.finalize()))
}

/// Replays blocks materialized by [`buffer_content`].
pub(crate) struct BufferedBody {
    blocks: std::vec::IntoIter<Bytes>,
    sizes: BodySizes,
}

impl BufferedBody {
    pub(crate) fn new(blocks: Vec<Bytes>, uncompressed_size: u64, crc_32: u32) -> Self {
        Self {
            blocks: blocks.into_iter(),
            sizes: BodySizes {
                uncompressed: uncompressed_size,
                compressed: uncompressed_size,
                crc_32,
            },
        }
    }
}

impl BodyStage for BufferedBody {
    fn advance(&mut self) -> Result<Step> {
        Ok(match self.blocks.next() {
            Some(block) => Step::Block(block),
            None => Step::Finished(self.sizes),
        })
    }
}

/// Streamed-store stage: passes content through while recomputing size and
/// CRC, then verifies both against the caller's declarations.
pub(crate) struct StreamedBody<'a> {
    content: ContentBlocks<'a>,
    declared_size: u64,
    declared_crc: u32,
    max_size: u64,
    size: u64,
    crc: Crc32,
}

impl<'a> StreamedBody<'a> {
    pub(crate) fn new(
        content: ContentBlocks<'a>,
        declared_size: u64,
        declared_crc: u32,
        max_size: u64,
    ) -> Self {
        Self {
            content,
            declared_size,
            declared_crc,
            max_size,
            size: 0,
            crc: Crc32::new(),
        }
    }
}

impl BodyStage for StreamedBody<'_> {
    fn advance(&mut self) -> Result<Step> {
        match self.content.next() {
            Some(Ok(block)) => {
                self.crc.update(&block);
                self.size += block.len() as u64;
                if self.size > self.max_size {
                    return Err(ZipStreamError::UncompressedSizeOverflow);
                }
                Ok(Step::Block(block))
            }
            Some(Err(e)) => Err(ZipStreamError::Io(e)),
            None => {
                if self.crc.clone().finalize() != self.declared_crc {
                    return Err(ZipStreamError::Crc32Integrity);
                }
                if self.size != self.declared_size {
                    return Err(ZipStreamError::UncompressedSizeIntegrity);
                }
                Ok(Step::Finished(BodySizes {
                    uncompressed: self.declared_size,
                    compressed: self.declared_size,
                    crc_32: self.declared_crc,
                }))
            }
        }
    }
}
