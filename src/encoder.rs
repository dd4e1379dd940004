//! Streaming ZIP encoder
//!
//! Drives a lazy sequence of member files into a lazy sequence of byte
//! blocks forming a complete ZIP archive. Headers are committed before
//! sizes or CRCs are known, so each member is emitted by one of six
//! strategies differing in field widths and in whether a data descriptor
//! trails the data region. The whole archive is produced without seeking
//! and without materializing more than one buffered-store member.

use crate::body::{
    buffer_content, BodySizes, BodyStage, BufferedBody, DeflateBody, Step, StreamedBody,
};
use crate::chunker::EvenChunks;
use crate::error::{Result, ZipStreamError};
use crate::method::{Method, MethodKind};
use crate::records::{self, CentralHeader, LocalHeader};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use flate2::{Compress, Compression};
use std::collections::VecDeque;
use std::io;

#[cfg(feature = "encryption")]
use crate::encryption::{AesBody, AesStrength};

/// A file to be included in the archive.
///
/// `content` is pulled lazily, only between the member's local header and
/// its data descriptor (or directly after the header for store methods).
/// Content errors surface unchanged on the output sequence.
pub struct Member<'a> {
    /// Name within the archive, UTF-8. A trailing '/' marks a directory
    /// entry via the MS-DOS directory attribute; set a directory bit in
    /// `mode` as well for tools that honor the mode instead.
    pub name: String,
    /// Last modified time, stored at 2-second DOS resolution and, when
    /// extended timestamps are enabled, at exact-second resolution.
    pub modified_at: DateTime<Utc>,
    /// POSIX permission bits, stored in the external-attributes high word.
    pub mode: u32,
    pub method: Method,
    pub content: Box<dyn Iterator<Item = io::Result<Bytes>> + 'a>,
}

/// Archive-wide configuration.
pub struct ArchiveOptions {
    chunk_size: usize,
    new_compressor: Box<dyn Fn() -> Compress + Send>,
    extended_timestamps: bool,
    #[cfg(feature = "encryption")]
    password: Option<String>,
    #[cfg(feature = "encryption")]
    crypto_random: Box<dyn FnMut(&mut [u8]) + Send>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveOptions {
    pub fn new() -> Self {
        Self {
            chunk_size: 65536,
            new_compressor: Box::new(|| Compress::new(Compression::new(9), false)),
            extended_timestamps: true,
            #[cfg(feature = "encryption")]
            password: None,
            #[cfg(feature = "encryption")]
            crypto_random: Box::new(|buf| {
                getrandom::getrandom(buf).expect("crypto random source failed")
            }),
        }
    }

    /// Size of every emitted block except possibly the last (default 65536).
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be at least 1");
        self.chunk_size = chunk_size;
        self
    }

    /// Factory producing a fresh compressor per member. Must use raw
    /// deflate framing (`Compress::new(level, false)`). Default: level 9.
    /// `Method::DeflateAuto` members use their own level instead.
    pub fn compressor(mut self, f: impl Fn() -> Compress + Send + 'static) -> Self {
        self.new_compressor = Box::new(f);
        self
    }

    /// Whether to attach the UNIX extended-timestamp extra field to every
    /// member (default true).
    pub fn extended_timestamps(mut self, enabled: bool) -> Self {
        self.extended_timestamps = enabled;
        self
    }

    /// Encrypt every member with WinZip AE-2 (AES-256) under this password.
    #[cfg(feature = "encryption")]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Source of cryptographic randomness for per-member salts (default:
    /// the operating system's CSPRNG). Override for reproducible output.
    #[cfg(feature = "encryption")]
    pub fn crypto_random(mut self, f: impl FnMut(&mut [u8]) + Send + 'static) -> Self {
        self.crypto_random = Box::new(f);
        self
    }
}

/// Encode `members` into a ZIP archive, yielded as a lazy sequence of byte
/// blocks of `options.chunk_size` bytes each (the final block may be
/// shorter). The concatenation of all blocks is the complete archive.
///
/// Any error ends the sequence; bytes already yielded are then a truncated
/// prefix and must be discarded.
///
/// ```
/// use chrono::TimeZone;
/// use ziptide::{stream_zip, ArchiveOptions, Bytes, Member, Method};
///
/// let modified_at = chrono::Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
/// let members = vec![Member {
///     name: "hello.txt".into(),
///     modified_at,
///     mode: 0o644,
///     method: Method::Deflate32,
///     content: Box::new(std::iter::once(Ok(Bytes::from_static(b"hello")))),
/// }];
///
/// let mut archive = Vec::new();
/// for block in stream_zip(members, ArchiveOptions::new()) {
///     archive.extend_from_slice(&block?);
/// }
/// assert_eq!(&archive[..4], b"PK\x03\x04");
/// # Ok::<(), ziptide::ZipStreamError>(())
/// ```
pub fn stream_zip<'a, M>(
    members: M,
    options: ArchiveOptions,
) -> impl Iterator<Item = Result<Bytes>> + 'a
where
    M: IntoIterator<Item = Member<'a>>,
    M::IntoIter: 'a,
{
    let chunk_size = options.chunk_size;
    EvenChunks::new(RawStream::new(members.into_iter(), options), chunk_size)
}

/// Everything about a member that outlives its data region: the fields the
/// central directory entry is composed from.
struct MemberRecord {
    kind: MethodKind,
    auto_upgrade: bool,
    flags: u16,
    compression: u16,
    dos_time: u16,
    dos_date: u16,
    name: Bytes,
    unix_time_extra: Bytes,
    aes_extra: Bytes,
    external_attr: u32,
    file_offset: u64,
    aes_overhead: u64,
    crc_mask: u32,
}

struct ActiveMember<'a> {
    stage: Box<dyn BodyStage + 'a>,
    record: MemberRecord,
}

/// The encoder proper, yielding structure-sized blocks. `stream_zip` wraps
/// it in the re-chunker for the fixed-size public contract.
struct RawStream<'a, M>
where
    M: Iterator<Item = Member<'a>>,
{
    members: M,
    options: ArchiveOptions,
    queue: VecDeque<Bytes>,
    active: Option<ActiveMember<'a>>,
    offset: u64,
    central_directory: Vec<Bytes>,
    central_directory_size: u64,
    zip64_end_of_central_directory: bool,
    finalized: bool,
    errored: bool,
}

impl<'a, M> RawStream<'a, M>
where
    M: Iterator<Item = Member<'a>>,
{
    fn new(members: M, options: ArchiveOptions) -> Self {
        Self {
            members,
            options,
            queue: VecDeque::new(),
            active: None,
            offset: 0,
            central_directory: Vec::new(),
            central_directory_size: 0,
            zip64_end_of_central_directory: false,
            finalized: false,
            errored: false,
        }
    }

    /// Single accounting point: every emitted block advances the running
    /// offset before it is handed to the consumer.
    fn emit(&mut self, block: Bytes) {
        if block.is_empty() {
            return;
        }
        self.offset += block.len() as u64;
        self.queue.push_back(block);
    }

    fn begin_member(&mut self, member: Member<'a>) -> Result<()> {
        let Member {
            name,
            modified_at,
            mode,
            method,
            content,
        } = member;

        let resolved = method.resolve(self.offset);
        let kind = resolved.kind;

        let name = Bytes::from(name.into_bytes());
        if name.len() > u16::MAX as usize {
            return Err(ZipStreamError::NameLengthOverflow);
        }

        let file_offset = self.offset;
        if file_offset > kind.offset_limit() {
            return Err(ZipStreamError::OffsetOverflow);
        }

        let dos_time = records::dos_time(modified_at);
        let dos_date = records::dos_date(modified_at);
        let unix_time_extra = if self.options.extended_timestamps {
            records::unix_time_extra(modified_at)
        } else {
            Bytes::new()
        };
        let external_attr = (mode << 16)
            | if name.last() == Some(&b'/') {
                records::MS_DOS_DIRECTORY
            } else {
                0
            };

        let raw_compression: u16 = if kind.is_deflate() { 8 } else { 0 };

        #[cfg(feature = "encryption")]
        let (compression, aes_overhead, aes_flag, aes_extra, crc_mask) =
            if self.options.password.is_some() {
                (
                    99,
                    AesStrength::Aes256.overhead(),
                    records::FLAG_AES,
                    records::aes_extra(raw_compression),
                    0,
                )
            } else {
                (raw_compression, 0, 0, Bytes::new(), u32::MAX)
            };
        #[cfg(not(feature = "encryption"))]
        let (compression, aes_overhead, aes_flag, aes_extra, crc_mask) =
            (raw_compression, 0u64, 0u16, Bytes::new(), u32::MAX);

        let mut flags = records::FLAG_UTF8 | aes_flag;
        if kind.is_deflate() {
            flags |= records::FLAG_DATA_DESCRIPTOR;
        }

        let mut content = EvenChunks::new(content, self.options.chunk_size);

        let (local_header, stage): (Bytes, Box<dyn BodyStage + 'a>) = match kind {
            MethodKind::Deflate64 | MethodKind::Deflate32 => {
                // Sizes and CRC are unknown: zeros or sentinels in the
                // header, real values in the trailing data descriptor.
                let (extra, compressed_size, uncompressed_size) = if kind.is_zip64() {
                    (
                        concat_extras(&[
                            records::zip64_local_extra(0, 0),
                            unix_time_extra.clone(),
                            aes_extra.clone(),
                        ]),
                        0xffff_ffff,
                        0xffff_ffff,
                    )
                } else {
                    (
                        concat_extras(&[unix_time_extra.clone(), aes_extra.clone()]),
                        0,
                        0,
                    )
                };
                let local_header = LocalHeader {
                    version_needed: kind.version_needed(),
                    flags,
                    compression,
                    dos_time,
                    dos_date,
                    crc_32: 0,
                    compressed_size,
                    uncompressed_size,
                    name: &name,
                    extra: &extra,
                }
                .encode();
                let cap = kind.size_limit();
                let compressor = method.compressor(self.options.new_compressor.as_ref());
                (
                    local_header,
                    Box::new(DeflateBody::new(content, compressor, cap, cap)),
                )
            }
            MethodKind::Store64Buffered | MethodKind::Store32Buffered => {
                // The local header must be authoritative, so the content is
                // materialized before any bytes are emitted for this member.
                let (blocks, size, crc_32) = buffer_content(&mut content, kind.size_limit())?;
                let compressed_size = size
                    .checked_add(aes_overhead)
                    .ok_or(ZipStreamError::CompressedSizeOverflow)?;
                if !kind.is_zip64() && compressed_size > u32::MAX as u64 {
                    return Err(ZipStreamError::CompressedSizeOverflow);
                }
                let masked_crc = crc_32 & crc_mask;
                let (extra, header_csize, header_usize) = if kind.is_zip64() {
                    (
                        concat_extras(&[
                            records::zip64_local_extra(size, compressed_size),
                            unix_time_extra.clone(),
                            aes_extra.clone(),
                        ]),
                        0xffff_ffff,
                        0xffff_ffff,
                    )
                } else {
                    (
                        concat_extras(&[unix_time_extra.clone(), aes_extra.clone()]),
                        compressed_size as u32,
                        size as u32,
                    )
                };
                let local_header = LocalHeader {
                    version_needed: kind.version_needed(),
                    flags,
                    compression,
                    dos_time,
                    dos_date,
                    crc_32: masked_crc,
                    compressed_size: header_csize,
                    uncompressed_size: header_usize,
                    name: &name,
                    extra: &extra,
                }
                .encode();
                (local_header, Box::new(BufferedBody::new(blocks, size, crc_32)))
            }
            MethodKind::Store64Streamed | MethodKind::Store32Streamed => {
                let size = resolved.declared_size;
                let crc_32 = resolved.declared_crc;
                if size > kind.size_limit() {
                    return Err(ZipStreamError::UncompressedSizeOverflow);
                }
                let compressed_size = size
                    .checked_add(aes_overhead)
                    .ok_or(ZipStreamError::CompressedSizeOverflow)?;
                if !kind.is_zip64() && compressed_size > u32::MAX as u64 {
                    return Err(ZipStreamError::CompressedSizeOverflow);
                }
                let masked_crc = crc_32 & crc_mask;
                let (extra, header_csize, header_usize) = if kind.is_zip64() {
                    (
                        concat_extras(&[
                            records::zip64_local_extra(size, compressed_size),
                            unix_time_extra.clone(),
                            aes_extra.clone(),
                        ]),
                        0xffff_ffff,
                        0xffff_ffff,
                    )
                } else {
                    (
                        concat_extras(&[unix_time_extra.clone(), aes_extra.clone()]),
                        compressed_size as u32,
                        size as u32,
                    )
                };
                let local_header = LocalHeader {
                    version_needed: kind.version_needed(),
                    flags,
                    compression,
                    dos_time,
                    dos_date,
                    crc_32: masked_crc,
                    compressed_size: header_csize,
                    uncompressed_size: header_usize,
                    name: &name,
                    extra: &extra,
                }
                .encode();
                (
                    local_header,
                    Box::new(StreamedBody::new(content, size, crc_32, kind.size_limit())),
                )
            }
        };

        #[cfg(feature = "encryption")]
        let stage: Box<dyn BodyStage + 'a> = match self.options.password.as_deref() {
            Some(password) => {
                let mut salt = vec![0u8; AesStrength::Aes256.salt_size()];
                (self.options.crypto_random)(&mut salt);
                Box::new(AesBody::new(stage, password, salt)?)
            }
            None => stage,
        };

        self.emit(local_header);
        self.active = Some(ActiveMember {
            stage,
            record: MemberRecord {
                kind,
                auto_upgrade: resolved.auto_upgrade,
                flags,
                compression,
                dos_time,
                dos_date,
                name,
                unix_time_extra,
                aes_extra,
                external_attr,
                file_offset,
                aes_overhead,
                crc_mask,
            },
        });
        Ok(())
    }

    fn step_active(&mut self) -> Result<()> {
        let step = match self.active.as_mut() {
            Some(active) => active.stage.advance()?,
            None => return Ok(()),
        };
        match step {
            Step::Block(block) => self.emit(block),
            Step::Finished(sizes) => {
                if let Some(active) = self.active.take() {
                    self.finish_member(active.record, sizes)?;
                }
            }
        }
        Ok(())
    }

    fn finish_member(&mut self, record: MemberRecord, sizes: BodySizes) -> Result<()> {
        let compressed_size = sizes
            .compressed
            .checked_add(record.aes_overhead)
            .ok_or(ZipStreamError::CompressedSizeOverflow)?;
        if !record.kind.is_zip64() && compressed_size > u32::MAX as u64 {
            return Err(ZipStreamError::CompressedSizeOverflow);
        }
        let masked_crc = sizes.crc_32 & record.crc_mask;

        if record.kind.is_deflate() {
            let descriptor = if record.kind.is_zip64() {
                records::data_descriptor_64(masked_crc, compressed_size, sizes.uncompressed)
            } else {
                records::data_descriptor_32(
                    masked_crc,
                    compressed_size as u32,
                    sizes.uncompressed as u32,
                )
            };
            self.emit(descriptor);
        }

        let extra = if record.kind.is_zip64() {
            concat_extras(&[
                records::zip64_central_extra(
                    sizes.uncompressed,
                    compressed_size,
                    record.file_offset,
                ),
                record.unix_time_extra.clone(),
                record.aes_extra.clone(),
            ])
        } else {
            concat_extras(&[record.unix_time_extra.clone(), record.aes_extra.clone()])
        };
        let (header_csize, header_usize, header_offset) = if record.kind.is_zip64() {
            (0xffff_ffff, 0xffff_ffff, 0xffff_ffff)
        } else {
            (
                compressed_size as u32,
                sizes.uncompressed as u32,
                record.file_offset as u32,
            )
        };
        let entry = CentralHeader {
            version: record.kind.version_needed(),
            flags: record.flags,
            compression: record.compression,
            dos_time: record.dos_time,
            dos_date: record.dos_date,
            crc_32: masked_crc,
            compressed_size: header_csize,
            uncompressed_size: header_usize,
            external_attr: record.external_attr,
            local_header_offset: header_offset,
            name: &record.name,
            extra: &extra,
        }
        .encode();

        self.central_directory_size += entry.len() as u64;
        self.central_directory.push(entry);

        // Sticky: once the archive needs ZIP64 end records, it keeps them.
        self.zip64_end_of_central_directory = self.zip64_end_of_central_directory
            || record.kind.is_zip64()
            || (record.auto_upgrade
                && (self.offset > u32::MAX as u64
                    || self.central_directory.len() > u16::MAX as usize));

        let (max_entries, max_start_offset, max_size) = if self.zip64_end_of_central_directory {
            (u64::MAX, u64::MAX, u64::MAX)
        } else {
            (0xffff, 0xffff_ffff, 0xffff_ffff)
        };
        if self.offset > max_start_offset {
            return Err(ZipStreamError::OffsetOverflow);
        }
        if self.central_directory.len() as u64 > max_entries {
            return Err(ZipStreamError::CentralDirectoryNumberOfEntriesOverflow);
        }
        if self.central_directory_size > max_size {
            return Err(ZipStreamError::CentralDirectorySizeOverflow);
        }
        self.offset
            .checked_add(self.central_directory_size)
            .ok_or(ZipStreamError::OffsetOverflow)?;
        Ok(())
    }

    fn finalize(&mut self) {
        self.finalized = true;
        let central_directory_offset = self.offset;
        let central_directory_size = self.central_directory_size;
        let num_entries = self.central_directory.len() as u64;
        for entry in std::mem::take(&mut self.central_directory) {
            self.emit(entry);
        }
        if self.zip64_end_of_central_directory {
            self.emit(records::zip64_end_of_central_directory(
                num_entries,
                central_directory_size,
                central_directory_offset,
            ));
            self.emit(records::zip64_end_of_central_directory_locator(
                central_directory_offset + central_directory_size,
            ));
            self.emit(records::end_of_central_directory_zip64_sentinel());
        } else {
            self.emit(records::end_of_central_directory(
                num_entries as u16,
                central_directory_size as u32,
                central_directory_offset as u32,
            ));
        }
    }
}

impl<'a, M> Iterator for RawStream<'a, M>
where
    M: Iterator<Item = Member<'a>>,
{
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }
        loop {
            if let Some(block) = self.queue.pop_front() {
                return Some(Ok(block));
            }
            if self.active.is_some() {
                if let Err(e) = self.step_active() {
                    self.errored = true;
                    return Some(Err(e));
                }
                continue;
            }
            if self.finalized {
                return None;
            }
            match self.members.next() {
                Some(member) => {
                    if let Err(e) = self.begin_member(member) {
                        self.errored = true;
                        return Some(Err(e));
                    }
                }
                None => self.finalize(),
            }
        }
    }
}

fn concat_extras(parts: &[Bytes]) -> Bytes {
    let total: usize = parts.iter().map(|p| p.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for part in parts {
        buf.put_slice(part);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn member(name: &str, method: Method, blocks: Vec<&'static [u8]>) -> Member<'static> {
        Member {
            name: name.to_string(),
            modified_at: Utc.with_ymd_and_hms(2021, 1, 1, 21, 1, 12).unwrap(),
            mode: 0o600,
            method,
            content: Box::new(blocks.into_iter().map(|b| Ok(Bytes::from_static(b)))),
        }
    }

    fn collect(members: Vec<Member<'static>>, options: ArchiveOptions) -> Vec<u8> {
        let mut out = Vec::new();
        for block in stream_zip(members, options) {
            out.extend_from_slice(&block.unwrap());
        }
        out
    }

    #[test]
    fn test_empty_archive_is_a_bare_end_record() {
        let out = collect(vec![], ArchiveOptions::new());
        assert_eq!(out.len(), 22);
        assert_eq!(&out[..4], records::END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        assert!(out[4..20].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_store32_layout() {
        let out = collect(
            vec![member("file.txt", Method::Store32, vec![b"hello ", b"world"])],
            ArchiveOptions::new(),
        );
        // local header: 30 fixed + 8 name + 9 UT extra
        assert_eq!(&out[..4], records::LOCAL_HEADER_SIGNATURE);
        assert_eq!(&out[4..6], &20u16.to_le_bytes()); // version needed
        assert_eq!(&out[6..8], &records::FLAG_UTF8.to_le_bytes());
        assert_eq!(&out[8..10], &0u16.to_le_bytes()); // store
        let mut crc = crc32fast::Hasher::new();
        crc.update(b"hello world");
        assert_eq!(&out[14..18], &crc.finalize().to_le_bytes());
        assert_eq!(&out[18..22], &11u32.to_le_bytes()); // compressed size
        assert_eq!(&out[22..26], &11u32.to_le_bytes()); // uncompressed size
        assert_eq!(&out[30..38], b"file.txt");
        assert_eq!(&out[47..58], b"hello world");

        // central directory directly after the data, end record after that
        assert_eq!(&out[58..62], records::CENTRAL_HEADER_SIGNATURE);
        let eocd = out.len() - 22;
        assert_eq!(&out[eocd..eocd + 4], records::END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        assert_eq!(&out[eocd + 8..eocd + 10], &1u16.to_le_bytes());
        assert_eq!(&out[eocd + 16..eocd + 20], &58u32.to_le_bytes()); // cd offset
    }

    #[test]
    fn test_directory_entry_attributes() {
        let out = collect(
            vec![member("dir/", Method::Store32, vec![])],
            ArchiveOptions::new(),
        );
        let cd = 30 + 4 + 9; // empty content, local header only
        assert_eq!(&out[cd..cd + 4], records::CENTRAL_HEADER_SIGNATURE);
        let external = &out[cd + 38..cd + 42];
        assert_eq!(external, &((0o600u32 << 16) | 0x10).to_le_bytes());
    }

    #[test]
    fn test_name_length_overflow() {
        let long = "x".repeat(u16::MAX as usize + 1);
        let mut stream = stream_zip(
            vec![member(&long, Method::Store32, vec![])],
            ArchiveOptions::new(),
        );
        assert!(matches!(
            stream.next(),
            Some(Err(ZipStreamError::NameLengthOverflow))
        ));
    }

    #[test]
    fn test_blocks_respect_chunk_size() {
        let out: Vec<_> = stream_zip(
            vec![member("a", Method::Deflate32, vec![&[0u8; 4096][..]])],
            ArchiveOptions::new().chunk_size(100),
        )
        .map(|b| b.unwrap())
        .collect();
        let last = out.len() - 1;
        assert!(out[..last].iter().all(|b| b.len() == 100));
        assert!((1..=100).contains(&out[last].len()));
    }

    #[test]
    fn test_error_fuses_stream() {
        let failing: Box<dyn Iterator<Item = io::Result<Bytes>>> =
            Box::new(std::iter::once(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "source died",
            ))));
        let members = vec![Member {
            name: "f".to_string(),
            modified_at: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            mode: 0o600,
            method: Method::Deflate32,
            content: failing,
        }];
        let mut stream = stream_zip(members, ArchiveOptions::new().chunk_size(1 << 20));
        // The local header is buffered below the chunk size, so the first
        // pull already surfaces the content error.
        assert!(matches!(stream.next(), Some(Err(ZipStreamError::Io(_)))));
        assert!(stream.next().is_none());
    }
}
