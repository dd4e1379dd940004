//! Per-member output method selection
//!
//! Each member names a method controlling how its data region is produced:
//! whether it is deflated or stored, whether sizes and CRC are known before
//! the data is emitted, and whether 32-bit or 64-bit structural fields are
//! used. The method resolves to one of six kinds at the member's starting
//! offset.

use flate2::{Compress, Compression};

/// Largest input that raw deflate cannot expand past 0xffffffff at the
/// default memLevel of 8: n + (n >> 12) + (n >> 14) + (n >> 25) + 7.
const DEFLATE_ZIP32_INPUT_LIMIT: u64 = 4_293_656_841;

/// How a member is written into the archive.
///
/// The `*64` methods always use ZIP64 structural fields and force the ZIP64
/// end-of-archive records; the `*32` methods fail with an overflow error if
/// the member does not fit 32-bit bounds. [`Method::DeflateAuto`] picks
/// between the two per member and silently upgrades the end records when the
/// archive outgrows classic limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// DEFLATE with ZIP64 fields and a ZIP64 data descriptor
    Deflate64,
    /// DEFLATE with classic fields and a ZIP32 data descriptor
    Deflate32,
    /// Stored without compression; content is buffered in memory so the
    /// local header can carry the exact size and CRC (no data descriptor)
    Store64,
    /// Stored without compression, buffered, classic 32-bit fields
    Store32,
    /// Stored without buffering; the caller declares size and CRC up front
    /// and the encoder verifies them against the streamed content
    Store64Streamed { uncompressed_size: u64, crc_32: u32 },
    /// Streamed store with classic 32-bit fields
    Store32Streamed { uncompressed_size: u64, crc_32: u32 },
    /// DEFLATE that picks 32- or 64-bit fields from the declared input size
    /// and the member's starting offset, upgrading the end records as needed
    DeflateAuto { uncompressed_size: u64, level: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MethodKind {
    Deflate64,
    Deflate32,
    Store64Buffered,
    Store32Buffered,
    Store64Streamed,
    Store32Streamed,
}

impl MethodKind {
    pub(crate) fn is_zip64(self) -> bool {
        matches!(
            self,
            MethodKind::Deflate64 | MethodKind::Store64Buffered | MethodKind::Store64Streamed
        )
    }

    pub(crate) fn is_deflate(self) -> bool {
        matches!(self, MethodKind::Deflate64 | MethodKind::Deflate32)
    }

    pub(crate) fn version_needed(self) -> u16 {
        if self.is_zip64() {
            45
        } else {
            20
        }
    }

    /// Bound on the member's starting offset.
    pub(crate) fn offset_limit(self) -> u64 {
        if self.is_zip64() {
            u64::MAX
        } else {
            u32::MAX as u64
        }
    }

    /// Bound on the member's uncompressed and compressed byte counts.
    pub(crate) fn size_limit(self) -> u64 {
        if self.is_zip64() {
            u64::MAX
        } else {
            u32::MAX as u64
        }
    }
}

pub(crate) struct ResolvedMethod {
    pub kind: MethodKind,
    pub auto_upgrade: bool,
    pub declared_size: u64,
    pub declared_crc: u32,
}

impl Method {
    /// Resolve the method at the member's starting offset.
    pub(crate) fn resolve(&self, offset: u64) -> ResolvedMethod {
        match *self {
            Method::Deflate64 => ResolvedMethod {
                kind: MethodKind::Deflate64,
                auto_upgrade: false,
                declared_size: 0,
                declared_crc: 0,
            },
            Method::Deflate32 => ResolvedMethod {
                kind: MethodKind::Deflate32,
                auto_upgrade: false,
                declared_size: 0,
                declared_crc: 0,
            },
            Method::Store64 => ResolvedMethod {
                kind: MethodKind::Store64Buffered,
                auto_upgrade: false,
                declared_size: 0,
                declared_crc: 0,
            },
            Method::Store32 => ResolvedMethod {
                kind: MethodKind::Store32Buffered,
                auto_upgrade: false,
                declared_size: 0,
                declared_crc: 0,
            },
            Method::Store64Streamed {
                uncompressed_size,
                crc_32,
            } => ResolvedMethod {
                kind: MethodKind::Store64Streamed,
                auto_upgrade: false,
                declared_size: uncompressed_size,
                declared_crc: crc_32,
            },
            Method::Store32Streamed {
                uncompressed_size,
                crc_32,
            } => ResolvedMethod {
                kind: MethodKind::Store32Streamed,
                auto_upgrade: false,
                declared_size: uncompressed_size,
                declared_crc: crc_32,
            },
            Method::DeflateAuto {
                uncompressed_size, ..
            } => {
                let kind = if uncompressed_size > DEFLATE_ZIP32_INPUT_LIMIT
                    || offset > u32::MAX as u64
                {
                    MethodKind::Deflate64
                } else {
                    MethodKind::Deflate32
                };
                ResolvedMethod {
                    kind,
                    auto_upgrade: true,
                    declared_size: 0,
                    declared_crc: 0,
                }
            }
        }
    }

    /// Fresh raw-deflate compressor for this member.
    pub(crate) fn compressor(&self, default: &(dyn Fn() -> Compress + Send)) -> Compress {
        match *self {
            Method::DeflateAuto { level, .. } => {
                Compress::new(Compression::new(level), false)
            }
            _ => default(),
        }
    }
}
