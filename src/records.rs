//! ZIP wire-format records
//!
//! Builders for every structure the encoder emits, all little-endian:
//! local file headers, extra fields, data descriptors, central directory
//! headers, and the end-of-archive record set.
//!
//! Zip format spec:
//! https://pkware.cachefly.net/webdocs/casestudies/APPNOTE.TXT

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Datelike, Timelike, Utc};

pub(crate) const LOCAL_HEADER_SIGNATURE: &[u8; 4] = b"PK\x03\x04";
pub(crate) const DATA_DESCRIPTOR_SIGNATURE: &[u8; 4] = b"PK\x07\x08";
pub(crate) const CENTRAL_HEADER_SIGNATURE: &[u8; 4] = b"PK\x01\x02";
pub(crate) const END_OF_CENTRAL_DIRECTORY_SIGNATURE: &[u8; 4] = b"PK\x05\x06";
pub(crate) const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: &[u8; 4] = b"PK\x06\x06";
pub(crate) const ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE: &[u8; 4] = b"PK\x06\x07";

/// General purpose flag bits
#[cfg(feature = "encryption")]
pub(crate) const FLAG_AES: u16 = 0x0001;
pub(crate) const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub(crate) const FLAG_UTF8: u16 = 0x0800;

/// MS-DOS directory attribute, set for names with a trailing '/'
pub(crate) const MS_DOS_DIRECTORY: u32 = 0x10;

pub(crate) fn dos_date(t: DateTime<Utc>) -> u16 {
    let year = (t.year() as u16).saturating_sub(1980);
    let month = t.month() as u16;
    let day = t.day() as u16;
    day | month << 5 | year << 9
}

pub(crate) fn dos_time(t: DateTime<Utc>) -> u16 {
    let second = (t.second() / 2) as u16;
    let minute = t.minute() as u16;
    let hour = t.hour() as u16;
    second | minute << 5 | hour << 11
}

/// Unix extended-timestamp extra field ("UT"), modification time only.
pub(crate) fn unix_time_extra(t: DateTime<Utc>) -> Bytes {
    let mut buf = BytesMut::with_capacity(9);
    buf.put_slice(b"UT");
    buf.put_u16_le(5); // data size
    buf.put_u8(0x01); // modification time present
    buf.put_i32_le(t.timestamp() as i32);
    buf.freeze()
}

/// WinZip AES extra field: vendor version 2 (AE-2), AES-256.
#[cfg(feature = "encryption")]
pub(crate) fn aes_extra(actual_method: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(11);
    buf.put_u16_le(0x9901);
    buf.put_u16_le(7); // data size
    buf.put_u16_le(2); // vendor version: AE-2
    buf.put_slice(b"AE");
    buf.put_u8(3); // strength: AES-256
    buf.put_u16_le(actual_method);
    buf.freeze()
}

/// ZIP64 extra field for a local header: uncompressed then compressed size.
pub(crate) fn zip64_local_extra(uncompressed_size: u64, compressed_size: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(20);
    buf.put_u16_le(0x0001);
    buf.put_u16_le(16); // data size
    buf.put_u64_le(uncompressed_size);
    buf.put_u64_le(compressed_size);
    buf.freeze()
}

/// ZIP64 extra field for a central header: sizes plus local header offset.
pub(crate) fn zip64_central_extra(
    uncompressed_size: u64,
    compressed_size: u64,
    local_header_offset: u64,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(28);
    buf.put_u16_le(0x0001);
    buf.put_u16_le(24); // data size
    buf.put_u64_le(uncompressed_size);
    buf.put_u64_le(compressed_size);
    buf.put_u64_le(local_header_offset);
    buf.freeze()
}

pub(crate) struct LocalHeader<'a> {
    pub version_needed: u16,
    pub flags: u16,
    pub compression: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    pub crc_32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name: &'a [u8],
    pub extra: &'a [u8],
}

impl LocalHeader<'_> {
    pub(crate) fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(30 + self.name.len() + self.extra.len());
        buf.put_slice(LOCAL_HEADER_SIGNATURE);
        buf.put_u16_le(self.version_needed);
        buf.put_u16_le(self.flags);
        buf.put_u16_le(self.compression);
        buf.put_u16_le(self.dos_time);
        buf.put_u16_le(self.dos_date);
        buf.put_u32_le(self.crc_32);
        buf.put_u32_le(self.compressed_size);
        buf.put_u32_le(self.uncompressed_size);
        buf.put_u16_le(self.name.len() as u16);
        buf.put_u16_le(self.extra.len() as u16);
        buf.put_slice(self.name);
        buf.put_slice(self.extra);
        buf.freeze()
    }
}

pub(crate) struct CentralHeader<'a> {
    /// 20 or 45, used for both version-made-by and version-needed
    pub version: u16,
    pub flags: u16,
    pub compression: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    pub crc_32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub external_attr: u32,
    pub local_header_offset: u32,
    pub name: &'a [u8],
    pub extra: &'a [u8],
}

impl CentralHeader<'_> {
    pub(crate) fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(46 + self.name.len() + self.extra.len());
        buf.put_slice(CENTRAL_HEADER_SIGNATURE);
        buf.put_u8(self.version as u8); // version made by
        buf.put_u8(3); // system made by: UNIX, so external attrs carry mode bits
        buf.put_u8(self.version as u8); // version needed
        buf.put_u8(0); // reserved
        buf.put_u16_le(self.flags);
        buf.put_u16_le(self.compression);
        buf.put_u16_le(self.dos_time);
        buf.put_u16_le(self.dos_date);
        buf.put_u32_le(self.crc_32);
        buf.put_u32_le(self.compressed_size);
        buf.put_u32_le(self.uncompressed_size);
        buf.put_u16_le(self.name.len() as u16);
        buf.put_u16_le(self.extra.len() as u16);
        buf.put_u16_le(0); // file comment length
        buf.put_u16_le(0); // disk number start
        buf.put_u16_le(0); // internal file attributes
        buf.put_u32_le(self.external_attr);
        buf.put_u32_le(self.local_header_offset);
        buf.put_slice(self.name);
        buf.put_slice(self.extra);
        buf.freeze()
    }
}

pub(crate) fn data_descriptor_32(crc_32: u32, compressed_size: u32, uncompressed_size: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_slice(DATA_DESCRIPTOR_SIGNATURE);
    buf.put_u32_le(crc_32);
    buf.put_u32_le(compressed_size);
    buf.put_u32_le(uncompressed_size);
    buf.freeze()
}

pub(crate) fn data_descriptor_64(crc_32: u32, compressed_size: u64, uncompressed_size: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(24);
    buf.put_slice(DATA_DESCRIPTOR_SIGNATURE);
    buf.put_u32_le(crc_32);
    buf.put_u64_le(compressed_size);
    buf.put_u64_le(uncompressed_size);
    buf.freeze()
}

pub(crate) fn end_of_central_directory(
    num_entries: u16,
    central_directory_size: u32,
    central_directory_offset: u32,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(22);
    buf.put_slice(END_OF_CENTRAL_DIRECTORY_SIGNATURE);
    buf.put_u16_le(0); // disk number
    buf.put_u16_le(0); // disk with central directory
    buf.put_u16_le(num_entries); // entries on this disk
    buf.put_u16_le(num_entries); // entries in total
    buf.put_u32_le(central_directory_size);
    buf.put_u32_le(central_directory_offset);
    buf.put_u16_le(0); // comment length
    buf.freeze()
}

/// Classic end record emitted after the ZIP64 records, every overflow-prone
/// field at its sentinel.
pub(crate) fn end_of_central_directory_zip64_sentinel() -> Bytes {
    let mut buf = BytesMut::with_capacity(22);
    buf.put_slice(END_OF_CENTRAL_DIRECTORY_SIGNATURE);
    buf.put_u16_le(0xffff);
    buf.put_u16_le(0xffff);
    buf.put_u16_le(0xffff);
    buf.put_u16_le(0xffff);
    buf.put_u32_le(0xffff_ffff);
    buf.put_u32_le(0xffff_ffff);
    buf.put_u16_le(0); // comment length
    buf.freeze()
}

pub(crate) fn zip64_end_of_central_directory(
    num_entries: u64,
    central_directory_size: u64,
    central_directory_offset: u64,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(56);
    buf.put_slice(ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE);
    buf.put_u64_le(44); // size of the remaining record
    buf.put_u16_le(45); // version made by
    buf.put_u16_le(45); // version needed
    buf.put_u32_le(0); // disk number
    buf.put_u32_le(0); // disk with central directory
    buf.put_u64_le(num_entries); // entries on this disk
    buf.put_u64_le(num_entries); // entries in total
    buf.put_u64_le(central_directory_size);
    buf.put_u64_le(central_directory_offset);
    buf.freeze()
}

pub(crate) fn zip64_end_of_central_directory_locator(record_offset: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(20);
    buf.put_slice(ZIP64_END_OF_CENTRAL_DIRECTORY_LOCATOR_SIGNATURE);
    buf.put_u32_le(0); // disk with the zip64 end of central directory record
    buf.put_u64_le(record_offset);
    buf.put_u32_le(1); // total number of disks
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dos_date_time() {
        let t = Utc.with_ymd_and_hms(2006, 10, 11, 15, 40, 56).unwrap();
        assert_eq!(dos_time(t), 0x7d1c);
        assert_eq!(dos_date(t), 0x354b);
    }

    #[test]
    fn test_dos_date_saturates_before_1980() {
        let t = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(dos_date(t) >> 9, 0);
    }

    #[test]
    fn test_unix_time_extra_layout() {
        let t = Utc.with_ymd_and_hms(2021, 1, 1, 21, 1, 12).unwrap();
        let extra = unix_time_extra(t);
        assert_eq!(extra.len(), 9);
        assert_eq!(&extra[..2], b"UT");
        assert_eq!(&extra[2..4], &5u16.to_le_bytes());
        assert_eq!(extra[4], 0x01);
        assert_eq!(&extra[5..9], &(t.timestamp() as i32).to_le_bytes());
    }

    #[test]
    fn test_record_lengths() {
        assert_eq!(zip64_local_extra(1, 2).len(), 20);
        assert_eq!(zip64_central_extra(1, 2, 3).len(), 28);
        assert_eq!(data_descriptor_32(0, 0, 0).len(), 16);
        assert_eq!(data_descriptor_64(0, 0, 0).len(), 24);
        assert_eq!(end_of_central_directory(0, 0, 0).len(), 22);
        assert_eq!(end_of_central_directory_zip64_sentinel().len(), 22);
        assert_eq!(zip64_end_of_central_directory(0, 0, 0).len(), 56);
        assert_eq!(zip64_end_of_central_directory_locator(0).len(), 20);
    }

    #[cfg(feature = "encryption")]
    #[test]
    fn test_aes_extra_layout() {
        let extra = aes_extra(8);
        assert_eq!(extra.len(), 11);
        assert_eq!(&extra[..2], &0x9901u16.to_le_bytes());
        assert_eq!(&extra[2..4], &7u16.to_le_bytes());
        assert_eq!(&extra[4..6], &2u16.to_le_bytes());
        assert_eq!(&extra[6..8], b"AE");
        assert_eq!(extra[8], 3);
        assert_eq!(&extra[9..11], &8u16.to_le_bytes());
    }

    #[test]
    fn test_local_header_layout() {
        let header = LocalHeader {
            version_needed: 20,
            flags: FLAG_UTF8,
            compression: 8,
            dos_time: 0x7d1c,
            dos_date: 0x354b,
            crc_32: 0xdead_beef,
            compressed_size: 10,
            uncompressed_size: 20,
            name: b"a.txt",
            extra: &[],
        }
        .encode();
        assert_eq!(header.len(), 35);
        assert_eq!(&header[..4], LOCAL_HEADER_SIGNATURE);
        assert_eq!(&header[4..6], &20u16.to_le_bytes());
        assert_eq!(&header[14..18], &0xdead_beefu32.to_le_bytes());
        assert_eq!(&header[26..28], &5u16.to_le_bytes());
        assert_eq!(&header[30..], b"a.txt");
    }

    #[test]
    fn test_central_header_layout() {
        let header = CentralHeader {
            version: 45,
            flags: FLAG_UTF8,
            compression: 8,
            dos_time: 0,
            dos_date: 0,
            crc_32: 0,
            compressed_size: 0xffff_ffff,
            uncompressed_size: 0xffff_ffff,
            external_attr: 0o600 << 16,
            local_header_offset: 0xffff_ffff,
            name: b"a",
            extra: b"xx",
        }
        .encode();
        assert_eq!(header.len(), 49);
        assert_eq!(&header[..4], CENTRAL_HEADER_SIGNATURE);
        assert_eq!(header[4], 45); // version made by
        assert_eq!(header[5], 3); // system made by
        assert_eq!(header[6], 45); // version needed
        assert_eq!(header[7], 0); // reserved
        assert_eq!(&header[38..42], &(0o600u32 << 16).to_le_bytes());
        assert_eq!(&header[46..47], b"a");
    }
}
