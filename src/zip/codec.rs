//! Fixed-width little-endian field codecs.
//!
//! All ZIP integers are unsigned. The 8-byte Zip64 fields use bit 63 as a
//! magnitude bit, which `u64` represents directly.

use byteorder::{ByteOrder, LittleEndian};

/// Sentinel stored in a 16-bit field whose real value lives in a Zip64 record.
pub const ZIP64_MAGIC_SHORT: u16 = 0xFFFF;

/// Sentinel stored in a 32-bit field whose real value lives in a Zip64 record.
pub const ZIP64_MAGIC: u32 = 0xFFFF_FFFF;

/// Decode the 16-bit field at `at`. Panics if `buf` is too short.
pub fn get_u16(buf: &[u8], at: usize) -> u16 {
    LittleEndian::read_u16(&buf[at..at + 2])
}

/// Decode the 32-bit field at `at`. Panics if `buf` is too short.
pub fn get_u32(buf: &[u8], at: usize) -> u32 {
    LittleEndian::read_u32(&buf[at..at + 4])
}

/// Decode the 64-bit field at `at`. Panics if `buf` is too short.
pub fn get_u64(buf: &[u8], at: usize) -> u64 {
    LittleEndian::read_u64(&buf[at..at + 8])
}

pub fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    LittleEndian::write_u32(&mut buf[at..at + 4], value);
}

pub fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    LittleEndian::write_u64(&mut buf[at..at + 8], value);
}

/// Narrow a 64-bit value to its 32-bit field, or `None` if it needs Zip64.
///
/// `0xFFFFFFFF` itself is rejected because readers treat it as the Zip64 sentinel.
pub fn fits_u32(value: u64) -> Option<u32> {
    u32::try_from(value).ok().filter(|v| *v != ZIP64_MAGIC)
}

/// Narrow to 32 bits, saturating at the Zip64 sentinel.
pub fn saturate_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(ZIP64_MAGIC)
}
