//! Directory record parsing.
//!
//! Directories are flat arrays of 32-byte records.  The walker never hands
//! raw records to the rest of the filesystem; every record is classified
//! into a [`DirRecord`] first.

use super::names::{self, LfnPart};
use bitflags::bitflags;

/// Size of one directory record on disk.
pub const RECORD_SIZE: usize = 32;

/// First byte of a deleted record.
pub const DELETED_MARK: u8 = 0xE5;

bitflags! {
    /// Directory entry attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirAttrs: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
    }
}

/// A decoded 8.3 directory entry.
#[derive(Debug, Clone, Copy)]
pub struct DirEntry {
    /// 11-byte space-padded short name.
    pub short_name: [u8; 11],
    /// Attribute bits.
    pub attrs: DirAttrs,
    /// First cluster of the entry's chain, 0 for an empty file.
    pub first_cluster: u32,
    /// File size in bytes (0 for directories).
    pub size: u32,
}

impl DirEntry {
    /// Whether the entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.attrs.contains(DirAttrs::DIRECTORY)
    }

    /// Whether the entry is `.` or `..`.
    pub fn is_dot(&self) -> bool {
        self.short_name[0] == b'.'
    }

    /// Checksum of the short name, as carried by an owning LFN chain.
    pub fn checksum(&self) -> u8 {
        names::checksum(&self.short_name)
    }

    /// Decode from a raw record.  The caller has already classified the
    /// record as a plain entry.
    pub fn from_bytes(raw: &[u8; RECORD_SIZE]) -> Self {
        let mut short_name = [0u8; 11];
        short_name.copy_from_slice(&raw[0..11]);
        let hi = u16::from_le_bytes([raw[20], raw[21]]) as u32;
        let lo = u16::from_le_bytes([raw[26], raw[27]]) as u32;
        DirEntry {
            short_name,
            attrs: DirAttrs::from_bits_truncate(raw[11]),
            first_cluster: (hi << 16) | lo,
            size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        }
    }

    /// Encode to the on-disk record form.  Timestamp fields stay zero: the
    /// system has no wall clock.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut raw = [0u8; RECORD_SIZE];
        raw[0..11].copy_from_slice(&self.short_name);
        raw[11] = self.attrs.bits();
        raw[20..22].copy_from_slice(&((self.first_cluster >> 16) as u16).to_le_bytes());
        raw[26..28].copy_from_slice(&(self.first_cluster as u16).to_le_bytes());
        raw[28..32].copy_from_slice(&self.size.to_le_bytes());
        raw
    }
}

/// Classification of one 32-byte directory record.
#[derive(Debug, Clone)]
pub enum DirRecord {
    /// First byte 0x00: no further records in this directory.
    EndOfDir,
    /// First byte 0xE5: a deleted record.
    Deleted,
    /// The volume label entry.
    VolumeLabel,
    /// One link of a long-name chain.
    Lfn(LfnPart),
    /// A plain 8.3 entry.
    Entry(DirEntry),
}

/// Classify a raw record.
pub fn parse_record(raw: &[u8; RECORD_SIZE]) -> DirRecord {
    match raw[0] {
        0x00 => DirRecord::EndOfDir,
        DELETED_MARK => DirRecord::Deleted,
        _ => {
            if raw[11] == names::ATTR_LFN {
                DirRecord::Lfn(names::decode_lfn(raw))
            } else if raw[11] & DirAttrs::VOLUME_ID.bits() != 0 {
                DirRecord::VolumeLabel
            } else {
                DirRecord::Entry(DirEntry::from_bytes(raw))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_encode_decode_round_trip() {
        let mut short_name = [b' '; 11];
        short_name[..5].copy_from_slice(b"HELLO");
        short_name[8..].copy_from_slice(b"TXT");
        let entry = DirEntry {
            short_name,
            attrs: DirAttrs::ARCHIVE,
            first_cluster: 0x0012_3456,
            size: 1234,
        };
        let raw = entry.to_bytes();
        match parse_record(&raw) {
            DirRecord::Entry(back) => {
                assert_eq!(back.short_name, short_name);
                assert_eq!(back.first_cluster, 0x0012_3456);
                assert_eq!(back.size, 1234);
                assert!(!back.is_dir());
            }
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[test]
    fn classification() {
        let mut raw = [0u8; RECORD_SIZE];
        assert!(matches!(parse_record(&raw), DirRecord::EndOfDir));

        raw[0] = DELETED_MARK;
        assert!(matches!(parse_record(&raw), DirRecord::Deleted));

        raw[0] = b'A';
        raw[11] = names::ATTR_LFN;
        assert!(matches!(parse_record(&raw), DirRecord::Lfn(_)));

        raw[11] = DirAttrs::VOLUME_ID.bits();
        assert!(matches!(parse_record(&raw), DirRecord::VolumeLabel));

        raw[11] = DirAttrs::DIRECTORY.bits();
        match parse_record(&raw) {
            DirRecord::Entry(e) => assert!(e.is_dir()),
            other => panic!("expected entry, got {:?}", other),
        }
    }
}
