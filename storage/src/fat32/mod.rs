//! FAT32 filesystem with long-filename support.
//!
//! The volume owns a borrowed block device and a FAT sector cache; all
//! operations are path-based and run from the kernel thread (the
//! filesystem is never entered from an interrupt handler).
//!
//! Write ordering is crash-conscious: a rewrite commits the new cluster
//! chain and the directory entry before the old chain is freed, so an
//! interruption at any point leaves either the old or the new contents
//! readable, never a dangling entry.

pub mod dir;
pub mod names;

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::block::{BlockDevice, SECTOR_SIZE};
use crate::cache::FatCache;
use crate::partition;
use crate::FsError;

use dir::{parse_record, DirAttrs, DirEntry, DirRecord, DELETED_MARK, RECORD_SIZE};

/// A free FAT entry.
pub const FAT_FREE: u32 = 0;
/// The end-of-chain value we write.
pub const FAT_EOC: u32 = 0x0FFF_FFFF;
/// Lowest value recognized as end-of-chain.
const EOC_MIN: u32 = 0x0FFF_FFF8;
/// FAT32 entries are 28-bit; the top nibble is reserved.
const ENTRY_MASK: u32 = 0x0FFF_FFFF;

/// Parsed boot-sector geometry.
#[derive(Debug, Clone, Copy)]
pub struct FsInfo {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub fat_size: u32,
    pub root_cluster: u32,
    pub data_start_sector: u32,
    pub total_clusters: u32,
}

/// Metadata for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// File size in bytes (0 for directories).
    pub size: u32,
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// First cluster, 0 for an empty file.
    pub first_cluster: u32,
}

/// Position of a 32-byte record inside a directory chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecLoc {
    cluster: u32,
    offset: usize,
}

/// A located directory entry with its long-name records, if any.
struct Found {
    entry: DirEntry,
    loc: RecLoc,
    lfn_locs: Vec<RecLoc>,
}

/// A mounted FAT32 volume.
pub struct Fat32Volume<'d> {
    dev: &'d dyn BlockDevice,
    /// Partition origin; all sector numbers below are relative to it.
    base_lba: u32,
    info: FsInfo,
    cache: FatCache,
}

impl<'d> Fat32Volume<'d> {
    /// Mount the first FAT32 partition on `dev`.
    ///
    /// An MBR is consulted if present (partition 2 preferred, then 1, then
    /// any FAT32 slot); a device without a usable partition table is
    /// treated as a bare FAT32 volume at LBA 0.
    pub fn mount(dev: &'d dyn BlockDevice) -> Result<Self, FsError> {
        let base_lba = match partition::read_mbr(dev)? {
            Some(parts) => partition::select_fat32(&parts).unwrap_or(0),
            None => 0,
        };

        let mut sector = [0u8; SECTOR_SIZE];
        dev.read(base_lba, &mut sector, 1)?;

        let bytes_per_sector = u16::from_le_bytes([sector[11], sector[12]]);
        let sectors_per_cluster = sector[13];
        let reserved_sectors = u16::from_le_bytes([sector[14], sector[15]]);
        let num_fats = sector[16];
        let root_entry_count = u16::from_le_bytes([sector[17], sector[18]]);
        let fat_size_16 = u16::from_le_bytes([sector[22], sector[23]]);
        let total_sectors_32 =
            u32::from_le_bytes([sector[32], sector[33], sector[34], sector[35]]);
        let fat_size_32 = u32::from_le_bytes([sector[36], sector[37], sector[38], sector[39]]);
        let root_cluster = u32::from_le_bytes([sector[44], sector[45], sector[46], sector[47]]);

        // FAT32 is identified by what it lacks: no 16-bit FAT size, no
        // fixed root directory.
        if bytes_per_sector as usize != SECTOR_SIZE
            || fat_size_16 != 0
            || root_entry_count != 0
            || sectors_per_cluster == 0
            || fat_size_32 == 0
            || num_fats == 0
        {
            return Err(FsError::IOError);
        }

        let data_start_sector = reserved_sectors as u32 + num_fats as u32 * fat_size_32;
        let total_clusters =
            (total_sectors_32 - data_start_sector) / sectors_per_cluster as u32;

        Ok(Fat32Volume {
            dev,
            base_lba,
            info: FsInfo {
                bytes_per_sector,
                sectors_per_cluster,
                reserved_sectors,
                num_fats,
                fat_size: fat_size_32,
                root_cluster,
                data_start_sector,
                total_clusters,
            },
            cache: FatCache::new(),
        })
    }

    /// Volume geometry.
    pub fn info(&self) -> &FsInfo {
        &self.info
    }

    /// Bytes per cluster.
    pub fn cluster_size(&self) -> usize {
        self.info.sectors_per_cluster as usize * SECTOR_SIZE
    }

    /// Count free clusters by scanning the FAT.
    pub fn free_clusters(&mut self) -> Result<u32, FsError> {
        let mut free = 0;
        for c in 2..2 + self.info.total_clusters {
            if self.fat_entry(c)? == FAT_FREE {
                free += 1;
            }
        }
        Ok(free)
    }

    // ── Sector and cluster I/O ──────────────────────────────────────

    fn read_sectors(&self, sector: u32, buf: &mut [u8], count: u32) -> Result<(), FsError> {
        self.dev.read(self.base_lba + sector, buf, count)?;
        Ok(())
    }

    fn write_sectors(&self, sector: u32, buf: &[u8], count: u32) -> Result<(), FsError> {
        self.dev.write(self.base_lba + sector, buf, count)?;
        Ok(())
    }

    fn cluster_first_sector(&self, cluster: u32) -> u32 {
        self.info.data_start_sector + (cluster - 2) * self.info.sectors_per_cluster as u32
    }

    fn read_cluster(&self, cluster: u32, buf: &mut [u8]) -> Result<(), FsError> {
        self.read_sectors(
            self.cluster_first_sector(cluster),
            buf,
            self.info.sectors_per_cluster as u32,
        )
    }

    fn write_cluster(&self, cluster: u32, buf: &[u8]) -> Result<(), FsError> {
        self.write_sectors(
            self.cluster_first_sector(cluster),
            buf,
            self.info.sectors_per_cluster as u32,
        )
    }

    // ── FAT access ──────────────────────────────────────────────────

    /// Read a FAT1 sector through the cache.  `rel_sector` is
    /// partition-relative.
    fn read_fat_sector(&mut self, rel_sector: u32) -> Result<[u8; SECTOR_SIZE], FsError> {
        if let Some(data) = self.cache.get(rel_sector) {
            return Ok(*data);
        }
        let mut buf = [0u8; SECTOR_SIZE];
        self.read_sectors(rel_sector, &mut buf, 1)?;
        self.cache.insert(rel_sector, &buf);
        Ok(buf)
    }

    fn fat_location(&self, cluster: u32) -> (u32, usize) {
        let byte = cluster as usize * 4;
        (
            self.info.reserved_sectors as u32 + (byte / SECTOR_SIZE) as u32,
            byte % SECTOR_SIZE,
        )
    }

    fn check_cluster(&self, cluster: u32) -> Result<(), FsError> {
        if cluster < 2 || cluster >= 2 + self.info.total_clusters {
            return Err(FsError::IOError);
        }
        Ok(())
    }

    /// `next(c)`: the FAT entry for `cluster`, masked to 28 bits.
    fn fat_entry(&mut self, cluster: u32) -> Result<u32, FsError> {
        self.check_cluster(cluster)?;
        let (sector, offset) = self.fat_location(cluster);
        let buf = self.read_fat_sector(sector)?;
        Ok(u32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]) & ENTRY_MASK)
    }

    /// `set(c, v)`: update both FAT copies, invalidating the cache slot.
    /// The reserved top nibble of the entry is preserved.
    fn set_fat_entry(&mut self, cluster: u32, value: u32) -> Result<(), FsError> {
        self.check_cluster(cluster)?;
        let (sector, offset) = self.fat_location(cluster);
        let mut buf = self.read_fat_sector(sector)?;
        let old = u32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]);
        let new = (old & !ENTRY_MASK) | (value & ENTRY_MASK);
        buf[offset..offset + 4].copy_from_slice(&new.to_le_bytes());

        self.write_sectors(sector, &buf, 1)?;
        if self.info.num_fats >= 2 {
            self.write_sectors(sector + self.info.fat_size, &buf, 1)?;
        }
        self.cache.invalidate(sector);
        Ok(())
    }

    /// `alloc()`: claim the lowest free cluster and mark it end-of-chain.
    fn alloc_cluster(&mut self) -> Result<u32, FsError> {
        for c in 2..2 + self.info.total_clusters {
            if self.fat_entry(c)? == FAT_FREE {
                self.set_fat_entry(c, FAT_EOC)?;
                return Ok(c);
            }
        }
        Err(FsError::OutOfSpace)
    }

    /// `free_chain(c)`: release a chain.  Idempotent over end-of-chain and
    /// already-free entries.
    fn free_chain(&mut self, start: u32) -> Result<(), FsError> {
        let mut cluster = start;
        for _ in 0..=self.info.total_clusters {
            if cluster < 2 || cluster >= EOC_MIN {
                return Ok(());
            }
            let next = self.fat_entry(cluster)?;
            self.set_fat_entry(cluster, FAT_FREE)?;
            if next == FAT_FREE {
                return Ok(());
            }
            cluster = next;
        }
        Err(FsError::IOError)
    }

    /// Chain successor or `None` at end-of-chain.
    fn chain_next(&mut self, cluster: u32) -> Result<Option<u32>, FsError> {
        let next = self.fat_entry(cluster)?;
        if next >= EOC_MIN || next < 2 {
            Ok(None)
        } else {
            Ok(Some(next))
        }
    }

    // ── Directory walking ───────────────────────────────────────────

    /// Walk every record of the directory chain at `start`, stopping at
    /// the end-of-directory marker or when `f` returns `false`.
    fn walk_dir<F>(&mut self, start: u32, mut f: F) -> Result<(), FsError>
    where
        F: FnMut(RecLoc, &DirRecord) -> bool,
    {
        let cs = self.cluster_size();
        let mut buf = vec![0u8; cs];
        let mut cluster = start;
        for _ in 0..=self.info.total_clusters {
            self.read_cluster(cluster, &mut buf)?;
            for offset in (0..cs).step_by(RECORD_SIZE) {
                let mut raw = [0u8; RECORD_SIZE];
                raw.copy_from_slice(&buf[offset..offset + RECORD_SIZE]);
                let record = parse_record(&raw);
                let stop_after = matches!(record, DirRecord::EndOfDir);
                if !f(RecLoc { cluster, offset }, &record) || stop_after {
                    return Ok(());
                }
            }
            match self.chain_next(cluster)? {
                Some(next) => cluster = next,
                None => return Ok(()),
            }
        }
        Err(FsError::IOError)
    }

    /// Find `name` in the directory at `dir_cluster`, matching either the
    /// long name or the 8.3 display form, case-insensitively.
    fn find_in_dir(&mut self, dir_cluster: u32, name: &str) -> Result<Option<Found>, FsError> {
        let mut collector = names::LfnCollector::new();
        let mut lfn_locs: Vec<RecLoc> = Vec::new();
        let mut found: Option<Found> = None;

        self.walk_dir(dir_cluster, |loc, record| {
            match record {
                DirRecord::Deleted => {
                    collector.reset();
                    lfn_locs.clear();
                }
                DirRecord::VolumeLabel => {
                    collector.reset();
                    lfn_locs.clear();
                }
                DirRecord::Lfn(part) => {
                    collector.push(part);
                    lfn_locs.push(loc);
                }
                DirRecord::Entry(entry) => {
                    let long = collector.take(entry.checksum());
                    let locs = if long.is_some() {
                        core::mem::take(&mut lfn_locs)
                    } else {
                        lfn_locs.clear();
                        Vec::new()
                    };
                    let matches = long
                        .as_deref()
                        .is_some_and(|l| names::eq_ignore_case(l, name))
                        || names::eq_ignore_case(&names::unpack_short(&entry.short_name), name);
                    if matches {
                        found = Some(Found {
                            entry: *entry,
                            loc,
                            lfn_locs: locs,
                        });
                        return false;
                    }
                }
                DirRecord::EndOfDir => {}
            }
            true
        })?;

        Ok(found)
    }

    /// All real entries of a directory, in on-disk order, with their
    /// display names.
    fn list_dir_cluster(&mut self, dir_cluster: u32) -> Result<Vec<(String, DirEntry)>, FsError> {
        let mut collector = names::LfnCollector::new();
        let mut out = Vec::new();
        self.walk_dir(dir_cluster, |_loc, record| {
            match record {
                DirRecord::Deleted | DirRecord::VolumeLabel => collector.reset(),
                DirRecord::Lfn(part) => collector.push(part),
                DirRecord::Entry(entry) => {
                    let name = collector
                        .take(entry.checksum())
                        .unwrap_or_else(|| names::unpack_short(&entry.short_name));
                    out.push((name, *entry));
                }
                DirRecord::EndOfDir => {}
            }
            true
        })?;
        Ok(out)
    }

    // ── Record writing ──────────────────────────────────────────────

    /// Write records to consecutive locations, one cluster read-modify-write
    /// per touched cluster.
    fn write_records(&mut self, locs: &[RecLoc], records: &[[u8; RECORD_SIZE]]) -> Result<(), FsError> {
        debug_assert_eq!(locs.len(), records.len());
        let cs = self.cluster_size();
        let mut buf = vec![0u8; cs];
        let mut loaded: Option<u32> = None;

        for (loc, rec) in locs.iter().zip(records.iter()) {
            if loaded != Some(loc.cluster) {
                if let Some(c) = loaded {
                    self.write_cluster(c, &buf)?;
                }
                self.read_cluster(loc.cluster, &mut buf)?;
                loaded = Some(loc.cluster);
            }
            buf[loc.offset..loc.offset + RECORD_SIZE].copy_from_slice(rec);
        }
        if let Some(c) = loaded {
            self.write_cluster(c, &buf)?;
        }
        Ok(())
    }

    /// Find `needed` consecutive free record slots in the directory,
    /// allocating and zeroing a fresh cluster to extend it if necessary.
    fn find_free_run(&mut self, dir_cluster: u32, needed: usize) -> Result<Vec<RecLoc>, FsError> {
        let cs = self.cluster_size();
        let mut buf = vec![0u8; cs];
        let mut run: Vec<RecLoc> = Vec::new();
        let mut cluster = dir_cluster;

        for _ in 0..=self.info.total_clusters {
            self.read_cluster(cluster, &mut buf)?;
            for offset in (0..cs).step_by(RECORD_SIZE) {
                let first = buf[offset];
                if first == 0x00 || first == DELETED_MARK {
                    run.push(RecLoc { cluster, offset });
                    if run.len() == needed {
                        return Ok(run);
                    }
                } else {
                    run.clear();
                }
            }
            match self.chain_next(cluster)? {
                Some(next) => cluster = next,
                None => {
                    // Extend the directory with a zeroed cluster.
                    let fresh = self.alloc_cluster()?;
                    let zeros = vec![0u8; cs];
                    if let Err(e) = self.write_cluster(fresh, &zeros) {
                        let _ = self.set_fat_entry(fresh, FAT_FREE);
                        return Err(e);
                    }
                    self.set_fat_entry(cluster, fresh)?;
                    cluster = fresh;
                }
            }
        }
        Err(FsError::IOError)
    }

    /// Create a directory entry (plus LFN chain when the name needs one).
    /// Returns the location of the 8.3 record.  Size is written as 0; the
    /// caller patches it afterwards if needed.
    fn create_dir_entry(
        &mut self,
        parent_cluster: u32,
        name: &str,
        attrs: DirAttrs,
        first_cluster: u32,
    ) -> Result<RecLoc, FsError> {
        let mut records: Vec<[u8; RECORD_SIZE]> = Vec::new();

        let short = match names::pack_short(name) {
            Some(short) => short,
            None => {
                // Long name: derive a collision-free 8.3 basis, then the
                // LFN chain tagged with its checksum.
                let existing: Vec<[u8; 11]> = self
                    .list_dir_cluster(parent_cluster)?
                    .into_iter()
                    .map(|(_, e)| e.short_name)
                    .collect();
                let basis =
                    names::gen_short_basis(name, |cand| existing.iter().any(|s| s == cand));
                let lfn = names::encode_lfn(name, names::checksum(&basis))
                    .ok_or(FsError::NameTooLong)?;
                records.extend(lfn);
                basis
            }
        };

        let entry = DirEntry {
            short_name: short,
            attrs,
            first_cluster,
            size: 0,
        };
        records.push(entry.to_bytes());

        let locs = self.find_free_run(parent_cluster, records.len())?;
        self.write_records(&locs, &records)?;
        Ok(*locs.last().ok_or(FsError::IOError)?)
    }

    /// Patch the first-cluster and size fields of an existing 8.3 record.
    fn update_entry(&mut self, loc: RecLoc, first_cluster: u32, size: u32) -> Result<(), FsError> {
        let cs = self.cluster_size();
        let mut buf = vec![0u8; cs];
        self.read_cluster(loc.cluster, &mut buf)?;
        let mut raw = [0u8; RECORD_SIZE];
        raw.copy_from_slice(&buf[loc.offset..loc.offset + RECORD_SIZE]);
        let mut entry = match parse_record(&raw) {
            DirRecord::Entry(e) => e,
            _ => return Err(FsError::IOError),
        };
        entry.first_cluster = first_cluster;
        entry.size = size;
        buf[loc.offset..loc.offset + RECORD_SIZE].copy_from_slice(&entry.to_bytes());
        self.write_cluster(loc.cluster, &buf)
    }

    /// Mark an entry's records (LFN chain included) deleted, then truncate
    /// any deleted tail of the directory back to end-of-directory zeros.
    fn remove_entry_records(&mut self, dir_cluster: u32, found: &Found) -> Result<(), FsError> {
        let cs = self.cluster_size();
        let mut buf = vec![0u8; cs];
        let mut locs: Vec<RecLoc> = found.lfn_locs.clone();
        locs.push(found.loc);

        let mut loaded: Option<u32> = None;
        for loc in &locs {
            if loaded != Some(loc.cluster) {
                if let Some(c) = loaded {
                    self.write_cluster(c, &buf)?;
                }
                self.read_cluster(loc.cluster, &mut buf)?;
                loaded = Some(loc.cluster);
            }
            buf[loc.offset] = DELETED_MARK;
        }
        if let Some(c) = loaded {
            self.write_cluster(c, &buf)?;
        }

        self.truncate_trailing_deleted(dir_cluster)
    }

    /// Rewrite deleted records that sit after the last live record as
    /// end-of-directory zeros, so churn does not grow directories forever.
    fn truncate_trailing_deleted(&mut self, dir_cluster: u32) -> Result<(), FsError> {
        let mut locs: Vec<(RecLoc, bool)> = Vec::new();
        self.walk_dir(dir_cluster, |loc, record| {
            let deleted = matches!(record, DirRecord::Deleted);
            if !matches!(record, DirRecord::EndOfDir) {
                locs.push((loc, deleted));
            }
            true
        })?;

        let last_used = locs.iter().rposition(|(_, deleted)| !deleted);
        let tail_start = match last_used {
            Some(i) => i + 1,
            None => 0,
        };
        let tail: Vec<RecLoc> = locs[tail_start..].iter().map(|(l, _)| *l).collect();
        if tail.is_empty() {
            return Ok(());
        }
        let zeros = vec![[0u8; RECORD_SIZE]; tail.len()];
        self.write_records(&tail, &zeros)
    }

    // ── Path resolution ─────────────────────────────────────────────

    fn components(path: &str) -> impl DoubleEndedIterator<Item = &str> {
        path.split('/').filter(|c| !c.is_empty())
    }

    /// Resolve a path to the first cluster of the directory it names.
    fn resolve_dir(&mut self, path: &str) -> Result<u32, FsError> {
        let mut cluster = self.info.root_cluster;
        for comp in Self::components(path) {
            let found = self.find_in_dir(cluster, comp)?.ok_or(FsError::NotFound)?;
            if !found.entry.is_dir() {
                return Err(FsError::NotADirectory);
            }
            cluster = self.dir_entry_cluster(&found.entry);
        }
        Ok(cluster)
    }

    /// A directory entry's chain start; `..` entries pointing at the root
    /// store 0.
    fn dir_entry_cluster(&self, entry: &DirEntry) -> u32 {
        if entry.first_cluster == 0 {
            self.info.root_cluster
        } else {
            entry.first_cluster
        }
    }

    /// Split a path into its parent's cluster and the final component.
    fn resolve_parent<'p>(&mut self, path: &'p str) -> Result<(u32, &'p str), FsError> {
        let trimmed = path.trim_end_matches('/');
        let last = Self::components(trimmed).next_back().ok_or(FsError::NotFound)?;
        let parent_len = trimmed.len() - last.len();
        let parent = self.resolve_dir(&trimmed[..parent_len])?;
        Ok((parent, last))
    }

    fn find_path(&mut self, path: &str) -> Result<Option<Found>, FsError> {
        let (parent, name) = self.resolve_parent(path)?;
        self.find_in_dir(parent, name)
    }

    // ── Public operations ───────────────────────────────────────────

    /// Metadata for `path`.
    pub fn stat(&mut self, path: &str) -> Result<FileStat, FsError> {
        if Self::components(path).next().is_none() {
            return Ok(FileStat {
                size: 0,
                is_dir: true,
                first_cluster: self.info.root_cluster,
            });
        }
        let found = self.find_path(path)?.ok_or(FsError::NotFound)?;
        let first_cluster = if found.entry.is_dir() {
            self.dir_entry_cluster(&found.entry)
        } else {
            found.entry.first_cluster
        };
        Ok(FileStat {
            size: found.entry.size,
            is_dir: found.entry.is_dir(),
            first_cluster,
        })
    }

    /// List a directory in on-disk order.
    pub fn list_dir(&mut self, path: &str) -> Result<Vec<(String, FileStat)>, FsError> {
        let cluster = self.resolve_dir(path)?;
        Ok(self
            .list_dir_cluster(cluster)?
            .into_iter()
            .map(|(name, e)| {
                (
                    name,
                    FileStat {
                        size: e.size,
                        is_dir: e.is_dir(),
                        first_cluster: e.first_cluster,
                    },
                )
            })
            .collect())
    }

    /// Read up to `buf.len()` bytes of the file at `path`, starting at
    /// byte `offset`.  Returns the number of bytes copied.
    pub fn read_file(&mut self, path: &str, buf: &mut [u8], offset: u32) -> Result<usize, FsError> {
        let found = self.find_path(path)?.ok_or(FsError::NotFound)?;
        if found.entry.is_dir() {
            return Err(FsError::IsADirectory);
        }
        let size = found.entry.size;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let to_read = buf.len().min((size - offset) as usize);
        let cs = self.cluster_size();

        // Skip whole clusters up to the one containing `offset`.
        let mut cluster = found.entry.first_cluster;
        if cluster == 0 {
            return Ok(0);
        }
        for _ in 0..offset as usize / cs {
            match self.chain_next(cluster)? {
                Some(next) => cluster = next,
                None => return Ok(0),
            }
        }

        let mut cluster_buf = vec![0u8; cs];
        let mut cluster_offset = offset as usize % cs;
        let mut copied = 0usize;
        loop {
            self.read_cluster(cluster, &mut cluster_buf)?;
            let n = (cs - cluster_offset).min(to_read - copied);
            buf[copied..copied + n]
                .copy_from_slice(&cluster_buf[cluster_offset..cluster_offset + n]);
            copied += n;
            cluster_offset = 0;
            if copied >= to_read {
                return Ok(copied);
            }
            match self.chain_next(cluster)? {
                Some(next) => cluster = next,
                None => return Ok(copied),
            }
        }
    }

    /// Read an entire file.
    pub fn read_file_to_vec(&mut self, path: &str) -> Result<Vec<u8>, FsError> {
        let stat = self.stat(path)?;
        if stat.is_dir {
            return Err(FsError::IsADirectory);
        }
        let mut out = vec![0u8; stat.size as usize];
        let n = self.read_file(path, &mut out, 0)?;
        out.truncate(n);
        Ok(out)
    }

    /// Allocate a fresh chain holding `data` and return its first cluster.
    /// On failure the partial chain is released.
    fn alloc_and_write_chain(&mut self, data: &[u8]) -> Result<u32, FsError> {
        let cs = self.cluster_size();
        let count = data.len().div_ceil(cs);
        let mut buf = vec![0u8; cs];
        let mut first = 0u32;
        let mut prev = 0u32;

        for i in 0..count {
            let cluster = match self.alloc_cluster() {
                Ok(c) => c,
                Err(e) => {
                    if first != 0 {
                        let _ = self.free_chain(first);
                    }
                    return Err(e);
                }
            };
            if prev != 0 {
                self.set_fat_entry(prev, cluster)?;
            } else {
                first = cluster;
            }
            let start = i * cs;
            let end = (start + cs).min(data.len());
            buf[..end - start].copy_from_slice(&data[start..end]);
            buf[end - start..].fill(0);
            if let Err(e) = self.write_cluster(cluster, &buf) {
                let _ = self.free_chain(first);
                return Err(e);
            }
            prev = cluster;
        }
        Ok(first)
    }

    /// Write (create or replace) the file at `path`.
    ///
    /// The new chain is fully written and the directory entry updated
    /// before the old chain is freed.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), FsError> {
        let (parent, name) = self.resolve_parent(path)?;
        let (loc, old_cluster) = match self.find_in_dir(parent, name)? {
            Some(found) if found.entry.is_dir() => return Err(FsError::IsADirectory),
            Some(found) => (found.loc, found.entry.first_cluster),
            None => {
                let loc = self.create_dir_entry(parent, name, DirAttrs::ARCHIVE, 0)?;
                (loc, 0)
            }
        };

        let new_first = if data.is_empty() {
            0
        } else {
            self.alloc_and_write_chain(data)?
        };
        self.update_entry(loc, new_first, data.len() as u32)?;
        if old_cluster != 0 {
            self.free_chain(old_cluster)?;
        }
        Ok(())
    }

    /// Create an empty file (no cluster is allocated).  Creating an
    /// existing file is a no-op.
    pub fn create_file(&mut self, path: &str) -> Result<(), FsError> {
        let (parent, name) = self.resolve_parent(path)?;
        match self.find_in_dir(parent, name)? {
            Some(found) if found.entry.is_dir() => Err(FsError::IsADirectory),
            Some(_) => Ok(()),
            None => {
                self.create_dir_entry(parent, name, DirAttrs::ARCHIVE, 0)?;
                Ok(())
            }
        }
    }

    /// Delete the file at `path`: release its chain, then mark its records
    /// deleted.
    pub fn delete(&mut self, path: &str) -> Result<(), FsError> {
        let (parent, name) = self.resolve_parent(path)?;
        let found = self.find_in_dir(parent, name)?.ok_or(FsError::NotFound)?;
        if found.entry.is_dir() {
            return Err(FsError::IsADirectory);
        }
        if found.entry.first_cluster != 0 {
            self.free_chain(found.entry.first_cluster)?;
        }
        self.remove_entry_records(parent, &found)
    }

    /// Rename within the same directory, keeping the data chain in place.
    ///
    /// An existing file at the target name is replaced; an existing
    /// directory refuses the rename.
    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<(), FsError> {
        let (parent, name) = self.resolve_parent(path)?;
        let found = self.find_in_dir(parent, name)?.ok_or(FsError::NotFound)?;
        let attrs = found.entry.attrs;
        let first_cluster = found.entry.first_cluster;
        let size = found.entry.size;

        if let Some(existing) = self.find_in_dir(parent, new_name)? {
            if existing.entry.is_dir() {
                return Err(FsError::IsADirectory);
            }
            if existing.loc != found.loc {
                if existing.entry.first_cluster != 0 {
                    self.free_chain(existing.entry.first_cluster)?;
                }
                self.remove_entry_records(parent, &existing)?;
            }
        }

        // Re-locate: the target removal may have shuffled trailing records.
        let found = self.find_in_dir(parent, name)?.ok_or(FsError::NotFound)?;
        self.remove_entry_records(parent, &found)?;
        let loc = self.create_dir_entry(parent, new_name, attrs, first_cluster)?;
        // create_dir_entry writes size 0; patch the real size back in.
        self.update_entry(loc, first_cluster, size)
    }

    /// Create a directory: a zeroed cluster holding `.` and `..`, plus an
    /// entry in the parent.
    pub fn mkdir(&mut self, path: &str) -> Result<(), FsError> {
        let (parent, name) = self.resolve_parent(path)?;
        if let Some(existing) = self.find_in_dir(parent, name)? {
            return Err(if existing.entry.is_dir() {
                FsError::IsADirectory
            } else {
                FsError::NotADirectory
            });
        }

        let cluster = self.alloc_cluster()?;
        let cs = self.cluster_size();
        let mut buf = vec![0u8; cs];

        let mut dot = [b' '; 11];
        dot[0] = b'.';
        let mut dotdot = [b' '; 11];
        dotdot[0] = b'.';
        dotdot[1] = b'.';
        // `..` pointing at the root is stored as cluster 0.
        let parent_on_disk = if parent == self.info.root_cluster { 0 } else { parent };

        buf[0..RECORD_SIZE].copy_from_slice(
            &DirEntry {
                short_name: dot,
                attrs: DirAttrs::DIRECTORY,
                first_cluster: cluster,
                size: 0,
            }
            .to_bytes(),
        );
        buf[RECORD_SIZE..2 * RECORD_SIZE].copy_from_slice(
            &DirEntry {
                short_name: dotdot,
                attrs: DirAttrs::DIRECTORY,
                first_cluster: parent_on_disk,
                size: 0,
            }
            .to_bytes(),
        );

        if let Err(e) = self.write_cluster(cluster, &buf) {
            let _ = self.set_fat_entry(cluster, FAT_FREE);
            return Err(e);
        }
        match self.create_dir_entry(parent, name, DirAttrs::DIRECTORY, cluster) {
            Ok(_) => Ok(()),
            Err(e) => {
                let _ = self.set_fat_entry(cluster, FAT_FREE);
                Err(e)
            }
        }
    }

    /// Remove an empty directory.
    pub fn rmdir(&mut self, path: &str) -> Result<(), FsError> {
        let (parent, name) = self.resolve_parent(path)?;
        let found = self.find_in_dir(parent, name)?.ok_or(FsError::NotFound)?;
        if !found.entry.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let dir_cluster = self.dir_entry_cluster(&found.entry);

        let mut empty = true;
        self.walk_dir(dir_cluster, |_loc, record| {
            if let DirRecord::Entry(e) = record {
                if !e.is_dot() {
                    empty = false;
                    return false;
                }
            }
            true
        })?;
        if !empty {
            return Err(FsError::NotEmpty);
        }

        // Scrub the directory clusters before releasing them, then detach
        // the entry from the parent.
        let cs = self.cluster_size();
        let zeros = vec![0u8; cs];
        let mut clusters = Vec::new();
        let mut c = dir_cluster;
        loop {
            clusters.push(c);
            match self.chain_next(c)? {
                Some(next) => c = next,
                None => break,
            }
        }
        for &c in &clusters {
            self.write_cluster(c, &zeros)?;
        }
        self.free_chain(dir_cluster)?;
        self.remove_entry_records(parent, &found)
    }

    /// Depth-first recursive delete.  The directory is re-scanned from the
    /// start after every child removal, since each removal mutates it.
    pub fn delete_recursive(&mut self, path: &str) -> Result<(), FsError> {
        let stat = self.stat(path)?;
        if !stat.is_dir {
            return self.delete(path);
        }

        loop {
            let entries = self.list_dir(path)?;
            let child = entries.into_iter().find(|(name, _)| name != "." && name != "..");
            match child {
                None => break,
                Some((name, _)) => {
                    let mut child_path = String::from(path.trim_end_matches('/'));
                    child_path.push('/');
                    child_path.push_str(&name);
                    self.delete_recursive(&child_path)?;
                }
            }
        }

        if Self::components(path).next().is_none() {
            // Emptying the root is as far as recursion goes.
            return Ok(());
        }
        self.rmdir(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;

    /// Partition origin used by the test images.
    const PART_LBA: u32 = 64;

    /// Build a blank FAT32 image: MBR with one FAT32 partition, boot
    /// sector, two FATs, zeroed data area.
    fn mkfs(sectors_per_cluster: u8, total_clusters: u32) -> MemBlockDevice {
        let fat_size = (((total_clusters + 2) * 4).div_ceil(SECTOR_SIZE as u32)).max(1);
        let reserved: u32 = 32;
        let part_sectors =
            reserved + 2 * fat_size + total_clusters * sectors_per_cluster as u32;
        let dev = MemBlockDevice::new(PART_LBA + part_sectors);

        // MBR: slot 0, type 0x0B.
        let mut mbr = [0u8; SECTOR_SIZE];
        mbr[446 + 4] = 0x0B;
        mbr[446 + 8..446 + 12].copy_from_slice(&PART_LBA.to_le_bytes());
        mbr[446 + 12..446 + 16].copy_from_slice(&part_sectors.to_le_bytes());
        mbr[510] = 0x55;
        mbr[511] = 0xAA;
        dev.write(0, &mbr, 1).unwrap();

        // Boot sector.
        let mut boot = [0u8; SECTOR_SIZE];
        boot[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        boot[13] = sectors_per_cluster;
        boot[14..16].copy_from_slice(&(reserved as u16).to_le_bytes());
        boot[16] = 2; // num_fats
        boot[32..36].copy_from_slice(&part_sectors.to_le_bytes());
        boot[36..40].copy_from_slice(&fat_size.to_le_bytes());
        boot[44..48].copy_from_slice(&2u32.to_le_bytes()); // root cluster
        boot[510] = 0x55;
        boot[511] = 0xAA;
        dev.write(PART_LBA, &boot, 1).unwrap();

        // FAT[0], FAT[1] reserved, root cluster terminated.
        let mut fat0 = [0u8; SECTOR_SIZE];
        fat0[0..4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
        fat0[4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
        fat0[8..12].copy_from_slice(&FAT_EOC.to_le_bytes());
        dev.write(PART_LBA + reserved, &fat0, 1).unwrap();
        dev.write(PART_LBA + reserved + fat_size, &fat0, 1).unwrap();

        dev
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i.wrapping_mul(31).wrapping_add(7)) as u8).collect()
    }

    /// FAT1 and FAT2 images of the mounted volume.
    fn fat_copies(dev: &MemBlockDevice, vol: &Fat32Volume) -> (Vec<u8>, Vec<u8>) {
        let info = vol.info();
        let fat_bytes = info.fat_size as usize * SECTOR_SIZE;
        let snap = dev.snapshot();
        let fat1_start = (PART_LBA + info.reserved_sectors as u32) as usize * SECTOR_SIZE;
        let fat2_start = fat1_start + fat_bytes;
        (
            snap[fat1_start..fat1_start + fat_bytes].to_vec(),
            snap[fat2_start..fat2_start + fat_bytes].to_vec(),
        )
    }

    #[test]
    fn mount_reads_geometry() {
        let dev = mkfs(8, 256);
        let vol = Fat32Volume::mount(&dev).unwrap();
        let info = vol.info();
        assert_eq!(info.bytes_per_sector, 512);
        assert_eq!(info.sectors_per_cluster, 8);
        assert_eq!(info.num_fats, 2);
        assert_eq!(info.root_cluster, 2);
        assert_eq!(info.total_clusters, 256);
        assert_eq!(
            info.data_start_sector,
            info.reserved_sectors as u32 + 2 * info.fat_size
        );
    }

    #[test]
    fn mount_rejects_non_fat32() {
        let dev = MemBlockDevice::new(128);
        assert_eq!(Fat32Volume::mount(&dev).err(), Some(FsError::IOError));
    }

    #[test]
    fn write_read_round_trips() {
        let dev = mkfs(8, 2048);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        for &len in &[0usize, 1, 511, 512, 513, 4095, 4096, 4097, 1 << 20] {
            let data = pattern(len);
            vol.write_file("/blob.bin", &data).unwrap();
            assert_eq!(vol.stat("/blob.bin").unwrap().size as usize, len);
            assert_eq!(vol.read_file_to_vec("/blob.bin").unwrap(), data);
        }
    }

    #[test]
    fn empty_file_allocates_no_cluster() {
        let dev = mkfs(1, 64);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        let free_before = vol.free_clusters().unwrap();
        vol.create_file("/x.txt").unwrap();
        assert_eq!(vol.free_clusters().unwrap(), free_before);
        let stat = vol.stat("/x.txt").unwrap();
        assert_eq!(stat.size, 0);
        assert_eq!(stat.first_cluster, 0);
        // Creating again is a no-op.
        vol.create_file("/x.txt").unwrap();
        assert_eq!(vol.read_file_to_vec("/x.txt").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn write_then_read_scenario() {
        let dev = mkfs(1, 64);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        vol.write_file("/log.txt", b"hello").unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(vol.read_file("/log.txt", &mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(vol.stat("/log.txt").unwrap().size, 5);
    }

    #[test]
    fn offset_reads_cross_cluster_boundaries() {
        let dev = mkfs(1, 64);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        let data = pattern(1500);
        vol.write_file("/data.bin", &data).unwrap();

        let mut buf = [0u8; 600];
        let n = vol.read_file("/data.bin", &mut buf, 400).unwrap();
        assert_eq!(n, 600);
        assert_eq!(&buf[..], &data[400..1000]);

        // Read past the tail is truncated; read at the end is empty.
        let n = vol.read_file("/data.bin", &mut buf, 1200).unwrap();
        assert_eq!(n, 300);
        assert_eq!(&buf[..300], &data[1200..]);
        assert_eq!(vol.read_file("/data.bin", &mut buf, 1500).unwrap(), 0);
    }

    #[test]
    fn overwrite_keeps_disk_usage_flat() {
        let dev = mkfs(1, 128);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        vol.write_file("/f.bin", &pattern(2000)).unwrap();
        let free_after_first = vol.free_clusters().unwrap();
        vol.write_file("/f.bin", &pattern(2000)).unwrap();
        assert_eq!(vol.free_clusters().unwrap(), free_after_first);
        assert_eq!(vol.read_file_to_vec("/f.bin").unwrap(), pattern(2000));
    }

    #[test]
    fn delete_returns_all_clusters() {
        let dev = mkfs(1, 128);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        let free_before = vol.free_clusters().unwrap();
        let cs = vol.cluster_size();
        vol.write_file("/big.bin", &pattern(3 * cs + 10)).unwrap();
        assert_eq!(vol.free_clusters().unwrap(), free_before - 4);
        vol.delete("/big.bin").unwrap();
        assert_eq!(vol.free_clusters().unwrap(), free_before);
        assert_eq!(vol.stat("/big.bin").err(), Some(FsError::NotFound));
    }

    #[test]
    fn mkdir_rmdir_leaves_image_byte_identical() {
        let dev = mkfs(1, 64);
        {
            let mut vol = Fat32Volume::mount(&dev).unwrap();
            // Prime the directory with one neighbor so the test covers
            // truncation behind live records too.
            vol.write_file("/KEEP.TXT", b"stay").unwrap();
        }
        let before = dev.snapshot();
        {
            let mut vol = Fat32Volume::mount(&dev).unwrap();
            vol.mkdir("/subdir with a long name").unwrap();
            assert!(vol.stat("/subdir with a long name").unwrap().is_dir);
            vol.rmdir("/subdir with a long name").unwrap();
        }
        assert_eq!(dev.snapshot(), before);
    }

    #[test]
    fn lfn_name_survives_listing() {
        let dev = mkfs(1, 128);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        let name = "Répertoire très long avec accents.txt";
        let mut path = String::from("/");
        path.push_str(name);
        vol.write_file(&path, b"bonjour").unwrap();

        let listing = vol.list_dir("/").unwrap();
        assert!(listing.iter().any(|(n, _)| n == name));
        // Lookup is case-insensitive on the long name.
        assert_eq!(
            vol.read_file_to_vec("/répertoire très long avec accents.TXT")
                .unwrap(),
            b"bonjour"
        );
    }

    #[test]
    fn listing_preserves_insertion_order() {
        let dev = mkfs(1, 128);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        vol.write_file("/B.TXT", b"b").unwrap();
        vol.mkdir("/ADIR").unwrap();
        vol.write_file("/a long lowercase name", b"c").unwrap();
        let names: Vec<String> =
            vol.list_dir("/").unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["B.TXT", "ADIR", "a long lowercase name"]);
    }

    #[test]
    fn crash_between_entry_update_and_old_chain_free() {
        let dev = mkfs(1, 128);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        let old = pattern(1200);
        let new = pattern(2500);
        vol.write_file("/f.bin", &old).unwrap();

        // Replay write_file up to (and including) the entry update, then
        // "crash" before the old chain is freed.
        let (parent, name) = vol.resolve_parent("/f.bin").unwrap();
        let found = vol.find_in_dir(parent, name).unwrap().unwrap();
        let new_first = vol.alloc_and_write_chain(&new).unwrap();
        vol.update_entry(found.loc, new_first, new.len() as u32).unwrap();

        // A fresh mount (post-crash) must read the new contents in full.
        let mut vol2 = Fat32Volume::mount(&dev).unwrap();
        assert_eq!(vol2.read_file_to_vec("/f.bin").unwrap(), new);
    }

    #[test]
    fn fat_copies_stay_identical() {
        let dev = mkfs(1, 128);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        vol.write_file("/a.bin", &pattern(3000)).unwrap();
        vol.mkdir("/d").unwrap();
        vol.write_file("/d/nested file with a long name.dat", &pattern(700))
            .unwrap();
        vol.delete("/a.bin").unwrap();
        vol.rename("/d/nested file with a long name.dat", "short.dat")
            .unwrap();
        let (fat1, fat2) = fat_copies(&dev, &vol);
        assert_eq!(fat1, fat2);
    }

    #[test]
    fn rename_keeps_contents_and_size() {
        let dev = mkfs(1, 128);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        let data = pattern(999);
        vol.write_file("/OLD.BIN", &data).unwrap();
        vol.rename("/OLD.BIN", "renamed to something long.bin").unwrap();
        assert_eq!(vol.stat("/OLD.BIN").err(), Some(FsError::NotFound));
        let stat = vol.stat("/renamed to something long.bin").unwrap();
        assert_eq!(stat.size, 999);
        assert_eq!(
            vol.read_file_to_vec("/renamed to something long.bin").unwrap(),
            data
        );
    }

    #[test]
    fn rename_replaces_existing_file() {
        let dev = mkfs(1, 128);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        let free_start = vol.free_clusters().unwrap();
        vol.write_file("/A.BIN", &pattern(600)).unwrap();
        vol.write_file("/B.BIN", &pattern(1300)).unwrap();
        vol.rename("/A.BIN", "B.BIN").unwrap();
        assert_eq!(vol.read_file_to_vec("/B.BIN").unwrap(), pattern(600));
        assert_eq!(vol.stat("/A.BIN").err(), Some(FsError::NotFound));
        // B's old chain came back; only A's two clusters stay in use.
        assert_eq!(vol.free_clusters().unwrap(), free_start - 2);
    }

    #[test]
    fn mkdir_nested_and_dot_entries() {
        let dev = mkfs(1, 128);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        vol.mkdir("/a").unwrap();
        vol.mkdir("/a/b").unwrap();
        vol.write_file("/a/b/leaf.txt", b"leaf").unwrap();
        assert_eq!(vol.read_file_to_vec("/a/b/leaf.txt").unwrap(), b"leaf");

        let names: Vec<String> =
            vol.list_dir("/a/b").unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(&names[..2], [".", ".."]);

        // `..` of a first-level directory points at the root (cluster 0 on
        // disk) and resolves back to it.
        assert!(vol.stat("/a/..").unwrap().is_dir);
        assert_eq!(
            vol.stat("/a/..").unwrap().first_cluster,
            vol.info().root_cluster
        );
    }

    #[test]
    fn rmdir_refuses_non_empty() {
        let dev = mkfs(1, 128);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        vol.mkdir("/d").unwrap();
        vol.write_file("/d/f", b"x").unwrap();
        assert_eq!(vol.rmdir("/d").err(), Some(FsError::NotEmpty));
        vol.delete("/d/f").unwrap();
        vol.rmdir("/d").unwrap();
        assert_eq!(vol.stat("/d").err(), Some(FsError::NotFound));
    }

    #[test]
    fn recursive_delete_restores_free_count() {
        let dev = mkfs(1, 256);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        let free_before = vol.free_clusters().unwrap();
        vol.mkdir("/tree").unwrap();
        vol.mkdir("/tree/sub").unwrap();
        vol.write_file("/tree/one.bin", &pattern(1000)).unwrap();
        vol.write_file("/tree/sub/two.bin", &pattern(2000)).unwrap();
        vol.write_file("/tree/sub/a very long third name.bin", &pattern(100))
            .unwrap();
        vol.delete_recursive("/tree").unwrap();
        assert_eq!(vol.stat("/tree").err(), Some(FsError::NotFound));
        assert_eq!(vol.free_clusters().unwrap(), free_before);
    }

    #[test]
    fn error_taxonomy() {
        let dev = mkfs(1, 64);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        vol.mkdir("/d").unwrap();
        vol.write_file("/f", b"data").unwrap();

        assert_eq!(vol.read_file_to_vec("/missing").err(), Some(FsError::NotFound));
        assert_eq!(vol.read_file_to_vec("/d").err(), Some(FsError::IsADirectory));
        assert_eq!(vol.delete("/d").err(), Some(FsError::IsADirectory));
        assert_eq!(vol.rmdir("/f").err(), Some(FsError::NotADirectory));
        assert_eq!(vol.stat("/f/x").err(), Some(FsError::NotADirectory));

        // A name longer than an LFN chain can carry.
        let long: String = core::iter::repeat('x').take(300).collect();
        let mut path = String::from("/");
        path.push_str(&long);
        assert_eq!(vol.write_file(&path, b"y").err(), Some(FsError::NameTooLong));
    }

    #[test]
    fn out_of_space_keeps_old_contents() {
        let dev = mkfs(1, 16);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        let cs = vol.cluster_size();
        let old = pattern(4 * cs);
        vol.write_file("/f.bin", &old).unwrap();
        let free_before = vol.free_clusters().unwrap();

        // 15 data clusters total (root takes one): old file holds 4, so a
        // 12-cluster rewrite cannot fit alongside it.
        let too_big = pattern(12 * cs);
        assert_eq!(vol.write_file("/f.bin", &too_big).err(), Some(FsError::OutOfSpace));
        assert_eq!(vol.read_file_to_vec("/f.bin").unwrap(), old);
        assert_eq!(vol.free_clusters().unwrap(), free_before);
    }

    #[test]
    fn directory_grows_past_one_cluster() {
        let dev = mkfs(1, 256);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        // 512-byte clusters hold 16 records; LFN names burn several slots
        // each, so 20 files force the root onto a second cluster.
        for i in 0..20 {
            let mut path = String::from("/long file name number ");
            path.push((b'a' + i) as char);
            path.push_str(".txt");
            vol.write_file(&path, b"x").unwrap();
        }
        let listing = vol.list_dir("/").unwrap();
        assert_eq!(listing.len(), 20);
        for i in 0..20u8 {
            let mut path = String::from("/long file name number ");
            path.push((b'a' + i) as char);
            path.push_str(".txt");
            assert_eq!(vol.read_file_to_vec(&path).unwrap(), b"x");
        }
    }

    #[test]
    fn deleted_lfn_slots_are_reused() {
        let dev = mkfs(1, 64);
        let mut vol = Fat32Volume::mount(&dev).unwrap();
        vol.write_file("/a rather long file name.txt", b"1").unwrap();
        vol.write_file("/Z.TXT", b"keep").unwrap();
        vol.delete("/a rather long file name.txt").unwrap();
        // The freed run in front of Z.TXT can hold this chain again.
        vol.write_file("/another long file name!.txt", b"2").unwrap();
        let names: Vec<String> =
            vol.list_dir("/").unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["another long file name!.txt", "Z.TXT"]);
    }
}
