// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Volume reader: locates the freshest EFS2 superblock inside a
//! partition blob, parses its page table, and exposes
//! logical-to-physical page translation.

use crate::error::{self, Error, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Step, in bytes, between candidate superblock offsets while
/// scanning. EFS2 partitions are a 2048-byte page-aligned stream
/// (see §6 of the design), so superblocks only ever start on a
/// 2048-byte boundary regardless of what the superblock itself later
/// reports as its `page_size`.
const SCAN_STRIDE: usize = 2048;

const SB_MAGIC1: [u8; 4] = *b"EFSS";
const SB_MAGIC2: [u8; 4] = *b"uper";
const INFO_MAGIC: [u8; 4] = [0xa0, 0x3e, 0xb9, 0xa7];

/// Number of entries in the page table.
pub const PT_ENTRIES: usize = 512;

/// Fixed-size inode record length, in bytes.
pub const INODE_SIZE: usize = 0x80;

/// Sentinel value terminating direct/indirect block lists and the
/// directory node list.
pub const SENTINEL: u32 = 0xFFFF_FFFF;

/// The parsed prefix of an EFS2 superblock that this tool cares
/// about. Everything after `nand_info.tables` (checksums, the rest
/// of `nand_info`) is left unparsed -- we only need enough to locate
/// the page table and the EFS info block.
#[derive(Clone, Debug)]
struct SuperBlock {
    age: u16,
    block_size: u32,
    page_size: u32,
    block_count: u32,
    /// Absolute byte offset, within the partition, of the page table.
    pt_offset: usize,
}

/// Attempts to parse a superblock at `offset` within `partition`.
/// Returns `None` if either magic fails to match -- this is a probe.
fn try_parse_superblock(partition: &[u8], offset: usize) -> Option<SuperBlock> {
    const FIXED_PREFIX: usize = 4 + 2 + 2 + 4 + 4; // page_header, version, age, magic1, magic2
    const NAND_INFO_FIXED: usize = 2 + 2 + 2 + 2; // nodes_per_page, page_depth, super_nodes, num_regions

    if offset + 16 > partition.len() {
        return None;
    }
    let age = LittleEndian::read_u16(&partition[offset + 6..offset + 8]);
    if partition[offset + 8..offset + 12] != SB_MAGIC1 || partition[offset + 12..offset + 16] != SB_MAGIC2 {
        return None;
    }

    let rest = offset + FIXED_PREFIX;
    if rest + 4 + 4 + 4 > partition.len() {
        return None;
    }
    let block_size = LittleEndian::read_u32(&partition[rest..rest + 4]);
    let page_size = LittleEndian::read_u32(&partition[rest + 4..rest + 8]);
    let block_count = LittleEndian::read_u32(&partition[rest + 8..rest + 12]);

    // log_head(4) + alloc_next(4*4) + gc_next(4*4) + upper_data(32*4)
    let nand_info_off = rest + 12 + 4 + 16 + 16 + 128;
    if nand_info_off + NAND_INFO_FIXED > partition.len() {
        return None;
    }
    let num_regions =
        LittleEndian::read_u16(&partition[nand_info_off + 6..nand_info_off + 8]) as usize;

    let tables_off = nand_info_off + NAND_INFO_FIXED + num_regions * 4 + 4 + 4;
    if tables_off + 4 > partition.len() {
        return None;
    }
    let tables = LittleEndian::read_u32(&partition[tables_off..tables_off + 4]);

    if page_size == 0 {
        return None;
    }
    let pt_offset = tables as usize * page_size as usize;

    Some(SuperBlock { age, block_size, page_size, block_count, pt_offset })
}

/// Scans `partition` for the superblock with the greatest `age`
/// among every offset that parses cleanly.
fn find_freshest_superblock(partition: &[u8]) -> Result<SuperBlock> {
    let mut best: Option<SuperBlock> = None;
    let mut offset = 0;
    while offset + SCAN_STRIDE <= partition.len() {
        if let Some(sb) = try_parse_superblock(partition, offset) {
            if best.as_ref().map_or(true, |b| sb.age > b.age) {
                best = Some(sb);
            }
        }
        offset += SCAN_STRIDE;
    }
    best.ok_or(Error::NoSuperblock)
}

/// The EFS info block: carries the root inode and the inode
/// allocator's high-water marks.
#[derive(Clone, Copy, Debug)]
pub struct EfsInfo {
    pub root_inode: u32,
    pub inode_top: u32,
    pub inode_next: u32,
    pub inode_free: u32,
}

fn parse_efs_info(bytes: &[u8]) -> Result<EfsInfo> {
    if bytes.len() < 24 || bytes[0..4] != INFO_MAGIC {
        return Err(Error::CorruptInfoBlock);
    }
    // bytes[4..8] is `version`, unused here.
    Ok(EfsInfo {
        inode_top: LittleEndian::read_u32(&bytes[8..12]),
        inode_next: LittleEndian::read_u32(&bytes[12..16]),
        inode_free: LittleEndian::read_u32(&bytes[16..20]),
        root_inode: LittleEndian::read_u32(&bytes[20..24]),
    })
}

/// A page-addressable EFS2 volume: the freshest superblock, its page
/// table, and the EFS info block, together with the raw partition
/// bytes they index into.
pub struct VolumeReader {
    data: Vec<u8>,
    sb: SuperBlock,
    pt: [u32; PT_ENTRIES],
    efs_info: EfsInfo,
}

impl VolumeReader {
    /// Opens an EFS2 partition blob, locating the freshest
    /// superblock, its page table, and the EFS info block.
    pub fn open(data: Vec<u8>) -> Result<VolumeReader> {
        let sb = find_freshest_superblock(&data)?;

        let mut pt = [0u32; PT_ENTRIES];
        let pt_bytes = data
            .get(sb.pt_offset..sb.pt_offset + PT_ENTRIES * 4)
            .ok_or_else(|| error::eof("page table extends past end of partition"))?;
        LittleEndian::read_u32_into(pt_bytes, &mut pt);

        let info_page = pt[3] as usize;
        let info_off = info_page * sb.page_size as usize;
        let info_bytes = data
            .get(info_off..info_off + sb.page_size as usize)
            .ok_or_else(|| error::eof("EFS info block page out of range"))?;
        let efs_info = parse_efs_info(info_bytes)?;

        Ok(VolumeReader { data, sb, pt, efs_info })
    }

    pub fn page_size(&self) -> usize {
        self.sb.page_size as usize
    }

    pub fn block_size(&self) -> usize {
        self.sb.block_size as usize
    }

    pub fn block_count(&self) -> u32 {
        self.sb.block_count
    }

    pub fn root_inode(&self) -> u32 {
        self.efs_info.root_inode
    }

    pub fn efs_info(&self) -> EfsInfo {
        self.efs_info
    }

    /// The logical id of the first directory node; fixed at `2` by
    /// convention (the first two logical ids are reserved: `0` is
    /// unused, `1` is the bad-block log, `2` is the root directory's
    /// first node).
    pub fn first_directory_node_id(&self) -> u32 {
        2
    }

    /// Translates a logical page id through the page table into a
    /// physical page index within the partition.
    pub fn translate(&self, logical_id: u32) -> Result<u32> {
        self.pt
            .get(logical_id as usize)
            .copied()
            .ok_or_else(|| error::eof("page table index out of range"))
    }

    /// Reads the clean page at physical page index `page_index`.
    pub fn read_physical_page(&self, page_index: u32) -> Result<&[u8]> {
        let page_size = self.page_size();
        let off = page_index as usize * page_size;
        self.data
            .get(off..off + page_size)
            .ok_or_else(|| error::eof("physical page index out of range"))
    }

    /// Reads the clean page addressed by logical id `logical_id`,
    /// translating it through the page table first.
    pub fn read_logical_page(&self, logical_id: u32) -> Result<&[u8]> {
        let physical = self.translate(logical_id)?;
        self.read_physical_page(physical)
    }

    /// Returns the raw bytes at an absolute byte offset within the
    /// partition, used for reading inode records which aren't
    /// themselves page-aligned.
    pub fn read_at(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data
            .get(offset..offset + len)
            .ok_or_else(|| error::eof("offset out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_superblock(buf: &mut [u8], offset: usize, age: u16, page_size: u32, tables: u32) {
        LittleEndian::write_u16(&mut buf[offset + 6..offset + 8], age);
        buf[offset + 8..offset + 12].copy_from_slice(&SB_MAGIC1);
        buf[offset + 12..offset + 16].copy_from_slice(&SB_MAGIC2);
        let rest = offset + 4 + 2 + 2 + 4 + 4;
        LittleEndian::write_u32(&mut buf[rest..rest + 4], 1); // block_size
        LittleEndian::write_u32(&mut buf[rest + 4..rest + 8], page_size);
        LittleEndian::write_u32(&mut buf[rest + 8..rest + 12], 100); // block_count
        let nand_info_off = rest + 12 + 4 + 16 + 16 + 128;
        LittleEndian::write_u16(&mut buf[nand_info_off + 6..nand_info_off + 8], 0); // num_regions
        let tables_off = nand_info_off + 8 + 0 + 4 + 4;
        LittleEndian::write_u32(&mut buf[tables_off..tables_off + 4], tables);
    }

    #[test]
    fn selects_superblock_with_greatest_age() {
        let page_size = 0x800u32;
        let mut data = vec![0u8; 0x800 * 8];
        write_superblock(&mut data, 0, 5, page_size, 2);
        write_superblock(&mut data, 0x800, 7, page_size, 2);
        // Page table at logical page 2 -> offset 2*page_size.
        let pt_off = 2 * page_size as usize;
        let mut pt = [0u32; PT_ENTRIES];
        pt[3] = 3; // info block at page 3
        for (i, v) in pt.iter().enumerate() {
            LittleEndian::write_u32(&mut data[pt_off + i * 4..pt_off + i * 4 + 4], *v);
        }
        let info_off = 3 * page_size as usize;
        data[info_off..info_off + 4].copy_from_slice(&INFO_MAGIC);
        LittleEndian::write_u32(&mut data[info_off + 20..info_off + 24], 7); // root_inode

        let vol = VolumeReader::open(data).unwrap();
        assert_eq!(vol.sb.age, 7);
        assert_eq!(vol.root_inode(), 7);
        assert_eq!(vol.page_size(), 0x800);
    }

    #[test]
    fn rejects_partition_with_no_superblock() {
        let data = vec![0u8; 0x800 * 4];
        assert!(matches!(VolumeReader::open(data), Err(Error::NoSuperblock)));
    }
}
