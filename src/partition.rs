// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Partition carver: scans de-framed NAND blocks for the partition
//! table magic and carves out each partition's byte stream.

use crate::error::{Error, Result};
use crate::nand::{NandImage, PAGES_PER_BLOCK, PAGE_SIZE};
use byteorder::{ByteOrder, LittleEndian};

const MAGIC1: [u8; 4] = [0xaa, 0x73, 0xee, 0x55];
const MAGIC2: [u8; 4] = [0xdb, 0xbd, 0x5e, 0xe3];

/// Fixed fields before the first partition entry:
/// two 4-byte magics, `p_ver` (u32), `p_nbr` (u32).
const TABLE_HEADER_LEN: usize = 4 + 4 + 4 + 4;

/// On-disk size of one partition table entry.
const ENTRY_LEN: usize = 1 + 1 + 14 + 4 + 4 + 4;

/// One entry of the NAND partition table.
#[derive(Clone, Debug)]
pub struct PartitionEntry {
    pub flash: u8,
    pub name: String,
    pub block_start: u32,
    pub block_length: u32,
    pub attr: [u8; 4],
}

/// A carved partition: its table entry, plus the concatenated clean
/// page bytes for `[block_start, block_start + block_length)`.
pub struct Partition {
    pub name: String,
    pub block_start: u32,
    pub block_length: u32,
    pub data: Vec<u8>,
}

impl Partition {
    /// Whether this partition's name marks it as an EFS2 volume, per
    /// the on-disk naming convention (`EFS2`, `EFS2_1`, ...).
    pub fn is_efs2(&self) -> bool {
        self.name.starts_with("EFS2")
    }
}

/// Parses a partition table out of a block's first 2048 bytes.
/// Returns `None` if the magics don't match -- this is a probe, not
/// a hard error; callers keep scanning on `None`.
fn try_parse_table(block: &[u8; PAGE_SIZE]) -> Option<Vec<PartitionEntry>> {
    if block.len() < TABLE_HEADER_LEN {
        return None;
    }
    if block[0..4] != MAGIC1 || block[4..8] != MAGIC2 {
        return None;
    }
    let _p_ver = LittleEndian::read_u32(&block[8..12]);
    let p_nbr = LittleEndian::read_u32(&block[12..16]) as usize;

    let mut entries = Vec::with_capacity(p_nbr);
    let mut off = TABLE_HEADER_LEN;
    for _ in 0..p_nbr {
        if off + ENTRY_LEN > block.len() {
            return None;
        }
        let flash = block[off];
        let name_bytes = &block[off + 2..off + 16];
        let name = match std::str::from_utf8(name_bytes) {
            Ok(s) => s.trim_end_matches('\0').to_string(),
            Err(_) => return None,
        };
        let block_start = LittleEndian::read_u32(&block[off + 16..off + 20]);
        let block_length = LittleEndian::read_u32(&block[off + 20..off + 24]);
        let mut attr = [0u8; 4];
        attr.copy_from_slice(&block[off + 24..off + 28]);
        entries.push(PartitionEntry { flash, name, block_start, block_length, attr });
        off += ENTRY_LEN;
    }
    Some(entries)
}

/// Scans the de-framed image for the first block whose first page
/// parses as a partition table, then carves every entry's byte
/// stream out of the clean page array.
pub fn carve_partitions(image: &NandImage) -> Result<Vec<Partition>> {
    let mut table = None;
    for block in 0..image.block_count() {
        if let Some(entries) = try_parse_table(image.page(block, 0)) {
            table = Some(entries);
            break;
        }
    }
    let entries = table.ok_or(Error::NoPartitionTable)?;

    let mut partitions = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut data = Vec::with_capacity(
            entry.block_length as usize * PAGES_PER_BLOCK * PAGE_SIZE,
        );
        let end = entry.block_start as usize + entry.block_length as usize;
        for block in entry.block_start as usize..end {
            for page in image.block_pages(block) {
                data.extend_from_slice(page);
            }
        }
        partitions.push(Partition {
            name: entry.name,
            block_start: entry.block_start,
            block_length: entry.block_length,
            data,
        });
    }
    Ok(partitions)
}
