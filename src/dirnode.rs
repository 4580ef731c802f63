// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! QEFS2 directory nodes: the packed sequence of directory records
//! that make up one node in the doubly-linked directory node list.

use crate::error::{Error, Result};
use crate::inode::fetch_file_descriptor;
use crate::volume::VolumeReader;
use byteorder::{ByteOrder, LittleEndian};

/// Length, in bytes, of a directory node's fixed header: `prev`,
/// `next`, `used`, `pad`, `gid`, `bogus_count`, `level`.
const NODE_HEADER_LEN: usize = 4 + 4 + 2 + 2 + 4 + 1 + 1;

/// Names longer than this indicate the long-name record variant,
/// which this tool does not decode.
const LONG_NAME_THRESHOLD: u8 = 103;

/// A decoded directory record: one (name, metadata) pair out of a
/// node's packed record list.
#[derive(Clone, Debug)]
pub struct FileEntry {
    pub name: String,
    pub parent_inode: u32,
    pub inode: Option<u32>,
    pub mode: u16,
    pub data: Vec<u8>,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        (self.mode & 0xf000) == 0x4000
    }

    pub fn is_regular(&self) -> bool {
        (self.mode & 0xf000) == 0x8000
    }
}

/// One parsed directory node: its `prev`/`next` links and the
/// entries decoded from its record data.
pub struct DirNode {
    pub prev: u32,
    pub next: u32,
    pub entries: Vec<FileEntry>,
}

fn decode_filename(bytes: &[u8]) -> Result<String> {
    Ok(match bytes {
        [] => ".".to_string(),
        [0x00] => "..".to_string(),
        _ => std::str::from_utf8(bytes)
            .map_err(|_| Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "directory entry filename is not valid UTF-8",
            )))?
            .to_string(),
    })
}

/// Parses one directory node out of its logical page.
pub fn parse_node(vol: &VolumeReader, page: &[u8]) -> Result<DirNode> {
    if page.len() < NODE_HEADER_LEN {
        return Err(Error::NodeOverrun);
    }
    let prev = LittleEndian::read_u32(&page[0..4]);
    let next = LittleEndian::read_u32(&page[4..8]);
    let used = LittleEndian::read_u16(&page[8..10]) as usize;

    let data = page
        .get(NODE_HEADER_LEN..NODE_HEADER_LEN + used)
        .ok_or(Error::NodeOverrun)?;

    let mut entries = Vec::new();
    let mut off = 0usize;
    while off < data.len() {
        if off + 2 > data.len() {
            return Err(Error::NodeOverrun);
        }
        let flen = data[off];
        let mlen = data[off + 1];
        off += 2;

        if flen >= LONG_NAME_THRESHOLD {
            return Err(Error::LongNameUnsupported(flen));
        }

        let key_end = off + flen as usize;
        if key_end > data.len() {
            return Err(Error::NodeOverrun);
        }
        let key = &data[off..key_end];
        off = key_end;

        if key.is_empty() || key[0] != b'd' {
            return Err(Error::UnknownRecordTag(*key.first().unwrap_or(&0)));
        }
        if key.len() < 5 {
            return Err(Error::NodeOverrun);
        }
        let parent_inode = LittleEndian::read_u32(&key[1..5]);
        let name = decode_filename(&key[5..])?;

        let meta_end = off + mlen as usize;
        if meta_end > data.len() {
            return Err(Error::NodeOverrun);
        }
        let meta = &data[off..meta_end];
        off = meta_end;

        if meta.is_empty() {
            return Err(Error::UnknownRecordTag(0));
        }
        let entry = match meta[0] {
            b'i' => {
                if meta.len() < 5 {
                    return Err(Error::NodeOverrun);
                }
                let inode_id = LittleEndian::read_u32(&meta[1..5]);
                let fd = fetch_file_descriptor(vol, inode_id)?;
                FileEntry { name, parent_inode, inode: Some(inode_id), mode: fd.mode, data: fd.data }
            }
            b'n' => {
                if meta.len() < 3 {
                    return Err(Error::NodeOverrun);
                }
                let mode = LittleEndian::read_u16(&meta[1..3]);
                FileEntry { name, parent_inode, inode: None, mode, data: meta[3..].to_vec() }
            }
            b'N' => {
                if meta.len() < 9 {
                    return Err(Error::NodeOverrun);
                }
                let mode = LittleEndian::read_u16(&meta[1..3]);
                // gid (meta[3..5]) and ctime (meta[5..9]) aren't part
                // of the derived FileEntry; only mode and data carry
                // over, per the filesystem's documented entity shape.
                FileEntry { name, parent_inode, inode: None, mode, data: meta[9..].to_vec() }
            }
            tag => return Err(Error::UnknownRecordTag(tag)),
        };
        entries.push(entry);
    }

    Ok(DirNode { prev, next, entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_volume_with_node(
        node_logical_id_pt_entry: u32,
        records: &[u8],
        prev: u32,
        next: u32,
    ) -> (Vec<u8>, usize) {
        // A minimal single-superblock partition: superblock at page
        // 0, page table at page 1, EFS info at page 2, directory
        // node at the physical page the caller picked.
        let page_size: u32 = 2048;
        let npages = 8usize;
        let mut data = vec![0u8; npages * page_size as usize];

        // Superblock.
        LittleEndian::write_u16(&mut data[6..8], 1); // age
        data[8..12].copy_from_slice(b"EFSS");
        data[12..16].copy_from_slice(b"uper");
        let rest = 16;
        LittleEndian::write_u32(&mut data[rest..rest + 4], 1);
        LittleEndian::write_u32(&mut data[rest + 4..rest + 8], page_size);
        LittleEndian::write_u32(&mut data[rest + 8..rest + 12], 100);
        let nand_info_off = rest + 12 + 4 + 16 + 16 + 128;
        LittleEndian::write_u16(&mut data[nand_info_off + 6..nand_info_off + 8], 0);
        let tables_off = nand_info_off + 8 + 4 + 4;
        LittleEndian::write_u32(&mut data[tables_off..tables_off + 4], 1); // PT at page 1

        // Page table.
        let pt_off = page_size as usize; // PT lives at physical page 1
        let mut pt = [0u32; crate::volume::PT_ENTRIES];
        pt[3] = 2; // info block at physical page 2
        pt[2] = node_logical_id_pt_entry; // node id 2 -> physical page given
        for (i, v) in pt.iter().enumerate() {
            LittleEndian::write_u32(&mut data[pt_off + i * 4..pt_off + i * 4 + 4], *v);
        }

        // EFS info block at page 2.
        let info_off = 2 * page_size as usize;
        data[info_off..info_off + 4].copy_from_slice(&[0xa0, 0x3e, 0xb9, 0xa7]);
        LittleEndian::write_u32(&mut data[info_off + 20..info_off + 24], 2); // root_inode

        // Directory node at its physical page.
        let node_off = node_logical_id_pt_entry as usize * page_size as usize;
        LittleEndian::write_u32(&mut data[node_off..node_off + 4], prev);
        LittleEndian::write_u32(&mut data[node_off + 4..node_off + 8], next);
        LittleEndian::write_u16(&mut data[node_off + 8..node_off + 10], records.len() as u16);
        data[node_off + NODE_HEADER_LEN..node_off + NODE_HEADER_LEN + records.len()]
            .copy_from_slice(records);

        (data, page_size as usize)
    }

    #[test]
    fn parses_inline_record_without_inode() {
        // flen=6 "d"+parent(5)+"a", mlen=3 "n"+mode(0o100644 LE)
        let mut records = Vec::new();
        records.push(6u8); // flen
        records.push(3u8); // mlen
        records.push(b'd');
        records.extend_from_slice(&5u32.to_le_bytes());
        records.push(b'a');
        records.push(b'n');
        records.extend_from_slice(&0o100644u16.to_le_bytes());

        let (data, _) = build_volume_with_node(4, &records, 0xFFFF_FFFF, 0xFFFF_FFFF);
        let vol = VolumeReader::open(data).unwrap();
        let page = vol.read_logical_page(2).unwrap().to_vec();
        let node = parse_node(&vol, &page).unwrap();
        assert_eq!(node.entries.len(), 1);
        assert_eq!(node.entries[0].name, "a");
        assert_eq!(node.entries[0].parent_inode, 5);
        assert_eq!(node.entries[0].inode, None);
        assert_eq!(node.next, 0xFFFF_FFFF);
    }

    #[test]
    fn rejects_long_name() {
        let mut records = Vec::new();
        records.push(103u8);
        records.push(0u8);
        records.extend(std::iter::repeat(0u8).take(103));
        let (data, _) = build_volume_with_node(4, &records, 0xFFFF_FFFF, 0xFFFF_FFFF);
        let vol = VolumeReader::open(data).unwrap();
        let page = vol.read_logical_page(2).unwrap().to_vec();
        assert!(matches!(parse_node(&vol, &page), Err(Error::LongNameUnsupported(103))));
    }
}
