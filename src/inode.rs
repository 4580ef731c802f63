// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! QEFS2 inode records and file payload reassembly.

use crate::error::Result;
use crate::volume::{VolumeReader, INODE_SIZE, SENTINEL};
use byteorder::{ByteOrder, LittleEndian};

const DIRECT_COUNT: usize = 13;
const INDIRECT_COUNT: usize = 3;

/// File kind, decoded from the top nibble of an inode's `mode`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    Directory,
    Regular,
    Other(u16),
}

impl Kind {
    fn from_mode(mode: u16) -> Kind {
        match mode & 0xf000 {
            0x4000 => Kind::Directory,
            0x8000 => Kind::Regular,
            other => Kind::Other(other),
        }
    }
}

/// The on-disk `fs_inode` record (`0x80` bytes).
#[derive(Clone, Debug)]
pub struct Inode {
    pub mode: u16,
    pub nlink: u16,
    pub attr: u32,
    pub size: u32,
    pub uid: u16,
    pub gid: u16,
    pub generation: u32,
    pub blocks: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub atime: u32,
    pub direct_cluster_id: [u32; DIRECT_COUNT],
    pub indirect_cluster_id: [u32; INDIRECT_COUNT],
}

impl Inode {
    pub fn kind(&self) -> Kind {
        Kind::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == Kind::Directory
    }

    pub fn is_regular(&self) -> bool {
        self.kind() == Kind::Regular
    }

    /// Parses an inode record from its raw `0x80`-byte slice.
    fn parse(bytes: &[u8]) -> Inode {
        debug_assert_eq!(bytes.len(), INODE_SIZE);
        let mode = LittleEndian::read_u16(&bytes[0..2]);
        let nlink = LittleEndian::read_u16(&bytes[2..4]);
        let attr = LittleEndian::read_u32(&bytes[4..8]);
        let size = LittleEndian::read_u32(&bytes[8..12]);
        let uid = LittleEndian::read_u16(&bytes[12..14]);
        let gid = LittleEndian::read_u16(&bytes[14..16]);
        let generation = LittleEndian::read_u32(&bytes[16..20]);
        let blocks = LittleEndian::read_u32(&bytes[20..24]);
        let mtime = LittleEndian::read_u32(&bytes[24..28]);
        let ctime = LittleEndian::read_u32(&bytes[28..32]);
        let atime = LittleEndian::read_u32(&bytes[32..36]);
        // 7 reserved u32 fields follow: offset 36..64.
        let direct_off = 64;
        let mut direct_cluster_id = [0u32; DIRECT_COUNT];
        LittleEndian::read_u32_into(
            &bytes[direct_off..direct_off + DIRECT_COUNT * 4],
            &mut direct_cluster_id,
        );
        let indirect_off = direct_off + DIRECT_COUNT * 4;
        let mut indirect_cluster_id = [0u32; INDIRECT_COUNT];
        LittleEndian::read_u32_into(
            &bytes[indirect_off..indirect_off + INDIRECT_COUNT * 4],
            &mut indirect_cluster_id,
        );
        Inode {
            mode,
            nlink,
            attr,
            size,
            uid,
            gid,
            generation,
            blocks,
            mtime,
            ctime,
            atime,
            direct_cluster_id,
            indirect_cluster_id,
        }
    }
}

/// A reassembled file: the inode's mode plus its full data, truncated
/// to `size`.
pub struct FileDescriptor {
    pub mode: u16,
    pub data: Vec<u8>,
}

/// Fetches the inode with the given id from the volume.
///
/// `cluster_id = inode >> 4`, `index = inode & 0xf`; the record lives
/// at `translate(cluster_id) * page_size + 0x80 * index`.
pub fn fetch_inode(vol: &VolumeReader, inode_id: u32) -> Result<Inode> {
    let cluster_id = inode_id >> 4;
    let index = (inode_id & 0xf) as usize;
    let physical = vol.translate(cluster_id)?;
    let base = physical as usize * vol.page_size();
    let bytes = vol.read_at(base + INODE_SIZE * index, INODE_SIZE)?;
    Ok(Inode::parse(bytes))
}

/// Reassembles a file's payload by walking its direct and indirect
/// block lists, then stripping the fixed 18-byte stream header and
/// truncating to `size`.
pub fn fetch_file_descriptor(vol: &VolumeReader, inode_id: u32) -> Result<FileDescriptor> {
    let inode = fetch_inode(vol, inode_id)?;

    let mut raw = Vec::with_capacity(inode.blocks as usize * vol.page_size());
    let mut n = 0u32;

    for &id in &inode.direct_cluster_id {
        if id == SENTINEL || n >= inode.blocks {
            break;
        }
        raw.extend_from_slice(vol.read_logical_page(id)?);
        n += 1;
    }

    'indirect: for &id in &inode.indirect_cluster_id {
        if id == SENTINEL {
            break;
        }
        let page = vol.read_logical_page(id)?;
        let mut entries = vec![0u32; page.len() / 4];
        LittleEndian::read_u32_into(page, &mut entries);
        for entry in entries {
            if entry == SENTINEL {
                break 'indirect;
            }
            if n >= inode.blocks {
                break 'indirect;
            }
            raw.extend_from_slice(vol.read_logical_page(entry)?);
            n += 1;
        }
    }

    const STREAM_HEADER_LEN: usize = 18;
    let data = if raw.len() > STREAM_HEADER_LEN {
        let body = &raw[STREAM_HEADER_LEN..];
        let len = (inode.size as usize).min(body.len());
        body[..len].to_vec()
    } else {
        Vec::new()
    };

    Ok(FileDescriptor { mode: inode.mode, data })
}
