// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Page de-framer: strips the per-subpage spare (OOB) bytes out of a
//! raw NAND dump and reconstructs clean 2048-byte page payloads.
//!
//! A NAND page is read out of the device as four 512-byte subpages,
//! each followed by a run of spare bytes used on-device for ECC and
//! bookkeeping. We don't attempt ECC correction or bad-block
//! remapping (see the crate's top-level docs) -- we just strip the
//! spare runs and hand back the user data.

use crate::error::{Error, Result};

/// Number of blocks in a NAND image.
pub const BLOCKS_PER_IMAGE: usize = 1024;

/// Number of pages per block.
pub const PAGES_PER_BLOCK: usize = 64;

/// Size, in bytes, of a de-framed page.
pub const PAGE_SIZE: usize = 2048;

/// `(data run length, spare run length)` pairs that make up one raw
/// page, in on-device order. The final data run is shortened by 16
/// bytes to make room for a 16-byte run of trailing padding that
/// follows the last spare run -- this asymmetry is load-bearing and
/// must not be "fixed".
const SUBPAGE_RUNS: [(usize, usize); 8] = [
    (0x1d0, 1),
    (0x34, 0xb),
    (0x1d0, 1),
    (0x34, 0xb),
    (0x1d0, 1),
    (0x34, 0xb),
    (0x1d0, 1),
    (0x34 - 16, 0xb),
];

const TRAILING_PAD: usize = 16;

/// Total size, in bytes, of one raw page plus its OOB spare area.
pub const PAGE_STRIDE: usize = {
    let mut total = 0;
    let mut i = 0;
    while i < SUBPAGE_RUNS.len() {
        total += SUBPAGE_RUNS[i].0 + SUBPAGE_RUNS[i].1;
        i += 1;
    }
    total + TRAILING_PAD
};

const _: () = assert!(PAGE_STRIDE == 2112);

/// Size, in bytes, of a well-formed NAND image.
pub const IMAGE_SIZE: usize = BLOCKS_PER_IMAGE * PAGES_PER_BLOCK * PAGE_STRIDE;

/// A de-framed NAND image: `blocks[b][p]` is the clean 2048-byte
/// payload of page `p` in block `b`.
pub struct NandImage {
    blocks: Vec<Vec<[u8; PAGE_SIZE]>>,
}

impl NandImage {
    /// De-frames a raw NAND dump, stripping OOB/spare bytes from
    /// every page.
    pub fn deframe(raw: &[u8]) -> Result<NandImage> {
        if raw.len() < IMAGE_SIZE {
            return Err(Error::MalformedNandLayout);
        }
        let mut blocks = Vec::with_capacity(BLOCKS_PER_IMAGE);
        let mut cursor = 0usize;
        for _ in 0..BLOCKS_PER_IMAGE {
            let mut pages = Vec::with_capacity(PAGES_PER_BLOCK);
            for _ in 0..PAGES_PER_BLOCK {
                pages.push(deframe_page(&raw[cursor..cursor + PAGE_STRIDE])?);
                cursor += PAGE_STRIDE;
            }
            blocks.push(pages);
        }
        Ok(NandImage { blocks })
    }

    /// Builds an image directly from already-clean pages, bypassing
    /// the OOB-stripping step. Used by other modules' tests to set up
    /// fixture images without hand-assembling spare bytes.
    #[cfg(test)]
    pub(crate) fn from_clean_blocks(blocks: Vec<Vec<[u8; PAGE_SIZE]>>) -> NandImage {
        NandImage { blocks }
    }

    /// Returns the clean payload of page `page` in block `block`.
    pub fn page(&self, block: usize, page: usize) -> &[u8; PAGE_SIZE] {
        &self.blocks[block][page]
    }

    /// Returns the number of blocks in this image.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns all clean pages of a block, in order.
    pub fn block_pages(&self, block: usize) -> &[[u8; PAGE_SIZE]] {
        &self.blocks[block]
    }
}

/// De-frames a single raw page (`PAGE_STRIDE` bytes) into a clean
/// `PAGE_SIZE`-byte payload.
fn deframe_page(raw: &[u8]) -> Result<[u8; PAGE_SIZE]> {
    if raw.len() != PAGE_STRIDE {
        return Err(Error::MalformedNandLayout);
    }
    let mut clean = [0u8; PAGE_SIZE];
    let mut src = 0usize;
    let mut dst = 0usize;
    for &(data_len, pad_len) in &SUBPAGE_RUNS {
        clean[dst..dst + data_len].copy_from_slice(&raw[src..src + data_len]);
        dst += data_len;
        src += data_len + pad_len;
    }
    debug_assert_eq!(dst, PAGE_SIZE);
    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds one raw page whose data runs are each filled with a
    /// distinct marker byte, so we can check the concatenation order.
    fn fixture_page() -> Vec<u8> {
        let mut raw = vec![0u8; PAGE_STRIDE];
        let mut cursor = 0usize;
        for (i, &(data_len, pad_len)) in SUBPAGE_RUNS.iter().enumerate() {
            for b in &mut raw[cursor..cursor + data_len] {
                *b = i as u8;
            }
            cursor += data_len;
            for b in &mut raw[cursor..cursor + pad_len] {
                *b = 0xee;
            }
            cursor += pad_len;
        }
        for b in &mut raw[cursor..cursor + TRAILING_PAD] {
            *b = 0xee;
        }
        raw
    }

    #[test]
    fn deframe_page_strips_spare_and_preserves_order() {
        let raw = fixture_page();
        let clean = deframe_page(&raw).unwrap();
        assert_eq!(clean.len(), PAGE_SIZE);
        let mut offset = 0;
        for (i, &(data_len, _)) in SUBPAGE_RUNS.iter().enumerate() {
            assert!(clean[offset..offset + data_len].iter().all(|&b| b == i as u8));
            offset += data_len;
        }
        assert_eq!(offset, PAGE_SIZE);
    }

    #[test]
    fn deframe_rejects_truncated_page() {
        let raw = vec![0u8; PAGE_STRIDE - 1];
        assert!(matches!(deframe_page(&raw), Err(Error::MalformedNandLayout)));
    }

    #[test]
    fn deframe_whole_image_has_exact_shape() {
        let page = fixture_page();
        let raw = page.repeat(BLOCKS_PER_IMAGE * PAGES_PER_BLOCK);
        let image = NandImage::deframe(&raw).unwrap();
        assert_eq!(image.block_count(), BLOCKS_PER_IMAGE);
        assert_eq!(image.block_pages(0).len(), PAGES_PER_BLOCK);
        assert_eq!(image.page(0, 0).len(), PAGE_SIZE);
    }
}
