// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Everything that can go wrong while de-framing a NAND dump,
/// carving partitions out of it, or walking a QEFS2 volume.
#[derive(Debug, Error)]
pub enum Error {
    #[error("NAND page layout did not parse (truncated image?)")]
    MalformedNandLayout,

    #[error("no partition table found after scanning the whole image")]
    NoPartitionTable,

    #[error("no page in the partition parsed as a valid EFS2 superblock")]
    NoSuperblock,

    #[error("EFS info block magic mismatch at PT[3]")]
    CorruptInfoBlock,

    #[error("directory record metadata tag {0:?} is not one of 'i', 'n', 'N'")]
    UnknownRecordTag(u8),

    #[error("directory record name length {0} is >= 103 (long names are unsupported)")]
    LongNameUnsupported(u8),

    #[error("directory node record consumption exceeded its `used` byte count")]
    NodeOverrun,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Builds an `io::Error` for a read that falls outside its backing
/// buffer -- used for physical/logical page offsets and page-table
/// indices that don't resolve to an in-bounds page.
pub(crate) fn eof(what: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        what.to_string(),
    ))
}
