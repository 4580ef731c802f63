// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Extracts files out of a forensic image of a Qualcomm EFS2
//! filesystem living on raw NAND flash.
//!
//! The pipeline runs in four stages, each its own module:
//!
//! - [`nand`] strips the OOB/spare bytes interleaved into every NAND
//!   page, producing a clean page array.
//! - [`partition`] locates the NAND partition table and carves out
//!   each partition's byte stream.
//! - [`volume`] finds the freshest EFS2 superblock inside a partition
//!   and exposes logical-to-physical page translation through its
//!   page table.
//! - [`inode`] and [`dirnode`] decode inode records and directory
//!   nodes; [`walker`] ties them together into full relative
//!   pathnames.

pub mod dirnode;
pub mod error;
pub mod inode;
pub mod nand;
pub mod partition;
pub mod volume;
pub mod walker;

pub use dirnode::{DirNode, FileEntry};
pub use error::{Error, Result};
pub use inode::{fetch_file_descriptor, fetch_inode, FileDescriptor, Inode, Kind};
pub use nand::NandImage;
pub use partition::{carve_partitions, Partition, PartitionEntry};
pub use volume::{EfsInfo, VolumeReader};
pub use walker::{resolve_paths, walk, ResolvedFile};
