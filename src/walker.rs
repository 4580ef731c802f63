// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Filesystem walker: iterates the directory node list, collects
//! every `FileEntry`, and resolves full relative pathnames for the
//! non-directory entries.

use crate::dirnode::{parse_node, FileEntry};
use crate::error::{Error, Result};
use crate::volume::{VolumeReader, SENTINEL};
use std::collections::HashMap;
use std::path::PathBuf;

/// Walks the directory node list starting at the volume's first
/// directory node, returning every decoded `FileEntry` in node/record
/// order.
///
/// Guards against a cyclic `next` chain (which would otherwise hang
/// forever) by refusing to revisit a node id; this is defensive --
/// the format is documented as acyclic.
pub fn walk(vol: &VolumeReader) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    let mut visited = std::collections::HashSet::new();
    let mut node_id = vol.first_directory_node_id();

    while node_id != SENTINEL {
        if !visited.insert(node_id) {
            return Err(Error::NodeOverrun);
        }
        let page = vol.read_logical_page(node_id)?;
        let node = parse_node(vol, page)?;
        entries.extend(node.entries);
        node_id = node.next;
    }

    Ok(entries)
}

/// A file with its full pathname resolved, ready to be written out.
pub struct ResolvedFile {
    pub path: PathBuf,
    pub mode: u16,
    pub data: Vec<u8>,
}

/// A QEFS2 quirk: file names are sometimes prefixed with a stream
/// qualifier (`0:`), which isn't part of the real filename.
fn strip_stream_qualifier(name: &str) -> &str {
    name.strip_prefix("0:").unwrap_or(name)
}

/// Resolves every non-directory entry's full relative pathname by
/// walking its parent chain up to `root_inode`.
///
/// Builds an `inode -> (name, parent_inode)` map from directory
/// entries (excluding the `.`/`..` self-entries), then, per file,
/// walks that map up to the root, caching each parent's resolved
/// directory-component list so that files sharing a directory only
/// pay for the walk once. Files parented directly at the root are
/// skipped, matching the original tool's behavior.
pub fn resolve_paths(entries: &[FileEntry], root_inode: u32) -> Vec<ResolvedFile> {
    let mut dirs: HashMap<u32, (String, u32)> = HashMap::new();
    for e in entries {
        if !e.is_dir() || e.name == "." || e.name == ".." {
            continue;
        }
        if let Some(inode) = e.inode {
            dirs.insert(inode, (e.name.clone(), e.parent_inode));
        }
    }

    let mut cache: HashMap<u32, Vec<String>> = HashMap::new();
    let mut resolved = Vec::new();

    for e in entries {
        if e.is_dir() || e.parent_inode == root_inode {
            continue;
        }
        let filename = strip_stream_qualifier(&e.name).to_string();

        let components = cache.entry(e.parent_inode).or_insert_with(|| {
            let mut parts = Vec::new();
            let mut cur = e.parent_inode;
            while cur != root_inode {
                match dirs.get(&cur) {
                    Some((name, parent)) => {
                        parts.push(name.clone());
                        cur = *parent;
                    }
                    None => break,
                }
            }
            parts.reverse();
            parts
        });
        let mut path: PathBuf = components.iter().collect();
        path.push(filename);

        resolved.push(ResolvedFile { path, mode: e.mode, data: e.data.clone() });
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(name: &str, parent: u32, inode: u32) -> FileEntry {
        FileEntry { name: name.to_string(), parent_inode: parent, inode: Some(inode), mode: 0x4000, data: Vec::new() }
    }

    fn file(name: &str, parent: u32, data: &[u8]) -> FileEntry {
        FileEntry { name: name.to_string(), parent_inode: parent, inode: None, mode: 0x8000, data: data.to_vec() }
    }

    #[test]
    fn resolves_nested_path_and_strips_stream_qualifier() {
        const ROOT: u32 = 2;
        let entries = vec![
            dir(".", ROOT, ROOT),
            dir("..", ROOT, ROOT),
            dir("etc", ROOT, 10),
            file("0:config", 10, b"hello"),
        ];
        let resolved = resolve_paths(&entries, ROOT);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].path, PathBuf::from("etc/config"));
        assert_eq!(resolved[0].data, b"hello");
    }

    #[test]
    fn root_parented_files_are_skipped() {
        const ROOT: u32 = 2;
        let entries = vec![file("motd", ROOT, b"hi"), dir("etc", ROOT, 10), file("x", 10, b"y")];
        let resolved = resolve_paths(&entries, ROOT);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].path, PathBuf::from("etc/x"));
    }

    #[test]
    fn dot_entries_are_excluded_from_directory_map() {
        const ROOT: u32 = 2;
        let entries = vec![
            dir(".", 10, 10),
            dir("..", 10, ROOT),
            dir("a", ROOT, 10),
            dir("b", 10, 20),
            file("deep", 20, b"x"),
        ];
        let resolved = resolve_paths(&entries, ROOT);
        assert_eq!(resolved[0].path, PathBuf::from("a/b/deep"));
    }
}
