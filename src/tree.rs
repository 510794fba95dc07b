//! Building a directory tree (or a flat list) out of archive entries.
//!
//! Archives don't promise to list a directory before its contents,
//! or to list directories at all. So we don't look for directory entries;
//! we reconstruct the hierarchy from the paths themselves.
//! Every distinct path prefix (`a`, `a/b`, `a/b/c.txt`...) becomes exactly
//! one node, created by the first entry whose path passes through it.

use std::borrow::Borrow;
use std::collections::hash_map::{Entry, HashMap};
use std::fmt;

use log::*;

use crate::json::MetadataValue;
use crate::read::ArchiveEntry;

/// A key/value pair describing a node, e.g., `size = 1024`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Metadata {
    pub key: String,
    pub value: MetadataValue,
}

impl Metadata {
    pub fn new<K: Into<String>, V: Into<MetadataValue>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn size(size: u64) -> Self {
        Self::new("size", size)
    }
}

/// A file or directory in the structure of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    name: String,
    path: Vec<String>,
    key: String,
    children: Vec<TreeNode>,
    metadata: Vec<Metadata>,
    flattened: bool,
}

impl TreeNode {
    /// Makes a node describing `entry`, whose path components are `components`.
    ///
    /// `key` is the path prefix the node lives at, which isn't necessarily
    /// the entry's full path.
    fn for_entry(
        entry: &ArchiveEntry,
        components: &[&str],
        key: String,
        flattened: bool,
    ) -> Self {
        Self {
            name: components.last().copied().unwrap_or_default().to_owned(),
            path: components.iter().map(|c| c.to_string()).collect(),
            key,
            children: Vec::new(),
            metadata: vec![Metadata::size(entry.size())],
            flattened,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path components from the top of the archive to this node
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The node's path, joined by `/`
    pub fn path_key(&self) -> String {
        self.path.join("/")
    }

    /// All but the last path component, joined by `/`,
    /// or `/` for nodes at the top of the archive.
    pub fn parent_path_key(&self) -> String {
        if self.path.len() <= 1 {
            String::from("/")
        } else {
            self.path[..self.path.len() - 1].join("/")
        }
    }

    /// The path prefix this node was created for.
    ///
    /// In a tree, the name and path of a node come from the entry that
    /// first passed through it, so a directory node can carry the path of
    /// a file inside it. The key is always the directory's own prefix.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn children(&self) -> &[TreeNode] {
        &self.children
    }

    pub fn metadata(&self) -> &[Metadata] {
        &self.metadata
    }

    /// Flattened nodes are rendered without their `children`.
    pub fn is_flattened(&self) -> bool {
        self.flattened
    }

    /// Attaches another key/value pair after the built-in `size`.
    pub fn add_metadata(&mut self, metadata: Metadata) -> &mut Self {
        self.metadata.push(metadata);
        self
    }

    pub fn add_child(&mut self, child: TreeNode) -> &mut Self {
        self.children.push(child);
        self
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Iterates over this node and all its descendants, depth first.
    pub fn traverse(&self) -> TreeIterator<'_> {
        TreeIterator {
            stack: vec![std::slice::from_ref(self).iter()],
        }
    }
}

impl fmt::Display for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path_key())
    }
}

/// Iterates over a node and its descendants, parents before children
pub struct TreeIterator<'a> {
    stack: Vec<std::slice::Iter<'a, TreeNode>>,
}

impl<'a> Iterator for TreeIterator<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(top) = self.stack.last_mut() {
            match top.next() {
                Some(node) => {
                    self.stack.push(node.children.iter());
                    return Some(node);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
        None
    }
}

/// Given the entries of an archive, describes its structure.
///
/// If `flatten` is set, we get one childless node per entry, in entry order.
/// Otherwise we get the nodes at the top of the archive,
/// each holding its descendants as children.
pub fn build<I>(entries: I, flatten: bool) -> Vec<TreeNode>
where
    I: IntoIterator,
    I::Item: Borrow<ArchiveEntry>,
{
    if flatten {
        build_flat(entries)
    } else {
        build_tree(entries)
    }
}

fn build_flat<I>(entries: I) -> Vec<TreeNode>
where
    I: IntoIterator,
    I::Item: Borrow<ArchiveEntry>,
{
    entries
        .into_iter()
        .map(|entry| {
            let entry: &ArchiveEntry = entry.borrow();
            let components = entry.path_components();
            TreeNode::for_entry(entry, &components, components.join("/"), true)
        })
        .collect()
}

fn build_tree<I>(entries: I) -> Vec<TreeNode>
where
    I: IntoIterator,
    I::Item: Borrow<ArchiveEntry>,
{
    let mut arena = Arena::default();

    for entry in entries {
        let entry: &ArchiveEntry = entry.borrow();
        let components = entry.path_components();
        if components.is_empty() {
            warn!("Skipping entry with no path components: {:?}", entry.file_name());
            continue;
        }

        // Walk down from the top, creating each prefix the first time we see it.
        let mut parent = None;
        for depth in 1..=components.len() {
            let key = components[..depth].join("/");
            parent = Some(arena.get_or_insert(key, parent, |key| {
                TreeNode::for_entry(entry, &components, key, false)
            }));
        }
    }

    arena.into_tree()
}

struct Slot {
    node: TreeNode,
    children: Vec<usize>,
}

/// Nodes under construction, addressed by index
/// so that a node can be found by its key while its parent is still growing.
#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    by_key: HashMap<String, usize>,
    top_level: Vec<usize>,
}

impl Arena {
    /// Returns the index of the node at `key`,
    /// making it (as a child of `parent`) if it doesn't exist yet.
    fn get_or_insert<F>(&mut self, key: String, parent: Option<usize>, make: F) -> usize
    where
        F: FnOnce(String) -> TreeNode,
    {
        match self.by_key.entry(key) {
            Entry::Occupied(existing) => *existing.get(),
            Entry::Vacant(vacant) => {
                let index = self.slots.len();
                trace!("New node {} at {}", index, vacant.key());
                self.slots.push(Slot {
                    node: make(vacant.key().clone()),
                    children: Vec::new(),
                });
                match parent {
                    Some(p) => self.slots[p].children.push(index),
                    None => self.top_level.push(index),
                }
                vacant.insert(index);
                index
            }
        }
    }

    /// Moves every node into its parent, returning the top-level nodes.
    fn into_tree(self) -> Vec<TreeNode> {
        let mut slots: Vec<Option<Slot>> = self.slots.into_iter().map(Some).collect();
        self.top_level
            .into_iter()
            .filter_map(|index| assemble(&mut slots, index))
            .collect()
    }
}

fn assemble(slots: &mut [Option<Slot>], index: usize) -> Option<TreeNode> {
    let Slot { mut node, children } = slots[index].take()?;
    for child in children {
        if let Some(child) = assemble(slots, child) {
            node.add_child(child);
        }
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;

    use crate::read::{TarEntry, ZipEntry};

    fn zip(entries: &[(&str, u64)]) -> Vec<ArchiveEntry> {
        entries
            .iter()
            .map(|(name, size)| ArchiveEntry::from(ZipEntry::new(*name, *size)))
            .collect()
    }

    fn size_of(node: &TreeNode) -> &MetadataValue {
        &node.metadata()[0].value
    }

    #[test]
    fn hierarchy() {
        let entries = zip(&[("dir/a.txt", 10), ("dir/b.txt", 20), ("other.txt", 5)]);
        let tree = build(&entries, false);

        assert_eq!(tree.len(), 2);
        let dir = &tree[0];
        assert_eq!(dir.key(), "dir");
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.children()[0].name(), "a.txt");
        assert_eq!(dir.children()[0].key(), "dir/a.txt");
        assert_eq!(size_of(&dir.children()[0]), &MetadataValue::Integer(10));
        assert_eq!(dir.children()[1].name(), "b.txt");
        assert_eq!(size_of(&dir.children()[1]), &MetadataValue::Integer(20));
        assert!(dir.children()[1].is_empty());

        let other = &tree[1];
        assert_eq!(other.name(), "other.txt");
        assert_eq!(other.path_key(), "other.txt");
        assert_eq!(other.parent_path_key(), "/");
        assert!(other.is_empty());
    }

    #[test]
    fn intermediate_nodes_take_the_creating_entry() {
        // A directory node is named for (and carries the path and size of)
        // the first entry that passed through it.
        let entries = zip(&[("a/b/c.txt", 7), ("a/d.txt", 3)]);
        let tree = build(&entries, false);

        let a = &tree[0];
        assert_eq!(a.key(), "a");
        assert_eq!(a.name(), "c.txt");
        assert_eq!(a.path(), ["a", "b", "c.txt"]);
        assert_eq!(a.path_key(), "a/b/c.txt");
        assert_eq!(a.parent_path_key(), "a/b");
        assert_eq!(size_of(a), &MetadataValue::Integer(7));

        let b = &a.children()[0];
        assert_eq!(b.key(), "a/b");
        assert_eq!(b.name(), "c.txt");

        let d = &a.children()[1];
        assert_eq!(d.key(), "a/d.txt");
        assert_eq!(d.name(), "d.txt");
        assert_eq!(size_of(d), &MetadataValue::Integer(3));
    }

    #[test]
    fn shared_prefixes_are_created_once() {
        let entries = zip(&[
            ("x/y/1", 1),
            ("x/y/2", 2),
            ("x/z/3", 3),
            ("x/y/", 0),
            ("x/y/1", 1),
        ]);
        let tree = build(&entries, false);

        let keys: Vec<&str> = tree
            .iter()
            .flat_map(|top| top.traverse())
            .map(|node| node.key())
            .collect();
        let unique: HashSet<&str> = keys.iter().copied().collect();
        assert_eq!(keys.len(), unique.len());
        let expected: HashSet<&str> = ["x", "x/y", "x/y/1", "x/y/2", "x/z", "x/z/3"]
            .into_iter()
            .collect();
        assert_eq!(unique, expected);
    }

    #[test]
    fn children_keep_creation_order() {
        let entries = zip(&[("d/zeta", 1), ("d/alpha", 1), ("d/mu", 1)]);
        let tree = build(&entries, false);
        let names: Vec<&str> = tree[0].children().iter().map(|c| c.name()).collect();
        assert_eq!(names, ["zeta", "alpha", "mu"]);
    }

    #[test]
    fn empty_paths_are_skipped_in_trees() {
        let entries = zip(&[("/", 0), ("", 0), ("file", 1)]);
        let tree = build(&entries, false);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name(), "file");
    }

    #[test]
    fn flat_list() {
        let entries = zip(&[("dir/a.txt", 10), ("dir/a.txt", 10), ("a//b/", 0)]);
        let flat = build(&entries, true);

        assert_eq!(flat.len(), 3);
        assert!(flat.iter().all(|n| n.is_flattened() && n.is_empty()));
        // No deduplication.
        assert_eq!(flat[0], flat[1]);
        assert_eq!(flat[2].name(), "b");
        assert_eq!(flat[2].path(), ["a", "b"]);
        assert_eq!(flat[2].path_key(), "a/b");
        assert_eq!(flat[2].parent_path_key(), "a");
    }

    #[test]
    fn flat_list_describes_empty_paths() {
        let entries = zip(&[("//", 0)]);
        let flat = build(&entries, true);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].name(), "");
        assert!(flat[0].path().is_empty());
        assert_eq!(flat[0].path_key(), "");
        assert_eq!(flat[0].parent_path_key(), "/");
    }

    #[test]
    fn no_entries() {
        let entries: Vec<ArchiveEntry> = Vec::new();
        assert!(build(&entries, false).is_empty());
        assert!(build(&entries, true).is_empty());
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let entries = vec![
            ArchiveEntry::from(TarEntry::new("pkg/", 0, true)),
            ArchiveEntry::from(TarEntry::new("pkg/src/lib.rs", 120, false)),
            ArchiveEntry::from(TarEntry::new("pkg/Cargo.toml", 30, false)),
        ];
        assert_eq!(build(&entries, false), build(&entries, false));
        assert_eq!(build(&entries, true), build(entries, true));
    }

    #[test]
    fn traversal_is_depth_first() {
        let entries = zip(&[("a/b", 1), ("a/c/d", 1), ("e", 1)]);
        let tree = build(&entries, false);
        let keys: Vec<&str> = tree[0].traverse().map(|n| n.key()).collect();
        assert_eq!(keys, ["a", "a/b", "a/c", "a/c/d"]);
    }
}
