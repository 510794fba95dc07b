//! archtree describes what's inside a zip or tar archive
//! as a tree of directories and files, ready to render as JSON:
//!
//! ```no_run
//! # use archtree::*;
//! // A nested tree, with each directory holding its children...
//! let tree = extract("jq-1.6.tar.gz", false)?;
//! for node in tree.iter().flat_map(|top| top.traverse()) {
//!     println!("{}", node.key());
//! }
//!
//! // ...or a flat list with one node per archive entry.
//! let json = extract_as_json("jq-1.6.tar.gz", true)?;
//! println!("{}", json);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Nothing is extracted or decompressed except what's needed to list entries:
//! a zip's central directory tells us everything we need,
//! while a tarball's headers are walked front to back.
//!
//! The pieces are available separately, too:
//! [`read::read_archive()`] lists an archive's entries,
//! [`tree::build()`] turns any sequence of entries into a structure,
//! and the [`json`] module renders it.

use std::path::Path;

use log::*;

pub mod job;
pub mod json;
pub mod read;
pub mod result;
pub mod tree;

pub use read::{read_archive, ArchiveEntry};
pub use result::{ArchiveError, ArchiveResult};
pub use tarball::Compression;
pub use tree::{build, TreeNode};

mod arch;
mod central_directory;
mod tarball;

/// Reads the archive at `path` and describes its structure.
///
/// If `flatten` is set, returns one node per archive entry;
/// otherwise returns the top-level nodes of the archive's directory tree.
pub fn extract<P: AsRef<Path>>(path: P, flatten: bool) -> ArchiveResult<Vec<TreeNode>> {
    let path = path.as_ref();
    let entries = read_archive(path)?;
    debug!("{} is a {} archive", path.display(), entries.format());
    Ok(build(entries, flatten))
}

/// Like [`extract()`], but renders the structure as a JSON array.
pub fn extract_as_json<P: AsRef<Path>>(path: P, flatten: bool) -> ArchiveResult<String> {
    json::to_json(&extract(path, flatten)?)
}
