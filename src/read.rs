//! Tools for reading an archive's listing of entries.
//!
//! [`read_archive()`] opens a file, works out whether it's a zip or a
//! (possibly compressed) tarball, and hands back its entries as
//! [`ArchiveEntry`] values, one per record, in the order the archive lists them.
//!
//! Detection is by content, never by file name:
//! we try the file as a zip first, and fall back to tar if that fails.

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::vec;

use log::*;
use memmap2::Mmap;

use crate::central_directory;
use crate::result::*;
use crate::tarball::{self, Compression};

/// A file or directory recorded in a zip archive's central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub(crate) file_name: String,
    pub(crate) size: u64,
}

impl ZipEntry {
    pub fn new<S: Into<String>>(file_name: S, size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            size,
        }
    }

    /// The path as stored in the archive
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Uncompressed size of the file in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// A member of a tarball
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarEntry {
    pub(crate) file_name: String,
    pub(crate) size: u64,
    pub(crate) is_dir: bool,
}

impl TarEntry {
    pub fn new<S: Into<String>>(file_name: S, size: u64, is_dir: bool) -> Self {
        Self {
            file_name: file_name.into(),
            size,
            is_dir,
        }
    }

    /// The path as stored in the archive (long names included)
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Size of the member's data in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// True if the tar header marks this member as a directory
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }
}

/// One record from an archive's listing, whatever the archive's format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEntry {
    Zip(ZipEntry),
    Tar(TarEntry),
}

impl ArchiveEntry {
    /// The raw internal path, as stored in the archive.
    ///
    /// It may start or end with `/`, or contain empty segments (`a//b`).
    pub fn file_name(&self) -> &str {
        match self {
            ArchiveEntry::Zip(z) => z.file_name(),
            ArchiveEntry::Tar(t) => t.file_name(),
        }
    }

    /// Uncompressed size in bytes. Usually 0 for directories.
    pub fn size(&self) -> u64 {
        match self {
            ArchiveEntry::Zip(z) => z.size(),
            ArchiveEntry::Tar(t) => t.size(),
        }
    }

    /// True if the archive explicitly marks this entry as a directory.
    ///
    /// Zip has no such marker (only a trailing-slash convention),
    /// so zip entries always report false.
    pub fn is_dir(&self) -> bool {
        match self {
            ArchiveEntry::Zip(_) => false,
            ArchiveEntry::Tar(t) => t.is_dir(),
        }
    }

    /// The non-empty `/`-separated components of [`file_name()`](Self::file_name)
    pub fn path_components(&self) -> Vec<&str> {
        path_components(self.file_name())
    }
}

impl From<ZipEntry> for ArchiveEntry {
    fn from(z: ZipEntry) -> Self {
        ArchiveEntry::Zip(z)
    }
}

impl From<TarEntry> for ArchiveEntry {
    fn from(t: TarEntry) -> Self {
        ArchiveEntry::Tar(t)
    }
}

/// Splits an archive path on `/`, dropping empty segments
/// (from leading, trailing, or doubled separators).
///
/// ```
/// assert_eq!(archtree::read::path_components("/a//b/"), ["a", "b"]);
/// assert!(archtree::read::path_components("").is_empty());
/// ```
pub fn path_components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// The container format an archive was read as
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar(Compression),
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Zip => f.write_str("zip"),
            ArchiveFormat::Tar(Compression::None) => f.write_str("tar"),
            ArchiveFormat::Tar(c) => write!(f, "tar ({c})"),
        }
    }
}

/// The entries of an archive, in the archive's own listing order.
///
/// Single pass: entries are handed out by value and can't be rewound.
#[derive(Debug)]
pub struct ArchiveEntries {
    format: ArchiveFormat,
    inner: vec::IntoIter<ArchiveEntry>,
}

impl ArchiveEntries {
    /// The format the archive was read as
    pub fn format(&self) -> ArchiveFormat {
        self.format
    }
}

impl Iterator for ArchiveEntries {
    type Item = ArchiveEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ArchiveEntries {}

/// Opens the archive at `path` and reads its listing.
///
/// Failing to open or map the file is an [`ArchiveError::Io`];
/// a file that's neither a zip nor a tarball is an
/// [`ArchiveError::UnsupportedArchiveFormat`].
pub fn read_archive<P: AsRef<Path>>(path: P) -> ArchiveResult<ArchiveEntries> {
    let path = path.as_ref();
    let file = File::open(path)?;
    // Zero-length files can't be mapped, and aren't archives anyways.
    if file.metadata()?.len() == 0 {
        return Err(ArchiveError::UnsupportedArchiveFormat {
            zip: String::from("empty file"),
            tar: String::from("empty file"),
        });
    }
    info!("Memory mapping {}", path.display());
    let mapping = unsafe { Mmap::map(&file)? };
    read_archive_bytes(&mapping)
}

/// Reads the listing of an archive already in memory.
pub fn read_archive_bytes(bytes: &[u8]) -> ArchiveResult<ArchiveEntries> {
    let zip_error = match central_directory::read_central_directory(bytes) {
        Ok(entries) => {
            return Ok(entries_of(
                ArchiveFormat::Zip,
                entries.into_iter().map(ArchiveEntry::Zip),
            ));
        }
        Err(e) => e,
    };
    debug!("Not a zip archive ({zip_error}), trying tar");

    let compression = Compression::sniff(bytes);
    match tarball::read_listing(bytes, compression) {
        Ok(entries) => Ok(entries_of(
            ArchiveFormat::Tar(compression),
            entries.into_iter().map(ArchiveEntry::Tar),
        )),
        Err(tar_error) => {
            warn!("Couldn't read archive as zip ({zip_error}) or tar ({tar_error})");
            Err(ArchiveError::UnsupportedArchiveFormat {
                zip: zip_error.to_string(),
                tar: tar_error.to_string(),
            })
        }
    }
}

fn entries_of<I>(format: ArchiveFormat, entries: I) -> ArchiveEntries
where
    I: Iterator<Item = ArchiveEntry>,
{
    let entries: Vec<ArchiveEntry> = entries
        .inspect(|entry| debug!("{format}: {entry:?}"))
        .collect();
    debug!("Read {} entries as {}", entries.len(), format);
    ArchiveEntries {
        format,
        inner: entries.into_iter(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_drop_empty_segments() {
        assert_eq!(path_components("a//b/"), ["a", "b"]);
        assert_eq!(path_components("/leading/slash"), ["leading", "slash"]);
        assert_eq!(path_components("plain.txt"), ["plain.txt"]);
        assert!(path_components("").is_empty());
        assert!(path_components("///").is_empty());
    }

    #[test]
    fn zip_entries_are_never_directories() {
        let entry = ArchiveEntry::from(ZipEntry::new("some/dir/", 0));
        assert!(!entry.is_dir());
        assert_eq!(entry.path_components(), ["some", "dir"]);
    }

    #[test]
    fn tar_entries_report_directories() {
        let entry = ArchiveEntry::from(TarEntry::new("some/dir", 0, true));
        assert!(entry.is_dir());
        assert_eq!(entry.size(), 0);
        assert_eq!(entry.file_name(), "some/dir");
    }

    #[test]
    fn garbage_is_unsupported() {
        let garbage = vec![0x42u8; 1500];
        match read_archive_bytes(&garbage) {
            Err(ArchiveError::UnsupportedArchiveFormat { zip, tar }) => {
                assert!(!zip.is_empty());
                assert!(!tar.is_empty());
            }
            other => panic!("Expected an unsupported format, got {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            read_archive("no/such/archive.zip"),
            Err(ArchiveError::Io(_))
        ));
    }

    #[test]
    fn format_names() {
        assert_eq!(ArchiveFormat::Zip.to_string(), "zip");
        assert_eq!(ArchiveFormat::Tar(Compression::None).to_string(), "tar");
        assert_eq!(
            ArchiveFormat::Tar(Compression::Gzip).to_string(),
            "tar (gzip)"
        );
    }
}
