//! Listing the members of a tarball.
//!
//! Unlike zip, a tarball has no central directory:
//! we walk every header from the front, skipping over member data.
//! Compressed tarballs are decompressed on the fly;
//! the compression is sniffed from the first few bytes.

use std::fmt;
use std::io::{self, Read};

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use log::*;
use tar::{Archive, EntryType};
use xz2::read::XzDecoder;

use crate::read::TarEntry;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: [u8; 3] = [b'B', b'Z', b'h'];
const XZ_MAGIC: [u8; 6] = [0xfd, b'7', b'z', b'X', b'Z', 0];

/// The compression wrapped around a tarball
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    /// Guesses the compression from the magic bytes at the start of the file.
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else if bytes.starts_with(&BZIP2_MAGIC) {
            Compression::Bzip2
        } else if bytes.starts_with(&XZ_MAGIC) {
            Compression::Xz
        } else {
            Compression::None
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
            Compression::Xz => "xz",
        })
    }
}

/// Reads every member header of the tarball in `bytes`, in archive order.
pub fn read_listing(bytes: &[u8], compression: Compression) -> io::Result<Vec<TarEntry>> {
    trace!("Reading tarball with {} compression", compression);
    match compression {
        Compression::None => list_members(bytes),
        Compression::Gzip => list_members(MultiGzDecoder::new(bytes)),
        Compression::Bzip2 => list_members(MultiBzDecoder::new(bytes)),
        Compression::Xz => list_members(XzDecoder::new(bytes)),
    }
}

fn list_members<R: Read>(reader: R) -> io::Result<Vec<TarEntry>> {
    let mut archive = Archive::new(reader);
    let mut members = Vec::new();

    for entry in archive.entries()? {
        let entry = entry?;
        let header = entry.header();
        trace!("{:?}", header);

        let entry_type = header.entry_type();
        // Extension headers carry metadata for other members (or the whole archive);
        // they aren't members themselves.
        if matches!(
            entry_type,
            EntryType::XGlobalHeader | EntryType::XHeader | EntryType::GNULongName
        ) {
            debug!("Skipping {:?} header", entry_type);
            continue;
        }

        members.push(TarEntry {
            file_name: String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
            // The entry's size, unlike the header's, includes any PAX override.
            size: entry.size(),
            is_dir: entry_type.is_dir(),
        });
    }
    Ok(members)
}
