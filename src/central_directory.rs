//! Reading a zip's central directory.
//!
//! The directory lists every entry with its path and uncompressed size,
//! which is all the structure we describe.
//! Local file headers and file data are never touched.
//!
//! Section numbers in comments refer to [`APPNOTE.TXT`].
//!
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::borrow::Cow;

use codepage_437::*;
use log::*;
use memchr::memmem;

use crate::arch::usize;
use crate::read::ZipEntry;
use crate::result::*;

/// End of central directory magic number
const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];

/// Fixed portion of the EOCDR, magic included.
const EOCDR_SIZE: usize = 22;

/// Fixed portion of a central directory entry, magic included.
const CENTRAL_DIRECTORY_ENTRY_SIZE: usize = 46;

/// Splits `n` bytes off the front of the provided slice, shrinking it.
///
/// Unlike a bare `split_at()`, running off the end is an error:
/// we're often handed files that aren't zips at all.
fn take<'a>(input: &mut &'a [u8], n: usize) -> ArchiveResult<&'a [u8]> {
    if input.len() < n {
        return Err(ArchiveError::InvalidZip("Truncated record"));
    }
    let (taken, rest) = input.split_at(n);
    *input = rest;
    Ok(taken)
}

/// Pops a little-endian u64 off the front of `input`.
fn read_u64(input: &mut &[u8]) -> ArchiveResult<u64> {
    let b = take(input, 8)?;
    Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

/// Pops a little-endian u32 off the front of `input`.
fn read_u32(input: &mut &[u8]) -> ArchiveResult<u32> {
    let b = take(input, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Pops a little-endian u16 off the front of `input`.
fn read_u16(input: &mut &[u8]) -> ArchiveResult<u16> {
    let b = take(input, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

/// The End of central directory record (EOCDR),
/// which says where the central directory starts and how many entries it holds.
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
}

impl EndOfCentralDirectory {
    pub fn parse(mut eocdr: &[u8]) -> ArchiveResult<Self> {
        // APPNOTE 4.3.16: signature, this disk, disk holding the directory,
        // entries here, total entries (u16 each), directory size and offset
        // (u32 each), then a comment we don't read.
        if take(&mut eocdr, 4)? != EOCDR_MAGIC {
            return Err(ArchiveError::InvalidZip(
                "Invalid End Of Central Directory Record",
            ));
        }
        Ok(Self {
            disk_number: read_u16(&mut eocdr)?,
            disk_with_central_directory: read_u16(&mut eocdr)?,
            entries_on_this_disk: read_u16(&mut eocdr)?,
            entries: read_u16(&mut eocdr)?,
            central_directory_size: read_u32(&mut eocdr)?,
            central_directory_offset: read_u32(&mut eocdr)?,
        })
    }
}

/// Finds the last EOCDR signature in `mapping`.
///
/// A trailing comment of unknown length means there's no fixed offset to check.
pub fn find_eocdr(mapping: &[u8]) -> ArchiveResult<usize> {
    // The record can't start further back than its fixed part plus the longest comment.
    let window_start = mapping.len().saturating_sub(EOCDR_SIZE + u16::MAX as usize);
    memmem::rfind(&mapping[window_start..], &EOCDR_MAGIC)
        .map(|posit| window_start + posit)
        .ok_or(ArchiveError::InvalidZip(
            "Couldn't find End Of Central Directory Record",
        ))
}

/// Data from the Zip64 end of central directory locator
///
/// This immediately precedes the End of central directory record
/// on Zip64 files and tells us where to find the Zip64 end of central directory record.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub const SIZE_IN_FILE: usize = 20;

    /// Returns `None` if there's no locator here, i.e., this isn't a Zip64 archive.
    pub fn parse(mut mapping: &[u8]) -> Option<Self> {
        // APPNOTE 4.3.15: signature, disk with the Zip64 EOCDR (u32),
        // its offset (u64), disk count (u32)
        if take(&mut mapping, 4).ok()? != ZIP64_EOCDR_LOCATOR_MAGIC {
            return None;
        }
        Some(Self {
            disk_with_central_directory: read_u32(&mut mapping).ok()?,
            zip64_eocdr_offset: read_u64(&mut mapping).ok()?,
            disks: read_u32(&mut mapping).ok()?,
        })
    }
}

/// Data from the Zip64 end of central directory record
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory {
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    const FIXED_SIZE_IN_FILE: usize = 56;

    pub fn parse(mut eocdr: &[u8]) -> ArchiveResult<Self> {
        // APPNOTE 4.3.14: a wider EOCDR, led by its own size and the version fields.
        if take(&mut eocdr, 4)? != ZIP64_EOCDR_MAGIC {
            return Err(ArchiveError::InvalidZip(
                "Invalid Zip64 End Of Central Directory Record",
            ));
        }
        let eocdr_size = usize(read_u64(&mut eocdr)?)?;
        let _source_version = read_u16(&mut eocdr)?;
        let _minimum_extract_version = read_u16(&mut eocdr)?;
        let disk_number = read_u32(&mut eocdr)?;
        let disk_with_central_directory = read_u32(&mut eocdr)?;
        let entries_on_this_disk = read_u64(&mut eocdr)?;
        let entries = read_u64(&mut eocdr)?;
        let _central_directory_size = read_u64(&mut eocdr)?;
        let central_directory_offset = read_u64(&mut eocdr)?;

        // The stored size excludes the signature and the size field itself (12 bytes).
        let extensible_data_length = eocdr_size
            .checked_add(12)
            .and_then(|total| total.checked_sub(Self::FIXED_SIZE_IN_FILE))
            .ok_or(ArchiveError::InvalidZip(
                "Invalid size in Zip64 End Of Central Directory Record",
            ))?;
        take(&mut eocdr, extensible_data_length)?;

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_offset,
        })
    }
}

/// Finds the first Zip64 EOCDR signature at or after its nominal location,
/// which prepended data pushes further into the file.
pub fn find_zip64_eocdr(mapping: &[u8]) -> ArchiveResult<usize> {
    memmem::find(mapping, &ZIP64_EOCDR_MAGIC).ok_or(ArchiveError::InvalidZip(
        "Couldn't find zip64 End Of Central Directory Record",
    ))
}

/// The parts of a central directory entry we care about
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub flags: u16,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    pub fn parse_and_consume(entry: &mut &'a [u8]) -> ArchiveResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        if take(entry, 4)? != CENTRAL_DIRECTORY_MAGIC {
            return Err(ArchiveError::InvalidZip("Invalid central directory entry"));
        }
        // Versions made by and needed to extract
        take(entry, 4)?;
        let flags = read_u16(entry)?;
        // Compression method, modification time and date, CRC, compressed size
        take(entry, 14)?;
        let uncompressed_size = read_u32(entry)?;
        let path_length = usize(read_u16(entry)?)?;
        let extra_field_length = usize(read_u16(entry)?)?;
        let file_comment_length = usize(read_u16(entry)?)?;
        let disk_number = read_u16(entry)?;
        // Internal and external file attributes, local header offset
        take(entry, 10)?;
        let path = take(entry, path_length)?;
        let extra_field = take(entry, extra_field_length)?;
        take(entry, file_comment_length)?;

        Ok(Self {
            flags,
            uncompressed_size,
            disk_number,
            path,
            extra_field,
        })
    }
}

/// True if the entry's name is UTF-8 rather than CP437
fn is_utf8(flags: u16) -> bool {
    // Bit 11, the language encoding flag
    flags & (1 << 11) != 0
}

impl ZipEntry {
    /// Extracts a `ZipEntry` from a central directory entry
    pub(crate) fn from_cde(cde: &CentralDirectoryEntry) -> ArchiveResult<Self> {
        let file_name = if is_utf8(cde.flags) {
            std::str::from_utf8(cde.path)?.to_owned()
        } else {
            let decoded: Cow<str> = Cow::borrow_from_cp437(cde.path, &CP437_CONTROL);
            decoded.into_owned()
        };

        if cde.disk_number != 0 {
            return Err(ArchiveError::UnsupportedZip(format!(
                "No support for multi-disk archives: file {} claims to be on disk {}",
                file_name, cde.disk_number,
            )));
        }

        let size = parse_extra_field(cde)?.unwrap_or_else(|| cde.uncompressed_size.into());
        Ok(Self { file_name, size })
    }
}

/// Parses the "extra fields" found in a central directory entry,
/// returning the uncompressed size from its Zip64 record, if any.
///
/// Only the Zip64 record matters to us: it holds sizes too big for the u32 fields.
fn parse_extra_field(cde: &CentralDirectoryEntry) -> ArchiveResult<Option<u64>> {
    let mut extra_field = cde.extra_field;
    let mut size = None;
    // APPNOTE 4.5.1: a run of (id: u16, length: u16, data) records
    while !extra_field.is_empty() {
        let kind = read_u16(&mut extra_field)?;
        let field_len = usize(read_u16(&mut extra_field)?)?;
        let mut data = take(&mut extra_field, field_len)?;

        // Zip64 extended information extra field.
        // 4.5.3: fields MUST only appear if the corresponding
        // header field is set to 0xFFFFFFFF, and in this order.
        // Only the uncompressed size is kept, but it comes first anyways.
        if kind == 0x0001 && cde.uncompressed_size == u32::MAX {
            size = Some(read_u64(&mut data)?);
        }
    }
    Ok(size)
}

/// Reads every entry from the central directory of the zip archive in `mapping`,
/// in the order the directory lists them.
///
/// Since a ZIP archive's metadata sits at the back of the file,
/// arbitrary data may prepend the archive (a self-extractor's executable, say).
/// That's fine; we find the real offsets relative to the central directory.
pub fn read_central_directory(mapping: &[u8]) -> ArchiveResult<Vec<ZipEntry>> {
    let eocdr_posit = find_eocdr(mapping)?;
    let eocdr = EndOfCentralDirectory::parse(&mapping[eocdr_posit..])?;
    trace!("{:?}", eocdr);

    if eocdr.disk_number != eocdr.disk_with_central_directory {
        return Err(ArchiveError::UnsupportedZip(format!(
            "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
            eocdr.disk_number, eocdr.disk_with_central_directory
        )));
    }
    if eocdr.entries != eocdr.entries_on_this_disk {
        return Err(ArchiveError::UnsupportedZip(format!(
            "No support for multi-disk archives: entries ({}) != entries this disk ({})",
            eocdr.entries, eocdr.entries_on_this_disk
        )));
    }

    let locator_posit = eocdr_posit.checked_sub(Zip64EndOfCentralDirectoryLocator::SIZE_IN_FILE);
    let locator = locator_posit
        .and_then(|posit| Zip64EndOfCentralDirectoryLocator::parse(&mapping[posit..]));

    let archive_offset;
    let nominal_central_directory_offset;
    let entry_count;

    if let (Some(locator_posit), Some(locator)) = (locator_posit, locator) {
        trace!("{:?}", locator);

        if eocdr.disk_number as u32 != locator.disk_with_central_directory || locator.disks != 1
        {
            return Err(ArchiveError::UnsupportedZip(format!(
                "No support for multi-disk archives: Zip64 EOCDR locator reports {} disks",
                locator.disks
            )));
        }

        // Search for the zip64 EOCDR, from its nominal starting position
        // to the locator.
        let search_start = usize(locator.zip64_eocdr_offset)?;
        let search_space = mapping.get(search_start..locator_posit).ok_or(
            ArchiveError::InvalidZip("Invalid Zip64 End Of Central Directory Record offset"),
        )?;
        let zip64_eocdr_posit = find_zip64_eocdr(search_space)?;
        // Since we're searching starting at the provided offset,
        // the returned position is the archive offset.
        archive_offset = zip64_eocdr_posit;
        let zip64_eocdr = Zip64EndOfCentralDirectory::parse(&search_space[zip64_eocdr_posit..])?;
        trace!("{:?}", zip64_eocdr);

        if zip64_eocdr.disk_number != zip64_eocdr.disk_with_central_directory
            || zip64_eocdr.entries != zip64_eocdr.entries_on_this_disk
        {
            return Err(ArchiveError::UnsupportedZip(String::from(
                "No support for multi-disk Zip64 archives",
            )));
        }
        nominal_central_directory_offset = usize(zip64_eocdr.central_directory_offset)?;
        entry_count = zip64_eocdr.entries;
    } else {
        // The offset is the actual position versus the stored one.
        nominal_central_directory_offset = usize(eocdr.central_directory_offset)?;
        archive_offset = eocdr_posit
            .checked_sub(usize(eocdr.central_directory_size)?)
            .and_then(|actual| actual.checked_sub(nominal_central_directory_offset))
            .ok_or(ArchiveError::InvalidZip(
                "Invalid central directory size or offset",
            ))?;
        entry_count = eocdr.entries as u64;
    }

    trace!(
        "{} entries at nominal offset {} (archive offset {})",
        entry_count,
        nominal_central_directory_offset,
        archive_offset
    );

    let mut central_directory = archive_offset
        .checked_add(nominal_central_directory_offset)
        .and_then(|start| mapping.get(start..))
        .ok_or(ArchiveError::InvalidZip(
            "Central directory lies outside the file",
        ))?;

    // Don't trust the count to size an allocation.
    let plausible = central_directory.len() / CENTRAL_DIRECTORY_ENTRY_SIZE;
    let mut entries = Vec::with_capacity(usize(entry_count)?.min(plausible));

    for _ in 0..entry_count {
        let cde = CentralDirectoryEntry::parse_and_consume(&mut central_directory)?;
        trace!("{:?}", cde);
        entries.push(ZipEntry::from_cde(&cde)?);
    }

    Ok(entries)
}
