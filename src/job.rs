//! The structure job: describe an archive, store the description,
//! and announce where it went.
//!
//! Storage and job bookkeeping belong to whatever runs us,
//! so they're reached through the [`ObjectStore`] and [`OutputPublisher`] traits.
//! [`DirectoryStore`] and [`JsonFilePublisher`] implement them on the local filesystem.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use log::*;
use serde::{Deserialize, Serialize};

use crate::json;
use crate::result::*;

/// The name the asset description is published under
pub const ASSET_INFO: &str = "asset_info";

/// Durable storage for job results
pub trait ObjectStore {
    /// The bucket uploads land in
    fn bucket(&self) -> &str;

    /// Stores the local file at `local` under `key`.
    fn upload(&self, local: &Utf8Path, key: &str) -> ArchiveResult<()>;

    /// Returns the size in bytes of the object stored under `key`.
    fn object_size(&self, key: &str) -> ArchiveResult<u64>;
}

/// Receives a job's named outputs
pub trait OutputPublisher {
    fn publish(&mut self, name: &str, asset: &AssetInfo) -> ArchiveResult<()>;
}

/// Where a job's result lives, and what it is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub bucket: String,
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
}

/// Per-run settings, handed to the job explicitly.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Identifies this run; prefixes the output file name.
    pub job_id: String,
    /// Key prefix for uploaded results
    pub storage_directory: String,
    /// Local directory for files we write before uploading them
    pub scratch_dir: Utf8PathBuf,
}

/// What a successful run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    pub payload_path: Utf8PathBuf,
    pub payload_key: String,
    pub asset: AssetInfo,
}

pub struct StructureJob<S, P> {
    settings: JobSettings,
    store: S,
    publisher: P,
}

impl<S: ObjectStore, P: OutputPublisher> StructureJob<S, P> {
    pub fn new(settings: JobSettings, store: S, publisher: P) -> Self {
        Self {
            settings,
            store,
            publisher,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Writes the flattened structure of `archive` to the scratch directory,
    /// uploads it, and publishes an [`AssetInfo`] describing the upload.
    pub fn run(&mut self, archive: &Utf8Path) -> ArchiveResult<JobOutput> {
        let output_name = format!(
            "{}-{}.json",
            self.settings.job_id,
            archive.file_name().unwrap_or(archive.as_str())
        );
        let payload_key = storage_key(&self.settings.storage_directory, &output_name);
        let payload_path = self.settings.scratch_dir.join(&output_name);

        info!("Writing out local payload {}", payload_path);
        let structure = crate::extract(archive, true)?;
        let mut payload = BufWriter::new(File::create(&payload_path)?);
        json::to_writer(&mut payload, &structure, false)?;
        payload.flush()?;
        drop(payload);

        info!("Uploading payload to {}", payload_key);
        self.store.upload(&payload_path, &payload_key)?;

        let size = self.store.object_size(&payload_key)?;
        info!("{}: size in bytes: {}", payload_key, size);

        let asset = AssetInfo {
            bucket: self.store.bucket().to_owned(),
            key: payload_key.clone(),
            kind: String::from("view"),
            size,
        };
        info!("Publishing {}", ASSET_INFO);
        self.publisher.publish(ASSET_INFO, &asset)?;

        Ok(JobOutput {
            payload_path,
            payload_key,
            asset,
        })
    }
}

/// Joins a key prefix and a name the way object stores expect: with one `/`.
fn storage_key(directory: &str, name: &str) -> String {
    let directory = directory.trim_end_matches('/');
    if directory.is_empty() {
        name.to_owned()
    } else {
        format!("{directory}/{name}")
    }
}

/// An [`ObjectStore`] backed by a local directory,
/// with each bucket a subdirectory of `root`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: Utf8PathBuf,
    bucket: String,
}

impl DirectoryStore {
    pub fn new<R: Into<Utf8PathBuf>, B: Into<String>>(root: R, bucket: B) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    /// Where the object under `key` lives on disk
    pub fn object_path(&self, key: &str) -> Utf8PathBuf {
        self.root.join(&self.bucket).join(key)
    }
}

impl ObjectStore for DirectoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn upload(&self, local: &Utf8Path, key: &str) -> ArchiveResult<()> {
        let destination = self.object_path(key);
        debug!("Copying {} to {}", local, destination);
        let copy = || -> io::Result<()> {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(local, &destination)?;
            Ok(())
        };
        copy().map_err(|source| ArchiveError::Upload {
            key: key.to_owned(),
            source,
        })
    }

    fn object_size(&self, key: &str) -> ArchiveResult<u64> {
        match fs::metadata(self.object_path(key)) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ArchiveError::MissingObject(key.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// An [`OutputPublisher`] that writes each output to `<name>.json` in a directory
#[derive(Debug, Clone)]
pub struct JsonFilePublisher {
    directory: Utf8PathBuf,
}

impl JsonFilePublisher {
    pub fn new<D: Into<Utf8PathBuf>>(directory: D) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn output_path(&self, name: &str) -> Utf8PathBuf {
        self.directory.join(format!("{name}.json"))
    }
}

impl OutputPublisher for JsonFilePublisher {
    fn publish(&mut self, name: &str, asset: &AssetInfo) -> ArchiveResult<()> {
        let path = self.output_path(name);
        debug!("Writing {} to {}", name, path);
        let mut out = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut out, asset)?;
        out.flush()?;
        Ok(())
    }
}
