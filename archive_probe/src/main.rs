use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use log::*;
use structopt::*;

use archtree::job::*;
use archtree::json;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "archive_probe",
    about = "Describes the contents of a zip or tar archive as JSON"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Prints the archive's structure
    Show {
        /// List every entry instead of nesting them in a tree
        #[structopt(short, long)]
        flatten: bool,

        /// Indent the output
        #[structopt(short, long)]
        pretty: bool,

        /// Write to the given file instead of stdout
        #[structopt(short, long)]
        output: Option<PathBuf>,

        #[structopt(name("archive"))]
        archive: PathBuf,
    },
    /// Runs the structure job, storing results in a local directory
    Job {
        #[structopt(long)]
        job_id: String,

        /// Root directory of the object store
        #[structopt(long)]
        store: Utf8PathBuf,

        #[structopt(long, default_value = "default")]
        bucket: String,

        /// Key prefix for the uploaded structure
        #[structopt(long, default_value = "")]
        storage_directory: String,

        /// Where to write the structure before uploading it
        #[structopt(long)]
        scratch_dir: Option<Utf8PathBuf>,

        /// Where published outputs go
        #[structopt(name("outputs"))]
        outputs: Utf8PathBuf,

        #[structopt(name("archive"))]
        archive: Utf8PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    match args.command {
        Command::Show {
            flatten,
            pretty,
            output,
            archive,
        } => {
            let structure = archtree::extract(&archive, flatten)
                .with_context(|| format!("Couldn't read {}", archive.display()))?;
            info!("{} top-level nodes", structure.len());
            match output {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("Couldn't create {}", path.display()))?;
                    write_structure(BufWriter::new(file), &structure, pretty)
                }
                None => write_structure(io::stdout().lock(), &structure, pretty),
            }
        }
        Command::Job {
            job_id,
            store,
            bucket,
            storage_directory,
            scratch_dir,
            outputs,
            archive,
        } => {
            let scratch_dir = scratch_dir.unwrap_or_else(|| outputs.clone());
            for dir in [&scratch_dir, &outputs] {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Couldn't create directory {}", dir))?;
            }
            let settings = JobSettings {
                job_id,
                storage_directory,
                scratch_dir,
            };
            let mut job = StructureJob::new(
                settings,
                DirectoryStore::new(store, bucket),
                JsonFilePublisher::new(outputs),
            );
            let output = job
                .run(&archive)
                .with_context(|| format!("Structure job failed on {}", archive))?;
            info!(
                "Stored {} bytes at {}/{}",
                output.asset.size, output.asset.bucket, output.asset.key
            );
            Ok(())
        }
    }
}

fn write_structure<W: Write>(
    mut sink: W,
    structure: &[archtree::TreeNode],
    pretty: bool,
) -> Result<()> {
    json::to_writer(&mut sink, structure, pretty).context("Couldn't write JSON")?;
    writeln!(sink)?;
    sink.flush()?;
    Ok(())
}
