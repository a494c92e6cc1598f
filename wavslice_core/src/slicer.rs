//! Orchestration of a slicing run.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::Serialize;

use crate::container::Metadata;
use crate::header::materialize;
use crate::planner::{plan, ChunkWindow};
use crate::sink::{dispatch, Collaborators, FsWriter, LameEncoder, OutputKind};
use crate::{Config, SliceError};

const INPUT_EXTENSION: &str = "wav";

/// Derives output paths from a chunk index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkNaming {
    dir: PathBuf,
    stem: String,
}

impl ChunkNaming {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(dir: P, stem: S) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
        }
    }

    /// Name chunks after `input`, placing them in `output_dir` or, when unset,
    /// in a sibling directory named after the input's stem.
    pub fn for_input(input: &Path, output_dir: Option<&Path>) -> Result<Self, SliceError> {
        let stem = input
            .file_stem()
            .and_then(OsStr::to_str)
            .filter(|stem| !stem.is_empty())
            .ok_or(SliceError::InvalidInputName)?;
        let dir = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => input
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(stem),
        };
        Ok(Self::new(dir, stem))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{index}-{stem}.{extension}` inside the output directory.
    pub fn path_for(&self, index: usize, extension: &str) -> PathBuf {
        self.dir.join(format!("{index}-{}.{extension}", self.stem))
    }
}

/// Descriptor of one produced chunk.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub path: PathBuf,
    /// Nominal start in seconds.
    pub start: f64,
    /// Nominal duration in seconds.
    pub duration: f64,
    /// Seconds of audio included before `start`.
    pub overlap_start: f64,
    /// Seconds of audio included after `start + duration`.
    pub overlap_end: f64,
}

impl ManifestEntry {
    fn new(path: PathBuf, window: &ChunkWindow) -> Self {
        Self {
            path,
            start: window.nominal_start.as_secs_f64(),
            duration: window.nominal_duration.as_secs_f64(),
            overlap_start: window.applied_overlap_start,
            overlap_end: window.applied_overlap_end,
        }
    }
}

/// Result of a run: where chunks went and what each one covers.
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    pub output: OutputKind,
    /// Entries in planning order.
    pub entries: Vec<ManifestEntry>,
}

/// A chunk that a run would produce, as reported by [`plan_file`].
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedChunk {
    pub path: PathBuf,
    pub window: ChunkWindow,
}

/// Progress notifications emitted during a run.
#[derive(Clone, Copy, Debug)]
pub enum ProgressEvent<'a> {
    Start {
        chunks: usize,
        total_duration: Duration,
    },
    /// Chunks complete in no particular order.
    ChunkDone {
        index: usize,
        path: &'a Path,
    },
    Finish,
}

struct Prepared {
    metadata: Metadata,
    output: OutputKind,
    windows: Vec<ChunkWindow>,
    total_duration: Duration,
}

fn prepare(buffer: &[u8], config: &Config) -> Result<Prepared, SliceError> {
    let metadata = Metadata::from_buffer(buffer)?;
    let output = OutputKind::select(config.compress, metadata.channels, config.bitrate);

    let plan = plan(&metadata, config.chunk_duration, config.overlap)?;
    let total_duration = plan.total_duration();
    // Every window is planned before anything is submitted, so a range error
    // leaves no partial output behind.
    let windows = plan.collect::<Result<Vec<_>, _>>()?;

    info!(
        "planned {} chunk(s) over {:.3}s of {}-channel {} Hz audio ({:?})",
        windows.len(),
        total_duration.as_secs_f64(),
        metadata.channels,
        metadata.sample_rate,
        output
    );

    Ok(Prepared {
        metadata,
        output,
        windows,
        total_duration,
    })
}

fn execute<F>(
    buffer: &[u8],
    prepared: &Prepared,
    config: &Config,
    naming: &ChunkNaming,
    collaborators: Collaborators<'_>,
    progress: &F,
) -> Result<Manifest, SliceError>
where
    F: Fn(ProgressEvent<'_>) + Sync,
{
    let Prepared {
        metadata,
        output,
        windows,
        total_duration,
    } = prepared;

    progress(ProgressEvent::Start {
        chunks: windows.len(),
        total_duration: *total_duration,
    });

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.threads.get())
        .build()?;

    // Collecting into a Result joins every submission and stops handing out
    // windows after the first failure.
    let entries = pool.install(|| {
        windows
            .par_iter()
            .map(|window| {
                let path = naming.path_for(window.index, output.extension());
                let chunk = materialize(
                    metadata,
                    buffer,
                    window.byte_start,
                    window.byte_end,
                    config.header_mode,
                )?;
                dispatch(*output, collaborators, &path, &chunk).map_err(|source| {
                    SliceError::Sink {
                        path: path.clone(),
                        source,
                    }
                })?;
                debug!(
                    "chunk {} ({} payload bytes) -> '{}'",
                    window.index,
                    window.len(),
                    path.display()
                );
                progress(ProgressEvent::ChunkDone {
                    index: window.index,
                    path: &path,
                });
                Ok(ManifestEntry::new(path, window))
            })
            .collect::<Result<Vec<_>, SliceError>>()
    })?;

    progress(ProgressEvent::Finish);
    info!("produced {} chunk(s)", entries.len());

    Ok(Manifest {
        output: *output,
        entries,
    })
}

/// Slice an in-memory container, handing every chunk to `collaborators`.
///
/// Performs no I/O itself; naming only decides the path each chunk is
/// submitted under.
pub fn slice<F>(
    buffer: &[u8],
    config: &Config,
    naming: &ChunkNaming,
    collaborators: Collaborators<'_>,
    progress: F,
) -> Result<Manifest, SliceError>
where
    F: Fn(ProgressEvent<'_>) + Sync,
{
    let prepared = prepare(buffer, config)?;
    execute(buffer, &prepared, config, naming, collaborators, &progress)
}

/// Slice the file at `input` into the configured output directory.
pub fn split_file(input: &Path, config: &Config) -> Result<Manifest, SliceError> {
    split_file_with_progress(input, config, |_| {})
}

/// Same as [`split_file`], reporting progress through `progress`.
pub fn split_file_with_progress<F>(
    input: &Path,
    config: &Config,
    progress: F,
) -> Result<Manifest, SliceError>
where
    F: Fn(ProgressEvent<'_>) + Sync,
{
    check_extension(input)?;
    let naming = ChunkNaming::for_input(input, config.output_dir.as_deref())?;

    let buffer = fs::read(input)?;
    let prepared = prepare(&buffer, config)?;

    fs::create_dir_all(naming.dir())?;
    if !config.overwrite {
        for window in &prepared.windows {
            let path = naming.path_for(window.index, prepared.output.extension());
            if path.exists() {
                return Err(SliceError::OutputExists(path));
            }
        }
    }

    info!(
        "slicing '{}' into '{}'",
        input.display(),
        naming.dir().display()
    );

    let encoder = LameEncoder::new(&config.encoder_program);
    let collaborators = Collaborators {
        encoder: &encoder,
        writer: &FsWriter,
    };
    execute(
        &buffer,
        &prepared,
        config,
        &naming,
        collaborators,
        &progress,
    )
}

/// Report the chunks [`split_file`] would produce without writing anything.
pub fn plan_file(input: &Path, config: &Config) -> Result<Vec<PlannedChunk>, SliceError> {
    check_extension(input)?;
    let naming = ChunkNaming::for_input(input, config.output_dir.as_deref())?;
    let buffer = fs::read(input)?;
    let prepared = prepare(&buffer, config)?;
    let extension = prepared.output.extension();

    Ok(prepared
        .windows
        .into_iter()
        .map(|window| PlannedChunk {
            path: naming.path_for(window.index, extension),
            window,
        })
        .collect())
}

fn check_extension(input: &Path) -> Result<(), SliceError> {
    let supported = input
        .extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case(INPUT_EXTENSION));
    if supported {
        Ok(())
    } else {
        Err(SliceError::UnsupportedExtension(input.to_path_buf()))
    }
}
