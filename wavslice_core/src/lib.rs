//! Frame-aligned slicing of PCM WAV containers.
//!
//! The pipeline is: parse the container once ([`Metadata::from_buffer`]), plan
//! time-bounded windows over the payload ([`plan`]), rebuild every window as a
//! standalone container ([`materialize`]) and hand it to a sink (an external
//! MP3 encoder or a raw writer). The returned [`Manifest`] describes every
//! produced chunk together with the overlap that was actually applied.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

mod container;
mod header;
mod planner;
mod sink;
mod slicer;

pub use container::{parse, ChunkDescriptor, ChunkTable, Metadata, DATA_TAG, FMT_TAG, RIFF_TAG};
pub use header::{materialize, HeaderMode, CANONICAL_HEADER_LEN};
pub use planner::{plan, ChunkPlan, ChunkWindow};
pub use sink::{
    dispatch, Collaborators, Encoder, FsWriter, LameEncoder, OutputKind, RawWriter, SinkError,
};
pub use slicer::{
    plan_file, slice, split_file, split_file_with_progress, ChunkNaming, Manifest, ManifestEntry,
    PlannedChunk, ProgressEvent,
};

/// Default length of every chunk.
pub const DEFAULT_CHUNK_DURATION: Duration = Duration::from_secs(4);

/// Default MP3 bitrate in kbit/s.
pub const DEFAULT_BITRATE: u32 = 128;

/// Errors that can occur while slicing a container.
#[derive(Debug, Error)]
pub enum SliceError {
    /// The input path does not carry the `.wav` extension.
    #[error("only .wav inputs are supported: '{0}'")]
    UnsupportedExtension(PathBuf),

    /// A chunk header or payload runs past the end of the buffer.
    #[error("container truncated inside chunk '{tag}' at offset {offset}")]
    Truncated { tag: String, offset: usize },

    /// A chunk the container cannot do without is absent.
    #[error("missing required chunk '{0}'")]
    MissingChunk(&'static str),

    /// The payload is not linear PCM.
    #[error("unsupported audio format code {0:#06x}; only linear PCM is supported")]
    UnsupportedEncoding(u16),

    /// The format chunk describes something that cannot be sliced.
    #[error("malformed container: {0}")]
    Malformed(&'static str),

    /// A byte range reaches past the end of the payload.
    #[error("fetched index beyond payload end: {end} > {limit}")]
    PayloadOverrun { end: usize, limit: usize },

    /// A byte range does not start or end on a frame boundary.
    #[error("byte range {start}..{end} is not aligned to {stride}-byte frames")]
    Misaligned {
        start: usize,
        end: usize,
        stride: usize,
    },

    /// The chunk duration is zero or shorter than a single frame.
    #[error("chunk duration must cover at least one sample frame")]
    InvalidChunkDuration,

    /// Error produced when a file name cannot be derived from the input path.
    #[error("failed to derive a base name for the input file")]
    InvalidInputName,

    /// An output file would be overwritten without permission.
    #[error("output file already exists: {0}")]
    OutputExists(PathBuf),

    /// A sink failed to encode or write a chunk.
    #[error("failed to produce chunk '{path}'")]
    Sink {
        path: PathBuf,
        #[source]
        source: SinkError,
    },

    /// The worker pool used for sink submissions could not be created.
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Wrapper around IO errors encountered while reading or writing files.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration for a slicing run.
#[derive(Clone, Debug)]
pub struct Config {
    /// Nominal length of every chunk; the last one may be shorter.
    pub chunk_duration: Duration,
    /// Extra audio included on each side of an interior chunk boundary.
    pub overlap: Duration,
    /// Route chunks to the MP3 encoder when the source has at most two channels.
    pub compress: bool,
    /// How every chunk's container header is produced.
    pub header_mode: HeaderMode,
    /// Encoder bitrate in kbit/s.
    pub bitrate: u32,
    /// Number of concurrent sink submissions.
    pub threads: NonZeroUsize,
    /// Allow replacing files that already exist in the output directory.
    pub overwrite: bool,
    /// Destination directory; defaults to a sibling directory named after the input.
    pub output_dir: Option<PathBuf>,
    /// Program invoked for MP3 encoding.
    pub encoder_program: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_duration: DEFAULT_CHUNK_DURATION,
            overlap: Duration::ZERO,
            compress: true,
            header_mode: HeaderMode::Synthesize,
            bitrate: DEFAULT_BITRATE,
            threads: default_threads(),
            overwrite: false,
            output_dir: None,
            encoder_program: PathBuf::from("lame"),
        }
    }
}

impl Config {
    /// Start building a [`Config`] with the given chunk duration.
    pub fn builder(chunk_duration: Duration) -> ConfigBuilder {
        ConfigBuilder {
            config: Config {
                chunk_duration,
                ..Config::default()
            },
        }
    }
}

/// Builder for [`Config`].
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn overlap(mut self, overlap: Duration) -> Self {
        self.config.overlap = overlap;
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.config.compress = compress;
        self
    }

    /// Synthesize a canonical header (`true`) or patch the original one (`false`).
    pub fn generate_canonical_header(mut self, generate: bool) -> Self {
        self.config.header_mode = if generate {
            HeaderMode::Synthesize
        } else {
            HeaderMode::Patch
        };
        self
    }

    pub fn bitrate(mut self, kbps: u32) -> Self {
        self.config.bitrate = kbps;
        self
    }

    pub fn threads(mut self, threads: NonZeroUsize) -> Self {
        self.config.threads = threads;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.config.overwrite = overwrite;
        self
    }

    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn encoder_program<P: Into<PathBuf>>(mut self, program: P) -> Self {
        self.config.encoder_program = program.into();
        self
    }

    /// Validate and return the finished [`Config`].
    pub fn build(self) -> Result<Config, SliceError> {
        if self.config.chunk_duration.is_zero() {
            return Err(SliceError::InvalidChunkDuration);
        }
        if self.config.bitrate == 0 {
            return Err(SliceError::Malformed("encoder bitrate must be non-zero"));
        }
        Ok(self.config)
    }
}

fn default_threads() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}
