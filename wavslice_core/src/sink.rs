//! Destinations for materialized chunks.
//!
//! A run routes every chunk to the same destination, chosen once as an
//! [`OutputKind`] and consumed by [`dispatch`].

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use log::debug;
use thiserror::Error;

/// Errors reported by a sink while producing one chunk.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The encoder process could not be started.
    #[error("failed to launch encoder '{program}'")]
    EncoderLaunch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The encoder process exited unsuccessfully.
    #[error("encoder exited with {status}: {stderr}")]
    EncoderFailed { status: String, stderr: String },
}

/// Lossy encoder collaborator.
pub trait Encoder: Sync {
    /// Encode a standalone WAV container at `bitrate` kbit/s into `dest`.
    fn encode(&self, wav: &[u8], bitrate: u32, dest: &Path) -> Result<(), SinkError>;
}

/// Raw writer collaborator.
pub trait RawWriter: Sync {
    fn write(&self, dest: &Path, bytes: &[u8]) -> Result<(), SinkError>;
}

/// Where every chunk of a run goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    /// Routed to the encoder at the given bitrate (kbit/s).
    Compressed { bitrate: u32 },
    /// Written out as WAV containers.
    Raw,
}

impl OutputKind {
    /// The encoder only handles mono and stereo input; anything wider is
    /// always written raw.
    pub fn select(compress: bool, channels: u16, bitrate: u32) -> Self {
        if compress && channels <= 2 {
            OutputKind::Compressed { bitrate }
        } else {
            OutputKind::Raw
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputKind::Compressed { .. } => "mp3",
            OutputKind::Raw => "wav",
        }
    }
}

/// The pair of collaborators a run can route to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub encoder: &'a dyn Encoder,
    pub writer: &'a dyn RawWriter,
}

/// Hand one materialized chunk to the collaborator selected by `kind`.
pub fn dispatch(
    kind: OutputKind,
    collaborators: Collaborators<'_>,
    dest: &Path,
    chunk: &[u8],
) -> Result<(), SinkError> {
    match kind {
        OutputKind::Compressed { bitrate } => collaborators.encoder.encode(chunk, bitrate, dest),
        OutputKind::Raw => collaborators.writer.write(dest, chunk),
    }
}

/// Writes chunks to the filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsWriter;

impl RawWriter for FsWriter {
    fn write(&self, dest: &Path, bytes: &[u8]) -> Result<(), SinkError> {
        fs::write(dest, bytes)?;
        debug!("wrote {} bytes to '{}'", bytes.len(), dest.display());
        Ok(())
    }
}

/// Encodes chunks by piping them through the `lame` command-line encoder.
#[derive(Clone, Debug)]
pub struct LameEncoder {
    program: PathBuf,
}

impl LameEncoder {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for LameEncoder {
    fn default() -> Self {
        Self::new("lame")
    }
}

impl Encoder for LameEncoder {
    fn encode(&self, wav: &[u8], bitrate: u32, dest: &Path) -> Result<(), SinkError> {
        let mut child = Command::new(&self.program)
            .arg("--quiet")
            .arg("-b")
            .arg(bitrate.to_string())
            .arg("-")
            .arg(dest)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SinkError::EncoderLaunch {
                program: self.program.clone(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "encoder stdin unavailable"))?;

        // stdin is fed while stdout and stderr are drained.
        let (output, fed) = thread::scope(|scope| {
            let feeder = scope.spawn(move || stdin.write_all(wav));
            let output = child.wait_with_output();
            let fed = feeder
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("encoder feeder panicked")));
            output.map(|output| (output, fed))
        })?;

        if !output.status.success() {
            return Err(SinkError::EncoderFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        fed?;

        debug!(
            "encoded {} bytes at {bitrate} kbit/s into '{}'",
            wav.len(),
            dest.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(&'static str, PathBuf, usize)>>,
    }

    impl Encoder for Recorder {
        fn encode(&self, wav: &[u8], _bitrate: u32, dest: &Path) -> Result<(), SinkError> {
            self.calls
                .lock()
                .unwrap()
                .push(("encode", dest.to_path_buf(), wav.len()));
            Ok(())
        }
    }

    impl RawWriter for Recorder {
        fn write(&self, dest: &Path, bytes: &[u8]) -> Result<(), SinkError> {
            self.calls
                .lock()
                .unwrap()
                .push(("write", dest.to_path_buf(), bytes.len()));
            Ok(())
        }
    }

    #[test]
    fn select_routes_wide_sources_to_raw() {
        assert_eq!(
            OutputKind::select(true, 1, 128),
            OutputKind::Compressed { bitrate: 128 }
        );
        assert_eq!(
            OutputKind::select(true, 2, 96),
            OutputKind::Compressed { bitrate: 96 }
        );
        assert_eq!(OutputKind::select(true, 4, 128), OutputKind::Raw);
        assert_eq!(OutputKind::select(false, 1, 128), OutputKind::Raw);
    }

    #[test]
    fn dispatch_uses_the_selected_collaborator() {
        let recorder = Recorder::default();
        let collaborators = Collaborators {
            encoder: &recorder,
            writer: &recorder,
        };
        dispatch(
            OutputKind::Compressed { bitrate: 128 },
            collaborators,
            Path::new("0-a.mp3"),
            &[0; 3],
        )
        .unwrap();
        dispatch(OutputKind::Raw, collaborators, Path::new("1-a.wav"), &[0; 5]).unwrap();

        let calls = recorder.calls.into_inner().unwrap();
        assert_eq!(
            calls,
            [
                ("encode", PathBuf::from("0-a.mp3"), 3),
                ("write", PathBuf::from("1-a.wav"), 5),
            ]
        );
    }

    #[test]
    fn fs_writer_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk.wav");
        FsWriter.write(&path, b"RIFF").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"RIFF");
    }

    #[test]
    fn missing_encoder_reports_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = LameEncoder::new(dir.path().join("no-such-encoder"));
        let err = encoder
            .encode(b"RIFF", 128, &dir.path().join("out.mp3"))
            .unwrap_err();
        assert!(matches!(err, SinkError::EncoderLaunch { .. }));
    }
}
