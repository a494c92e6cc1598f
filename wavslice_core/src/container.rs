//! RIFF/WAVE container parsing.
//!
//! The parser walks tagged chunks from the start of the buffer and records
//! where each payload lives. Only the `fmt ` and
//! `data` chunks are interpreted; everything else is carried along verbatim.

use std::borrow::Cow;
use std::ops::Range;

use log::warn;

use crate::SliceError;

pub const RIFF_TAG: [u8; 4] = *b"RIFF";
pub const FMT_TAG: [u8; 4] = *b"fmt ";
pub const DATA_TAG: [u8; 4] = *b"data";

const TAG_LEN: usize = 4;
const CHUNK_HEADER_LEN: usize = 8;
const RIFF_HEADER_LEN: usize = 12;
const MIN_FMT_LEN: usize = 16;

const FORMAT_PCM: u16 = 0x0001;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;
// Offset of the sub-format GUID inside an extensible format chunk.
const EXTENSIBLE_SUBFORMAT_OFFSET: usize = 24;

/// Location of one tagged chunk inside the container buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub tag: [u8; 4],
    /// Offset of the first payload byte, right after the 8-byte chunk header.
    pub payload_start: usize,
    pub payload_length: usize,
}

impl ChunkDescriptor {
    pub fn tag_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.tag)
    }

    pub fn payload_range(&self) -> Range<usize> {
        self.payload_start..self.payload_start + self.payload_length
    }

    /// Header and payload, as laid out in the buffer.
    pub fn span(&self) -> Range<usize> {
        self.payload_start - CHUNK_HEADER_LEN..self.payload_start + self.payload_length
    }
}

/// Chunks in the order they were first seen, keyed by tag.
///
/// A repeated tag replaces the position data of the earlier entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkTable {
    entries: Vec<ChunkDescriptor>,
}

impl ChunkTable {
    fn insert(&mut self, descriptor: ChunkDescriptor) {
        match self.entries.iter_mut().find(|d| d.tag == descriptor.tag) {
            Some(existing) => *existing = descriptor,
            None => self.entries.push(descriptor),
        }
    }

    pub fn get(&self, tag: &[u8; 4]) -> Option<&ChunkDescriptor> {
        self.entries.iter().find(|d| &d.tag == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Walk the buffer and record every tagged chunk.
///
/// The master `RIFF` chunk is registered as a fixed 12-byte record whose
/// payload is the 4-byte form id. Scanning stops once fewer than four bytes
/// remain.
pub fn parse(buffer: &[u8]) -> Result<ChunkTable, SliceError> {
    let mut table = ChunkTable::default();
    let mut offset = 0usize;

    while buffer.len() - offset >= TAG_LEN {
        let tag = read_tag(buffer, offset);
        let truncated = || SliceError::Truncated {
            tag: String::from_utf8_lossy(&tag).into_owned(),
            offset,
        };

        if tag == RIFF_TAG {
            if buffer.len() - offset < RIFF_HEADER_LEN {
                return Err(truncated());
            }
            table.insert(ChunkDescriptor {
                tag,
                payload_start: offset + CHUNK_HEADER_LEN,
                payload_length: TAG_LEN,
            });
            offset += RIFF_HEADER_LEN;
            continue;
        }

        let length = read_u32(buffer, offset + TAG_LEN).ok_or_else(truncated)? as usize;
        let payload_start = offset + CHUNK_HEADER_LEN;
        let payload_end = payload_start
            .checked_add(length)
            .filter(|end| *end <= buffer.len())
            .ok_or_else(truncated)?;

        table.insert(ChunkDescriptor {
            tag,
            payload_start,
            payload_length: length,
        });
        offset = payload_end;
    }

    Ok(table)
}

/// Everything the planner and header rewriter need to know about a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    /// Offset of the first payload byte.
    pub data_start: usize,
    /// Payload length in bytes, a whole number of frames.
    pub data_length: usize,
    pub channels: u16,
    pub sample_rate: u32,
    /// `sample_rate × frame_alignment`.
    pub bytes_per_second: u64,
    /// Byte width of one frame: `channels × ceil(bits_per_sample / 8)`.
    pub frame_alignment: usize,
    pub bits_per_sample: u16,
    /// Block-align field exactly as stored in the format chunk.
    pub block_align: u16,
    /// Format code exactly as stored in the format chunk.
    pub audio_format: u16,
    pub chunks: ChunkTable,
}

impl Metadata {
    /// Parse `buffer` and decode its format chunk.
    pub fn from_buffer(buffer: &[u8]) -> Result<Self, SliceError> {
        let chunks = parse(buffer)?;
        Self::from_chunks(buffer, chunks)
    }

    fn from_chunks(buffer: &[u8], chunks: ChunkTable) -> Result<Self, SliceError> {
        let fmt = *chunks
            .get(&FMT_TAG)
            .ok_or(SliceError::MissingChunk("fmt "))?;
        let data = *chunks
            .get(&DATA_TAG)
            .ok_or(SliceError::MissingChunk("data"))?;

        if fmt.payload_length < MIN_FMT_LEN {
            return Err(SliceError::Truncated {
                tag: fmt.tag_str().into_owned(),
                offset: fmt.payload_start - CHUNK_HEADER_LEN,
            });
        }

        let base = fmt.payload_start;
        let field16 = |at: usize| read_u16(buffer, base + at).unwrap_or_default();
        let field32 = |at: usize| read_u32(buffer, base + at).unwrap_or_default();

        let audio_format = field16(0);
        let channels = field16(2);
        let sample_rate = field32(4);
        let header_byte_rate = field32(8);
        let block_align = field16(12);
        let bits_per_sample = field16(14);

        if !is_linear_pcm(buffer, &fmt, audio_format) {
            return Err(SliceError::UnsupportedEncoding(audio_format));
        }
        if channels == 0 {
            return Err(SliceError::Malformed("format chunk declares zero channels"));
        }
        if sample_rate == 0 {
            return Err(SliceError::Malformed("format chunk declares a zero sample rate"));
        }
        if bits_per_sample == 0 {
            return Err(SliceError::Malformed("format chunk declares zero bits per sample"));
        }

        let bytes_per_sample = usize::from(bits_per_sample).div_ceil(8);
        let frame_alignment = usize::from(channels) * bytes_per_sample;
        let bytes_per_second = u64::from(sample_rate) * frame_alignment as u64;

        if u64::from(header_byte_rate) != bytes_per_second {
            warn!(
                "byte rate field {header_byte_rate} disagrees with computed {bytes_per_second}; using computed value"
            );
        }
        if usize::from(block_align) != frame_alignment {
            warn!(
                "block align field {block_align} disagrees with computed frame size {frame_alignment}; using computed value"
            );
        }

        let remainder = data.payload_length % frame_alignment;
        if remainder != 0 {
            warn!("payload ends with a partial frame; ignoring the trailing {remainder} byte(s)");
        }

        Ok(Self {
            data_start: data.payload_start,
            data_length: data.payload_length - remainder,
            channels,
            sample_rate,
            bytes_per_second,
            frame_alignment,
            bits_per_sample,
            block_align,
            audio_format,
            chunks,
        })
    }

    /// One past the last payload byte considered for slicing.
    pub fn data_end(&self) -> usize {
        self.data_start + self.data_length
    }

    /// Payload bytes of `buffer`.
    pub fn payload<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.data_start..self.data_end()]
    }

    pub fn frame_count(&self) -> usize {
        self.data_length / self.frame_alignment
    }
}

fn is_linear_pcm(buffer: &[u8], fmt: &ChunkDescriptor, audio_format: u16) -> bool {
    match audio_format {
        FORMAT_PCM => true,
        FORMAT_EXTENSIBLE => {
            fmt.payload_length >= EXTENSIBLE_SUBFORMAT_OFFSET + 2
                && read_u16(buffer, fmt.payload_start + EXTENSIBLE_SUBFORMAT_OFFSET)
                    == Some(FORMAT_PCM)
        }
        _ => false,
    }
}

fn read_tag(buffer: &[u8], offset: usize) -> [u8; 4] {
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&buffer[offset..offset + TAG_LEN]);
    tag
}

pub(crate) fn read_u16(buffer: &[u8], offset: usize) -> Option<u16> {
    let bytes = buffer.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(buffer: &[u8], offset: usize) -> Option<u32> {
    let bytes = buffer.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
