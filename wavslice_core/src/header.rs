//! Rebuilding a byte range of the payload as a standalone container.

use crate::container::{Metadata, DATA_TAG, FMT_TAG, RIFF_TAG};
use crate::SliceError;

/// Size of the canonical RIFF/WAVE header written in [`HeaderMode::Synthesize`].
pub const CANONICAL_HEADER_LEN: usize = 44;

const FORMAT_PCM: u16 = 0x0001;
const RIFF_SIZE_OFFSET: usize = 4;
const LENGTH_FIELD_LEN: usize = 4;

/// How the container around a payload slice is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderMode {
    /// Reuse the original bytes before and after the payload, patching the
    /// `data` length field and the RIFF size.
    Patch,
    /// Emit a canonical 44-byte header, then the payload, then every
    /// non-core chunk of the original container.
    Synthesize,
}

/// Produce a standalone container holding exactly `buffer[byte_start..byte_end]`
/// as its payload.
pub fn materialize(
    metadata: &Metadata,
    buffer: &[u8],
    byte_start: usize,
    byte_end: usize,
    mode: HeaderMode,
) -> Result<Vec<u8>, SliceError> {
    check_range(metadata, byte_start, byte_end)?;
    let payload = &buffer[byte_start..byte_end];
    let payload_len = u32_len(payload.len())?;

    let mut out = match mode {
        HeaderMode::Patch => patched(metadata, buffer, payload, payload_len)?,
        HeaderMode::Synthesize => synthesized(metadata, buffer, payload, payload_len)?,
    };

    if out.starts_with(&RIFF_TAG) {
        let riff_size = u32_len(out.len() - 8)?;
        write_u32(&mut out, RIFF_SIZE_OFFSET, riff_size);
    }
    Ok(out)
}

fn check_range(metadata: &Metadata, start: usize, end: usize) -> Result<(), SliceError> {
    if end > metadata.data_end() || start < metadata.data_start || start >= end {
        return Err(SliceError::PayloadOverrun {
            end,
            limit: metadata.data_end(),
        });
    }

    let stride = metadata.frame_alignment;
    if (start - metadata.data_start) % stride != 0 || (end - metadata.data_start) % stride != 0 {
        return Err(SliceError::Misaligned { start, end, stride });
    }
    Ok(())
}

fn patched(
    metadata: &Metadata,
    buffer: &[u8],
    payload: &[u8],
    payload_len: u32,
) -> Result<Vec<u8>, SliceError> {
    let data = metadata
        .chunks
        .get(&DATA_TAG)
        .ok_or(SliceError::MissingChunk("data"))?;
    let head = &buffer[..metadata.data_start];
    let tail = &buffer[data.payload_range().end..];

    let mut out = Vec::with_capacity(head.len() + payload.len() + tail.len());
    out.extend_from_slice(head);
    // The `data` length field is the last four bytes before the payload.
    write_u32(&mut out, head.len() - LENGTH_FIELD_LEN, payload_len);
    out.extend_from_slice(payload);
    out.extend_from_slice(tail);
    Ok(out)
}

fn synthesized(
    metadata: &Metadata,
    buffer: &[u8],
    payload: &[u8],
    payload_len: u32,
) -> Result<Vec<u8>, SliceError> {
    let extras: Vec<_> = metadata
        .chunks
        .iter()
        .filter(|chunk| ![RIFF_TAG, FMT_TAG, DATA_TAG].contains(&chunk.tag))
        .map(|chunk| &buffer[chunk.span()])
        .collect();
    let extras_len: usize = extras.iter().map(|bytes| bytes.len()).sum();

    let block_align = u16::try_from(metadata.frame_alignment)
        .map_err(|_| SliceError::Malformed("frame size does not fit a 16-bit block align"))?;
    let byte_rate = u32::try_from(metadata.bytes_per_second)
        .map_err(|_| SliceError::Malformed("byte rate does not fit a 32-bit field"))?;

    let mut out = Vec::with_capacity(CANONICAL_HEADER_LEN + payload.len() + extras_len);
    out.extend_from_slice(&RIFF_TAG);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(&FMT_TAG);
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&metadata.channels.to_le_bytes());
    out.extend_from_slice(&metadata.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&metadata.bits_per_sample.to_le_bytes());
    out.extend_from_slice(&DATA_TAG);
    out.extend_from_slice(&payload_len.to_le_bytes());
    debug_assert_eq!(out.len(), CANONICAL_HEADER_LEN);

    out.extend_from_slice(payload);
    for bytes in extras {
        out.extend_from_slice(bytes);
    }
    Ok(out)
}

fn u32_len(len: usize) -> Result<u32, SliceError> {
    u32::try_from(len).map_err(|_| SliceError::Malformed("chunk exceeds the 4 GiB RIFF limit"))
}

fn write_u32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
