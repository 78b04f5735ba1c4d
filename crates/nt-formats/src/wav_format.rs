//! WAV encoding and decoding.
//!
//! Decoding accepts 8/16/24/32-bit integer PCM and 32-bit float, including
//! WAVE_FORMAT_EXTENSIBLE headers. Unknown chunks are skipped.

use std::io::{Cursor, Write};

use binrw::BinRead;
use nt_engine::Frame;
use nt_ir::{AudioBuffer, MAX_CHANNELS};

use crate::FormatError;

const FORMAT_PCM: u16 = 1;
const FORMAT_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

// --- Headers ---

#[derive(BinRead, Debug)]
#[br(little, magic = b"RIFF")]
struct RiffHeader {
    _size: u32,
    #[br(magic = b"WAVE")]
    _form: (),
}

#[derive(BinRead, Debug)]
#[br(little)]
struct ChunkHeader {
    id: [u8; 4],
    size: u32,
}

#[derive(BinRead, Debug)]
#[br(little)]
struct FmtChunk {
    format: u16,
    channels: u16,
    sample_rate: u32,
    _byte_rate: u32,
    _block_align: u16,
    bits_per_sample: u16,
}

/// Tail of an extensible `fmt ` chunk. The first two bytes of the
/// sub-format GUID carry the real format tag.
#[derive(BinRead, Debug)]
#[br(little)]
struct FmtExtension {
    _cb_size: u16,
    _valid_bits: u16,
    _channel_mask: u32,
    sub_format: u16,
}

/// Summary of a WAV file's format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WavInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub float: bool,
    pub frames: usize,
}

// --- Reading ---

/// Decode raw WAV bytes into a planar f32 buffer.
pub fn decode_wav(data: &[u8]) -> Result<AudioBuffer, FormatError> {
    let (info, raw) = parse(data)?;
    let format = if info.float { FORMAT_FLOAT } else { FORMAT_PCM };
    let samples = decode_samples(raw, format, info.bits_per_sample)?;

    let channels = info.channels as usize;
    let planes = (0..channels)
        .map(|ch| samples.iter().skip(ch).step_by(channels).take(info.frames).copied().collect())
        .collect();
    Ok(AudioBuffer::from_planes(planes, info.sample_rate))
}

/// Read only the format of a WAV file.
pub fn probe_wav(data: &[u8]) -> Result<WavInfo, FormatError> {
    parse(data).map(|(info, _)| info)
}

fn parse(data: &[u8]) -> Result<(WavInfo, &[u8]), FormatError> {
    let mut cur = Cursor::new(data);
    RiffHeader::read(&mut cur)?;

    let mut fmt: Option<FmtChunk> = None;
    let mut pcm: Option<&[u8]> = None;

    while cur.position() as usize + 8 <= data.len() {
        let header = ChunkHeader::read(&mut cur)?;
        let start = cur.position() as usize;
        let size = header.size as usize;
        match &header.id {
            b"fmt " => {
                let mut chunk = FmtChunk::read(&mut cur)?;
                if chunk.format == FORMAT_EXTENSIBLE && size >= 40 {
                    chunk.format = FmtExtension::read(&mut cur)?.sub_format;
                }
                fmt = Some(chunk);
            }
            b"data" => {
                let end = start.saturating_add(size).min(data.len());
                pcm = Some(&data[start..end]);
            }
            other => tracing::trace!(chunk = %String::from_utf8_lossy(other), "skipping chunk"),
        }
        // Chunks are word aligned.
        let next = start.saturating_add(size).saturating_add(size & 1);
        cur.set_position(next as u64);
    }

    let fmt = fmt.ok_or(FormatError::MissingChunk("fmt "))?;
    let raw = pcm.ok_or(FormatError::MissingChunk("data"))?;

    if fmt.channels == 0 || fmt.channels > MAX_CHANNELS {
        return Err(FormatError::Channels(fmt.channels));
    }
    let float = match (fmt.format, fmt.bits_per_sample) {
        (FORMAT_PCM, 8 | 16 | 24 | 32) => false,
        (FORMAT_FLOAT, 32) => true,
        (format, bits) => return Err(FormatError::Unsupported { format, bits }),
    };
    let frame_bytes = fmt.channels as usize * (fmt.bits_per_sample as usize / 8);
    let info = WavInfo {
        channels: fmt.channels,
        sample_rate: fmt.sample_rate,
        bits_per_sample: fmt.bits_per_sample,
        float,
        frames: raw.len() / frame_bytes,
    };
    Ok((info, raw))
}

fn decode_samples(raw: &[u8], format: u16, bits: u16) -> Result<Vec<f32>, FormatError> {
    let samples = match (format, bits) {
        // 8-bit WAV is unsigned, centered on 128.
        (FORMAT_PCM, 8) => raw.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        (FORMAT_PCM, 16) => raw
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32_768.0)
            .collect(),
        (FORMAT_PCM, 24) => raw
            .chunks_exact(3)
            .map(|c| (i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8) as f32 / 8_388_608.0)
            .collect(),
        (FORMAT_PCM, 32) => raw
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        (FORMAT_FLOAT, 32) => raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        (format, bits) => return Err(FormatError::Unsupported { format, bits }),
    };
    Ok(samples)
}

// --- Writing ---

/// Write frames as 16-bit stereo PCM.
pub fn write_wav(w: &mut impl Write, frames: &[Frame], sample_rate: u32) -> std::io::Result<()> {
    w.write_all(&frames_to_wav(frames, sample_rate))
}

/// Encode frames as a 16-bit stereo PCM WAV file in memory.
pub fn frames_to_wav(frames: &[Frame], sample_rate: u32) -> Vec<u8> {
    let num_channels: u16 = 2;
    let bits_per_sample: u16 = 16;
    let block_align = num_channels * (bits_per_sample / 8);
    let data_size = frames.len() as u32 * block_align as u32;

    let mut buf = Vec::with_capacity(44 + data_size as usize);
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_size).to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    buf.extend_from_slice(&num_channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for frame in frames {
        let (left, right) = frame.to_i16();
        buf.extend_from_slice(&left.to_le_bytes());
        buf.extend_from_slice(&right.to_le_bytes());
    }
    buf
}
