//! Sample formats for nodetone.
//!
//! Decodes raw WAV bytes into [`nt_ir::AudioBuffer`]s and exports rendered
//! frames as 16-bit stereo WAV.

mod wav_format;

pub use wav_format::{decode_wav, frames_to_wav, probe_wav, write_wav, WavInfo};

use thiserror::Error;

/// Error type for format parsing.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Missing RIFF/WAVE magic.
    #[error("not a RIFF/WAVE file")]
    InvalidHeader,
    /// Data ended inside a header or chunk.
    #[error("unexpected end of data")]
    UnexpectedEof,
    /// A required chunk is absent.
    #[error("missing {0:?} chunk")]
    MissingChunk(&'static str),
    /// Encoding other than 8/16/24/32-bit PCM or 32-bit float.
    #[error("unsupported encoding: format tag {format:#06x}, {bits} bits")]
    Unsupported { format: u16, bits: u16 },
    /// Zero channels or more than the buffer supports.
    #[error("unsupported channel count {0}")]
    Channels(u16),
    /// Any other header parse failure.
    #[error("malformed header: {0}")]
    Parse(String),
}

impl From<binrw::Error> for FormatError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::BadMagic { .. } => FormatError::InvalidHeader,
            binrw::Error::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                FormatError::UnexpectedEof
            }
            other => FormatError::Parse(other.to_string()),
        }
    }
}
