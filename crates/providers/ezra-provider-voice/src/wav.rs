//! RIFF/WAVE framing for 16-bit PCM

use ezra_core::{EzraError, Result};

/// Size of the canonical PCM WAV header
pub const WAV_HEADER_LEN: usize = 44;

/// Wrap raw little-endian PCM bytes in a minimal WAV header
pub fn wrap_pcm_in_wav(pcm_data: &[u8], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let byte_rate = sample_rate * (channels as u32) * (bits_per_sample as u32) / 8;
    let block_align = channels * bits_per_sample / 8;
    let data_size = pcm_data.len() as u32;
    let file_size = 36 + data_size;

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + pcm_data.len());

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt subchunk, PCM
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data subchunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    wav.extend_from_slice(pcm_data);

    wav
}

/// Encode mono 16-bit samples as a WAV file
pub fn encode_mono_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    wrap_pcm_in_wav(&pcm, sample_rate, 1, 16)
}

/// Parsed `fmt ` and `data` chunk information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    /// Samples per second
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Bits per sample
    pub bits_per_sample: u16,
    /// Declared size of the data chunk in bytes
    pub data_len: u32,
}

impl WavHeader {
    /// Parse the header of a WAV byte buffer
    ///
    /// Unknown chunks between `fmt ` and `data` are skipped.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
            return Err(EzraError::audio_malformed("missing RIFF/WAVE signature"));
        }

        let mut offset = 12;
        let mut format: Option<(u16, u32, u16)> = None;

        while offset + 8 <= bytes.len() {
            let id = &bytes[offset..offset + 4];
            let size = read_u32(bytes, offset + 4)?;
            let body = offset + 8;

            if id == b"fmt " {
                if size < 16 || body + 16 > bytes.len() {
                    return Err(EzraError::audio_malformed("truncated fmt chunk"));
                }
                let channels = read_u16(bytes, body + 2)?;
                let sample_rate = read_u32(bytes, body + 4)?;
                let bits_per_sample = read_u16(bytes, body + 14)?;
                format = Some((channels, sample_rate, bits_per_sample));
            } else if id == b"data" {
                let (channels, sample_rate, bits_per_sample) = format
                    .ok_or_else(|| EzraError::audio_malformed("data chunk before fmt chunk"))?;
                return Ok(Self {
                    sample_rate,
                    channels,
                    bits_per_sample,
                    data_len: size,
                });
            }

            // chunks are word aligned
            offset = body + size as usize + (size as usize & 1);
        }

        Err(EzraError::audio_malformed("no data chunk"))
    }

    /// Number of samples per channel described by the data chunk
    pub fn sample_count(&self) -> usize {
        let frame = self.channels as usize * (self.bits_per_sample as usize / 8);
        if frame == 0 {
            return 0;
        }
        self.data_len as usize / frame
    }
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| EzraError::audio_malformed("unexpected end of header"))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| EzraError::audio_malformed("unexpected end of header"))
}
