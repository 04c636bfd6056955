//! Classical little-endian PCM WAV container.
//!
//! Utterances are written with a placeholder header up front; once the final
//! payload size is known the two size fields are patched in place. The data
//! region is never rewritten, so a truncated file stays salvageable.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::{AudioError, AudioResult};

/// Rate at which capture endpoints record.
pub const CAPTURE_SAMPLE_RATE: u32 = 44_100;
/// Rate the recognizer requires.
pub const RECOGNIZER_SAMPLE_RATE: u32 = 16_000;

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const PCM_FORMAT: u16 = 1;

/// Total header length; payload starts here.
pub const HEADER_LEN: u64 = 44;

/// `ChunkSize` field: whole file minus the RIFF tag and the field itself.
const RIFF_SIZE_OFFSET: u64 = 4;
/// `Subchunk2Size` field: payload byte count.
const DATA_SIZE_OFFSET: u64 = 40;

/// Parsed descriptor fields of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub riff_size: u32,
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_size: u32,
}

impl WavHeader {
    /// Descriptor for a mono 16-bit capture-rate file with the given payload size.
    pub fn capture(data_size: u32) -> Self {
        let byte_rate = CAPTURE_SAMPLE_RATE * u32::from(CHANNELS) * u32::from(BITS_PER_SAMPLE) / 8;
        Self {
            riff_size: data_size + 36,
            audio_format: PCM_FORMAT,
            channels: CHANNELS,
            sample_rate: CAPTURE_SAMPLE_RATE,
            byte_rate,
            block_align: CHANNELS * BITS_PER_SAMPLE / 8,
            bits_per_sample: BITS_PER_SAMPLE,
            data_size,
        }
    }

    /// Serialize to the 44-byte on-disk layout.
    pub fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut buf = [0u8; HEADER_LEN as usize];
        buf[0..4].copy_from_slice(b"RIFF");
        buf[4..8].copy_from_slice(&self.riff_size.to_le_bytes());
        buf[8..12].copy_from_slice(b"WAVE");
        buf[12..16].copy_from_slice(b"fmt ");
        buf[16..20].copy_from_slice(&16u32.to_le_bytes());
        buf[20..22].copy_from_slice(&self.audio_format.to_le_bytes());
        buf[22..24].copy_from_slice(&self.channels.to_le_bytes());
        buf[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        buf[28..32].copy_from_slice(&self.byte_rate.to_le_bytes());
        buf[32..34].copy_from_slice(&self.block_align.to_le_bytes());
        buf[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        buf[36..40].copy_from_slice(b"data");
        buf[40..44].copy_from_slice(&self.data_size.to_le_bytes());
        buf
    }

    /// Parse the 44-byte layout, validating the fixed tags.
    pub fn decode(buf: &[u8; HEADER_LEN as usize]) -> AudioResult<Self> {
        if &buf[0..4] != b"RIFF" {
            return Err(AudioError::MalformedHeader("missing RIFF tag"));
        }
        if &buf[8..12] != b"WAVE" {
            return Err(AudioError::MalformedHeader("missing WAVE tag"));
        }
        if &buf[12..16] != b"fmt " {
            return Err(AudioError::MalformedHeader("missing fmt subchunk"));
        }
        if &buf[36..40] != b"data" {
            return Err(AudioError::MalformedHeader("missing data subchunk"));
        }
        let u16_at = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Ok(Self {
            riff_size: u32_at(4),
            audio_format: u16_at(20),
            channels: u16_at(22),
            sample_rate: u32_at(24),
            byte_rate: u32_at(28),
            block_align: u16_at(32),
            bits_per_sample: u16_at(34),
            data_size: u32_at(40),
        })
    }
}

/// Write the placeholder header for a zero-length data region at the current
/// position (the start of a freshly created file).
pub async fn write_placeholder_header(file: &mut File) -> AudioResult<()> {
    file.write_all(&WavHeader::capture(0).encode()).await?;
    Ok(())
}

/// Patch both size fields once the final payload size is known. Must be the
/// last write before the file is handed downstream.
pub async fn patch_sizes(file: &mut File, data_size: u32) -> AudioResult<()> {
    file.seek(SeekFrom::Start(RIFF_SIZE_OFFSET)).await?;
    file.write_all(&(data_size + 36).to_le_bytes()).await?;
    file.seek(SeekFrom::Start(DATA_SIZE_OFFSET)).await?;
    file.write_all(&data_size.to_le_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Read and parse the descriptor of an on-disk container.
pub async fn read_header(path: &Path) -> AudioResult<WavHeader> {
    let mut file = File::open(path).await?;
    let mut buf = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut buf).await?;
    WavHeader::decode(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn capture_header_fields() {
        let h = WavHeader::capture(1000);
        assert_eq!(h.riff_size, 1036);
        assert_eq!(h.channels, 1);
        assert_eq!(h.sample_rate, 44_100);
        assert_eq!(h.byte_rate, 88_200);
        assert_eq!(h.block_align, 2);
        assert_eq!(h.bits_per_sample, 16);
        assert_eq!(h.audio_format, 1);
    }

    #[test]
    fn encode_decode_round_trip() {
        let h = WavHeader::capture(4242);
        let decoded = WavHeader::decode(&h.encode()).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut buf = WavHeader::capture(0).encode();
        buf[0] = b'X';
        assert!(matches!(
            WavHeader::decode(&buf),
            Err(AudioError::MalformedHeader(_))
        ));
    }

    #[tokio::test]
    async fn placeholder_then_patch_yields_final_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utterance.wav");

        let payload: Vec<u8> = (0..100u8).collect();
        let mut file = File::create(&path).await.unwrap();
        write_placeholder_header(&mut file).await.unwrap();
        file.write_all(&payload).await.unwrap();
        patch_sizes(&mut file, payload.len() as u32).await.unwrap();
        drop(file);

        let header = read_header(&path).await.unwrap();
        assert_eq!(header.data_size, 100);
        assert_eq!(header.riff_size, 136);

        let bytes = tokio::fs::read(&path).await.unwrap();
        assert_eq!(bytes.len() as u64, HEADER_LEN + 100);
        assert_eq!(&bytes[HEADER_LEN as usize..], payload.as_slice());
    }
}
