use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PcmError {
    #[error("not a raw PCM mime type: {0}")]
    NotPcm(String),

    #[error("unsupported PCM sample width: {0} bits")]
    UnsupportedWidth(u16),

    #[error("PCM payload of {len} bytes is not a whole number of {width}-byte frames")]
    Truncated { len: usize, width: usize },

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Layout of a raw PCM payload as reported by a synthesis backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

const DEFAULT_PCM_RATE: u32 = 24_000;

impl PcmFormat {
    /// Parses `audio/L16;codec=pcm;rate=24000` style descriptors.
    /// Returns `Ok(None)` for containers that are already playable.
    pub fn from_mime(mime: &str) -> Result<Option<Self>, PcmError> {
        let mut parts = mime.split(';').map(str::trim);
        let essence = parts.next().unwrap_or_default().to_ascii_lowercase();

        let bits_per_sample = match essence.as_str() {
            "audio/l16" => 16,
            "audio/l24" => 24,
            "audio/l8" => 8,
            "audio/pcm" => 16,
            other if other.starts_with("audio/l") => {
                return Err(PcmError::NotPcm(mime.to_string()));
            }
            _ => return Ok(None),
        };

        let mut format = PcmFormat {
            sample_rate: DEFAULT_PCM_RATE,
            channels: 1,
            bits_per_sample,
        };
        for param in parts {
            let Some((name, value)) = param.split_once('=') else {
                continue;
            };
            match name.trim().to_ascii_lowercase().as_str() {
                "rate" => {
                    if let Ok(rate) = value.trim().parse() {
                        format.sample_rate = rate;
                    }
                }
                "channels" => {
                    if let Ok(channels) = value.trim().parse() {
                        format.channels = channels;
                    }
                }
                _ => {}
            }
        }
        Ok(Some(format))
    }
}

/// Wraps little-endian PCM samples in a WAV container.
pub fn pcm_to_wav(pcm: &[u8], format: PcmFormat) -> Result<Vec<u8>, PcmError> {
    let width = usize::from(format.bits_per_sample / 8);
    if !matches!(format.bits_per_sample, 8 | 16 | 24) {
        return Err(PcmError::UnsupportedWidth(format.bits_per_sample));
    }
    if pcm.len() % width != 0 {
        return Err(PcmError::Truncated {
            len: pcm.len(),
            width,
        });
    }

    let spec = hound::WavSpec {
        channels: format.channels.max(1),
        sample_rate: format.sample_rate,
        bits_per_sample: format.bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for frame in pcm.chunks_exact(width) {
        match format.bits_per_sample {
            8 => writer.write_sample(frame[0] as i8)?,
            16 => writer.write_sample(i16::from_le_bytes([frame[0], frame[1]]))?,
            _ => {
                let sample = i32::from_le_bytes([0, frame[0], frame[1], frame[2]]) >> 8;
                writer.write_sample(sample)?
            }
        }
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}
