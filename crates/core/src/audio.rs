use base64::Engine;
use std::time::Duration;

/// The gateway synthesizes speech as 16-bit PCM mono at this rate.
pub const SPEECH_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Decodes base64 little-endian PCM16 into raw samples. A trailing odd byte is ignored.
pub fn decode_i16(base64_fragment: &str) -> Result<Vec<i16>, AudioError> {
    let pcm16_bytes = base64::engine::general_purpose::STANDARD.decode(base64_fragment)?;
    Ok(pcm16_bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

pub fn encode_i16(pcm16: &[i16]) -> String {
    let pcm16_bytes: Vec<u8> = pcm16
        .iter()
        .flat_map(|&sample| sample.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16_bytes)
}

/// Converts a slice of i16 samples to a vector of f32 samples in [-1.0, 1.0).
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Converts f32 samples back to i16, clamping out-of-range values.
///
/// Inverse of [`convert_i16_to_f32`]: decoded PCM16 converts back bit for bit.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// A mono clip of normalized samples, ready to hand to a player.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioClip {
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decodes speech returned by the gateway.
    pub fn from_speech_base64(data: &str) -> Result<Self, AudioError> {
        let pcm16 = decode_i16(data)?;
        Ok(Self::from_samples(
            convert_i16_to_f32(&pcm16),
            SPEECH_SAMPLE_RATE,
        ))
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Encodes the clip as a 16-bit PCM mono RIFF/WAVE file.
    pub fn to_wav(&self) -> Vec<u8> {
        let pcm16 = convert_f32_to_i16(&self.samples);
        let data_len = (pcm16.len() * 2) as u32;
        let byte_rate = self.sample_rate * 2;

        let mut wav = Vec::with_capacity(44 + data_len as usize);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&1u16.to_le_bytes()); // mono
        wav.extend_from_slice(&self.sample_rate.to_le_bytes());
        wav.extend_from_slice(&byte_rate.to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes()); // block align
        wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        for sample in pcm16 {
            wav.extend_from_slice(&sample.to_le_bytes());
        }
        wav
    }
}
