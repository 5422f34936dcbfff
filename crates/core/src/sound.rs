//! Short oscillator cues played on clicks, sends and incoming replies.

use crate::audio::AudioClip;
use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};
use std::str::FromStr;

/// Level every cue decays to by its end.
const FINAL_GAIN: f32 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum SoundEffect {
    Click,
    Send,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Waveform {
    Sine,
    Triangle,
}

#[derive(Debug, Clone, Copy)]
struct Tone {
    waveform: Waveform,
    start_hz: f32,
    end_hz: f32,
    gain: f32,
    seconds: f32,
}

impl SoundEffect {
    pub const ALL: [SoundEffect; 3] = [SoundEffect::Click, SoundEffect::Send, SoundEffect::Receive];

    fn tone(self) -> Tone {
        match self {
            SoundEffect::Click => Tone {
                waveform: Waveform::Sine,
                start_hz: 880.0,
                end_hz: 880.0,
                gain: 0.2,
                seconds: 0.1,
            },
            SoundEffect::Send => Tone {
                waveform: Waveform::Triangle,
                start_hz: 440.0,
                end_hz: 880.0,
                gain: 0.15,
                seconds: 0.15,
            },
            SoundEffect::Receive => Tone {
                waveform: Waveform::Sine,
                start_hz: 660.0,
                end_hz: 1320.0,
                gain: 0.15,
                seconds: 0.1,
            },
        }
    }

    /// Synthesizes the cue: exponential frequency sweep under an exponential decay.
    pub fn render(self, sample_rate: u32) -> AudioClip {
        let tone = self.tone();
        let rate = sample_rate as f32;
        let frames = (tone.seconds * rate).round() as usize;
        let mut phase = 0.0f32;

        let samples = (0..frames)
            .map(|i| {
                let progress = i as f32 / frames as f32;
                let freq = tone.start_hz * (tone.end_hz / tone.start_hz).powf(progress);
                let gain = tone.gain * (FINAL_GAIN / tone.gain).powf(progress);
                let value = match tone.waveform {
                    Waveform::Sine => phase.sin(),
                    Waveform::Triangle => (2.0 / PI) * phase.sin().asin(),
                };
                phase = (phase + TAU * freq / rate) % TAU;
                value * gain
            })
            .collect();

        AudioClip::from_samples(samples, sample_rate)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown sound effect: '{0}'")]
pub struct UnknownSoundEffect(pub String);

impl FromStr for SoundEffect {
    type Err = UnknownSoundEffect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "click" => Ok(SoundEffect::Click),
            "send" => Ok(SoundEffect::Send),
            "receive" => Ok(SoundEffect::Receive),
            _ => Err(UnknownSoundEffect(s.to_string())),
        }
    }
}
