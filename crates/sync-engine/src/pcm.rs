//! Decoded narration audio.
//!
//! The generation service hands the engine a playable audio file; it is
//! decoded once into interleaved `f32` frames and read by time span from
//! there on.

use std::path::Path;

use dubline_common::error::{DublineError, DublineResult};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Interleaved linear PCM.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples, `frames * channels` long.
    pub samples: Vec<f32>,
}

impl PcmBuffer {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    /// `secs` of silence.
    pub fn silence(sample_rate: u32, channels: u16, secs: f64) -> Self {
        let frames = (secs.max(0.0) * sample_rate as f64).round() as usize;
        Self::new(sample_rate, channels, vec![0.0; frames * channels as usize])
    }

    /// Whether the format describes something playable.
    pub fn is_playable(&self) -> bool {
        self.sample_rate > 0 && self.channels > 0 && !self.samples.is_empty()
    }

    pub fn frames(&self) -> usize {
        match self.channels {
            0 => 0,
            channels => self.samples.len() / channels as usize,
        }
    }

    /// Duration in seconds; `0.0` for an unusable format.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Resample `[start_secs, end_secs)` to exactly `out_frames` frames by
    /// linear interpolation. Positions past the end read as silence.
    pub fn render_span(&self, start_secs: f64, end_secs: f64, out_frames: usize) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        let mut out = vec![0.0; out_frames * channels];
        let frames = self.frames();
        if out_frames == 0 || frames == 0 || self.sample_rate == 0 {
            return out;
        }

        let rate = self.sample_rate as f64;
        let start = start_secs.max(0.0) * rate;
        let step = ((end_secs - start_secs).max(0.0) * rate) / out_frames as f64;

        for i in 0..out_frames {
            let pos = start + i as f64 * step;
            let index = pos.floor() as usize;
            if index >= frames {
                break;
            }
            let frac = (pos - index as f64) as f32;
            let next = (index + 1).min(frames - 1);
            for ch in 0..channels {
                let a = self.samples[index * channels + ch];
                let b = self.samples[next * channels + ch];
                out[i * channels + ch] = a + (b - a) * frac;
            }
        }

        out
    }

    /// Decode an audio file with symphonia.
    pub fn decode_file(path: &Path) -> DublineResult<Self> {
        if !path.exists() {
            return Err(DublineError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let src = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(src), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                DublineError::audio(format!("Unrecognized audio in {}: {e}", path.display()))
            })?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DublineError::audio("No decodable audio track"))?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DublineError::audio(format!("Unsupported audio codec: {e}")))?;

        let mut samples = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DublineError::audio(format!("Audio read failed: {e}"))),
            };

            while !format.metadata().is_latest() {
                format.metadata().pop();
            }

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!(error = %e, "Skipping undecodable audio packet");
                    continue;
                }
                Err(e) => return Err(DublineError::audio(format!("Audio decode failed: {e}"))),
            };

            let spec = *decoded.spec();
            sample_rate = spec.rate;
            channels = spec.channels.count() as u16;

            let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }

        let pcm = Self::new(sample_rate, channels, samples);
        tracing::info!(
            path = %path.display(),
            sample_rate = pcm.sample_rate,
            channels = pcm.channels,
            duration_secs = pcm.duration_secs(),
            "Decoded narration"
        );
        Ok(pcm)
    }
}
