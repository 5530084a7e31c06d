use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unrecognized audio container: {0}")]
    Probe(String),
    #[error("no decodable audio track in stream")]
    NoAudioTrack,
    #[error("stream reports no sample rate")]
    NoSampleRate,
    #[error("decoder error: {0}")]
    Decoder(String),
    #[error("stream decoded to zero samples")]
    Empty,
}

/// A fully decoded audio payload, downmixed to mono.
#[derive(Debug)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode raw stream bytes (MP3 from progressive streams, WAV in tests)
/// into a mono f32 buffer at the stream's native rate. Channels are
/// averaged; malformed frames are skipped rather than failing the track.
pub fn decode(bytes: Vec<u8>) -> Result<DecodedAudio, DecodeError> {
    let cursor = Cursor::new(bytes);
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Probe(e.to_string()))?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(DecodeError::NoSampleRate)?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Decoder(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut channels = 1usize;

    loop {
        let packet = match reader.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break; // end of stream
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(DecodeError::Decoder(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Skipping malformed frame: {e}");
                continue;
            }
            Err(e) => return Err(DecodeError::Decoder(e.to_string())),
        };

        let spec = *decoded.spec();
        let frames = decoded.capacity();
        let needs_realloc = match &sample_buf {
            Some(buf) => buf.capacity() < frames * spec.channels.count(),
            None => true,
        };
        if needs_realloc {
            channels = spec.channels.count().max(1);
            sample_buf = Some(SampleBuffer::new(frames as u64, spec));
        }

        if let Some(buf) = &mut sample_buf {
            buf.copy_interleaved_ref(decoded);
            if channels == 1 {
                samples.extend_from_slice(buf.samples());
            } else {
                for frame in buf.samples().chunks_exact(channels) {
                    samples.push(frame.iter().sum::<f32>() / channels as f32);
                }
            }
        }
    }

    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal PCM16 mono WAV container around the given samples.
    fn wav_bytes(samples: &[f32], sample_rate: u32) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let mut out = Vec::with_capacity(44 + samples.len() * 2);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&1u16.to_le_bytes()); // mono
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_decode_wav_roundtrip() {
        let sample_rate = 22050;
        let samples: Vec<f32> = (0..sample_rate)
            .map(|i| {
                (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin() * 0.5
            })
            .collect();
        let audio = decode(wav_bytes(&samples, sample_rate)).unwrap();
        assert_eq!(audio.sample_rate, sample_rate);
        assert_eq!(audio.samples.len(), samples.len());
        assert!((audio.duration_secs() - 1.0).abs() < 1e-6);
        // quantization noise only
        assert!((audio.samples[100] - samples[100]).abs() < 1e-3);
    }

    #[test]
    fn test_decode_garbage_is_error() {
        let err = decode(vec![0u8; 512]).unwrap_err();
        assert!(matches!(err, DecodeError::Probe(_)));
    }
}
