pub mod decode;
pub mod dsp;
pub mod features;
pub mod rhythm;

use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::store::models::{DeepFeatures, PitchClass, Rhythm, Structure};

/// Frames below which spectral analysis is meaningless.
const MIN_FRAMES: usize = 8;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("decode error: {0}")]
    Decode(#[from] decode::DecodeError),
    #[error("audio too short to analyze ({0} samples)")]
    TooShort(usize),
    #[error("no tempo could be estimated (silent or featureless audio)")]
    NoTempo,
}

/// Stage 2 result.
#[derive(Debug)]
pub struct BpmKey {
    pub bpm: f64,
    pub key: PitchClass,
}

/// Estimate tempo and key for a decoded buffer.
pub fn analyze_bpm_key(samples: &[f32], sample_rate: u32) -> Result<BpmKey, AnalyzeError> {
    let stft = dsp::Stft::new(dsp::FRAME_SIZE, dsp::HOP_SIZE);
    let magnitudes = stft.magnitudes(samples);
    if magnitudes.len() < MIN_FRAMES {
        return Err(AnalyzeError::TooShort(samples.len()));
    }
    let frame_rate = sample_rate as f64 / dsp::HOP_SIZE as f64;

    let mut mel = dsp::mel_spectrogram(&magnitudes, sample_rate, features::NUM_MEL_BANDS);
    dsp::log_compress(&mut mel);
    let envelope = rhythm::onset_envelope(&mel);
    let bpm = rhythm::estimate_tempo(&envelope, frame_rate).ok_or(AnalyzeError::NoTempo)?;

    let chroma = features::chroma_frames(&magnitudes, sample_rate, dsp::FRAME_SIZE);
    // chroma is non-empty whenever magnitudes is
    let key = features::estimate_key(&chroma).ok_or(AnalyzeError::TooShort(samples.len()))?;

    Ok(BpmKey { bpm, key })
}

/// Stage 3: energy per section, rhythm, and structure, assembled in that
/// order. All extractors run over intermediates computed once from the
/// same STFT.
pub fn analyze_deep(
    samples: &[f32],
    sample_rate: u32,
    config: &AnalysisConfig,
) -> Result<DeepFeatures, AnalyzeError> {
    let stft = dsp::Stft::new(dsp::FRAME_SIZE, dsp::HOP_SIZE);
    let magnitudes = stft.magnitudes(samples);
    if magnitudes.len() < MIN_FRAMES {
        return Err(AnalyzeError::TooShort(samples.len()));
    }
    let frame_rate = sample_rate as f64 / dsp::HOP_SIZE as f64;

    let mut mel = dsp::mel_spectrogram(&magnitudes, sample_rate, features::NUM_MEL_BANDS);
    dsp::log_compress(&mut mel);
    let envelope = rhythm::onset_envelope(&mel);
    let tempo = rhythm::estimate_tempo(&envelope, frame_rate).ok_or(AnalyzeError::NoTempo)?;
    let beat_times = rhythm::track_beats(&envelope, tempo, frame_rate);

    // structure: timbral section boundaries + beats grouped into bars
    let mfcc = features::mfcc_frames(&mel);
    let boundaries = features::segment_boundaries(&mfcc, config.num_sections);
    let sections: Vec<f64> = boundaries
        .iter()
        .map(|&frame| dsp::frames_to_time(frame, sample_rate, dsp::HOP_SIZE))
        .collect();
    let bars = rhythm::group_bars(&beat_times, config.beats_per_bar);

    // per-section energy over the same frame grid
    let rms = dsp::rms_frames(samples, dsp::FRAME_SIZE, dsp::HOP_SIZE);
    let frame_times: Vec<f64> = (0..rms.len())
        .map(|i| dsp::frames_to_time(i, sample_rate, dsp::HOP_SIZE))
        .collect();
    let energy = features::energy_by_section(&rms, &frame_times, &sections);

    Ok(DeepFeatures {
        energy,
        rhythm: Rhythm {
            tempo,
            beat_times,
        },
        structure: Structure { sections, bars },
    })
}
