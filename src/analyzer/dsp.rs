use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

/// Analysis frame length in samples.
pub const FRAME_SIZE: usize = 2048;

/// Hop between consecutive frames in samples.
pub const HOP_SIZE: usize = 512;

/// Periodic Hann window.
pub fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / len as f32;
            0.5 * (1.0 - x.cos())
        })
        .collect()
}

/// Short-time Fourier transform with a fixed frame/hop and Hann window.
pub struct Stft {
    frame: usize,
    hop: usize,
    window: Vec<f32>,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl Stft {
    pub fn new(frame: usize, hop: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(frame);
        Self {
            frame,
            hop,
            window: hann_window(frame),
            fft,
        }
    }

    pub fn num_bins(&self) -> usize {
        self.frame / 2 + 1
    }

    /// Magnitude spectrogram: one `num_bins()`-length row per frame.
    /// Inputs shorter than one frame produce no rows.
    pub fn magnitudes(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        if samples.len() < self.frame {
            return Vec::new();
        }
        let num_frames = 1 + (samples.len() - self.frame) / self.hop;
        let mut input = self.fft.make_input_vec();
        let mut output = self.fft.make_output_vec();
        let mut frames = Vec::with_capacity(num_frames);

        for f in 0..num_frames {
            let start = f * self.hop;
            for (i, s) in samples[start..start + self.frame].iter().enumerate() {
                input[i] = s * self.window[i];
            }
            self.fft
                .process(&mut input, &mut output)
                .expect("buffer lengths come from the plan");
            frames.push(output.iter().map(|c: &Complex<f32>| c.norm()).collect());
        }
        frames
    }
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank over `num_bins` linear FFT bins.
pub fn mel_filterbank(num_filters: usize, num_bins: usize, sample_rate: u32) -> Vec<Vec<f32>> {
    let nyquist = sample_rate as f32 / 2.0;
    let mel_max = hz_to_mel(nyquist);
    let points: Vec<f32> = (0..num_filters + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (num_filters + 1) as f32))
        .collect();
    let bin_hz = nyquist / (num_bins - 1) as f32;

    let mut bank = vec![vec![0.0f32; num_bins]; num_filters];
    for (m, filter) in bank.iter_mut().enumerate() {
        let (lo, center, hi) = (points[m], points[m + 1], points[m + 2]);
        for (k, weight) in filter.iter_mut().enumerate() {
            let hz = k as f32 * bin_hz;
            *weight = if hz >= lo && hz <= center && center > lo {
                (hz - lo) / (center - lo)
            } else if hz > center && hz < hi && hi > center {
                (hi - hz) / (hi - center)
            } else {
                0.0
            };
        }
    }
    bank
}

/// Mel power spectrogram from a magnitude spectrogram.
pub fn mel_spectrogram(
    magnitudes: &[Vec<f32>],
    sample_rate: u32,
    num_filters: usize,
) -> Vec<Vec<f32>> {
    let Some(first) = magnitudes.first() else {
        return Vec::new();
    };
    let bank = mel_filterbank(num_filters, first.len(), sample_rate);
    magnitudes
        .iter()
        .map(|frame| {
            bank.iter()
                .map(|filter| {
                    filter
                        .iter()
                        .zip(frame)
                        .map(|(w, m)| w * m * m)
                        .sum::<f32>()
                })
                .collect()
        })
        .collect()
}

/// In-place natural-log compression with a small floor.
pub fn log_compress(spectrogram: &mut [Vec<f32>]) {
    for frame in spectrogram {
        for v in frame {
            *v = (*v + 1e-10).ln();
        }
    }
}

/// Orthonormal DCT-II, truncated to `num_coeffs`.
pub fn dct_ii(input: &[f32], num_coeffs: usize) -> Vec<f32> {
    let n = input.len();
    if n == 0 {
        return Vec::new();
    }
    let scale0 = (1.0 / n as f32).sqrt();
    let scale = (2.0 / n as f32).sqrt();
    (0..num_coeffs.min(n))
        .map(|k| {
            let sum: f32 = input
                .iter()
                .enumerate()
                .map(|(i, &x)| {
                    x * (std::f32::consts::PI / n as f32 * (i as f32 + 0.5) * k as f32).cos()
                })
                .sum();
            sum * if k == 0 { scale0 } else { scale }
        })
        .collect()
}

/// Per-frame root-mean-square energy. A tail shorter than one frame is
/// folded into a single frame when the input is shorter than `frame`.
pub fn rms_frames(samples: &[f32], frame: usize, hop: usize) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    if samples.len() < frame {
        let energy = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        return vec![energy.sqrt()];
    }
    (0..=(samples.len() - frame) / hop)
        .map(|i| {
            let start = i * hop;
            let energy =
                samples[start..start + frame].iter().map(|s| s * s).sum::<f32>() / frame as f32;
            energy.sqrt()
        })
        .collect()
}

/// Time of a frame index in seconds.
pub fn frames_to_time(frame_idx: usize, sample_rate: u32, hop: usize) -> f64 {
    frame_idx as f64 * hop as f64 / sample_rate as f64
}

/// Raw (biased) autocorrelation for lags `0..max_lag`.
pub fn autocorrelate(values: &[f32], max_lag: usize) -> Vec<f32> {
    let max_lag = max_lag.min(values.len());
    (0..max_lag)
        .map(|lag| {
            values[..values.len() - lag]
                .iter()
                .zip(&values[lag..])
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect()
}

/// Index of the first maximum. Ties resolve to the lowest index.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best_idx = None;
    let mut best = f32::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best {
            best = v;
            best_idx = Some(i);
        }
    }
    best_idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_window_shape() {
        let w = hann_window(8);
        assert!(w[0].abs() < 1e-7);
        assert!((w[4] - 1.0).abs() < 1e-6);
        // symmetric around the peak for a periodic window
        assert!((w[3] - w[5]).abs() < 1e-6);
    }

    #[test]
    fn test_stft_frame_count_and_bins() {
        let stft = Stft::new(256, 64);
        let samples = vec![0.25f32; 256 + 64 * 9];
        let mags = stft.magnitudes(&samples);
        assert_eq!(mags.len(), 10);
        assert_eq!(mags[0].len(), stft.num_bins());
        assert!(stft.magnitudes(&samples[..100]).is_empty());
    }

    #[test]
    fn test_stft_peak_bin_tracks_frequency() {
        let sample_rate = 8192u32;
        let frame = 1024;
        // 25 cycles over one frame lands exactly on bin 25 with a periodic window
        let freq = 25.0 * sample_rate as f32 / frame as f32;
        let samples: Vec<f32> = (0..frame * 2)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect();
        let mags = Stft::new(frame, frame / 4).magnitudes(&samples);
        assert_eq!(argmax(&mags[0]), Some(25));
    }

    #[test]
    fn test_mel_filterbank_covers_spectrum() {
        let bank = mel_filterbank(40, 1025, 44100);
        assert_eq!(bank.len(), 40);
        for filter in &bank {
            assert!(filter.iter().all(|&w| (0.0..=1.0).contains(&w)));
            assert!(filter.iter().any(|&w| w > 0.0));
        }
        // filter peaks move upward in frequency
        let peaks: Vec<usize> = bank.iter().map(|f| argmax(f).unwrap()).collect();
        assert!(peaks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_dct_constant_input_concentrates_in_c0() {
        let coeffs = dct_ii(&[1.0; 16], 4);
        assert!((coeffs[0] - 4.0).abs() < 1e-5); // sqrt(16)
        assert!(coeffs[1].abs() < 1e-5);
        assert!(coeffs[2].abs() < 1e-5);
    }

    #[test]
    fn test_rms_of_constant_signal() {
        let rms = rms_frames(&vec![0.5f32; 2048 + 512], 2048, 512);
        assert_eq!(rms.len(), 2);
        assert!((rms[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rms_short_input_single_frame() {
        let rms = rms_frames(&[0.5f32; 100], 2048, 512);
        assert_eq!(rms.len(), 1);
        assert!((rms[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_frames_to_time() {
        assert_eq!(frames_to_time(0, 44100, 512), 0.0);
        assert!((frames_to_time(86, 44100, 512) - 0.998).abs() < 1e-3);
    }

    #[test]
    fn test_autocorrelation_finds_period() {
        // impulse train with period 5, mean removed
        let mut x = vec![-0.2f32; 50];
        for i in (0..50).step_by(5) {
            x[i] = 0.8;
        }
        let ac = autocorrelate(&x, 10);
        assert!(ac[5] > ac[3]);
        assert!(ac[5] > ac[4]);
        assert!(ac[5] > ac[6]);
    }

    #[test]
    fn test_argmax_first_maximum_wins() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
