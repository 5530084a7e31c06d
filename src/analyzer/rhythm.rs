use super::dsp;

/// Searched tempo range in BPM.
pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 240.0;

/// Log-normal tempo prior, centered where most of the scraped material
/// lives. One octave of standard deviation keeps half/double-time
/// candidates in play without letting them win outright.
const PRIOR_CENTER_BPM: f64 = 120.0;
const PRIOR_LOG2_STD: f64 = 1.0;

/// Transition tightness for the beat-tracking dynamic program. Higher
/// values hold beats closer to the estimated period.
const TIGHTNESS: f64 = 100.0;

/// Onset-strength envelope: mean positive first difference of a log-mel
/// spectrogram, one value per frame. The first frame has no predecessor
/// and scores zero.
pub fn onset_envelope(log_mel: &[Vec<f32>]) -> Vec<f32> {
    if log_mel.len() < 2 {
        return vec![0.0; log_mel.len()];
    }
    let bands = log_mel[0].len();
    let mut envelope = Vec::with_capacity(log_mel.len());
    envelope.push(0.0);
    for pair in log_mel.windows(2) {
        let mut sum = 0.0f32;
        for b in 0..bands {
            let diff = pair[1][b] - pair[0][b];
            if diff > 0.0 {
                sum += diff;
            }
        }
        envelope.push(sum / bands as f32);
    }
    envelope
}

/// Estimate tempo from an onset envelope by autocorrelation over the lag
/// range covering [MIN_BPM, MAX_BPM], weighted by the log-normal prior.
/// `frame_rate` is frames per second (sample_rate / hop).
/// Returns None for silent or featureless audio.
pub fn estimate_tempo(envelope: &[f32], frame_rate: f64) -> Option<f64> {
    let lag_min = ((60.0 * frame_rate / MAX_BPM).floor() as usize).max(1);
    let lag_max = (60.0 * frame_rate / MIN_BPM).ceil() as usize;
    if envelope.len() < lag_min * 2 + 1 {
        return None;
    }

    // remove the DC component so the autocorrelation peaks at the true
    // period instead of decaying from lag zero
    let mean = envelope.iter().sum::<f32>() / envelope.len() as f32;
    let centered: Vec<f32> = envelope.iter().map(|v| v - mean).collect();
    let ac = dsp::autocorrelate(&centered, lag_max + 1);
    if ac[0] <= 1e-9 {
        return None;
    }

    let mut best: Option<(f64, f64)> = None; // (score, bpm)
    for (lag, &value) in ac.iter().enumerate().take(lag_max + 1).skip(lag_min) {
        let bpm = 60.0 * frame_rate / lag as f64;
        if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            continue;
        }
        let deviation = (bpm.log2() - PRIOR_CENTER_BPM.log2()) / PRIOR_LOG2_STD;
        let prior = (-0.5 * deviation * deviation).exp();
        let score = (value as f64 / ac[0] as f64) * prior;
        if best.is_none_or(|(s, _)| score > s) {
            best = Some((score, bpm));
        }
    }
    best.map(|(_, bpm)| bpm)
}

/// Track beats through the onset envelope with the classic dynamic
/// program: each frame chains to the predecessor that maximizes
/// accumulated onset strength minus a log-squared penalty for deviating
/// from the estimated beat period. Returns beat times in seconds,
/// monotonically increasing.
pub fn track_beats(envelope: &[f32], bpm: f64, frame_rate: f64) -> Vec<f64> {
    if envelope.is_empty() || bpm <= 0.0 {
        return Vec::new();
    }
    let period = 60.0 * frame_rate / bpm;
    if period < 2.0 || envelope.len() < period as usize {
        return Vec::new();
    }

    // normalize so the penalty scale is independent of signal level
    let std = {
        let n = envelope.len() as f32;
        let mean = envelope.iter().sum::<f32>() / n;
        let var = envelope.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        var.sqrt().max(1e-10)
    };
    let local: Vec<f64> = envelope.iter().map(|&v| (v / std) as f64).collect();

    let n = local.len();
    let window_lo = (period / 2.0).round() as usize;
    let window_hi = (period * 2.0).round() as usize;
    let mut cumscore = vec![0.0f64; n];
    let mut backlink = vec![-1isize; n];

    for i in 0..n {
        let start = i.saturating_sub(window_hi);
        let end = i.saturating_sub(window_lo);
        let mut best = f64::NEG_INFINITY;
        let mut best_j = -1isize;
        for j in start..end {
            let gap = (i - j) as f64;
            let penalty = TIGHTNESS * (gap / period).ln().powi(2);
            let score = cumscore[j] - penalty;
            if score > best {
                best = score;
                best_j = j as isize;
            }
        }
        cumscore[i] = local[i] + if best_j >= 0 { best } else { 0.0 };
        backlink[i] = best_j;
    }

    // start backtracking from the best-scoring frame in the final period
    let tail_start = n.saturating_sub(period.round() as usize);
    let mut head = tail_start;
    for i in tail_start..n {
        if cumscore[i] > cumscore[head] {
            head = i;
        }
    }

    let mut beats = Vec::new();
    let mut i = head as isize;
    while i >= 0 {
        beats.push(i as usize);
        i = backlink[i as usize];
    }
    beats.reverse();
    beats.iter().map(|&f| f as f64 / frame_rate).collect()
}

/// Partition beat times into bars. A trailing partial bar is kept.
pub fn group_bars(beat_times: &[f64], beats_per_bar: usize) -> Vec<Vec<f64>> {
    if beats_per_bar == 0 {
        return Vec::new();
    }
    beat_times
        .chunks(beats_per_bar)
        .map(|bar| bar.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Envelope of impulses every `period` frames over `len` frames.
    fn click_envelope(period: usize, len: usize) -> Vec<f32> {
        let mut env = vec![0.0f32; len];
        for i in (0..len).step_by(period) {
            env[i] = 1.0;
        }
        env
    }

    #[test]
    fn test_onset_envelope_marks_band_increases() {
        let log_mel = vec![vec![0.0f32; 4], vec![1.0f32; 4], vec![0.5f32; 4]];
        let env = onset_envelope(&log_mel);
        assert_eq!(env.len(), 3);
        assert_eq!(env[0], 0.0);
        assert!((env[1] - 1.0).abs() < 1e-6);
        // decreases contribute nothing
        assert_eq!(env[2], 0.0);
    }

    #[test]
    fn test_estimate_tempo_of_click_train() {
        // 86.13 frames/sec, clicks every 43 frames => ~120 BPM
        let frame_rate = 44100.0 / 512.0;
        let env = click_envelope(43, 860);
        let bpm = estimate_tempo(&env, frame_rate).unwrap();
        assert!((bpm - 120.0).abs() < 5.0, "estimated {bpm}");
    }

    #[test]
    fn test_estimate_tempo_silence_is_none() {
        assert!(estimate_tempo(&vec![0.0f32; 1000], 86.0).is_none());
        assert!(estimate_tempo(&[0.1, 0.2], 86.0).is_none());
    }

    #[test]
    fn test_track_beats_monotonic_and_spaced() {
        let frame_rate = 44100.0 / 512.0;
        let env = click_envelope(43, 860);
        let beats = track_beats(&env, 120.0, frame_rate);
        assert!(beats.len() >= 15);
        assert!(beats.windows(2).all(|w| w[1] > w[0]));
        // inter-beat intervals hover around the 0.5s period
        for pair in beats.windows(2) {
            let gap = pair[1] - pair[0];
            assert!((0.3..0.8).contains(&gap), "gap {gap}");
        }
    }

    #[test]
    fn test_track_beats_degenerate_inputs() {
        assert!(track_beats(&[], 120.0, 86.0).is_empty());
        assert!(track_beats(&[1.0, 0.0], 0.0, 86.0).is_empty());
    }

    #[test]
    fn test_group_bars_keeps_partial_tail() {
        let beats: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let bars = group_bars(&beats, 4);
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].len(), 4);
        assert_eq!(bars[2].len(), 2);
        let flat: Vec<f64> = bars.into_iter().flatten().collect();
        assert_eq!(flat, beats);
    }

    #[test]
    fn test_group_bars_three_beat_meter() {
        let beats: Vec<f64> = (0..6).map(|i| i as f64).collect();
        assert_eq!(group_bars(&beats, 3).len(), 2);
    }
}
