use crate::store::models::PitchClass;

use super::dsp;

/// Mel bands feeding the MFCC computation.
pub const NUM_MEL_BANDS: usize = 40;

/// Cepstral coefficients kept per frame.
pub const NUM_MFCC: usize = 13;

/// Pitch range mapped into chroma bins: A0 through C8.
const CHROMA_MIN_HZ: f32 = 27.5;
const CHROMA_MAX_HZ: f32 = 4186.0;

/// Per-frame chroma energy: fold every STFT bin in the audible pitch range
/// onto its nearest pitch class and accumulate squared magnitude.
pub fn chroma_frames(
    magnitudes: &[Vec<f32>],
    sample_rate: u32,
    frame_size: usize,
) -> Vec<[f32; 12]> {
    let bin_hz = sample_rate as f32 / frame_size as f32;
    magnitudes
        .iter()
        .map(|frame| {
            let mut bins = [0.0f32; 12];
            for (k, &mag) in frame.iter().enumerate().skip(1) {
                let hz = k as f32 * bin_hz;
                if !(CHROMA_MIN_HZ..=CHROMA_MAX_HZ).contains(&hz) {
                    continue;
                }
                let midi = (69.0 + 12.0 * (hz / 440.0).log2()).round() as i32;
                bins[midi.rem_euclid(12) as usize] += mag * mag;
            }
            bins
        })
        .collect()
}

/// Pick the key as the pitch class with maximum time-averaged chroma
/// energy. Ties resolve to the lowest pitch-class index, so C wins over
/// C#, C# over D, and so on down the bin order.
pub fn estimate_key(chroma: &[[f32; 12]]) -> Option<PitchClass> {
    if chroma.is_empty() {
        return None;
    }
    let mut mean = [0.0f32; 12];
    for frame in chroma {
        for (bin, &v) in frame.iter().enumerate() {
            mean[bin] += v;
        }
    }
    dsp::argmax(&mean).map(PitchClass::from_index)
}

/// Per-frame MFCCs from a log-mel spectrogram.
pub fn mfcc_frames(log_mel: &[Vec<f32>]) -> Vec<Vec<f32>> {
    log_mel
        .iter()
        .map(|frame| dsp::dct_ii(frame, NUM_MFCC))
        .collect()
}

/// Cluster consecutive feature frames into `k` contiguous sections by
/// repeatedly merging the cheapest adjacent pair of segments (Ward-style
/// cost: squared centroid distance weighted by the harmonic segment size).
/// Returns the section start frames in order; the first is always 0.
pub fn segment_boundaries(frames: &[Vec<f32>], k: usize) -> Vec<usize> {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    if frames.is_empty() || k == 0 {
        return Vec::new();
    }
    let k = k.min(frames.len());
    let n = frames.len();

    // Segment state, indexed by the segment's first frame. Merging always
    // folds the right segment into the left, so indices stay stable.
    let mut count = vec![1usize; n];
    let mut sum: Vec<Vec<f32>> = frames.to_vec();
    let mut alive = vec![true; n];
    let mut stamp = vec![0u64; n];
    let mut prev: Vec<isize> = (0..n as isize).map(|i| i - 1).collect();
    let mut next: Vec<isize> = (1..=n as isize).map(|i| if i < n as isize { i } else { -1 }).collect();

    let cost = |count: &[usize], sum: &[Vec<f32>], a: usize, b: usize| -> f32 {
        let (na, nb) = (count[a] as f32, count[b] as f32);
        let dist_sq: f32 = sum[a]
            .iter()
            .zip(&sum[b])
            .map(|(&sa, &sb)| {
                let d = sa / na - sb / nb;
                d * d
            })
            .sum();
        dist_sq * (na * nb) / (na + nb)
    };

    #[derive(Debug)]
    struct Candidate {
        cost: f32,
        left: usize,
        right: usize,
        left_stamp: u64,
        right_stamp: u64,
    }
    impl PartialEq for Candidate {
        fn eq(&self, other: &Self) -> bool {
            self.cmp(other) == std::cmp::Ordering::Equal
        }
    }
    impl Eq for Candidate {}
    impl Ord for Candidate {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.cost
                .total_cmp(&other.cost)
                .then_with(|| self.left.cmp(&other.left))
        }
    }
    impl PartialOrd for Candidate {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }

    let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(n);
    for i in 0..n.saturating_sub(1) {
        heap.push(Reverse(Candidate {
            cost: cost(&count, &sum, i, i + 1),
            left: i,
            right: i + 1,
            left_stamp: 0,
            right_stamp: 0,
        }));
    }

    let mut segments = n;
    while segments > k {
        let Some(Reverse(cand)) = heap.pop() else {
            break;
        };
        let (l, r) = (cand.left, cand.right);
        let valid = alive[l]
            && alive[r]
            && next[l] == r as isize
            && stamp[l] == cand.left_stamp
            && stamp[r] == cand.right_stamp;
        if !valid {
            continue;
        }

        // fold r into l
        count[l] += count[r];
        let (left_sums, right_sums) = sum.split_at_mut(r);
        for (sl, sr) in left_sums[l].iter_mut().zip(&right_sums[0]) {
            *sl += *sr;
        }
        alive[r] = false;
        stamp[l] += 1;
        next[l] = next[r];
        if next[r] >= 0 {
            prev[next[r] as usize] = l as isize;
        }
        segments -= 1;

        if prev[l] >= 0 {
            let p = prev[l] as usize;
            heap.push(Reverse(Candidate {
                cost: cost(&count, &sum, p, l),
                left: p,
                right: l,
                left_stamp: stamp[p],
                right_stamp: stamp[l],
            }));
        }
        if next[l] >= 0 {
            let q = next[l] as usize;
            heap.push(Reverse(Candidate {
                cost: cost(&count, &sum, l, q),
                left: l,
                right: q,
                left_stamp: stamp[l],
                right_stamp: stamp[q],
            }));
        }
    }

    let mut boundaries = Vec::with_capacity(k);
    let mut i = 0isize;
    while i >= 0 {
        boundaries.push(i as usize);
        i = next[i as usize];
    }
    boundaries
}

/// Average RMS energy inside each section's time range. Section `i` spans
/// `[sections[i], sections[i+1])`; the last section runs to the final
/// frame time. A section with no frames scores 0.0.
pub fn energy_by_section(
    rms: &[f32],
    frame_times: &[f64],
    sections: &[f64],
) -> Vec<(f64, f64)> {
    let mut out = Vec::with_capacity(sections.len());
    if sections.is_empty() {
        return out;
    }
    let final_time = frame_times.last().copied().unwrap_or(0.0);

    for (i, &start) in sections.iter().enumerate() {
        let end = if i + 1 < sections.len() {
            sections[i + 1]
        } else {
            final_time
        };
        let mut total = 0.0f64;
        let mut frames = 0usize;
        for (&value, &t) in rms.iter().zip(frame_times) {
            if t >= start && t < end {
                total += value as f64;
                frames += 1;
            }
        }
        let avg = if frames > 0 { total / frames as f64 } else { 0.0 };
        out.push((start, avg));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chroma_maps_bin_to_pitch_class() {
        // bin 20 at 44100/2048 per bin is ~430.7 Hz, nearest pitch A
        let mut frame = vec![0.0f32; 1025];
        frame[20] = 1.0;
        let chroma = chroma_frames(&[frame], 44100, 2048);
        assert_eq!(dsp::argmax(&chroma[0]), Some(9));
    }

    #[test]
    fn test_chroma_ignores_out_of_range_bins() {
        // DC and near-DC bins carry no pitch
        let mut frame = vec![0.0f32; 1025];
        frame[0] = 10.0;
        let chroma = chroma_frames(&[frame], 44100, 2048);
        assert!(chroma[0].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_estimate_key_always_a_known_label() {
        let mut frame = [0.0f32; 12];
        frame[4] = 3.0;
        let key = estimate_key(&[frame]).unwrap();
        assert_eq!(key, PitchClass::E);
        assert!(PitchClass::ALL.contains(&key));
        assert!(estimate_key(&[]).is_none());
    }

    #[test]
    fn test_estimate_key_tie_breaks_low() {
        // equal energy in C and D: the lower bin wins
        let mut frame = [0.0f32; 12];
        frame[0] = 2.0;
        frame[2] = 2.0;
        assert_eq!(estimate_key(&[frame]), Some(PitchClass::C));
    }

    #[test]
    fn test_mfcc_shape() {
        let log_mel = vec![vec![0.5f32; NUM_MEL_BANDS]; 7];
        let mfcc = mfcc_frames(&log_mel);
        assert_eq!(mfcc.len(), 7);
        assert_eq!(mfcc[0].len(), NUM_MFCC);
    }

    #[test]
    fn test_segment_boundaries_splits_at_timbre_change() {
        let mut frames: Vec<Vec<f32>> = Vec::new();
        for _ in 0..6 {
            frames.push(vec![0.0, 0.0]);
        }
        for _ in 0..6 {
            frames.push(vec![10.0, -10.0]);
        }
        assert_eq!(segment_boundaries(&frames, 2), vec![0, 6]);
    }

    #[test]
    fn test_segment_boundaries_counts() {
        let frames: Vec<Vec<f32>> = (0..40).map(|i| vec![i as f32]).collect();
        let bounds = segment_boundaries(&frames, 4);
        assert_eq!(bounds.len(), 4);
        assert_eq!(bounds[0], 0);
        assert!(bounds.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_segment_boundaries_small_inputs() {
        assert!(segment_boundaries(&[], 4).is_empty());
        let frames = vec![vec![1.0f32], vec![2.0f32]];
        assert_eq!(segment_boundaries(&frames, 4), vec![0, 1]);
    }

    #[test]
    fn test_energy_by_section_averages_ranges() {
        let rms = [1.0f32, 1.0, 2.0, 2.0];
        let times = [0.0f64, 1.0, 2.0, 3.0];
        let sections = [0.0f64, 2.0];
        let energy = energy_by_section(&rms, &times, &sections);
        assert_eq!(energy.len(), 2);
        assert_eq!(energy[0], (0.0, 1.0));
        // the last section runs to the final frame time, exclusive
        assert_eq!(energy[1], (2.0, 2.0));
    }

    #[test]
    fn test_energy_by_section_empty_section_is_zero() {
        let rms = [1.0f32, 1.0];
        let times = [0.0f64, 1.0];
        let energy = energy_by_section(&rms, &times, &[0.0, 5.0]);
        assert_eq!(energy[1], (5.0, 0.0));
    }

    #[test]
    fn test_energy_starts_match_sections() {
        let rms = [0.3f32; 10];
        let times: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        let sections = [0.0f64, 1.5, 3.0, 4.0];
        let energy = energy_by_section(&rms, &times, &sections);
        let starts: Vec<f64> = energy.iter().map(|&(s, _)| s).collect();
        assert_eq!(starts, sections);
        assert!(starts.windows(2).all(|w| w[1] > w[0]));
    }
}
