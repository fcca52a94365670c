//! Tempo estimation from inter-onset intervals.
//!
//! The IOI sequence is autocorrelated and the strongest lag inside the valid
//! tempo range becomes the beat period. Lag index → seconds uses the mean IOI
//! as a fixed step, so the result is coarse; the rhythm hierarchy thresholds
//! are tuned against the same scale.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::mean;

/// Slowest tempo the estimator will report.
pub const MIN_BPM: f64 = 40.0;
/// Fastest tempo the estimator will report.
pub const MAX_BPM: f64 = 200.0;

/// Human perceptual beat range used to pick between octave candidates.
const PERCEPTUAL_MIN_BPM: f64 = 60.0;
const PERCEPTUAL_MAX_BPM: f64 = 120.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PeriodicityError {
    #[error("need at least 2 inter-onset intervals, got {count}")]
    TooFewIntervals { count: usize },
    #[error("no autocorrelation lag inside {min_bpm}-{max_bpm} BPM")]
    NoValidLag { min_bpm: f64, max_bpm: f64 },
}

/// Normalized autocorrelation of an IOI sequence (value at lag 0 = 1),
/// paired with the mean IOI used as the seconds-per-lag scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutocorrelationProfile {
    pub values: Vec<f64>,
    pub mean_ioi: f64,
}

impl AutocorrelationProfile {
    pub fn from_iois(iois: &[f64]) -> Self {
        Self {
            values: autocorrelation(iois),
            mean_ioi: mean(iois),
        }
    }

    /// Lag index → lag time in seconds.
    pub fn lag_time(&self, lag: usize) -> f64 {
        lag as f64 * self.mean_ioi
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoEstimate {
    pub bpm: f64,
    pub profile: AutocorrelationProfile,
}

/// Convert onset frame indices to seconds.
pub fn onset_times_from_frames(frames: &[u64], hop_length: u32, sample_rate: u32) -> Vec<f64> {
    let sr = sample_rate as f64;
    frames
        .iter()
        .map(|&f| (f as f64 * hop_length as f64) / sr)
        .collect()
}

pub fn inter_onset_intervals(onsets: &[f64]) -> Vec<f64> {
    onsets.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Zero-mean autocorrelation, non-negative lags only, normalized so lag 0 = 1.
///
/// A constant signal has no variance to correlate; it is treated as perfectly
/// periodic at every lag step: lag 0 = 1, everything else 0.
pub fn autocorrelation(signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n == 0 {
        return Vec::new();
    }

    let m = mean(signal);
    let centered: Vec<f64> = signal.iter().map(|x| x - m).collect();

    let mut corr: Vec<f64> = (0..n)
        .map(|lag| {
            centered[..n - lag]
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect();

    // Lag 0 is the energy of the signal and bounds every other lag
    let peak = corr[0];
    if peak <= f64::EPSILON {
        corr.iter_mut().for_each(|c| *c = 0.0);
        corr[0] = 1.0;
        return corr;
    }

    for c in &mut corr {
        *c /= peak;
    }
    corr
}

/// Estimate tempo over the default [`MIN_BPM`, `MAX_BPM`] range.
pub fn estimate_tempo(iois: &[f64]) -> Result<TempoEstimate, PeriodicityError> {
    estimate_tempo_in_range(iois, MIN_BPM, MAX_BPM)
}

/// Pick the autocorrelation lag with the highest value whose lag time falls in
/// the period range implied by `[min_bpm, max_bpm]`. Ties go to the shortest lag.
pub fn estimate_tempo_in_range(
    iois: &[f64],
    min_bpm: f64,
    max_bpm: f64,
) -> Result<TempoEstimate, PeriodicityError> {
    if iois.len() < 2 {
        return Err(PeriodicityError::TooFewIntervals { count: iois.len() });
    }

    let profile = AutocorrelationProfile::from_iois(iois);
    let min_period = 60.0 / max_bpm;
    let max_period = 60.0 / min_bpm;

    let mut best: Option<(usize, f64)> = None;
    for (lag, &value) in profile.values.iter().enumerate() {
        let lag_time = profile.lag_time(lag);
        if lag_time < min_period || lag_time > max_period {
            continue;
        }
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((lag, value)),
        }
    }

    let (best_lag, _) = best.ok_or(PeriodicityError::NoValidLag { min_bpm, max_bpm })?;
    let bpm = 60.0 / profile.lag_time(best_lag);

    log::debug!(
        "Tempo estimate: {:.2} BPM (lag {} of {}, mean IOI {:.4}s)",
        bpm,
        best_lag,
        profile.len(),
        profile.mean_ioi
    );

    Ok(TempoEstimate { bpm, profile })
}

/// Half, same, and double tempo, keeping those inside the valid range.
/// Autocorrelation alone cannot tell these octaves apart.
pub fn tempo_candidates(bpm: f64) -> Vec<f64> {
    [bpm / 2.0, bpm, bpm * 2.0]
        .into_iter()
        .filter(|t| (MIN_BPM..=MAX_BPM).contains(t))
        .collect()
}

/// Prefer the slowest candidate inside the perceptual beat range; otherwise the
/// slowest candidate overall. Returns `None` only for an empty candidate set.
pub fn select_perceived_tempo(candidates: &[f64]) -> Option<f64> {
    let preferred = candidates
        .iter()
        .copied()
        .filter(|t| (PERCEPTUAL_MIN_BPM..=PERCEPTUAL_MAX_BPM).contains(t))
        .reduce(f64::min);

    preferred.or_else(|| candidates.iter().copied().reduce(f64::min))
}

/// `1 / (1 + mean |ioi - period|)`: 1.0 for perfectly regular onsets.
pub fn tempo_confidence(iois: &[f64], bpm: f64) -> f64 {
    let period = 60.0 / bpm;
    let deviations: Vec<f64> = iois.iter().map(|ioi| (ioi - period).abs()).collect();
    1.0 / (1.0 + mean(&deviations))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(bpm: f64, seconds: f64) -> Vec<f64> {
        let period = 60.0 / bpm;
        let n = (seconds / period) as usize;
        (0..=n).map(|i| i as f64 * period).collect()
    }

    #[test]
    fn test_too_few_intervals() {
        assert_eq!(
            estimate_tempo(&[]).unwrap_err(),
            PeriodicityError::TooFewIntervals { count: 0 }
        );
        assert_eq!(
            estimate_tempo(&[0.5]).unwrap_err(),
            PeriodicityError::TooFewIntervals { count: 1 }
        );
    }

    #[test]
    fn test_no_valid_lag() {
        // Mean IOI of 2s puts lag 1 at 2s, beyond the 1.5s longest period
        let err = estimate_tempo(&[2.0, 2.0, 2.0]).unwrap_err();
        assert!(matches!(err, PeriodicityError::NoValidLag { .. }));
    }

    #[test]
    fn test_steady_120_bpm() {
        let onsets = click_track(120.0, 60.0);
        let iois = inter_onset_intervals(&onsets);
        let est = estimate_tempo(&iois).unwrap();
        assert!((est.bpm - 120.0).abs() < 1e-6, "got {}", est.bpm);
        assert!((est.profile.values[0] - 1.0).abs() < 1e-12);
        assert!((tempo_confidence(&iois, est.bpm) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_alternating_intervals_pick_full_cycle() {
        // Long-short pattern repeats every 2 IOIs (1.0s) → 60 BPM
        let iois: Vec<f64> = (0..64).map(|i| if i % 2 == 0 { 0.25 } else { 0.75 }).collect();
        let est = estimate_tempo(&iois).unwrap();
        assert!((est.bpm - 60.0).abs() < 1e-6, "got {}", est.bpm);
    }

    #[test]
    fn test_autocorrelation_normalized() {
        let corr = autocorrelation(&[0.4, 0.6, 0.4, 0.6, 0.4, 0.6]);
        assert_eq!(corr.len(), 6);
        assert!((corr[0] - 1.0).abs() < 1e-12);
        assert!(corr[1] < 0.0);
        assert!(corr[2] > 0.0);
        assert!(corr.iter().all(|c| (-1.0..=1.0).contains(c)));
    }

    #[test]
    fn test_tempo_candidates() {
        assert_eq!(tempo_candidates(100.0), vec![50.0, 100.0, 200.0]);
        assert_eq!(tempo_candidates(150.0), vec![75.0, 150.0]);
        assert_eq!(tempo_candidates(60.0), vec![60.0, 120.0]);
    }

    #[test]
    fn test_select_perceived_tempo() {
        assert_eq!(select_perceived_tempo(&[50.0, 100.0, 200.0]), Some(100.0));
        assert_eq!(select_perceived_tempo(&[30.0, 45.0]), Some(30.0));
        // Both in range → the slower one
        assert_eq!(select_perceived_tempo(&[60.0, 120.0]), Some(60.0));
        assert_eq!(select_perceived_tempo(&[]), None);
    }

    #[test]
    fn test_confidence_drops_with_jitter() {
        let tight = vec![0.5, 0.5, 0.5, 0.5];
        let loose = vec![0.4, 0.6, 0.45, 0.55];
        let c_tight = tempo_confidence(&tight, 120.0);
        let c_loose = tempo_confidence(&loose, 120.0);
        assert!(c_loose < c_tight);
        assert!(c_loose > 0.0);
        // mean |dev| = 0.075
        assert!((c_loose - 1.0 / 1.075).abs() < 1e-9);
    }

    #[test]
    fn test_onset_times_from_frames() {
        let times = onset_times_from_frames(&[0, 43, 86], 512, 44100);
        assert!((times[1] - 43.0 * 512.0 / 44100.0).abs() < 1e-12);
        assert_eq!(times.len(), 3);
    }
}
