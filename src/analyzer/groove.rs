//! Micro-timing (groove) and tempo drift relative to the perceived beat grid.

use serde::{Deserialize, Serialize};

use super::{mean, median, sliding_windows, std_dev};

/// Onsets farther than this fraction of a beat period from the grid are not beat-aligned.
const GRID_TOLERANCE: f64 = 0.15;
/// Stricter alignment in beat units, applied by the groove metrics only.
const GRID_RATIO_TOLERANCE: f64 = 0.1;
/// Local tempi further than this fraction from the perceived tempo are octave/outlier windows.
const DRIFT_TOLERANCE: f64 = 0.25;
/// Fewer stable windows than this → no aggregate drift statistics.
const MIN_STABLE_WINDOWS: usize = 5;
/// Mean deviation (BPM) beyond which the performance pushes or pulls.
const BIAS_THRESHOLD_BPM: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrooveMetrics {
    pub mean_abs_deviation_ms: f64,
    pub std_deviation_ms: f64,
    pub max_deviation_ms: f64,
    pub swing_ratio: Option<f64>,
    /// Number of onsets that passed the beat-alignment filter.
    pub aligned_onsets: usize,
}

/// Signed offset of each onset from its nearest grid beat, in seconds.
fn grid_deviations(onsets: &[f64], beat_period: f64) -> impl Iterator<Item = (f64, f64)> + '_ {
    onsets.iter().map(move |&t| {
        let index = (t / beat_period).round();
        (t, t - index * beat_period)
    })
}

/// Timing deviation statistics of beat-aligned onsets plus the even/odd IOI swing ratio.
///
/// Deviations are zero when no onset is close enough to the grid; check
/// `aligned_onsets` to tell that apart from a perfectly quantized track.
pub fn compute_groove(onsets: &[f64], perceived_bpm: f64) -> GrooveMetrics {
    let beat_period = 60.0 / perceived_bpm;

    let deviations: Vec<f64> = grid_deviations(onsets, beat_period)
        .filter(|&(_, dev)| {
            dev.abs() < GRID_TOLERANCE * beat_period && (dev / beat_period).abs() < GRID_RATIO_TOLERANCE
        })
        .map(|(_, dev)| dev)
        .collect();

    let abs_dev: Vec<f64> = deviations.iter().map(|d| d.abs()).collect();
    let max_abs = abs_dev.iter().copied().fold(0.0_f64, f64::max);

    GrooveMetrics {
        mean_abs_deviation_ms: mean(&abs_dev) * 1000.0,
        std_deviation_ms: std_dev(&deviations) * 1000.0,
        max_deviation_ms: max_abs * 1000.0,
        swing_ratio: swing_ratio(onsets),
        aligned_onsets: deviations.len(),
    }
}

/// Mean of even-indexed IOIs over mean of odd-indexed IOIs; needs at least 4 IOIs.
pub fn swing_ratio(onsets: &[f64]) -> Option<f64> {
    let iois = super::periodicity::inter_onset_intervals(onsets);
    if iois.len() < 4 {
        return None;
    }
    let even: Vec<f64> = iois.iter().step_by(2).copied().collect();
    let odd: Vec<f64> = iois.iter().skip(1).step_by(2).copied().collect();
    if even.is_empty() || odd.is_empty() {
        return None;
    }
    let odd_mean = mean(&odd);
    if odd_mean <= 0.0 {
        return None;
    }
    Some(mean(&even) / odd_mean)
}

// ── Tempo drift ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftWindow {
    pub start: f64,
    pub end: f64,
    pub bpm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoBias {
    Push,
    Pull,
    Neutral,
}

impl TempoBias {
    pub fn from_mean_deviation(mean_deviation_bpm: f64) -> Self {
        if mean_deviation_bpm > BIAS_THRESHOLD_BPM {
            Self::Push
        } else if mean_deviation_bpm < -BIAS_THRESHOLD_BPM {
            Self::Pull
        } else {
            Self::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSummary {
    pub mean_local_bpm: f64,
    pub std_local_bpm: f64,
    pub max_deviation_bpm: f64,
    pub mean_deviation_bpm: f64,
    pub bias: TempoBias,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriftStatistics {
    /// Too few stable windows; only the raw per-window tempi are reported.
    Insufficient { stable_windows: usize, note: String },
    Stable(DriftSummary),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub window_seconds: f64,
    pub windows: Vec<DriftWindow>,
    pub statistics: DriftStatistics,
}

impl DriftReport {
    pub fn summary(&self) -> Option<&DriftSummary> {
        match &self.statistics {
            DriftStatistics::Stable(s) => Some(s),
            DriftStatistics::Insufficient { .. } => None,
        }
    }
}

/// Local tempo per sliding window (50% hop) from the median IOI of beat-aligned
/// onsets. Returns `None` when no window yields a usable local tempo.
pub fn compute_drift(onsets: &[f64], perceived_bpm: f64, window_seconds: f64) -> Option<DriftReport> {
    let beat_period = 60.0 / perceived_bpm;

    let windows: Vec<DriftWindow> = sliding_windows(onsets, window_seconds)
        .filter(|w| w.onsets.len() >= 3)
        .filter_map(|w| {
            let beat_onsets: Vec<f64> = grid_deviations(w.onsets, beat_period)
                .filter(|&(_, dev)| dev.abs() < GRID_TOLERANCE * beat_period)
                .map(|(t, _)| t)
                .collect();
            if beat_onsets.len() < 3 {
                return None;
            }

            let iois = super::periodicity::inter_onset_intervals(&beat_onsets);
            let local_bpm = 60.0 / median(&iois);
            if (local_bpm - perceived_bpm).abs() > DRIFT_TOLERANCE * perceived_bpm {
                return None;
            }

            Some(DriftWindow {
                start: w.start,
                end: w.end,
                bpm: local_bpm,
            })
        })
        .collect();

    if windows.is_empty() {
        log::debug!("Tempo drift: no stable windows");
        return None;
    }

    if windows.len() < MIN_STABLE_WINDOWS {
        return Some(DriftReport {
            window_seconds,
            statistics: DriftStatistics::Insufficient {
                stable_windows: windows.len(),
                note: "Insufficient stable beat windows for global drift statistics".to_string(),
            },
            windows,
        });
    }

    let local_bpms: Vec<f64> = windows.iter().map(|w| w.bpm).collect();
    let drift: Vec<f64> = local_bpms.iter().map(|b| b - perceived_bpm).collect();
    let mean_deviation_bpm = mean(&drift);

    let summary = DriftSummary {
        mean_local_bpm: mean(&local_bpms),
        std_local_bpm: std_dev(&local_bpms),
        max_deviation_bpm: drift.iter().map(|d| d.abs()).fold(0.0, f64::max),
        mean_deviation_bpm,
        bias: TempoBias::from_mean_deviation(mean_deviation_bpm),
    };

    log::debug!(
        "Tempo drift over {} windows: mean {:+.2} BPM ({:?})",
        windows.len(),
        summary.mean_deviation_bpm,
        summary.bias
    );

    Some(DriftReport {
        window_seconds,
        windows,
        statistics: DriftStatistics::Stable(summary),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(bpm: f64, seconds: f64) -> Vec<f64> {
        let period = 60.0 / bpm;
        let n = (seconds / period).round() as usize;
        (0..=n).map(|i| i as f64 * period).collect()
    }

    #[test]
    fn test_groove_perfect_grid() {
        let onsets = click_track(120.0, 30.0);
        let g = compute_groove(&onsets, 120.0);
        assert!(g.mean_abs_deviation_ms.abs() < 1e-9);
        assert!(g.std_deviation_ms.abs() < 1e-9);
        assert!(g.max_deviation_ms.abs() < 1e-9);
        assert!((g.swing_ratio.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(g.aligned_onsets, onsets.len());
    }

    #[test]
    fn test_groove_filters_off_grid_onsets() {
        // 10ms late on every beat, plus an off-beat fill at 0.25s past beat 2
        let onsets = vec![0.01, 0.51, 1.01, 1.25, 1.51, 2.01];
        let g = compute_groove(&onsets, 120.0);
        assert_eq!(g.aligned_onsets, 5);
        assert!((g.mean_abs_deviation_ms - 10.0).abs() < 1e-6);
        assert!((g.max_deviation_ms - 10.0).abs() < 1e-6);
        assert!(g.std_deviation_ms.abs() < 1e-6);
    }

    #[test]
    fn test_groove_no_aligned_onsets() {
        let onsets = vec![0.25, 0.75, 1.25];
        let g = compute_groove(&onsets, 120.0);
        assert_eq!(g.aligned_onsets, 0);
        assert_eq!(g.mean_abs_deviation_ms, 0.0);
        assert_eq!(g.swing_ratio, None);
    }

    #[test]
    fn test_swing_ratio_long_short() {
        // 2:1 long-short pattern
        let mut onsets = vec![0.0];
        for i in 0..8 {
            let step = if i % 2 == 0 { 0.4 } else { 0.2 };
            onsets.push(onsets.last().unwrap() + step);
        }
        assert!((swing_ratio(&onsets).unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(swing_ratio(&[0.0, 0.5, 1.0, 1.5]), None);
    }

    #[test]
    fn test_drift_stable_click() {
        let onsets = click_track(120.0, 60.0);
        let report = compute_drift(&onsets, 120.0, 12.0).unwrap();
        // Windows start every 6s while start + 12 <= 60
        assert_eq!(report.windows.len(), 9);
        let summary = report.summary().unwrap();
        assert!((summary.mean_local_bpm - 120.0).abs() < 1e-6);
        assert!(summary.max_deviation_bpm < 1e-6);
        assert_eq!(summary.bias, TempoBias::Neutral);
    }

    #[test]
    fn test_drift_rushing_track_pushes() {
        // Beats land 0, 20 and 40ms early in turn: IOIs cycle 0.48, 0.48, 0.54,
        // so every window's median IOI is 0.48s (125 BPM) against a 120 BPM grid.
        let onsets: Vec<f64> = (0..=120)
            .map(|i| i as f64 * 0.5 - 0.02 * (i % 3) as f64)
            .collect();
        let report = compute_drift(&onsets, 120.0, 12.0).unwrap();
        assert_eq!(report.windows.len(), 9);
        let summary = report.summary().unwrap();
        assert!((summary.mean_deviation_bpm - 5.0).abs() < 1e-6);
        assert!((summary.mean_local_bpm - 125.0).abs() < 1e-6);
        assert_eq!(summary.bias, TempoBias::Push);
    }

    #[test]
    fn test_drift_insufficient_windows() {
        let onsets = click_track(120.0, 30.0);
        let report = compute_drift(&onsets, 120.0, 12.0).unwrap();
        assert_eq!(report.windows.len(), 4);
        assert!(report.summary().is_none());
        match report.statistics {
            DriftStatistics::Insufficient { stable_windows, .. } => assert_eq!(stable_windows, 4),
            DriftStatistics::Stable(_) => panic!("expected insufficient"),
        }
    }

    #[test]
    fn test_drift_rejects_octave_windows() {
        // Against 60 BPM only the whole-second onsets sit on the grid and the
        // median IOI gives 60 → kept. Against 90 BPM the aligned onsets are 2s
        // apart (30 BPM), outside 25%, so every window is dropped.
        let onsets = click_track(120.0, 60.0);
        assert!(compute_drift(&onsets, 60.0, 12.0).is_some());
        assert!(compute_drift(&onsets, 90.0, 12.0).is_none());
        // Shorter than one window
        assert!(compute_drift(&onsets[..10], 120.0, 12.0).is_none());
    }

    #[test]
    fn test_bias_classification() {
        assert_eq!(TempoBias::from_mean_deviation(0.8), TempoBias::Push);
        assert_eq!(TempoBias::from_mean_deviation(-0.8), TempoBias::Pull);
        assert_eq!(TempoBias::from_mean_deviation(0.5), TempoBias::Neutral);
        assert_eq!(TempoBias::from_mean_deviation(-0.2), TempoBias::Neutral);
    }
}
