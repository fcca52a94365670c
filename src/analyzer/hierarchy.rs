//! Rhythm hierarchy and meter inference.
//!
//! Autocorrelation peaks are placed relative to the perceived beat: a peak at
//! half the beat period is a subdivision, one at four beat periods is a bar.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::periodicity::AutocorrelationProfile;

/// Peaks weaker than this fraction of the global maximum are ignored.
const MIN_PEAK_STRENGTH: f64 = 0.15;
/// Peaks at lags shorter than this (seconds) are ignored.
const MIN_PEAK_LAG: f64 = 0.08;
/// Layers outside this BPM range are discarded.
const LAYER_MIN_BPM: f64 = 10.0;
const LAYER_MAX_BPM: f64 = 600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RhythmLevel {
    Micro,
    FastSubdivision,
    Subdivision,
    Beat,
    SlowPulse,
    Bar,
}

impl RhythmLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Micro => "micro",
            Self::FastSubdivision => "fast_subdivision",
            Self::Subdivision => "subdivision",
            Self::Beat => "beat",
            Self::SlowPulse => "slow_pulse",
            Self::Bar => "bar",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RhythmLayer {
    pub level: RhythmLevel,
    pub bpm: f64,
    pub period_seconds: f64,
    pub strength: f64,
    pub ratio_to_beat: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RhythmHierarchy {
    pub reference_beat_bpm: f64,
    /// Ordered by increasing period.
    pub layers: Vec<RhythmLayer>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutocorrPeak {
    pub lag: f64,
    pub strength: f64,
}

/// Strict local maxima of the profile above the strength and lag floors.
pub fn find_peaks(profile: &AutocorrelationProfile) -> Vec<AutocorrPeak> {
    let corr = &profile.values;
    if corr.len() < 3 {
        return Vec::new();
    }
    let max_corr = corr.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    (1..corr.len() - 1)
        .filter(|&i| corr[i] > corr[i - 1] && corr[i] > corr[i + 1])
        .filter(|&i| corr[i] >= MIN_PEAK_STRENGTH * max_corr && profile.lag_time(i) >= MIN_PEAK_LAG)
        .map(|i| AutocorrPeak {
            lag: profile.lag_time(i),
            strength: corr[i],
        })
        .collect()
}

/// Classify a periodicity by `beat_period / lag`. Bands are half-open with the
/// lower edge inclusive.
pub fn classify_layer(ratio: f64) -> RhythmLevel {
    if ratio >= 4.0 {
        RhythmLevel::Micro
    } else if ratio >= 2.5 {
        RhythmLevel::FastSubdivision
    } else if ratio >= 1.5 {
        RhythmLevel::Subdivision
    } else if ratio >= 0.9 {
        RhythmLevel::Beat
    } else if ratio >= 0.6 {
        RhythmLevel::SlowPulse
    } else {
        RhythmLevel::Bar
    }
}

/// Build a beat-anchored hierarchy from the tempo estimator's profile.
///
/// Layers are deduplicated by BPM rounded to the nearest integer, keeping the
/// strongest peak per bucket.
pub fn build_hierarchy(profile: &AutocorrelationProfile, perceived_bpm: f64) -> RhythmHierarchy {
    let beat_period = 60.0 / perceived_bpm;

    let mut unique: BTreeMap<i64, RhythmLayer> = BTreeMap::new();
    for peak in find_peaks(profile) {
        let bpm = 60.0 / peak.lag;
        if !(LAYER_MIN_BPM..=LAYER_MAX_BPM).contains(&bpm) {
            continue;
        }

        let ratio = beat_period / peak.lag;
        let layer = RhythmLayer {
            level: classify_layer(ratio),
            bpm,
            period_seconds: peak.lag,
            strength: peak.strength,
            ratio_to_beat: ratio,
        };

        let key = bpm.round() as i64;
        match unique.get(&key) {
            Some(existing) if existing.strength >= layer.strength => {}
            _ => {
                unique.insert(key, layer);
            }
        }
    }

    let mut layers: Vec<RhythmLayer> = unique.into_values().collect();
    layers.sort_by(|a, b| a.period_seconds.total_cmp(&b.period_seconds));

    log::debug!(
        "Rhythm hierarchy: {} layers around {:.2} BPM",
        layers.len(),
        perceived_bpm
    );

    RhythmHierarchy {
        reference_beat_bpm: perceived_bpm,
        layers,
    }
}

// ── Meter ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeSignature {
    #[serde(rename = "4/4")]
    FourFour,
    #[serde(rename = "3/4")]
    ThreeFour,
}

impl TimeSignature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FourFour => "4/4",
            Self::ThreeFour => "3/4",
        }
    }

    pub fn beats_per_bar(&self) -> u8 {
        match self {
            Self::FourFour => 4,
            Self::ThreeFour => 3,
        }
    }
}

impl std::fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Meter {
    pub time_signature: TimeSignature,
    pub beats_per_bar: u8,
    pub confidence: f64,
}

impl Meter {
    fn new(time_signature: TimeSignature, confidence: f64) -> Self {
        Self {
            time_signature,
            beats_per_bar: time_signature.beats_per_bar(),
            confidence,
        }
    }
}

/// Pulse evidence found in the hierarchy.
struct PulseEvidence {
    bpm: f64,
    binary: bool,
    ternary: bool,
}

type MeterRule = (fn(&PulseEvidence) -> bool, TimeSignature, f64);

fn binary_in_beat_range(e: &PulseEvidence) -> bool {
    (60.0..=120.0).contains(&e.bpm) && e.binary
}

fn ternary_only(e: &PulseEvidence) -> bool {
    e.ternary && !e.binary
}

/// Evaluated in order, first match wins.
const METER_RULES: &[MeterRule] = &[
    (binary_in_beat_range, TimeSignature::FourFour, 0.85),
    (ternary_only, TimeSignature::ThreeFour, 0.8),
];

const DEFAULT_METER_CONFIDENCE: f64 = 0.6;

/// Ratio to the beat at report precision (two decimals).
fn reported_ratio(layer: &RhythmLayer) -> f64 {
    (layer.ratio_to_beat * 100.0).round() / 100.0
}

/// Binary pulse: a layer at ~2× the beat rate with strength > 0.15.
/// Ternary pulse: a layer at ~3× with strength > 0.25.
/// Ratios are compared at two-decimal precision.
pub fn infer_meter(perceived_bpm: f64, hierarchy: &RhythmHierarchy) -> Meter {
    let evidence = PulseEvidence {
        bpm: perceived_bpm,
        binary: hierarchy
            .layers
            .iter()
            .any(|l| (reported_ratio(l) - 2.0).abs() < 0.2 && l.strength > 0.15),
        ternary: hierarchy
            .layers
            .iter()
            .any(|l| (reported_ratio(l) - 3.0).abs() < 0.2 && l.strength > 0.25),
    };

    METER_RULES
        .iter()
        .find(|(rule, _, _)| rule(&evidence))
        .map(|&(_, sig, confidence)| Meter::new(sig, confidence))
        .unwrap_or(Meter::new(TimeSignature::FourFour, DEFAULT_METER_CONFIDENCE))
}
