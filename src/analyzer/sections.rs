//! Section segmentation and semantic labeling.
//!
//! Onset density and groove are measured over sliding windows; abrupt jumps in
//! that feature series become section boundaries, and each section is labeled
//! from the track's own density/groove statistics.

use serde::{Deserialize, Serialize};

use super::groove::compute_groove;
use super::{mean, sliding_windows, std_dev};

/// Windows with fewer onsets than this are skipped.
const MIN_WINDOW_ONSETS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionFeatureWindow {
    pub start: f64,
    pub end: f64,
    /// Onsets per second.
    pub onset_density: f64,
    /// Mean absolute grid deviation (ms).
    pub groove_mean: f64,
    /// Grid deviation std (ms).
    pub groove_std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionBoundary {
    pub time: f64,
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub start: f64,
    pub end: f64,
    pub mean_density: f64,
    pub mean_groove_mean: f64,
    pub mean_groove_std: f64,
}

impl Section {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Semantic section label. `Verse` is a recognised key for similarity weighting
/// but the labeling rules never emit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionLabel {
    Chorus,
    PostChorus,
    Verse,
    Breakdown,
}

impl SectionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chorus => "chorus",
            Self::PostChorus => "post_chorus",
            Self::Verse => "verse",
            Self::Breakdown => "breakdown",
        }
    }

    /// Chorus and post-chorus sections.
    pub fn is_chorus_like(&self) -> bool {
        matches!(self, Self::Chorus | Self::PostChorus)
    }
}

impl std::fmt::Display for SectionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSection {
    #[serde(flatten)]
    pub section: Section,
    pub label: SectionLabel,
}

impl LabeledSection {
    pub fn duration(&self) -> f64 {
        self.section.duration()
    }
}

/// Slide a window (50% hop) over the onset timeline and measure density and groove.
pub fn extract_features(
    onsets: &[f64],
    perceived_bpm: f64,
    window_seconds: f64,
) -> Vec<SectionFeatureWindow> {
    sliding_windows(onsets, window_seconds)
        .filter(|w| w.onsets.len() >= MIN_WINDOW_ONSETS)
        .map(|w| {
            let groove = compute_groove(w.onsets, perceived_bpm);
            SectionFeatureWindow {
                start: w.start,
                end: w.end,
                onset_density: w.onsets.len() as f64 / window_seconds,
                groove_mean: groove.mean_abs_deviation_ms,
                groove_std: groove.std_deviation_ms,
            }
        })
        .collect()
}

/// Flag change points where the jump between consecutive feature vectors
/// exceeds `mean + threshold * std` of all jumps.
///
/// A boundary sits at the end of the window before the jump. Candidates closer
/// than `min_section_seconds` to the last accepted boundary are skipped, so
/// the first detection wins over a stronger one shortly after.
pub fn detect_boundaries(
    features: &[SectionFeatureWindow],
    threshold: f64,
    min_section_seconds: f64,
) -> Vec<SectionBoundary> {
    if features.len() < 2 {
        return Vec::new();
    }

    let diffs: Vec<f64> = features
        .windows(2)
        .map(|w| {
            let dd = w[1].onset_density - w[0].onset_density;
            let dm = w[1].groove_mean - w[0].groove_mean;
            let ds = w[1].groove_std - w[0].groove_std;
            (dd * dd + dm * dm + ds * ds).sqrt()
        })
        .collect();

    let cutoff = mean(&diffs) + threshold * std_dev(&diffs);

    let mut boundaries: Vec<SectionBoundary> = Vec::new();
    for (i, &d) in diffs.iter().enumerate() {
        if d <= cutoff {
            continue;
        }
        let time = features[i].end;
        if let Some(last) = boundaries.last() {
            if time - last.time < min_section_seconds {
                continue;
            }
        }
        boundaries.push(SectionBoundary { time, strength: d });
    }

    log::debug!(
        "Section boundaries: {} of {} window transitions (cutoff {:.3})",
        boundaries.len(),
        diffs.len(),
        cutoff
    );
    boundaries
}

/// Partition the timeline at the boundaries and average the windows fully
/// contained in each span. Spans with no contained window are dropped.
pub fn aggregate(features: &[SectionFeatureWindow], boundaries: &[SectionBoundary]) -> Vec<Section> {
    let Some(last) = features.last() else {
        return Vec::new();
    };

    let mut edges = Vec::with_capacity(boundaries.len() + 2);
    edges.push(0.0);
    edges.extend(boundaries.iter().map(|b| b.time));
    edges.push(last.end);

    edges
        .windows(2)
        .filter_map(|span| {
            let (start, end) = (span[0], span[1]);
            let contained: Vec<&SectionFeatureWindow> = features
                .iter()
                .filter(|f| f.start >= start && f.end <= end)
                .collect();
            if contained.is_empty() {
                return None;
            }
            let n = contained.len() as f64;
            Some(Section {
                start,
                end,
                mean_density: contained.iter().map(|f| f.onset_density).sum::<f64>() / n,
                mean_groove_mean: contained.iter().map(|f| f.groove_mean).sum::<f64>() / n,
                mean_groove_std: contained.iter().map(|f| f.groove_std).sum::<f64>() / n,
            })
        })
        .collect()
}

// ── Labeling ──────────────────────────────────────────────────────────

/// Per-track reference statistics the labeling rules compare against.
struct LabelStats {
    max_density: f64,
    mean_density: f64,
    mean_groove_std: f64,
}

type LabelRule = (fn(&Section, &LabelStats) -> bool, SectionLabel);

fn is_chorus(s: &Section, t: &LabelStats) -> bool {
    s.mean_density > 0.85 * t.max_density && s.mean_groove_std > t.mean_groove_std
}

fn is_breakdown(s: &Section, t: &LabelStats) -> bool {
    s.mean_density < 0.75 * t.mean_density
}

/// Evaluated in order, first match wins.
const LABEL_RULES: &[LabelRule] = &[
    (is_chorus, SectionLabel::Chorus),
    (is_breakdown, SectionLabel::Breakdown),
];

const DEFAULT_LABEL: SectionLabel = SectionLabel::PostChorus;

pub fn label_sections(sections: &[Section]) -> Vec<LabeledSection> {
    if sections.is_empty() {
        return Vec::new();
    }

    let densities: Vec<f64> = sections.iter().map(|s| s.mean_density).collect();
    let groove_stds: Vec<f64> = sections.iter().map(|s| s.mean_groove_std).collect();
    let stats = LabelStats {
        max_density: densities.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean_density: mean(&densities),
        mean_groove_std: mean(&groove_stds),
    };

    sections
        .iter()
        .map(|s| {
            let label = LABEL_RULES
                .iter()
                .find(|(rule, _)| rule(s, &stats))
                .map(|&(_, label)| label)
                .unwrap_or(DEFAULT_LABEL);
            LabeledSection {
                section: s.clone(),
                label,
            }
        })
        .collect()
}
