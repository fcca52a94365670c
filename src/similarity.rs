//! Cross-track structural distance and section-level similarity.
//!
//! `structure_distance` blends four sub-distances, each clamped to [0, 1]:
//! topology (form), energy arc (density per label), tempo/meter, and groove.
//! A sub-distance with no shared evidence counts as maximally dissimilar.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::analyzer::sections::{LabeledSection, SectionLabel};
use crate::fingerprint::{DENSITY_SCALE, GROOVE_SCALE, LabelMap, StructureFingerprint};

const TOPOLOGY_WEIGHT: f64 = 0.45;
const ENERGY_WEIGHT: f64 = 0.30;
const TEMPO_WEIGHT: f64 = 0.15;
const GROOVE_WEIGHT: f64 = 0.10;

const METER_MISMATCH_PENALTY: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub song_id: String,
    pub distance: f64,
}

/// The four sub-distances behind a `structure_distance`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityBreakdown {
    pub topology: f64,
    pub energy_arc: f64,
    pub tempo_meter: f64,
    pub groove: f64,
    pub total: f64,
}

fn label_sequence(fp: &StructureFingerprint) -> Vec<SectionLabel> {
    fp.sections.iter().map(|s| s.label).collect()
}

/// Positional label mismatch rate, relative length difference, and chorus-ratio gap.
///
/// Compares section labels rather than A/B/C tokens: tokens are assigned per
/// track in first-appearance order and mean nothing across tracks.
pub fn section_topology_distance(a: &StructureFingerprint, b: &StructureFingerprint) -> f64 {
    let (seq_a, seq_b) = (label_sequence(a), label_sequence(b));
    if seq_a.is_empty() || seq_b.is_empty() {
        return 1.0;
    }

    let longest = seq_a.len().max(seq_b.len()) as f64;
    let shortest = seq_a.len().min(seq_b.len());
    let len_diff = seq_a.len().abs_diff(seq_b.len()) as f64 / longest;

    let mismatches = seq_a.iter().zip(seq_b.iter()).filter(|(x, y)| x != y).count();
    let order_penalty = mismatches as f64 / shortest as f64;

    let chorus_penalty = (a.chorus_ratio - b.chorus_ratio).abs();

    (0.5 * order_penalty + 0.3 * len_diff + 0.2 * chorus_penalty).min(1.0)
}

/// Mean relative difference over labels present (and positive) in both maps.
fn shared_label_distance(a: &LabelMap, b: &LabelMap) -> f64 {
    let diffs: Vec<f64> = a
        .iter()
        .filter_map(|(label, &x)| b.get(label).map(|&y| (x, y)))
        .filter(|&(x, y)| x > 0.0 && y > 0.0)
        .map(|(x, y)| (x - y).abs() / x.max(y))
        .collect();

    if diffs.is_empty() {
        return 1.0;
    }
    (diffs.iter().sum::<f64>() / diffs.len() as f64).min(1.0)
}

pub fn energy_arc_distance(a: &StructureFingerprint, b: &StructureFingerprint) -> f64 {
    shared_label_distance(&a.avg_section_density, &b.avg_section_density)
}

/// `|log2(bpm_a / bpm_b)|` (octave distance) plus a flat meter-mismatch penalty.
pub fn tempo_meter_distance(a: &StructureFingerprint, b: &StructureFingerprint) -> f64 {
    let tempo_penalty = if a.tempo <= 0.0 || b.tempo <= 0.0 {
        1.0
    } else {
        (a.tempo / b.tempo).log2().abs()
    };
    let meter_penalty = if a.meter != b.meter { METER_MISMATCH_PENALTY } else { 0.0 };
    (tempo_penalty + meter_penalty).min(1.0)
}

pub fn groove_distance(a: &StructureFingerprint, b: &StructureFingerprint) -> f64 {
    shared_label_distance(&a.groove_profile, &b.groove_profile)
}

pub fn similarity_breakdown(a: &StructureFingerprint, b: &StructureFingerprint) -> SimilarityBreakdown {
    let topology = section_topology_distance(a, b);
    let energy_arc = energy_arc_distance(a, b);
    let tempo_meter = tempo_meter_distance(a, b);
    let groove = groove_distance(a, b);
    SimilarityBreakdown {
        topology,
        energy_arc,
        tempo_meter,
        groove,
        total: TOPOLOGY_WEIGHT * topology
            + ENERGY_WEIGHT * energy_arc
            + TEMPO_WEIGHT * tempo_meter
            + GROOVE_WEIGHT * groove,
    }
}

/// Weighted structural distance, 0 = identical. Symmetric in its arguments.
pub fn structure_distance(a: &StructureFingerprint, b: &StructureFingerprint) -> f64 {
    similarity_breakdown(a, b).total
}

/// Rank `corpus` by distance to `query` (ascending), skipping the query's own
/// song id, and keep the `top_k` closest. Distances are computed in parallel.
pub fn rank(
    query: &StructureFingerprint,
    corpus: &[StructureFingerprint],
    top_k: usize,
) -> Vec<SimilarityResult> {
    let mut results: Vec<SimilarityResult> = corpus
        .par_iter()
        .filter(|fp| fp.song_id != query.song_id)
        .map(|fp| SimilarityResult {
            song_id: fp.song_id.clone(),
            distance: structure_distance(query, fp),
        })
        .collect();

    results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    results.truncate(top_k);
    results
}

// ── Section-level similarity ──────────────────────────────────────────

const SECTION_FEATURE_NAMES: [&str; 4] = [
    "duration shape",
    "energy density",
    "groove mean",
    "groove stability",
];

/// Duration share, density, groove mean, groove std, each scaled to ~[0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SectionVector([f64; 4]);

impl SectionVector {
    pub fn distance(&self, other: &Self) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }
}

pub fn build_section_vector(section: &LabeledSection, total_duration: f64) -> SectionVector {
    let share = if total_duration > 0.0 {
        section.duration() / total_duration
    } else {
        0.0
    };
    SectionVector([
        share,
        section.section.mean_density / DENSITY_SCALE,
        section.section.mean_groove_mean / GROOVE_SCALE,
        section.section.mean_groove_std / GROOVE_SCALE,
    ])
}

fn by_label(sections: &[LabeledSection]) -> BTreeMap<SectionLabel, Vec<&LabeledSection>> {
    let mut map: BTreeMap<SectionLabel, Vec<&LabeledSection>> = BTreeMap::new();
    for s in sections {
        map.entry(s.label).or_default().push(s);
    }
    map
}

fn mean_cross_distance(
    a: &[&LabeledSection],
    b: &[&LabeledSection],
    duration_a: f64,
    duration_b: f64,
) -> Option<f64> {
    let dists: Vec<f64> = a
        .iter()
        .flat_map(move |sa| {
            let va = build_section_vector(sa, duration_a);
            b.iter()
                .map(move |sb| va.distance(&build_section_vector(sb, duration_b)))
        })
        .collect();
    if dists.is_empty() {
        None
    } else {
        Some(dists.iter().sum::<f64>() / dists.len() as f64)
    }
}

/// Mean cross-pair section distance per label present in both tracks.
/// Labels found in only one track are absent from the result.
pub fn compare_sections(
    sections_a: &[LabeledSection],
    sections_b: &[LabeledSection],
    duration_a: f64,
    duration_b: f64,
) -> BTreeMap<SectionLabel, f64> {
    let map_a = by_label(sections_a);
    let map_b = by_label(sections_b);
    let shared: BTreeSet<&SectionLabel> = map_a.keys().filter(|l| map_b.contains_key(*l)).collect();

    shared
        .into_iter()
        .filter_map(|label| {
            mean_cross_distance(&map_a[label], &map_b[label], duration_a, duration_b)
                .map(|d| (*label, d))
        })
        .collect()
}

fn label_weight(label: SectionLabel) -> f64 {
    match label {
        SectionLabel::Chorus => 0.45,
        SectionLabel::PostChorus => 0.25,
        SectionLabel::Verse => 0.20,
        SectionLabel::Breakdown => 0.10,
    }
}

/// Label-weighted average of per-label section distances, clamped to 1.
/// `None` when no label was shared.
pub fn weighted_overall_similarity(section_distances: &BTreeMap<SectionLabel, f64>) -> Option<f64> {
    let (total, weight_sum) = section_distances
        .iter()
        .fold((0.0, 0.0), |(total, weights), (&label, &dist)| {
            let w = label_weight(label);
            (total + w * dist, weights + w)
        });

    if weight_sum == 0.0 {
        return None;
    }
    Some((total / weight_sum).min(1.0))
}

/// The two section features that differ most between `a` and `b`.
pub fn explain_similarity(
    a: &LabeledSection,
    b: &LabeledSection,
    duration_a: f64,
    duration_b: f64,
) -> Vec<(&'static str, f64)> {
    let va = build_section_vector(a, duration_a);
    let vb = build_section_vector(b, duration_b);

    let mut gaps: Vec<(&'static str, f64)> = SECTION_FEATURE_NAMES
        .iter()
        .zip(va.0.iter().zip(vb.0.iter()))
        .map(|(&name, (x, y))| (name, (x - y).abs()))
        .collect();
    gaps.sort_by(|x, y| y.1.total_cmp(&x.1));
    gaps.truncate(2);
    gaps
}

fn chorus_like(sections: &[LabeledSection]) -> Vec<&LabeledSection> {
    sections.iter().filter(|s| s.label.is_chorus_like()).collect()
}

/// Mean cross-pair distance between chorus and post-chorus sections.
pub fn chorus_only_similarity(
    sections_a: &[LabeledSection],
    sections_b: &[LabeledSection],
    duration_a: f64,
    duration_b: f64,
) -> Option<f64> {
    let choruses_a = chorus_like(sections_a);
    let choruses_b = chorus_like(sections_b);
    mean_cross_distance(&choruses_a, &choruses_b, duration_a, duration_b)
}

/// Explain the first chorus-like section of each track against the other.
pub fn explain_chorus_similarity(
    sections_a: &[LabeledSection],
    sections_b: &[LabeledSection],
    duration_a: f64,
    duration_b: f64,
) -> Option<Vec<(&'static str, f64)>> {
    let sa = sections_a.iter().find(|s| s.label.is_chorus_like())?;
    let sb = sections_b.iter().find(|s| s.label.is_chorus_like())?;
    Some(explain_similarity(sa, sb, duration_a, duration_b))
}
