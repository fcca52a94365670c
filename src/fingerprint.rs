//! Structural fingerprints: a fixed-shape summary of one track's form,
//! tempo, meter, and per-label energy/groove, used for cross-track comparison.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analyzer::hierarchy::TimeSignature;
use crate::analyzer::sections::{LabeledSection, SectionLabel};
use crate::analyzer::structure::{self, StructureSegment};
use crate::grouping::FirstMemberGroups;

/// Per-label aggregate over a closed label set.
pub type LabelMap = BTreeMap<SectionLabel, f64>;

// Vector normalization scales
const TEMPO_SCALE: f64 = 200.0;
const STRUCTURE_LEN_SCALE: f64 = 6.0;
pub(crate) const DENSITY_SCALE: f64 = 15.0;
pub(crate) const GROOVE_SCALE: f64 = 80.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureFingerprint {
    pub song_id: String,
    pub tempo: f64,
    pub meter: TimeSignature,
    /// One repeated-pattern token per section, e.g. `['A', 'B', 'A', 'C']`.
    pub structure: Vec<char>,
    pub sections: Vec<LabeledSection>,
    pub duration: f64,
    pub chorus_count: usize,
    /// Chorus seconds over track duration.
    pub chorus_ratio: f64,
    /// Total seconds per label.
    pub label_durations: LabelMap,
    pub avg_section_density: LabelMap,
    pub groove_profile: LabelMap,
}

impl StructureFingerprint {
    pub fn structure_string(&self) -> String {
        self.structure.iter().collect()
    }
}

/// Running sums for one label.
#[derive(Default)]
struct LabelAccumulator {
    seconds: f64,
    density_sum: f64,
    groove_sum: f64,
    count: usize,
}

pub fn build_fingerprint(
    song_id: &str,
    perceived_bpm: f64,
    meter: TimeSignature,
    structure: &[StructureSegment],
    labeled_sections: &[LabeledSection],
    duration: f64,
) -> StructureFingerprint {
    let mut by_label: BTreeMap<SectionLabel, LabelAccumulator> = BTreeMap::new();
    for s in labeled_sections {
        let acc = by_label.entry(s.label).or_default();
        acc.seconds += s.duration();
        acc.density_sum += s.section.mean_density;
        acc.groove_sum += s.section.mean_groove_std;
        acc.count += 1;
    }

    let chorus_seconds = by_label.get(&SectionLabel::Chorus).map_or(0.0, |a| a.seconds);
    let chorus_ratio = if duration > 0.0 { chorus_seconds / duration } else { 0.0 };

    StructureFingerprint {
        song_id: song_id.to_string(),
        tempo: perceived_bpm,
        meter,
        structure: structure::tokens(structure),
        sections: labeled_sections.to_vec(),
        duration,
        chorus_count: labeled_sections
            .iter()
            .filter(|s| s.label == SectionLabel::Chorus)
            .count(),
        chorus_ratio,
        label_durations: by_label.iter().map(|(&l, a)| (l, a.seconds)).collect(),
        avg_section_density: by_label
            .iter()
            .map(|(&l, a)| (l, a.density_sum / a.count as f64))
            .collect(),
        groove_profile: by_label
            .iter()
            .map(|(&l, a)| (l, a.groove_sum / a.count as f64))
            .collect(),
    }
}

// ── Vectors & clustering ──────────────────────────────────────────────

/// Lossy 7-D projection: tempo, chorus ratio, form length, then density and
/// groove for post-chorus and chorus sections.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FingerprintVector(pub [f64; 7]);

impl FingerprintVector {
    pub fn distance(&self, other: &Self) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }
}

pub fn vectorize(fp: &StructureFingerprint) -> FingerprintVector {
    let density = |label: SectionLabel| fp.avg_section_density.get(&label).copied().unwrap_or(0.0);
    let groove = |label: SectionLabel| fp.groove_profile.get(&label).copied().unwrap_or(0.0);

    FingerprintVector([
        fp.tempo / TEMPO_SCALE,
        fp.chorus_ratio,
        fp.structure.len() as f64 / STRUCTURE_LEN_SCALE,
        density(SectionLabel::PostChorus) / DENSITY_SCALE,
        density(SectionLabel::Chorus) / DENSITY_SCALE,
        groove(SectionLabel::PostChorus) / GROOVE_SCALE,
        groove(SectionLabel::Chorus) / GROOVE_SCALE,
    ])
}

/// Greedy first-member clustering; returns clusters as indices into `vectors`.
pub fn cluster_fingerprints(vectors: &[FingerprintVector], threshold: f64) -> Vec<Vec<usize>> {
    let mut groups: FirstMemberGroups<&FingerprintVector> = FirstMemberGroups::new();
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for (i, v) in vectors.iter().enumerate() {
        let group = groups.assign(v, threshold, |a, b| a.distance(b));
        if group == clusters.len() {
            clusters.push(Vec::new());
        }
        clusters[group].push(i);
    }
    clusters
}

// ── Archetype ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    ContrastAnthem,
    SustainedEnergy,
    NarrativeBuild,
    HybridForm,
}

impl Archetype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContrastAnthem => "contrast_anthem",
            Self::SustainedEnergy => "sustained_energy",
            Self::NarrativeBuild => "narrative_build",
            Self::HybridForm => "hybrid_form",
        }
    }
}

impl std::fmt::Display for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type ArchetypeRule = (fn(&StructureFingerprint) -> bool, Archetype);

fn is_contrast_anthem(fp: &StructureFingerprint) -> bool {
    fp.chorus_ratio > 0.3 && fp.structure.len() == 3
}

fn is_sustained_energy(fp: &StructureFingerprint) -> bool {
    fp.chorus_ratio == 0.0 && fp.structure.len() >= 3
}

fn is_narrative_build(fp: &StructureFingerprint) -> bool {
    fp.chorus_ratio < 0.2
}

/// Evaluated in order, first match wins.
const ARCHETYPE_RULES: &[ArchetypeRule] = &[
    (is_contrast_anthem, Archetype::ContrastAnthem),
    (is_sustained_energy, Archetype::SustainedEnergy),
    (is_narrative_build, Archetype::NarrativeBuild),
];

pub fn infer_archetype(fp: &StructureFingerprint) -> Archetype {
    ARCHETYPE_RULES
        .iter()
        .find(|(rule, _)| rule(fp))
        .map(|&(_, archetype)| archetype)
        .unwrap_or(Archetype::HybridForm)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::analyzer::sections::Section;

    pub(crate) fn labeled(start: f64, end: f64, label: SectionLabel, density: f64, groove: f64) -> LabeledSection {
        LabeledSection {
            section: Section {
                start,
                end,
                mean_density: density,
                mean_groove_mean: groove,
                mean_groove_std: groove,
            },
            label,
        }
    }

    fn segments(tokens: &str, sections: &[LabeledSection]) -> Vec<StructureSegment> {
        tokens
            .chars()
            .zip(sections)
            .map(|(token, s)| StructureSegment {
                start: s.section.start,
                end: s.section.end,
                token,
            })
            .collect()
    }

    /// Verse-chorus-verse style track used across fingerprint and similarity tests.
    pub(crate) fn make_fingerprint(song_id: &str, tempo: f64) -> StructureFingerprint {
        let sections = vec![
            labeled(0.0, 40.0, SectionLabel::PostChorus, 4.0, 20.0),
            labeled(40.0, 80.0, SectionLabel::Chorus, 8.0, 30.0),
            labeled(80.0, 120.0, SectionLabel::PostChorus, 6.0, 10.0),
            labeled(120.0, 150.0, SectionLabel::Breakdown, 2.0, 40.0),
        ];
        build_fingerprint(
            song_id,
            tempo,
            TimeSignature::FourFour,
            &segments("ABAC", &sections),
            &sections,
            160.0,
        )
    }

    #[test]
    fn test_build_fingerprint_aggregates() {
        let fp = make_fingerprint("song", 100.0);
        assert_eq!(fp.structure, vec!['A', 'B', 'A', 'C']);
        assert_eq!(fp.chorus_count, 1);
        assert!((fp.chorus_ratio - 0.25).abs() < 1e-12);
        assert!((fp.label_durations[&SectionLabel::PostChorus] - 80.0).abs() < 1e-12);
        assert!((fp.avg_section_density[&SectionLabel::PostChorus] - 5.0).abs() < 1e-12);
        assert!((fp.groove_profile[&SectionLabel::PostChorus] - 15.0).abs() < 1e-12);
        assert!((fp.avg_section_density[&SectionLabel::Chorus] - 8.0).abs() < 1e-12);
        assert!(!fp.avg_section_density.contains_key(&SectionLabel::Verse));
    }

    #[test]
    fn test_zero_duration_has_no_chorus_ratio() {
        let fp = build_fingerprint("empty", 100.0, TimeSignature::FourFour, &[], &[], 0.0);
        assert_eq!(fp.chorus_ratio, 0.0);
        assert!(fp.structure.is_empty());
        assert!(fp.groove_profile.is_empty());
    }

    #[test]
    fn test_vectorize() {
        let fp = make_fingerprint("song", 100.0);
        let v = vectorize(&fp);
        let expected = [0.5, 0.25, 4.0 / 6.0, 5.0 / 15.0, 8.0 / 15.0, 15.0 / 80.0, 30.0 / 80.0];
        for (got, want) in v.0.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }
        // Deterministic
        assert_eq!(vectorize(&fp), vectorize(&fp.clone()));
    }

    #[test]
    fn test_cluster_fingerprints() {
        let a = FingerprintVector([0.5, 0.2, 0.6, 0.3, 0.5, 0.2, 0.3]);
        let mut b = a;
        b.0[0] = 0.55;
        let c = FingerprintVector([0.9, 0.0, 1.0, 0.1, 0.0, 0.5, 0.0]);
        let clusters = cluster_fingerprints(&[a, c, b], 0.25);
        assert_eq!(clusters, vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn test_archetype_rules() {
        let mut fp = make_fingerprint("song", 100.0);

        fp.chorus_ratio = 0.4;
        fp.structure = vec!['A', 'B', 'A'];
        assert_eq!(infer_archetype(&fp), Archetype::ContrastAnthem);

        fp.chorus_ratio = 0.0;
        assert_eq!(infer_archetype(&fp), Archetype::SustainedEnergy);

        fp.structure = vec!['A', 'B'];
        assert_eq!(infer_archetype(&fp), Archetype::NarrativeBuild);

        fp.chorus_ratio = 0.25;
        assert_eq!(infer_archetype(&fp), Archetype::HybridForm);

        // High chorus ratio but not three tokens
        fp.chorus_ratio = 0.4;
        fp.structure = vec!['A', 'B', 'A', 'B'];
        assert_eq!(infer_archetype(&fp), Archetype::HybridForm);
    }

    #[test]
    fn test_fingerprint_json_roundtrip() {
        let fp = make_fingerprint("song", 100.0);
        let json = serde_json::to_string(&fp).unwrap();
        assert!(json.contains("\"meter\":\"4/4\""));
        assert!(json.contains("\"post_chorus\""));
        let back: StructureFingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }
}
