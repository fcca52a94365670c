use serde::{Deserialize, Serialize};

use super::sections::Section;
use crate::grouping::FirstMemberGroups;

const ALPHABET: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A section tagged with its repeated-pattern token (A, B, C, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureSegment {
    pub start: f64,
    pub end: f64,
    pub token: char,
}

/// Relative difference, 0 when both values are zero.
fn relative_gap(a: f64, b: f64) -> f64 {
    let scale = a.max(b);
    if scale <= 0.0 { 0.0 } else { (a - b).abs() / scale }
}

/// `|Δdensity| / max(density) + |ΔgrooveStd| / max(grooveStd)`.
pub fn section_distance(a: &Section, b: &Section) -> f64 {
    relative_gap(a.mean_density, b.mean_density) + relative_gap(a.mean_groove_std, b.mean_groove_std)
}

/// Group sections greedily against each group's first member and emit one
/// letter per section. At most 26 groups are created.
pub fn infer_structure(sections: &[Section], threshold: f64) -> Vec<StructureSegment> {
    let mut groups: FirstMemberGroups<&Section> = FirstMemberGroups::with_max_groups(ALPHABET.len());

    let segments: Vec<StructureSegment> = sections
        .iter()
        .map(|s| {
            let group = groups.assign(s, threshold, |a, b| section_distance(a, b));
            StructureSegment {
                start: s.start,
                end: s.end,
                token: ALPHABET[group] as char,
            }
        })
        .collect();

    log::debug!(
        "Structure: {} ({} groups)",
        tokens(&segments).iter().collect::<String>(),
        groups.len()
    );
    segments
}

pub fn tokens(segments: &[StructureSegment]) -> Vec<char> {
    segments.iter().map(|s| s.token).collect()
}
