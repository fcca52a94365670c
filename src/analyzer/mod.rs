pub mod groove;
pub mod hierarchy;
pub mod periodicity;
pub mod sections;
pub mod structure;

use crate::config::AnalysisConfig;
use crate::db::FingerprintStore;
use crate::fingerprint::{self, Archetype, StructureFingerprint};
use crate::scanner::{self, OnsetTrack, ScanError};
use groove::{DriftReport, GrooveMetrics};
use hierarchy::{Meter, RhythmHierarchy};
use indicatif::{ProgressBar, ProgressStyle};
use periodicity::PeriodicityError;
use sections::{LabeledSection, SectionBoundary, SectionFeatureWindow};
use serde::Serialize;
use std::path::{Path, PathBuf};
use structure::StructureSegment;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("Tempo estimation failed: {0}")]
    Tempo(#[from] PeriodicityError),
    #[error("Thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

pub struct AnalyzeResult {
    pub analyzed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TempoSummary {
    /// Raw autocorrelation estimate.
    pub estimated_bpm: f64,
    /// Octave candidate chosen as the felt beat.
    pub perceived_bpm: f64,
    /// Fastest octave candidate.
    pub subdivision_bpm: f64,
    pub candidates: Vec<f64>,
    pub perceived_confidence: f64,
    pub subdivision_confidence: f64,
    pub num_onsets: usize,
    pub mean_ioi: f64,
}

/// Everything derived from one track's onsets.
#[derive(Debug, Clone, Serialize)]
pub struct TrackAnalysis {
    pub track_id: String,
    pub sample_rate: u32,
    pub duration: f64,
    pub tempo: TempoSummary,
    pub rhythm_hierarchy: RhythmHierarchy,
    pub meter: Meter,
    pub groove: GrooveMetrics,
    pub tempo_drift: Option<DriftReport>,
    pub section_features: Vec<SectionFeatureWindow>,
    pub boundaries: Vec<SectionBoundary>,
    pub labeled_sections: Vec<LabeledSection>,
    pub structure: Vec<StructureSegment>,
    pub fingerprint: StructureFingerprint,
    pub archetype: Archetype,
}

/// Run the full pipeline on one onset track. Fails only when no tempo can be
/// estimated; every later stage degrades instead of erroring.
pub fn analyze_track(
    track: &OnsetTrack,
    config: &AnalysisConfig,
) -> std::result::Result<TrackAnalysis, AnalyzeError> {
    let onsets = &track.onsets;
    let iois = periodicity::inter_onset_intervals(onsets);

    let estimate = periodicity::estimate_tempo(&iois)?;
    let candidates = periodicity::tempo_candidates(estimate.bpm);
    let perceived_bpm = periodicity::select_perceived_tempo(&candidates).unwrap_or(estimate.bpm);
    let subdivision_bpm = candidates.iter().copied().fold(estimate.bpm, f64::max);

    let tempo = TempoSummary {
        estimated_bpm: estimate.bpm,
        perceived_bpm,
        subdivision_bpm,
        perceived_confidence: periodicity::tempo_confidence(&iois, perceived_bpm),
        subdivision_confidence: periodicity::tempo_confidence(&iois, subdivision_bpm),
        candidates,
        num_onsets: onsets.len(),
        mean_ioi: estimate.profile.mean_ioi,
    };

    let section_features =
        sections::extract_features(onsets, perceived_bpm, config.section_window_seconds);
    let boundaries = sections::detect_boundaries(
        &section_features,
        config.boundary_threshold,
        config.min_section_seconds,
    );
    let aggregated = sections::aggregate(&section_features, &boundaries);
    let labeled_sections = sections::label_sections(&aggregated);
    let structure = structure::infer_structure(&aggregated, config.structure_threshold);

    let rhythm_hierarchy = hierarchy::build_hierarchy(&estimate.profile, perceived_bpm);
    let meter = hierarchy::infer_meter(perceived_bpm, &rhythm_hierarchy);

    let groove = groove::compute_groove(onsets, perceived_bpm);
    let tempo_drift = groove::compute_drift(onsets, perceived_bpm, config.drift_window_seconds);

    let duration = track.duration();
    let fingerprint = fingerprint::build_fingerprint(
        &track.track_id,
        perceived_bpm,
        meter.time_signature,
        &structure,
        &labeled_sections,
        duration,
    );
    let archetype = fingerprint::infer_archetype(&fingerprint);

    log::debug!(
        "{}: {:.1} BPM ({}), form {}, {}",
        track.track_id,
        perceived_bpm,
        meter.time_signature,
        fingerprint.structure_string(),
        archetype
    );

    Ok(TrackAnalysis {
        track_id: track.track_id.clone(),
        sample_rate: track.sample_rate,
        duration,
        tempo,
        rhythm_hierarchy,
        meter,
        groove,
        tempo_drift,
        section_features,
        boundaries,
        labeled_sections,
        structure,
        fingerprint,
        archetype,
    })
}

fn analyze_single_file(
    path: &Path,
    config: &AnalysisConfig,
) -> std::result::Result<TrackAnalysis, AnalyzeError> {
    log::debug!(
        "Analyzing: {}",
        path.file_name().and_then(|f| f.to_str()).unwrap_or("?")
    );
    let track = scanner::load(path)?;
    analyze_track(&track, config)
}

/// Analyze onset files in parallel and upsert their fingerprints.
///
/// Files are processed in chunks: a chunk is analyzed in parallel with rayon,
/// then its fingerprints are written one by one, so the store only ever sees
/// a single writer and progress survives a crash part-way through.
pub fn analyze_files<S: FingerprintStore>(
    store: &mut S,
    files: &[PathBuf],
    jobs: usize,
    config: &AnalysisConfig,
) -> std::result::Result<AnalyzeResult, AnalyzeError> {
    if files.is_empty() {
        log::info!("No onset files to analyze");
        return Ok(AnalyzeResult {
            analyzed: 0,
            failed: 0,
        });
    }

    let jobs = jobs.max(1);
    log::info!("Analyzing {} files with {} workers", files.len(), jobs);

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;

    let mut analyzed: u64 = 0;
    let mut failed: u64 = 0;

    for chunk in files.chunks(jobs * 2) {
        let results: Vec<_> = pool.install(|| {
            use rayon::prelude::*;
            chunk
                .par_iter()
                .map(|path| {
                    let result = analyze_single_file(path, config);
                    pb.inc(1);
                    (path, result)
                })
                .collect()
        });

        for (path, result) in results {
            match result {
                Ok(analysis) => match store.upsert(analysis.fingerprint) {
                    Ok(()) => analyzed += 1,
                    Err(e) => {
                        log::error!("Store error for {}: {}", analysis.track_id, e);
                        failed += 1;
                    }
                },
                Err(e) => {
                    log::warn!("Analysis failed for {}: {}", path.display(), e);
                    failed += 1;
                }
            }
        }

        pb.set_message(format!("{} stored, {} failed", analyzed, failed));
    }

    pb.finish_with_message(format!("Done: {} analyzed, {} failed", analyzed, failed));

    Ok(AnalyzeResult { analyzed, failed })
}

// ── Shared statistics ─────────────────────────────────────────────────

/// Arithmetic mean; 0 for an empty slice.
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Onsets falling in `[start, end)`.
pub(crate) struct OnsetWindow<'a> {
    pub start: f64,
    pub end: f64,
    pub onsets: &'a [f64],
}

/// Windows of `window_seconds` starting at 0 with a 50% hop, while the window
/// still ends at or before the last onset.
pub(crate) fn sliding_windows(
    onsets: &[f64],
    window_seconds: f64,
) -> impl Iterator<Item = OnsetWindow<'_>> {
    let last = onsets.last().copied().unwrap_or(0.0);
    let valid = window_seconds > 0.0 && !onsets.is_empty();
    let hop = window_seconds / 2.0;

    (0usize..)
        .map(move |i| i as f64 * hop)
        .take_while(move |&start| valid && start + window_seconds <= last)
        .map(move |start| {
            let end = start + window_seconds;
            let lo = onsets.partition_point(|&t| t < start);
            let hi = onsets.partition_point(|&t| t < end);
            OnsetWindow {
                start,
                end,
                onsets: &onsets[lo..hi],
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use hierarchy::TimeSignature;
    use sections::SectionLabel;

    fn click_track(id: &str, bpm: f64, seconds: f64) -> OnsetTrack {
        let period = 60.0 / bpm;
        let n = (seconds / period).round() as usize;
        let onsets = (0..=n).map(|i| i as f64 * period).collect();
        OnsetTrack::new(id.to_string(), 44100, onsets, None).unwrap()
    }

    #[test]
    fn test_stats_helpers() {
        assert_eq!(mean(&[]), 0.0);
        assert!((mean(&[1.0, 2.0, 3.0]) - 2.0).abs() < 1e-12);
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_sliding_windows() {
        let onsets: Vec<f64> = (0..=30).map(|i| i as f64).collect();
        let windows: Vec<OnsetWindow> = sliding_windows(&onsets, 12.0).collect();
        // Starts 0, 6, 12, 18
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[1].start, 6.0);
        assert_eq!(windows[1].end, 18.0);
        // Half-open: 6..=17
        assert_eq!(windows[1].onsets.len(), 12);
        assert_eq!(sliding_windows(&onsets, 0.0).count(), 0);
        assert_eq!(sliding_windows(&[], 12.0).count(), 0);
    }

    #[test]
    fn test_click_track_end_to_end() {
        let track = click_track("click", 120.0, 120.0);
        let analysis = analyze_track(&track, &AnalysisConfig::default()).unwrap();

        assert!((analysis.tempo.estimated_bpm - 120.0).abs() < 1e-6);
        assert!((analysis.tempo.subdivision_bpm - 120.0).abs() < 1e-6);
        assert!((analysis.tempo.subdivision_confidence - 1.0).abs() < 1e-9);
        // 60 and 120 are both in the perceptual range; the slower one wins
        assert!((analysis.tempo.perceived_bpm - 60.0).abs() < 1e-6);
        assert_eq!(analysis.tempo.candidates.len(), 2);

        assert!(analysis.groove.mean_abs_deviation_ms.abs() < 1e-6);
        assert!(analysis.groove.std_deviation_ms.abs() < 1e-6);
        assert!(analysis.groove.max_deviation_ms.abs() < 1e-6);
        assert!((analysis.groove.swing_ratio.unwrap() - 1.0).abs() < 1e-9);

        // Uniform onsets: no autocorrelation peaks, default meter
        assert!(analysis.rhythm_hierarchy.layers.is_empty());
        assert_eq!(analysis.meter.time_signature, TimeSignature::FourFour);
        assert!((analysis.meter.confidence - 0.6).abs() < 1e-12);

        let drift = analysis.tempo_drift.as_ref().unwrap();
        assert!(drift.summary().unwrap().max_deviation_bpm < 1e-6);

        // Steady texture → a single section, form "A"
        assert!(analysis.boundaries.is_empty());
        assert_eq!(analysis.labeled_sections.len(), 1);
        assert_eq!(analysis.labeled_sections[0].label, SectionLabel::PostChorus);
        assert_eq!(analysis.fingerprint.structure_string(), "A");
        assert_eq!(analysis.fingerprint.song_id, "click");
        assert!((analysis.duration - 120.0).abs() < 1e-9);
        assert_eq!(analysis.archetype, Archetype::NarrativeBuild);
    }

    #[test]
    fn test_too_few_onsets_is_fatal() {
        let track = OnsetTrack::new("short".into(), 44100, vec![0.0, 0.5], None).unwrap();
        let err = analyze_track(&track, &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            AnalyzeError::Tempo(PeriodicityError::TooFewIntervals { count: 1 })
        ));
    }

    #[test]
    fn test_deterministic() {
        let track = click_track("again", 100.0, 90.0);
        let config = AnalysisConfig::default();
        let a = analyze_track(&track, &config).unwrap();
        let b = analyze_track(&track, &config).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_analyze_files_into_store() {
        let dir = std::env::temp_dir().join(format!("songform-batch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let onsets: String = (0..=240).map(|i| format!("{}\n", i as f64 * 0.5)).collect();
        let good = dir.join("good.txt");
        let short = dir.join("short.txt");
        std::fs::write(&good, &onsets).unwrap();
        std::fs::write(&short, "0.0\n0.5\n").unwrap();

        let mut store = MemoryStore::default();
        let files = vec![good.clone(), short, good];
        let result = analyze_files(&mut store, &files, 2, &AnalysisConfig::default()).unwrap();
        assert_eq!(result.analyzed, 2);
        assert_eq!(result.failed, 1);
        // Same id twice → replaced, not appended
        assert_eq!(store.all().unwrap().len(), 1);
        assert!(store.get("good.txt").unwrap().is_some());

        std::fs::remove_dir_all(&dir).ok();
    }
}
