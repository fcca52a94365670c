//! Onset file formats.
//!
//! JSON documents carry either timestamps in seconds or onset frame indices
//! plus the hop length; plain-text files hold one timestamp per line.

use serde::Deserialize;

use super::{OnsetTrack, ScanError};
use crate::analyzer::periodicity::onset_times_from_frames;

/// Sample rate assumed for plain-text onset lists.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Deserialize)]
struct OnsetDocument {
    track_id: Option<String>,
    sample_rate: Option<u32>,
    duration: Option<f64>,
    onsets: Option<Vec<f64>>,
    onset_frames: Option<Vec<u64>>,
    hop_length: Option<u32>,
}

/// Parse a JSON onset document. `fallback_id` is used when it has no `track_id`.
pub fn parse_json(contents: &str, fallback_id: &str) -> Result<OnsetTrack, ScanError> {
    let doc: OnsetDocument = serde_json::from_str(contents)?;
    let sample_rate = doc.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    if sample_rate == 0 {
        return Err(ScanError::InvalidOnsets("sample_rate must be positive".into()));
    }

    let onsets = match (doc.onsets, doc.onset_frames) {
        (Some(onsets), _) => onsets,
        (None, Some(frames)) => {
            let hop = doc
                .hop_length
                .ok_or_else(|| ScanError::InvalidOnsets("onset_frames requires hop_length".into()))?;
            onset_times_from_frames(&frames, hop, sample_rate)
        }
        (None, None) => {
            return Err(ScanError::InvalidOnsets(
                "document has neither onsets nor onset_frames".into(),
            ));
        }
    };

    OnsetTrack::new(
        doc.track_id.unwrap_or_else(|| fallback_id.to_string()),
        sample_rate,
        onsets,
        doc.duration,
    )
}

/// Parse one timestamp (seconds) per line. Blank lines and `#` comments are skipped.
pub fn parse_text(contents: &str, track_id: &str) -> Result<OnsetTrack, ScanError> {
    let mut onsets = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let t: f64 = line.parse().map_err(|_| {
            ScanError::InvalidOnsets(format!("line {}: not a timestamp: {:?}", lineno + 1, line))
        })?;
        onsets.push(t);
    }
    OnsetTrack::new(track_id.to_string(), DEFAULT_SAMPLE_RATE, onsets, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_seconds() {
        let track = parse_json(
            r#"{"track_id": "song-1", "sample_rate": 22050, "onsets": [0.0, 0.5, 1.0], "duration": 3.0}"#,
            "file.json",
        )
        .unwrap();
        assert_eq!(track.track_id, "song-1");
        assert_eq!(track.sample_rate, 22050);
        assert_eq!(track.onsets, vec![0.0, 0.5, 1.0]);
        assert!((track.duration() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_json_frames() {
        let track = parse_json(
            r#"{"sample_rate": 44100, "hop_length": 441, "onset_frames": [0, 50, 100]}"#,
            "fallback",
        )
        .unwrap();
        assert_eq!(track.track_id, "fallback");
        assert!((track.onsets[1] - 0.5).abs() < 1e-12);
        assert!((track.onsets[2] - 1.0).abs() < 1e-12);
        // No explicit duration → last onset
        assert!((track.duration() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_json_frames_need_hop() {
        let err = parse_json(r#"{"onset_frames": [0, 10]}"#, "x").unwrap_err();
        assert!(matches!(err, ScanError::InvalidOnsets(_)));
        let err = parse_json(r#"{"sample_rate": 44100}"#, "x").unwrap_err();
        assert!(matches!(err, ScanError::InvalidOnsets(_)));
        assert!(matches!(parse_json("not json", "x").unwrap_err(), ScanError::Json(_)));
    }

    #[test]
    fn test_parse_text() {
        let track = parse_text("# onsets\n0.0\n0.52\n\n1.01  # late\n", "take-2").unwrap();
        assert_eq!(track.track_id, "take-2");
        assert_eq!(track.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(track.onsets, vec![0.0, 0.52, 1.01]);
    }

    #[test]
    fn test_parse_text_rejects_garbage() {
        let err = parse_text("0.0\nabc\n", "bad").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
