pub mod format;

use crate::SUPPORTED_EXTENSIONS;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid onset sequence: {0}")]
    InvalidOnsets(String),
    #[error("Unsupported onset file: {0}")]
    Unsupported(String),
}

/// A track's detected onsets: the only input the analyzer consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct OnsetTrack {
    pub track_id: String,
    pub sample_rate: u32,
    /// Strictly increasing onset timestamps in seconds.
    pub onsets: Vec<f64>,
    /// Track length in seconds, when known from upstream.
    pub duration: Option<f64>,
}

impl OnsetTrack {
    /// Validate and build a track. Onsets must be finite, non-negative, and
    /// strictly increasing.
    pub fn new(
        track_id: String,
        sample_rate: u32,
        onsets: Vec<f64>,
        duration: Option<f64>,
    ) -> Result<Self, ScanError> {
        if sample_rate == 0 {
            return Err(ScanError::InvalidOnsets("sample_rate must be positive".into()));
        }
        if let Some(i) = onsets.iter().position(|t| !t.is_finite() || *t < 0.0) {
            return Err(ScanError::InvalidOnsets(format!(
                "onset {} is not a non-negative time: {}",
                i, onsets[i]
            )));
        }
        if let Some(i) = onsets.windows(2).position(|w| w[1] <= w[0]) {
            return Err(ScanError::InvalidOnsets(format!(
                "onsets not strictly increasing at index {} ({} -> {})",
                i + 1,
                onsets[i],
                onsets[i + 1]
            )));
        }
        if let Some(d) = duration {
            if !d.is_finite() || d < 0.0 {
                return Err(ScanError::InvalidOnsets(format!("invalid duration: {}", d)));
            }
        }
        Ok(Self {
            track_id,
            sample_rate,
            onsets,
            duration,
        })
    }

    /// Explicit duration if given, otherwise the last onset time.
    pub fn duration(&self) -> f64 {
        self.duration
            .or_else(|| self.onsets.last().copied())
            .unwrap_or(0.0)
    }
}

/// Recursively collect onset files under `paths`, sorted for stable batch order.
pub fn discover(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();

    for path in paths {
        for entry in WalkDir::new(path).follow_links(true).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if is_supported(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    files.sort();
    log::info!("Found {} onset files", files.len());
    files
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn is_supported(path: &Path) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension(path).as_str())
}

/// Load a single onset file. The track id defaults to the file name.
pub fn load(path: &Path) -> Result<OnsetTrack, ScanError> {
    let file_name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("?")
        .to_string();

    let ext = extension(path);
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ScanError::Unsupported(path.display().to_string()));
    }

    let contents = std::fs::read_to_string(path)?;
    let track = match ext.as_str() {
        "json" => format::parse_json(&contents, &file_name)?,
        _ => format::parse_text(&contents, &file_name)?,
    };

    log::debug!("Loaded {} onsets from {}", track.onsets.len(), file_name);
    Ok(track)
}
