use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directories to scan for onset files (used when `analyze` has no CLI args).
    pub onset_dirs: Vec<PathBuf>,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Segmentation and drift parameters.
    pub analysis: AnalysisConfig,
    /// Corpus ranking and clustering parameters.
    pub similarity: SimilarityConfig,
}

/// Tunables for the per-track analysis pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Window length for local tempo (drift) estimation, in seconds.
    pub drift_window_seconds: f64,
    /// Window length for section feature extraction, in seconds.
    pub section_window_seconds: f64,
    /// Boundary threshold as a multiple of the feature-difference std.
    pub boundary_threshold: f64,
    /// Minimum spacing between accepted section boundaries, in seconds.
    pub min_section_seconds: f64,
    /// Grouping threshold for structure tokens.
    pub structure_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            drift_window_seconds: 12.0,
            section_window_seconds: 12.0,
            boundary_threshold: 1.5,
            min_section_seconds: 15.0,
            structure_threshold: 0.25,
        }
    }
}

/// Similarity ranking configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Default number of neighbors returned by `similar`.
    pub top_k: usize,
    /// Euclidean threshold for greedy fingerprint-vector clustering.
    pub cluster_threshold: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            cluster_threshold: 0.25,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/songform/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }),
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Parse a config document. Missing keys fall back to defaults.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        let config = toml::from_str::<AppConfig>(contents)?;
        log::info!("Loaded config ({} onset dirs)", config.onset_dirs.len());
        Ok(config)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("songform.db")
    } else {
        // Fallback: current directory
        PathBuf::from("songform.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert!(config.onset_dirs.is_empty());
        assert_eq!(config.workers, 0);
        assert!((config.analysis.boundary_threshold - 1.5).abs() < 1e-12);
        assert!((config.analysis.min_section_seconds - 15.0).abs() < 1e-12);
        assert_eq!(config.similarity.top_k, 5);
    }

    #[test]
    fn test_partial_analysis_table() {
        let config = AppConfig::from_toml(
            "workers = 3\n[analysis]\nsection_window_seconds = 8.0\n",
        )
        .unwrap();
        assert_eq!(config.resolve_workers(), 3);
        assert!((config.analysis.section_window_seconds - 8.0).abs() < 1e-12);
        // Untouched keys keep their defaults
        assert!((config.analysis.drift_window_seconds - 12.0).abs() < 1e-12);
        assert!((config.analysis.structure_threshold - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_auto_workers_at_least_one() {
        let config = AppConfig::default();
        assert!(config.resolve_workers() >= 1);
    }
}
