pub mod analyzer;
pub mod config;
pub mod db;
pub mod fingerprint;
pub mod grouping;
pub mod scanner;
pub mod similarity;

/// Onset file extensions we accept
pub const SUPPORTED_EXTENSIONS: &[&str] = &["json", "txt", "onsets"];

/// Application name for XDG paths
pub const APP_NAME: &str = "songform";
