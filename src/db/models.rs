/// Fingerprint store statistics.
pub struct StoreStats {
    pub fingerprints: i64,
    pub total_duration_hours: f64,
    pub mean_tempo: Option<f64>,
    pub archetypes: Vec<(String, i64)>,
    pub meters: Vec<(String, i64)>,
    /// Most common structure strings.
    pub forms: Vec<(String, i64)>,
}
