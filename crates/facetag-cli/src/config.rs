use facetag_core::DEFAULT_MATCH_THRESHOLD;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the encoding store file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance accepted as a match.
    pub match_threshold: f64,
}

impl Config {
    /// Load configuration from `FACETAG_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facetag");

        let db_path = var("FACETAG_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("faces.json"));

        let match_threshold = match var("FACETAG_MATCH_THRESHOLD") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "ignoring unparsable FACETAG_MATCH_THRESHOLD");
                DEFAULT_MATCH_THRESHOLD
            }),
            None => DEFAULT_MATCH_THRESHOLD,
        };

        Self {
            db_path,
            match_threshold,
        }
    }
}
