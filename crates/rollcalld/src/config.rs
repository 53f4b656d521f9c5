use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite cache database.
    pub db_path: PathBuf,
    /// Root directory for stored photos (staging and per-identity).
    pub photo_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Minimum lead over the runner-up owner before a match is trusted.
    pub match_margin: f32,
    /// Minimum passing photos required at submission intake.
    pub min_passing_photos: usize,
    /// Failed processing attempts tolerated before an enrollment is rejected.
    pub retry_budget: u32,
    /// Whether to assume connectivity at startup.
    pub start_online: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("cache.db"));

        let photo_dir = std::env::var("ROLLCALL_PHOTO_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("photos"));

        Self {
            db_path,
            photo_dir,
            similarity_threshold: env_f32("ROLLCALL_SIMILARITY_THRESHOLD", 0.42),
            match_margin: env_f32("ROLLCALL_MATCH_MARGIN", 0.05),
            min_passing_photos: env_usize("ROLLCALL_MIN_PASSING_PHOTOS", 4),
            retry_budget: env_u32("ROLLCALL_RETRY_BUDGET", 3),
            start_online: std::env::var("ROLLCALL_START_ONLINE")
                .map(|v| v != "0")
                .unwrap_or(false),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
