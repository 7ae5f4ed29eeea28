use std::path::PathBuf;

/// Engine configuration, resolved from `RENTD_*` environment variables with
/// the same defaults an embedding process would otherwise pass explicitly.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path of the write-ahead log file.
    pub wal_path: PathBuf,
    /// WAL appends between automatic compactions.
    pub compact_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wal_path: PathBuf::from("./data/rentd.wal"),
            compact_threshold: 1000,
        }
    }
}

impl EngineConfig {
    pub fn new(wal_path: impl Into<PathBuf>) -> Self {
        Self {
            wal_path: wal_path.into(),
            ..Self::default()
        }
    }

    /// Read `RENTD_DATA_DIR` and `RENTD_COMPACT_THRESHOLD`; unset or
    /// unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("RENTD_DATA_DIR").unwrap_or_else(|_| "./data".into());
        let compact_threshold: u64 = std::env::var("RENTD_COMPACT_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);
        Self {
            wal_path: PathBuf::from(data_dir).join("rentd.wal"),
            compact_threshold,
        }
    }
}
