use crate::engine::{Engine, EngineConfig};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A data path with the required trailing separator.
pub fn store_path(dir: &Path) -> PathBuf {
    PathBuf::from(format!("{}{}", dir.display(), MAIN_SEPARATOR))
}

/// Default config — segments large enough that nothing rotates.
pub fn default_config() -> EngineConfig {
    init_tracing();
    EngineConfig::default()
}

/// Config with a tiny segment limit so every append rotates quickly.
pub fn tiny_segment_config(max_segment_bytes: u64) -> EngineConfig {
    init_tracing();
    EngineConfig {
        max_segment_bytes,
        ..EngineConfig::default()
    }
}

/// Open an engine on the given temp directory with default config.
pub fn open_default(tmp: &TempDir) -> Engine {
    Engine::open(store_path(tmp.path()), default_config()).expect("open")
}

/// Open an engine on the given temp directory with the given config.
pub fn open_with(tmp: &TempDir, config: EngineConfig) -> Engine {
    Engine::open(store_path(tmp.path()), config).expect("open")
}

/// Count the `.dat` segment files currently in the data directory.
pub fn dat_file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path().is_file() && e.path().extension().and_then(|x| x.to_str()) == Some("dat")
        })
        .count()
}
