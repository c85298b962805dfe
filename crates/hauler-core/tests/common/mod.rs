pub mod range_server;

use hauler_core::config::{AdaptiveConfig, EngineConfig, RetryConfig};

/// Engine config with short delays so failure paths finish quickly.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        network_concurrency: 8,
        io_concurrency: 4,
        min_concurrency: 2,
        settle_delay_ms: 5,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_secs: 0.01,
            lock_base_delay_secs: 0.02,
            max_delay_secs: 0.05,
            chunk_max_attempts: 3,
        },
        adaptive: AdaptiveConfig {
            pause_secs: 0.05,
            cooldown_secs: 0.05,
            ..AdaptiveConfig::default()
        },
        ..EngineConfig::default()
    }
}

/// Deterministic, non-repeating-looking test payload.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u64).wrapping_mul(31).wrapping_add(seed as u64 * 7 + (i as u64 >> 13)) % 251) as u8)
        .collect()
}

/// True when `dir` (recursively) holds any `.part` file.
pub fn has_part_files(dir: &std::path::Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|e| {
        let p = e.path();
        if p.is_dir() {
            has_part_files(&p)
        } else {
            p.extension().is_some_and(|ext| ext == "part")
        }
    })
}
