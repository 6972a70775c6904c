/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Durable store defaults
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_FILE_EXTENSION: &str = "json";

// Expiring store defaults
pub const DEFAULT_EXPIRING_ENABLED: bool = false;
pub const DEFAULT_REDIS_HOST: &str = "localhost";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_REDIS_DB: i64 = 0;
pub const DEFAULT_EXPIRING_TTL: &str = "1h";
pub const DEFAULT_KEY_PREFIX: &str = "progress:";
pub const MIN_EXPIRING_TTL_SECS: u64 = 1;
pub const MAX_EXPIRING_TTL_SECS: u64 = 30 * 24 * 60 * 60; // 30 days

// Polling defaults
pub const DEFAULT_REFRESH_INTERVAL: &str = "3s";
pub const DEFAULT_FAST_REFRESH_INTERVAL: &str = "6s";
pub const DEFAULT_MIN_REFRESH_INTERVAL: &str = "2s";
pub const DEFAULT_FAST_MIN_REFRESH_INTERVAL: &str = "5s";
pub const DEFAULT_MAX_POLL_DURATION: &str = "30m";

// History defaults
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_HISTORY_SCAN_LIMIT: usize = 1000;

// Planner defaults
pub const DEFAULT_RESEARCH_DEPTH: u8 = 2;
pub const DEFAULT_PROVIDER_FACTORS: &[(&str, f64)] = &[
    ("dashscope", 1.0),
    ("deepseek", 0.8),
    ("google", 1.2),
    ("openai", 1.0),
];
