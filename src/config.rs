use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Clone)]
pub struct Config {
    pub db_dir: String,
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
    pub snapshot_interval_secs: u64,
    pub reap_interval_secs: u64,
    pub stale_prompt_secs: i64,
    pub stale_worker_secs: i64,
    pub uptime_reward_threshold_secs: i64,
    pub max_gens_per_wp: i64,
    pub oracle: OracleConfig,
    pub to_tokens: bool,
}

#[derive(Clone)]
pub struct OracleConfig {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub stub_multiplier: f64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("db_dir", &self.db_dir)
            .field("log_level", &self.log_level)
            .field("enable_file_logs", &self.enable_file_logs)
            .field("log_dir", &self.log_dir)
            .field("snapshot_interval_secs", &self.snapshot_interval_secs)
            .field("reap_interval_secs", &self.reap_interval_secs)
            .field("stale_prompt_secs", &self.stale_prompt_secs)
            .field("stale_worker_secs", &self.stale_worker_secs)
            .field(
                "uptime_reward_threshold_secs",
                &self.uptime_reward_threshold_secs,
            )
            .field("max_gens_per_wp", &self.max_gens_per_wp)
            .field("oracle", &self.oracle)
            .field("to_tokens", &self.to_tokens)
            .finish()
    }
}

impl fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleConfig")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("stub_multiplier", &self.stub_multiplier)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_dir: normalized_dir(&env_or("DB_DIR", "./db")),
            log_level: env_or("RUST_LOG", "info"),
            enable_file_logs: env_or_bool("ENABLE_FILE_LOGS", false),
            log_dir: env_or("LOG_DIR", "./logs"),
            snapshot_interval_secs: env_or_parse("SNAPSHOT_INTERVAL_SECS", 60_u64),
            reap_interval_secs: env_or_parse("REAP_INTERVAL_SECS", 60_u64),
            stale_prompt_secs: env_or_parse("STALE_PROMPT_SECS", crate::constants::STALE_PROMPT_SECS),
            stale_worker_secs: env_or_parse("STALE_WORKER_SECS", crate::constants::STALE_WORKER_SECS),
            uptime_reward_threshold_secs: env_or_parse(
                "UPTIME_REWARD_THRESHOLD_SECS",
                crate::constants::UPTIME_REWARD_THRESHOLD_SECS,
            ),
            max_gens_per_wp: env_or_parse("MAX_GENS_PER_WP", crate::constants::MAX_GENS_PER_WP),
            oracle: OracleConfig {
                base_url: match env::var("MODEL_ORACLE_URL") {
                    Ok(v) if !v.is_empty() => Some(v),
                    _ => None,
                },
                timeout_secs: env_or_parse("MODEL_ORACLE_TIMEOUT_SECS", 10_u64),
                stub_multiplier: env_or_parse("MODEL_ORACLE_STUB_MULTIPLIER", 1.0_f64),
            },
            to_tokens: env_or_bool("TO_TOKENS", false),
        }
    }
}

fn normalized_dir(raw: &str) -> String {
    let path = Path::new(raw);
    if path.is_absolute() {
        return path.to_string_lossy().to_string();
    }
    let project_root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    project_root.join(path).to_string_lossy().to_string()
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Failed to parse env var, using default");
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, OnceLock};

    use super::*;

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn managed_keys() -> &'static [&'static str] {
        &[
            "DB_DIR",
            "RUST_LOG",
            "SNAPSHOT_INTERVAL_SECS",
            "REAP_INTERVAL_SECS",
            "STALE_PROMPT_SECS",
            "MAX_GENS_PER_WP",
            "MODEL_ORACLE_URL",
            "TO_TOKENS",
        ]
    }

    fn clear_keys(keys: &[&str]) {
        for key in keys {
            env::remove_var(key);
        }
    }

    #[test]
    fn loads_defaults_when_missing() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        let cfg = Config::from_env();
        assert_eq!(cfg.snapshot_interval_secs, 60);
        assert_eq!(cfg.stale_prompt_secs, 600);
        assert_eq!(cfg.max_gens_per_wp, 20);
        assert!(cfg.oracle.base_url.is_none());
        assert!(!cfg.to_tokens);
    }

    #[test]
    fn parses_numeric_values() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("SNAPSHOT_INTERVAL_SECS", "15");
        env::set_var("MAX_GENS_PER_WP", "5");

        let cfg = Config::from_env();
        assert_eq!(cfg.snapshot_interval_secs, 15);
        assert_eq!(cfg.max_gens_per_wp, 5);
    }

    #[test]
    fn invalid_values_fall_back() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("SNAPSHOT_INTERVAL_SECS", "not-a-number");

        let cfg = Config::from_env();
        assert_eq!(cfg.snapshot_interval_secs, 60);
    }

    #[test]
    fn oracle_url_enables_http_oracle() {
        let _guard = env_lock().lock().expect("env lock");
        clear_keys(managed_keys());

        env::set_var("MODEL_ORACLE_URL", "http://localhost:9999");
        let cfg = Config::from_env();
        assert_eq!(cfg.oracle.base_url.as_deref(), Some("http://localhost:9999"));
    }
}
