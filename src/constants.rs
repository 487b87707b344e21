/// Maximum generations a single waiting prompt may request; larger requests are clamped.
pub const MAX_GENS_PER_WP: i64 = 20;

/// A waiting prompt with no activity for this long is eligible for reaping.
pub const STALE_PROMPT_SECS: i64 = 600;

/// A worker with no check-in for this long is excluded from active-worker counts.
pub const STALE_WORKER_SECS: i64 = 300;

/// Minimum accrued uptime (seconds) between uptime-kudos rewards.
pub const UPTIME_REWARD_THRESHOLD_SECS: i64 = 600;

/// Worker performance sample window (tokens/sec), FIFO.
pub const MAX_WORKER_PERFORMANCES: usize = 20;

/// Global throughput sample window (tokens/sec), FIFO.
pub const MAX_STATS_PERFORMANCES: usize = 10;

/// Window over which `kilotokens_per_min` sums fulfillments.
pub const KILOTOKENS_WINDOW_SECS: i64 = 60;

/// Divisor in `convert_tokens_to_kudos`.
pub const KUDOS_TOKEN_DIVISOR: f64 = 21.0;

/// Divisor applied to the model multiplier when crediting uptime kudos.
pub const UPTIME_KUDOS_DIVISOR: f64 = 2.75;

/// Default `max_concurrent_wps` for a freshly created, non-anonymous user.
pub const DEFAULT_MAX_CONCURRENT_WPS: i64 = 2;

/// Elevated `max_concurrent_wps` granted to the anonymous user.
pub const ANON_MAX_CONCURRENT_WPS: i64 = 30;

/// Identity of the distinguished anonymous user.
pub const ANON_OAUTH_ID: &str = "anon";
pub const ANON_API_KEY: &str = "0000000000";
pub const ANON_USER_ID: i64 = 0;

/// Chars-per-token ratio used by the legacy `to_tokens` conversion.
pub const CHARS_PER_TOKEN: f64 = 4.0;

/// Timestamp format used in every persisted JSON file.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const USERS_FILE: &str = "users.json";
pub const SERVERS_FILE: &str = "servers.json";
pub const STATS_FILE: &str = "stats.json";
