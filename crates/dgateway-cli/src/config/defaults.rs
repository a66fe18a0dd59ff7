/// Default proxy listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Default listen address for both listeners
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Default upstream target
pub const DEFAULT_TARGET: &str = "http://127.0.0.1:8081";

/// Default SQLite file
pub const DEFAULT_DB_PATH: &str = "requests.db";

/// Default outbound timeout for replayed requests (seconds)
pub const DEFAULT_REPLAY_TIMEOUT_SECS: u64 = 30;

/// Largest request body the proxy and admin API will buffer (bytes)
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
