use crate::error::{AppError, Result};

/// Browser-like user agent sent with every scrape request. Some tournament
/// sites serve a stripped page to unknown agents.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

pub const ACCEPT_HTML: &str = "text/html,*/*";

/// Default pause between sequential calendar-tab fetches (milliseconds).
pub const DEFAULT_RATE_LIMIT_MS: u64 = 200;

/// Request timeout for outbound scrape fetches (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 20;

/// Backoff before the single retry of a transient fetch failure (milliseconds).
pub const FETCH_RETRY_BACKOFF_MS: u64 = 500;

/// Path of the same-origin standings proxy endpoint.
pub const STANDINGS_PROXY_PATH: &str = "/api/fetch-tournament/standings";

/// Pending standings previews older than this are discarded on the next preview.
pub const PREVIEW_TTL_SECS: i64 = 30 * 60;

/// Calendar tab heuristics.
pub mod calendar {
    /// Upper bound on tab label length; longer fragments are prose, not tabs.
    pub const MAX_TAB_LABEL_CHARS: usize = 25;
    /// How far to walk up from the "Календар матчів" heading looking for the match list.
    pub const MAX_ROOT_DEPTH: usize = 8;
    /// Low-yield warning fires only once this many tabs were fetched successfully.
    pub const LOW_YIELD_MIN_TABS: usize = 6;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub user_agent: String,
    pub fetch_timeout_secs: u64,
    /// Pause between calendar tab fetches (TAB_RATE_LIMIT_MS).
    pub tab_rate_limit_ms: u64,
    /// When set, standings pages are fetched through this proxy base URL
    /// (STANDINGS_PROXY_URL), e.g. "http://localhost:3000".
    pub standings_proxy_url: Option<String>,
}

impl Config {
    /// Defaults overridden by whatever the environment sets.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            db_path: std::env::var("DB_PATH").unwrap_or(defaults.db_path),
            api_port: match std::env::var("API_PORT") {
                Ok(port) => port
                    .parse::<u16>()
                    .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
                Err(_) => defaults.api_port,
            },
            user_agent: std::env::var("SCRAPE_USER_AGENT").unwrap_or(defaults.user_agent),
            fetch_timeout_secs: std::env::var("FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.fetch_timeout_secs),
            tab_rate_limit_ms: std::env::var("TAB_RATE_LIMIT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.tab_rate_limit_ms),
            standings_proxy_url: std::env::var("STANDINGS_PROXY_URL")
                .ok()
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .or(defaults.standings_proxy_url),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "tournament_import.db".to_string(),
            api_port: 3000,
            user_agent: USER_AGENT.to_string(),
            fetch_timeout_secs: FETCH_TIMEOUT_SECS,
            tab_rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
            standings_proxy_url: None,
        }
    }
}
