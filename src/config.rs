use std::env;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::state::TrackTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    Live,
    Fake,
}

impl FeedMode {
    pub fn label(self) -> &'static str {
        match self {
            FeedMode::Live => "LIVE",
            FeedMode::Fake => "FAKE",
        }
    }
}

/// Runtime settings shared by the TUI and the headless watcher.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_base: Option<String>,
    pub ws_url: Option<String>,
    pub api_token: Option<String>,
    pub squad_id: Option<String>,
    pub target: TrackTarget,
    pub feed_mode: FeedMode,
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
}

/// Loads `.env.local` first so local overrides win, then `.env`.
pub fn load_env() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

impl Settings {
    pub fn from_env() -> Self {
        let api_base = opt_env("SQUADSIM_API_BASE").map(|base| {
            base.trim_end_matches('/').to_string()
        });
        let ws_url = opt_env("SQUADSIM_WS_URL");
        let api_token = opt_env("SQUADSIM_API_TOKEN");
        let squad_id = opt_env("SQUADSIM_SQUAD_ID");

        let target = TrackTarget {
            job_id: opt_env("JOB_ID"),
            match_id: opt_env("MATCH_ID"),
        };

        let feed_mode = match opt_env("FEED_MODE").as_deref() {
            Some("fake") => FeedMode::Fake,
            Some("live") => FeedMode::Live,
            // Without a backend there is nothing to talk to.
            _ if api_base.is_none() => FeedMode::Fake,
            _ => FeedMode::Live,
        };

        let poll_secs = env::var("MATCH_POLL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3)
            .clamp(1, 60);
        let connect_secs = env::var("PUSH_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5)
            .clamp(1, 60);
        let retry_max = env::var("PUSH_RETRY_MAX")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(5)
            .clamp(0, 20);
        let retry_base_ms = env::var("PUSH_RETRY_BASE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(750)
            .clamp(100, 10_000);

        Self {
            api_base,
            ws_url,
            api_token,
            squad_id,
            target,
            feed_mode,
            poll_interval: Duration::from_secs(poll_secs),
            connect_timeout: Duration::from_secs(connect_secs),
            backoff: BackoffPolicy::with_base(retry_max, Duration::from_millis(retry_base_ms)),
        }
    }

    /// WebSocket endpoint: explicit `SQUADSIM_WS_URL`, or derived from the
    /// REST base by swapping the scheme and appending `/ws`.
    pub fn push_url(&self) -> Option<String> {
        if let Some(url) = &self.ws_url {
            return Some(url.clone());
        }
        let base = self.api_base.as_deref()?;
        let derived = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}/ws")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}/ws")
        } else {
            format!("ws://{base}/ws")
        };
        Some(derived)
    }
}

fn opt_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
