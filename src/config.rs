/// TOML configuration with sensible defaults, overridden by environment variables.
/// No config file is required to run; credentials can come from the environment alone.

use crate::error::TallyError;
use crate::pairing::Markers;
use chrono::FixedOffset;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// YouTube Data API key.
    pub api_key: Option<String>,
    /// Video whose active live chat is tallied. Ignored when `live_chat_id` is set.
    pub video_id: Option<String>,
    /// Live chat id, when already known.
    pub live_chat_id: Option<String>,
    /// Directory holding per-month snapshot folders.
    pub store_dir: String,
    /// Offset applied to every timestamp before comparison and for snapshot tags,
    /// as `+HH:MM` / `-HH:MM` or a whole number of hours.
    pub utc_offset: String,
    pub api_base_url: String,
    /// `maxResults` sent with each message page request.
    pub max_results: u32,
    /// Upper bound on message pages fetched in one run.
    pub max_pages: u32,
    pub request_timeout_s: u64,
    pub markers: Markers,
}

/// Where the chat to tally comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
    LiveChat(String),
    Video(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            video_id: None,
            live_chat_id: None,
            store_dir: "study_log".into(),
            utc_offset: "+09:00".into(), // JST
            api_base_url: "https://www.googleapis.com/youtube/v3".into(),
            max_results: 2000,
            max_pages: 500,
            request_timeout_s: 30,
            markers: Markers::default(),
        }
    }
}

impl Config {
    /// Load config from the config file path, or defaults if not found,
    /// then apply environment overrides.
    pub fn load() -> Self {
        let config_path = config_file_path();
        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {config_path}");
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse config file {config_path}: {e}. Using defaults.");
                    Self::default()
                }
            },
            Err(_) => {
                log::debug!("No config file found at {config_path}. Using defaults.");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Override fields from environment-style lookups. Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("YOUTUBE_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = get("VIDEO_ID") {
            self.video_id = Some(v);
        }
        if let Some(v) = get("LIVE_CHAT_ID") {
            self.live_chat_id = Some(v);
        }
        if let Some(v) = get("STUDY_TALLY_STORE_DIR") {
            self.store_dir = v;
        }
        if let Some(v) = get("STUDY_TALLY_UTC_OFFSET") {
            self.utc_offset = v;
        }
    }

    /// API key, or `ConfigMissing` if none was provided.
    pub fn api_key(&self) -> Result<&str, TallyError> {
        non_blank(&self.api_key).ok_or(TallyError::ConfigMissing("YOUTUBE_API_KEY"))
    }

    /// The chat to read. A known live chat id wins over a video id.
    pub fn chat_target(&self) -> Result<ChatTarget, TallyError> {
        if let Some(id) = non_blank(&self.live_chat_id) {
            return Ok(ChatTarget::LiveChat(id.to_string()));
        }
        if let Some(id) = non_blank(&self.video_id) {
            return Ok(ChatTarget::Video(id.to_string()));
        }
        Err(TallyError::ConfigMissing("LIVE_CHAT_ID or VIDEO_ID"))
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, TallyError> {
        parse_utc_offset(&self.utc_offset).ok_or_else(|| {
            TallyError::InvalidConfig(format!(
                "utc_offset must look like +09:00 or -5 and lie within ±23:59, got {:?}",
                self.utc_offset
            ))
        })
    }

    /// Check everything a run needs before any request is made.
    pub fn validate(&self) -> Result<(), TallyError> {
        self.api_key()?;
        self.chat_target()?;
        self.utc_offset()?;
        if self.markers.start.is_empty() || self.markers.end.is_empty() {
            return Err(TallyError::InvalidConfig("markers must not be empty".into()));
        }
        if self.markers.start == self.markers.end {
            return Err(TallyError::InvalidConfig(
                "start and end markers must differ".into(),
            ));
        }
        Ok(())
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Parse `+HH:MM`, `-HH:MM`, `+HHMM` or a bare hour count such as `9` / `-5`.
fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let (sign, body) = match raw.as_bytes().first().copied()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => (1, raw),
    };
    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit() || b == b':') {
        return None;
    }

    let (hours, minutes): (i32, i32) = match body.split_once(':') {
        Some((h, m)) if !h.is_empty() && m.len() == 2 => (h.parse().ok()?, m.parse().ok()?),
        Some(_) => return None,
        None if body.len() == 4 => (body[..2].parse().ok()?, body[2..].parse().ok()?),
        None if body.len() <= 2 => (body.parse().ok()?, 0),
        None => return None,
    };
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn config_file_path() -> String {
    std::env::var("STUDY_TALLY_CONFIG").unwrap_or_else(|_| "study-tally.toml".into())
}
