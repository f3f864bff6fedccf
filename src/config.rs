//! Application-level configuration loading: prompt bank, game timings and media cache settings.

use std::{env, fs, io::ErrorKind, path::PathBuf, sync::Arc, time::Duration};

use serde::Deserialize;
use serde_with::{DurationSeconds, serde_as};
use tracing::{info, warn};

use crate::{
    media::eviction::EvictionPolicy,
    state::prompts::{Prompt, PromptBank},
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MIXTAPE_CONFIG_PATH";

const DEFAULT_COUNTDOWN_SECONDS: u64 = 10;
const DEFAULT_RETENTION_DAYS: u64 = 7;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Tuning of the media lookup cache.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    /// Age after which a running lookup is considered wedged and replaced. Never shorter than
    /// one provider timeout per query strategy.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "inflight_ttl_seconds")]
    pub inflight_ttl: Duration,
    /// How long a key stays suppressed after the provider quota ran out.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "quota_backoff_seconds")]
    pub quota_backoff: Duration,
    /// Bound on every provider call.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "provider_timeout_seconds")]
    pub provider_timeout: Duration,
    /// Age after which a "not found" marker is re-queried.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "negative_ttl_seconds")]
    pub negative_ttl: Duration,
    /// Results requested per provider query.
    pub max_results: u32,
    /// Policy applied by maintenance sweeps.
    pub eviction: EvictionPolicy,
    /// Period of the background sweep; disabled when absent.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(rename = "sweep_interval_seconds")]
    pub sweep_interval: Option<Duration>,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            inflight_ttl: Duration::from_secs(30),
            quota_backoff: Duration::from_secs(5 * 60),
            provider_timeout: Duration::from_secs(8),
            negative_ttl: Duration::from_secs(7 * SECONDS_PER_DAY),
            max_results: 5,
            eviction: EvictionPolicy::default(),
            sweep_interval: Some(Duration::from_secs(6 * 60 * 60)),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    prompts: Arc<PromptBank>,
    countdown: Duration,
    retention: Duration,
    media: MediaSettings,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        prompts = app_config.prompts.len(),
                        countdown_seconds = app_config.countdown.as_secs(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Prompt bank rounds draw from.
    pub fn prompts(&self) -> Arc<PromptBank> {
        self.prompts.clone()
    }

    /// Default duration of a forced-advance countdown.
    pub fn countdown(&self) -> Duration {
        self.countdown
    }

    /// How long an ended session is retained.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Media cache tuning.
    pub fn media(&self) -> &MediaSettings {
        &self.media
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            prompts: Arc::new(PromptBank::default()),
            countdown: Duration::from_secs(DEFAULT_COUNTDOWN_SECONDS),
            retention: Duration::from_secs(DEFAULT_RETENTION_DAYS * SECONDS_PER_DAY),
            media: MediaSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    prompts: Vec<RawPrompt>,
    #[serde(default)]
    countdown_seconds: Option<u64>,
    #[serde(default)]
    retention_days: Option<u64>,
    #[serde(default)]
    media: MediaSettings,
}

#[derive(Debug, Deserialize)]
/// JSON representation of a single prompt inside the configuration file.
struct RawPrompt {
    id: String,
    text: String,
    #[serde(default)]
    category: Option<String>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let prompts = value
            .prompts
            .into_iter()
            .filter(|prompt| !prompt.text.trim().is_empty())
            .map(|prompt| Prompt {
                id: prompt.id,
                text: prompt.text.trim().to_owned(),
                category: prompt.category.unwrap_or_else(|| "general".to_owned()),
            })
            .collect::<Vec<_>>();

        Self {
            prompts: Arc::new(PromptBank::new(prompts)),
            countdown: Duration::from_secs(
                value
                    .countdown_seconds
                    .filter(|secs| *secs > 0)
                    .unwrap_or(DEFAULT_COUNTDOWN_SECONDS),
            ),
            retention: Duration::from_secs(
                value.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS) * SECONDS_PER_DAY,
            ),
            media: value.media,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "prompts": [{"id": "p1", "text": " A song for rainy days "}, {"id": "p2", "text": "  "}],
                "countdown_seconds": 0,
                "media": {"quota_backoff_seconds": 60, "eviction": {"max_entries": 100}}
            }"#,
        )
        .unwrap();

        let config = AppConfig::from(raw);

        assert_eq!(config.prompts().len(), 1);
        assert_eq!(config.countdown(), Duration::from_secs(DEFAULT_COUNTDOWN_SECONDS));
        assert_eq!(config.retention(), Duration::from_secs(7 * SECONDS_PER_DAY));
        assert_eq!(config.media().quota_backoff, Duration::from_secs(60));
        assert_eq!(config.media().inflight_ttl, Duration::from_secs(30));
        assert_eq!(config.media().eviction.max_entries, Some(100));
    }

    #[test]
    fn empty_prompt_list_uses_built_in_bank() {
        let raw: RawConfig = serde_json::from_str("{}").unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.prompts().len(), PromptBank::default().len());
    }
}
