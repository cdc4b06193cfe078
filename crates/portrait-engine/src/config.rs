use std::path::PathBuf;
use std::time::Duration;

use portrait_contracts::credential::Credential;
use portrait_contracts::usage::QuotaPolicy;
use thiserror::Error;

use crate::retry::RetryPolicy;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_USAGE_PATH: &str = ".portrait/usage.json";

const QUOTA_ENV_KEY: &str = "PORTRAIT_QUOTA_CEILING";
const CREDENTIAL_ENV_KEYS: [&str; 3] = ["PORTRAIT_CREDENTIAL", "GEMINI_API_KEY", "GOOGLE_API_KEY"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a whole number or 'unlimited', got '{value}'")]
    InvalidQuota { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub model: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub quota: QuotaPolicy,
    pub usage_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(90),
            retry: RetryPolicy::default(),
            quota: QuotaPolicy::Unlimited,
            usage_path: PathBuf::from(DEFAULT_USAGE_PATH),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    ///
    /// Numeric tuning values fall back to their defaults, but a quota ceiling
    /// that does not parse is an error so a typo never lifts the quota.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_base = get("PORTRAIT_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let model = get("PORTRAIT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout_s = value_as_f64(get("PORTRAIT_REQUEST_TIMEOUT"), 90.0, 15.0, 300.0);
        let attempts = value_as_f64(get("PORTRAIT_RETRY_ATTEMPTS"), 3.0, 1.0, 6.0).round() as u32;
        let initial_delay_ms =
            value_as_f64(get("PORTRAIT_RETRY_INITIAL_DELAY_MS"), 2000.0, 100.0, 30000.0).round()
                as u64;
        let quota = parse_quota(get(QUOTA_ENV_KEY).as_deref())?;
        let usage_path = get("PORTRAIT_USAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_USAGE_PATH));

        Ok(Self {
            api_base,
            model,
            request_timeout: Duration::from_secs_f64(timeout_s),
            retry: RetryPolicy::new(attempts, Duration::from_millis(initial_delay_ms)),
            quota,
            usage_path,
        })
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

/// Picks the credential: an explicit value wins, then the env keys in order.
pub fn resolve_credential<F>(explicit: Option<&str>, lookup: F) -> Option<Credential>
where
    F: Fn(&str) -> Option<String>,
{
    explicit
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| {
            CREDENTIAL_ENV_KEYS.iter().find_map(|key| {
                lookup(key)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
        })
        .map(Credential::new)
}

fn parse_quota(raw: Option<&str>) -> Result<QuotaPolicy, ConfigError> {
    let Some(raw) = raw else {
        return Ok(QuotaPolicy::Unlimited);
    };
    if matches!(raw.to_ascii_lowercase().as_str(), "unlimited" | "none" | "off") {
        return Ok(QuotaPolicy::Unlimited);
    }
    raw.parse::<u64>()
        .map(|ceiling| QuotaPolicy::Limited { ceiling })
        .map_err(|_| ConfigError::InvalidQuota {
            key: QUOTA_ENV_KEY,
            value: raw.to_string(),
        })
}

fn value_as_f64(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use portrait_contracts::credential::TransportKind;
    use portrait_contracts::usage::QuotaPolicy;

    use super::{resolve_credential, ConfigError, EngineConfig, DEFAULT_API_BASE, DEFAULT_MODEL};

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_service_contract() -> anyhow::Result<()> {
        let config = EngineConfig::default();
        assert_eq!(EngineConfig::from_lookup(|_| None)?, config);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.request_timeout, Duration::from_secs(90));
        assert_eq!(config.retry.max_attempts(), 3);
        assert_eq!(config.retry.initial_delay(), Duration::from_millis(2000));
        assert_eq!(config.quota, QuotaPolicy::Unlimited);
        assert_eq!(
            config.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        Ok(())
    }

    #[test]
    fn overrides_are_trimmed_and_clamped() -> anyhow::Result<()> {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("PORTRAIT_API_BASE", " https://proxy.test/v1beta/ "),
            ("PORTRAIT_MODEL", "models/custom-image"),
            ("PORTRAIT_REQUEST_TIMEOUT", "2"),
            ("PORTRAIT_RETRY_ATTEMPTS", "12"),
            ("PORTRAIT_RETRY_INITIAL_DELAY_MS", "abc"),
            ("PORTRAIT_QUOTA_CEILING", "5"),
            ("PORTRAIT_USAGE_PATH", "/tmp/usage.json"),
        ]))?;
        assert_eq!(
            config.endpoint(),
            "https://proxy.test/v1beta/models/custom-image:generateContent"
        );
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.retry.max_attempts(), 6);
        assert_eq!(config.retry.initial_delay(), Duration::from_millis(2000));
        assert_eq!(config.quota, QuotaPolicy::Limited { ceiling: 5 });
        assert_eq!(config.usage_path, PathBuf::from("/tmp/usage.json"));
        Ok(())
    }

    #[test]
    fn quota_keywords_mean_unlimited() -> anyhow::Result<()> {
        for raw in ["unlimited", "NONE", "off"] {
            let lookup = lookup_from(&[("PORTRAIT_QUOTA_CEILING", raw)]);
            let config = EngineConfig::from_lookup(lookup)?;
            assert_eq!(config.quota, QuotaPolicy::Unlimited, "{raw}");
        }
        Ok(())
    }

    #[test]
    fn mistyped_quota_ceiling_is_rejected() {
        for raw in ["1O", "lots", "-1"] {
            let lookup = lookup_from(&[("PORTRAIT_QUOTA_CEILING", raw)]);
            assert_eq!(
                EngineConfig::from_lookup(lookup),
                Err(ConfigError::InvalidQuota {
                    key: "PORTRAIT_QUOTA_CEILING",
                    value: raw.to_string(),
                }),
                "{raw}"
            );
        }
    }

    #[test]
    fn credential_resolution_order() {
        let lookup = lookup_from(&[
            ("GEMINI_API_KEY", "AIzaFromGemini"),
            ("GOOGLE_API_KEY", "AIzaFromGoogle"),
        ]);
        let from_env = resolve_credential(None, &lookup).expect("credential");
        assert_eq!(from_env.expose(), "AIzaFromGemini");
        assert_eq!(from_env.transport_kind(), TransportKind::Direct);

        let explicit = resolve_credential(Some(" ya29.token "), &lookup).expect("credential");
        assert_eq!(explicit.expose(), "ya29.token");
        assert_eq!(explicit.transport_kind(), TransportKind::Bearer);

        assert!(resolve_credential(Some("  "), lookup_from(&[])).is_none());
    }
}
