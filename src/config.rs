//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmConfig;
use crate::llm::openai::DEFAULT_BASE_URL;
use crate::mailbox::ImapConfig;
use crate::pipeline::orchestrator::DEFAULT_MAX_CANDIDATES;
use crate::pipeline::types::WindowPreset;

/// Default model for classification and replies.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Triage run configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Ledger database file.
    pub db_path: PathBuf,
    /// Maximum candidates loaded per run.
    pub max_candidates: usize,
    /// Which window a run covers.
    pub window: WindowPreset,
    /// Directory for the rolling log file.
    pub log_dir: PathBuf,
    /// Use the keyword classifier and reply templates instead of a model.
    pub mock_ai: bool,
    /// Model settings, present when `OPENAI_API_KEY` is set.
    pub llm: Option<LlmConfig>,
    pub imap: ImapConfig,
}

impl TriageConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = get("TRIAGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/job-triage.db"));

        let max_candidates = match get("TRIAGE_MAX_CANDIDATES") {
            Some(raw) => parse_value::<usize>("TRIAGE_MAX_CANDIDATES", &raw)?,
            None => DEFAULT_MAX_CANDIDATES,
        };
        if max_candidates == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TRIAGE_MAX_CANDIDATES".into(),
                message: "must be at least 1".into(),
            });
        }

        let window = match get("TRIAGE_WINDOW") {
            Some(raw) => raw.parse::<WindowPreset>()?,
            None => WindowPreset::Today,
        };

        let log_dir = get("TRIAGE_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./logs"));

        let mock_ai = match get("TRIAGE_MOCK_AI") {
            Some(raw) => parse_bool("TRIAGE_MOCK_AI", &raw)?,
            None => false,
        };

        let llm = get("OPENAI_API_KEY").map(|api_key| LlmConfig {
            api_key: SecretString::from(api_key),
            model: get("TRIAGE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        });

        let defaults = ImapConfig::default();
        let imap = ImapConfig {
            host: get("TRIAGE_IMAP_HOST").unwrap_or(defaults.host),
            port: match get("TRIAGE_IMAP_PORT") {
                Some(raw) => parse_value::<u16>("TRIAGE_IMAP_PORT", &raw)?,
                None => defaults.port,
            },
            drafts_folder: get("TRIAGE_DRAFTS_FOLDER").unwrap_or(defaults.drafts_folder),
        };

        Ok(Self {
            db_path,
            max_candidates,
            window,
            log_dir,
            mock_ai,
            llm,
            imap,
        })
    }

    /// Model settings for a triage run, `None` in mock mode.
    ///
    /// Errors when a model is needed but no API key was given.
    pub fn require_llm(&self) -> Result<Option<&LlmConfig>, ConfigError> {
        if self.mock_ai {
            return Ok(None);
        }
        self.llm
            .as_ref()
            .map(Some)
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENAI_API_KEY".into()))
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{other}' is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    fn config_from(pairs: &[(&str, &str)]) -> Result<TriageConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TriageConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_with_api_key() {
        let config = config_from(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("./data/job-triage.db"));
        assert_eq!(config.max_candidates, 150);
        assert_eq!(config.window, WindowPreset::Today);
        assert_eq!(config.imap, ImapConfig::default());

        let llm = config.require_llm().unwrap().unwrap();
        assert_eq!(llm.model, "gpt-4o-mini");
        assert_eq!(llm.api_key.expose_secret(), "sk-test");
        assert_eq!(llm.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn missing_api_key_is_an_error_unless_mocked() {
        let config = config_from(&[]).unwrap();
        assert!(matches!(
            config.require_llm(),
            Err(ConfigError::MissingEnvVar(key)) if key == "OPENAI_API_KEY"
        ));

        let config = config_from(&[("TRIAGE_MOCK_AI", "true"), ("OPENAI_API_KEY", "sk")]).unwrap();
        assert!(config.require_llm().unwrap().is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("TRIAGE_MOCK_AI", "1"),
            ("TRIAGE_DB_PATH", "/tmp/t.db"),
            ("TRIAGE_MAX_CANDIDATES", "3"),
            ("TRIAGE_WINDOW", "last_week"),
            ("TRIAGE_IMAP_HOST", "imap.example.com"),
            ("TRIAGE_IMAP_PORT", "1993"),
            ("TRIAGE_DRAFTS_FOLDER", "Drafts"),
        ])
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/t.db"));
        assert_eq!(config.max_candidates, 3);
        assert_eq!(config.window, WindowPreset::LastWeek);
        assert_eq!(config.imap.host, "imap.example.com");
        assert_eq!(config.imap.port, 1993);
        assert_eq!(config.imap.drafts_folder, "Drafts");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let bad = [
            ("TRIAGE_MAX_CANDIDATES", "many"),
            ("TRIAGE_MAX_CANDIDATES", "0"),
            ("TRIAGE_IMAP_PORT", "99999"),
            ("TRIAGE_WINDOW", "fortnight"),
            ("TRIAGE_MOCK_AI", "maybe"),
        ];
        for (key, value) in bad {
            let result = config_from(&[("TRIAGE_MOCK_AI", "true"), (key, value)]);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { .. })),
                "{key}={value} should be rejected"
            );
        }
    }
}
