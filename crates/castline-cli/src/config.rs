// CLI configuration
//
// TOML file (or the embedded defaults) first, then environment overrides.

use anyhow::{Context, Result};
use castline_core::{CastlineError, PipelineConfig};
use castline_openai::DASHSCOPE_BASE_URL;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Built-in configuration used when no file is given
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

const API_KEY_VARS: [&str; 3] = ["CASTLINE_API_KEY", "OPENAI_API_KEY", "DASHSCOPE_API_KEY"];
const BASE_URL_VARS: [&str; 2] = ["CASTLINE_BASE_URL", "OPENAI_BASE_URL"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSettings,
    pub pipeline: PipelineConfig,
}

/// Text-generation endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    /// Only ever taken from the environment
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DASHSCOPE_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

impl AppConfig {
    /// Load `path`, or the embedded defaults when `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
            }
            None => Self::parse(DEFAULT_CONFIG).context("Invalid built-in configuration"),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let first_set = |names: &[&str]| {
            names
                .iter()
                .copied()
                .filter_map(|name| lookup(name))
                .find(|value| !value.trim().is_empty())
        };

        if let Some(key) = first_set(&API_KEY_VARS) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = first_set(&BASE_URL_VARS) {
            self.llm.base_url = url;
        }
        if let Some(model) = first_set(&["CASTLINE_MODEL"]) {
            self.pipeline.generator.model = model;
        }
        if let Some(workers) = first_set(&["CASTLINE_WORKERS"]) {
            self.pipeline.generator.workers = workers
                .trim()
                .parse()
                .with_context(|| format!("CASTLINE_WORKERS must be a positive integer, got {:?}", workers))?;
        }
        Ok(())
    }

    /// API key for generation, required unless running offline
    pub fn require_api_key(&self) -> Result<&str> {
        self.llm.api_key.as_deref().ok_or_else(|| {
            CastlineError::config(format!(
                "no API key set; export one of {} or pass --offline",
                API_KEY_VARS.join(", ")
            ))
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_builtin_config_matches_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert_eq!(config.llm.base_url, DASHSCOPE_BASE_URL);
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = AppConfig::parse(
            r#"
            [pipeline.scheduler]
            preemption_threshold = 4

            [pipeline.generator]
            workers = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.scheduler.preemption_threshold, 4);
        assert_eq!(config.pipeline.scheduler.grace_secs, 3.0);
        assert_eq!(config.pipeline.generator.workers, 2);
        assert_eq!(config.pipeline.half_boundary_round, 13);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("castline.toml");
        std::fs::write(&path, "[pipeline]\nhalf_boundary_round = 16\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.pipeline.half_boundary_round, 16);

        assert!(AppConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(env(&[
                ("OPENAI_API_KEY", "sk-openai"),
                ("DASHSCOPE_API_KEY", "sk-dashscope"),
                ("CASTLINE_BASE_URL", "http://localhost:8000/v1"),
                ("CASTLINE_MODEL", "qwen-max"),
                ("CASTLINE_WORKERS", "4"),
            ]))
            .unwrap();

        assert_eq!(config.require_api_key().unwrap(), "sk-openai");
        assert_eq!(config.llm.base_url, "http://localhost:8000/v1");
        assert_eq!(config.pipeline.generator.model, "qwen-max");
        assert_eq!(config.pipeline.generator.workers, 4);
    }

    #[test]
    fn test_blank_key_is_ignored() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(env(&[("CASTLINE_API_KEY", " "), ("DASHSCOPE_API_KEY", "sk-ds")]))
            .unwrap();
        assert_eq!(config.require_api_key().unwrap(), "sk-ds");
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let config = AppConfig::default();
        let err = config.require_api_key().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CastlineError>(),
            Some(CastlineError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_worker_count() {
        let mut config = AppConfig::default();
        assert!(config
            .apply_overrides(env(&[("CASTLINE_WORKERS", "many")]))
            .is_err());
    }
}
