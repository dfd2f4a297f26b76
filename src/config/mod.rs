use std::path::Path;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::EngineSettings;

const DEFAULT_FEED_URL: &str =
    "https://draw.ar-lottery01.com/WinGo/WinGo_30S/GetHistoryIssuePage.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    pub feed_url: String,
    pub poll_interval_secs: u64,
    pub port: u16,
    pub engine: EngineSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./predictor.db".to_string(),
            feed_url: DEFAULT_FEED_URL.to_string(),
            poll_interval_secs: 4,
            port: 4500,
            engine: EngineSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults when the
    /// file does not exist. `DATABASE_URL` overrides the file.
    pub fn load(path: &str) -> Result<Self> {
        let mut settings = if Path::new(path).exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path))?;
            let settings: Settings =
                toml::from_str(&raw).with_context(|| format!("parsing config file {}", path))?;
            info!("Loaded configuration from {}", path);
            settings
        } else {
            info!("No config file at {}, using defaults", path);
            Settings::default()
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            settings.database_url = url;
        }

        settings.validate().map_err(|errors| {
            anyhow::anyhow!("invalid configuration: {}", errors.join(", "))
        })?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.poll_interval_secs == 0 {
            errors.push("poll_interval_secs must be > 0".to_string());
        }
        if self.engine.batch_threshold == 0 {
            errors.push("engine.batch_threshold must be > 0".to_string());
        }
        if self.engine.training.min_examples == 0 {
            errors.push("engine.training.min_examples must be > 0".to_string());
        }
        if self.engine.training.epochs == 0 {
            errors.push("engine.training.epochs must be > 0".to_string());
        }
        if self.engine.training.chunk_size == 0 {
            errors.push("engine.training.chunk_size must be > 0".to_string());
        }
        if self.engine.training.learning_rate <= 0.0 {
            errors.push("engine.training.learning_rate must be > 0".to_string());
        }
        if self.engine.markov_context_cap == Some(0) {
            errors.push("engine.markov_context_cap must be > 0 when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        let mut settings = Settings::default();
        settings.poll_interval_secs = 0;
        settings.engine.batch_threshold = 0;
        let errors = settings.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            port = 8080

            [engine]
            batch_threshold = 10
            "#,
        )
        .unwrap();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.engine.batch_threshold, 10);
        assert_eq!(settings.poll_interval_secs, 4);
    }
}
