use serde::Deserialize;
use std::{fs, path::Path};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub llm: LlmSection,
}

fn default_db_path() -> String {
    "repairstore/repairs.db".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            report: ReportConfig::default(),
            llm: LlmSection::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_commission_rate")]
    pub commission_rate: f64,
    #[serde(default = "default_completed_statuses")]
    pub completed_statuses: Vec<String>,
}

fn default_commission_rate() -> f64 {
    0.15
}

fn default_completed_statuses() -> Vec<String> {
    ["Completed", "Complete", "Invoiced", "Closed"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            commission_rate: default_commission_rate(),
            completed_statuses: default_completed_statuses(),
        }
    }
}

/// Which engine structures office notes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    Heuristics,
    Ollama,
    Remote,
}

#[derive(Debug, Deserialize)]
pub struct LlmSection {
    #[serde(default)]
    pub backend: LlmBackend,
    #[serde(default = "Endpoint::ollama")]
    pub ollama: Endpoint,
    #[serde(default = "Endpoint::remote")]
    pub remote: Endpoint,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub base_url: String,
    pub model: String,
}

impl Endpoint {
    fn ollama() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "qwen3:8b".to_string(),
        }
    }

    fn remote() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: LlmBackend::default(),
            ollama: Endpoint::ollama(),
            remote: Endpoint::remote(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if path.exists() {
            info!(path = %path.display(), "Loading config");
            Self::load(path)
        } else {
            info!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }
}
