use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::{Host, Url};

use crate::models::AnswerPolicy;

pub const DEFAULT_QUESTIONS: [&str; 5] = [
    "1. Over the last 2 weeks, how often have you been bothered by feeling down, depressed, or hopeless?",
    "2. Over the last 2 weeks, how often have you been bothered by little interest or pleasure in doing things?",
    "3. How would you rate your current stress level on a scale of 1 to 10?",
    "4. Have you been having trouble sleeping recently? If so, please describe.",
    "5. Do you feel that your physical symptoms (like headache, pain) are related to your current stress or emotions?",
];

/// Main configuration structure for the screening app
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub questionnaire: QuestionnaireConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub bind: String,
    #[serde(default)]
    pub surface: Surface,
    /// How long an unused form session is kept before it is dropped
    #[serde(default = "default_session_ttl_seconds")]
    pub session_ttl_seconds: u64,
}

fn default_session_ttl_seconds() -> u64 {
    3600
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    #[default]
    Http,
    Terminal,
}

impl Surface {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "http" | "web" => Some(Surface::Http),
            "terminal" | "tty" | "cli" => Some(Surface::Terminal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the Ollama server
    pub endpoint: String,
    /// Model to generate the summary with
    pub model_id: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionnaireConfig {
    pub questions: Vec<String>,
    #[serde(default)]
    pub answer_policy: AnswerPolicy,
}

impl Config {
    /// Load configuration from file with environment variable overrides
    /// ALWAYS returns a valid config - never fails
    pub fn load() -> Self {
        let env_paths = ["../.env", ".env"];

        let mut env_loaded = false;
        for path in &env_paths {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                env_loaded = true;
                break;
            }
        }

        if !env_loaded {
            tracing::debug!("No .env file found - continuing with env vars only");
        }

        let config_path =
            env::var("SCREENING_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = Self::from_file(&config_path);
        config.apply_env_overrides(|key| env::var(key).ok());
        config.fall_back_invalid_fields();

        if let Err(e) = config.validate() {
            tracing::warn!("Config validation warnings: {} - continuing anyway", e);
        }

        config
    }

    fn from_file(config_path: &str) -> Self {
        if !Path::new(config_path).exists() {
            tracing::warn!("Config file not found at {} - using defaults", config_path);
            return Self::default();
        }

        match fs::read_to_string(config_path) {
            Ok(contents) => match serde_yaml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path);
                    config
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to parse config file {}: {} - using defaults",
                        config_path,
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!(
                    "Failed to read config file {}: {} - using defaults",
                    config_path,
                    e
                );
                Self::default()
            }
        }
    }

    /// Apply environment variable overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(surface) = lookup("SCREENING_SURFACE") {
            match Surface::parse(&surface) {
                Some(s) => self.server.surface = s,
                None => tracing::warn!(
                    "Unknown SCREENING_SURFACE '{}', keeping {:?}",
                    surface,
                    self.server.surface
                ),
            }
        }
        if let Some(bind) = lookup("SCREENING_HTTP_BIND") {
            self.server.bind = bind;
        }
        if let Some(ttl) = lookup("SCREENING_SESSION_TTL_SECONDS") {
            match positive_seconds(&ttl) {
                Some(secs) => self.server.session_ttl_seconds = secs,
                None => tracing::warn!("Ignoring SCREENING_SESSION_TTL_SECONDS '{}'", ttl),
            }
        }

        if let Some(endpoint) = lookup("OLLAMA_HOST") {
            self.backend.endpoint = normalize_endpoint(&endpoint);
        }
        if let Some(model) = lookup("SCREENING_MODEL") {
            self.backend.model_id = model;
        }
        if let Some(timeout) = lookup("SCREENING_TIMEOUT_SECONDS") {
            match positive_seconds(&timeout) {
                Some(secs) => self.backend.timeout_seconds = secs,
                None => tracing::warn!("Ignoring SCREENING_TIMEOUT_SECONDS '{}'", timeout),
            }
        }

        if let Some(policy) = lookup("SCREENING_ANSWER_POLICY") {
            match AnswerPolicy::parse(&policy) {
                Some(p) => self.questionnaire.answer_policy = p,
                None => tracing::warn!("Unknown SCREENING_ANSWER_POLICY '{}'", policy),
            }
        }
    }

    /// Replace each unusable setting with its default so a bad file or variable cannot leave
    /// the app with no questions or a zero timeout.
    fn fall_back_invalid_fields(&mut self) {
        let defaults = Config::default();

        let questions = &self.questionnaire.questions;
        if questions.is_empty() || questions.iter().any(|q| q.trim().is_empty()) {
            tracing::warn!(
                "questionnaire.questions is empty or has blank entries - using defaults"
            );
            self.questionnaire.questions = defaults.questionnaire.questions;
        }
        if self.backend.model_id.trim().is_empty() {
            tracing::warn!("backend.model_id is empty - using {}", defaults.backend.model_id);
            self.backend.model_id = defaults.backend.model_id;
        }
        if self.backend.timeout_seconds == 0 {
            tracing::warn!(
                "backend.timeout_seconds is 0 - using {}",
                defaults.backend.timeout_seconds
            );
            self.backend.timeout_seconds = defaults.backend.timeout_seconds;
        }
        if !has_http_scheme(&self.backend.endpoint) {
            tracing::warn!(
                "backend.endpoint '{}' is not an http(s) URL - using {}",
                self.backend.endpoint,
                defaults.backend.endpoint
            );
            self.backend.endpoint = defaults.backend.endpoint;
        }
        if self.server.session_ttl_seconds == 0 {
            tracing::warn!(
                "server.session_ttl_seconds is 0 - using {}",
                defaults.server.session_ttl_seconds
            );
            self.server.session_ttl_seconds = defaults.server.session_ttl_seconds;
        }
        if self.bind_addr().is_err() {
            tracing::warn!(
                "server.bind '{}' is not a socket address - using {}",
                self.server.bind,
                defaults.server.bind
            );
            self.server.bind = defaults.server.bind;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.questionnaire.questions.is_empty() {
            return Err("questionnaire.questions cannot be empty".into());
        }
        if self.questionnaire.questions.iter().any(|q| q.trim().is_empty()) {
            return Err("questionnaire.questions cannot contain blank questions".into());
        }
        if self.backend.model_id.trim().is_empty() {
            return Err("backend.model_id cannot be empty".into());
        }
        if self.backend.timeout_seconds == 0 {
            return Err("backend.timeout_seconds cannot be 0".into());
        }
        if self.server.session_ttl_seconds == 0 {
            return Err("server.session_ttl_seconds cannot be 0".into());
        }
        if !has_http_scheme(&self.backend.endpoint) {
            return Err(format!(
                "backend.endpoint '{}' must start with http:// or https://",
                self.backend.endpoint
            )
            .into());
        }
        if !is_local_endpoint(&self.backend.endpoint) {
            tracing::warn!(
                "backend.endpoint points to non-local address '{}'. \
                 Screening answers will leave this machine.",
                self.backend.endpoint
            );
        }
        self.bind_addr()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.server.bind.parse()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_seconds)
    }

    pub fn questions(&self) -> Arc<[String]> {
        self.questionnaire.questions.clone().into()
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.server.session_ttl_seconds)
    }
}

fn positive_seconds(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|secs| *secs > 0)
}

fn has_http_scheme(endpoint: &str) -> bool {
    Url::parse(endpoint).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

/// `OLLAMA_HOST` is often given as bare `host:port`.
fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if has_http_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

fn is_local_endpoint(endpoint: &str) -> bool {
    match Url::parse(endpoint) {
        Ok(parsed) => match parsed.host() {
            Some(Host::Domain(d)) => d == "localhost",
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            None => false,
        },
        Err(_) => false,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "ED Mental Health Screening Demo".to_string(),
                bind: "127.0.0.1:8501".to_string(),
                surface: Surface::Http,
                session_ttl_seconds: default_session_ttl_seconds(),
            },
            backend: BackendConfig {
                endpoint: "http://localhost:11434".to_string(),
                model_id: "qwen2.5:7b".to_string(),
                timeout_seconds: 120,
            },
            questionnaire: QuestionnaireConfig {
                questions: DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect(),
                answer_policy: AnswerPolicy::NonBlank,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.questionnaire.questions.len(), 5);
        assert_eq!(cfg.backend.model_id, "qwen2.5:7b");
        assert_eq!(cfg.timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(overrides(&[
            ("SCREENING_SURFACE", "terminal"),
            ("OLLAMA_HOST", "127.0.0.1:11500/"),
            ("SCREENING_MODEL", "llama3.2:3b"),
            ("SCREENING_TIMEOUT_SECONDS", "45"),
            ("SCREENING_ANSWER_POLICY", "non_empty"),
        ]));
        assert_eq!(cfg.server.surface, Surface::Terminal);
        assert_eq!(cfg.backend.endpoint, "http://127.0.0.1:11500");
        assert_eq!(cfg.backend.model_id, "llama3.2:3b");
        assert_eq!(cfg.backend.timeout_seconds, 45);
        assert_eq!(cfg.questionnaire.answer_policy, AnswerPolicy::NonEmpty);
    }

    #[test]
    fn test_bad_env_values_are_ignored() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(overrides(&[
            ("SCREENING_SURFACE", "carrier-pigeon"),
            ("SCREENING_TIMEOUT_SECONDS", "soon"),
        ]));
        assert_eq!(cfg.server.surface, Surface::Http);
        assert_eq!(cfg.backend.timeout_seconds, 120);
    }

    #[test]
    fn test_zero_timeout_override_is_rejected() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(overrides(&[
            ("SCREENING_TIMEOUT_SECONDS", "0"),
            ("SCREENING_SESSION_TTL_SECONDS", "0"),
        ]));
        assert_eq!(cfg.timeout(), Duration::from_secs(120));
        assert_eq!(cfg.session_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_invalid_fields_fall_back_to_defaults() {
        let mut cfg = Config::default();
        cfg.questionnaire.questions.clear();
        cfg.backend.timeout_seconds = 0;
        cfg.backend.model_id = "  ".to_string();
        cfg.backend.endpoint = "localhost:11434".to_string();
        cfg.server.bind = "not an address".to_string();
        cfg.server.session_ttl_seconds = 0;
        assert!(cfg.validate().is_err());

        cfg.fall_back_invalid_fields();
        let defaults = Config::default();
        assert_eq!(cfg.questionnaire.questions, defaults.questionnaire.questions);
        assert_eq!(cfg.backend.timeout_seconds, 120);
        assert_eq!(cfg.backend.model_id, "qwen2.5:7b");
        assert_eq!(cfg.backend.endpoint, "http://localhost:11434");
        assert_eq!(cfg.server.bind, "127.0.0.1:8501");
        assert_eq!(cfg.server.session_ttl_seconds, 3600);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_blank_question_list_from_file_falls_back() {
        let yaml = r#"
server:
  name: Test
  bind: "127.0.0.1:9000"
backend:
  endpoint: "http://localhost:11434"
  model_id: "qwen2.5:7b"
  timeout_seconds: 0
questionnaire:
  questions: []
"#;
        let mut cfg: Config = serde_yaml::from_str(yaml).unwrap();
        cfg.fall_back_invalid_fields();
        assert_eq!(cfg.questions().len(), 5);
        assert_eq!(cfg.timeout(), Duration::from_secs(120));
        assert_eq!(cfg.server.name, "Test");
    }

    #[test]
    fn test_yaml_round_trip_with_defaults() {
        let yaml = r#"
server:
  name: Test
  bind: "0.0.0.0:9000"
backend:
  endpoint: "http://localhost:11434"
  model_id: "qwen2.5:7b"
  timeout_seconds: 60
questionnaire:
  questions:
    - "How are you?"
    - "Sleeping well?"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.server.surface, Surface::Http);
        assert_eq!(cfg.questionnaire.answer_policy, AnswerPolicy::NonBlank);
        assert_eq!(cfg.questions().len(), 2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_broken_settings() {
        let mut cfg = Config::default();
        cfg.questionnaire.questions.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.backend.timeout_seconds = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.backend.endpoint = "localhost:11434".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.server.bind = "not an address".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_local_endpoint_detection() {
        assert!(is_local_endpoint("http://localhost:11434"));
        assert!(is_local_endpoint("http://127.0.0.1:11434"));
        assert!(is_local_endpoint("http://[::1]:11434"));
        assert!(!is_local_endpoint("http://192.168.1.100:11434"));
        assert!(!is_local_endpoint("https://ollama.example.com"));
        assert!(!is_local_endpoint("http://127.attacker.example.com:11434"));
        assert!(!is_local_endpoint("not a url"));
    }

    #[test]
    fn test_endpoint_normalization() {
        assert_eq!(normalize_endpoint("localhost:11434"), "http://localhost:11434");
        assert_eq!(normalize_endpoint("https://gpu.local:11434/"), "https://gpu.local:11434");
        assert!(!has_http_scheme("localhost:11434"));
        assert!(!has_http_scheme("ftp://localhost"));
    }
}
