use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_MAX_ROUNDS: usize = 25;
pub const OPENAI_DEFAULT_HOST: &str = "https://api.openai.com";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Failed to deserialize config: {0}")]
    DeserializeError(String),
    #[error("Invalid server target: {0}")]
    InvalidServer(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::DeserializeError(err.to_string())
    }
}

/// One remote tool server the host should connect to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTarget {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ServerTarget {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            headers: None,
            name: None,
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// The label tools from this server are tagged with: its name, else its url.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.url),
            None => write!(f, "{}", self.url),
        }
    }
}

/// Parses `url` or `name=url`.
impl FromStr for ServerTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, url) = match s.split_once('=') {
            // '=' inside a query string is not a name separator
            Some((name, url)) if !name.contains("://") && !name.contains('?') => {
                (Some(name.trim()), url.trim())
            }
            _ => (None, s),
        };
        if url.is_empty() || name.is_some_and(str::is_empty) {
            return Err(ConfigError::InvalidServer(s.to_string()));
        }
        let target = ServerTarget::new(url);
        Ok(match name {
            Some(name) => target.with_name(name),
            None => target,
        })
    }
}

/// Settings of the OpenAI-compatible completion service.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("host", &self.host)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

fn default_host() -> String {
    OPENAI_DEFAULT_HOST.to_string()
}

fn default_model() -> String {
    OPENAI_DEFAULT_MODEL.to_string()
}

impl CompletionConfig {
    pub fn new<H: Into<String>, K: Into<String>, M: Into<String>>(
        host: H,
        api_key: K,
        model: M,
    ) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Reads `OPENAI_HOST`, `OPENAI_API_KEY` and `OPENAI_MODEL`.
    ///
    /// Returns `None` without an API key: completions are then disabled rather than
    /// failing later with an authentication error.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())?;
        let host = std::env::var("OPENAI_HOST").unwrap_or_else(|_| default_host());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| default_model());
        Some(Self::new(host, api_key, model))
    }
}

fn default_history() -> bool {
    true
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

/// Everything needed to build an [`McpHost`](crate::host::McpHost).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub servers: Vec<ServerTarget>,
    #[serde(default)]
    pub completion: Option<CompletionConfig>,
    /// Instructions placed ahead of the tool catalog in the system prompt
    #[serde(default)]
    pub system_prompt: String,
    /// Keep the conversation between queries
    #[serde(default = "default_history")]
    pub history: bool,
    /// Upper bound on model calls for a single query
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            completion: None,
            system_prompt: String::new(),
            history: default_history(),
            max_rounds: default_max_rounds(),
        }
    }
}

impl HostConfig {
    pub fn new(servers: Vec<ServerTarget>) -> Self {
        Self {
            servers,
            ..Default::default()
        }
    }

    pub fn with_completion(mut self, completion: Option<CompletionConfig>) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_history(mut self, history: bool) -> Self {
        self.history = history;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}
