//! Configuration — server settings, API info and controller declarations.
//!
//! Everything can be built in code; a TOML file is the alternative:
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [info]
//! title = "Dinosaur API"
//! version = "1.0.0"
//!
//! [[controllers]]
//! name = "Dinosaur"
//!
//! [controllers.tree."/food".GET.res]
//! body = "string"
//!
//! [controllers.tree."/food/{uuid}".DELETE.req]
//! path = "string"
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::controller::{ControllerTree, RegistrationError, Registry};

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Registration(#[from] RegistrationError),
}

/// Network and response settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest request (headers plus body) buffered before answering `413`.
    pub max_request_size: usize,
    /// Initial read buffer capacity per connection.
    pub read_buffer_size: usize,
    /// Body of the baseline `200` sent when no stage handler responds.
    pub placeholder_body: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            max_request_size: 8 * 1024 * 1024,
            read_buffer_size: 4096,
            placeholder_body: "Hello".to_owned(),
        }
    }
}

impl ServerConfig {
    /// `host:port`, ready for binding.
    pub fn address(&self) -> String {
        self.address_on(self.port)
    }

    /// The configured host with another port.
    pub fn address_on(&self, port: u16) -> String {
        format!("{}:{port}", self.host)
    }
}

/// Metadata describing the served API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiInfo {
    pub title: String,
    /// `major.minor.patch`, all numeric.
    pub version: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub terms_of_service: Option<String>,
}

impl ApiInfo {
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            version: version.into(),
            summary: None,
            terms_of_service: None,
        }
    }

    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if the title is empty or the version is not
    /// three dot-separated numbers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.title.trim().is_empty() {
            return Err(ConfigError::Invalid("info.title must not be empty".into()));
        }
        let parts: Vec<&str> = self.version.split('.').collect();
        let numeric = parts.len() == 3
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
        if !numeric {
            return Err(ConfigError::Invalid(format!(
                "info.version `{}` must look like 1.2.3",
                self.version
            )));
        }
        Ok(())
    }
}

impl Default for ApiInfo {
    fn default() -> Self {
        Self::new("rttp-dispatch", env!("CARGO_PKG_VERSION"))
    }
}

/// One `[[controllers]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerDecl {
    pub name: String,
    pub tree: ControllerTree,
}

/// A complete application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub info: ApiInfo,
    pub controllers: Vec<ControllerDecl>,
}

impl Config {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown keys,
    /// [`ConfigError::Invalid`] for values that fail validation.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for a bad `info` block or a zero-sized limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.info.validate()?;
        if self.server.max_request_size == 0 {
            return Err(ConfigError::Invalid(
                "server.max_request_size must be greater than zero".into(),
            ));
        }
        if self.server.read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "server.read_buffer_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Registers every declared controller, in file order, into a new
    /// unsealed registry.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Registration`] for the first declaration that fails.
    pub fn registry(&self) -> Result<Registry, ConfigError> {
        let mut registry = Registry::new();
        for decl in &self.controllers {
            registry.register(&decl.name, decl.tree.clone())?;
        }
        Ok(registry)
    }
}
