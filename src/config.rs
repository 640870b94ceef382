//! Configuration for the stub server.
//!
//! Defines the listener address, the stub files root, logging switches, and
//! stubs to register at startup.

use crate::registry::StubDefinition;
use crate::response::ResponseTemplate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the stub server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind the listener to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number, or `dynamic` to let the OS choose
    #[serde(default)]
    pub port: PortSetting,

    /// Directory that file-backed response bodies are resolved against
    #[serde(default = "default_stub_files_root")]
    pub stub_files_root: PathBuf,

    /// Serve the `/__admin` endpoints
    #[serde(default = "default_true")]
    pub admin_enabled: bool,

    /// How long `stop` waits for in-flight connections before aborting them
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Largest request body accepted; larger bodies get a 413
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Response when no stub matches; a 404 describing the request otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_response: Option<ResponseTemplate>,

    /// Stubs registered at startup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stubs: Vec<StubDefinition>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_stub_files_root() -> PathBuf {
    PathBuf::from("__files")
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: PortSetting::default(),
            stub_files_root: default_stub_files_root(),
            admin_enabled: true,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            max_body_bytes: default_max_body_bytes(),
            settings: GlobalSettings::default(),
            default_response: None,
            stubs: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loopback listener on an OS-assigned port.
    pub fn dynamic() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: PortSetting::Dynamic,
            ..Self::default()
        }
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = PortSetting::Fixed(port);
        self
    }

    pub fn with_stub_files_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.stub_files_root = root.into();
        self
    }

    pub fn with_default_response(mut self, response: ResponseTemplate) -> Self {
        self.default_response = Some(response);
        self
    }

    pub fn with_admin(mut self, enabled: bool) -> Self {
        self.admin_enabled = enabled;
        self
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML configuration.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.trim().is_empty() {
            anyhow::bail!("bind_address cannot be empty");
        }
        if let Some(response) = &self.default_response {
            response
                .validate()
                .map_err(|e| anyhow::anyhow!("default_response: {}", e))?;
        }
        for (i, stub) in self.stubs.iter().enumerate() {
            stub.request
                .compile()
                .map_err(|e| anyhow::anyhow!("Stub {}: {}", i, e))?;
            stub.response
                .validate()
                .map_err(|e| anyhow::anyhow!("Stub {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// Listener port: a fixed number or `dynamic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PortRepr", into = "PortRepr")]
pub enum PortSetting {
    Fixed(u16),
    Dynamic,
}

impl Default for PortSetting {
    fn default() -> Self {
        PortSetting::Fixed(8080)
    }
}

impl PortSetting {
    /// Port to hand to `bind`; 0 asks the OS for one.
    pub fn bind_port(&self) -> u16 {
        match self {
            PortSetting::Fixed(port) => *port,
            PortSetting::Dynamic => 0,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PortRepr {
    Number(u16),
    Keyword(String),
}

impl TryFrom<PortRepr> for PortSetting {
    type Error = String;

    fn try_from(repr: PortRepr) -> Result<Self, Self::Error> {
        match repr {
            PortRepr::Number(port) => Ok(PortSetting::Fixed(port)),
            PortRepr::Keyword(k) if k.eq_ignore_ascii_case("dynamic") => Ok(PortSetting::Dynamic),
            PortRepr::Keyword(k) => Err(format!(
                "invalid port `{}`: expected a number or \"dynamic\"",
                k
            )),
        }
    }
}

impl From<PortSetting> for PortRepr {
    fn from(port: PortSetting) -> Self {
        match port {
            PortSetting::Fixed(port) => PortRepr::Number(port),
            PortSetting::Dynamic => PortRepr::Keyword("dynamic".to_string()),
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log all matched stubs
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}
