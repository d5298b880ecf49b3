//! Client configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Generation of the Data Access Protocol spoken with a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Dap2,
    Dap4,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Dap2 => "dap2",
            Protocol::Dap4 => "dap4",
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dap2" => Ok(Protocol::Dap2),
            "dap4" => Ok(Protocol::Dap4),
            other => Err(format!("unknown protocol '{}', expected dap2 or dap4", other)),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options used when opening a remote dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for every request, in seconds.
    pub timeout_secs: u64,

    /// Verify TLS certificates.
    pub verify_tls: bool,

    /// Read grid maps together with the main array.
    pub output_grid: bool,

    /// Charset used to decode text responses that do not declare one.
    pub user_charset: String,

    /// Force a protocol instead of detecting it from the URL.
    pub protocol: Option<Protocol>,

    /// Compare DAP4 checksums with a CRC-32 of each variable's payload.
    pub verify_checksums: bool,

    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            verify_tls: true,
            output_grid: true,
            user_charset: "ascii".to_string(),
            protocol: None,
            verify_checksums: false,
            user_agent: format!("dap-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DAP_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("DAP_VERIFY_TLS") {
            config.verify_tls = parse_bool(&val);
        }

        if let Ok(val) = std::env::var("DAP_OUTPUT_GRID") {
            config.output_grid = parse_bool(&val);
        }

        if let Ok(val) = std::env::var("DAP_USER_CHARSET") {
            config.user_charset = val;
        }

        if let Ok(val) = std::env::var("DAP_PROTOCOL") {
            if let Ok(protocol) = val.parse() {
                config.protocol = Some(protocol);
            }
        }

        if let Ok(val) = std::env::var("DAP_VERIFY_CHECKSUMS") {
            config.verify_checksums = parse_bool(&val);
        }

        if let Ok(val) = std::env::var("DAP_USER_AGENT") {
            config.user_agent = val;
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be > 0".to_string());
        }

        if self.user_charset.trim().is_empty() {
            return Err("user_charset must not be empty".to_string());
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn parse_bool(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}
