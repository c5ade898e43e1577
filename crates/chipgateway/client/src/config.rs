//! Client configuration
//!
//! Values are merged from built-in defaults, a TOML file and `CHIPGATEWAY_` prefixed
//! environment variables, later sources taking precedence.

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::update::UpdatePolicy;

/// Default configuration file name
pub const CONFIG_FILE: &str = "chipgateway.toml";

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "CHIPGATEWAY_";

/// ChipGateway client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Verify the server's signature over the hello challenge
    pub validate_challenge_response: bool,
    /// Accept PINs sent encrypted by the server
    pub remote_pin_allowed: bool,
    /// Only show download addresses whose host is allow-listed
    pub enforce_update_allowlist: bool,
    /// Allowed download hosts, exact or `*.` wildcard
    pub update_allowlist: Vec<String>,
    /// Trust store replacing the bundled one
    pub trust_store: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            validate_challenge_response: true,
            remote_pin_allowed: true,
            enforce_update_allowlist: true,
            update_allowlist: vec!["openecard.org".into(), "*.openecard.org".into()],
            trust_store: None,
        }
    }
}

impl GatewayConfig {
    /// Layered configuration sources, reading `path` or [`CONFIG_FILE`]
    pub fn figment(path: Option<&Path>) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.unwrap_or(Path::new(CONFIG_FILE))))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load the configuration
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// Download address policy described by this configuration
    pub fn update_policy(&self) -> UpdatePolicy {
        UpdatePolicy::new(self.enforce_update_allowlist, self.update_allowlist.clone())
    }
}
