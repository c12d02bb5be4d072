// Configuration loader with environment variable substitution

use super::types::ServeConfig;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ServeConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        // Substitute environment variables
        let content = Self::substitute_env_vars(&content);

        // Parse YAML
        let config: ServeConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        // Validate configuration
        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${DEVICE_ID:-device-001} -> device-001 (if DEVICE_ID not set)
    fn substitute_env_vars(content: &str) -> String {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}").unwrap();

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    if let Some(default) = default_value {
                        default.to_string()
                    } else {
                        // Keep original if no default and var not found
                        format!("${{{}}}", var_name)
                    }
                }
            }
        }).to_string()
    }

    /// Validate configuration
    pub fn validate(config: &ServeConfig) -> Result<()> {
        match config.bus.mode.as_str() {
            "managed" => {
                if config.bus.host.is_empty() {
                    bail!("bus.host cannot be empty in managed mode");
                }
            }
            "external" => {
                if config.bus.url.is_empty() {
                    bail!("bus.url cannot be empty in external mode");
                }
            }
            unknown => bail!("Unknown bus mode: '{}'. Supported: managed, external", unknown),
        }

        if config.services.command_subject.is_empty() {
            bail!("services.command_subject cannot be empty");
        }
        if config.services.state_bucket.is_empty() {
            bail!("services.state_bucket cannot be empty");
        }
        if config.services.device_bucket.is_empty() {
            bail!("services.device_bucket cannot be empty");
        }
        if config.services.monitor_subject.is_empty() {
            bail!("services.monitor_subject cannot be empty");
        }
        if config.services.buffer_refresh_seconds == 0 {
            bail!("services.buffer_refresh_seconds must be > 0");
        }

        if let Some(proxy) = &config.proxy {
            if proxy.enabled {
                if proxy.listen_addr.is_empty() {
                    bail!("proxy.listen_addr cannot be empty");
                }
                if proxy.reconnect_attempts == 0 {
                    bail!("proxy.reconnect_attempts must be >= 1");
                }
                if proxy.reconnect_backoff_ms == 0 {
                    bail!("proxy.reconnect_backoff_ms must be > 0");
                }
                for route in &proxy.routes {
                    if route.targets.is_empty() {
                        bail!("proxy route '{}' must define at least one target", route.path);
                    }
                    match route.mode.as_str() {
                        "text" | "binary" => {}
                        unknown => bail!(
                            "proxy route '{}': unknown mode '{}'. Supported: text, binary",
                            route.path,
                            unknown
                        ),
                    }
                }
            }
        }

        if let Some(relay) = &config.relay {
            if relay.enabled && relay.subject.is_empty() {
                bail!("relay.subject cannot be empty");
            }
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            unknown => bail!("Unknown log level: '{}'", unknown),
        }

        Ok(())
    }
}
