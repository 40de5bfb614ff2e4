use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::bookkeeping::LayoutConfig;
use crate::controller::ControllerConfig;
use crate::dispatcher::DispatchConfig;
use crate::fragment::SourceConfig;
use crate::run::ProbeConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    pub probe: ProbeConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Where the toolchain parameter file lives.
///
/// The file itself is read at every controller reset, not at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolchainConfig {
    #[serde(default = "default_parameters_path")]
    pub parameters_path: PathBuf,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            parameters_path: default_parameters_path(),
        }
    }
}

fn default_parameters_path() -> PathBuf {
    PathBuf::from("/tmp/ngt/ngtParameters.jsn")
}

/// Durable controller state (finalized runs + single-writer lock)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            lock_path: default_lock_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("runloop.db")
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("runloop.lock")
}

/// Operational HTTP endpoint (health + metrics)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    9464
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookkeeping::AccumulationPolicy;
    use crate::dispatcher::JobFlavor;
    use crate::fragment::SourceBackend;
    use crate::run::ProbeBackend;

    const MINIMAL: &str = r#"
[probe]
backend = "directory"

[probe.directory]
base_path = "/tmp/ngt"

[source]
backend = "directory"

[source.directory]
recursive = true
"#;

    #[test]
    fn test_deserialize_minimal_config() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.probe.backend, ProbeBackend::Directory);
        assert_eq!(config.source.backend, SourceBackend::Directory);
        assert_eq!(config.controller.flavor, JobFlavor::Express);
        assert_eq!(config.controller.accumulation, AccumulationPolicy::Delta);
        assert_eq!(config.state.path.to_str().unwrap(), "runloop.db");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(!config.server.enabled);
        assert_eq!(config.server.port, 9464);
    }

    #[test]
    fn test_deserialize_missing_probe_fails() {
        let toml = r#"
[source]
backend = "directory"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_with_server_and_state() {
        let toml = format!(
            r#"
log_format = "json"

[state]
path = "/var/lib/runloop/state.db"
lock_path = "/var/lib/runloop/lock"

[server]
enabled = true
host = "0.0.0.0"
port = 9100
{}"#,
            MINIMAL
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.state.path.to_str().unwrap(), "/var/lib/runloop/state.db");
        assert!(config.server.enabled);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.server.port, 9100);
    }

    #[test]
    fn test_default_toolchain_path() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(
            config.toolchain.parameters_path.to_str().unwrap(),
            "/tmp/ngt/ngtParameters.jsn"
        );
    }
}
