use regex_lite::Regex;

use super::{types::Config, ConfigError};
use crate::fragment::SourceBackend;
use crate::run::ProbeBackend;

/// Validate configuration
/// Currently validates:
/// - Controller thresholds and intervals are non-zero
/// - The selected probe and source backends have their subsection
/// - The ordering key pattern compiles and has a capture group
/// - Lumisection lookups have a non-zero timeout
/// - Server port is not 0 when the server is enabled
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.controller.minimum_batch == 0 {
        return invalid("controller.minimum_batch cannot be 0");
    }
    if config.controller.poll_interval_ms == 0 {
        return invalid("controller.poll_interval_ms cannot be 0");
    }
    if config.controller.idle_poll_interval_ms == 0 {
        return invalid("controller.idle_poll_interval_ms cannot be 0");
    }

    match config.probe.backend {
        ProbeBackend::Directory if config.probe.directory.is_none() => {
            return invalid("probe.backend = \"directory\" requires a [probe.directory] section");
        }
        ProbeBackend::Oms => match &config.probe.oms {
            None => return invalid("probe.backend = \"oms\" requires a [probe.oms] section"),
            Some(oms) if !oms.location_template.contains("{run_path}") => {
                return invalid("probe.oms.location_template must contain {run_path}");
            }
            Some(_) => {}
        },
        _ => {}
    }

    match config.source.backend {
        SourceBackend::Directory if config.source.directory.is_none() => {
            return invalid("source.backend = \"directory\" requires a [source.directory] section");
        }
        SourceBackend::Xrootd if config.source.xrootd.is_none() => {
            return invalid("source.backend = \"xrootd\" requires a [source.xrootd] section");
        }
        _ => {}
    }

    let pattern = Regex::new(&config.source.ordering_key_pattern).map_err(|e| {
        ConfigError::ValidationError(format!("source.ordering_key_pattern is invalid: {}", e))
    })?;
    if pattern.captures_len() < 2 {
        return invalid("source.ordering_key_pattern needs a capture group for the key");
    }

    if config.source.lumi_keys.as_ref().is_some_and(|l| l.timeout_secs == 0) {
        return invalid("source.lumi_keys.timeout_secs cannot be 0");
    }

    if config.server.enabled && config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    Ok(())
}
