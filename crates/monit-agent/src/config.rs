// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;
use crate::tls::TlsSettings;
use crate::upstream::Upstream;

/// Agent configuration read from `MONIT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Remote collector host
    pub upstream_host: Option<String>,
    /// Remote collector port
    pub upstream_port: Option<u16>,
    /// PEM trust bundle; enables TLS when set
    pub tls_ca_file: Option<PathBuf>,
    /// Name verified against the collector certificate, defaults to the host
    pub tls_server_name: Option<String>,
    /// Working directory override, defaults to `<home>/monit-go`
    pub workdir: Option<PathBuf>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// File followed by the tail binary
    pub tail_file: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            upstream_host: None,
            upstream_port: None,
            tls_ca_file: None,
            tls_server_name: None,
            workdir: None,
            log_level: "info".to_string(),
            tail_file: None,
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|val| !val.trim().is_empty())
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let upstream_port = match non_empty("MONIT_UPSTREAM_PORT") {
            Some(port) => Some(port.trim().parse::<u16>().map_err(|_| {
                ConfigError::Invalid(format!("MONIT_UPSTREAM_PORT '{port}' is not a port number"))
            })?),
            None => None,
        };
        let log_level = env::var("MONIT_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            upstream_host: non_empty("MONIT_UPSTREAM_HOST"),
            upstream_port,
            tls_ca_file: non_empty("MONIT_TLS_CA_FILE").map(PathBuf::from),
            tls_server_name: non_empty("MONIT_TLS_SERVER_NAME"),
            workdir: non_empty("MONIT_WORKDIR").map(PathBuf::from),
            log_level,
            tail_file: non_empty("MONIT_TAIL_FILE").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_port == Some(0) {
            return Err(ConfigError::Invalid(
                "upstream port must be greater than 0".to_string(),
            ));
        }

        if self.tls_server_name.is_some() && self.tls_ca_file.is_none() {
            return Err(ConfigError::Invalid(
                "MONIT_TLS_SERVER_NAME requires MONIT_TLS_CA_FILE".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Resolves the remote collector, loading the trust bundle when TLS is on.
    pub fn upstream(&self) -> Result<Upstream, ConfigError> {
        let host = self
            .upstream_host
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("MONIT_UPSTREAM_HOST is required".to_string()))?;
        let port = self
            .upstream_port
            .ok_or_else(|| ConfigError::Invalid("MONIT_UPSTREAM_PORT is required".to_string()))?;

        let upstream = Upstream::new(host, port);
        let Some(ca_file) = &self.tls_ca_file else {
            return Ok(upstream);
        };
        let server_name = self.tls_server_name.as_deref().unwrap_or(host);
        let tls = TlsSettings::from_pem_file(ca_file, server_name)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(upstream.with_tls(tls))
    }

    pub fn tail_file(&self) -> Result<&Path, ConfigError> {
        self.tail_file
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("MONIT_TAIL_FILE is required".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 7] = [
        "MONIT_UPSTREAM_HOST",
        "MONIT_UPSTREAM_PORT",
        "MONIT_TLS_CA_FILE",
        "MONIT_TLS_SERVER_NAME",
        "MONIT_WORKDIR",
        "MONIT_LOG_LEVEL",
        "MONIT_TAIL_FILE",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = AgentConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_server_name_without_bundle() {
        let config = AgentConfig {
            tls_server_name: Some("collector.internal".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upstream_requires_host_and_port() {
        let config = AgentConfig {
            upstream_host: Some("127.0.0.1".to_string()),
            ..Default::default()
        };
        let err = config.upstream().unwrap_err();
        assert!(err.to_string().contains("MONIT_UPSTREAM_PORT"));

        let config = AgentConfig {
            upstream_host: Some("127.0.0.1".to_string()),
            upstream_port: Some(6000),
            ..Default::default()
        };
        let upstream = config.upstream().unwrap();
        assert_eq!(upstream.addr(), "127.0.0.1:6000");
        assert!(upstream.tls.is_none());
    }

    #[test]
    fn test_upstream_with_unreadable_bundle() {
        let config = AgentConfig {
            upstream_host: Some("collector.internal".to_string()),
            upstream_port: Some(6514),
            tls_ca_file: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..Default::default()
        };
        assert!(matches!(config.upstream(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        env::set_var("MONIT_UPSTREAM_HOST", "collector.internal");
        env::set_var("MONIT_UPSTREAM_PORT", "6514");
        env::set_var("MONIT_LOG_LEVEL", "DEBUG");
        env::set_var("MONIT_TAIL_FILE", "/var/log/syslog");

        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.upstream_host.as_deref(), Some("collector.internal"));
        assert_eq!(config.upstream_port, Some(6514));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.tail_file().unwrap(), Path::new("/var/log/syslog"));
        assert!(config.workdir.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_port() {
        clear_env();
        env::set_var("MONIT_UPSTREAM_PORT", "http");
        assert!(matches!(
            AgentConfig::from_env(),
            Err(ConfigError::Invalid(_))
        ));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config, AgentConfig::default());
        assert!(config.tail_file().is_err());
    }
}
