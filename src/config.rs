// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::constants::config;
use crate::core::errors::ConfigError;
use crate::mcp::process::ServerParameters;
use crate::mcp::session::SessionOptions;
use crate::verify::ContractExpectations;

/// Harness configuration: environment first, CLI flags on top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Shell-style command line of the server under test
    pub mcp_command: String,
    pub mcp_timeout_secs: f64,
    pub reference_path: Option<PathBuf>,
    pub expectations_path: Option<PathBuf>,
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

/// Values supplied on the command line. `None` keeps the environment value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mcp_command: Option<String>,
    pub mcp_timeout_secs: Option<f64>,
    pub reference_path: Option<PathBuf>,
    pub expectations_path: Option<PathBuf>,
}

impl HarnessConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mcp_timeout_secs = match lookup(config::ENV_MCP_TIMEOUT) {
            Some(raw) => parse_timeout(&raw)?,
            None => config::DEFAULT_TIMEOUT_SECS,
        };

        let cfg = Self {
            // Set-but-empty counts as unset; whitespace-only fails validation
            mcp_command: lookup(config::ENV_MCP_CMD)
                .filter(|cmd| !cmd.is_empty())
                .unwrap_or_else(|| config::DEFAULT_MCP_CMD.to_string()),
            mcp_timeout_secs,
            reference_path: lookup(config::ENV_REFERENCE_DOC)
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            expectations_path: None,
            log_level: lookup(config::ENV_LOG_LEVEL).unwrap_or_else(|| "info".to_string()),
            log_format: lookup(config::ENV_LOG_FORMAT).unwrap_or_else(|| "text".to_string()),
        };
        Ok(cfg)
    }

    /// Overlay command-line values and re-validate.
    pub fn apply(mut self, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        if let Some(cmd) = overrides.mcp_command.filter(|cmd| !cmd.is_empty()) {
            self.mcp_command = cmd;
        }
        if let Some(secs) = overrides.mcp_timeout_secs {
            self.mcp_timeout_secs = secs;
        }
        if overrides.reference_path.is_some() {
            self.reference_path = overrides.reference_path;
        }
        if overrides.expectations_path.is_some() {
            self.expectations_path = overrides.expectations_path;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.command_argv()?;
        self.timeout()?;
        Ok(())
    }

    /// The server command line split into an argument vector.
    pub fn command_argv(&self) -> Result<Vec<String>, ConfigError> {
        let argv = shlex::split(&self.mcp_command)
            .ok_or_else(|| ConfigError::UnparseableCommand(self.mcp_command.clone()))?;
        if argv.is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        Ok(argv)
    }

    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        let secs = self.mcp_timeout_secs;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ConfigError::InvalidTimeout(secs.to_string()));
        }
        Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidTimeout(secs.to_string()))
    }

    /// Launch parameters; the server inherits the harness environment.
    pub fn server_parameters(&self) -> Result<ServerParameters, ConfigError> {
        let mut argv = self.command_argv()?.into_iter();
        let command = argv.next().ok_or(ConfigError::EmptyCommand)?;
        Ok(ServerParameters::new(command, argv.collect()))
    }

    pub fn session_options(&self) -> Result<SessionOptions, ConfigError> {
        Ok(SessionOptions::default().with_timeout(self.timeout()?))
    }

    /// Expectations from the YAML file, or the built-in contract.
    pub fn load_expectations(&self) -> Result<ContractExpectations, ConfigError> {
        match &self.expectations_path {
            Some(path) => {
                let content = read(path)?;
                serde_yaml_ng::from_str(&content).map_err(|source| ConfigError::Expectations {
                    path: path.clone(),
                    source,
                })
            }
            None => Ok(ContractExpectations::default()),
        }
    }

    /// Text of the reference document, if one is configured.
    pub fn load_reference(&self) -> Result<Option<String>, ConfigError> {
        self.reference_path.as_deref().map(read).transpose()
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            mcp_command: config::DEFAULT_MCP_CMD.to_string(),
            mcp_timeout_secs: config::DEFAULT_TIMEOUT_SECS,
            reference_path: None,
            expectations_path: None,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

fn parse_timeout(raw: &str) -> Result<f64, ConfigError> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidTimeout(raw.to_string()))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::InvalidTimeout(raw.to_string()));
    }
    Ok(secs)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
