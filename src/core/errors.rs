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

// Harness error types

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::core::models::ProtocolError;
use crate::mcp::session::SessionState;

/// Main error type for launching and driving a server session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Invalid launch parameters, raised before any I/O
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The server process could not be started
    #[error("Launch error: failed to start '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A call exceeded its budget; the session is poisoned
    #[error("Timeout: '{method}' got no response within {after:?}")]
    Timeout { method: String, after: Duration },

    /// Stream closed, process exited, or an unparseable message arrived
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered `initialize` with an error object
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(ProtocolError),

    /// Operation attempted in the wrong session state
    #[error("Invalid session state: {actual:?} (expected {expected:?})")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    /// Operation attempted after an earlier timeout or transport failure
    #[error("Session poisoned: {0}")]
    Poisoned(String),

    #[error("Session closed")]
    Closed,
}

impl SessionError {
    /// True when the harness could not talk to the server at all.
    ///
    /// A rejected handshake is the server's fault, everything else is
    /// attributed to the harness/transport side.
    pub fn is_harness_fault(&self) -> bool {
        !matches!(self, SessionError::HandshakeRejected(_))
    }

    /// True for failures that invalidate the session they happened on.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            SessionError::Timeout { .. }
                | SessionError::Transport(_)
                | SessionError::HandshakeRejected(_)
        )
    }
}

/// Errors raised while assembling the harness configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("MCP command is empty. Set --mcp-cmd or MCP_TEST_CMD.")]
    EmptyCommand,

    #[error("MCP command could not be split into arguments: {0}")]
    UnparseableCommand(String),

    #[error("Invalid timeout '{0}': expected a positive number of seconds")]
    InvalidTimeout(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse expectations {path}: {source}")]
    Expectations {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },
}
