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

//! mcp-contract Constants - Single source of truth for protocol and contract values.
//!
//! This module centralizes wire constants, error codes, and the default
//! contract the harness verifies, so tests and checks never drift apart.

/// JSON-RPC 2.0 Error Codes
pub mod jsonrpc {
    /// Protocol version string carried on every message
    pub const VERSION: &str = "2.0";
    /// Resource not found (MCP extension code)
    pub const ERROR_RESOURCE_NOT_FOUND: i32 = -32002;
    /// Method not found (standard JSON-RPC)
    pub const ERROR_METHOD_NOT_FOUND: i32 = -32601;
}

/// MCP Protocol Methods
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
}

/// Handshake identity
pub mod client {
    /// Protocol revision offered during `initialize`
    pub const PROTOCOL_VERSION: &str = "2024-11-05";
    /// Name reported in `clientInfo`
    pub const NAME: &str = "mcp-contract";
    /// Version reported in `clientInfo`
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Default contract of the server under test
pub mod contract {
    /// Fixed overview resource, always listed first
    pub const OVERVIEW_URI: &str = "biomcp://help";
    pub const OVERVIEW_NAME: &str = "BioMCP Overview";
    /// URI prefix shared by every non-overview resource
    pub const SKILL_URI_PREFIX: &str = "biomcp://skill/";
    /// Display-name prefix of every non-overview resource
    pub const SKILL_NAME_PREFIX: &str = "Pattern: ";
    /// Media type of every resource body
    pub const MARKDOWN_MIME: &str = "text/markdown";
    /// Tool that must be advertised
    pub const REQUIRED_TOOL: &str = "shell";
    /// URI used to provoke the unknown-resource error
    pub const UNKNOWN_RESOURCE_URI: &str = "biomcp://skill/not-a-real-resource";
    /// Message fragment of the unknown-resource error
    pub const UNKNOWN_RESOURCE_MESSAGE: &str = "Unknown resource:";

    /// Markers shared by the reference document and the tool description
    pub const REFERENCE_MARKERS: &[&str] = &[
        "BioMCP Command Reference",
        "search <entity> [query|filters]",
        "search trial [filters]",
        "get <entity> <id> [section...]",
    ];

    /// Markers only the tool description is required to carry
    pub const DESCRIPTION_MARKERS: &[&str] = &["SEARCH FILTERS:", "AGENT GUIDANCE:", "biomcp list"];
}

/// Configuration Environment Variables
pub mod config {
    pub const ENV_MCP_CMD: &str = "MCP_TEST_CMD";
    pub const ENV_MCP_TIMEOUT: &str = "MCP_TEST_TIMEOUT";
    pub const ENV_REFERENCE_DOC: &str = "MCP_REFERENCE_DOC";
    pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
    pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

    /// Command used when nothing else is configured
    pub const DEFAULT_MCP_CMD: &str = "biomcp serve";
    /// Per-call timeout in seconds
    pub const DEFAULT_TIMEOUT_SECS: f64 = 20.0;
}

/// Transport Limits
pub mod limits {
    /// Maximum allowed JSON-RPC message size (10 MB)
    pub const MAX_MESSAGE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
    /// Maximum size of an LSP-style header block
    pub const MAX_HEADER_BYTES: usize = 4096;
    /// Upper bound on pages followed for one listing
    pub const MAX_LIST_PAGES: usize = 64;
    /// Grace period between closing stdin and killing the child (ms)
    pub const SHUTDOWN_GRACE_MS: u64 = 500;
    /// Capacity of the inbound event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;
}
