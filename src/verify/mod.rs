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

//! Contract verification.
//!
//! Pure checks over responses that were already captured from a session.
//! Nothing in here performs I/O, so every invariant is unit-testable without a
//! live server. A failed check names the broken invariant and carries the
//! offending values.

pub mod checks;

pub use checks::ContractVerifier;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::constants::{contract, jsonrpc};
use crate::core::models::ProtocolError;

/// The contract a server is held to. Defaults describe the BioMCP server.
///
/// Loadable from YAML; omitted keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContractExpectations {
    pub overview_uri: String,
    pub overview_name: String,
    pub resource_uri_prefix: String,
    pub resource_name_prefix: String,
    pub mime_type: String,
    /// Fail the inventory when only the overview is listed
    pub require_skill_resources: bool,
    pub required_tool: String,
    /// Must appear in both the reference document and the tool description
    pub reference_markers: Vec<String>,
    /// Must appear in the tool description only
    pub description_markers: Vec<String>,
    pub unknown_resource_uri: String,
    pub unknown_resource_code: i32,
    pub unknown_resource_message: String,
}

impl Default for ContractExpectations {
    fn default() -> Self {
        Self {
            overview_uri: contract::OVERVIEW_URI.to_string(),
            overview_name: contract::OVERVIEW_NAME.to_string(),
            resource_uri_prefix: contract::SKILL_URI_PREFIX.to_string(),
            resource_name_prefix: contract::SKILL_NAME_PREFIX.to_string(),
            mime_type: contract::MARKDOWN_MIME.to_string(),
            require_skill_resources: false,
            required_tool: contract::REQUIRED_TOOL.to_string(),
            reference_markers: contract::REFERENCE_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            description_markers: contract::DESCRIPTION_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            unknown_resource_uri: contract::UNKNOWN_RESOURCE_URI.to_string(),
            unknown_resource_code: jsonrpc::ERROR_RESOURCE_NOT_FOUND,
            unknown_resource_message: contract::UNKNOWN_RESOURCE_MESSAGE.to_string(),
        }
    }
}

/// A broken invariant and the values that broke it.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum Violation {
    #[error("server does not advertise the '{capability}' capability")]
    MissingCapability { capability: &'static str },

    #[error("tool '{name}' not listed (available: {available:?})")]
    MissingTool { name: String, available: Vec<String> },

    #[error("tool '{name}' listed {count} times")]
    DuplicateTool { name: String, count: usize },

    #[error("tool '{tool}' has no description")]
    MissingDescription { tool: String },

    #[error("{document} is missing markers {missing:?}")]
    MissingMarkers {
        document: String,
        missing: Vec<String>,
    },

    #[error("resource listing is empty")]
    EmptyInventory,

    #[error("first resource is ({actual_uri}, {actual_name}), expected ({expected_uri}, {expected_name})")]
    UnexpectedOverview {
        expected_uri: String,
        expected_name: String,
        actual_uri: String,
        actual_name: String,
    },

    #[error("resource URI {uri} listed at positions {first} and {second}")]
    DuplicateUri {
        uri: String,
        first: usize,
        second: usize,
    },

    #[error("resource {uri} does not start with {prefix}")]
    UriOutsidePrefix { uri: String, prefix: String },

    #[error("resource {uri} name {name:?} does not start with {prefix:?}")]
    MissingNamePrefix {
        uri: String,
        name: String,
        prefix: String,
    },

    #[error("resource {uri} name {name:?} repeats the prefix {prefix:?}")]
    DoubledNamePrefix {
        uri: String,
        name: String,
        prefix: String,
    },

    #[error("no resources listed beyond the overview")]
    NoSkillResources,

    #[error("{uri} returned no content")]
    NoContent { uri: String },

    #[error("{uri} returned no text content")]
    NoTextContent { uri: String },

    #[error("read of {requested} returned content for {actual}")]
    ContentUriMismatch { requested: String, actual: String },

    #[error("{uri} has mime type {actual:?}, expected {expected}")]
    WrongMimeType {
        uri: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("{uri} returned blank text")]
    BlankText { uri: String },

    #[error("expected an error for {uri}, but the read succeeded")]
    UnexpectedSuccess { uri: String },

    #[error("error code {actual} ({message}), expected {expected}")]
    WrongErrorCode {
        expected: i32,
        actual: i32,
        message: String,
    },

    #[error("error message {message:?} does not contain {expected:?}")]
    ErrorMessageMismatch { expected: String, message: String },

    #[error("{method} failed with {error}")]
    UnexpectedProtocolError { method: String, error: ProtocolError },

    #[error("{listing} changed between calls at position {position}")]
    NotIdempotent { listing: String, position: usize },
}
