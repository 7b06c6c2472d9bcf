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

//! mcp-contract: A contract-verification harness for MCP servers.
//!
//! This library launches a Model Context Protocol server as a child process,
//! speaks JSON-RPC 2.0 to it over stdio, and checks that the tools and
//! resources it advertises satisfy a fixed contract.

pub mod config;
pub mod core;
pub mod mcp;
pub mod scenario;
pub mod verify;
