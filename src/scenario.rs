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

//! Scenario driver.
//!
//! Each scenario launches its own server, runs a fixed sequence of calls, and
//! hands the captured responses to the [`ContractVerifier`]. Failures are
//! attributed either to the server (a broken contract) or to the harness (it
//! could not talk to the server at all), so a flaky launch is never reported
//! as a contract regression.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::constants::methods;
use crate::core::errors::SessionError;
use crate::mcp::process::ServerParameters;
use crate::mcp::session::{Reply, Session, SessionOptions};
use crate::verify::{ContractExpectations, ContractVerifier, Violation};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    InitializeCapabilities,
    ListToolsShell,
    ShellDescriptionMarkers,
    ResourceInventory,
    ReadEveryResource,
    UnknownResourceError,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::InitializeCapabilities,
        Scenario::ListToolsShell,
        Scenario::ShellDescriptionMarkers,
        Scenario::ResourceInventory,
        Scenario::ReadEveryResource,
        Scenario::UnknownResourceError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::InitializeCapabilities => "initialize-capabilities",
            Scenario::ListToolsShell => "list-tools-shell",
            Scenario::ShellDescriptionMarkers => "shell-description-markers",
            Scenario::ResourceInventory => "resource-inventory",
            Scenario::ReadEveryResource => "read-every-resource",
            Scenario::UnknownResourceError => "unknown-resource-error",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    /// The server broke its contract
    ServerBroken(String),
    /// The harness could not complete the exchange
    HarnessFailure(String),
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Passed)
    }

    fn severity(&self) -> u8 {
        match self {
            Outcome::Passed => 0,
            Outcome::ServerBroken(_) => 1,
            Outcome::HarnessFailure(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    pub outcome: Outcome,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteReport {
    pub results: Vec<ScenarioResult>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_pass()).count()
    }

    pub fn all_passed(&self) -> bool {
        self.passed() == self.results.len()
    }

    /// 0 when everything passed, 1 for contract violations, 2 when the
    /// harness itself failed. The worst outcome wins.
    pub fn exit_code(&self) -> u8 {
        self.results
            .iter()
            .map(|r| r.outcome.severity())
            .max()
            .unwrap_or(0)
    }
}

/// Launches a fresh, handshaken session per scenario.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    params: ServerParameters,
    options: SessionOptions,
}

impl SessionFactory {
    pub fn new(params: ServerParameters, options: SessionOptions) -> Self {
        Self { params, options }
    }

    pub fn params(&self) -> &ServerParameters {
        &self.params
    }

    pub async fn open(&self) -> Result<Session, SessionError> {
        Session::open(&self.params, self.options.clone()).await
    }
}

/// Why a scenario did not pass.
#[derive(Debug)]
enum Failure {
    Server(String),
    Harness(String),
}

impl From<Violation> for Failure {
    fn from(v: Violation) -> Self {
        Failure::Server(v.to_string())
    }
}

impl From<SessionError> for Failure {
    fn from(e: SessionError) -> Self {
        if e.is_harness_fault() {
            Failure::Harness(e.to_string())
        } else {
            Failure::Server(e.to_string())
        }
    }
}

impl From<Failure> for Outcome {
    fn from(f: Failure) -> Self {
        match f {
            Failure::Server(msg) => Outcome::ServerBroken(msg),
            Failure::Harness(msg) => Outcome::HarnessFailure(msg),
        }
    }
}

pub struct ScenarioDriver {
    factory: SessionFactory,
    verifier: ContractVerifier,
    reference: Option<String>,
}

impl ScenarioDriver {
    pub fn new(factory: SessionFactory, expectations: ContractExpectations) -> Self {
        Self {
            factory,
            verifier: ContractVerifier::new(expectations),
            reference: None,
        }
    }

    /// Reference document text checked by `shell-description-markers`.
    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    pub async fn run_all(&self) -> SuiteReport {
        self.run_selected(&Scenario::ALL).await
    }

    /// Run scenarios in order. One failing scenario never stops the rest.
    pub async fn run_selected(&self, scenarios: &[Scenario]) -> SuiteReport {
        let mut report = SuiteReport::default();
        for &scenario in scenarios {
            report.results.push(self.run(scenario).await);
        }
        report
    }

    pub async fn run(&self, scenario: Scenario) -> ScenarioResult {
        let started = Instant::now();
        info!("Running scenario {}", scenario);

        let outcome = match self.factory.open().await {
            Ok(mut session) => {
                let result = self.execute(scenario, &mut session).await;
                session.close().await;
                result.map_or_else(Outcome::from, |()| Outcome::Passed)
            }
            Err(e) => Outcome::from(Failure::from(e)),
        };

        match &outcome {
            Outcome::Passed => info!("Scenario {} passed", scenario),
            Outcome::ServerBroken(msg) => warn!("Scenario {} failed: {}", scenario, msg),
            Outcome::HarnessFailure(msg) => warn!("Scenario {} could not run: {}", scenario, msg),
        }

        ScenarioResult {
            scenario,
            outcome,
            elapsed_ms: started.elapsed().as_millis(),
        }
    }

    async fn execute(&self, scenario: Scenario, session: &mut Session) -> Result<(), Failure> {
        let verifier = &self.verifier;
        match scenario {
            Scenario::InitializeCapabilities => {
                let init = session.initialize_result().ok_or_else(|| {
                    Failure::Harness("session has no handshake result".to_string())
                })?;
                verifier.check_capabilities(init)?;
            }

            Scenario::ListToolsShell => {
                let first = expect_ok(methods::TOOLS_LIST, session.list_tools().await?)?;
                verifier.check_required_tool(&first)?;
                let second = expect_ok(methods::TOOLS_LIST, session.list_tools().await?)?;
                verifier.check_idempotent(methods::TOOLS_LIST, &first, &second)?;
            }

            Scenario::ShellDescriptionMarkers => {
                if let Some(reference) = &self.reference {
                    verifier.check_reference_markers(reference)?;
                }
                let tools = expect_ok(methods::TOOLS_LIST, session.list_tools().await?)?;
                let tool = verifier.check_required_tool(&tools)?;
                verifier.check_tool_description(tool)?;
            }

            Scenario::ResourceInventory => {
                let first = expect_ok(methods::RESOURCES_LIST, session.list_resources().await?)?;
                verifier.check_resource_inventory(&first)?;
                let second = expect_ok(methods::RESOURCES_LIST, session.list_resources().await?)?;
                verifier.check_idempotent(methods::RESOURCES_LIST, &first, &second)?;
            }

            Scenario::ReadEveryResource => {
                let resources =
                    expect_ok(methods::RESOURCES_LIST, session.list_resources().await?)?;
                if resources.is_empty() {
                    return Err(Violation::EmptyInventory.into());
                }
                for resource in &resources {
                    let contents = expect_ok(
                        methods::RESOURCES_READ,
                        session.read_resource(&resource.uri).await?,
                    )?;
                    verifier.check_resource_contents(&resource.uri, &contents)?;
                }
            }

            Scenario::UnknownResourceError => {
                let uri = &verifier.expectations().unknown_resource_uri;
                match session.read_resource(uri).await? {
                    Reply::Ok(_) => {
                        return Err(Violation::UnexpectedSuccess { uri: uri.clone() }.into())
                    }
                    Reply::Error(e) => verifier.check_unknown_resource_error(&e)?,
                }
            }
        }
        Ok(())
    }
}

fn expect_ok<T>(method: &str, reply: Reply<T>) -> Result<T, Violation> {
    reply
        .into_result()
        .map_err(|error| Violation::UnexpectedProtocolError {
            method: method.to_string(),
            error,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ProtocolError;

    fn result(scenario: Scenario, outcome: Outcome) -> ScenarioResult {
        ScenarioResult {
            scenario,
            outcome,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn test_scenario_names_match_serde_and_clap() {
        use clap::ValueEnum;
        for scenario in Scenario::ALL {
            let json = serde_json::to_value(scenario).unwrap();
            assert_eq!(json, scenario.name());
            let parsed = Scenario::from_str(scenario.name(), false).unwrap();
            assert_eq!(parsed, scenario);
        }
    }

    #[test]
    fn test_exit_code_takes_worst_outcome() {
        let mut report = SuiteReport::default();
        assert_eq!(report.exit_code(), 0);

        report
            .results
            .push(result(Scenario::InitializeCapabilities, Outcome::Passed));
        assert_eq!(report.exit_code(), 0);
        assert!(report.all_passed());

        report.results.push(result(
            Scenario::UnknownResourceError,
            Outcome::HarnessFailure("timeout".into()),
        ));
        report.results.push(result(
            Scenario::ListToolsShell,
            Outcome::ServerBroken("no shell".into()),
        ));
        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.passed(), 1);
    }

    #[test]
    fn test_failure_attribution() {
        let rejected = SessionError::HandshakeRejected(ProtocolError::new(-32603, "boom"));
        assert!(matches!(
            Outcome::from(Failure::from(rejected)),
            Outcome::ServerBroken(_)
        ));

        let transport = SessionError::Transport("eof".into());
        assert!(matches!(
            Outcome::from(Failure::from(transport)),
            Outcome::HarnessFailure(_)
        ));

        assert!(matches!(
            Outcome::from(Failure::from(Violation::EmptyInventory)),
            Outcome::ServerBroken(_)
        ));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(Outcome::ServerBroken("x".into())).unwrap();
        assert_eq!(json["status"], "server_broken");
        assert_eq!(json["detail"], "x");
        let json = serde_json::to_value(Outcome::Passed).unwrap();
        assert_eq!(json["status"], "passed");
    }

    #[test]
    fn test_unexpected_protocol_error_names_method() {
        let err = expect_ok::<()>(
            methods::TOOLS_LIST,
            Reply::Error(ProtocolError::new(-32601, "nope")),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("tools/list failed"));
    }
}
