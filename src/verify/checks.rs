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

// Invariant checks - deterministic functions over captured responses

use std::collections::HashMap;

use crate::core::models::{InitializeResult, ProtocolError, ReadResourceResult, Resource, Tool};
use crate::verify::{ContractExpectations, Violation};

/// Evaluates captured responses against a [`ContractExpectations`].
#[derive(Debug, Clone, Default)]
pub struct ContractVerifier {
    expectations: ContractExpectations,
}

impl ContractVerifier {
    pub fn new(expectations: ContractExpectations) -> Self {
        Self { expectations }
    }

    pub fn expectations(&self) -> &ContractExpectations {
        &self.expectations
    }

    /// Both the tools and the resources capability must be advertised.
    pub fn check_capabilities(&self, init: &InitializeResult) -> Result<(), Violation> {
        if !init.capabilities.has_tools() {
            return Err(Violation::MissingCapability { capability: "tools" });
        }
        if !init.capabilities.has_resources() {
            return Err(Violation::MissingCapability {
                capability: "resources",
            });
        }
        Ok(())
    }

    /// The required tool is listed exactly once. Returns it for follow-up checks.
    pub fn check_required_tool<'t>(&self, tools: &'t [Tool]) -> Result<&'t Tool, Violation> {
        let name = &self.expectations.required_tool;
        let mut matching = tools.iter().filter(|t| &t.name == name);

        let Some(tool) = matching.next() else {
            return Err(Violation::MissingTool {
                name: name.clone(),
                available: tools.iter().map(|t| t.name.clone()).collect(),
            });
        };
        let extra = matching.count();
        if extra > 0 {
            return Err(Violation::DuplicateTool {
                name: name.clone(),
                count: extra + 1,
            });
        }
        Ok(tool)
    }

    /// The external reference document carries every reference marker.
    pub fn check_reference_markers(&self, reference: &str) -> Result<(), Violation> {
        missing_markers(
            "reference document",
            reference,
            &self.expectations.reference_markers,
        )
    }

    /// The tool description carries every reference and description marker.
    ///
    /// All missing markers are reported at once, not just the first.
    pub fn check_tool_description(&self, tool: &Tool) -> Result<(), Violation> {
        let Some(description) = tool.description.as_deref() else {
            return Err(Violation::MissingDescription {
                tool: tool.name.clone(),
            });
        };
        let markers: Vec<String> = self
            .expectations
            .reference_markers
            .iter()
            .chain(&self.expectations.description_markers)
            .cloned()
            .collect();
        missing_markers(&format!("'{}' description", tool.name), description, &markers)
    }

    /// Overview first, unique URIs, prefixed non-overview entries.
    pub fn check_resource_inventory(&self, resources: &[Resource]) -> Result<(), Violation> {
        let exp = &self.expectations;
        let Some(first) = resources.first() else {
            return Err(Violation::EmptyInventory);
        };

        if first.uri != exp.overview_uri || first.name != exp.overview_name {
            return Err(Violation::UnexpectedOverview {
                expected_uri: exp.overview_uri.clone(),
                expected_name: exp.overview_name.clone(),
                actual_uri: first.uri.clone(),
                actual_name: first.name.clone(),
            });
        }

        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(resources.len());
        for (position, resource) in resources.iter().enumerate() {
            if let Some(&earlier) = seen.get(resource.uri.as_str()) {
                return Err(Violation::DuplicateUri {
                    uri: resource.uri.clone(),
                    first: earlier,
                    second: position,
                });
            }
            seen.insert(resource.uri.as_str(), position);
        }

        let skills = &resources[1..];
        if skills.is_empty() && exp.require_skill_resources {
            return Err(Violation::NoSkillResources);
        }

        let doubled = format!(
            "{}{}",
            exp.resource_name_prefix,
            exp.resource_name_prefix.trim_end()
        );
        for resource in skills {
            if !resource.uri.starts_with(&exp.resource_uri_prefix) {
                return Err(Violation::UriOutsidePrefix {
                    uri: resource.uri.clone(),
                    prefix: exp.resource_uri_prefix.clone(),
                });
            }
            if !resource.name.starts_with(&exp.resource_name_prefix) {
                return Err(Violation::MissingNamePrefix {
                    uri: resource.uri.clone(),
                    name: resource.name.clone(),
                    prefix: exp.resource_name_prefix.clone(),
                });
            }
            if resource.name.contains(&doubled) {
                return Err(Violation::DoubledNamePrefix {
                    uri: resource.uri.clone(),
                    name: resource.name.clone(),
                    prefix: exp.resource_name_prefix.clone(),
                });
            }
        }
        Ok(())
    }

    /// A read returned at least one text block, each one well-formed.
    pub fn check_resource_contents(
        &self,
        uri: &str,
        result: &ReadResourceResult,
    ) -> Result<(), Violation> {
        if result.contents.is_empty() {
            return Err(Violation::NoContent {
                uri: uri.to_string(),
            });
        }

        let mut any_text = false;
        for content in result.text_contents() {
            any_text = true;
            if content.uri != uri {
                return Err(Violation::ContentUriMismatch {
                    requested: uri.to_string(),
                    actual: content.uri.clone(),
                });
            }
            if content.mime_type.as_deref() != Some(self.expectations.mime_type.as_str()) {
                return Err(Violation::WrongMimeType {
                    uri: uri.to_string(),
                    expected: self.expectations.mime_type.clone(),
                    actual: content.mime_type.clone(),
                });
            }
            if content.text.trim().is_empty() {
                return Err(Violation::BlankText {
                    uri: uri.to_string(),
                });
            }
        }

        if !any_text {
            return Err(Violation::NoTextContent {
                uri: uri.to_string(),
            });
        }
        Ok(())
    }

    /// The error returned for an unknown resource has the agreed code and text.
    pub fn check_unknown_resource_error(&self, error: &ProtocolError) -> Result<(), Violation> {
        let exp = &self.expectations;
        if error.code != exp.unknown_resource_code {
            return Err(Violation::WrongErrorCode {
                expected: exp.unknown_resource_code,
                actual: error.code,
                message: error.message.clone(),
            });
        }
        if !error.message.contains(&exp.unknown_resource_message) {
            return Err(Violation::ErrorMessageMismatch {
                expected: exp.unknown_resource_message.clone(),
                message: error.message.clone(),
            });
        }
        Ok(())
    }

    /// Two listings taken within one session are identical.
    pub fn check_idempotent<T: PartialEq>(
        &self,
        listing: &str,
        first: &[T],
        second: &[T],
    ) -> Result<(), Violation> {
        let diverged = first
            .iter()
            .zip(second)
            .position(|(a, b)| a != b)
            .or_else(|| (first.len() != second.len()).then(|| first.len().min(second.len())));

        match diverged {
            Some(position) => Err(Violation::NotIdempotent {
                listing: listing.to_string(),
                position,
            }),
            None => Ok(()),
        }
    }
}

fn missing_markers(document: &str, text: &str, markers: &[String]) -> Result<(), Violation> {
    let missing: Vec<String> = markers
        .iter()
        .filter(|m| !text.contains(m.as_str()))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Violation::MissingMarkers {
            document: document.to_string(),
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{ResourceContents, ServerCapabilities, TextResourceContents};
    use serde_json::json;

    fn resource(uri: &str, name: &str) -> Resource {
        Resource {
            uri: uri.to_string(),
            name: name.to_string(),
            description: None,
            mime_type: Some("text/markdown".to_string()),
        }
    }

    fn tool(name: &str, description: Option<&str>) -> Tool {
        Tool {
            name: name.to_string(),
            description: description.map(str::to_string),
            input_schema: json!({}),
        }
    }

    fn text(uri: &str, mime: Option<&str>, body: &str) -> ResourceContents {
        ResourceContents::Text(TextResourceContents {
            uri: uri.to_string(),
            mime_type: mime.map(str::to_string),
            text: body.to_string(),
        })
    }

    fn overview() -> Resource {
        resource("biomcp://help", "BioMCP Overview")
    }

    #[test]
    fn test_capabilities_require_tools_and_resources() {
        let verifier = ContractVerifier::default();
        let mut init = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: ServerCapabilities {
                tools: Some(json!({})),
                ..Default::default()
            },
            server_info: None,
            instructions: None,
        };
        assert_eq!(
            verifier.check_capabilities(&init),
            Err(Violation::MissingCapability {
                capability: "resources"
            })
        );
        init.capabilities.resources = Some(json!({"subscribe": false}));
        assert!(verifier.check_capabilities(&init).is_ok());
    }

    #[test]
    fn test_required_tool_present_once() {
        let verifier = ContractVerifier::default();
        let tools = vec![tool("other", None), tool("shell", Some("d"))];
        assert_eq!(verifier.check_required_tool(&tools).unwrap().name, "shell");

        let missing = verifier.check_required_tool(&tools[..1]).unwrap_err();
        assert!(matches!(missing, Violation::MissingTool { ref available, .. } if available == &["other"]));

        let twice = vec![tool("shell", None), tool("shell", None)];
        assert_eq!(
            verifier.check_required_tool(&twice),
            Err(Violation::DuplicateTool {
                name: "shell".to_string(),
                count: 2
            })
        );
    }

    #[test]
    fn test_description_reports_every_missing_marker() {
        let verifier = ContractVerifier::default();
        let description = "BioMCP Command Reference\nsearch <entity> [query|filters]\nSEARCH FILTERS:";
        let err = verifier
            .check_tool_description(&tool("shell", Some(description)))
            .unwrap_err();
        match err {
            Violation::MissingMarkers { missing, .. } => assert_eq!(
                missing,
                vec![
                    "search trial [filters]",
                    "get <entity> <id> [section...]",
                    "AGENT GUIDANCE:",
                    "biomcp list"
                ]
            ),
            other => panic!("unexpected violation: {other}"),
        }

        assert!(matches!(
            verifier.check_tool_description(&tool("shell", None)),
            Err(Violation::MissingDescription { .. })
        ));
    }

    #[test]
    fn test_reference_markers() {
        let verifier = ContractVerifier::default();
        let full = "# BioMCP Command Reference\n\nsearch <entity> [query|filters]\nsearch trial [filters]\nget <entity> <id> [section...]\n";
        assert!(verifier.check_reference_markers(full).is_ok());
        assert!(verifier.check_reference_markers("# nothing here").is_err());
    }

    #[test]
    fn test_overview_only_inventory_passes() {
        let verifier = ContractVerifier::default();
        assert!(verifier.check_resource_inventory(&[overview()]).is_ok());

        let strict = ContractVerifier::new(ContractExpectations {
            require_skill_resources: true,
            ..Default::default()
        });
        assert_eq!(
            strict.check_resource_inventory(&[overview()]),
            Err(Violation::NoSkillResources)
        );
    }

    #[test]
    fn test_inventory_violations() {
        let verifier = ContractVerifier::default();
        assert_eq!(
            verifier.check_resource_inventory(&[]),
            Err(Violation::EmptyInventory)
        );

        let wrong_first = [resource("biomcp://skill/a", "Pattern: A"), overview()];
        assert!(matches!(
            verifier.check_resource_inventory(&wrong_first),
            Err(Violation::UnexpectedOverview { .. })
        ));

        let duplicate = [
            overview(),
            resource("biomcp://skill/a", "Pattern: A"),
            resource("biomcp://skill/a", "Pattern: A again"),
        ];
        assert_eq!(
            verifier.check_resource_inventory(&duplicate),
            Err(Violation::DuplicateUri {
                uri: "biomcp://skill/a".to_string(),
                first: 1,
                second: 2
            })
        );

        let outside = [overview(), resource("biomcp://other/a", "Pattern: A")];
        assert!(matches!(
            verifier.check_resource_inventory(&outside),
            Err(Violation::UriOutsidePrefix { .. })
        ));

        let unprefixed = [overview(), resource("biomcp://skill/a", "A")];
        assert!(matches!(
            verifier.check_resource_inventory(&unprefixed),
            Err(Violation::MissingNamePrefix { .. })
        ));

        let doubled = [overview(), resource("biomcp://skill/a", "Pattern: Pattern: A")];
        assert!(matches!(
            verifier.check_resource_inventory(&doubled),
            Err(Violation::DoubledNamePrefix { .. })
        ));
    }

    #[test]
    fn test_resource_contents() {
        let verifier = ContractVerifier::default();
        let uri = "biomcp://help";

        let good = ReadResourceResult {
            contents: vec![text(uri, Some("text/markdown"), "# Overview")],
        };
        assert!(verifier.check_resource_contents(uri, &good).is_ok());

        let empty = ReadResourceResult { contents: vec![] };
        assert_eq!(
            verifier.check_resource_contents(uri, &empty),
            Err(Violation::NoContent {
                uri: uri.to_string()
            })
        );

        let wrong_uri = ReadResourceResult {
            contents: vec![text("biomcp://other", Some("text/markdown"), "x")],
        };
        assert!(matches!(
            verifier.check_resource_contents(uri, &wrong_uri),
            Err(Violation::ContentUriMismatch { .. })
        ));

        let wrong_mime = ReadResourceResult {
            contents: vec![text(uri, None, "x")],
        };
        assert!(matches!(
            verifier.check_resource_contents(uri, &wrong_mime),
            Err(Violation::WrongMimeType { actual: None, .. })
        ));

        let blank = ReadResourceResult {
            contents: vec![text(uri, Some("text/markdown"), "  \n\t")],
        };
        assert!(matches!(
            verifier.check_resource_contents(uri, &blank),
            Err(Violation::BlankText { .. })
        ));
    }

    #[test]
    fn test_unknown_resource_error() {
        let verifier = ContractVerifier::default();
        let good = ProtocolError::new(-32002, "Unknown resource: biomcp://skill/x");
        assert!(verifier.check_unknown_resource_error(&good).is_ok());

        let wrong_code = ProtocolError::new(-32603, "Unknown resource: x");
        assert!(matches!(
            verifier.check_unknown_resource_error(&wrong_code),
            Err(Violation::WrongErrorCode { actual: -32603, .. })
        ));

        let wrong_message = ProtocolError::new(-32002, "not found");
        assert!(matches!(
            verifier.check_unknown_resource_error(&wrong_message),
            Err(Violation::ErrorMessageMismatch { .. })
        ));
    }

    #[test]
    fn test_idempotence() {
        let verifier = ContractVerifier::default();
        let a = [overview(), resource("biomcp://skill/a", "Pattern: A")];
        let b = [overview(), resource("biomcp://skill/b", "Pattern: B")];
        assert!(verifier.check_idempotent("resources/list", &a, &a).is_ok());
        assert_eq!(
            verifier.check_idempotent("resources/list", &a, &b),
            Err(Violation::NotIdempotent {
                listing: "resources/list".to_string(),
                position: 1
            })
        );
        assert_eq!(
            verifier.check_idempotent("resources/list", &a, &a[..1]),
            Err(Violation::NotIdempotent {
                listing: "resources/list".to_string(),
                position: 1
            })
        );
    }
}
