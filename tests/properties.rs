use bytes::BytesMut;
use mcp_contract::core::models::{JsonRpcResponse, Resource};
use mcp_contract::mcp::codec::{Framing, McpCodec};
use mcp_contract::verify::{ContractVerifier, Violation};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio_util::codec::{Decoder, Encoder};

fn skill(slug: &str, title: &str) -> Resource {
    Resource {
        uri: format!("biomcp://skill/{slug}"),
        name: format!("Pattern: {title}"),
        description: None,
        mime_type: Some("text/markdown".to_string()),
    }
}

fn overview() -> Resource {
    Resource {
        uri: "biomcp://help".to_string(),
        name: "BioMCP Overview".to_string(),
        description: None,
        mime_type: Some("text/markdown".to_string()),
    }
}

fn inventory(skills: &BTreeMap<String, String>) -> Vec<Resource> {
    std::iter::once(overview())
        .chain(skills.iter().map(|(slug, title)| skill(slug, title)))
        .collect()
}

proptest! {
    #[test]
    fn test_messages_survive_any_chunking(
        texts in prop::collection::vec("\\PC{0,40}", 1..6),
        length_framed in prop::collection::vec(any::<bool>(), 6),
        split in 0usize..4096,
    ) {
        let mut wire = BytesMut::new();
        for (i, text) in texts.iter().enumerate() {
            let framing = if length_framed[i] { Framing::ContentLength } else { Framing::NewlineDelimited };
            let response = JsonRpcResponse::success(json!(i), json!({ "text": text }));
            McpCodec::with_framing(framing).encode(&response, &mut wire).unwrap();
        }

        let split = split.min(wire.len());
        let mut buf = BytesMut::from(&wire[..split]);
        let mut codec = McpCodec::new();
        let mut decoded: Vec<Value> = Vec::new();
        while let Some(v) = codec.decode(&mut buf).unwrap() {
            decoded.push(v);
        }
        buf.extend_from_slice(&wire[split..]);
        while let Some(v) = codec.decode(&mut buf).unwrap() {
            decoded.push(v);
        }

        prop_assert_eq!(decoded.len(), texts.len());
        for (i, (value, text)) in decoded.iter().zip(&texts).enumerate() {
            prop_assert_eq!(&value["id"], &json!(i));
            prop_assert_eq!(value["result"]["text"].as_str(), Some(text.as_str()));
        }
    }

    #[test]
    fn test_well_formed_inventory_passes(
        skills in prop::collection::btree_map("[a-z][a-z0-9-]{0,15}", "[A-Z][a-z ]{0,20}", 0..8),
    ) {
        let resources = inventory(&skills);
        prop_assert!(ContractVerifier::default().check_resource_inventory(&resources).is_ok());
    }

    #[test]
    fn test_repeated_uri_is_always_found(
        skills in prop::collection::btree_map("[a-z][a-z0-9-]{0,15}", "[A-Z][a-z]{0,20}", 1..8),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut resources = inventory(&skills);
        let first = 1 + pick.index(skills.len());
        let copy = resources[first].clone();
        resources.push(copy.clone());

        let verdict = ContractVerifier::default().check_resource_inventory(&resources);
        prop_assert_eq!(verdict, Err(Violation::DuplicateUri {
            uri: copy.uri,
            first,
            second: resources.len() - 1,
        }));
    }

    #[test]
    fn test_overview_must_lead(
        skills in prop::collection::btree_map("[a-z][a-z0-9-]{0,15}", "[A-Z][a-z]{0,20}", 1..8),
    ) {
        let mut resources = inventory(&skills);
        resources.rotate_left(1);
        let verdict = ContractVerifier::default().check_resource_inventory(&resources);
        let is_unexpected_overview = matches!(verdict, Err(Violation::UnexpectedOverview { .. }));
        prop_assert!(is_unexpected_overview);
    }

    #[test]
    fn test_idempotence_reports_first_divergence(
        items in prop::collection::vec(any::<u16>(), 1..20),
        pick in any::<prop::sample::Index>(),
    ) {
        let verifier = ContractVerifier::default();
        prop_assert!(verifier.check_idempotent("tools/list", &items, &items).is_ok());

        let position = pick.index(items.len());
        let mut changed = items.clone();
        changed[position] = changed[position].wrapping_add(1);
        prop_assert_eq!(
            verifier.check_idempotent("tools/list", &items, &changed),
            Err(Violation::NotIdempotent { listing: "tools/list".to_string(), position })
        );
    }

    #[test]
    fn test_unmarked_description_reports_every_marker(text in "[a-z]{0,40}") {
        let tool = mcp_contract::core::models::Tool {
            name: "shell".to_string(),
            description: Some(text),
            input_schema: json!({}),
        };
        match ContractVerifier::default().check_tool_description(&tool) {
            Err(Violation::MissingMarkers { missing, .. }) => prop_assert_eq!(missing.len(), 7),
            other => prop_assert!(false, "unexpected verdict {:?}", other),
        }
    }
}
