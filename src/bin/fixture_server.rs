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

//! Scripted MCP server used by the integration tests.
//!
//! Speaks newline-delimited JSON-RPC on stdio and serves a small BioMCP-like
//! catalogue. `FIXTURE_MODE` selects a misbehaviour:
//!
//! | mode              | behaviour                                              |
//! |-------------------|--------------------------------------------------------|
//! | `normal`          | honours the contract                                   |
//! | `overview-only`   | lists only the overview resource                       |
//! | `slow`            | sleeps `FIXTURE_DELAY_MS` before every post-handshake reply |
//! | `crash`           | exits on the first post-handshake request              |
//! | `garbage`         | answers post-handshake requests with non-JSON          |
//! | `error-init`      | rejects `initialize`                                   |
//! | `silent-init`     | reads `initialize` but never answers it                |
//! | `doubled-prefix`  | one skill is named `Pattern: Pattern: ...`             |
//! | `out-of-order`    | sends a stale response and a ping before each reply    |
//! | `chatty`          | logs notifications and stderr noise around replies     |
//! | `paged`           | paginates listings one item per page                   |
//! | `content-length`  | frames replies with `Content-Length` headers           |
//! | `missing-marker`  | drops `AGENT GUIDANCE:` from the shell description     |
//! | `wrong-mime`      | serves skills as `text/plain`                          |
//! | `unknown-ok`      | returns content for unknown resources                  |
//! | `no-resources-cap`| omits the resources capability                         |

use anyhow::Context;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::time::Duration;

const OVERVIEW_URI: &str = "biomcp://help";
const SKILLS: &[(&str, &str)] = &[
    ("variant-to-treatment", "Variant to Treatment"),
    ("trial-matching", "Trial Matching"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    OverviewOnly,
    Slow,
    Crash,
    Garbage,
    ErrorInit,
    SilentInit,
    DoubledPrefix,
    OutOfOrder,
    Chatty,
    Paged,
    ContentLength,
    MissingMarker,
    WrongMime,
    UnknownOk,
    NoResourcesCap,
}

impl Mode {
    fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var("FIXTURE_MODE").unwrap_or_else(|_| "normal".to_string());
        let mode = match raw.as_str() {
            "normal" => Mode::Normal,
            "overview-only" => Mode::OverviewOnly,
            "slow" => Mode::Slow,
            "crash" => Mode::Crash,
            "garbage" => Mode::Garbage,
            "error-init" => Mode::ErrorInit,
            "silent-init" => Mode::SilentInit,
            "doubled-prefix" => Mode::DoubledPrefix,
            "out-of-order" => Mode::OutOfOrder,
            "chatty" => Mode::Chatty,
            "paged" => Mode::Paged,
            "content-length" => Mode::ContentLength,
            "missing-marker" => Mode::MissingMarker,
            "wrong-mime" => Mode::WrongMime,
            "unknown-ok" => Mode::UnknownOk,
            "no-resources-cap" => Mode::NoResourcesCap,
            other => anyhow::bail!("unknown FIXTURE_MODE '{other}'"),
        };
        Ok(mode)
    }
}

struct Fixture {
    mode: Mode,
    delay: Duration,
    out: std::io::Stdout,
    initialized: bool,
    sent: u64,
}

fn main() -> anyhow::Result<()> {
    let mode = Mode::from_env()?;
    let delay_ms = std::env::var("FIXTURE_DELAY_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5_000);

    let mut fixture = Fixture {
        mode,
        delay: Duration::from_millis(delay_ms),
        out: std::io::stdout(),
        initialized: false,
        sent: 0,
    };

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let message: Value = serde_json::from_str(&line).context("client sent invalid JSON")?;
        fixture.handle(message)?;
    }
    // EOF on stdin: exit cleanly
    Ok(())
}

impl Fixture {
    fn handle(&mut self, message: Value) -> anyhow::Result<()> {
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            // Answers to our own pings
            return Ok(());
        };
        let Some(id) = message.get("id").cloned() else {
            return Ok(());
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        if method == "initialize" {
            return self.initialize(id);
        }

        if self.initialized {
            match self.mode {
                Mode::Slow => std::thread::sleep(self.delay),
                Mode::Crash => std::process::exit(3),
                Mode::Garbage => return self.write_raw("this is not json\n"),
                Mode::OutOfOrder => {
                    self.send(&json!({"jsonrpc": "2.0", "id": 9_999, "result": {}}))?;
                    self.sent += 1;
                    let ping_id = format!("srv-{}", self.sent);
                    self.send(&json!({"jsonrpc": "2.0", "id": ping_id, "method": "ping"}))?;
                }
                Mode::Chatty => {
                    eprintln!("fixture: handling {method}");
                    self.send(&json!({
                        "jsonrpc": "2.0",
                        "method": "notifications/message",
                        "params": {"level": "info", "data": format!("handling {method}")}
                    }))?;
                }
                _ => {}
            }
        }

        let reply = match method {
            "ping" => ok(id, json!({})),
            "tools/list" => ok(id, self.tools_page(&params)),
            "resources/list" => ok(id, self.resources_page(&params)),
            "resources/read" => self.read(id, &params),
            other => error(id, -32601, &format!("Method not found: {other}")),
        };
        self.send(&reply)
    }

    fn initialize(&mut self, id: Value) -> anyhow::Result<()> {
        match self.mode {
            Mode::ErrorInit => return self.send(&error(id, -32603, "initialization refused")),
            Mode::SilentInit => return Ok(()),
            _ => {}
        }
        let mut capabilities = json!({"tools": {}, "resources": {}});
        if self.mode == Mode::NoResourcesCap {
            capabilities = json!({"tools": {}});
        }
        self.initialized = true;
        self.send(&ok(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": capabilities,
                "serverInfo": {"name": "contract-fixture", "version": "0.0.0"},
                "instructions": "Use the `shell` tool to run BioMCP CLI commands."
            }),
        ))
    }

    fn tools(&self) -> Vec<Value> {
        let mut description = String::from(
            "Run a read-only BioMCP CLI command.\n\n\
             BioMCP Command Reference\n\
             search <entity> [query|filters]\n\
             search trial [filters]\n\
             get <entity> <id> [section...]\n\n\
             SEARCH FILTERS:\n  --condition --status --phase\n\n",
        );
        if self.mode != Mode::MissingMarker {
            description.push_str("AGENT GUIDANCE:\n  Start with `biomcp list`.\n");
        } else {
            description.push_str("Start with `biomcp list`.\n");
        }
        vec![
            json!({
                "name": "shell",
                "description": description,
                "inputSchema": {
                    "type": "object",
                    "properties": {"command": {"type": "string"}},
                    "required": ["command"]
                }
            }),
            json!({
                "name": "version",
                "description": "Print the server version.",
                "inputSchema": {"type": "object"}
            }),
        ]
    }

    fn resources(&self) -> Vec<Value> {
        let mut resources = vec![json!({
            "uri": OVERVIEW_URI,
            "name": "BioMCP Overview",
            "mimeType": "text/markdown"
        })];
        if self.mode == Mode::OverviewOnly {
            return resources;
        }
        for (i, (slug, title)) in SKILLS.iter().enumerate() {
            let name = if self.mode == Mode::DoubledPrefix && i == 0 {
                format!("Pattern: Pattern: {title}")
            } else {
                format!("Pattern: {title}")
            };
            resources.push(json!({
                "uri": format!("biomcp://skill/{slug}"),
                "name": name,
                "mimeType": self.mime()
            }));
        }
        resources
    }

    fn mime(&self) -> &'static str {
        if self.mode == Mode::WrongMime {
            "text/plain"
        } else {
            "text/markdown"
        }
    }

    fn tools_page(&self, params: &Value) -> Value {
        let (items, next) = self.page(self.tools(), params);
        listing("tools", items, next)
    }

    fn resources_page(&self, params: &Value) -> Value {
        let (items, next) = self.page(self.resources(), params);
        listing("resources", items, next)
    }

    /// One item per page in `paged` mode; the cursor is the next index.
    fn page(&self, items: Vec<Value>, params: &Value) -> (Vec<Value>, Option<String>) {
        if self.mode != Mode::Paged {
            return (items, None);
        }
        let start: usize = params
            .get("cursor")
            .and_then(Value::as_str)
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let next = (start + 1 < items.len()).then(|| (start + 1).to_string());
        (items.into_iter().skip(start).take(1).collect(), next)
    }

    fn read(&self, id: Value, params: &Value) -> Value {
        let uri = params.get("uri").and_then(Value::as_str).unwrap_or_default();
        let body = if uri == OVERVIEW_URI {
            Some(("text/markdown", "# BioMCP Overview\n\nStart with `biomcp list`.\n".to_string()))
        } else {
            uri.strip_prefix("biomcp://skill/")
                .and_then(|slug| SKILLS.iter().find(|(s, _)| *s == slug))
                .map(|(_, title)| (self.mime(), format!("# Pattern: {title}\n\n1. Search.\n2. Get.\n")))
        };

        match body {
            Some((mime, text)) => ok(
                id,
                json!({"contents": [{"uri": uri, "mimeType": mime, "text": text}]}),
            ),
            None if self.mode == Mode::UnknownOk => ok(
                id,
                json!({"contents": [{"uri": uri, "mimeType": "text/markdown", "text": "?"}]}),
            ),
            None => error(id, -32002, &format!("Unknown resource: {uri}")),
        }
    }

    fn send(&mut self, message: &Value) -> anyhow::Result<()> {
        let body = serde_json::to_string(message)?;
        if self.mode == Mode::ContentLength {
            self.write_raw(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body))
        } else {
            self.write_raw(&format!("{body}\n"))
        }
    }

    fn write_raw(&mut self, text: &str) -> anyhow::Result<()> {
        let mut out = self.out.lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

fn ok(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error(id: Value, code: i32, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

fn listing(key: &str, items: Vec<Value>, next: Option<String>) -> Value {
    let mut result = serde_json::Map::new();
    result.insert(key.to_string(), Value::Array(items));
    if let Some(cursor) = next {
        result.insert("nextCursor".to_string(), Value::String(cursor));
    }
    Value::Object(result)
}
