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

//! MCP Transport Codec.
//!
//! Handles the low-level framing of JSON-RPC messages on a server's stdio.
//! Inbound, both newline-delimited JSON (the MCP stdio default) and LSP-style
//! Content-Length headers are accepted; the framing is detected per message.
//! Outbound messages use the configured [`Framing`].

use crate::core::constants::limits;
use crate::core::models::{JsonRpcRequest, JsonRpcResponse};
use anyhow::{anyhow, Context, Result};
use bytes::BytesMut;
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

/// Outbound framing style
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    #[default]
    NewlineDelimited,
    ContentLength,
}

// State machine for LSP-style headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Head,
    Body(usize),
}

pub struct McpCodec {
    state: DecodeState,
    framing: Framing,
}

impl McpCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_framing(Framing::default())
    }

    #[must_use]
    pub fn with_framing(framing: Framing) -> Self {
        Self {
            state: DecodeState::Head,
            framing,
        }
    }

    fn decode_header(&mut self, src: &mut BytesMut) -> Result<bool> {
        // A complete first line that is neither JSON nor a header is garbage
        if let Some(end) = src.iter().position(|b| *b == b'\n') {
            if !src[..end].contains(&b':') {
                return Err(anyhow!("Expected a JSON message or a header line"));
            }
        }

        let mut i = 0;
        let mut found_header = false;

        // Scan for \r\n\r\n or \n\n
        while i < src.len() {
            if src[i] == b'\n' {
                if i >= 1 && src[i - 1] == b'\n' {
                    found_header = true;
                    i += 1;
                    break;
                }
                if i >= 3 && src[i - 1] == b'\r' && src[i - 2] == b'\n' && src[i - 3] == b'\r' {
                    found_header = true;
                    i += 1;
                    break;
                }
            }
            i += 1;
        }

        if !found_header {
            if src.len() > limits::MAX_HEADER_BYTES {
                return Err(anyhow!("Header too large"));
            }
            return Ok(false);
        }

        let header_bytes = src.split_to(i);
        let header_str = std::str::from_utf8(&header_bytes).context("Invalid UTF-8 in headers")?;

        let mut len = 0;
        for line in header_str.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                len = value
                    .trim()
                    .parse::<usize>()
                    .context("Invalid content-length value")?;
                debug!("Found Content-Length: {}", len);
            }
        }

        if len == 0 {
            return Err(anyhow!("Missing or invalid Content-Length header"));
        }

        if len as u64 > limits::MAX_MESSAGE_SIZE_BYTES {
            return Err(anyhow!("Message length {} exceeds max limit", len));
        }

        self.state = DecodeState::Body(len);
        Ok(true)
    }

    fn decode_line(src: &mut BytesMut) -> Result<Option<Value>> {
        match src.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                let line = src.split_to(pos + 1);
                let val: Value =
                    serde_json::from_slice(&line).context("Invalid JSON in message line")?;
                trace!("Decoded line message: {:?}", val);
                Ok(Some(val))
            }
            None => {
                if src.len() as u64 > limits::MAX_MESSAGE_SIZE_BYTES {
                    return Err(anyhow!(
                        "Message exceeded size limit of {} bytes",
                        limits::MAX_MESSAGE_SIZE_BYTES
                    ));
                }
                Ok(None)
            }
        }
    }

    fn encode_value<T: Serialize>(&self, item: &T, dst: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(item)?;
        match self.framing {
            Framing::NewlineDelimited => {
                dst.reserve(body.len() + 1);
                dst.extend_from_slice(&body);
                dst.extend_from_slice(b"\n");
            }
            Framing::ContentLength => {
                let header = format!("Content-Length: {}\r\n\r\n", body.len());
                dst.extend_from_slice(header.as_bytes());
                dst.extend_from_slice(&body);
            }
        }
        Ok(())
    }
}

impl Default for McpCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop blank lines and stray whitespace between messages.
fn skip_whitespace(src: &mut BytesMut) {
    let skip = src
        .iter()
        .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .count();
    if skip > 0 {
        let _ = src.split_to(skip);
    }
}

impl Decoder for McpCodec {
    type Item = Value;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        trace!("Decoder attempting to read from {} bytes buffer", src.len());
        loop {
            match self.state {
                DecodeState::Head => {
                    skip_whitespace(src);
                    match src.first() {
                        None => return Ok(None),
                        Some(b'{') | Some(b'[') => return Self::decode_line(src),
                        Some(_) => {
                            if !self.decode_header(src)? {
                                return Ok(None);
                            }
                        }
                    }
                }
                DecodeState::Body(len) => {
                    if src.len() < len {
                        return Ok(None);
                    }
                    let body = src.split_to(len);
                    self.state = DecodeState::Head;
                    let val: Value = serde_json::from_slice(&body)?;
                    trace!("Decoded message: {:?}", val);
                    return Ok(Some(val));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(val) = self.decode(src)? {
            return Ok(Some(val));
        }
        skip_whitespace(src);
        if src.is_empty() {
            return Ok(None);
        }
        match (self.state, src.first()) {
            // A final line without its trailing newline
            (DecodeState::Head, Some(b'{') | Some(b'[')) => {
                let rest = src.split_to(src.len());
                let val: Value =
                    serde_json::from_slice(&rest).context("Invalid JSON in final message")?;
                Ok(Some(val))
            }
            _ => Err(anyhow!(
                "Stream ended inside a message ({} bytes left)",
                src.len()
            )),
        }
    }
}

impl<'a> Encoder<&'a JsonRpcRequest> for McpCodec {
    type Error = anyhow::Error;
    fn encode(&mut self, item: &'a JsonRpcRequest, dst: &mut BytesMut) -> Result<()> {
        self.encode_value(item, dst)
    }
}

impl<'a> Encoder<&'a JsonRpcResponse> for McpCodec {
    type Error = anyhow::Error;
    fn encode(&mut self, item: &'a JsonRpcResponse, dst: &mut BytesMut) -> Result<()> {
        self.encode_value(item, dst)
    }
}
