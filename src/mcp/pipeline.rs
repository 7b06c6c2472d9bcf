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

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::core::models::IncomingMessage;

/// Messages arriving from the server under test
#[derive(Debug)]
pub enum ServerEvent {
    Message(IncomingMessage),
    /// Malformed JSON, framing error, or non-JSON-RPC payload
    Malformed(String),
    /// Server closed its stdout (EOF)
    Closed,
}

use crate::mcp::codec::McpCodec;
use futures_util::StreamExt;
use tokio_util::codec::FramedRead;

/// Spawns a background task that reads framed messages from the server's stdout.
///
/// JSON-RPC batches (arrays) are flattened into individual events. The task
/// stops after the first malformed message; the session treats that as fatal.
pub fn spawn_server_reader<R>(stream: R, tx: mpsc::Sender<ServerEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut framed = FramedRead::new(stream, McpCodec::new());

        while let Some(result) = framed.next().await {
            match result {
                Ok(val) => {
                    let items = match val {
                        serde_json::Value::Array(items) if !items.is_empty() => items,
                        other => vec![other],
                    };
                    for item in items {
                        let event = match IncomingMessage::classify(item) {
                            Ok(msg) => ServerEvent::Message(msg),
                            Err(e) => {
                                error!("Server sent a non-JSON-RPC message: {}", e);
                                let _ = tx.send(ServerEvent::Malformed(e)).await;
                                return;
                            }
                        };
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Server framing error: {:#}", e);
                    let _ = tx.send(ServerEvent::Malformed(format!("{e:#}"))).await;
                    return;
                }
            }
        }
        debug!("Server stdout reached EOF");
        let _ = tx.send(ServerEvent::Closed).await;
    })
}

/// Spawns a background task that drains the server's stderr into the log.
pub fn spawn_stderr_drain<R>(stream: R, command: String) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break, // Pipe closed
                Ok(_) => {
                    let log_msg = line.trim();
                    if !log_msg.is_empty() {
                        debug!(server = %command, "stderr: {}", log_msg);
                    }
                }
                Err(_) => break,
            }
        }
    })
}
