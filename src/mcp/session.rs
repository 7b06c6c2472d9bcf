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

//! Protocol Session.
//!
//! A `Session` binds one live server to the capability set it advertised
//! during the handshake and issues correlated, individually timed requests.
//!
//! ```text
//! Unopened -> Handshaking -> Ready -> Closed
//!      \            \          \
//!       +------------+----------+--> Failed   (timeout, EOF, malformed message)
//! ```
//!
//! Protocol errors returned by the server are data ([`Reply::Error`]) and keep
//! the session `Ready`. Timeouts and transport failures poison it: later calls
//! fail fast and the child is killed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::SinkExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

use crate::core::constants::{client, jsonrpc, limits, methods};
use crate::core::errors::SessionError;
use crate::core::models::{
    IncomingMessage, InitializeResult, JsonRpcRequest, JsonRpcResponse, ListResourcesResult,
    ListToolsResult, Paginated, ProtocolError, ReadResourceResult, Resource, ServerCapabilities,
    Tool,
};
use crate::mcp::codec::{Framing, McpCodec};
use crate::mcp::pending::PendingCalls;
use crate::mcp::pipeline::{spawn_server_reader, ServerEvent};
use crate::mcp::process::{ProcessExit, ServerParameters, ServerProcess, ServerStreams};

type BoxedWriter = FramedWrite<Box<dyn AsyncWrite + Unpin + Send>, McpCodec>;
/// `None` once the session has closed the server's stdin
type SharedWriter = Arc<tokio::sync::Mutex<Option<BoxedWriter>>>;
type SharedPending = Arc<Mutex<PendingCalls>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Handshaking,
    Ready,
    Closed,
    Failed,
}

/// Outcome of a call that reached the server and got an answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Ok(T),
    Error(ProtocolError),
}

impl<T> Reply<T> {
    pub fn into_result(self) -> Result<T, ProtocolError> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Error(e) => Err(e),
        }
    }

    pub fn ok(self) -> Option<T> {
        self.into_result().ok()
    }

    pub fn error(&self) -> Option<&ProtocolError> {
        match self {
            Reply::Ok(_) => None,
            Reply::Error(e) => Some(e),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Budget for each individual call, handshake included
    pub timeout: Duration,
    pub framing: Framing,
    /// How long `close` waits for a voluntary exit before killing
    pub shutdown_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs_f64(crate::core::constants::config::DEFAULT_TIMEOUT_SECS),
            framing: Framing::default(),
            shutdown_grace: Duration::from_millis(limits::SHUTDOWN_GRACE_MS),
        }
    }
}

impl SessionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct Session {
    state: SessionState,
    options: SessionOptions,
    next_id: u64,
    writer: SharedWriter,
    pending: SharedPending,
    dispatcher: JoinHandle<()>,
    reader: JoinHandle<()>,
    process: Option<ServerProcess>,
    initialize: Option<InitializeResult>,
    failure: Option<String>,
}

impl Session {
    /// Spawn the server, then handshake. Any failure tears the child down.
    pub async fn open(
        params: &ServerParameters,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let (process, streams) = ServerProcess::spawn(params)?;
        let mut session = Self::connect(streams, Some(process), options);
        session.initialize().await?;
        Ok(session)
    }

    /// Wrap an established duplex stream. The session starts `Unopened`.
    pub fn connect(
        streams: ServerStreams,
        process: Option<ServerProcess>,
        options: SessionOptions,
    ) -> Self {
        Self::from_parts(streams.stdout, streams.stdin, process, options)
    }

    /// Wrap any reader/writer pair, e.g. an in-memory duplex in tests.
    pub fn from_parts<R, W>(
        reader: R,
        writer: W,
        process: Option<ServerProcess>,
        options: SessionOptions,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let boxed: Box<dyn AsyncWrite + Unpin + Send> = Box::new(writer);
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(Some(FramedWrite::new(
            boxed,
            McpCodec::with_framing(options.framing),
        ))));
        let pending: SharedPending = Arc::new(Mutex::new(PendingCalls::new()));

        let (tx, rx) = mpsc::channel(limits::EVENT_CHANNEL_CAPACITY);
        let reader = spawn_server_reader(reader, tx);
        let dispatcher = tokio::spawn(dispatch(rx, pending.clone(), writer.clone()));

        Self {
            state: SessionState::Unopened,
            options,
            next_id: 1,
            writer,
            pending,
            dispatcher,
            reader,
            process,
            initialize: None,
            failure: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    /// Handshake result, available once the session is `Ready`.
    pub fn initialize_result(&self) -> Option<&InitializeResult> {
        self.initialize.as_ref()
    }

    pub fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.initialize.as_ref().map(|init| &init.capabilities)
    }

    pub fn process(&self) -> Option<&ServerProcess> {
        self.process.as_ref()
    }

    /// Perform the one and only handshake of this session.
    pub async fn initialize(&mut self) -> Result<&InitializeResult, SessionError> {
        if self.state != SessionState::Unopened {
            return Err(self.state_error(SessionState::Unopened));
        }
        self.state = SessionState::Handshaking;
        debug!("Handshaking with server");

        let params = json!({
            "protocolVersion": client::PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": client::NAME,
                "version": client::VERSION,
            },
        });
        let response = self.exchange(methods::INITIALIZE, Some(params)).await?;
        let init = match self.decode_reply::<InitializeResult>(methods::INITIALIZE, response)? {
            Reply::Ok(init) => init,
            Reply::Error(e) => return Err(self.fail(SessionError::HandshakeRejected(e))),
        };

        let initialized = JsonRpcRequest::notification(methods::INITIALIZED, None);
        let deadline = Instant::now() + self.options.timeout;
        if let Err(e) = self.send_by(&initialized, deadline).await {
            return Err(self.fail(e));
        }

        info!(
            protocol = %init.protocol_version,
            server = ?init.server_info.as_ref().map(|s| s.name.as_str()),
            tools = init.capabilities.has_tools(),
            resources = init.capabilities.has_resources(),
            "Session ready"
        );
        self.state = SessionState::Ready;
        Ok(self.initialize.insert(init))
    }

    pub async fn ping(&mut self) -> Result<Reply<Value>, SessionError> {
        self.request(methods::PING, None).await
    }

    /// All tools, following pagination cursors.
    pub async fn list_tools(&mut self) -> Result<Reply<Vec<Tool>>, SessionError> {
        self.list_paged::<ListToolsResult>(methods::TOOLS_LIST).await
    }

    /// All resources in server order, following pagination cursors.
    pub async fn list_resources(&mut self) -> Result<Reply<Vec<Resource>>, SessionError> {
        self.list_paged::<ListResourcesResult>(methods::RESOURCES_LIST)
            .await
    }

    pub async fn read_resource(
        &mut self,
        uri: &str,
    ) -> Result<Reply<ReadResourceResult>, SessionError> {
        self.request(methods::RESOURCES_READ, Some(json!({ "uri": uri })))
            .await
    }

    /// Issue an arbitrary request and decode its result as `T`.
    pub async fn request<T: DeserializeOwned>(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Reply<T>, SessionError> {
        self.ensure_ready()?;
        let response = self.exchange(method, params).await?;
        self.decode_reply(method, response)
    }

    /// Close stdin, give the server a grace period, then kill and reap it.
    ///
    /// Valid in every state; returns the server's exit state when known.
    /// Later calls fail with [`SessionError::Closed`].
    pub async fn close(&mut self) -> Option<ProcessExit> {
        if self.state != SessionState::Failed {
            self.state = SessionState::Closed;
        }
        self.lock_pending().fail_all("session closed");

        // The dispatcher may hold the writer while blocked on a full pipe
        if !self.dispatcher.is_finished() {
            self.dispatcher.abort();
            let _ = (&mut self.dispatcher).await;
        }

        // Dropping the writer closes the server's stdin
        self.writer.lock().await.take();

        let exit = match self.process.take() {
            Some(process) => process.shutdown(self.options.shutdown_grace).await,
            None => None,
        };
        self.reader.abort();
        debug!("Session closed ({:?})", self.state);
        exit
    }

    async fn list_paged<P>(&mut self, method: &str) -> Result<Reply<Vec<P::Item>>, SessionError>
    where
        P: Paginated + DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..limits::MAX_LIST_PAGES {
            let params = cursor.take().map(|c| json!({ "cursor": c }));
            match self.request::<P>(method, params).await? {
                Reply::Error(e) => return Ok(Reply::Error(e)),
                Reply::Ok(page) => {
                    let (page_items, next) = page.into_page();
                    items.extend(page_items);
                    match next {
                        Some(next) if !next.is_empty() => cursor = Some(next),
                        _ => return Ok(Reply::Ok(items)),
                    }
                }
            }
        }

        Err(self.fail(SessionError::Transport(format!(
            "{method} still paginating after {} pages",
            limits::MAX_LIST_PAGES
        ))))
    }

    /// Send one request and wait for the response with the same id.
    async fn exchange(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, SessionError> {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);

        let registered = self.lock_pending().register(id, method);
        let rx = match registered {
            Ok(rx) => rx,
            Err(reason) => return Err(self.fail(SessionError::Transport(reason))),
        };

        // One deadline covers both the write and the wait for the answer
        let deadline = Instant::now() + self.options.timeout;
        let request = JsonRpcRequest::call(id, method, params);
        if let Err(e) = self.send_by(&request, deadline).await {
            self.lock_pending().abandon(id);
            return Err(self.fail(e));
        }
        debug!("Sent {} (id {})", method, id);

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(reason))) => Err(self.fail(SessionError::Transport(reason))),
            Ok(Err(_)) => Err(self.fail(SessionError::Transport(
                "response dispatcher stopped".to_string(),
            ))),
            Err(_) => {
                self.lock_pending().abandon(id);
                Err(self.fail(SessionError::Timeout {
                    method: method.to_string(),
                    after: self.options.timeout,
                }))
            }
        }
    }

    fn decode_reply<T: DeserializeOwned>(
        &mut self,
        method: &str,
        response: JsonRpcResponse,
    ) -> Result<Reply<T>, SessionError> {
        if let Some(error) = response.error {
            debug!("{} answered with {}", method, error);
            return Ok(Reply::Error(error));
        }
        let result = response.result.unwrap_or(Value::Null);
        match serde_json::from_value::<T>(result) {
            Ok(value) => Ok(Reply::Ok(value)),
            Err(e) => Err(self.fail(SessionError::Transport(format!(
                "malformed {method} result: {e}"
            )))),
        }
    }

    /// Write `request`, giving up at `deadline` if the server stops reading.
    async fn send_by(
        &self,
        request: &JsonRpcRequest,
        deadline: Instant,
    ) -> Result<(), SessionError> {
        match tokio::time::timeout_at(deadline, self.write(request)).await {
            Ok(written) => written,
            Err(_) => Err(SessionError::Timeout {
                method: request.method.clone(),
                after: self.options.timeout,
            }),
        }
    }

    async fn write(&self, request: &JsonRpcRequest) -> Result<(), SessionError> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| SessionError::Transport("server stdin is closed".to_string()))?;
        writer
            .send(request)
            .await
            .map_err(|e| SessionError::Transport(format!("failed to write {}: {e:#}", request.method)))
    }

    fn ensure_ready(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Ready => Ok(()),
            _ => Err(self.state_error(SessionState::Ready)),
        }
    }

    fn state_error(&self, expected: SessionState) -> SessionError {
        match self.state {
            SessionState::Failed => SessionError::Poisoned(
                self.failure
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string()),
            ),
            SessionState::Closed => SessionError::Closed,
            actual => SessionError::InvalidState { expected, actual },
        }
    }

    /// Poison the session and kill the server. Returns `err` for propagation.
    fn fail(&mut self, err: SessionError) -> SessionError {
        warn!("Session failed: {}", err);
        self.state = SessionState::Failed;
        self.failure = Some(err.to_string());
        self.lock_pending().fail_all(&format!("session failed: {err}"));
        if let Some(process) = self.process.as_mut() {
            process.kill();
        }
        err
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingCalls> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispatcher.abort();
        self.reader.abort();
        // `process` is dropped after this, which kills the child
    }
}

/// Route inbound traffic: responses to their callers, server requests to
/// canned answers, notifications to the log.
async fn dispatch(
    mut events: mpsc::Receiver<ServerEvent>,
    pending: SharedPending,
    writer: SharedWriter,
) {
    let reason = loop {
        match events.recv().await {
            Some(ServerEvent::Message(IncomingMessage::Response(response))) => {
                let id = response.id.clone();
                let resolved = pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .resolve(response);
                if !resolved {
                    warn!("Dropping uncorrelated response with id {}", id);
                }
            }
            Some(ServerEvent::Message(IncomingMessage::Notification(note))) => {
                debug!("Server notification: {}", note.method);
            }
            Some(ServerEvent::Message(IncomingMessage::Request(request))) => {
                answer_server_request(&writer, request).await;
            }
            Some(ServerEvent::Malformed(reason)) => break format!("malformed message: {reason}"),
            Some(ServerEvent::Closed) | None => {
                break "server closed its output stream".to_string()
            }
        }
    };

    debug!("Dispatcher stopping: {}", reason);
    pending
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .fail_all(&reason);
}

async fn answer_server_request(writer: &SharedWriter, request: JsonRpcRequest) {
    let id = request.id.clone().unwrap_or(Value::Null);
    let response = if request.method == methods::PING {
        JsonRpcResponse::success(id, json!({}))
    } else {
        debug!("Declining server request {}", request.method);
        JsonRpcResponse::failure(
            id,
            jsonrpc::ERROR_METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        )
    };

    let mut guard = writer.lock().await;
    if let Some(w) = guard.as_mut() {
        if let Err(e) = w.send(&response).await {
            warn!("Failed to answer server request {}: {:#}", request.method, e);
        }
    }
}
