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

//! Correlation table for in-flight requests.
//!
//! Responses are matched to callers strictly by correlation id, so a server
//! that answers out of order (or a future pipelined caller) is handled without
//! relying on arrival order.

use std::collections::HashMap;
use tokio::sync::oneshot;

use crate::core::models::JsonRpcResponse;

/// Delivered to a waiting caller: the response, or the reason the stream died.
pub type CallOutcome = Result<JsonRpcResponse, String>;

#[derive(Debug)]
struct PendingCall {
    method: String,
    tx: oneshot::Sender<CallOutcome>,
}

#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: HashMap<u64, PendingCall>,
    /// Set once the stream is gone; later registrations fail immediately
    closed: Option<String>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call before its request is written.
    pub fn register(
        &mut self,
        id: u64,
        method: &str,
    ) -> Result<oneshot::Receiver<CallOutcome>, String> {
        if let Some(reason) = &self.closed {
            return Err(reason.clone());
        }
        if self.calls.contains_key(&id) {
            return Err(format!("correlation id {id} is already in flight"));
        }
        let (tx, rx) = oneshot::channel();
        self.calls.insert(
            id,
            PendingCall {
                method: method.to_string(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Route a response to its caller. Returns false for uncorrelated responses.
    pub fn resolve(&mut self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.correlation_id() else {
            return false;
        };
        match self.calls.remove(&id) {
            Some(call) => {
                tracing::trace!("Resolved {} (id {})", call.method, id);
                // The caller may have timed out and dropped its receiver
                let _ = call.tx.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Forget a call whose caller gave up (timeout).
    pub fn abandon(&mut self, id: u64) -> Option<String> {
        self.calls.remove(&id).map(|call| call.method)
    }

    /// Fail every in-flight call and refuse new ones.
    pub fn fail_all(&mut self, reason: &str) {
        if self.closed.is_none() {
            self.closed = Some(reason.to_string());
        }
        for (_, call) in self.calls.drain() {
            let _ = call.tx.send(Err(reason.to_string()));
        }
    }

    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }
}
