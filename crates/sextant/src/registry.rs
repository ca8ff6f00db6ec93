//! Correlation of outbound requests with inbound replies.
//!
//! Every request gets a fresh id from a monotonically increasing counter and
//! a pending call holding either a waiter (synchronous calls) or a
//! callback (asynchronous submissions). Replies are matched by id, never by
//! arrival order.
//!
//! # Locking
//!
//! The pending map is behind a short `std::sync::Mutex`. Continuations are
//! always resolved after the lock is released, so a callback may submit
//! another request without deadlocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use sextant_protocol::{Request, ResponsePayload, codec};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Correlation id of a request. Unique within one session.
pub type CallId = u64;

/// Sending half of a connection's writer channel. Each item is a frame body.
pub type Outbound = mpsc::UnboundedSender<Vec<u8>>;

/// Continuation of an asynchronous submission.
pub type Callback = Box<dyn FnOnce(Result<ResponsePayload>) + Send + 'static>;

enum Continuation {
    Waiter(oneshot::Sender<Result<ResponsePayload>>),
    Callback(Callback),
}

impl Continuation {
    fn resolve(self, result: Result<ResponsePayload>) {
        match self {
            // The waiter may have timed out and gone away
            Self::Waiter(tx) => {
                let _ = tx.send(result);
            }
            Self::Callback(callback) => callback(result),
        }
    }
}

/// A request awaiting its reply.
struct PendingCall {
    kind: &'static str,
    continuation: Continuation,
    submitted_at: Instant,
}

/// Outstanding requests of one session.
pub struct RequestRegistry {
    next_id: AtomicU64,
    pending: Mutex<HashMap<CallId, PendingCall>>,
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl RequestRegistry {
    /// Create an empty registry. The first id handed out is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CallId, PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve the next call id. Ids are never reused.
    pub fn allocate_id(&self) -> CallId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(&self, call_id: CallId, kind: &'static str, continuation: Continuation) {
        self.lock().insert(
            call_id,
            PendingCall {
                kind,
                continuation,
                submitted_at: Instant::now(),
            },
        );
    }

    fn take(&self, call_id: CallId) -> Option<PendingCall> {
        self.lock().remove(&call_id)
    }

    /// Send a request and wait for its reply.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the request cannot be encoded (nothing is sent)
    /// - [`Error::Timeout`] if no reply arrives within `timeout`; the pending
    ///   call is removed so a late reply is dropped
    /// - [`Error::ConnectionLost`] if the connection closes first
    /// - [`Error::Server`] if the server reports a failure
    pub async fn call(
        &self,
        outbound: &Outbound,
        request: &Request,
        timeout: Duration,
    ) -> Result<ResponsePayload> {
        let kind = request.kind();
        let call_id = self.allocate_id();
        let body = codec::encode(call_id, request)?;

        let (tx, rx) = oneshot::channel();
        self.register(call_id, kind, Continuation::Waiter(tx));
        if outbound.send(body).is_err() {
            self.take(call_id);
            return Err(Error::ConnectionLost);
        }
        trace!(call_id, kind, "Request sent, waiting for reply");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                self.take(call_id);
                warn!(call_id, kind, timeout_ms = timeout.as_millis(), "Request timed out");
                Err(Error::Timeout {
                    request: kind,
                    timeout,
                })
            }
        }
    }

    /// Send a request and return immediately.
    ///
    /// `callback` runs on the receive loop when the reply arrives, or with
    /// [`Error::ConnectionLost`] if the connection drops first. It is invoked
    /// at most once, and never if this function returns an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the request cannot be encoded and
    /// [`Error::ConnectionLost`] if the writer channel is closed.
    pub fn submit_with<F>(
        &self,
        outbound: &Outbound,
        request: &Request,
        callback: F,
    ) -> Result<CallId>
    where
        F: FnOnce(Result<ResponsePayload>) + Send + 'static,
    {
        let kind = request.kind();
        let call_id = self.allocate_id();
        let body = codec::encode(call_id, request)?;

        self.register(call_id, kind, Continuation::Callback(Box::new(callback)));
        if outbound.send(body).is_err() {
            // A concurrent teardown may already have resolved the callback
            if self.take(call_id).is_some() {
                return Err(Error::ConnectionLost);
            }
        }
        trace!(call_id, kind, "Request submitted");
        Ok(call_id)
    }

    /// Route a reply to its pending call.
    ///
    /// Returns `false` if no call with this id is pending, which happens for
    /// replies that arrive after a timeout.
    pub fn complete(&self, call_id: CallId, payload: ResponsePayload) -> bool {
        let Some(call) = self.take(call_id) else {
            warn!(
                call_id,
                typehint = payload.typehint(),
                "Dropping reply for unknown call"
            );
            return false;
        };

        debug!(
            call_id,
            kind = call.kind,
            typehint = payload.typehint(),
            elapsed_ms = call.submitted_at.elapsed().as_millis(),
            "Reply received"
        );
        let result = match payload {
            ResponsePayload::ServerError { description } => Err(Error::Server(description)),
            other => Ok(other),
        };
        call.continuation.resolve(result);
        true
    }

    /// Resolve one pending call with `error`.
    ///
    /// Returns `false` if no call with this id is pending.
    pub fn fail(&self, call_id: CallId, error: Error) -> bool {
        let Some(call) = self.take(call_id) else {
            return false;
        };
        debug!(call_id, kind = call.kind, error = %error, "Failing call");
        call.continuation.resolve(Err(error));
        true
    }

    /// Resolve every pending call with [`Error::ConnectionLost`].
    ///
    /// Returns the number of calls failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<(CallId, PendingCall)> = self.lock().drain().collect();
        let count = drained.len();
        for (call_id, call) in drained {
            trace!(call_id, kind = call.kind, "Failing pending call");
            call.continuation.resolve(Err(Error::ConnectionLost));
        }
        if count > 0 {
            debug!(count, "Failed pending calls on disconnect");
        }
        count
    }

    /// Number of outstanding calls.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Whether a call id is still awaiting its reply.
    #[must_use]
    pub fn is_pending(&self, call_id: CallId) -> bool {
        self.lock().contains_key(&call_id)
    }
}
