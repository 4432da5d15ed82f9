//! Requests: single asynchronous operations against an object store.
//!
//! A [`Request`] resolves exactly once, in submission order within its
//! transaction. Callbacks registered with [`Request::on_success`] and
//! [`Request::on_error`] run from the event loop; the owning transaction
//! accepts new requests while they run.

use crate::error::DomException;
use crate::types::{ReadyState, TransactionId};
use parking_lot::Mutex;
use stashdb_codec::{Key, Value};
use std::sync::Arc;

/// Success value of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestResult {
    /// `get` found a record.
    Value(Value),
    /// `get` found nothing. A miss is not an error.
    Absent,
    /// `get_all` records in key order.
    Values(Vec<Value>),
    /// Key written by `put` or `add`.
    Key(Key),
    /// `count` result.
    Count(u64),
    /// `delete` or `clear` completed.
    Done,
}

impl RequestResult {
    /// Returns the value of a `get` hit.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the records of a `get_all`.
    #[must_use]
    pub fn values(&self) -> Option<&[Value]> {
        match self {
            Self::Values(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the key written by `put` or `add`.
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::Key(k) => Some(k),
            _ => None,
        }
    }

    /// Returns the result of `count`.
    #[must_use]
    pub fn count(&self) -> Option<u64> {
        match self {
            Self::Count(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns true for a `get` miss.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// What an error callback decided about a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// The failure is handled; the transaction continues.
    Handled,
    /// The failure aborts the transaction.
    Propagate,
}

pub(crate) type SuccessCallback = Box<dyn FnOnce(&RequestResult) + Send>;
pub(crate) type ErrorCallback = Box<dyn FnOnce(&DomException) -> ErrorDisposition + Send>;

pub(crate) struct RequestCell {
    transaction: TransactionId,
    store: String,
    inner: Mutex<RequestInner>,
}

struct RequestInner {
    ready: ReadyState,
    outcome: Option<Result<RequestResult, DomException>>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl RequestCell {
    pub(crate) fn new(transaction: TransactionId, store: &str) -> Arc<Self> {
        Arc::new(Self {
            transaction,
            store: store.to_string(),
            inner: Mutex::new(RequestInner {
                ready: ReadyState::Pending,
                outcome: None,
                on_success: None,
                on_error: None,
            }),
        })
    }

    /// Records the outcome and hands back the callback that must see it.
    pub(crate) fn resolve(&self, outcome: Result<RequestResult, DomException>) -> Delivery {
        let mut inner = self.inner.lock();
        inner.ready = ReadyState::Done;
        let delivery = match &outcome {
            Ok(_) => Delivery::Success(inner.on_success.take()),
            Err(_) => Delivery::Error(inner.on_error.take()),
        };
        inner.on_success = None;
        inner.on_error = None;
        inner.outcome = Some(outcome);
        delivery
    }
}

/// The callback a resolved request owes its caller.
pub(crate) enum Delivery {
    Success(Option<SuccessCallback>),
    Error(Option<ErrorCallback>),
}

/// Handle to a submitted request.
///
/// Cloning yields another handle to the same request.
#[derive(Clone)]
pub struct Request {
    cell: Arc<RequestCell>,
}

impl Request {
    pub(crate) fn new(cell: Arc<RequestCell>) -> Self {
        Self { cell }
    }

    /// Returns whether the request has resolved.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.cell.inner.lock().ready
    }

    /// Returns the success value, if the request succeeded.
    #[must_use]
    pub fn result(&self) -> Option<RequestResult> {
        match &self.cell.inner.lock().outcome {
            Some(Ok(result)) => Some(result.clone()),
            _ => None,
        }
    }

    /// Returns the error, if the request failed.
    #[must_use]
    pub fn error(&self) -> Option<DomException> {
        match &self.cell.inner.lock().outcome {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }

    /// Returns the name of the object store the request targets.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.cell.store
    }

    /// Returns the id of the owning transaction.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.cell.transaction
    }

    /// Sets the success callback. Has no effect once the request resolved.
    pub fn on_success(&self, callback: impl FnOnce(&RequestResult) + Send + 'static) {
        let mut inner = self.cell.inner.lock();
        if inner.ready == ReadyState::Pending {
            inner.on_success = Some(Box::new(callback));
        }
    }

    /// Sets the error callback. Has no effect once the request resolved.
    ///
    /// Returning [`ErrorDisposition::Propagate`] (or registering no callback)
    /// aborts the transaction with the request's error.
    pub fn on_error(
        &self,
        callback: impl FnOnce(&DomException) -> ErrorDisposition + Send + 'static,
    ) {
        let mut inner = self.cell.inner.lock();
        if inner.ready == ReadyState::Pending {
            inner.on_error = Some(Box::new(callback));
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.cell.inner.lock();
        f.debug_struct("Request")
            .field("transaction", &self.cell.transaction)
            .field("store", &self.cell.store)
            .field("ready", &inner.ready)
            .field("outcome", &inner.outcome)
            .finish()
    }
}
