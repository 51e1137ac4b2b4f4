//! Per-request response aggregation
//!
//! A [`ResponseAggregator`] is created for each dispatched request. Handlers
//! never see it directly; each one receives a [`ResponseHandle`] that pushes
//! content and completion onto the aggregator's queue and mutates the shared
//! status, error and header state under a lock.

use std::{
    collections::BTreeMap,
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::status::StatusTable;

pub const STATUS_MESSAGE_HEADER: &str = "x-status-message";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const MARKUP_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub code: u16,
    pub message: String,
}

/// Entries of the completion queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Content(Value),
    Complete,
}

/// Structured response body.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub body: &'a [Value],
    pub errors: &'a [ErrorEntry],
    pub status_code: u16,
    pub status_message: &'a str,
}

#[derive(Debug)]
pub struct ResponseState {
    content: Vec<Value>,
    errors: Vec<ErrorEntry>,
    headers: BTreeMap<String, Vec<String>>,
    status_code: u16,
    status_message: String,
    raw_body: Option<String>,
    statuses: Arc<StatusTable>,
    closed: bool,
}

impl ResponseState {
    pub fn new(statuses: Arc<StatusTable>) -> Self {
        let mut state = Self {
            content: Vec::new(),
            errors: Vec::new(),
            headers: BTreeMap::new(),
            status_code: 200,
            status_message: String::new(),
            raw_body: None,
            statuses,
            closed: false,
        };
        state.set_status_code(200);
        state
    }

    pub fn push_content(&mut self, value: Value) {
        self.content.push(value);
    }

    /// Records an error and makes it the response status.
    pub fn add_error(&mut self, err: impl Display, code: u16) {
        let message = err.to_string();
        self.status_code = code;
        self.status_message = message.clone();
        self.errors.push(ErrorEntry { code, message });
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.entry(key.into()).or_default().push(value.into());
    }

    pub fn set_status(&mut self, code: u16, message: &str) {
        self.set_status_code(code);
        self.set_status_message(message);
    }

    pub fn set_status_code(&mut self, code: u16) {
        self.status_code = code;
        self.status_message = self
            .statuses
            .reason_phrase(code)
            .unwrap_or_default()
            .to_string();
    }

    /// Composes `"<reason phrase> - <message>"` when the current code has a
    /// reason phrase. Empty text or text equal to the phrase leaves the bare
    /// phrase.
    pub fn set_status_message(&mut self, message: &str) {
        self.status_message = match self.statuses.reason_phrase(self.status_code) {
            Some(phrase) if message.is_empty() || message == phrase => phrase.to_string(),
            Some(phrase) => format!("{phrase} - {message}"),
            None => message.to_string(),
        };
    }

    pub fn set_raw_body(&mut self, body: impl Into<String>) {
        self.raw_body = Some(body.into());
    }

    /// Ends the window in which handles may mutate this state.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn content(&self) -> &[Value] {
        &self.content
    }

    pub fn errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    pub fn headers(&self) -> &BTreeMap<String, Vec<String>> {
        &self.headers
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    /// The alternate body, if one was set and is non-empty.
    pub fn raw_body(&self) -> Option<&str> {
        self.raw_body.as_deref().filter(|body| !body.is_empty())
    }

    pub fn envelope(&self) -> Envelope<'_> {
        Envelope {
            body: &self.content,
            errors: &self.errors,
            status_code: self.status_code,
            status_message: &self.status_message,
        }
    }

    pub fn finalize(&mut self) -> FinalResponse {
        let raw_body = self.raw_body().map(str::to_string);
        let (content_type, body) = match raw_body {
            Some(raw) => (MARKUP_CONTENT_TYPE, Bytes::from(raw)),
            None => (JSON_CONTENT_TYPE, self.serialize_envelope()),
        };

        FinalResponse {
            status_code: self.status_code,
            status_message: self.status_message.clone(),
            headers: self
                .headers
                .iter()
                .flat_map(|(key, values)| values.iter().map(|value| (key.clone(), value.clone())))
                .collect(),
            content_type,
            body,
        }
    }

    fn serialize_envelope(&mut self) -> Bytes {
        match serde_json::to_vec(&self.envelope()) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                self.add_error(format!("failed to serialize response envelope: {err}"), 500);
                let errors: Vec<Value> = self
                    .errors
                    .iter()
                    .map(|entry| json!({ "code": entry.code, "message": entry.message }))
                    .collect();
                let fallback = json!({
                    "body": [],
                    "errors": errors,
                    "status_code": self.status_code,
                    "status_message": self.status_message,
                });
                Bytes::from(fallback.to_string())
            }
        }
    }
}

fn lock_state(state: &Mutex<ResponseState>) -> MutexGuard<'_, ResponseState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owned by one dispatch cycle; holds the shared state and the single
/// consumer end of the completion queue.
pub struct ResponseAggregator {
    state: Arc<Mutex<ResponseState>>,
    sender: mpsc::UnboundedSender<Message>,
    receiver: mpsc::UnboundedReceiver<Message>,
    cancellation: CancellationToken,
}

impl ResponseAggregator {
    pub fn new(statuses: Arc<StatusTable>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(ResponseState::new(statuses))),
            sender,
            receiver,
            cancellation: CancellationToken::new(),
        }
    }

    /// A fresh handle for one handler, with its own completion flag.
    pub fn handle(&self) -> ResponseHandle {
        ResponseHandle {
            state: self.state.clone(),
            queue: self.sender.clone(),
            completed: Arc::new(AtomicBool::new(false)),
            cancellation: self.cancellation.clone(),
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Waits for the next queued message. The aggregator keeps a sender of
    /// its own, so this never observes a closed queue.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    pub fn push_content(&self, value: Value) {
        lock_state(&self.state).push_content(value);
    }

    pub fn add_error(&self, err: impl Display, code: u16) {
        lock_state(&self.state).add_error(err, code);
    }

    /// Closes the fan-in window; later handle mutations are ignored.
    pub fn close(&self) {
        lock_state(&self.state).close();
    }

    pub fn content_len(&self) -> usize {
        lock_state(&self.state).content().len()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&ResponseState) -> R) -> R {
        f(&lock_state(&self.state))
    }

    pub fn finalize(self) -> FinalResponse {
        lock_state(&self.state).finalize()
    }
}

/// A handler's view of the request's aggregator.
///
/// Clones share the same completion flag, so a handler signals completion at
/// most once however many clones it holds.
#[derive(Clone)]
pub struct ResponseHandle {
    state: Arc<Mutex<ResponseState>>,
    queue: mpsc::UnboundedSender<Message>,
    completed: Arc<AtomicBool>,
    cancellation: CancellationToken,
}

impl ResponseHandle {
    /// Pushes a content item. Values that fail to serialize are recorded as
    /// a 500 error instead.
    pub fn send<T: Serialize + ?Sized>(&self, value: &T) {
        if self.is_complete() {
            warn!("content sent after completion was signalled; dropping it");
            return;
        }

        match serde_json::to_value(value) {
            Ok(value) => self.enqueue(Message::Content(value)),
            Err(err) => self.add_error(format!("failed to serialize handler content: {err}"), 500),
        }
    }

    /// Signals that this handler is finished. Only the first call counts.
    pub fn done(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.enqueue(Message::Complete);
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn add_error(&self, err: impl Display, code: u16) {
        self.mutate("add_error", |state| state.add_error(err, code));
    }

    pub fn add_header(&self, key: impl Into<String>, value: impl Into<String>) {
        self.mutate("add_header", |state| state.add_header(key, value));
    }

    pub fn set_status(&self, code: u16, message: &str) {
        self.mutate("set_status", |state| state.set_status(code, message));
    }

    pub fn set_status_code(&self, code: u16) {
        self.mutate("set_status_code", |state| state.set_status_code(code));
    }

    pub fn set_status_message(&self, message: &str) {
        self.mutate("set_status_message", |state| state.set_status_message(message));
    }

    pub fn set_raw_body(&self, body: impl Into<String>) {
        self.mutate("set_raw_body", |state| state.set_raw_body(body));
    }

    pub fn status_code(&self) -> u16 {
        lock_state(&self.state).status_code()
    }

    pub fn status_message(&self) -> String {
        lock_state(&self.state).status_message().to_string()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the request's fan-in window has closed.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    fn mutate(&self, operation: &'static str, f: impl FnOnce(&mut ResponseState)) {
        let mut state = lock_state(&self.state);
        if state.is_closed() {
            debug!(operation, "response already closed; mutation ignored");
            return;
        }
        f(&mut state);
    }

    fn enqueue(&self, message: Message) {
        if self.queue.send(message).is_err() {
            debug!("completion queue closed; message discarded");
        }
    }
}

/// The emitted response: status line, headers and body.
#[derive(Debug, Clone)]
pub struct FinalResponse {
    pub status_code: u16,
    pub status_message: String,
    pub headers: Vec<(String, String)>,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl FinalResponse {
    pub fn is_raw(&self) -> bool {
        self.content_type == MARKUP_CONTENT_TYPE
    }
}

impl IntoResponse for FinalResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut headers = HeaderMap::new();

        if !self.status_message.is_empty() {
            match HeaderValue::from_str(&self.status_message) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(STATUS_MESSAGE_HEADER), value);
                }
                Err(_) => warn!(
                    status_message = %self.status_message,
                    "status message is not a valid header value; omitting it"
                ),
            }
        }

        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(header = %name, "skipping invalid response header"),
            }
        }

        if !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(self.content_type),
            );
        }

        (status, headers, Body::from(self.body)).into_response()
    }
}
