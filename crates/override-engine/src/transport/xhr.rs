//! `XMLHttpRequest` emulation.
//!
//! An [`XmlHttpRequest`] is a handle to one request object. Its `open`/`send`
//! methods dispatch through the page's XHR prototype slot at call time, so a
//! backend installed after construction is still observed, as with a
//! prototype patch.
//!
//! Response properties have a native value (written by the backend) and an
//! optional per-instance override. Getters prefer the override; overrides
//! never leak to other instances.
//!
//! Each instance counts the `send()` calls on the stack, so a backend that
//! completes on another task holds its events until the caller's `send()`
//! has returned, whatever thread the task runs on.

use crate::error::TransportError;
use crate::page::{PageContext, Slot};
use crate::transport::fetch::{Fetch, FetchRequest, FetchResponse};
use async_trait::async_trait;
use bytes::Bytes;
use hyper::http::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use parking_lot::Mutex;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ReadyState {
    #[default]
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

impl ReadyState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Payload of `load`, `loadend` and `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressEvent {
    pub loaded: u64,
    pub total: u64,
    pub length_computable: bool,
}

impl ProgressEvent {
    pub fn complete(len: u64) -> Self {
        Self {
            loaded: len,
            total: len,
            length_computable: true,
        }
    }

    /// Completion sized in UTF-16 code units, as a page measures a body.
    pub fn for_body(body: &str) -> Self {
        Self::complete(body.encode_utf16().count() as u64)
    }
}

pub type StateHandler = Box<dyn FnMut(&XmlHttpRequest) + Send>;
pub type ProgressHandler = Box<dyn FnMut(&XmlHttpRequest, &ProgressEvent) + Send>;

/// The XHR prototype: what `open` and `send` do.
#[async_trait]
pub trait XhrBackend: Send + Sync {
    fn open(&self, xhr: &XmlHttpRequest, method: &str, url: &str) -> Result<(), TransportError>;

    /// Starts the request; completion is reported through the instance's
    /// handlers after this returns.
    fn send(&self, xhr: &XmlHttpRequest, body: Option<Bytes>) -> Result<(), TransportError>;

    /// Performs a request without driving any instance.
    async fn round_trip(&self, request: FetchRequest) -> Result<FetchResponse, TransportError>;
}

/// Response values written over the native ones on a single instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseOverride {
    pub status: u16,
    pub status_text: String,
    pub response_text: String,
    pub headers: HeaderMap,
}

#[derive(Debug, Default)]
struct Overrides {
    ready_state: Option<ReadyState>,
    status: Option<u16>,
    status_text: Option<String>,
    response_text: Option<String>,
    response: Option<String>,
    headers: Option<HeaderMap>,
}

#[derive(Debug, Default)]
struct XhrState {
    ready_state: ReadyState,
    method: Option<String>,
    url: Option<String>,
    request_headers: HeaderMap,
    send_flag: bool,
    status: u16,
    status_text: String,
    response_headers: HeaderMap,
    response_text: String,
    response_url: String,
    overrides: Overrides,
    // Request target as recorded by an installed interceptor
    intercept_target: Option<(String, String)>,
}

#[derive(Default)]
struct Handlers {
    ready_state_change: Option<StateHandler>,
    load: Option<ProgressHandler>,
    loadend: Option<ProgressHandler>,
    error: Option<ProgressHandler>,
}

struct XhrInner {
    prototype: Slot<dyn XhrBackend>,
    state: Mutex<XhrState>,
    handlers: Mutex<Handlers>,
    sends_in_progress: watch::Sender<usize>,
}

#[derive(Clone)]
pub struct XmlHttpRequest {
    inner: Arc<XhrInner>,
}

impl std::fmt::Debug for XmlHttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XmlHttpRequest")
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl XmlHttpRequest {
    /// `new XMLHttpRequest()` in `page`.
    pub fn new(page: &PageContext) -> Self {
        Self::with_prototype(page.xhr_slot().clone())
    }

    /// A new instance bound to the given prototype slot.
    pub fn with_prototype(prototype: Slot<dyn XhrBackend>) -> Self {
        let (sends_in_progress, _) = watch::channel(0);
        Self {
            inner: Arc::new(XhrInner {
                prototype,
                state: Mutex::new(XhrState::default()),
                handlers: Mutex::new(Handlers::default()),
                sends_in_progress,
            }),
        }
    }

    pub fn ptr_eq(&self, other: &XmlHttpRequest) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Page-facing API
    // ------------------------------------------------------------------

    pub fn open(&self, method: &str, url: &str) -> Result<(), TransportError> {
        self.inner.prototype.get().open(self, method, url)
    }

    pub fn set_request_header(&self, name: &str, value: &str) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        if state.ready_state != ReadyState::Opened || state.send_flag {
            return Err(TransportError::InvalidState(
                "setRequestHeader() requires an opened, unsent request".to_string(),
            ));
        }
        let name = HeaderName::from_str(name)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        state.request_headers.append(name, value);
        Ok(())
    }

    pub fn send(&self, body: Option<Bytes>) -> Result<(), TransportError> {
        self.inner.sends_in_progress.send_modify(|n| *n += 1);
        let result = self.inner.prototype.get().send(self, body);
        self.inner.sends_in_progress.send_modify(|n| *n -= 1);
        result
    }

    pub fn on_ready_state_change(&self, handler: impl FnMut(&XmlHttpRequest) + Send + 'static) {
        self.inner.handlers.lock().ready_state_change = Some(Box::new(handler));
    }

    pub fn on_load(
        &self,
        handler: impl FnMut(&XmlHttpRequest, &ProgressEvent) + Send + 'static,
    ) {
        self.inner.handlers.lock().load = Some(Box::new(handler));
    }

    pub fn on_loadend(
        &self,
        handler: impl FnMut(&XmlHttpRequest, &ProgressEvent) + Send + 'static,
    ) {
        self.inner.handlers.lock().loadend = Some(Box::new(handler));
    }

    pub fn on_error(
        &self,
        handler: impl FnMut(&XmlHttpRequest, &ProgressEvent) + Send + 'static,
    ) {
        self.inner.handlers.lock().error = Some(Box::new(handler));
    }

    pub fn ready_state(&self) -> ReadyState {
        let state = self.inner.state.lock();
        state.overrides.ready_state.unwrap_or(state.ready_state)
    }

    pub fn status(&self) -> u16 {
        let state = self.inner.state.lock();
        state.overrides.status.unwrap_or(state.status)
    }

    pub fn status_text(&self) -> String {
        let state = self.inner.state.lock();
        state
            .overrides
            .status_text
            .clone()
            .unwrap_or_else(|| state.status_text.clone())
    }

    pub fn response_text(&self) -> String {
        let state = self.inner.state.lock();
        state
            .overrides
            .response_text
            .clone()
            .unwrap_or_else(|| state.response_text.clone())
    }

    pub fn response(&self) -> String {
        let state = self.inner.state.lock();
        state
            .overrides
            .response
            .clone()
            .or_else(|| state.overrides.response_text.clone())
            .unwrap_or_else(|| state.response_text.clone())
    }

    pub fn response_url(&self) -> String {
        self.inner.state.lock().response_url.clone()
    }

    pub fn get_response_header(&self, name: &str) -> Option<String> {
        let state = self.inner.state.lock();
        let headers = state
            .overrides
            .headers
            .as_ref()
            .unwrap_or(&state.response_headers);
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// CRLF-separated `name: value` lines, as `getAllResponseHeaders()`.
    pub fn get_all_response_headers(&self) -> String {
        let state = self.inner.state.lock();
        let headers = state
            .overrides
            .headers
            .as_ref()
            .unwrap_or(&state.response_headers);
        headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| format!("{}: {}\r\n", k, v)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Backend-facing API
    // ------------------------------------------------------------------

    /// Arguments of the last `open`, as the native object saw them.
    pub fn opened_target(&self) -> Option<(String, String)> {
        let state = self.inner.state.lock();
        state.method.clone().zip(state.url.clone())
    }

    pub fn request_headers(&self) -> HeaderMap {
        self.inner.state.lock().request_headers.clone()
    }

    /// Reinitialize for a new request, as `open` does natively.
    pub fn reset_for_open(&self, method: &str, url: &str) {
        let mut state = self.inner.state.lock();
        let intercept_target = state.intercept_target.take();
        *state = XhrState {
            ready_state: ReadyState::Opened,
            method: Some(method.to_string()),
            url: Some(url.to_string()),
            intercept_target,
            ..Default::default()
        };
    }

    /// Mark the request as sent; fails if it was not opened or already sent.
    pub fn begin_send(&self) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        if state.ready_state != ReadyState::Opened || state.send_flag {
            return Err(TransportError::InvalidState(
                "send() requires an opened, unsent request".to_string(),
            ));
        }
        state.send_flag = true;
        Ok(())
    }

    /// Clear the send flag without completing, e.g. before handing the
    /// request to another backend.
    pub fn reset_send_flag(&self) {
        self.inner.state.lock().send_flag = false;
    }

    /// Resolves once no `send()` call on this instance is on the stack.
    pub async fn send_returned(&self) {
        let mut in_progress = self.inner.sends_in_progress.subscribe();
        let _ = in_progress.wait_for(|n| *n == 0).await;
    }

    pub fn set_native_response(&self, response: &FetchResponse) {
        let mut state = self.inner.state.lock();
        state.status = response.status;
        state.status_text = response.status_text.clone();
        state.response_headers = response.headers.clone();
        state.response_url = response.url.clone();
    }

    pub fn set_native_body(&self, body: String) {
        self.inner.state.lock().response_text = body;
    }

    /// Set the native readyState and notify.
    pub fn transition(&self, ready_state: ReadyState) {
        self.inner.state.lock().ready_state = ready_state;
        self.dispatch_ready_state_change();
    }

    /// Network failure completion: status 0, DONE, then `error` and `loadend`.
    pub fn fail(&self) {
        {
            let mut state = self.inner.state.lock();
            state.status = 0;
            state.status_text.clear();
            state.response_text.clear();
            state.send_flag = false;
        }
        self.transition(ReadyState::Done);
        let event = ProgressEvent::default();
        self.dispatch_error(&event);
        self.dispatch_loadend(&event);
    }

    /// Load completion: `load` then `loadend` sized by the current body.
    pub fn complete(&self) {
        let event = ProgressEvent::for_body(&self.response_text());
        self.inner.state.lock().send_flag = false;
        self.dispatch_load(&event);
        self.dispatch_loadend(&event);
    }

    // ------------------------------------------------------------------
    // Instance overrides
    // ------------------------------------------------------------------

    pub fn override_ready_state(&self, ready_state: ReadyState) {
        self.inner.state.lock().overrides.ready_state = Some(ready_state);
    }

    pub fn override_response(&self, response: ResponseOverride) {
        let mut state = self.inner.state.lock();
        state.overrides.status = Some(response.status);
        state.overrides.status_text = Some(response.status_text);
        state.overrides.response = Some(response.response_text.clone());
        state.overrides.response_text = Some(response.response_text);
        state.overrides.headers = Some(response.headers);
    }

    pub fn has_overrides(&self) -> bool {
        let state = self.inner.state.lock();
        state.overrides.ready_state.is_some() || state.overrides.status.is_some()
    }

    pub(crate) fn record_intercept_target(&self, method: &str, url: &str) {
        self.inner.state.lock().intercept_target = Some((method.to_string(), url.to_string()));
    }

    pub(crate) fn intercept_target(&self) -> Option<(String, String)> {
        self.inner.state.lock().intercept_target.clone()
    }

    // ------------------------------------------------------------------
    // Event dispatch
    // ------------------------------------------------------------------

    // Handlers run with no lock held; a handler that installs a replacement
    // for itself keeps the replacement.

    pub fn dispatch_ready_state_change(&self) {
        let handler = self.inner.handlers.lock().ready_state_change.take();
        if let Some(mut handler) = handler {
            handler(self);
            self.inner
                .handlers
                .lock()
                .ready_state_change
                .get_or_insert(handler);
        }
    }

    pub fn dispatch_load(&self, event: &ProgressEvent) {
        self.dispatch_progress(event, |h| &mut h.load);
    }

    pub fn dispatch_loadend(&self, event: &ProgressEvent) {
        self.dispatch_progress(event, |h| &mut h.loadend);
    }

    pub fn dispatch_error(&self, event: &ProgressEvent) {
        self.dispatch_progress(event, |h| &mut h.error);
    }

    fn dispatch_progress(
        &self,
        event: &ProgressEvent,
        slot: impl Fn(&mut Handlers) -> &mut Option<ProgressHandler>,
    ) {
        let handler = slot(&mut self.inner.handlers.lock()).take();
        if let Some(mut handler) = handler {
            handler(self, event);
            slot(&mut self.inner.handlers.lock()).get_or_insert(handler);
        }
    }
}

/// Real XHR over a [`Fetch`] implementation.
pub struct NetworkXhr {
    fetch: Arc<dyn Fetch>,
}

impl NetworkXhr {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self { fetch }
    }
}

#[async_trait]
impl XhrBackend for NetworkXhr {
    fn open(&self, xhr: &XmlHttpRequest, method: &str, url: &str) -> Result<(), TransportError> {
        if url.is_empty() {
            return Err(TransportError::InvalidRequest("empty URL".to_string()));
        }
        xhr.reset_for_open(&method.to_ascii_uppercase(), url);
        xhr.dispatch_ready_state_change();
        Ok(())
    }

    fn send(&self, xhr: &XmlHttpRequest, body: Option<Bytes>) -> Result<(), TransportError> {
        xhr.begin_send()?;
        let (method, url) = xhr.opened_target().ok_or_else(|| {
            TransportError::InvalidState("send() called before open()".to_string())
        })?;

        let mut request = FetchRequest::new(url).method(method);
        request.headers = xhr.request_headers();
        request.body = body;

        let fetch = Arc::clone(&self.fetch);
        let xhr = xhr.clone();
        tokio::spawn(async move {
            xhr.send_returned().await;
            match fetch.fetch(request).await {
                Ok(response) => {
                    xhr.set_native_response(&response);
                    xhr.transition(ReadyState::HeadersReceived);
                    xhr.set_native_body(response.text());
                    xhr.transition(ReadyState::Loading);
                    xhr.transition(ReadyState::Done);
                    xhr.complete();
                }
                Err(e) => {
                    warn!(error = %e, "XHR network request failed");
                    xhr.fail();
                }
            }
        });
        debug!("XHR request dispatched");
        Ok(())
    }

    async fn round_trip(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        self.fetch.fetch(request).await
    }
}
