//! Callback/deferred client convention (jQuery-AJAX-like).

use crate::transport::fetch::{Fetch, FetchRequest, FetchResponse};
use hyper::HeaderMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

pub type SuccessCallback = Box<dyn FnOnce(&Value, &str, &JqXhr) + Send>;
pub type ErrorCallback = Box<dyn FnOnce(&JqXhr, &str, &str) + Send>;
pub type CompleteCallback = Box<dyn FnOnce(&JqXhr, &str) + Send>;

/// Settings object of an `ajax(settings)` call.
#[derive(Default)]
pub struct AjaxSettings {
    pub url: String,
    /// `type`/`method`; defaults to GET
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub data: Option<String>,
    /// Expected response format (`json`, `text`, ...)
    pub data_type: Option<String>,
    pub callbacks: AjaxCallbacks,
}

#[derive(Default)]
pub struct AjaxCallbacks {
    pub success: Option<SuccessCallback>,
    pub error: Option<ErrorCallback>,
    pub complete: Option<CompleteCallback>,
}

impl std::fmt::Debug for AjaxSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AjaxSettings")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("data_type", &self.data_type)
            .finish_non_exhaustive()
    }
}

impl AjaxSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn success(mut self, f: impl FnOnce(&Value, &str, &JqXhr) + Send + 'static) -> Self {
        self.callbacks.success = Some(Box::new(f));
        self
    }

    pub fn error(mut self, f: impl FnOnce(&JqXhr, &str, &str) + Send + 'static) -> Self {
        self.callbacks.error = Some(Box::new(f));
        self
    }

    pub fn complete(mut self, f: impl FnOnce(&JqXhr, &str) + Send + 'static) -> Self {
        self.callbacks.complete = Some(Box::new(f));
        self
    }

    pub(crate) fn to_fetch_request(&self) -> FetchRequest {
        let mut request = FetchRequest::new(&self.url)
            .method(self.method.clone().unwrap_or_else(|| "GET".to_string()));
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(data) = &self.data {
            request = request.body(data.clone());
        }
        request
    }
}

/// Completed exchange as seen through the jqXHR.
#[derive(Debug, Clone, PartialEq)]
pub struct AjaxResponse {
    pub status: u16,
    pub status_text: String,
    pub response_text: String,
    /// Set when the body parsed as JSON
    pub response_json: Option<Value>,
    pub headers: HeaderMap,
}

impl AjaxResponse {
    pub fn from_fetch(response: &FetchResponse) -> Self {
        let response_text = response.text();
        Self {
            status: response.status,
            status_text: response.status_text.clone(),
            response_json: serde_json::from_str(&response_text).ok(),
            response_text,
            headers: response.headers.clone(),
        }
    }

    /// Value handed to `success`/`done`: parsed JSON when available.
    pub fn data(&self) -> Value {
        self.response_json
            .clone()
            .unwrap_or_else(|| Value::String(self.response_text.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AjaxFailure {
    pub response: Option<AjaxResponse>,
    /// `error`, `parsererror`, ...
    pub text_status: String,
    pub error_thrown: String,
}

pub type AjaxResult = Result<AjaxResponse, AjaxFailure>;

type DoneCallback = Box<dyn FnOnce(&Value, &JqXhr) + Send>;
type FailCallback = Box<dyn FnOnce(&AjaxFailure, &JqXhr) + Send>;
type AlwaysCallback = Box<dyn FnOnce(&JqXhr) + Send>;

#[derive(Default)]
struct Deferred {
    result: Option<AjaxResult>,
    done: Vec<DoneCallback>,
    fail: Vec<FailCallback>,
    always: Vec<AlwaysCallback>,
}

struct JqXhrInner {
    deferred: Mutex<Deferred>,
    settled: Notify,
}

/// Deferred handle returned by `ajax`.
///
/// Callbacks registered after settlement run immediately.
#[derive(Clone)]
pub struct JqXhr {
    inner: Arc<JqXhrInner>,
}

impl std::fmt::Debug for JqXhr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JqXhr")
            .field("result", &self.inner.deferred.lock().result)
            .finish()
    }
}

impl Default for JqXhr {
    fn default() -> Self {
        Self::new()
    }
}

impl JqXhr {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(JqXhrInner {
                deferred: Mutex::new(Deferred::default()),
                settled: Notify::new(),
            }),
        }
    }

    /// 0 until settled, then 4.
    pub fn ready_state(&self) -> u8 {
        if self.result().is_some() {
            4
        } else {
            0
        }
    }

    pub fn status(&self) -> u16 {
        match self.result() {
            Some(Ok(r)) => r.status,
            Some(Err(f)) => f.response.map(|r| r.status).unwrap_or(0),
            None => 0,
        }
    }

    pub fn response_text(&self) -> Option<String> {
        self.response().map(|r| r.response_text)
    }

    pub fn response_json(&self) -> Option<Value> {
        self.response().and_then(|r| r.response_json)
    }

    pub fn result(&self) -> Option<AjaxResult> {
        self.inner.deferred.lock().result.clone()
    }

    fn response(&self) -> Option<AjaxResponse> {
        match self.result()? {
            Ok(r) => Some(r),
            Err(f) => f.response,
        }
    }

    pub fn done(&self, f: impl FnOnce(&Value, &JqXhr) + Send + 'static) -> &Self {
        let mut deferred = self.inner.deferred.lock();
        match &deferred.result {
            Some(Ok(response)) => {
                let data = response.data();
                drop(deferred);
                f(&data, self);
            }
            Some(Err(_)) => {}
            None => deferred.done.push(Box::new(f)),
        }
        self
    }

    pub fn fail(&self, f: impl FnOnce(&AjaxFailure, &JqXhr) + Send + 'static) -> &Self {
        let mut deferred = self.inner.deferred.lock();
        match &deferred.result {
            Some(Err(failure)) => {
                let failure = failure.clone();
                drop(deferred);
                f(&failure, self);
            }
            Some(Ok(_)) => {}
            None => deferred.fail.push(Box::new(f)),
        }
        self
    }

    pub fn always(&self, f: impl FnOnce(&JqXhr) + Send + 'static) -> &Self {
        let mut deferred = self.inner.deferred.lock();
        if deferred.result.is_some() {
            drop(deferred);
            f(self);
        } else {
            deferred.always.push(Box::new(f));
        }
        self
    }

    /// Wait for settlement.
    pub async fn wait(&self) -> AjaxResult {
        loop {
            let notified = self.inner.settled.notified();
            if let Some(result) = self.result() {
                return result;
            }
            notified.await;
        }
    }

    /// Settle once: `success`/`error` setting, then `done`/`fail`
    /// handlers, then `always` handlers, then `complete`.
    pub fn settle(&self, result: AjaxResult, callbacks: AjaxCallbacks) {
        let (done, fail, always) = {
            let mut deferred = self.inner.deferred.lock();
            if deferred.result.is_some() {
                return;
            }
            deferred.result = Some(result.clone());
            (
                std::mem::take(&mut deferred.done),
                std::mem::take(&mut deferred.fail),
                std::mem::take(&mut deferred.always),
            )
        };

        let text_status = match &result {
            Ok(_) => "success".to_string(),
            Err(failure) => failure.text_status.clone(),
        };

        match &result {
            Ok(response) => {
                let data = response.data();
                if let Some(success) = callbacks.success {
                    success(&data, &text_status, self);
                }
                for f in done {
                    f(&data, self);
                }
            }
            Err(failure) => {
                if let Some(error) = callbacks.error {
                    error(self, &failure.text_status, &failure.error_thrown);
                }
                for f in fail {
                    f(failure, self);
                }
            }
        }
        for f in always {
            f(self);
        }
        if let Some(complete) = callbacks.complete {
            complete(self, &text_status);
        }

        self.inner.settled.notify_waiters();
    }
}

/// The page's `$` object: an `ajax` entry point plus shortcuts.
pub trait AjaxClient: Send + Sync {
    fn ajax(&self, settings: AjaxSettings) -> JqXhr;

    fn get(&self, url: &str) -> JqXhr {
        self.ajax(AjaxSettings::new(url).method("GET"))
    }

    fn get_json(&self, url: &str) -> JqXhr {
        self.ajax(AjaxSettings::new(url).method("GET").data_type("json"))
    }

    fn post(&self, url: &str, data: &str) -> JqXhr {
        self.ajax(AjaxSettings::new(url).method("POST").data(data))
    }
}

/// AJAX client over a [`Fetch`]; 2xx and 304 succeed.
pub struct FetchAjaxClient {
    fetch: Arc<dyn Fetch>,
}

impl FetchAjaxClient {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self { fetch }
    }
}

impl AjaxClient for FetchAjaxClient {
    fn ajax(&self, mut settings: AjaxSettings) -> JqXhr {
        let jq_xhr = JqXhr::new();
        let request = settings.to_fetch_request();
        let expects_json = settings.data_type.as_deref() == Some("json");
        let callbacks = std::mem::take(&mut settings.callbacks);
        let fetch = Arc::clone(&self.fetch);
        let handle = jq_xhr.clone();

        debug!(url = %settings.url, "AJAX request");
        tokio::spawn(async move {
            let result = match fetch.fetch(request).await {
                Ok(response) => {
                    let ajax_response = AjaxResponse::from_fetch(&response);
                    let status_ok = response.ok() || response.status == 304;
                    if !status_ok {
                        Err(AjaxFailure {
                            error_thrown: ajax_response.status_text.clone(),
                            response: Some(ajax_response),
                            text_status: "error".to_string(),
                        })
                    } else if expects_json && ajax_response.response_json.is_none() {
                        Err(AjaxFailure {
                            response: Some(ajax_response),
                            text_status: "parsererror".to_string(),
                            error_thrown: "invalid JSON".to_string(),
                        })
                    } else {
                        Ok(ajax_response)
                    }
                }
                Err(e) => Err(AjaxFailure {
                    response: None,
                    text_status: "error".to_string(),
                    error_thrown: e.to_string(),
                }),
            };
            handle.settle(result, callbacks);
        });

        jq_xhr
    }
}
