//! Transport call conventions a page can use, with real network
//! implementations of each.

pub mod ajax;
pub mod fetch;
pub mod fluent;
pub mod promise;
pub mod xhr;

pub use ajax::{
    AjaxCallbacks, AjaxClient, AjaxFailure, AjaxResponse, AjaxResult, AjaxSettings,
    FetchAjaxClient, JqXhr,
};
pub use fetch::{Fetch, FetchRequest, FetchResponse, ReqwestFetch};
pub use fluent::{
    end_async, EndCallback, FetchFluentClient, FluentClient, FluentError, FluentRequest,
    FluentResponse,
};
pub use promise::{ClientError, ClientResponse, FetchPromiseClient, PromiseClient, RequestConfig};
pub use xhr::{
    NetworkXhr, ProgressEvent, ReadyState, ResponseOverride, XhrBackend, XmlHttpRequest,
};

use hyper::HeaderMap;
use serde_json::Value;
use std::collections::BTreeMap;

/// Client-library body decoding: JSON when it parses, otherwise the text.
pub(crate) fn body_to_data(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

pub(crate) fn headers_to_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}
