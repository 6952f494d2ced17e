//! Interception wrappers, one per call convention.
//!
//! Each wrapper resolves the call against the registry's current snapshot,
//! forwards unmatched calls to the captured original unchanged, and shapes
//! the executor's outcome into the convention's own return type.
//!
//! Wrappers hold the registry weakly: the registry keeps the installed
//! wrappers alive, and a wrapper still reachable after its page is gone
//! forwards every call.

mod ajax;
mod fetch;
mod fluent;
mod promise;
mod xhr;

pub use ajax::InterceptedAjaxClient;
pub use fetch::InterceptedFetch;
pub use fluent::InterceptedFluentClient;
pub use promise::InterceptedPromiseClient;
pub use xhr::InterceptedXhr;

use crate::registry::InterceptRegistry;
use crate::reporter::Transport;
use crate::response::status_text;
use crate::rule::Rule;
use crate::transport::FetchResponse;
use bytes::Bytes;
use hyper::http::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Weak};

/// Resolve a call while the owning registry is alive.
pub(crate) fn intercept(
    registry: &Weak<InterceptRegistry>,
    transport: Transport,
    url: &str,
    method: &str,
) -> Option<(Arc<InterceptRegistry>, Arc<Rule>)> {
    let registry = registry.upgrade()?;
    let rule = registry.intercept(transport, url, method)?;
    Some((registry, rule))
}

/// Rebuild a fetch-shaped response from a client library's view of one.
pub(crate) fn client_view_to_fetch(
    url: &str,
    status: u16,
    headers: &BTreeMap<String, String>,
    body: String,
) -> FetchResponse {
    let mut header_map = HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            header_map.insert(name, value);
        }
    }
    FetchResponse {
        status,
        status_text: status_text(status).to_string(),
        headers: header_map,
        body: Bytes::from(body),
        url: url.to_string(),
    }
}
