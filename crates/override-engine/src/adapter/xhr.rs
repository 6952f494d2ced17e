use crate::error::TransportError;
use super::intercept;
use crate::executor::Outcome;
use crate::registry::InterceptRegistry;
use crate::reporter::Transport;
use crate::request::normalize_method;
use crate::rule::Rule;
use crate::transport::{
    FetchRequest, FetchResponse, ProgressEvent, ReadyState, ResponseOverride, XhrBackend,
    XmlHttpRequest,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Weak};
use tracing::warn;

/// Wrapper installed in the page's XHR prototype slot.
pub struct InterceptedXhr {
    registry: Weak<InterceptRegistry>,
    original: Arc<dyn XhrBackend>,
}

impl InterceptedXhr {
    pub fn new(registry: Weak<InterceptRegistry>, original: Arc<dyn XhrBackend>) -> Self {
        Self { registry, original }
    }
}

#[async_trait]
impl XhrBackend for InterceptedXhr {
    fn open(&self, xhr: &XmlHttpRequest, method: &str, url: &str) -> Result<(), TransportError> {
        xhr.record_intercept_target(&normalize_method(Some(method)), url);
        self.original.open(xhr, method, url)
    }

    fn send(&self, xhr: &XmlHttpRequest, body: Option<Bytes>) -> Result<(), TransportError> {
        let Some((method, url)) = xhr.intercept_target() else {
            return self.original.send(xhr, body);
        };
        xhr.begin_send()?;
        let Some((registry, rule)) = intercept(&self.registry, Transport::Xhr, &url, &method)
        else {
            xhr.reset_send_flag();
            return self.original.send(xhr, body);
        };

        tokio::spawn(run_override(
            registry,
            Arc::clone(&self.original),
            xhr.clone(),
            rule,
            FetchRequest {
                url,
                method: Some(method),
                headers: xhr.request_headers(),
                body,
            },
        ));
        Ok(())
    }

    async fn round_trip(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        self.original.round_trip(request).await
    }
}

async fn run_override(
    registry: Arc<InterceptRegistry>,
    original: Arc<dyn XhrBackend>,
    xhr: XmlHttpRequest,
    rule: Arc<Rule>,
    request: FetchRequest,
) {
    // Nothing is observable until the caller's send() has returned
    xhr.send_returned().await;

    let body = request.body.clone();
    let upstream = Arc::clone(&original);
    let outcome = registry
        .executor()
        .execute(&rule, move || async move { upstream.round_trip(request).await })
        .await;

    match outcome {
        Ok(Outcome::Respond(response)) => deliver(
            &xhr,
            ResponseOverride {
                status: response.status_code,
                status_text: response.status_text().to_string(),
                response_text: response.body,
                headers: response.headers,
            },
        ),
        Ok(Outcome::Unmodified { response, .. }) => deliver(
            &xhr,
            ResponseOverride {
                status: response.status,
                status_text: response.status_text.clone(),
                response_text: response.text(),
                headers: response.headers,
            },
        ),
        Ok(Outcome::PassThrough) => {
            xhr.reset_send_flag();
            if let Err(e) = original.send(&xhr, body) {
                warn!(rule_id = %rule.id, error = %e, "Delayed XHR send failed");
                xhr.fail();
            }
        }
        Err(_) => xhr.fail(),
    }
}

/// LOADING notify, final values, DONE notify, then `load` and `loadend`.
fn deliver(xhr: &XmlHttpRequest, response: ResponseOverride) {
    let event = ProgressEvent::for_body(&response.response_text);

    xhr.override_ready_state(ReadyState::Loading);
    xhr.dispatch_ready_state_change();

    xhr.override_response(response);
    xhr.reset_send_flag();
    xhr.override_ready_state(ReadyState::Done);
    xhr.dispatch_ready_state_change();

    xhr.dispatch_load(&event);
    xhr.dispatch_loadend(&event);
}
