use super::{client_view_to_fetch, intercept};
use crate::error::TransportError;
use crate::executor::Outcome;
use crate::registry::InterceptRegistry;
use crate::reporter::Transport;
use crate::request::normalize_method;
use crate::transport::{
    end_async, EndCallback, FetchResponse, FluentClient, FluentError, FluentRequest,
    FluentResponse,
};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;

/// Shim over the fluent agent's terminal `end` step.
pub struct InterceptedFluentClient {
    registry: Weak<InterceptRegistry>,
    original: Arc<dyn FluentClient>,
}

impl InterceptedFluentClient {
    pub fn new(registry: Weak<InterceptRegistry>, original: Arc<dyn FluentClient>) -> Self {
        Self { registry, original }
    }
}

async fn upstream(
    original: Arc<dyn FluentClient>,
    request: FluentRequest,
) -> Result<FetchResponse, TransportError> {
    let url = request.full_url();
    let real = match end_async(original.as_ref(), request).await {
        Ok(response) => response,
        Err(FluentError {
            response: Some(response),
            ..
        }) => response,
        Err(e) => return Err(TransportError::Network(e.message)),
    };
    Ok(client_view_to_fetch(&url, real.status, &real.headers, real.text))
}

impl FluentClient for InterceptedFluentClient {
    fn end(&self, request: FluentRequest, callback: EndCallback) {
        let url = request.full_url();
        let method = normalize_method(Some(&request.method));
        let Some((registry, rule)) = intercept(&self.registry, Transport::Fluent, &url, &method)
        else {
            return self.original.end(request, callback);
        };

        let original = Arc::clone(&self.original);
        // Dropped as end() returns; the callback never runs before that
        let (_returning, returned) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = returned.await;
            let upstream_original = Arc::clone(&original);
            let upstream_request = request.clone();
            let outcome = registry
                .executor()
                .execute(&rule, move || upstream(upstream_original, upstream_request))
                .await;

            match outcome {
                Ok(Outcome::Respond(response)) => callback(Ok(FluentResponse::from_fetch(
                    &response.into_fetch_response(url),
                ))),
                Ok(Outcome::Unmodified { response, .. }) => {
                    callback(Ok(FluentResponse::from_fetch(&response)))
                }
                Ok(Outcome::PassThrough) => original.end(request, callback),
                Err(e) => callback(Err(FluentError {
                    status: None,
                    message: e.to_string(),
                    response: None,
                })),
            }
        });
    }
}
