use crate::error::TransportError;
use super::intercept;
use crate::executor::Outcome;
use crate::registry::InterceptRegistry;
use crate::reporter::Transport;
use crate::transport::{Fetch, FetchRequest, FetchResponse};
use async_trait::async_trait;
use std::sync::{Arc, Weak};

/// Wrapper installed in the page's fetch slot.
pub struct InterceptedFetch {
    registry: Weak<InterceptRegistry>,
    original: Arc<dyn Fetch>,
}

impl InterceptedFetch {
    pub fn new(registry: Weak<InterceptRegistry>, original: Arc<dyn Fetch>) -> Self {
        Self { registry, original }
    }
}

#[async_trait]
impl Fetch for InterceptedFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let method = request.effective_method();
        let Some((registry, rule)) =
            intercept(&self.registry, Transport::Fetch, &request.url, &method)
        else {
            return self.original.fetch(request).await;
        };

        let original = Arc::clone(&self.original);
        let upstream_request = request.clone();
        let outcome = registry
            .executor()
            .execute(&rule, move || async move { original.fetch(upstream_request).await })
            .await?;

        match outcome {
            Outcome::Respond(response) => Ok(response.into_fetch_response(request.url)),
            Outcome::PassThrough => self.original.fetch(request).await,
            Outcome::Unmodified { response, .. } => Ok(response),
        }
    }
}
