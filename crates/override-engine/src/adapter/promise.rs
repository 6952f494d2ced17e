use super::{client_view_to_fetch, intercept};
use crate::error::TransportError;
use crate::executor::Outcome;
use crate::registry::InterceptRegistry;
use crate::reporter::Transport;
use crate::request::normalize_method;
use crate::transport::{
    body_to_data, headers_to_map, ClientError, ClientResponse, FetchResponse, PromiseClient,
    RequestConfig,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Shim over the page's promise client `request` entry point.
pub struct InterceptedPromiseClient {
    registry: Weak<InterceptRegistry>,
    original: Arc<dyn PromiseClient>,
}

impl InterceptedPromiseClient {
    pub fn new(registry: Weak<InterceptRegistry>, original: Arc<dyn PromiseClient>) -> Self {
        Self { registry, original }
    }
}

fn to_client_response(response: FetchResponse, config: RequestConfig) -> ClientResponse {
    ClientResponse {
        data: body_to_data(&response.text()),
        status: response.status,
        status_text: response.status_text,
        headers: headers_to_map(&response.headers),
        config,
    }
}

fn data_to_body(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn upstream(
    original: Arc<dyn PromiseClient>,
    config: RequestConfig,
) -> Result<FetchResponse, TransportError> {
    let url = config.full_url();
    match original.request(config).await {
        Ok(r) => Ok(client_view_to_fetch(&url, r.status, &r.headers, data_to_body(&r.data))),
        // A rejected status still carries the real response
        Err(ClientError::Status(r)) => Ok(client_view_to_fetch(
            &url,
            r.status,
            &r.headers,
            data_to_body(&r.data),
        )),
        Err(ClientError::Transport(e)) => Err(e),
    }
}

#[async_trait]
impl PromiseClient for InterceptedPromiseClient {
    async fn request(&self, config: RequestConfig) -> Result<ClientResponse, ClientError> {
        let url = config.full_url();
        let method = normalize_method(config.method.as_deref());
        let Some((registry, rule)) = intercept(&self.registry, Transport::Promise, &url, &method)
        else {
            return self.original.request(config).await;
        };

        let original = Arc::clone(&self.original);
        let upstream_config = config.clone();
        let outcome = registry
            .executor()
            .execute(&rule, move || upstream(original, upstream_config))
            .await?;

        match outcome {
            Outcome::Respond(response) => {
                Ok(to_client_response(response.into_fetch_response(url), config))
            }
            Outcome::Unmodified { response, .. } => Ok(to_client_response(response, config)),
            Outcome::PassThrough => self.original.request(config).await,
        }
    }

    async fn get(&self, url: &str) -> Result<ClientResponse, ClientError> {
        debug!(url, "Promise client shortcut: get");
        self.request(RequestConfig::new(url).method("GET")).await
    }

    async fn delete(&self, url: &str) -> Result<ClientResponse, ClientError> {
        debug!(url, "Promise client shortcut: delete");
        self.request(RequestConfig::new(url).method("DELETE")).await
    }

    async fn post(&self, url: &str, data: Value) -> Result<ClientResponse, ClientError> {
        debug!(url, "Promise client shortcut: post");
        self.request(RequestConfig::new(url).method("POST").data(data))
            .await
    }

    async fn put(&self, url: &str, data: Value) -> Result<ClientResponse, ClientError> {
        debug!(url, "Promise client shortcut: put");
        self.request(RequestConfig::new(url).method("PUT").data(data))
            .await
    }

    async fn patch(&self, url: &str, data: Value) -> Result<ClientResponse, ClientError> {
        debug!(url, "Promise client shortcut: patch");
        self.request(RequestConfig::new(url).method("PATCH").data(data))
            .await
    }
}
