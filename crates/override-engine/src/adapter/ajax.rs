use super::{client_view_to_fetch, intercept};
use crate::error::TransportError;
use crate::executor::Outcome;
use crate::registry::InterceptRegistry;
use crate::reporter::Transport;
use crate::request::normalize_method;
use crate::transport::{
    headers_to_map, AjaxClient, AjaxFailure, AjaxResponse, AjaxSettings, FetchResponse, JqXhr,
};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::debug;

/// Shim over the page's `ajax` entry point.
pub struct InterceptedAjaxClient {
    registry: Weak<InterceptRegistry>,
    original: Arc<dyn AjaxClient>,
}

impl InterceptedAjaxClient {
    pub fn new(registry: Weak<InterceptRegistry>, original: Arc<dyn AjaxClient>) -> Self {
        Self { registry, original }
    }
}

/// Same request without callbacks, for calls the shim drives itself.
fn detached(settings: &AjaxSettings) -> AjaxSettings {
    AjaxSettings {
        url: settings.url.clone(),
        method: settings.method.clone(),
        headers: settings.headers.clone(),
        data: settings.data.clone(),
        data_type: settings.data_type.clone(),
        callbacks: Default::default(),
    }
}

async fn upstream(
    original: Arc<dyn AjaxClient>,
    settings: AjaxSettings,
) -> Result<FetchResponse, TransportError> {
    let url = settings.url.clone();
    let real = match original.ajax(settings).wait().await {
        Ok(response) => response,
        Err(AjaxFailure {
            response: Some(response),
            ..
        }) => response,
        Err(failure) => return Err(TransportError::Network(failure.error_thrown)),
    };
    Ok(client_view_to_fetch(
        &url,
        real.status,
        &headers_to_map(&real.headers),
        real.response_text,
    ))
}

impl AjaxClient for InterceptedAjaxClient {
    fn ajax(&self, mut settings: AjaxSettings) -> JqXhr {
        let method = normalize_method(settings.method.as_deref());
        let Some((registry, rule)) =
            intercept(&self.registry, Transport::Ajax, &settings.url, &method)
        else {
            return self.original.ajax(settings);
        };

        let jq_xhr = JqXhr::new();
        let callbacks = std::mem::take(&mut settings.callbacks);
        let original = Arc::clone(&self.original);
        let handle = jq_xhr.clone();
        // Dropped as ajax() returns; nothing settles before that
        let (_returning, returned) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let _ = returned.await;
            let upstream_original = Arc::clone(&original);
            let upstream_settings = detached(&settings);
            let outcome = registry
                .executor()
                .execute(&rule, move || upstream(upstream_original, upstream_settings))
                .await;

            let result = match outcome {
                Ok(Outcome::Respond(response)) => Ok(AjaxResponse::from_fetch(
                    &response.into_fetch_response(settings.url.clone()),
                )),
                Ok(Outcome::Unmodified { response, .. }) => Ok(AjaxResponse::from_fetch(&response)),
                Ok(Outcome::PassThrough) => original.ajax(settings).wait().await,
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

    fn get(&self, url: &str) -> JqXhr {
        debug!(url, "AJAX shortcut: get");
        self.ajax(AjaxSettings::new(url).method("GET"))
    }

    fn get_json(&self, url: &str) -> JqXhr {
        debug!(url, "AJAX shortcut: getJSON");
        self.ajax(AjaxSettings::new(url).method("GET").data_type("json"))
    }

    fn post(&self, url: &str, data: &str) -> JqXhr {
        debug!(url, "AJAX shortcut: post");
        self.ajax(AjaxSettings::new(url).method("POST").data(data))
    }
}
