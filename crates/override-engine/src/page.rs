//! The page context: replaceable transport entry points plus the
//! interception registry that owns them while installed.

use crate::config::EngineSettings;
use crate::error::TransportError;
use crate::registry::{InstallOutcome, InterceptRegistry};
use crate::reporter::{ActivityReporter, TracingReporter};
use crate::transport::{
    AjaxClient, Fetch, FetchRequest, FetchResponse, FluentClient, NetworkXhr, PromiseClient,
    ReqwestFetch, XhrBackend, XmlHttpRequest,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// A shared, reassignable reference, like a global binding.
pub struct Slot<T: ?Sized> {
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T: ?Sized> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> Slot<T> {
    pub fn new(value: Arc<T>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.inner.read())
    }

    /// Store `value`, returning the previous occupant.
    pub fn replace(&self, value: Arc<T>) -> Arc<T> {
        std::mem::replace(&mut *self.inner.write(), value)
    }

    /// Whether the slot currently holds exactly `value`.
    pub fn holds(&self, value: &Arc<T>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.inner.read()), Arc::as_ptr(value))
    }
}

/// A slot that may be empty, for libraries the page may never load.
pub struct OptionalSlot<T: ?Sized> {
    inner: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Default for OptionalSlot<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }
}

impl<T: ?Sized> OptionalSlot<T> {
    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.read().clone()
    }

    pub fn replace(&self, value: Arc<T>) -> Option<Arc<T>> {
        self.inner.write().replace(value)
    }

    pub fn holds(&self, value: &Arc<T>) -> bool {
        self.inner
            .read()
            .as_ref()
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(value)))
    }
}

/// One page's global scope.
pub struct PageContext {
    fetch: Slot<dyn Fetch>,
    xhr: Slot<dyn XhrBackend>,
    promise_client: OptionalSlot<dyn PromiseClient>,
    ajax_client: OptionalSlot<dyn AjaxClient>,
    fluent_client: OptionalSlot<dyn FluentClient>,
    registry: Arc<InterceptRegistry>,
}

impl PageContext {
    /// A page whose fetch and XHR reach the network through `fetch`.
    pub fn new(fetch: Arc<dyn Fetch>) -> Arc<Self> {
        Self::builder(fetch).build()
    }

    /// A page over the real network.
    pub fn network() -> Arc<Self> {
        Self::new(Arc::new(ReqwestFetch::new()))
    }

    pub fn builder(fetch: Arc<dyn Fetch>) -> PageContextBuilder {
        PageContextBuilder {
            xhr: None,
            reporter: None,
            settings: EngineSettings::default(),
            fetch,
        }
    }

    pub fn registry(&self) -> &Arc<InterceptRegistry> {
        &self.registry
    }

    /// Install the interception adapters into this page.
    pub fn install(self: &Arc<Self>) -> InstallOutcome {
        self.registry.install(self)
    }

    /// `fetch(request)` through whatever occupies the fetch slot.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let fetch = self.fetch.get();
        fetch.fetch(request).await
    }

    pub fn fetch_slot(&self) -> &Slot<dyn Fetch> {
        &self.fetch
    }

    /// Reassign the global fetch, as page code wrapping it would.
    pub fn set_fetch(&self, fetch: Arc<dyn Fetch>) -> Arc<dyn Fetch> {
        self.fetch.replace(fetch)
    }

    /// `new XMLHttpRequest()`.
    pub fn xhr(&self) -> XmlHttpRequest {
        XmlHttpRequest::with_prototype(self.xhr.clone())
    }

    pub fn xhr_slot(&self) -> &Slot<dyn XhrBackend> {
        &self.xhr
    }

    pub fn promise_client(&self) -> Option<Arc<dyn PromiseClient>> {
        self.promise_client.get()
    }

    pub fn set_promise_client(&self, client: Arc<dyn PromiseClient>) {
        self.promise_client.replace(client);
    }

    pub fn promise_client_slot(&self) -> &OptionalSlot<dyn PromiseClient> {
        &self.promise_client
    }

    pub fn ajax_client(&self) -> Option<Arc<dyn AjaxClient>> {
        self.ajax_client.get()
    }

    pub fn set_ajax_client(&self, client: Arc<dyn AjaxClient>) {
        self.ajax_client.replace(client);
    }

    pub fn ajax_client_slot(&self) -> &OptionalSlot<dyn AjaxClient> {
        &self.ajax_client
    }

    pub fn fluent_client(&self) -> Option<Arc<dyn FluentClient>> {
        self.fluent_client.get()
    }

    pub fn set_fluent_client(&self, client: Arc<dyn FluentClient>) {
        self.fluent_client.replace(client);
    }

    pub fn fluent_client_slot(&self) -> &OptionalSlot<dyn FluentClient> {
        &self.fluent_client
    }
}

pub struct PageContextBuilder {
    fetch: Arc<dyn Fetch>,
    xhr: Option<Arc<dyn XhrBackend>>,
    reporter: Option<Arc<dyn ActivityReporter>>,
    settings: EngineSettings,
}

impl PageContextBuilder {
    /// Native XHR backend; defaults to [`NetworkXhr`] over the page's fetch.
    pub fn xhr_backend(mut self, xhr: Arc<dyn XhrBackend>) -> Self {
        self.xhr = Some(xhr);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ActivityReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Arc<PageContext> {
        let xhr = self
            .xhr
            .unwrap_or_else(|| Arc::new(NetworkXhr::new(Arc::clone(&self.fetch))));
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(TracingReporter));

        Arc::new(PageContext {
            fetch: Slot::new(self.fetch),
            xhr: Slot::new(xhr),
            promise_client: OptionalSlot::default(),
            ajax_client: OptionalSlot::default(),
            fluent_client: OptionalSlot::default(),
            registry: Arc::new(InterceptRegistry::new(reporter, self.settings)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_replace_and_holds() {
        let a: Arc<str> = Arc::from("a");
        let b: Arc<str> = Arc::from("b");
        let slot = Slot::new(Arc::clone(&a));
        assert!(slot.holds(&a));

        let previous = slot.replace(Arc::clone(&b));
        assert!(Arc::ptr_eq(&previous, &a));
        assert!(slot.holds(&b));
        assert!(!slot.holds(&a));
    }

    #[test]
    fn test_slot_clones_share_binding() {
        let slot = Slot::new(Arc::new(1));
        let alias = slot.clone();
        slot.replace(Arc::new(2));
        assert_eq!(*alias.get(), 2);
    }

    #[test]
    fn test_optional_slot() {
        let slot: OptionalSlot<str> = OptionalSlot::default();
        assert!(slot.get().is_none());
        let value: Arc<str> = Arc::from("client");
        assert!(slot.replace(Arc::clone(&value)).is_none());
        assert!(slot.holds(&value));
    }
}
