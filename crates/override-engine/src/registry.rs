//! Per-page interception state.
//!
//! The registry is created with its page and lives as long as the page. It
//! owns the current rule snapshot, the originals captured from the page's
//! slots and the wrappers installed over them. Wrappers point back at it
//! weakly, so dropping the page frees all of it.

use crate::adapter::{
    InterceptedAjaxClient, InterceptedFetch, InterceptedFluentClient, InterceptedPromiseClient,
    InterceptedXhr,
};
use crate::config::{EngineSettings, RuleFile};
use crate::executor::ActionExecutor;
use crate::metrics;
use crate::page::{OptionalSlot, PageContext};
use crate::reporter::{deliver_diagnostic, deliver_match, ActivityReporter, MatchEvent, Transport};
use crate::request::InterceptedRequest;
use crate::resolver::RuleSet;
use crate::rule::Rule;
use crate::transport::{AjaxClient, Fetch, FluentClient, PromiseClient, XhrBackend};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

/// Pull boundary to the external rule store.
pub trait RuleSource: Send + Sync {
    fn rules(&self) -> Vec<Rule>;

    fn is_enabled(&self) -> bool;
}

/// Fixed rule list, e.g. loaded from a file.
#[derive(Debug, Clone, Default)]
pub struct StaticRuleSource {
    rules: Vec<Rule>,
    enabled: bool,
}

impl StaticRuleSource {
    pub fn new(rules: Vec<Rule>, enabled: bool) -> Self {
        Self { rules, enabled }
    }
}

impl From<RuleFile> for StaticRuleSource {
    fn from(file: RuleFile) -> Self {
        Self::new(file.rules, file.enabled)
    }
}

impl RuleSource for StaticRuleSource {
    fn rules(&self) -> Vec<Rule> {
        self.rules.clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Disabled or no rules; nothing installed
    Skipped,
    /// Adapters installed for the first time
    Installed,
    /// Already installed; wrappers re-asserted over the saved originals
    Updated,
}

#[derive(Default)]
struct Originals {
    fetch: OnceCell<Arc<dyn Fetch>>,
    xhr: OnceCell<Arc<dyn XhrBackend>>,
    promise: OnceCell<Arc<dyn PromiseClient>>,
    ajax: OnceCell<Arc<dyn AjaxClient>>,
    fluent: OnceCell<Arc<dyn FluentClient>>,
}

#[derive(Default)]
struct Installed {
    fetch: Option<Arc<dyn Fetch>>,
    xhr: Option<Arc<dyn XhrBackend>>,
    promise: Option<Arc<dyn PromiseClient>>,
    ajax: Option<Arc<dyn AjaxClient>>,
    fluent: Option<Arc<dyn FluentClient>>,
}

pub struct InterceptRegistry {
    snapshot: RwLock<Arc<RuleSet>>,
    reporter: Arc<dyn ActivityReporter>,
    settings: EngineSettings,
    executor: ActionExecutor,
    originals: Originals,
    installed: Mutex<Installed>,
}

impl InterceptRegistry {
    pub fn new(reporter: Arc<dyn ActivityReporter>, settings: EngineSettings) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(RuleSet::empty())),
            executor: ActionExecutor::new(settings.clone(), Arc::clone(&reporter)),
            reporter,
            settings,
            originals: Originals::default(),
            installed: Mutex::new(Installed::default()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Current rule snapshot; adapters read it on every call.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.snapshot.read())
    }

    /// Replace the rule snapshot. Calls already resolved keep the old one.
    pub fn refresh(&self, rules: Vec<Rule>, enabled: bool) {
        let enabled_count = rules.iter().filter(|r| r.enabled).count();
        let disabled_count = rules.len() - enabled_count;

        let (set, diagnostics) = RuleSet::compile(rules, enabled);
        for diagnostic in &diagnostics {
            deliver_diagnostic(self.reporter.as_ref(), diagnostic);
        }

        *self.snapshot.write() = Arc::new(set);
        metrics::set_rules_loaded(enabled_count, disabled_count);
        info!(
            rules = enabled_count + disabled_count,
            enabled,
            invalid = diagnostics.len(),
            "Rule snapshot refreshed"
        );
    }

    pub fn refresh_from(&self, source: &dyn RuleSource) {
        self.refresh(source.rules(), source.is_enabled());
    }

    pub(crate) fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    /// Resolve a call against the current snapshot and report a match.
    pub(crate) fn intercept(
        &self,
        transport: Transport,
        url: &str,
        method: &str,
    ) -> Option<Arc<Rule>> {
        let request = InterceptedRequest::new(url, Some(method));
        debug!(url = %request.url, method = %request.method, %transport, "Intercepted call");

        let snapshot = self.snapshot();
        let Some(matched) = snapshot.resolve(&request) else {
            metrics::record_call(transport.as_str(), "passthrough");
            return None;
        };
        let rule = Arc::clone(&matched.rule);

        metrics::record_rule_match(&rule.id, rule.action.kind());
        metrics::record_call(transport.as_str(), rule.action.kind());
        deliver_match(
            self.reporter.as_ref(),
            &MatchEvent {
                url: request.url,
                method: request.method,
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
                timestamp: request.timestamp,
                transport,
            },
        );
        Some(rule)
    }

    /// Install the fetch and XHR adapters and schedule the deferred check.
    ///
    /// Does nothing while interception is disabled or the snapshot is empty.
    /// Originals are captured on the first install only.
    pub fn install(self: &Arc<Self>, page: &Arc<PageContext>) -> InstallOutcome {
        if !self.snapshot().is_active() {
            debug!("Interception disabled or no rules, skipping install");
            return InstallOutcome::Skipped;
        }

        let mut installed = self.installed.lock();
        let first = installed.fetch.is_none();

        let original_fetch = self
            .originals
            .fetch
            .get_or_init(|| page.fetch_slot().get());
        let fetch_wrapper = installed
            .fetch
            .get_or_insert_with(|| {
                Arc::new(InterceptedFetch::new(Arc::downgrade(self), Arc::clone(original_fetch)))
                    as Arc<dyn Fetch>
            })
            .clone();
        if !page.fetch_slot().holds(&fetch_wrapper) {
            page.fetch_slot().replace(fetch_wrapper);
        }

        let original_xhr = self.originals.xhr.get_or_init(|| page.xhr_slot().get());
        let xhr_wrapper = installed
            .xhr
            .get_or_insert_with(|| {
                Arc::new(InterceptedXhr::new(Arc::downgrade(self), Arc::clone(original_xhr)))
                    as Arc<dyn XhrBackend>
            })
            .clone();
        if !page.xhr_slot().holds(&xhr_wrapper) {
            page.xhr_slot().replace(xhr_wrapper);
        }
        drop(installed);

        self.schedule_deferred_check(page);

        if first {
            info!("Interception adapters installed");
            InstallOutcome::Installed
        } else {
            debug!("Interception adapters re-installed");
            InstallOutcome::Updated
        }
    }

    fn schedule_deferred_check(self: &Arc<Self>, page: &Arc<PageContext>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime, running deferred check immediately");
            self.deferred_check(page);
            return;
        };

        let registry = Arc::downgrade(self);
        let page: Weak<PageContext> = Arc::downgrade(page);
        let delay = Duration::from_millis(self.settings.deferred_check_ms);
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let (Some(registry), Some(page)) = (registry.upgrade(), page.upgrade()) {
                registry.deferred_check(&page);
            }
        });
    }

    /// Re-assert the fetch wrapper and install shims for any client library
    /// the page has loaded since.
    pub fn deferred_check(self: &Arc<Self>, page: &PageContext) {
        let mut installed = self.installed.lock();

        if let Some(wrapper) = &installed.fetch {
            if !page.fetch_slot().holds(wrapper) {
                info!("fetch was reassigned after install, re-asserting interceptor");
                page.fetch_slot().replace(Arc::clone(wrapper));
            }
        }

        install_shim(
            page.promise_client_slot(),
            &self.originals.promise,
            &mut installed.promise,
            |original| {
                Arc::new(InterceptedPromiseClient::new(Arc::downgrade(self), original))
                    as Arc<dyn PromiseClient>
            },
            "promise",
        );
        install_shim(
            page.ajax_client_slot(),
            &self.originals.ajax,
            &mut installed.ajax,
            |original| {
                Arc::new(InterceptedAjaxClient::new(Arc::downgrade(self), original))
                    as Arc<dyn AjaxClient>
            },
            "ajax",
        );
        install_shim(
            page.fluent_client_slot(),
            &self.originals.fluent,
            &mut installed.fluent,
            |original| {
                Arc::new(InterceptedFluentClient::new(Arc::downgrade(self), original))
                    as Arc<dyn FluentClient>
            },
            "fluent",
        );
    }
}

fn install_shim<T: ?Sized>(
    slot: &OptionalSlot<T>,
    original: &OnceCell<Arc<T>>,
    installed: &mut Option<Arc<T>>,
    wrap: impl FnOnce(Arc<T>) -> Arc<T>,
    name: &str,
) {
    let Some(current) = slot.get() else {
        debug!(client = name, "Client library not present, shim skipped");
        return;
    };
    if installed.as_ref().is_some_and(|w| slot.holds(w)) {
        return;
    }

    let original = Arc::clone(original.get_or_init(|| current));
    let wrapper = installed.get_or_insert_with(|| wrap(original));
    slot.replace(Arc::clone(wrapper));
    info!(client = name, "Client library shim installed");
}
