//! Rule-driven request interception.
//!
//! A page's transports (`fetch`, XHR and the promise, AJAX and fluent client
//! libraries) are held in replaceable slots on a [`PageContext`]. Installing an
//! [`InterceptRegistry`] wraps each slot; matched calls get a synthesized,
//! delayed or patched response while unmatched calls reach the original
//! transport untouched.

pub mod adapter;
pub mod config;
pub mod error;
pub mod executor;
pub mod matcher;
pub mod metrics;
pub mod page;
pub mod registry;
pub mod reporter;
pub mod request;
pub mod resolver;
pub mod response;
pub mod rule;
pub mod transport;

pub use config::{ConfigError, EngineSettings, RuleFile, RuleFileFormat};
pub use error::TransportError;
pub use executor::{ActionExecutor, Outcome};
pub use page::{PageContext, PageContextBuilder};
pub use registry::{InstallOutcome, InterceptRegistry, RuleSource, StaticRuleSource};
pub use reporter::{
    ActivityReporter, ChannelReporter, MatchEvent, NoopReporter, RuleDiagnostic, TracingReporter,
    Transport,
};
pub use request::InterceptedRequest;
pub use resolver::{resolve, RuleSet};
pub use response::SyntheticResponse;
pub use rule::{Action, Rule, RuleMatcher, UrlPattern};
