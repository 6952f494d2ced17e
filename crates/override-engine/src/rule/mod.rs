//! Rule records supplied by the external rule store.
//!
//! - `types`: serde model of rules, matchers and actions
//! - `validate`: boundary checks run before rules reach the engine

mod types;
mod validate;

pub use types::{
    Action, DelayAction, Patch, PatchAction, ResponseContent, ResponseType, Rule, RuleMatcher,
    SyntheticAction, UrlMatchType, UrlPattern,
};
pub use validate::{validate_rules, RuleError};
