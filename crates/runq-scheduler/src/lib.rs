//! Runner to build matching for runq.
//!
//! Decides, for each polling runner, which single pending build it may run
//! next. Coordination between concurrent polls happens entirely in the store:
//! candidates are claimed with a conditional `pending -> running` transition
//! that skips rows another poll is already claiming.

pub mod claim;
pub mod engine;
pub mod filter;
pub mod metrics;
pub mod scope;
pub mod selector;

pub use claim::ClaimResult;
pub use engine::{EngineOptions, MatchingEngine, PollOptions, PollOutcome};
pub use filter::EligibilityFilter;
pub use metrics::{MetricsSnapshot, QueueMetrics};
pub use scope::ScopeResolver;
pub use selector::StrategySelector;
