//! Remote actions
//!
//! A request published under `action/` names its action by the last segment
//! of its target topic. The [`ActionRegistry`] maps names to handlers and the
//! [`ActionDispatcher`] runs the decode, dispatch and acknowledge cycle.

pub mod builtin;
pub mod dispatcher;
pub mod registry;

pub use builtin::register_builtin_actions;
pub use dispatcher::{AckDelivery, ActionDispatcher, InboundDisposition};
pub use registry::{ActionHandler, ActionRegistry};
