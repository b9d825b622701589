//! Session runtime: event bus, service container, lifecycle tracking
//!
//! This crate holds the machinery that decouples the pipeline stages:
//! - [`EventBus`] — typed in-process publish/subscribe
//! - [`DiContainer`] — service factories with singleton/session/transient
//!   scopes
//! - [`LifecycleManager`] — per-session task tracking and cancellation
//! - [`SessionContext`] — the authoritative per-session state

pub mod bus;
pub mod container;
pub mod context;
pub mod lifecycle;

pub use bus::{EventBus, SubscriptionId};
pub use container::DiContainer;
pub use context::{SessionContext, CONTEXT_SERVICE};
pub use lifecycle::LifecycleManager;

use thiserror::Error;

/// Runtime errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("no service registered under name '{0}'")]
    NotRegistered(String),

    #[error("service '{name}' has an unexpected type")]
    TypeMismatch { name: String },

    #[error("factory for '{name}' failed: {source}")]
    Factory {
        name: String,
        #[source]
        source: voice_fleet_core::Error,
    },

    #[error("lifecycle for session {0} is stopped")]
    Stopped(String),
}
