pub mod compiler;
pub mod errors;
pub mod evaluator;
pub mod networks;
pub mod types;
pub mod validator;
pub mod web;

use std::sync::Arc;

use parking_lot::RwLock;

use types::{CompiledRule, Policy, RequestDescriptor};

/// Fully compiled access-control state.
/// Immutable after construction — reconfiguration builds a new value and
/// swaps it in through [`AccessControlHandle`].
#[derive(Debug)]
pub struct AccessControl {
    pub default_policy: Policy,
    /// Authored order; the evaluator never reorders.
    pub rules: Vec<CompiledRule>,
}

impl AccessControl {
    pub fn evaluate(&self, req: &RequestDescriptor) -> Policy {
        evaluator::evaluate(self, req)
    }
}

/// Shared handle to the current compiled rule set.
///
/// Readers clone the inner `Arc` under a short read lock; a reload replaces
/// the whole `Arc` at once, so concurrent evaluations always see either the
/// old set or the new one, never a partially updated list.
#[derive(Debug, Clone)]
pub struct AccessControlHandle {
    inner: Arc<RwLock<Arc<AccessControl>>>,
}

impl AccessControlHandle {
    pub fn new(acl: AccessControl) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(acl))),
        }
    }

    /// Snapshot of the current compiled set, valid for the caller's lifetime
    /// regardless of later reloads.
    pub fn current(&self) -> Arc<AccessControl> {
        self.inner.read().clone()
    }

    /// Publish a new compiled set. Callers must only pass fully validated
    /// state (see [`validator::validate`]).
    pub fn replace(&self, acl: AccessControl) {
        *self.inner.write() = Arc::new(acl);
    }
}
