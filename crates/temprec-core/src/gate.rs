//! Capability gate for privileged radio operations.
//!
//! Every scan, connect and subscribe request asks the gate first. The gate
//! is queried at each call, never cached, so a capability revoked between
//! two steps is honored at the next privileged call.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A privileged radio operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Start a scan window.
    Scan,
    /// Open a link to a peripheral.
    Connect,
    /// Enable notifications or write a descriptor.
    Subscribe,
}

impl Operation {
    /// All operations, in pipeline order.
    pub const ALL: [Operation; 3] = [Operation::Scan, Operation::Connect, Operation::Subscribe];

    fn index(self) -> usize {
        match self {
            Operation::Scan => 0,
            Operation::Connect => 1,
            Operation::Subscribe => 2,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Scan => write!(f, "scan"),
            Operation::Connect => write!(f, "connect"),
            Operation::Subscribe => write!(f, "subscribe"),
        }
    }
}

/// Answers whether a privileged operation is currently permitted.
pub trait CapabilityGate: Send + Sync {
    /// Returns `true` if `operation` may proceed right now.
    fn authorized(&self, operation: Operation) -> bool;
}

impl<F> CapabilityGate for F
where
    F: Fn(Operation) -> bool + Send + Sync,
{
    fn authorized(&self, operation: Operation) -> bool {
        self(operation)
    }
}

/// A gate that permits everything.
///
/// Desktop stacks have no runtime Bluetooth permission, so this is the
/// default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl CapabilityGate for AllowAll {
    fn authorized(&self, _operation: Operation) -> bool {
        true
    }
}

/// A gate with per-operation switches that can be flipped at runtime.
///
/// Also counts how often each operation was queried.
///
/// # Example
///
/// ```
/// use temprec_core::{CapabilityGate, Operation, PolicyGate};
///
/// let gate = PolicyGate::allow_all().deny(Operation::Connect);
/// assert!(gate.authorized(Operation::Scan));
/// assert!(!gate.authorized(Operation::Connect));
///
/// gate.grant(Operation::Connect);
/// assert!(gate.authorized(Operation::Connect));
/// assert_eq!(gate.queries(Operation::Connect), 2);
/// ```
#[derive(Debug)]
pub struct PolicyGate {
    allowed: [AtomicBool; 3],
    queries: [AtomicU64; 3],
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl PolicyGate {
    /// A gate that starts with every operation granted.
    pub fn allow_all() -> Self {
        Self {
            allowed: [
                AtomicBool::new(true),
                AtomicBool::new(true),
                AtomicBool::new(true),
            ],
            queries: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    /// A gate that starts with every operation denied.
    pub fn deny_all() -> Self {
        let gate = Self::allow_all();
        for op in Operation::ALL {
            gate.revoke(op);
        }
        gate
    }

    /// Builder-style denial.
    #[must_use]
    pub fn deny(self, operation: Operation) -> Self {
        self.revoke(operation);
        self
    }

    /// Revoke an operation.
    pub fn revoke(&self, operation: Operation) {
        self.allowed[operation.index()].store(false, Ordering::SeqCst);
    }

    /// Grant an operation.
    pub fn grant(&self, operation: Operation) {
        self.allowed[operation.index()].store(true, Ordering::SeqCst);
    }

    /// How many times `operation` was queried.
    pub fn queries(&self, operation: Operation) -> u64 {
        self.queries[operation.index()].load(Ordering::SeqCst)
    }
}

impl CapabilityGate for PolicyGate {
    fn authorized(&self, operation: Operation) -> bool {
        self.queries[operation.index()].fetch_add(1, Ordering::SeqCst);
        self.allowed[operation.index()].load(Ordering::SeqCst)
    }
}
