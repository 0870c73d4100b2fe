//! Privileged execution context
//!
//! Engine calls run with elevated privileges. Elevation is acquired right
//! before a call and restored by a guard when the call's future completes,
//! including on error.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Enters and leaves the privileged context of the engine
pub trait PrivilegeProvider: Send + Sync {
    fn enter(&self);

    fn restore(&self);
}

/// Restores the previous context when dropped
pub struct PrivilegeGuard<'a> {
    provider: &'a dyn PrivilegeProvider,
}

impl<'a> PrivilegeGuard<'a> {
    pub fn acquire(provider: &'a dyn PrivilegeProvider) -> Self {
        provider.enter();
        Self { provider }
    }
}

impl Drop for PrivilegeGuard<'_> {
    fn drop(&mut self) {
        self.provider.restore();
    }
}

/// Runs `operation` inside the privileged context
pub async fn with_privilege<F, T>(provider: &dyn PrivilegeProvider, operation: F) -> T
where
    F: Future<Output = T>,
{
    let _guard = PrivilegeGuard::acquire(provider);
    operation.await
}

/// Default provider: the REST clients already carry system credentials, so
/// elevation only tracks nesting depth
#[derive(Debug, Default)]
pub struct SystemPrivilege {
    depth: AtomicUsize,
}

impl SystemPrivilege {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently open privileged scopes
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_elevated(&self) -> bool {
        self.depth() > 0
    }
}

impl PrivilegeProvider for SystemPrivilege {
    fn enter(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    fn restore(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}
